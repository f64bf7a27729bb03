//! Loads the `storage.*`/`capture.*` configuration surface from a TOML
//! file into the flat `HashMap<String, String>` map `StorageConfig::from_map`
//! expects, then lets CLI flags override individual keys.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};

use crate::Cli;

pub fn load_toml(path: &Path) -> Result<HashMap<String, String>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading config file {}", path.display()))?;
    let value: toml::Value = toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))?;
    let mut map = HashMap::new();
    flatten(&value, String::new(), &mut map);
    Ok(map)
}

fn flatten(value: &toml::Value, prefix: String, out: &mut HashMap<String, String>) {
    match value {
        toml::Value::Table(table) => {
            for (key, v) in table {
                let next = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
                flatten(v, next, out);
            }
        }
        toml::Value::String(s) => {
            out.insert(prefix, s.clone());
        }
        other => {
            out.insert(prefix, other.to_string());
        }
    }
}

pub fn apply_cli_overrides(map: &mut HashMap<String, String>, cli: &Cli) {
    if let Some(v) = cli.memory_limit {
        map.insert("storage.memory_limit".into(), v.to_string());
    }
    if let Some(v) = &cli.filter_methods {
        map.insert("storage.filter.methods".into(), v.clone());
    }
    if let Some(v) = &cli.filter_payload {
        map.insert("storage.filter.payload".into(), v.clone());
    }
    if cli.match_invite {
        map.insert("storage.match.invite".into(), "true".into());
    }
    if let Some(v) = cli.capture_limit {
        map.insert("capture.limit".into(), v.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattens_nested_tables_into_dotted_keys() {
        let value: toml::Value = toml::from_str(
            r#"
            [storage]
            memory_limit = "65536"

            [storage.filter]
            methods = "INVITE,BYE"
            "#,
        )
        .unwrap();
        let mut map = HashMap::new();
        flatten(&value, String::new(), &mut map);
        assert_eq!(map.get("storage.memory_limit").map(String::as_str), Some("65536"));
        assert_eq!(map.get("storage.filter.methods").map(String::as_str), Some("INVITE,BYE"));
    }
}
