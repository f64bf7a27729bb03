//! Typed storage configuration, parsed at the edge from the raw
//! `HashMap<String, String>` configuration surface a collaborator hands in
//! (mirrors how `rvoip-call-engine` and `rvoip-session-core` build a typed
//! config struct from a raw map rather than threading the map itself
//! through every call site).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Parsed form of the `storage.*` configuration keys from §6 of the
/// configuration surface. Unrecognized keys are ignored; missing keys fall
/// back to their documented defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `storage.memory_limit`: cap in bytes, 0 = unbounded.
    pub memory_limit: u64,
    /// `storage.filter.methods`: accept-list of SIP methods; empty = all.
    pub filter_methods: Vec<String>,
    /// `storage.filter.payload`: regex pre-filter over message text.
    pub filter_payload: Option<String>,
    /// `storage.match.invite`: restrict storage to INVITE-initiated dialogs.
    pub match_invite: bool,
    /// `storage.match.complete`: drop non-terminal calls when exporting.
    /// Parsed but currently inert: it gates a save/export surface this
    /// crate doesn't implement, so there's nowhere in `append`/eviction
    /// for it to apply.
    pub match_complete: bool,
    /// `capture.limit`: maximum number of calls retained (0 = unbounded).
    pub capture_limit: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            memory_limit: 0,
            filter_methods: Vec::new(),
            filter_payload: None,
            match_invite: false,
            match_complete: false,
            capture_limit: 0,
        }
    }
}

impl StorageConfig {
    /// Builds a typed config from the raw map, the edge every collaborator
    /// is documented to hand the core (see §6 Configuration surface).
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        let mut config = StorageConfig::default();

        if let Some(v) = map.get("storage.memory_limit").and_then(|v| v.parse().ok()) {
            config.memory_limit = v;
        }
        if let Some(v) = map.get("storage.filter.methods") {
            config.filter_methods = v
                .split(',')
                .map(|m| m.trim().to_ascii_uppercase())
                .filter(|m| !m.is_empty())
                .collect();
        }
        if let Some(v) = map.get("storage.filter.payload") {
            if !v.is_empty() {
                config.filter_payload = Some(v.clone());
            }
        }
        if let Some(v) = map.get("storage.match.invite") {
            config.match_invite = v.eq_ignore_ascii_case("true") || v == "1";
        }
        if let Some(v) = map.get("storage.match.complete") {
            config.match_complete = v.eq_ignore_ascii_case("true") || v == "1";
        }
        if let Some(v) = map.get("capture.limit").and_then(|v| v.parse().ok()) {
            config.capture_limit = v;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_recognized_keys_and_ignores_unknown() {
        let mut map = HashMap::new();
        map.insert("storage.memory_limit".to_string(), "65536".to_string());
        map.insert("storage.filter.methods".to_string(), "invite, bye".to_string());
        map.insert("storage.match.invite".to_string(), "true".to_string());
        map.insert("tls.keyfile".to_string(), "/etc/key.pem".to_string());

        let config = StorageConfig::from_map(&map);
        assert_eq!(config.memory_limit, 65536);
        assert_eq!(config.filter_methods, vec!["INVITE", "BYE"]);
        assert!(config.match_invite);
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config = StorageConfig::from_map(&HashMap::new());
        assert_eq!(config, StorageConfig::default());
    }
}
