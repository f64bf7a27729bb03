//! Filter & match engine (§4.6): compiles a user expression into a
//! predicate tree over named `Call` attributes, with leaves for equality,
//! substring, regex, and numeric comparison, combined by `and`/`or`/`not`.
//! Evaluation is pure and idempotent. A compiled filter is cached by its
//! normalized source string so storage can reuse the last-used filter
//! without recompiling it on every `append()`.

use std::collections::HashMap;
use std::sync::Mutex;

use regex::Regex;

use crate::call::Call;

/// Named attributes a filter leaf can read off a `Call`. Mirrors the
/// display-filter columns named in §6: Call-ID, from, to, src, dst, method,
/// state, duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    CallId,
    From,
    To,
    Method,
    State,
    DurationUs,
    MsgCount,
}

impl Attribute {
    fn parse(name: &str) -> Option<Attribute> {
        match name.to_ascii_lowercase().as_str() {
            "callid" | "call-id" => Some(Attribute::CallId),
            "from" | "src" => Some(Attribute::From),
            "to" | "dst" => Some(Attribute::To),
            "method" => Some(Attribute::Method),
            "state" => Some(Attribute::State),
            "duration" => Some(Attribute::DurationUs),
            "msgcnt" => Some(Attribute::MsgCount),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum NumericCompare {
    Eq,
    Lt,
    Gt,
    Le,
    Ge,
}

/// One leaf or combinator of a compiled filter expression.
#[derive(Debug)]
pub enum Predicate {
    Substring { attr: Attribute, needle: String },
    Equals { attr: Attribute, value: String },
    Regex { attr: Attribute, re: Regex },
    Numeric { attr: Attribute, cmp: NumericCompare, value: i64 },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
    /// Always-true leaf; the empty expression compiles to this.
    Any,
}

fn attr_text(call: &Call, attr: Attribute) -> String {
    match attr {
        Attribute::CallId => call.call_id.to_string(),
        Attribute::From => call.source_user().unwrap_or("").to_string(),
        Attribute::To => call.destination_user().unwrap_or("").to_string(),
        Attribute::Method => call.method().map(|m| m.as_str().to_string()).unwrap_or_default(),
        Attribute::State => call.state.as_str().to_string(),
        Attribute::DurationUs | Attribute::MsgCount => String::new(),
    }
}

fn attr_numeric(call: &Call, attr: Attribute) -> Option<i64> {
    match attr {
        Attribute::DurationUs => Some(call.totaldur_us() as i64),
        Attribute::MsgCount => Some(call.msgcnt() as i64),
        _ => None,
    }
}

impl Predicate {
    pub fn eval(&self, call: &Call) -> bool {
        match self {
            Predicate::Any => true,
            Predicate::Substring { attr, needle } => {
                attr_text(call, *attr).to_ascii_lowercase().contains(&needle.to_ascii_lowercase())
            }
            Predicate::Equals { attr, value } => attr_text(call, *attr).eq_ignore_ascii_case(value),
            Predicate::Regex { attr, re } => re.is_match(&attr_text(call, *attr)),
            Predicate::Numeric { attr, cmp, value } => match attr_numeric(call, *attr) {
                Some(actual) => match cmp {
                    NumericCompare::Eq => actual == *value,
                    NumericCompare::Lt => actual < *value,
                    NumericCompare::Gt => actual > *value,
                    NumericCompare::Le => actual <= *value,
                    NumericCompare::Ge => actual >= *value,
                },
                None => false,
            },
            Predicate::And(a, b) => a.eval(call) && b.eval(call),
            Predicate::Or(a, b) => a.eval(call) || b.eval(call),
            Predicate::Not(p) => !p.eval(call),
        }
    }
}

/// Parses one clause of the display-filter grammar (§6): `<column>:<term>`,
/// where `<term>` may carry a leading `~` (regex) or `-` (negate). A bare
/// term with no `column:` prefix matches across Call-ID/from/to/method.
fn parse_clause(clause: &str) -> Option<Predicate> {
    let clause = clause.trim();
    if clause.is_empty() {
        return None;
    }

    let (attr, term) = match clause.split_once(':') {
        Some((name, term)) if Attribute::parse(name).is_some() => (Attribute::parse(name).unwrap(), term),
        _ => (Attribute::CallId, clause), // fallback: treated specially below as an any-column match
    };
    let any_column = clause.split_once(':').map(|(n, _)| Attribute::parse(n).is_none()).unwrap_or(true);

    let (negate, term) = match term.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, term),
    };

    let leaf = if let Some(pattern) = term.strip_prefix('~') {
        let re = Regex::new(pattern).ok()?;
        if any_column {
            Predicate::Or(
                Box::new(Predicate::Regex { attr: Attribute::CallId, re: re.clone() }),
                Box::new(Predicate::Or(
                    Box::new(Predicate::Regex { attr: Attribute::From, re: re.clone() }),
                    Box::new(Predicate::Regex { attr: Attribute::To, re }),
                )),
            )
        } else {
            Predicate::Regex { attr, re }
        }
    } else if any_column {
        Predicate::Or(
            Box::new(Predicate::Substring { attr: Attribute::CallId, needle: term.to_string() }),
            Box::new(Predicate::Or(
                Box::new(Predicate::Substring { attr: Attribute::From, needle: term.to_string() }),
                Box::new(Predicate::Substring { attr: Attribute::To, needle: term.to_string() }),
            )),
        )
    } else {
        Predicate::Substring { attr, needle: term.to_string() }
    };

    Some(if negate { Predicate::Not(Box::new(leaf)) } else { leaf })
}

/// Compiles a whitespace-separated sequence of clauses, ANDed together —
/// the display filter's "per-column match strings" behavior from §4.5.
pub fn compile(source: &str) -> Predicate {
    let normalized = source.trim();
    if normalized.is_empty() {
        return Predicate::Any;
    }
    normalized
        .split_whitespace()
        .filter_map(parse_clause)
        .fold(None, |acc, p| match acc {
            None => Some(p),
            Some(acc) => Some(Predicate::And(Box::new(acc), Box::new(p))),
        })
        .unwrap_or(Predicate::Any)
}

/// Caches the last-compiled filter by its normalized source string, as
/// §4.6 requires ("a compiled filter is hashable by its normalized source
/// string and cached; storage keeps the last-used filter compiled").
#[derive(Default)]
pub struct FilterCache {
    entries: Mutex<HashMap<String, std::sync::Arc<Predicate>>>,
}

impl FilterCache {
    pub fn new() -> Self {
        FilterCache::default()
    }

    pub fn compiled(&self, source: &str) -> std::sync::Arc<Predicate> {
        let normalized = source.trim().to_string();
        let mut entries = self.entries.lock().unwrap();
        entries.entry(normalized.clone()).or_insert_with(|| std::sync::Arc::new(compile(&normalized))).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{Call, CallState};
    use sipgrep_core::message::CallId;

    fn call_with_id(id: &str) -> Call {
        Call::new(CallId::from(id))
    }

    #[test]
    fn substring_match_is_case_insensitive() {
        let predicate = compile("alice");
        let mut call = call_with_id("abc@alice-host");
        call.state = CallState::InCall;
        assert!(predicate.eval(&call));
    }

    #[test]
    fn negated_state_clause_excludes_matching_calls() {
        let predicate = compile("state:-completed");
        let mut call = call_with_id("abc@x");
        call.state = CallState::Completed;
        assert!(!predicate.eval(&call));
        call.state = CallState::InCall;
        assert!(predicate.eval(&call));
    }

    #[test]
    fn regex_clause_matches_pattern() {
        let predicate = compile("callid:~^abc");
        assert!(predicate.eval(&call_with_id("abc@x")));
        assert!(!predicate.eval(&call_with_id("xyz@abc")));
    }

    #[test]
    fn cache_returns_same_compiled_instance_for_same_source() {
        let cache = FilterCache::new();
        let a = cache.compiled("state:completed");
        let b = cache.compiled("state:completed");
        assert!(std::sync::Arc::ptr_eq(&a, &b));
    }
}
