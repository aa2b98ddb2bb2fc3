//! Normalization of a manifest's conditional `"exports"` declaration.
//!
//! The raw declaration is arbitrarily nested; it is flattened into one
//! [`ConditionTable`] per export path, keyed by the dot-joined chain of
//! condition names that leads to a concrete file.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

/// Dot-joined condition chain → relative output file.
pub type ConditionTable = BTreeMap<String, String>;

/// Export path (`.`, `./foo`) → its flattened conditions.
pub type NormalizedExports = BTreeMap<String, ConditionTable>;

static IS_SCRIPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.(?:[mc]?jsx?|d\.[mc]?ts)$").expect("valid regex"));

/// How the keys of one `"exports"` object level are interpreted.
///
/// Decided from the first key only; mixing `./subpath` keys with bare
/// condition names at the same level is not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportsShape {
    Subpaths,
    Conditions,
}

pub fn classify(level: &Map<String, Value>) -> ExportsShape {
    match level.keys().next() {
        Some(key) if key.starts_with('.') => ExportsShape::Subpaths,
        _ => ExportsShape::Conditions,
    }
}

/// Whether `file` names a script or type declaration we know how to emit.
pub fn is_script(file: &str) -> bool {
    IS_SCRIPT.is_match(file)
}

/// Flatten `value` into `output`, prefixing every chain with `condition`.
pub fn flatten(output: &mut ConditionTable, value: &Value, condition: &str) {
    match value {
        Value::String(file) => {
            if is_script(file) && !file.contains('*') {
                let key = if condition.is_empty() { "default" } else { condition };
                output.insert(key.to_string(), file.clone());
            }
        }
        Value::Object(map) => {
            for (key, nested) in map {
                if key.contains('*') || !is_truthy(nested) {
                    continue;
                }
                let chain = if condition.is_empty() {
                    key.clone()
                } else {
                    format!("{condition}.{key}")
                };
                flatten(output, nested, &chain);
            }
        }
        // fallback list: the first alternative that yields anything wins
        Value::Array(alternatives) => {
            for alternative in alternatives {
                let mut tmp = ConditionTable::new();
                flatten(&mut tmp, alternative, condition);
                if !tmp.is_empty() {
                    output.extend(tmp);
                    break;
                }
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Normalize the manifest's `"exports"` field into per-path condition tables.
///
/// Export paths whose table ends up empty (wildcards, `.json`, `.css`, ...)
/// are omitted.
pub fn entries(exports: &Value) -> NormalizedExports {
    let mut output = NormalizedExports::new();

    let level = match exports {
        Value::Object(level) => level,
        other => {
            let mut table = ConditionTable::new();
            flatten(&mut table, other, "");
            if !table.is_empty() {
                output.insert(".".to_string(), table);
            }
            return output;
        }
    };

    match classify(level) {
        ExportsShape::Subpaths => {
            for (path, value) in level {
                if path.contains('*') {
                    continue;
                }
                let mut table = ConditionTable::new();
                flatten(&mut table, value, "");
                if !table.is_empty() {
                    output.insert(path.clone(), table);
                }
            }
        }
        ExportsShape::Conditions => {
            let mut table = ConditionTable::new();
            flatten(&mut table, exports, "");
            if !table.is_empty() {
                output.insert(".".to_string(), table);
            }
        }
    }

    output
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::Array(_) | Value::Object(_) => true,
    }
}
