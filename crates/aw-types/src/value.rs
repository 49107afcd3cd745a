//! A generic, order-preserving value model for the frontmatter header.
//!
//! Design Notes §9: "Model as a recursive function operating on a tagged
//! sum `{scalar, list, map}`... Avoid in-place mutation; return new
//! values." [`Value::Map`] is a `Vec<(String, Value)>`, not a `HashMap`,
//! so insertion order survives until an explicit sort is applied — every
//! unordered collection that reaches the emitter must be materialized
//! through a sort at the boundary (spec.md §3 invariant 6), never relied
//! on implicitly.

use std::fmt;

/// A header value: one of the handful of shapes YAML frontmatter can take.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Value>),
    Map(Vec<(String, Value)>),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Direct type assertion only — integers are never widened through an
    /// intermediate float representation (spec.md §4.1).
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Look up a key in a `Map` value. Returns `None` for non-map values.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map()?.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Render a scalar canonically for textual substitution (spec.md
    /// §4.2): strings are emitted as-is (no added quotes), integers and
    /// booleans render via their natural `Display`, `null` renders empty.
    pub fn render_scalar(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Str(s) => s.clone(),
            Value::List(_) | Value::Map(_) => {
                // Not a scalar; callers should not reach this path, but
                // render *something* deterministic rather than panic.
                format!("{self}")
            }
        }
    }

    /// Sort a `Map` value's entries by key, recursively. Used at every
    /// emission boundary per invariant 6.
    pub fn sorted(&self) -> Value {
        match self {
            Value::Map(entries) => {
                let mut sorted: Vec<(String, Value)> =
                    entries.iter().map(|(k, v)| (k.clone(), v.sorted())).collect();
                sorted.sort_by(|a, b| a.0.cmp(&b.0));
                Value::Map(sorted)
            }
            Value::List(items) => Value::List(items.iter().map(Value::sorted).collect()),
            other => other.clone(),
        }
    }

    /// Convert from a `serde_yaml::Value`, rejecting floats (frontmatter
    /// has no use for them and accepting one would risk silent precision
    /// loss downstream).
    pub fn from_yaml(v: &serde_yaml::Value) -> Result<Value, String> {
        match v {
            serde_yaml::Value::Null => Ok(Value::Null),
            serde_yaml::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_yaml::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int(i))
                } else {
                    Err(format!("non-integer number not supported: {n}"))
                }
            }
            serde_yaml::Value::String(s) => Ok(Value::Str(s.clone())),
            serde_yaml::Value::Sequence(seq) => {
                let mut out = Vec::with_capacity(seq.len());
                for item in seq {
                    out.push(Value::from_yaml(item)?);
                }
                Ok(Value::List(out))
            }
            serde_yaml::Value::Mapping(map) => {
                let mut out = Vec::with_capacity(map.len());
                for (k, v) in map {
                    let key = match k {
                        serde_yaml::Value::String(s) => s.clone(),
                        other => return Err(format!("non-string map key: {other:?}")),
                    };
                    out.push((key, Value::from_yaml(v)?));
                }
                Ok(Value::Map(out))
            }
            serde_yaml::Value::Tagged(t) => Value::from_yaml(&t.value),
        }
    }

    /// Convert to a `serde_yaml::Value` for consumption by the YAML
    /// emitter or for debugging. Map order is preserved as-is; callers
    /// that need sorted output should call [`Value::sorted`] first.
    pub fn to_yaml(&self) -> serde_yaml::Value {
        match self {
            Value::Null => serde_yaml::Value::Null,
            Value::Bool(b) => serde_yaml::Value::Bool(*b),
            Value::Int(i) => serde_yaml::Value::Number((*i).into()),
            Value::Str(s) => serde_yaml::Value::String(s.clone()),
            Value::List(items) => {
                serde_yaml::Value::Sequence(items.iter().map(Value::to_yaml).collect())
            }
            Value::Map(entries) => {
                let mut map = serde_yaml::Mapping::new();
                for (k, v) in entries {
                    map.insert(serde_yaml::Value::String(k.clone()), v.to_yaml());
                }
                serde_yaml::Value::Mapping(map)
            }
        }
    }

    /// Convert to a `serde_json::Value`, used by components that build
    /// JSON schemas (the safe-output tool descriptors) rather than YAML.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::Number((*i).into()),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(entries) => {
                let mut map = serde_json::Map::new();
                for (k, v) in entries {
                    map.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(map)
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_yaml::to_string(&self.to_yaml()) {
            Ok(s) => write!(f, "{}", s.trim_end()),
            Err(_) => write!(f, "<unrenderable value>"),
        }
    }
}

/// Merge precedence for the import-merge pass (Design Notes §9: "precedence
/// rule is a parameter"). Only [`Precedence::MainWins`] is exercised by
/// this compiler, but the type exists so the merge function never
/// hard-codes which side wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precedence {
    MainWins,
    ImportedWins,
}

/// Deep-merge two values per spec.md §4.2's import-lower-priority rule:
/// scalars take the winning side outright; lists are unioned and sorted
/// (by rendered string form); maps are merged key-by-key, recursing when
/// both sides have a map at the same key.
pub fn merge(main: &Value, imported: &Value, precedence: Precedence) -> Value {
    match (main, imported) {
        (Value::Map(main_entries), Value::Map(imported_entries)) => {
            let mut merged: Vec<(String, Value)> = Vec::new();
            let mut seen: Vec<String> = Vec::new();

            for (k, v) in main_entries {
                seen.push(k.clone());
                match imported_entries.iter().find(|(ik, _)| ik == k) {
                    Some((_, iv)) => merged.push((k.clone(), merge(v, iv, precedence))),
                    None => merged.push((k.clone(), v.clone())),
                }
            }
            for (k, v) in imported_entries {
                if !seen.contains(k) {
                    merged.push((k.clone(), v.clone()));
                }
            }
            Value::Map(merged)
        }
        (Value::List(main_items), Value::List(imported_items)) => {
            let mut union: Vec<Value> = main_items.clone();
            for item in imported_items {
                if !union.contains(item) {
                    union.push(item.clone());
                }
            }
            union.sort_by(|a, b| a.render_scalar().cmp(&b.render_scalar()));
            Value::List(union)
        }
        _ => match precedence {
            Precedence::MainWins => {
                if main.is_null() {
                    imported.clone()
                } else {
                    main.clone()
                }
            }
            Precedence::ImportedWins => {
                if imported.is_null() {
                    main.clone()
                } else {
                    imported.clone()
                }
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(entries: Vec<(&str, Value)>) -> Value {
        Value::Map(entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    #[test]
    fn sorted_orders_map_keys() {
        let v = m(vec![("b", Value::Int(1)), ("a", Value::Int(2))]);
        let sorted = v.sorted();
        let entries = sorted.as_map().unwrap();
        assert_eq!(entries[0].0, "a");
        assert_eq!(entries[1].0, "b");
    }

    #[test]
    fn merge_lists_unions_and_sorts() {
        let main = Value::List(vec![Value::Str("echo".into())]);
        let imported = Value::List(vec![Value::Str("ls".into())]);
        let merged = merge(&main, &imported, Precedence::MainWins);
        let items: Vec<&str> = merged.as_list().unwrap().iter().map(|v| v.as_str().unwrap()).collect();
        assert_eq!(items, vec!["echo", "ls"]);
    }

    #[test]
    fn merge_maps_main_wins_on_scalar_conflict() {
        let main = m(vec![("name", Value::Str("main".into()))]);
        let imported = m(vec![("name", Value::Str("imported".into()))]);
        let merged = merge(&main, &imported, Precedence::MainWins);
        assert_eq!(merged.get("name").unwrap().as_str(), Some("main"));
    }

    #[test]
    fn merge_maps_deep_merges_nested_maps() {
        let main = m(vec![("tools", m(vec![("bash", Value::List(vec![Value::Str("echo".into())]))]))]);
        let imported = m(vec![("tools", m(vec![("bash", Value::List(vec![Value::Str("ls".into())]))]))]);
        let merged = merge(&main, &imported, Precedence::MainWins);
        let bash = merged.get("tools").unwrap().get("bash").unwrap();
        let items: Vec<&str> = bash.as_list().unwrap().iter().map(|v| v.as_str().unwrap()).collect();
        assert_eq!(items, vec!["echo", "ls"]);
    }

    #[test]
    fn render_scalar_canonicalizes_int() {
        assert_eq!(Value::Int(50).render_scalar(), "50");
    }
}
