//! Structural pattern matching of interaction data against action patterns
//!
//! A pattern is a partial template of the data: every key a pattern mapping names
//! must exist in the data with a matching value, while keys the pattern leaves out
//! are never looked at. Sequences must have exactly the pattern's length and
//! scalars must agree in both type and value (`1` never matches `1.0`).

use std::collections::{BTreeMap, VecDeque};

use guildjob_models::InteractionAction;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("failed to parse pattern of action '{action}': {source}")]
    Parse {
        action: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("unsupported mapping key in pattern of action '{action}'")]
    UnsupportedKey { action: String },
}

/// Dynamically typed tree shared by patterns and interaction data
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Sequence(Vec<Value>),
    Mapping(BTreeMap<String, Value>),
    /// Booleans and nulls; never part of a match
    Unsupported,
}

impl Value {
    /// Convert a parsed YAML (or JSON) document into a tree.
    ///
    /// Scalar mapping keys are stringified; sequence or mapping keys yield `None`.
    fn from_yaml(value: serde_yaml::Value) -> Option<Self> {
        use serde_yaml::Value as Yaml;

        Some(match value {
            Yaml::String(s) => Value::String(s),
            Yaml::Number(n) => number(n.as_i64(), n.as_f64(), n.is_f64()),
            Yaml::Sequence(items) => Value::Sequence(
                items
                    .into_iter()
                    .map(Value::from_yaml)
                    .collect::<Option<Vec<_>>>()?,
            ),
            Yaml::Mapping(map) => {
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    out.insert(mapping_key(k)?, Value::from_yaml(v)?);
                }
                Value::Mapping(out)
            }
            Yaml::Tagged(tagged) => Value::from_yaml(tagged.value)?,
            Yaml::Bool(_) | Yaml::Null => Value::Unsupported,
        })
    }
}

/// Stringify a scalar YAML mapping key; sequence, mapping and null keys yield `None`
pub(crate) fn mapping_key(key: serde_yaml::Value) -> Option<String> {
    use serde_yaml::Value as Yaml;

    match key {
        Yaml::String(s) => Some(s),
        Yaml::Number(n) => Some(n.to_string()),
        Yaml::Bool(b) => Some(b.to_string()),
        Yaml::Tagged(tagged) => mapping_key(tagged.value),
        _ => None,
    }
}

fn number(as_int: Option<i64>, as_float: Option<f64>, is_float: bool) -> Value {
    match (as_int, as_float) {
        (Some(i), _) if !is_float => Value::Integer(i),
        (_, Some(f)) => Value::Float(f),
        _ => Value::Unsupported,
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value as Json;

        match value {
            Json::String(s) => Value::String(s),
            Json::Number(n) => number(n.as_i64(), n.as_f64(), n.is_f64()),
            Json::Array(items) => Value::Sequence(items.into_iter().map(Value::from).collect()),
            Json::Object(map) => {
                Value::Mapping(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
            Json::Bool(_) | Json::Null => Value::Unsupported,
        }
    }
}

/// Parse an action's pattern text
pub fn parse_pattern(action: &InteractionAction) -> Result<Value, PatternError> {
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(&action.pattern).map_err(|source| PatternError::Parse {
            action: action.name.clone(),
            source,
        })?;

    Value::from_yaml(yaml).ok_or_else(|| PatternError::UnsupportedKey {
        action: action.name.clone(),
    })
}

/// Check whether `data` satisfies `pattern`
///
/// Breadth-first over (pattern, data) node pairs, stopping at the first mismatch.
pub fn matches(pattern: &Value, data: &Value) -> bool {
    let mut queue: VecDeque<(&Value, &Value)> = VecDeque::new();
    queue.push_back((pattern, data));

    while let Some((pattern, data)) = queue.pop_front() {
        match (pattern, data) {
            (Value::String(p), Value::String(d)) if p == d => {}
            (Value::Integer(p), Value::Integer(d)) if p == d => {}
            (Value::Float(p), Value::Float(d)) if p == d => {}
            (Value::Mapping(p), Value::Mapping(d)) => {
                for (key, p_value) in p {
                    let Some(d_value) = d.get(key) else {
                        return false;
                    };
                    queue.push_back((p_value, d_value));
                }
            }
            (Value::Sequence(p), Value::Sequence(d)) if p.len() == d.len() => {
                queue.extend(p.iter().zip(d.iter()));
            }
            _ => return false,
        }
    }

    true
}

/// Return the first action whose pattern matches `data`
pub fn select_action<'a>(
    actions: &'a [InteractionAction],
    data: &Value,
) -> Result<Option<&'a InteractionAction>, PatternError> {
    for action in actions {
        let pattern = parse_pattern(action)?;
        if matches(&pattern, data) {
            return Ok(Some(action));
        }
    }
    Ok(None)
}
