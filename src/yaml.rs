//! Manifest document parsing using yaml-rust2
//!
//! Both `.yaml` and `.json` resource files go through the YAML loader (JSON is
//! a YAML subset), producing one `serde_json::Value` per document.

use serde_json::{Map, Number, Value};
use yaml_rust2::{Yaml, YamlLoader};

/// Error type for manifest parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YamlError(String);

impl std::fmt::Display for YamlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for YamlError {}

/// Parse every document in `input`, in file order.
///
/// Empty documents (a stray `---`, a comment-only section) are dropped, so
/// the result holds only documents that can be submitted.
pub fn parse_documents(input: &str) -> Result<Vec<Value>, YamlError> {
    let docs = YamlLoader::load_from_str(input).map_err(|e| YamlError(e.to_string()))?;
    docs.into_iter()
        .map(to_json)
        .filter(|doc| !matches!(doc, Ok(Value::Null)))
        .collect()
}

fn to_json(yaml: Yaml) -> Result<Value, YamlError> {
    Ok(match yaml {
        Yaml::Null => Value::Null,
        Yaml::Boolean(b) => Value::Bool(b),
        Yaml::Integer(i) => Value::Number(i.into()),
        Yaml::Real(raw) => {
            let f: f64 = raw
                .parse()
                .map_err(|e: std::num::ParseFloatError| YamlError(format!("{raw}: {e}")))?;
            Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
        }
        Yaml::String(s) => Value::String(s),
        Yaml::Array(items) => Value::Array(
            items
                .into_iter()
                .map(to_json)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Yaml::Hash(hash) => {
            let mut map = Map::new();
            for (key, value) in hash {
                map.insert(key_string(key)?, to_json(value)?);
            }
            Value::Object(map)
        }
        Yaml::Alias(_) => return Err(YamlError("YAML aliases are not supported".to_string())),
        Yaml::BadValue => return Err(YamlError("bad YAML value".to_string())),
    })
}

fn key_string(key: Yaml) -> Result<String, YamlError> {
    match key {
        Yaml::String(s) | Yaml::Real(s) => Ok(s),
        Yaml::Integer(i) => Ok(i.to_string()),
        Yaml::Boolean(b) => Ok(b.to_string()),
        Yaml::Null => Ok("null".to_string()),
        other => Err(YamlError(format!("unsupported mapping key: {other:?}"))),
    }
}
