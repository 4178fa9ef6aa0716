use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Number;

/// Variables in the order they were declared.
pub type VarMap = IndexMap<String, VarValue>;

/// A variable value as found in an inventory.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum VarValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    List(Vec<VarValue>),
    Map(VarMap),
}

impl VarValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            VarValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            VarValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            VarValue::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            VarValue::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&VarMap> {
        match self {
            VarValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            VarValue::Null => "null",
            VarValue::Bool(_) => "bool",
            VarValue::Number(_) => "number",
            VarValue::String(_) => "string",
            VarValue::List(_) => "list",
            VarValue::Map(_) => "map",
        }
    }

    /// `None` for NaN and infinities, which have no JSON representation.
    pub fn from_f64(f: f64) -> Option<VarValue> {
        Number::from_f64(f).map(VarValue::Number)
    }

    pub fn from_yaml(value: serde_yaml::Value) -> Result<VarValue, String> {
        let value = match value {
            serde_yaml::Value::Null => VarValue::Null,
            serde_yaml::Value::Bool(b) => VarValue::Bool(b),
            serde_yaml::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    VarValue::Number(i.into())
                } else if let Some(u) = n.as_u64() {
                    VarValue::Number(u.into())
                } else {
                    let f = n.as_f64().unwrap_or(f64::NAN);
                    VarValue::from_f64(f)
                        .ok_or_else(|| format!("number {n} can't be represented"))?
                }
            }
            serde_yaml::Value::String(s) => VarValue::String(s),
            serde_yaml::Value::Sequence(seq) => VarValue::List(
                seq.into_iter()
                    .map(VarValue::from_yaml)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            serde_yaml::Value::Mapping(mapping) => VarValue::Map(var_map_from_yaml(mapping)?),
            serde_yaml::Value::Tagged(tagged) => {
                // ciphertext stays opaque, decryption is up to the caller
                if tagged.tag == "vault" || tagged.tag == "unsafe" {
                    VarValue::from_yaml(tagged.value)?
                } else {
                    return Err(format!("unsupported tag {}", tagged.tag));
                }
            }
        };
        Ok(value)
    }
}

/// Converts a YAML mapping to variables. Scalar keys are stringified.
pub fn var_map_from_yaml(mapping: serde_yaml::Mapping) -> Result<VarMap, String> {
    let mut vars = VarMap::new();
    for (key, value) in mapping {
        let key = yaml_key(&key)?;
        let value = VarValue::from_yaml(value).map_err(|e| format!("variable {key}: {e}"))?;
        vars.insert(key, value);
    }
    Ok(vars)
}

pub fn yaml_key(key: &serde_yaml::Value) -> Result<String, String> {
    match key {
        serde_yaml::Value::String(s) => Ok(s.clone()),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        _ => Err("variable names should be scalars".to_string()),
    }
}

impl fmt::Display for VarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarValue::Null => write!(f, "null"),
            VarValue::Bool(b) => write!(f, "{b}"),
            VarValue::Number(n) => write!(f, "{n}"),
            VarValue::String(s) => write!(f, "{s}"),
            VarValue::List(_) | VarValue::Map(_) => {
                let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                write!(f, "{json}")
            }
        }
    }
}

impl From<&str> for VarValue {
    fn from(s: &str) -> Self {
        VarValue::String(s.to_string())
    }
}

impl From<String> for VarValue {
    fn from(s: String) -> Self {
        VarValue::String(s)
    }
}

impl From<bool> for VarValue {
    fn from(b: bool) -> Self {
        VarValue::Bool(b)
    }
}

impl From<i64> for VarValue {
    fn from(i: i64) -> Self {
        VarValue::Number(i.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_scalars() {
        let value: serde_yaml::Value = serde_yaml::from_str("[1, 2.5, true, ~, text]").unwrap();
        let value = VarValue::from_yaml(value).unwrap();
        let VarValue::List(items) = value else {
            panic!("expected a list");
        };
        assert_eq!(items[0].as_i64(), Some(1));
        assert_eq!(items[1].as_f64(), Some(2.5));
        assert_eq!(items[2].as_bool(), Some(true));
        assert_eq!(items[3], VarValue::Null);
        assert_eq!(items[4].as_str(), Some("text"));
    }

    #[test]
    fn yaml_mapping_keeps_order_and_stringifies_keys() {
        let value: serde_yaml::Value = serde_yaml::from_str("zeta: 1\n80: http\nalpha: 2\n").unwrap();
        let serde_yaml::Value::Mapping(mapping) = value else {
            panic!("expected a mapping");
        };
        let vars = var_map_from_yaml(mapping).unwrap();
        let keys: Vec<&str> = vars.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["zeta", "80", "alpha"]);
    }

    #[test]
    fn vault_tag_is_kept_opaque() {
        let value: serde_yaml::Value =
            serde_yaml::from_str("!vault |\n  $ANSIBLE_VAULT;1.1;AES256\n  6162\n").unwrap();
        let value = VarValue::from_yaml(value).unwrap();
        assert!(value.as_str().unwrap().starts_with("$ANSIBLE_VAULT"));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let value: serde_yaml::Value = serde_yaml::from_str("!custom 3").unwrap();
        assert!(VarValue::from_yaml(value).is_err());
    }

    #[test]
    fn display_and_json() {
        let mut map = VarMap::new();
        map.insert("port".to_string(), 8080i64.into());
        map.insert("tls".to_string(), true.into());
        let value = VarValue::Map(map);
        assert_eq!(value.to_string(), r#"{"port":8080,"tls":true}"#);
        assert_eq!(VarValue::from("prod").to_string(), "prod");
        assert_eq!(VarValue::Null.to_string(), "null");
    }
}
