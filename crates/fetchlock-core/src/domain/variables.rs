//! Typed process variables and their response projection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Serialization format the store keeps object values in.
pub const JSON_DATA_FORMAT: &str = "application/json";

/// Variables of one process instance scope, ordered by name.
pub type VariableMap = BTreeMap<String, TypedValue>;

/// Object value kept in its serialized form until a caller asks otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedObject {
    pub serialized: String,
    pub object_type_name: String,
    #[serde(default = "default_data_format")]
    pub serialization_data_format: String,
}

fn default_data_format() -> String {
    JSON_DATA_FORMAT.to_string()
}

/// A variable value with its engine type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum TypedValue {
    String(String),
    Integer(i32),
    Long(i64),
    Double(f64),
    Boolean(bool),
    Null,
    /// JSON document stored as text.
    Json(String),
    Object(SerializedObject),
}

impl TypedValue {
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    pub fn object(serialized: impl Into<String>, object_type_name: impl Into<String>) -> Self {
        Self::Object(SerializedObject {
            serialized: serialized.into(),
            object_type_name: object_type_name.into(),
            serialization_data_format: default_data_format(),
        })
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "String",
            Self::Integer(_) => "Integer",
            Self::Long(_) => "Long",
            Self::Double(_) => "Double",
            Self::Boolean(_) => "Boolean",
            Self::Null => "Null",
            Self::Json(_) => "Json",
            Self::Object(_) => "Object",
        }
    }

    /// Projects the value for a response.
    ///
    /// Serialized values (`Json`, `Object`) are returned as text unless
    /// `deserialize` is set, in which case they are parsed.
    pub fn project(&self, name: &str, deserialize: bool) -> Result<VariableView, VariableError> {
        let mut value_info = Map::new();
        let value = match self {
            Self::String(s) => Value::String(s.clone()),
            Self::Integer(i) => Value::from(*i),
            Self::Long(l) => Value::from(*l),
            Self::Double(d) => serde_json::Number::from_f64(*d)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Boolean(b) => Value::Bool(*b),
            Self::Null => Value::Null,
            Self::Json(text) if deserialize => parse(name, text)?,
            Self::Json(text) => Value::String(text.clone()),
            Self::Object(object) => {
                value_info.insert(
                    "objectTypeName".to_string(),
                    Value::String(object.object_type_name.clone()),
                );
                value_info.insert(
                    "serializationDataFormat".to_string(),
                    Value::String(object.serialization_data_format.clone()),
                );
                if !deserialize {
                    Value::String(object.serialized.clone())
                } else if object.serialization_data_format == JSON_DATA_FORMAT {
                    parse(name, &object.serialized)?
                } else {
                    return Err(VariableError::UnsupportedFormat {
                        name: name.to_string(),
                        format: object.serialization_data_format.clone(),
                    });
                }
            }
        };

        Ok(VariableView {
            value,
            value_type: self.type_name().to_string(),
            value_info,
        })
    }
}

fn parse(name: &str, text: &str) -> Result<Value, VariableError> {
    serde_json::from_str(text).map_err(|e| VariableError::Deserialization {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

/// Response form of a variable: `{value, type, valueInfo}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableView {
    pub value: Value,
    #[serde(rename = "type")]
    pub value_type: String,
    pub value_info: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VariableError {
    #[error("Cannot deserialize object in variable '{name}': {reason}")]
    Deserialization { name: String, reason: String },

    #[error("Cannot deserialize object in variable '{name}': unsupported serialization data format '{format}'")]
    UnsupportedFormat { name: String, format: String },
}

/// Projects the variables a subscription asked for.
///
/// `filter == None` means every variable; names without a value are skipped.
pub fn project_variables(
    variables: &VariableMap,
    filter: Option<&[String]>,
    deserialize: bool,
) -> Result<BTreeMap<String, VariableView>, VariableError> {
    let mut out = BTreeMap::new();
    match filter {
        None => {
            for (name, value) in variables {
                out.insert(name.clone(), value.project(name, deserialize)?);
            }
        }
        Some(names) => {
            for name in names {
                if let Some(value) = variables.get(name) {
                    out.insert(name.clone(), value.project(name, deserialize)?);
                }
            }
        }
    }
    Ok(out)
}
