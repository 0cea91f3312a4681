//! Converters between JSON values and the bytes a worker stores.
//!
//! - `bytes`: pass-through. Accepts a string or an array of byte values and
//!   reads back an array of byte values.
//! - `json`: JSON text. With schemas enabled every value is wrapped in a
//!   `{"schema": ..., "payload": ...}` envelope and unwrapped on read.
//! - `string`: UTF-8 text. Non-string values are written as their JSON text.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value, json};

use crate::error::{Error, Result};

/// Converter selection as written in worker properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConverterKind {
    Bytes,
    Json,
    String,
}

impl ConverterKind {
    /// Instantiate the converter. `schemas_enable` only affects `json`.
    pub fn build(self, schemas_enable: bool) -> Box<dyn Converter> {
        match self {
            ConverterKind::Bytes => Box::new(BytesConverter),
            ConverterKind::Json => Box::new(JsonConverter { schemas_enable }),
            ConverterKind::String => Box::new(StringConverter),
        }
    }
}

impl FromStr for ConverterKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "bytes" => Ok(ConverterKind::Bytes),
            "json" => Ok(ConverterKind::Json),
            "string" => Ok(ConverterKind::String),
            other => Err(Error::Config(format!("unknown converter '{}'", other))),
        }
    }
}

impl fmt::Display for ConverterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConverterKind::Bytes => write!(f, "bytes"),
            ConverterKind::Json => write!(f, "json"),
            ConverterKind::String => write!(f, "string"),
        }
    }
}

pub trait Converter: Send + Sync {
    fn kind(&self) -> ConverterKind;

    fn from_value(&self, value: &Value) -> Result<Vec<u8>>;

    fn to_value(&self, data: &[u8]) -> Result<Value>;
}

pub struct BytesConverter;

impl Converter for BytesConverter {
    fn kind(&self) -> ConverterKind {
        ConverterKind::Bytes
    }

    fn from_value(&self, value: &Value) -> Result<Vec<u8>> {
        match value {
            Value::Null => Ok(Vec::new()),
            Value::String(s) => Ok(s.as_bytes().to_vec()),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_u64()
                        .and_then(|b| u8::try_from(b).ok())
                        .ok_or_else(|| {
                            Error::Conversion(format!("bytes converter got non-byte element {}", item))
                        })
                })
                .collect(),
            other => Err(Error::Conversion(format!(
                "bytes converter cannot write {}",
                other
            ))),
        }
    }

    fn to_value(&self, data: &[u8]) -> Result<Value> {
        Ok(Value::Array(data.iter().map(|b| Value::from(*b)).collect()))
    }
}

pub struct JsonConverter {
    schemas_enable: bool,
}

impl Converter for JsonConverter {
    fn kind(&self) -> ConverterKind {
        ConverterKind::Json
    }

    fn from_value(&self, value: &Value) -> Result<Vec<u8>> {
        if self.schemas_enable {
            let envelope = json!({ "schema": infer_schema(value), "payload": value });
            Ok(serde_json::to_vec(&envelope)?)
        } else {
            Ok(serde_json::to_vec(value)?)
        }
    }

    fn to_value(&self, data: &[u8]) -> Result<Value> {
        let value: Value = serde_json::from_slice(data)?;
        if !self.schemas_enable {
            return Ok(value);
        }

        match value {
            Value::Object(mut envelope)
                if envelope.len() == 2
                    && envelope.contains_key("schema")
                    && envelope.contains_key("payload") =>
            {
                Ok(envelope.remove("payload").unwrap_or(Value::Null))
            }
            _ => Err(Error::Conversion(
                "json converter with schemas enabled expects a {schema, payload} envelope"
                    .to_string(),
            )),
        }
    }
}

pub struct StringConverter;

impl Converter for StringConverter {
    fn kind(&self) -> ConverterKind {
        ConverterKind::String
    }

    fn from_value(&self, value: &Value) -> Result<Vec<u8>> {
        match value {
            Value::String(s) => Ok(s.as_bytes().to_vec()),
            other => Ok(other.to_string().into_bytes()),
        }
    }

    fn to_value(&self, data: &[u8]) -> Result<Value> {
        String::from_utf8(data.to_vec())
            .map(Value::String)
            .map_err(|e| Error::Conversion(format!("string converter got invalid UTF-8: {}", e)))
    }
}

/// Connect-style schema describing `value`.
fn infer_schema(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "type": "string", "optional": true }),
        Value::Bool(_) => json!({ "type": "boolean", "optional": false }),
        Value::Number(n) if n.is_i64() || n.is_u64() => {
            json!({ "type": "int64", "optional": false })
        }
        Value::Number(_) => json!({ "type": "double", "optional": false }),
        Value::String(_) => json!({ "type": "string", "optional": false }),
        Value::Array(items) => {
            let element = items
                .first()
                .map(infer_schema)
                .unwrap_or_else(|| json!({ "type": "string", "optional": true }));
            json!({ "type": "array", "items": element, "optional": false })
        }
        Value::Object(fields) => {
            let fields: Vec<Value> = fields
                .iter()
                .map(|(name, field)| {
                    let mut schema = match infer_schema(field) {
                        Value::Object(schema) => schema,
                        _ => Map::new(),
                    };
                    schema.insert("field".to_string(), Value::String(name.clone()));
                    Value::Object(schema)
                })
                .collect();
            json!({ "type": "struct", "fields": fields, "optional": false })
        }
    }
}
