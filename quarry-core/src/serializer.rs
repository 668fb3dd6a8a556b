//! JSON payload serializer.
//!
//! Configuration is passed in at construction; the owning database builds
//! one serializer and shares it.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::config::SerializerConfig;
use crate::error::SerializationError;

#[derive(Debug, Clone, Default)]
pub struct JsonSerializer {
    config: SerializerConfig,
}

impl JsonSerializer {
    pub fn new(config: SerializerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SerializerConfig {
        &self.config
    }

    /// Serialize to a JSON value with excluded members stripped.
    pub fn to_value<T: Serialize>(&self, item: &T) -> Result<Value, SerializationError> {
        let value = serde_json::to_value(item).map_err(|e| SerializationError::Serialize {
            reason: e.to_string(),
        })?;
        Ok(self.strip_excluded(value))
    }

    /// Parse caller-supplied JSON text, stripping excluded members the same
    /// way [`JsonSerializer::to_value`] does.
    pub fn parse_value(&self, json: &str) -> Result<Value, SerializationError> {
        let value = serde_json::from_str(json).map_err(|e| SerializationError::Deserialize {
            reason: e.to_string(),
        })?;
        Ok(self.strip_excluded(value))
    }

    fn strip_excluded(&self, mut value: Value) -> Value {
        if let Value::Object(map) = &mut value {
            for member in &self.config.excluded_members {
                map.remove(member);
            }
        }
        value
    }

    pub fn serialize<T: Serialize>(&self, item: &T) -> Result<String, SerializationError> {
        let value = self.to_value(item)?;
        serde_json::to_string(&value).map_err(|e| SerializationError::Serialize {
            reason: e.to_string(),
        })
    }

    pub fn deserialize<T: DeserializeOwned>(&self, json: &str) -> Result<T, SerializationError> {
        serde_json::from_str(json).map_err(|e| SerializationError::Deserialize {
            reason: e.to_string(),
        })
    }

    pub fn deserialize_many<T, I>(&self, payloads: I) -> Result<Vec<T>, SerializationError>
    where
        T: DeserializeOwned,
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        payloads
            .into_iter()
            .map(|json| self.deserialize(json.as_ref()))
            .collect()
    }
}
