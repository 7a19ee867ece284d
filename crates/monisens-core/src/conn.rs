//! Connection answers handed to a module on connect
//!
//! Connection parameters are described with the regular schema model but
//! answered as a flat name to string map. The host validates a typed draft
//! first and only then encodes it with [`ConnectionAnswer::from_settings`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;

use crate::schema::{EntryRules, Schema};
use crate::value::{Payload, Settings};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnParamError {
    #[error("connection parameter '{0}' is missing")]
    Missing(String),
    #[error("connection parameter '{name}' has malformed value '{value}'")]
    Malformed { name: String, value: String },
}

/// Flat mapping from connection parameter name to its string-encoded value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionAnswer(BTreeMap<String, String>);

impl ConnectionAnswer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode validated settings by entry name
    ///
    /// Ranges are written as `from..to` and choices as the chosen label.
    pub fn from_settings(schema: &Schema, settings: &Settings) -> Self {
        let mut answer = Self::new();

        for value in settings.iter() {
            let Some(entry) = schema.entry(value.id) else {
                continue;
            };

            let encoded = match (&value.payload, &entry.rules) {
                (Payload::ChoiceList(index), EntryRules::ChoiceList(rules)) => {
                    match rules.choices.get(*index) {
                        Some(label) => label.clone(),
                        None => continue,
                    }
                }
                (Payload::String(s), _) | (Payload::Json(s), _) => s.clone(),
                (Payload::Int(v), _) => v.to_string(),
                (Payload::Float(v), _) => v.to_string(),
                (Payload::IntRange(span), _) => span.to_string(),
                (Payload::FloatRange(span), _) => span.to_string(),
                (Payload::ChoiceList(index), _) => index.to_string(),
            };

            answer.insert(entry.name.clone(), encoded);
        }

        answer
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(|s| s.as_str())
    }

    /// Fetch a required parameter
    pub fn require(&self, name: &str) -> Result<&str, ConnParamError> {
        self.get(name)
            .ok_or_else(|| ConnParamError::Missing(name.to_string()))
    }

    /// Fetch and parse a required parameter
    pub fn parse<T: FromStr>(&self, name: &str) -> Result<T, ConnParamError> {
        let raw = self.require(name)?;
        raw.parse().map_err(|_| ConnParamError::Malformed {
            name: name.to_string(),
            value: raw.to_string(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
