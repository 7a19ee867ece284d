//! Concrete configuration values answering a schema

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::schema::EntryId;

/// An inclusive `from..to` pair used by the range entry kinds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Span<T> {
    pub from: T,
    pub to: T,
}

impl<T> Span<T> {
    pub fn new(from: T, to: T) -> Self {
        Self { from, to }
    }
}

impl<T: fmt::Display> fmt::Display for Span<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.from, self.to)
    }
}

/// Typed payload of a configuration value
///
/// The variant must correspond to the kind of the schema entry it answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Payload {
    String(String),
    Int(i32),
    IntRange(Span<i32>),
    Float(f32),
    FloatRange(Span<f32>),
    Json(String),
    /// Index into the entry's choice list
    ChoiceList(usize),
}

/// Payload discriminant, used when reporting type mismatches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    String,
    Int,
    IntRange,
    Float,
    FloatRange,
    Json,
    ChoiceList,
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PayloadKind::String => "string",
            PayloadKind::Int => "int",
            PayloadKind::IntRange => "int range",
            PayloadKind::Float => "float",
            PayloadKind::FloatRange => "float range",
            PayloadKind::Json => "json",
            PayloadKind::ChoiceList => "choice",
        };
        f.write_str(s)
    }
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::String(_) => PayloadKind::String,
            Payload::Int(_) => PayloadKind::Int,
            Payload::IntRange(_) => PayloadKind::IntRange,
            Payload::Float(_) => PayloadKind::Float,
            Payload::FloatRange(_) => PayloadKind::FloatRange,
            Payload::Json(_) => PayloadKind::Json,
            Payload::ChoiceList(_) => PayloadKind::ChoiceList,
        }
    }
}

/// One answer to a schema entry, matched by id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigValue {
    pub id: EntryId,
    pub payload: Payload,
}

impl ConfigValue {
    pub fn new(id: EntryId, payload: Payload) -> Self {
        Self { id, payload }
    }
}

/// A validated answer set, in schema order, with defaults filled in
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings {
    values: Vec<ConfigValue>,
}

impl Settings {
    pub(crate) fn from_values(values: Vec<ConfigValue>) -> Self {
        Self { values }
    }

    /// Look up the payload for an entry id
    pub fn get(&self, id: EntryId) -> Option<&Payload> {
        self.values.iter().find(|v| v.id == id).map(|v| &v.payload)
    }

    pub fn int(&self, id: EntryId) -> Option<i32> {
        match self.get(id)? {
            Payload::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn float(&self, id: EntryId) -> Option<f32> {
        match self.get(id)? {
            Payload::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn string(&self, id: EntryId) -> Option<&str> {
        match self.get(id)? {
            Payload::String(v) | Payload::Json(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn choice(&self, id: EntryId) -> Option<usize> {
        match self.get(id)? {
            Payload::ChoiceList(v) => Some(*v),
            _ => None,
        }
    }

    pub fn float_range(&self, id: EntryId) -> Option<Span<f32>> {
        match self.get(id)? {
            Payload::FloatRange(v) => Some(*v),
            _ => None,
        }
    }

    pub fn int_range(&self, id: EntryId) -> Option<Span<i32>> {
        match self.get(id)? {
            Payload::IntRange(v) => Some(*v),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigValue> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[ConfigValue] {
        &self.values
    }

    pub fn into_values(self) -> Vec<ConfigValue> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_json_shape() {
        let value = ConfigValue::new(3, Payload::IntRange(Span::new(10, 20)));
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": 3, "payload": {"type": "int_range", "value": {"from": 10, "to": 20}}})
        );
    }

    #[test]
    fn test_settings_typed_getters() {
        let settings = Settings::from_values(vec![
            ConfigValue::new(1, Payload::Int(5)),
            ConfigValue::new(2, Payload::String("probe".to_string())),
            ConfigValue::new(3, Payload::ChoiceList(1)),
        ]);
        assert_eq!(settings.int(1), Some(5));
        assert_eq!(settings.string(2), Some("probe"));
        assert_eq!(settings.choice(3), Some(1));
        assert_eq!(settings.int(2), None);
        assert!(settings.get(9).is_none());
    }
}
