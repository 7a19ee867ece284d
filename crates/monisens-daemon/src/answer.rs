//! Turning configuration file tables into typed answers
//!
//! TOML values carry no schema, so each one is interpreted through the entry
//! it answers. Only the shape is decided here; the validator applies the
//! entry's constraints afterwards.

use monisens_core::{ConfigValue, EntryKind, EntryRules, Payload, Schema, SchemaEntry, Span};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DraftError {
    #[error("'{0}' is not a parameter of this device")]
    UnknownName(String),
    #[error("settings key '{0}' is not an entry id")]
    BadKey(String),
    #[error("entry {0} is not part of the device configuration")]
    UnknownId(i32),
    #[error("'{0}' is a section and takes no value")]
    Section(String),
    #[error("'{name}' expects {expected}: {detail}")]
    Shape {
        name: String,
        expected: EntryKind,
        detail: String,
    },
}

/// Draft connection values from a name-keyed table
pub fn draft_connection(
    schema: &Schema,
    table: &BTreeMap<String, toml::Value>,
) -> Result<Vec<ConfigValue>, DraftError> {
    table
        .iter()
        .map(|(name, value)| {
            let entry = schema
                .fields()
                .find(|e| &e.name == name)
                .ok_or_else(|| DraftError::UnknownName(name.clone()))?;
            draft_value(entry, value)
        })
        .collect()
}

/// Draft configuration values from an id-keyed table
pub fn draft_settings(
    schema: &Schema,
    table: &BTreeMap<String, toml::Value>,
) -> Result<Vec<ConfigValue>, DraftError> {
    table
        .iter()
        .map(|(key, value)| {
            let id: i32 = key
                .trim()
                .parse()
                .map_err(|_| DraftError::BadKey(key.clone()))?;
            let entry = schema.entry(id).ok_or(DraftError::UnknownId(id))?;
            draft_value(entry, value)
        })
        .collect()
}

fn draft_value(entry: &SchemaEntry, value: &toml::Value) -> Result<ConfigValue, DraftError> {
    let Some(id) = entry.id else {
        return Err(DraftError::Section(entry.name.clone()));
    };
    let shape = |detail: &str| DraftError::Shape {
        name: entry.name.clone(),
        expected: entry.kind(),
        detail: detail.to_string(),
    };

    let payload = match &entry.rules {
        EntryRules::Section => return Err(DraftError::Section(entry.name.clone())),
        EntryRules::String(_) => match value {
            toml::Value::String(s) => Payload::String(s.clone()),
            _ => return Err(shape("a string")),
        },
        EntryRules::Int(_) => Payload::Int(as_i32(value).ok_or_else(|| shape("a 32-bit integer"))?),
        EntryRules::Float(_) => Payload::Float(as_f32(value).ok_or_else(|| shape("a number"))?),
        EntryRules::IntRange(_) => {
            let (from, to) = pair(value).ok_or_else(|| shape("[from, to]"))?;
            Payload::IntRange(Span::new(
                as_i32(from).ok_or_else(|| shape("integer bounds"))?,
                as_i32(to).ok_or_else(|| shape("integer bounds"))?,
            ))
        }
        EntryRules::FloatRange(_) => {
            let (from, to) = pair(value).ok_or_else(|| shape("[from, to]"))?;
            Payload::FloatRange(Span::new(
                as_f32(from).ok_or_else(|| shape("numeric bounds"))?,
                as_f32(to).ok_or_else(|| shape("numeric bounds"))?,
            ))
        }
        EntryRules::Json(_) => match value {
            toml::Value::String(s) => Payload::Json(s.clone()),
            // Inline tables are re-encoded as JSON text
            toml::Value::Table(_) | toml::Value::Array(_) => Payload::Json(
                serde_json::to_string(value).map_err(|e| shape(&e.to_string()))?,
            ),
            _ => return Err(shape("JSON text or a table")),
        },
        EntryRules::ChoiceList(rules) => match value {
            toml::Value::String(label) => Payload::ChoiceList(
                rules
                    .choices
                    .iter()
                    .position(|c| c == label)
                    .ok_or_else(|| shape(&format!("one of {:?}", rules.choices)))?,
            ),
            toml::Value::Integer(i) => {
                Payload::ChoiceList(usize::try_from(*i).map_err(|_| shape("a choice index"))?)
            }
            _ => return Err(shape("a choice label or index")),
        },
    };

    Ok(ConfigValue::new(id, payload))
}

fn as_i32(value: &toml::Value) -> Option<i32> {
    value.as_integer().and_then(|i| i32::try_from(i).ok())
}

fn as_f32(value: &toml::Value) -> Option<f32> {
    match value {
        toml::Value::Float(f) => Some(*f as f32),
        toml::Value::Integer(i) => Some(*i as f32),
        _ => None,
    }
}

fn pair(value: &toml::Value) -> Option<(&toml::Value, &toml::Value)> {
    match value.as_array()?.as_slice() {
        [from, to] => Some((from, to)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monisens_core::{
        ChoiceListRules, FloatRangeRules, IntRules, JsonRules, StringRules,
    };

    fn schema() -> Schema {
        Schema::new(vec![
            SchemaEntry::section("Link"),
            SchemaEntry::string(1, "host", StringRules::default()),
            SchemaEntry::int(2, "port", IntRules::default()),
            SchemaEntry::choice_list(3, "unit", ChoiceListRules::new(["celsius", "fahrenheit"])),
            SchemaEntry::float_range(4, "band", FloatRangeRules::new(-50.0, 150.0)),
            SchemaEntry::json(5, "calibration", JsonRules::default()),
        ])
    }

    fn table(text: &str) -> BTreeMap<String, toml::Value> {
        toml::from_str(text).unwrap()
    }

    #[test]
    fn test_connection_by_name() {
        let values = draft_connection(
            &schema(),
            &table(r#"host = "10.0.0.1"
port = 502
unit = "fahrenheit""#),
        )
        .unwrap();

        assert!(values.contains(&ConfigValue::new(1, Payload::String("10.0.0.1".into()))));
        assert!(values.contains(&ConfigValue::new(2, Payload::Int(502))));
        assert!(values.contains(&ConfigValue::new(3, Payload::ChoiceList(1))));
    }

    #[test]
    fn test_settings_by_id() {
        let values = draft_settings(
            &schema(),
            &table(r#"4 = [-5, 40.5]
5 = { probe_0 = 0.25 }"#),
        )
        .unwrap();

        assert_eq!(
            values[0],
            ConfigValue::new(4, Payload::FloatRange(Span::new(-5.0, 40.5)))
        );
        assert_eq!(
            values[1],
            ConfigValue::new(5, Payload::Json(r#"{"probe_0":0.25}"#.into()))
        );
    }

    #[test]
    fn test_shape_errors() {
        let schema = schema();
        assert_eq!(
            draft_connection(&schema, &table("speed = 3")),
            Err(DraftError::UnknownName("speed".into()))
        );
        assert_eq!(
            draft_connection(&schema, &table("Link = 3")),
            Err(DraftError::UnknownName("Link".into()))
        );
        assert_eq!(
            draft_settings(&schema, &table("x = 1")),
            Err(DraftError::BadKey("x".into()))
        );
        assert_eq!(
            draft_settings(&schema, &table("9 = 1")),
            Err(DraftError::UnknownId(9))
        );
        assert!(matches!(
            draft_connection(&schema, &table(r#"port = "502""#)),
            Err(DraftError::Shape { expected: EntryKind::Int, .. })
        ));
        assert!(matches!(
            draft_connection(&schema, &table(r#"unit = "kelvin""#)),
            Err(DraftError::Shape { expected: EntryKind::ChoiceList, .. })
        ));
        assert!(matches!(
            draft_settings(&schema, &table("4 = [1.0]")),
            Err(DraftError::Shape { .. })
        ));
    }
}
