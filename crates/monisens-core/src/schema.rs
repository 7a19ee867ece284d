//! Self-describing configuration schemas
//!
//! A schema is an ordered, flat list of entries. Section entries carry no id
//! and no value; they group the entries that follow them until the next
//! section. The host re-assembles that order for display with
//! [`Schema::layout`].
//!
//! Every bound in the rule structs is optional: `None` means "no
//! constraint", never zero.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

use crate::validate::{check_payload, Patterns};
use crate::value::{Payload, Span};

/// Identifier of a value-carrying schema entry, unique within one schema
pub type EntryId = i32;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("entry '{0}' carries a value but has no id")]
    MissingId(String),
    #[error("section '{0}' must not have an id")]
    SectionWithId(String),
    #[error("duplicate entry id {0}")]
    DuplicateId(EntryId),
    #[error("duplicate entry name '{0}'")]
    DuplicateName(String),
    #[error("entry {0} has min greater than max")]
    InvertedBounds(EntryId),
    #[error("choice list {0} has no choices")]
    EmptyChoices(EntryId),
    #[error("entry {id} has an invalid pattern: {detail}")]
    InvalidPattern { id: EntryId, detail: String },
    #[error("entry {id} has a default that does not satisfy its own rules: {detail}")]
    InvalidDefault { id: EntryId, detail: String },
}

/// String entry constraints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StringRules {
    pub required: bool,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub min_len: Option<u32>,
    #[serde(default)]
    pub max_len: Option<u32>,
    /// Pattern the whole value must match
    #[serde(default)]
    pub match_regex: Option<String>,
}

/// Integer entry constraints (`value < lt`, `value > gt`, `value != neq`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntRules {
    pub required: bool,
    #[serde(default)]
    pub default: Option<i32>,
    #[serde(default)]
    pub lt: Option<i32>,
    #[serde(default)]
    pub gt: Option<i32>,
    #[serde(default)]
    pub neq: Option<i32>,
}

/// Integer pair constraints: `min <= from <= to <= max`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntRangeRules {
    pub required: bool,
    #[serde(default)]
    pub default: Option<Span<i32>>,
    pub min: i32,
    pub max: i32,
}

impl IntRangeRules {
    pub fn new(min: i32, max: i32) -> Self {
        Self {
            required: false,
            default: None,
            min,
            max,
        }
    }
}

/// Float entry constraints, same shape as [`IntRules`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FloatRules {
    pub required: bool,
    #[serde(default)]
    pub default: Option<f32>,
    #[serde(default)]
    pub lt: Option<f32>,
    #[serde(default)]
    pub gt: Option<f32>,
    #[serde(default)]
    pub neq: Option<f32>,
}

/// Float pair constraints, same shape as [`IntRangeRules`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloatRangeRules {
    pub required: bool,
    #[serde(default)]
    pub default: Option<Span<f32>>,
    pub min: f32,
    pub max: f32,
}

impl FloatRangeRules {
    pub fn new(min: f32, max: f32) -> Self {
        Self {
            required: false,
            default: None,
            min,
            max,
        }
    }
}

/// Free-form JSON text; only structural validity is checked
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JsonRules {
    pub required: bool,
    #[serde(default)]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChoiceListRules {
    pub required: bool,
    /// Index of the preselected choice
    #[serde(default)]
    pub default: Option<usize>,
    pub choices: Vec<String>,
}

impl ChoiceListRules {
    pub fn new<I, S>(choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: false,
            default: None,
            choices: choices.into_iter().map(Into::into).collect(),
        }
    }
}

/// Kind-specific rules of an entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryRules {
    Section,
    String(StringRules),
    Int(IntRules),
    IntRange(IntRangeRules),
    Float(FloatRules),
    FloatRange(FloatRangeRules),
    Json(JsonRules),
    ChoiceList(ChoiceListRules),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Section,
    String,
    Int,
    IntRange,
    Float,
    FloatRange,
    Json,
    ChoiceList,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntryKind::Section => "section",
            EntryKind::String => "string",
            EntryKind::Int => "int",
            EntryKind::IntRange => "int range",
            EntryKind::Float => "float",
            EntryKind::FloatRange => "float range",
            EntryKind::Json => "json",
            EntryKind::ChoiceList => "choice list",
        };
        f.write_str(s)
    }
}

/// One field, or a grouping section, of a schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaEntry {
    /// Absent for sections
    #[serde(default)]
    pub id: Option<EntryId>,
    pub name: String,
    pub rules: EntryRules,
}

impl SchemaEntry {
    pub fn section(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            rules: EntryRules::Section,
        }
    }

    pub fn string(id: EntryId, name: impl Into<String>, rules: StringRules) -> Self {
        Self::field(id, name, EntryRules::String(rules))
    }

    pub fn int(id: EntryId, name: impl Into<String>, rules: IntRules) -> Self {
        Self::field(id, name, EntryRules::Int(rules))
    }

    pub fn int_range(id: EntryId, name: impl Into<String>, rules: IntRangeRules) -> Self {
        Self::field(id, name, EntryRules::IntRange(rules))
    }

    pub fn float(id: EntryId, name: impl Into<String>, rules: FloatRules) -> Self {
        Self::field(id, name, EntryRules::Float(rules))
    }

    pub fn float_range(id: EntryId, name: impl Into<String>, rules: FloatRangeRules) -> Self {
        Self::field(id, name, EntryRules::FloatRange(rules))
    }

    pub fn json(id: EntryId, name: impl Into<String>, rules: JsonRules) -> Self {
        Self::field(id, name, EntryRules::Json(rules))
    }

    pub fn choice_list(id: EntryId, name: impl Into<String>, rules: ChoiceListRules) -> Self {
        Self::field(id, name, EntryRules::ChoiceList(rules))
    }

    fn field(id: EntryId, name: impl Into<String>, rules: EntryRules) -> Self {
        Self {
            id: Some(id),
            name: name.into(),
            rules,
        }
    }

    pub fn kind(&self) -> EntryKind {
        match self.rules {
            EntryRules::Section => EntryKind::Section,
            EntryRules::String(_) => EntryKind::String,
            EntryRules::Int(_) => EntryKind::Int,
            EntryRules::IntRange(_) => EntryKind::IntRange,
            EntryRules::Float(_) => EntryKind::Float,
            EntryRules::FloatRange(_) => EntryKind::FloatRange,
            EntryRules::Json(_) => EntryKind::Json,
            EntryRules::ChoiceList(_) => EntryKind::ChoiceList,
        }
    }

    pub fn is_section(&self) -> bool {
        matches!(self.rules, EntryRules::Section)
    }

    pub fn is_required(&self) -> bool {
        match &self.rules {
            EntryRules::Section => false,
            EntryRules::String(r) => r.required,
            EntryRules::Int(r) => r.required,
            EntryRules::IntRange(r) => r.required,
            EntryRules::Float(r) => r.required,
            EntryRules::FloatRange(r) => r.required,
            EntryRules::Json(r) => r.required,
            EntryRules::ChoiceList(r) => r.required,
        }
    }

    /// The entry's default, as the payload it would be answered with
    pub fn default_payload(&self) -> Option<Payload> {
        match &self.rules {
            EntryRules::Section => None,
            EntryRules::String(r) => r.default.clone().map(Payload::String),
            EntryRules::Int(r) => r.default.map(Payload::Int),
            EntryRules::IntRange(r) => r.default.map(Payload::IntRange),
            EntryRules::Float(r) => r.default.map(Payload::Float),
            EntryRules::FloatRange(r) => r.default.map(Payload::FloatRange),
            EntryRules::Json(r) => r.default.clone().map(Payload::Json),
            EntryRules::ChoiceList(r) => r.default.map(Payload::ChoiceList),
        }
    }
}

/// A run of entries displayed under one section heading
#[derive(Debug, Clone, PartialEq)]
pub struct Group<'a> {
    /// `None` for entries preceding the first section
    pub title: Option<&'a str>,
    pub entries: Vec<&'a SchemaEntry>,
}

/// Ordered description of configurable fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    entries: Vec<SchemaEntry>,
}

impl Schema {
    pub fn new(entries: Vec<SchemaEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[SchemaEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &SchemaEntry> {
        self.entries.iter()
    }

    /// Value-carrying entries, skipping sections
    pub fn fields(&self) -> impl Iterator<Item = &SchemaEntry> {
        self.entries.iter().filter(|e| !e.is_section())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, id: EntryId) -> Option<&SchemaEntry> {
        self.fields().find(|e| e.id == Some(id))
    }

    pub fn entry_by_name(&self, name: &str) -> Option<&SchemaEntry> {
        self.fields().find(|e| e.name == name)
    }

    pub fn required_ids(&self) -> Vec<EntryId> {
        self.fields()
            .filter(|e| e.is_required())
            .filter_map(|e| e.id)
            .collect()
    }

    /// Re-assemble the flat entry order into display groups
    pub fn layout(&self) -> Vec<Group<'_>> {
        let mut groups: Vec<Group<'_>> = Vec::new();

        for entry in &self.entries {
            if entry.is_section() {
                groups.push(Group {
                    title: Some(entry.name.as_str()),
                    entries: Vec::new(),
                });
                continue;
            }

            match groups.last_mut() {
                Some(group) => group.entries.push(entry),
                None => groups.push(Group {
                    title: None,
                    entries: vec![entry],
                }),
            }
        }

        groups
    }

    /// Check that the schema is well-formed before it is shown or used to validate
    pub fn check(&self) -> Result<(), SchemaError> {
        let mut seen = HashSet::new();
        let mut patterns = Patterns::default();

        for entry in &self.entries {
            let id = match (entry.is_section(), entry.id) {
                (true, None) => continue,
                (true, Some(_)) => return Err(SchemaError::SectionWithId(entry.name.clone())),
                (false, None) => return Err(SchemaError::MissingId(entry.name.clone())),
                (false, Some(id)) => id,
            };

            if !seen.insert(id) {
                return Err(SchemaError::DuplicateId(id));
            }

            match &entry.rules {
                EntryRules::IntRange(r) if r.min > r.max => {
                    return Err(SchemaError::InvertedBounds(id));
                }
                EntryRules::FloatRange(r) if r.min.is_nan() || r.max.is_nan() || r.min > r.max => {
                    return Err(SchemaError::InvertedBounds(id));
                }
                EntryRules::String(StringRules {
                    min_len: Some(min),
                    max_len: Some(max),
                    ..
                }) if min > max => {
                    return Err(SchemaError::InvertedBounds(id));
                }
                EntryRules::ChoiceList(r) if r.choices.is_empty() => {
                    return Err(SchemaError::EmptyChoices(id));
                }
                _ => {}
            }

            if let EntryRules::String(StringRules {
                match_regex: Some(pattern),
                ..
            }) = &entry.rules
            {
                if let Err(e) = regex::Regex::new(pattern) {
                    return Err(SchemaError::InvalidPattern {
                        id,
                        detail: e.to_string(),
                    });
                }
            }

            if let Some(default) = entry.default_payload() {
                if let Err(detail) = check_payload(entry, &default, &mut patterns) {
                    return Err(SchemaError::InvalidDefault { id, detail });
                }
            }
        }

        Ok(())
    }

    /// Reject fields sharing a name, for schemas whose answers are keyed by name
    pub fn check_unique_names(&self) -> Result<(), SchemaError> {
        let mut seen = HashSet::new();
        match self.fields().find(|e| !seen.insert(e.name.as_str())) {
            Some(entry) => Err(SchemaError::DuplicateName(entry.name.clone())),
            None => Ok(()),
        }
    }
}

impl FromIterator<SchemaEntry> for Schema {
    fn from_iter<I: IntoIterator<Item = SchemaEntry>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Schema {
        Schema::new(vec![
            SchemaEntry::string(
                1,
                "label",
                StringRules {
                    required: true,
                    ..Default::default()
                },
            ),
            SchemaEntry::section("Sampling"),
            SchemaEntry::int(
                2,
                "interval_ms",
                IntRules {
                    default: Some(1000),
                    gt: Some(0),
                    ..Default::default()
                },
            ),
            SchemaEntry::section("Alarm"),
            SchemaEntry::float_range(3, "band", FloatRangeRules::new(-50.0, 150.0)),
        ])
    }

    #[test]
    fn test_layout_groups_by_section() {
        let schema = sample();
        let groups = schema.layout();

        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].title, None);
        assert_eq!(groups[0].entries[0].name, "label");
        assert_eq!(groups[1].title, Some("Sampling"));
        assert_eq!(groups[1].entries.len(), 1);
        assert_eq!(groups[2].title, Some("Alarm"));
    }

    #[test]
    fn test_lookup_and_required() {
        let schema = sample();
        assert_eq!(schema.entry(2).map(|e| e.kind()), Some(EntryKind::Int));
        assert_eq!(schema.entry_by_name("band").and_then(|e| e.id), Some(3));
        assert_eq!(schema.required_ids(), vec![1]);
        assert_eq!(schema.fields().count(), 3);
    }

    #[test]
    fn test_check_accepts_well_formed() {
        assert_eq!(sample().check(), Ok(()));
    }

    #[test]
    fn test_check_rejects_duplicate_id() {
        let schema = Schema::new(vec![
            SchemaEntry::int(1, "a", IntRules::default()),
            SchemaEntry::json(1, "b", JsonRules::default()),
        ]);
        assert_eq!(schema.check(), Err(SchemaError::DuplicateId(1)));
    }

    #[test]
    fn test_unique_names() {
        assert_eq!(sample().check_unique_names(), Ok(()));

        let schema = Schema::new(vec![
            SchemaEntry::int(
                1,
                "port",
                IntRules {
                    required: true,
                    ..Default::default()
                },
            ),
            SchemaEntry::section("port"),
            SchemaEntry::int(
                2,
                "port",
                IntRules {
                    required: true,
                    ..Default::default()
                },
            ),
        ]);
        assert_eq!(schema.check(), Ok(()));
        assert_eq!(
            schema.check_unique_names(),
            Err(SchemaError::DuplicateName("port".to_string()))
        );
    }

    #[test]
    fn test_check_rejects_bad_defaults_and_bounds() {
        let inverted = Schema::new(vec![SchemaEntry::int_range(
            4,
            "window",
            IntRangeRules::new(10, 0),
        )]);
        assert_eq!(inverted.check(), Err(SchemaError::InvertedBounds(4)));

        let mut choices = ChoiceListRules::new(["a", "b"]);
        choices.default = Some(2);
        let bad_default = Schema::new(vec![SchemaEntry::choice_list(5, "mode", choices)]);
        assert!(matches!(
            bad_default.check(),
            Err(SchemaError::InvalidDefault { id: 5, .. })
        ));

        let empty = Schema::new(vec![SchemaEntry::choice_list(
            6,
            "mode",
            ChoiceListRules::default(),
        )]);
        assert_eq!(empty.check(), Err(SchemaError::EmptyChoices(6)));
    }

    #[test]
    fn test_check_rejects_bad_pattern() {
        let schema = Schema::new(vec![SchemaEntry::string(
            7,
            "tag",
            StringRules {
                match_regex: Some("[unclosed".to_string()),
                ..Default::default()
            },
        )]);
        assert!(matches!(
            schema.check(),
            Err(SchemaError::InvalidPattern { id: 7, .. })
        ));
    }

    #[test]
    fn test_entry_json_roundtrip_shape() {
        let entry = SchemaEntry::section("Device");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["rules"]["kind"], "section");
        assert!(json["id"].is_null());

        let parsed: SchemaEntry = serde_json::from_value(serde_json::json!({
            "id": 2,
            "name": "port",
            "rules": {"kind": "int", "required": true, "gt": 0}
        }))
        .unwrap();
        assert_eq!(parsed.kind(), EntryKind::Int);
        assert!(parsed.is_required());
    }
}
