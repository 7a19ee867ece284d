//! Answer validation against a schema
//!
//! Validation is total: every entry is checked and every violation is
//! collected, so a whole form can be corrected in one round-trip.

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

use crate::schema::{EntryId, EntryKind, EntryRules, Schema, SchemaEntry};
use crate::value::{ConfigValue, Payload, PayloadKind, Settings, Span};

/// A single problem found in an answer set
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Violation {
    #[error("entry {0} is required")]
    MissingRequired(EntryId),
    #[error("entry {id} expects a {expected} value, got {found}")]
    TypeMismatch {
        id: EntryId,
        expected: EntryKind,
        found: PayloadKind,
    },
    #[error("entry {id}: {detail}")]
    ConstraintViolation { id: EntryId, detail: String },
    #[error("entry {0} is not part of the schema")]
    UnknownEntry(EntryId),
    #[error("entry {0} is answered more than once")]
    DuplicateValue(EntryId),
}

impl Violation {
    pub fn id(&self) -> EntryId {
        match self {
            Violation::MissingRequired(id)
            | Violation::UnknownEntry(id)
            | Violation::DuplicateValue(id) => *id,
            Violation::TypeMismatch { id, .. } | Violation::ConstraintViolation { id, .. } => *id,
        }
    }
}

/// Every violation found in one answer set; never empty
#[derive(Error, Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

impl ValidationError {
    /// Ids of the failing fields, in report order without repeats
    pub fn ids(&self) -> Vec<EntryId> {
        let mut seen = HashSet::new();
        self.violations
            .iter()
            .map(Violation::id)
            .filter(|id| seen.insert(*id))
            .collect()
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} invalid field(s)", self.violations.len())?;
        for (i, v) in self.violations.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{}{}", sep, v)?;
        }
        Ok(())
    }
}

/// Anchored patterns, compiled at most once per pass over a schema
#[derive(Default)]
pub(crate) struct Patterns {
    compiled: HashMap<String, Result<Regex, String>>,
}

impl Patterns {
    fn anchored(&mut self, pattern: &str) -> Result<&Regex, &str> {
        if !self.compiled.contains_key(pattern) {
            let compiled =
                Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| e.to_string());
            self.compiled.insert(pattern.to_string(), compiled);
        }
        self.compiled[pattern].as_ref().map_err(String::as_str)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.compiled.len()
    }
}

/// Validate an answer set against a schema
///
/// Missing optional entries take the entry default when there is one, and
/// so do missing required entries; a required entry with neither an answer
/// nor a default is reported as [`Violation::MissingRequired`]. The returned
/// settings are in schema order and re-validate cleanly.
pub fn validate(schema: &Schema, answer: &[ConfigValue]) -> Result<Settings, ValidationError> {
    let mut violations = Vec::new();
    let mut supplied: HashMap<EntryId, &Payload> = HashMap::with_capacity(answer.len());
    let mut duplicated = HashSet::new();

    for value in answer {
        if schema.entry(value.id).is_none() {
            violations.push(Violation::UnknownEntry(value.id));
            continue;
        }
        if supplied.insert(value.id, &value.payload).is_some() && duplicated.insert(value.id) {
            violations.push(Violation::DuplicateValue(value.id));
        }
    }

    let mut values = Vec::with_capacity(schema.len());
    let mut patterns = Patterns::default();

    for entry in schema.fields() {
        let Some(id) = entry.id else {
            continue;
        };

        let payload = match supplied.get(&id) {
            Some(payload) => (*payload).clone(),
            None => match entry.default_payload() {
                Some(default) => default,
                None if entry.is_required() => {
                    violations.push(Violation::MissingRequired(id));
                    continue;
                }
                None => continue,
            },
        };

        if expected_payload(entry.kind()) != Some(payload.kind()) {
            violations.push(Violation::TypeMismatch {
                id,
                expected: entry.kind(),
                found: payload.kind(),
            });
            continue;
        }

        match check_payload(entry, &payload, &mut patterns) {
            Ok(()) => values.push(ConfigValue::new(id, payload)),
            Err(detail) => violations.push(Violation::ConstraintViolation { id, detail }),
        }
    }

    if violations.is_empty() {
        Ok(Settings::from_values(values))
    } else {
        Err(ValidationError { violations })
    }
}

fn expected_payload(kind: EntryKind) -> Option<PayloadKind> {
    match kind {
        EntryKind::Section => None,
        EntryKind::String => Some(PayloadKind::String),
        EntryKind::Int => Some(PayloadKind::Int),
        EntryKind::IntRange => Some(PayloadKind::IntRange),
        EntryKind::Float => Some(PayloadKind::Float),
        EntryKind::FloatRange => Some(PayloadKind::FloatRange),
        EntryKind::Json => Some(PayloadKind::Json),
        EntryKind::ChoiceList => Some(PayloadKind::ChoiceList),
    }
}

/// Check a payload against the bounds of its entry, joining every failed rule
pub(crate) fn check_payload(
    entry: &SchemaEntry,
    payload: &Payload,
    patterns: &mut Patterns,
) -> Result<(), String> {
    let mut failed: Vec<String> = Vec::new();

    match (&entry.rules, payload) {
        (EntryRules::String(rules), Payload::String(value)) => {
            let len = value.chars().count() as u64;
            if let Some(min) = rules.min_len {
                if len < u64::from(min) {
                    failed.push(format!("length {} is shorter than {}", len, min));
                }
            }
            if let Some(max) = rules.max_len {
                if len > u64::from(max) {
                    failed.push(format!("length {} is longer than {}", len, max));
                }
            }
            if let Some(pattern) = &rules.match_regex {
                match patterns.anchored(pattern) {
                    Ok(re) if re.is_match(value) => {}
                    Ok(_) => failed.push(format!("'{}' does not match '{}'", value, pattern)),
                    Err(e) => failed.push(format!("pattern '{}' is invalid: {}", pattern, e)),
                }
            }
        }
        (EntryRules::Int(rules), Payload::Int(value)) => {
            check_scalar(*value, rules.lt, rules.gt, rules.neq, &mut failed);
        }
        (EntryRules::Float(rules), Payload::Float(value)) => {
            if value.is_finite() {
                check_scalar(*value, rules.lt, rules.gt, rules.neq, &mut failed);
            } else {
                failed.push(format!("{} is not a finite number", value));
            }
        }
        (EntryRules::IntRange(rules), Payload::IntRange(span)) => {
            check_span(span, rules.min, rules.max, &mut failed);
        }
        (EntryRules::FloatRange(rules), Payload::FloatRange(span)) => {
            if span.from.is_finite() && span.to.is_finite() {
                check_span(span, rules.min, rules.max, &mut failed);
            } else {
                failed.push(format!("{} is not a finite range", span));
            }
        }
        (EntryRules::Json(_), Payload::Json(text)) => {
            if let Err(e) = serde_json::from_str::<serde_json::Value>(text) {
                failed.push(format!("invalid JSON: {}", e));
            }
        }
        (EntryRules::ChoiceList(rules), Payload::ChoiceList(index)) => {
            if *index >= rules.choices.len() {
                failed.push(format!(
                    "choice index {} is out of bounds for {} choices",
                    index,
                    rules.choices.len()
                ));
            }
        }
        (_, payload) => {
            failed.push(format!(
                "{} value does not fit a {} entry",
                payload.kind(),
                entry.kind()
            ));
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        Err(failed.join("; "))
    }
}

fn check_scalar<T>(value: T, lt: Option<T>, gt: Option<T>, neq: Option<T>, failed: &mut Vec<String>)
where
    T: PartialOrd + fmt::Display + Copy,
{
    if let Some(lt) = lt {
        if !(value < lt) {
            failed.push(format!("{} must be less than {}", value, lt));
        }
    }
    if let Some(gt) = gt {
        if !(value > gt) {
            failed.push(format!("{} must be greater than {}", value, gt));
        }
    }
    if let Some(neq) = neq {
        if value == neq {
            failed.push(format!("{} is not allowed", value));
        }
    }
}

fn check_span<T>(span: &Span<T>, min: T, max: T, failed: &mut Vec<String>)
where
    T: PartialOrd + fmt::Display + Copy,
{
    if span.from > span.to {
        failed.push(format!("from {} is greater than to {}", span.from, span.to));
    }
    if span.from < min {
        failed.push(format!("from {} is below the minimum {}", span.from, min));
    }
    if span.to > max {
        failed.push(format!("to {} is above the maximum {}", span.to, max));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{
        ChoiceListRules, FloatRangeRules, FloatRules, IntRangeRules, IntRules, JsonRules,
        StringRules,
    };

    fn required_range() -> Schema {
        let mut rules = IntRangeRules::new(0, 100);
        rules.required = true;
        Schema::new(vec![SchemaEntry::int_range(1, "window", rules)])
    }

    #[test]
    fn test_int_range_accepts_ordered_pair() {
        let schema = required_range();
        let answer = vec![ConfigValue::new(1, Payload::IntRange(Span::new(10, 20)))];
        let settings = validate(&schema, &answer).unwrap();
        assert_eq!(settings.int_range(1), Some(Span::new(10, 20)));
    }

    #[test]
    fn test_int_range_rejects_inverted_pair() {
        let schema = required_range();
        let answer = vec![ConfigValue::new(1, Payload::IntRange(Span::new(50, 10)))];
        let err = validate(&schema, &answer).unwrap_err();
        assert_eq!(err.violations.len(), 1);
        assert!(matches!(
            &err.violations[0],
            Violation::ConstraintViolation { id: 1, detail } if detail.contains("greater than")
        ));
    }

    #[test]
    fn test_choice_index_out_of_bounds() {
        let mut rules = ChoiceListRules::new(["A", "B"]);
        rules.required = true;
        let schema = Schema::new(vec![SchemaEntry::choice_list(2, "mode", rules)]);

        let err = validate(&schema, &[ConfigValue::new(2, Payload::ChoiceList(2))]).unwrap_err();
        assert!(matches!(
            err.violations[0],
            Violation::ConstraintViolation { id: 2, .. }
        ));

        assert!(validate(&schema, &[ConfigValue::new(2, Payload::ChoiceList(1))]).is_ok());
    }

    #[test]
    fn test_missing_required_without_default() {
        let schema = Schema::new(vec![SchemaEntry::string(
            4,
            "host",
            StringRules {
                required: true,
                ..Default::default()
            },
        )]);
        let err = validate(&schema, &[]).unwrap_err();
        assert_eq!(err.violations, vec![Violation::MissingRequired(4)]);
    }

    #[test]
    fn test_defaults_fill_missing_entries() {
        let schema = Schema::new(vec![
            SchemaEntry::section("Sampling"),
            SchemaEntry::int(
                1,
                "interval_ms",
                IntRules {
                    default: Some(250),
                    ..Default::default()
                },
            ),
            SchemaEntry::json(2, "extra", JsonRules::default()),
            SchemaEntry::string(
                3,
                "host",
                StringRules {
                    required: true,
                    default: Some("localhost".to_string()),
                    ..Default::default()
                },
            ),
        ]);

        let settings = validate(&schema, &[]).unwrap();
        assert_eq!(settings.len(), 2);
        assert_eq!(settings.int(1), Some(250));
        assert!(settings.get(2).is_none());
        assert_eq!(settings.string(3), Some("localhost"));
    }

    #[test]
    fn test_type_mismatch() {
        let schema = Schema::new(vec![SchemaEntry::int(1, "port", IntRules::default())]);
        let err = validate(
            &schema,
            &[ConfigValue::new(1, Payload::String("80".to_string()))],
        )
        .unwrap_err();
        assert_eq!(
            err.violations,
            vec![Violation::TypeMismatch {
                id: 1,
                expected: EntryKind::Int,
                found: PayloadKind::String,
            }]
        );
    }

    #[test]
    fn test_collects_every_violation() {
        let schema = Schema::new(vec![
            SchemaEntry::int(
                1,
                "port",
                IntRules {
                    required: true,
                    gt: Some(0),
                    lt: Some(65536),
                    ..Default::default()
                },
            ),
            SchemaEntry::string(
                2,
                "label",
                StringRules {
                    max_len: Some(4),
                    match_regex: Some("[a-z]+".to_string()),
                    ..Default::default()
                },
            ),
            SchemaEntry::json(
                3,
                "extra",
                JsonRules {
                    required: true,
                    default: None,
                },
            ),
        ]);

        let answer = vec![
            ConfigValue::new(1, Payload::Int(0)),
            ConfigValue::new(2, Payload::String("Probe-1".to_string())),
            ConfigValue::new(9, Payload::Int(1)),
        ];
        let err = validate(&schema, &answer).unwrap_err();

        assert_eq!(err.ids(), vec![9, 1, 2, 3]);
        assert!(err.violations.contains(&Violation::UnknownEntry(9)));
        assert!(err.violations.contains(&Violation::MissingRequired(3)));

        let label = err
            .violations
            .iter()
            .find(|v| v.id() == 2)
            .unwrap()
            .to_string();
        assert!(label.contains("longer than 4"));
        assert!(label.contains("does not match"));
    }

    #[test]
    fn test_duplicate_answers_rejected() {
        let schema = Schema::new(vec![SchemaEntry::int(1, "port", IntRules::default())]);
        let answer = vec![
            ConfigValue::new(1, Payload::Int(1)),
            ConfigValue::new(1, Payload::Int(2)),
            ConfigValue::new(1, Payload::Int(3)),
        ];
        let err = validate(&schema, &answer).unwrap_err();
        assert_eq!(err.violations, vec![Violation::DuplicateValue(1)]);
    }

    #[test]
    fn test_int_bounds_and_neq() {
        let schema = Schema::new(vec![SchemaEntry::int(
            1,
            "slave",
            IntRules {
                gt: Some(0),
                lt: Some(248),
                neq: Some(100),
                ..Default::default()
            },
        )]);

        for ok in [1, 99, 247] {
            assert!(validate(&schema, &[ConfigValue::new(1, Payload::Int(ok))]).is_ok());
        }
        for bad in [0, 100, 248] {
            assert!(validate(&schema, &[ConfigValue::new(1, Payload::Int(bad))]).is_err());
        }
    }

    #[test]
    fn test_float_rejects_nan_and_checks_range() {
        let schema = Schema::new(vec![
            SchemaEntry::float(
                1,
                "gain",
                FloatRules {
                    gt: Some(0.0),
                    ..Default::default()
                },
            ),
            SchemaEntry::float_range(2, "band", FloatRangeRules::new(-50.0, 150.0)),
        ]);

        let err = validate(
            &schema,
            &[
                ConfigValue::new(1, Payload::Float(f32::NAN)),
                ConfigValue::new(2, Payload::FloatRange(Span::new(-60.0, 20.0))),
            ],
        )
        .unwrap_err();
        assert_eq!(err.ids(), vec![1, 2]);

        let ok = validate(
            &schema,
            &[
                ConfigValue::new(1, Payload::Float(0.5)),
                ConfigValue::new(2, Payload::FloatRange(Span::new(-10.0, 40.0))),
            ],
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn test_json_structural_check() {
        let schema = Schema::new(vec![SchemaEntry::json(1, "calibration", JsonRules::default())]);
        assert!(validate(
            &schema,
            &[ConfigValue::new(1, Payload::Json(r#"{"offset": 0.5}"#.to_string()))]
        )
        .is_ok());
        assert!(validate(
            &schema,
            &[ConfigValue::new(1, Payload::Json("{offset".to_string()))]
        )
        .is_err());
    }

    #[test]
    fn test_pattern_must_match_whole_value() {
        let schema = Schema::new(vec![SchemaEntry::string(
            1,
            "tag",
            StringRules {
                match_regex: Some("[a-z]+".to_string()),
                ..Default::default()
            },
        )]);
        assert!(validate(&schema, &[ConfigValue::new(1, Payload::String("abc".into()))]).is_ok());
        assert!(validate(&schema, &[ConfigValue::new(1, Payload::String("abc1".into()))]).is_err());
    }

    #[test]
    fn test_shared_pattern_compiled_once() {
        let rules = StringRules {
            match_regex: Some("[a-z]+".to_string()),
            ..Default::default()
        };
        let first = SchemaEntry::string(1, "tag", rules.clone());
        let second = SchemaEntry::string(2, "zone", rules);

        let mut patterns = Patterns::default();
        for _ in 0..3 {
            assert!(check_payload(&first, &Payload::String("abc".into()), &mut patterns).is_ok());
            assert!(check_payload(&second, &Payload::String("ab1".into()), &mut patterns).is_err());
        }
        assert_eq!(patterns.len(), 1);
    }

    #[test]
    fn test_normalized_output_revalidates() {
        let schema = Schema::new(vec![
            SchemaEntry::int(
                1,
                "interval_ms",
                IntRules {
                    default: Some(1000),
                    gt: Some(0),
                    ..Default::default()
                },
            ),
            SchemaEntry::choice_list(2, "unit", {
                let mut r = ChoiceListRules::new(["celsius", "fahrenheit"]);
                r.default = Some(0);
                r
            }),
            SchemaEntry::string(
                3,
                "label",
                StringRules {
                    required: true,
                    ..Default::default()
                },
            ),
        ]);

        let first = validate(
            &schema,
            &[ConfigValue::new(3, Payload::String("north".to_string()))],
        )
        .unwrap();
        let second = validate(&schema, first.as_slice()).unwrap();
        assert_eq!(first, second);
        assert_eq!(second.len(), 3);
    }
}
