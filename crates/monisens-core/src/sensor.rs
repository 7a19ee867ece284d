//! Sensor descriptors and the naming rules the host enforces on them
//!
//! Sensor and field names later become storage identifiers, so they are
//! restricted to ASCII letters, digits and underscores, may not start with a
//! digit, and must be unique within their scope.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Longest accepted sensor or field name, in bytes
pub const MAX_IDENT_LEN: usize = 63;

/// Data type of one telemetry field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorDataType {
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Timestamp,
    String,
    Json,
}

impl fmt::Display for SensorDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SensorDataType::Int16 => "int16",
            SensorDataType::Int32 => "int32",
            SensorDataType::Int64 => "int64",
            SensorDataType::Float32 => "float32",
            SensorDataType::Float64 => "float64",
            SensorDataType::Timestamp => "timestamp",
            SensorDataType::String => "string",
            SensorDataType::Json => "json",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFieldDescriptor {
    pub name: String,
    pub data_type: SensorDataType,
}

/// Shape of the readings one sensor reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorTypeDescriptor {
    pub name: String,
    pub fields: Vec<DataFieldDescriptor>,
}

impl SensorTypeDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Append a field, builder style
    pub fn with_field(mut self, name: impl Into<String>, data_type: SensorDataType) -> Self {
        self.fields.push(DataFieldDescriptor {
            name: name.into(),
            data_type,
        });
        self
    }

    pub fn field(&self, name: &str) -> Option<&DataFieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NamingIssue {
    #[error("sensor name '{0}' is not a valid identifier")]
    InvalidSensorName(String),
    #[error("sensor '{0}' is declared more than once")]
    DuplicateSensor(String),
    #[error("sensor '{0}' declares no fields")]
    NoFields(String),
    #[error("field name '{field}' of sensor '{sensor}' is not a valid identifier")]
    InvalidFieldName { sensor: String, field: String },
    #[error("field '{field}' is declared more than once in sensor '{sensor}'")]
    DuplicateField { sensor: String, field: String },
}

/// Every naming problem found in a descriptor list; never empty
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct NamingError {
    pub issues: Vec<NamingIssue>,
}

impl fmt::Display for NamingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} naming issue(s)", self.issues.len())?;
        for (i, issue) in self.issues.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{}{}", sep, issue)?;
        }
        Ok(())
    }
}

/// Check whether a name may be used as a sensor or field identifier
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };

    name.len() <= MAX_IDENT_LEN
        && (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validate names and uniqueness across all descriptors of one device
pub fn validate_descriptors(sensors: &[SensorTypeDescriptor]) -> Result<(), NamingError> {
    let mut issues = Vec::new();
    let mut sensor_names = HashSet::new();

    for sensor in sensors {
        if !is_identifier(&sensor.name) {
            issues.push(NamingIssue::InvalidSensorName(sensor.name.clone()));
        }
        if !sensor_names.insert(sensor.name.as_str()) {
            issues.push(NamingIssue::DuplicateSensor(sensor.name.clone()));
        }
        if sensor.fields.is_empty() {
            issues.push(NamingIssue::NoFields(sensor.name.clone()));
        }

        let mut field_names = HashSet::new();
        for field in &sensor.fields {
            if !is_identifier(&field.name) {
                issues.push(NamingIssue::InvalidFieldName {
                    sensor: sensor.name.clone(),
                    field: field.name.clone(),
                });
            }
            if !field_names.insert(field.name.as_str()) {
                issues.push(NamingIssue::DuplicateField {
                    sensor: sensor.name.clone(),
                    field: field.name.clone(),
                });
            }
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(NamingError { issues })
    }
}
