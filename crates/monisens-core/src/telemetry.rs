//! Telemetry and log messages emitted by a running module
//!
//! A [`SensorCatalog`] built from the published descriptors decides whether a
//! sensor message conforms to the shape declared for its sensor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

use crate::sensor::{SensorDataType, SensorTypeDescriptor};

/// One typed reading value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SensorValue {
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Timestamp(DateTime<Utc>),
    String(String),
    Json(String),
}

impl SensorValue {
    pub fn data_type(&self) -> SensorDataType {
        match self {
            SensorValue::Int16(_) => SensorDataType::Int16,
            SensorValue::Int32(_) => SensorDataType::Int32,
            SensorValue::Int64(_) => SensorDataType::Int64,
            SensorValue::Float32(_) => SensorDataType::Float32,
            SensorValue::Float64(_) => SensorDataType::Float64,
            SensorValue::Timestamp(_) => SensorDataType::Timestamp,
            SensorValue::String(_) => SensorDataType::String,
            SensorValue::Json(_) => SensorDataType::Json,
        }
    }
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorValue::Int16(v) => write!(f, "{}", v),
            SensorValue::Int32(v) => write!(f, "{}", v),
            SensorValue::Int64(v) => write!(f, "{}", v),
            SensorValue::Float32(v) => write!(f, "{}", v),
            SensorValue::Float64(v) => write!(f, "{}", v),
            SensorValue::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
            SensorValue::String(v) | SensorValue::Json(v) => f.write_str(v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorField {
    pub name: String,
    pub value: SensorValue,
}

/// All values of one reading from one sensor, in field order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorMsg {
    pub sensor: String,
    pub data: Vec<SensorField>,
}

impl SensorMsg {
    pub fn new(sensor: impl Into<String>) -> Self {
        Self {
            sensor: sensor.into(),
            data: Vec::new(),
        }
    }

    /// Append a field value, builder style
    pub fn with(mut self, name: impl Into<String>, value: SensorValue) -> Self {
        self.data.push(SensorField {
            name: name.into(),
            value,
        });
        self
    }

    pub fn value(&self, name: &str) -> Option<&SensorValue> {
        self.data.iter().find(|f| f.name == name).map(|f| &f.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMsg {
    pub level: LogLevel,
    pub text: String,
}

/// A message from a running module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    Sensor(SensorMsg),
    Log(LogMsg),
}

impl Message {
    pub fn log(level: LogLevel, text: impl Into<String>) -> Self {
        Message::Log(LogMsg {
            level,
            text: text.into(),
        })
    }
}

impl From<SensorMsg> for Message {
    fn from(msg: SensorMsg) -> Self {
        Message::Sensor(msg)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("unknown sensor '{0}'")]
    UnknownSensor(String),
    #[error("reading from sensor '{0}' carries no values")]
    EmptyReading(String),
    #[error("sensor '{sensor}' has no field '{field}'")]
    UnknownField { sensor: String, field: String },
    #[error("field '{field}' of sensor '{sensor}' appears more than once")]
    DuplicateField { sensor: String, field: String },
    #[error("field '{field}' of sensor '{sensor}' is {expected}, got {found}")]
    TypeMismatch {
        sensor: String,
        field: String,
        expected: SensorDataType,
        found: SensorDataType,
    },
    #[error("field '{field}' of sensor '{sensor}' is not valid JSON")]
    InvalidJson { sensor: String, field: String },
}

/// Published sensor descriptors, indexed for conformance checks
#[derive(Debug, Clone, Default)]
pub struct SensorCatalog {
    sensors: HashMap<String, SensorTypeDescriptor>,
}

impl SensorCatalog {
    pub fn new(descriptors: &[SensorTypeDescriptor]) -> Self {
        Self {
            sensors: descriptors
                .iter()
                .map(|d| (d.name.clone(), d.clone()))
                .collect(),
        }
    }

    pub fn get(&self, sensor: &str) -> Option<&SensorTypeDescriptor> {
        self.sensors.get(sensor)
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Check a reading against its sensor's descriptor
    ///
    /// A reading may carry a subset of the declared fields, but at least one,
    /// and every carried value must have the declared type.
    pub fn check(&self, msg: &SensorMsg) -> Result<(), ProtocolViolation> {
        let descriptor = self
            .sensors
            .get(&msg.sensor)
            .ok_or_else(|| ProtocolViolation::UnknownSensor(msg.sensor.clone()))?;

        if msg.data.is_empty() {
            return Err(ProtocolViolation::EmptyReading(msg.sensor.clone()));
        }

        let mut seen = HashSet::with_capacity(msg.data.len());
        for field in &msg.data {
            let declared =
                descriptor
                    .field(&field.name)
                    .ok_or_else(|| ProtocolViolation::UnknownField {
                        sensor: msg.sensor.clone(),
                        field: field.name.clone(),
                    })?;

            if !seen.insert(field.name.as_str()) {
                return Err(ProtocolViolation::DuplicateField {
                    sensor: msg.sensor.clone(),
                    field: field.name.clone(),
                });
            }

            let found = field.value.data_type();
            if found != declared.data_type {
                return Err(ProtocolViolation::TypeMismatch {
                    sensor: msg.sensor.clone(),
                    field: field.name.clone(),
                    expected: declared.data_type,
                    found,
                });
            }

            if let SensorValue::Json(text) = &field.value {
                if serde_json::from_str::<serde_json::Value>(text).is_err() {
                    return Err(ProtocolViolation::InvalidJson {
                        sensor: msg.sensor.clone(),
                        field: field.name.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}
