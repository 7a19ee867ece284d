//! MoniSens Core - Data model shared by the host and device modules
//!
//! This crate provides the pure, I/O-free half of the module protocol:
//! - Self-describing configuration schemas and the values that answer them
//! - The validator that checks answers against a schema
//! - Flat connection answers handed to a module on connect
//! - Sensor descriptors with their identifier rules
//! - Telemetry messages and the per-sensor conformance check

pub mod conn;
pub mod schema;
pub mod sensor;
pub mod telemetry;
pub mod validate;
pub mod value;

pub use conn::{ConnParamError, ConnectionAnswer};
pub use schema::{
    ChoiceListRules, EntryId, EntryKind, EntryRules, FloatRangeRules, FloatRules, Group,
    IntRangeRules, IntRules, JsonRules, Schema, SchemaEntry, SchemaError, StringRules,
};
pub use sensor::{
    is_identifier, validate_descriptors, DataFieldDescriptor, NamingError, NamingIssue,
    SensorDataType, SensorTypeDescriptor,
};
pub use telemetry::{
    LogLevel, LogMsg, Message, ProtocolViolation, SensorCatalog, SensorField, SensorMsg,
    SensorValue,
};
pub use validate::{validate, ValidationError, Violation};
pub use value::{ConfigValue, Payload, PayloadKind, Settings, Span};
