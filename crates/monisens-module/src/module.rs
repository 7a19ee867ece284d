//! The module contract

use monisens_core::{
    ConnectionAnswer, EntryKind, Schema, SensorTypeDescriptor, Settings,
};
use std::path::Path;

use crate::courier::Courier;
use crate::error::{ComError, ConnectionFailed, ModuleError, RunError};

/// Protocol revision implemented by this crate
pub const PROTOCOL_VERSION: u8 = 2;

/// Protocol revisions the host knows how to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProtocolVersion {
    /// Connection parameters limited to string, int, float and choice entries
    V1,
    /// Full schema model for connection parameters
    V2,
}

impl ProtocolVersion {
    pub fn as_u8(self) -> u8 {
        match self {
            ProtocolVersion::V1 => 1,
            ProtocolVersion::V2 => 2,
        }
    }

    /// Whether a connection schema of this revision may use an entry kind
    pub fn allows_connection_entry(self, kind: EntryKind) -> bool {
        match self {
            ProtocolVersion::V1 => matches!(
                kind,
                EntryKind::String | EntryKind::Int | EntryKind::Float | EntryKind::ChoiceList
            ),
            ProtocolVersion::V2 => true,
        }
    }

    /// Reject connection schemas that use kinds this revision does not know
    pub fn check_connection_schema(self, schema: &Schema) -> Result<(), ModuleError> {
        match schema
            .iter()
            .find(|e| !self.allows_connection_entry(e.kind()))
        {
            Some(entry) => Err(ModuleError::UnsupportedEntry {
                version: self.as_u8(),
                name: entry.name.clone(),
                kind: entry.kind(),
            }),
            None => Ok(()),
        }
    }
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = ModuleError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ProtocolVersion::V1),
            2 => Ok(ProtocolVersion::V2),
            other => Err(ModuleError::InvalidVersion(other)),
        }
    }
}

/// A device driver plugged into the host
///
/// The host calls these methods one at a time, in lifecycle order, through a
/// [`ModuleSession`](crate::ModuleSession). Each call may block on device
/// I/O. Only the [`Courier`] handed to `start` is used from other threads.
pub trait Module: Send {
    /// Protocol revision this module implements
    fn version(&self) -> u8 {
        PROTOCOL_VERSION
    }

    /// Set up private state; `data_dir` is writable and persists across runs
    fn init(&mut self, data_dir: &Path);

    /// Describe the connection parameters
    fn obtain_device_info(&mut self) -> Schema;

    /// Open a channel to the device
    ///
    /// What the module learns here may shape the configuration schema.
    fn connect_device(&mut self, answer: &ConnectionAnswer) -> Result<(), ComError>;

    /// Describe the device configuration
    fn obtain_device_conf_info(&mut self) -> Schema;

    /// Apply a validated configuration; every required entry has a value
    fn configure_device(&mut self, settings: &Settings) -> Result<(), ComError>;

    /// Describe the telemetry the configured device produces
    fn obtain_sensor_type_infos(&mut self) -> Result<Vec<SensorTypeDescriptor>, ConnectionFailed>;

    /// Begin acquisition, delivering messages through `courier`
    fn start(&mut self, courier: Courier) -> Result<(), RunError>;

    /// End acquisition
    ///
    /// On return no further deliveries may be in flight and the courier
    /// must have been dropped.
    fn stop(&mut self) -> Result<(), RunError>;

    /// Release private state
    fn destroy(&mut self);
}
