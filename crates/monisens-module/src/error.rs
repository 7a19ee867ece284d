//! Result codes of module calls and errors raised by the host-side session

use monisens_core::{EntryKind, NamingError, SchemaError, ValidationError};
use thiserror::Error;

use crate::session::LifecycleState;

/// Failure code of `connect_device` and `configure_device`
///
/// Both codes are recoverable: a connection failure by redoing the previous
/// stage, invalid parameters by correcting the answer.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComError {
    #[error("connection to the device failed")]
    ConnectionFailed,
    #[error("the device rejected the parameters")]
    InvalidParameters,
}

/// Failure code of `obtain_sensor_type_infos`
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("connection to the device failed")]
pub struct ConnectionFailed;

impl From<ConnectionFailed> for ComError {
    fn from(_: ConnectionFailed) -> Self {
        ComError::ConnectionFailed
    }
}

/// Failure of `start` or `stop`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    #[error("the module is already started")]
    AlreadyStarted,
    #[error("the module is not started")]
    NotStarted,
    #[error("device failure: {0}")]
    Device(String),
}

/// A module broke the contract in a way the host cannot correct
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModuleError {
    #[error("module protocol version {0} is not supported")]
    InvalidVersion(u8),
    #[error("module returned a malformed schema: {0}")]
    MalformedSchema(#[from] SchemaError),
    #[error("protocol version {version} does not allow {kind} entry '{name}' in connection parameters")]
    UnsupportedEntry {
        version: u8,
        name: String,
        kind: EntryKind,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("'{op}' is not allowed in state {state}")]
    IllegalCall {
        op: &'static str,
        state: LifecycleState,
    },
    #[error("invalid answer: {0}")]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Com(#[from] ComError),
    #[error("sensor descriptors rejected: {0}")]
    Naming(#[from] NamingError),
    #[error(transparent)]
    Module(#[from] ModuleError),
    #[error(transparent)]
    Run(#[from] RunError),
}

impl From<SchemaError> for SessionError {
    fn from(e: SchemaError) -> Self {
        SessionError::Module(ModuleError::MalformedSchema(e))
    }
}

impl SessionError {
    /// Whether the step can be retried, possibly after redoing an earlier stage
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::Validation(_) | SessionError::Com(_) | SessionError::Run(RunError::Device(_))
        )
    }
}
