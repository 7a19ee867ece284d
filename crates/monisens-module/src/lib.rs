//! MoniSens Module - The contract between the host and device modules
//!
//! This crate provides:
//! - The [`Module`] trait a device driver implements
//! - [`ModuleSession`], the host-side lifecycle state machine that enforces
//!   call order, validates answers before they reach the module and applies
//!   the rollback rules of each result code
//! - [`Courier`], the revocable telemetry channel lent to a running module
//! - A simulated thermometer module used by tests and demos

pub mod courier;
pub mod error;
pub mod module;
pub mod session;
pub mod sim;

pub use courier::{Courier, MessageHandler};
pub use error::{ComError, ConnectionFailed, ModuleError, RunError, SessionError};
pub use module::{Module, ProtocolVersion, PROTOCOL_VERSION};
pub use session::{LifecycleState, ModuleSession};
pub use sim::SimThermometer;
