//! Revocable telemetry delivery from a running module to the host
//!
//! The host lends a [`MessageHandler`] to the module for the Running period.
//! The module only ever sees a [`Courier`], which it may clone and use from
//! any thread. Revoking the lease takes the handler out of the shared slot
//! under the same lock every delivery holds, so revocation waits for an
//! in-flight delivery to finish and no delivery can begin afterwards.
//!
//! Deliveries are serialized by that lock, which gives every message from
//! one module a single total order. Handlers must therefore hand messages
//! off without blocking and must not call back into a courier.

use monisens_core::{LogLevel, Message, SensorMsg};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

/// Host-side receiver of module messages
pub trait MessageHandler: Send + Sync {
    fn handle_msg(&self, msg: Message);
}

impl<F> MessageHandler for F
where
    F: Fn(Message) + Send + Sync,
{
    fn handle_msg(&self, msg: Message) {
        self(msg)
    }
}

type Slot = Arc<Mutex<Option<Box<dyn MessageHandler>>>>;

fn lock(slot: &Slot) -> MutexGuard<'_, Option<Box<dyn MessageHandler>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Module-side sending half of the telemetry channel
#[derive(Clone)]
pub struct Courier {
    slot: Slot,
}

impl std::fmt::Debug for Courier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Courier")
            .field("open", &self.is_open())
            .finish()
    }
}

impl Courier {
    /// Deliver a message; returns `false` once the lease has been revoked
    pub fn send(&self, msg: impl Into<Message>) -> bool {
        let guard = lock(&self.slot);
        match guard.as_ref() {
            Some(handler) => {
                handler.handle_msg(msg.into());
                true
            }
            None => {
                trace!("Dropping message sent after revocation");
                false
            }
        }
    }

    pub fn reading(&self, msg: SensorMsg) -> bool {
        self.send(msg)
    }

    pub fn info(&self, text: impl Into<String>) -> bool {
        self.send(Message::log(LogLevel::Info, text))
    }

    pub fn warn(&self, text: impl Into<String>) -> bool {
        self.send(Message::log(LogLevel::Warn, text))
    }

    pub fn error(&self, text: impl Into<String>) -> bool {
        self.send(Message::log(LogLevel::Error, text))
    }

    pub fn is_open(&self) -> bool {
        lock(&self.slot).is_some()
    }
}

/// Host-side ownership of a lent handler
pub(crate) struct Lease {
    slot: Slot,
}

impl Lease {
    pub(crate) fn new(handler: Box<dyn MessageHandler>) -> (Self, Courier) {
        let slot: Slot = Arc::new(Mutex::new(Some(handler)));
        let courier = Courier { slot: slot.clone() };
        (Self { slot }, courier)
    }

    /// Close the channel and release the handler
    ///
    /// Blocks until any in-flight delivery has returned.
    pub(crate) fn revoke(self) {
        let handler = lock(&self.slot).take();
        if handler.is_some() {
            debug!("Telemetry handler revoked");
        }
        drop(handler);
    }
}
