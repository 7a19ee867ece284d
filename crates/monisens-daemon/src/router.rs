//! Telemetry routing
//!
//! The handler lent to a running module only pushes into an unbounded queue.
//! Everything that may wait (locks, broadcast, logging) happens here, on the
//! async side, so a module's delivery never blocks on the host.

use monisens_core::{LogLevel, Message, SensorCatalog};
use monisens_module::MessageHandler;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::state::{AppState, HostEvent};

/// Handler lent to the module for the Running period
pub struct QueueHandler {
    tx: mpsc::UnboundedSender<Message>,
}

impl MessageHandler for QueueHandler {
    fn handle_msg(&self, msg: Message) {
        // The router only goes away after the lease is revoked
        let _ = self.tx.send(msg);
    }
}

/// Create the handler and the queue the router consumes
pub fn channel() -> (QueueHandler, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueHandler { tx }, rx)
}

/// Consume module messages until the handler has been dropped
pub async fn run(
    mut rx: mpsc::UnboundedReceiver<Message>,
    catalog: SensorCatalog,
    state: Arc<AppState>,
) {
    let device = state.config.device.name.clone();
    debug!(device = %device, sensors = catalog.len(), "Telemetry router started");

    while let Some(msg) = rx.recv().await {
        match msg {
            Message::Sensor(reading) => match catalog.check(&reading) {
                Ok(()) => {
                    state.counters.accepted.fetch_add(1, Ordering::Relaxed);
                    state.record_reading(reading.clone()).await;
                    let _ = state.events.send(HostEvent::Reading(reading));
                }
                Err(violation) => {
                    state.counters.rejected.fetch_add(1, Ordering::Relaxed);
                    warn!(device = %device, error = %violation, "Rejected non-conforming reading");
                }
            },
            Message::Log(log) => {
                state.counters.logs.fetch_add(1, Ordering::Relaxed);
                match log.level {
                    LogLevel::Info => info!(device = %device, "{}", log.text),
                    LogLevel::Warn => warn!(device = %device, "{}", log.text),
                    LogLevel::Error => error!(device = %device, "{}", log.text),
                }
                let _ = state.events.send(HostEvent::Log(log));
            }
        }
    }

    debug!(device = %device, "Telemetry router finished");
}
