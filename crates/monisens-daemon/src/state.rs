//! Application state shared by the host driver, the router and the API

use chrono::{DateTime, Utc};
use monisens_core::{LogMsg, Schema, SensorMsg, SensorTypeDescriptor};
use monisens_module::{LifecycleState, ModuleSession};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::config::Config;

/// Events fanned out to WebSocket clients
#[derive(Debug, Clone)]
pub enum HostEvent {
    Reading(SensorMsg),
    Log(LogMsg),
    State(LifecycleState),
}

/// What the API reports about the module session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub id: Option<Uuid>,
    pub device: String,
    pub module: String,
    pub state: LifecycleState,
    pub version: Option<u8>,
    pub last_error: Option<String>,
    #[serde(skip)]
    pub connection_schema: Option<Schema>,
    #[serde(skip)]
    pub device_schema: Option<Schema>,
    #[serde(skip)]
    pub sensors: Vec<SensorTypeDescriptor>,
}

impl SessionStatus {
    fn new(config: &Config) -> Self {
        Self {
            id: None,
            device: config.device.name.clone(),
            module: config.device.module.clone(),
            state: LifecycleState::Created,
            version: None,
            last_error: None,
            connection_schema: None,
            device_schema: None,
            sensors: Vec::new(),
        }
    }

    fn apply(&mut self, snapshot: SessionSnapshot) {
        self.id = Some(snapshot.id);
        self.state = snapshot.state;
        self.version = snapshot.version;
        self.connection_schema = snapshot.connection_schema;
        self.device_schema = snapshot.device_schema;
        self.sensors = snapshot.sensors;
    }
}

/// Owned copy of a session's observable state, taken after a lifecycle step
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub state: LifecycleState,
    pub version: Option<u8>,
    pub connection_schema: Option<Schema>,
    pub device_schema: Option<Schema>,
    pub sensors: Vec<SensorTypeDescriptor>,
}

impl SessionSnapshot {
    pub fn of(session: &ModuleSession) -> Self {
        Self {
            id: session.id(),
            state: session.state(),
            version: session.version().map(|v| v.as_u8()),
            connection_schema: session.connection_schema().cloned(),
            device_schema: session.device_schema().cloned(),
            sensors: session.sensors().map(<[_]>::to_vec).unwrap_or_default(),
        }
    }
}

/// Latest accepted reading of one sensor
#[derive(Debug, Clone, Serialize)]
pub struct LatestReading {
    pub received_at: DateTime<Utc>,
    pub reading: SensorMsg,
}

/// Telemetry counters
#[derive(Debug, Default)]
pub struct Counters {
    pub accepted: AtomicU64,
    pub rejected: AtomicU64,
    pub logs: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub accepted: u64,
    pub rejected: u64,
    pub logs: u64,
}

impl Counters {
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            logs: self.logs.load(Ordering::Relaxed),
        }
    }
}

/// Shared application state
pub struct AppState {
    /// Configuration
    pub config: Config,
    /// Session snapshot, refreshed by the host after every step
    pub status: RwLock<SessionStatus>,
    /// Latest reading per sensor
    pub readings: RwLock<BTreeMap<String, LatestReading>>,
    pub counters: Counters,
    /// Event broadcast for WebSocket clients
    pub events: broadcast::Sender<HostEvent>,
}

impl AppState {
    pub fn new(config: Config) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            status: RwLock::new(SessionStatus::new(&config)),
            config,
            readings: RwLock::new(BTreeMap::new()),
            counters: Counters::default(),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    /// Publish a session snapshot, announcing state changes
    pub async fn publish_session(&self, snapshot: SessionSnapshot) {
        let mut status = self.status.write().await;
        let before = status.state;
        status.apply(snapshot);
        if status.state != before {
            let _ = self.events.send(HostEvent::State(status.state));
        }
    }

    pub async fn set_error(&self, error: Option<String>) {
        self.status.write().await.last_error = error;
    }

    pub async fn record_reading(&self, reading: SensorMsg) {
        self.readings.write().await.insert(
            reading.sensor.clone(),
            LatestReading {
                received_at: Utc::now(),
                reading,
            },
        );
    }

    pub async fn clear_readings(&self) {
        self.readings.write().await.clear();
    }

    pub async fn latest_readings(&self) -> Vec<LatestReading> {
        self.readings.read().await.values().cloned().collect()
    }
}
