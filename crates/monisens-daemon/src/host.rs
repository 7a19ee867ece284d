//! Drives one module session through its lifecycle
//!
//! Every lifecycle call may block on device I/O, so each one runs on the
//! blocking pool under a deadline. The session itself sits behind a mutex
//! that only those blocking steps lock; the API reads the snapshot each
//! step publishes instead.

use anyhow::Result;
use monisens_core::{Schema, SensorCatalog, SensorTypeDescriptor};
use monisens_module::{ComError, LifecycleState, Module, ModuleSession, SessionError};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::answer::{self, DraftError};
use crate::config::DeviceConfig;
use crate::router;
use crate::state::{AppState, SessionSnapshot};

const RETRY_BACKOFF: Duration = Duration::from_millis(250);

#[derive(Error, Debug)]
pub enum StepError {
    #[error("{step} did not finish within {secs}s")]
    Timeout { step: &'static str, secs: u64 },
    #[error("{step} aborted: {detail}")]
    Aborted { step: &'static str, detail: String },
    #[error("{step} failed: {source}")]
    Session {
        step: &'static str,
        #[source]
        source: SessionError,
    },
    #[error("answer table: {0}")]
    Draft(#[from] DraftError),
}

impl StepError {
    /// A lost or refused link; the session is back where a reconnect is legal
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            StepError::Session {
                source: SessionError::Com(ComError::ConnectionFailed),
                ..
            }
        )
    }
}

pub struct Host {
    session: Arc<Mutex<ModuleSession>>,
    state: Arc<AppState>,
    step_timeout: Duration,
    connect_attempts: u32,
    router: Mutex<Option<JoinHandle<()>>>,
}

impl Host {
    pub fn new(module: Box<dyn Module>, state: Arc<AppState>) -> Self {
        let daemon = &state.config.daemon;
        Self {
            session: Arc::new(Mutex::new(ModuleSession::new(module))),
            step_timeout: Duration::from_secs(daemon.step_timeout_secs),
            connect_attempts: daemon.connect_attempts.max(1),
            state,
            router: Mutex::new(None),
        }
    }

    /// Run one lifecycle call on the blocking pool and publish the outcome
    async fn step<T, F>(&self, step: &'static str, f: F) -> Result<T, StepError>
    where
        F: FnOnce(&mut ModuleSession) -> Result<T, SessionError> + Send + 'static,
        T: Send + 'static,
    {
        let session = self.session.clone();
        let task = tokio::task::spawn_blocking(move || {
            let mut session = session.lock().unwrap_or_else(PoisonError::into_inner);
            let result = f(&mut session);
            (result, SessionSnapshot::of(&session))
        });

        let (result, snapshot) = match timeout(self.step_timeout, task).await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => {
                let err = StepError::Aborted {
                    step,
                    detail: e.to_string(),
                };
                self.state.set_error(Some(err.to_string())).await;
                return Err(err);
            }
            Err(_) => {
                let err = StepError::Timeout {
                    step,
                    secs: self.step_timeout.as_secs(),
                };
                warn!(step, "Lifecycle step timed out");
                self.state.set_error(Some(err.to_string())).await;
                return Err(err);
            }
        };

        self.state.publish_session(snapshot).await;
        match result {
            Ok(value) => {
                self.state.set_error(None).await;
                Ok(value)
            }
            Err(source) => {
                let err = StepError::Session { step, source };
                self.state.set_error(Some(err.to_string())).await;
                Err(err)
            }
        }
    }

    /// Initialize the module and obtain its connection schema
    pub async fn begin(&self) -> Result<Schema, StepError> {
        let data_dir = self.state.config.device_data_dir();
        self.step("init", move |s| s.init(&data_dir)).await?;
        self.step("obtain_device_info", |s| s.obtain_device_info().cloned())
            .await
    }

    /// Connect with a name-keyed answer table, then obtain the configuration schema
    pub async fn connect(&self, table: &BTreeMap<String, toml::Value>) -> Result<Schema, StepError> {
        let conn_schema = self
            .step("obtain_device_info", |s| s.obtain_device_info().cloned())
            .await?;
        let draft = answer::draft_connection(&conn_schema, table)?;

        self.step("connect_device", move |s| s.connect_device(&draft))
            .await?;
        self.step("obtain_device_conf_info", |s| s.obtain_device_conf_info().cloned())
            .await
    }

    /// Apply an id-keyed settings table, then obtain the sensor descriptors
    pub async fn configure(
        &self,
        table: &BTreeMap<String, toml::Value>,
    ) -> Result<Vec<SensorTypeDescriptor>, StepError> {
        let conf_schema = self
            .step("obtain_device_conf_info", |s| s.obtain_device_conf_info().cloned())
            .await?;
        let settings = answer::draft_settings(&conf_schema, table)?;

        self.step("configure_device", move |s| s.configure_device(&settings))
            .await?;
        self.step("obtain_sensor_type_infos", |s| {
            s.obtain_sensor_type_infos().map(<[_]>::to_vec)
        })
        .await
    }

    /// Take the session from Created to SensorInfoObtained
    ///
    /// Connection losses are retried from the connect step, up to the
    /// configured number of attempts.
    pub async fn bring_up(&self, device: &DeviceConfig) -> Result<SensorCatalog> {
        info!(device = %device.name, module = %device.module, "Bringing up device");
        self.begin().await?;

        let mut attempt = 1;
        loop {
            let result = match self.connect(&device.connection).await {
                Ok(_) => self.configure(&device.settings).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(sensors) => {
                    info!(device = %device.name, sensors = sensors.len(), attempt, "Device ready");
                    return Ok(SensorCatalog::new(&sensors));
                }
                Err(e) if e.is_connection_loss() && attempt < self.connect_attempts => {
                    warn!(device = %device.name, attempt, error = %e, "Connection lost, retrying");
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Start acquisition with telemetry flowing into the router
    pub async fn start(&self, catalog: SensorCatalog) -> Result<(), StepError> {
        let (handler, rx) = router::channel();
        let task = tokio::spawn(router::run(rx, catalog, self.state.clone()));
        let result = self.step("start", move |s| s.start(handler)).await;
        // A refused start drops the handler, which ends the router on its own
        if result.is_ok() {
            *self.router.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
        }
        result
    }

    pub async fn current_state(&self) -> Result<LifecycleState, StepError> {
        self.step("state", |s| Ok(s.state())).await
    }

    /// Abandon the current session and put a fresh, uninitialized one in its place
    pub async fn interrupt(&self, fresh: Box<dyn Module>) -> Result<(), StepError> {
        self.step("interrupt", move |s| {
            if s.state() == LifecycleState::Running {
                if let Err(e) = s.stop() {
                    warn!(error = %e, "Module did not stop cleanly");
                }
            }
            if s.state() != LifecycleState::Destroyed {
                s.destroy()?;
            }
            *s = ModuleSession::new(fresh);
            Ok(())
        })
        .await?;

        self.drain_router().await;
        self.state.clear_readings().await;
        info!(device = %self.state.config.device.name, "Device setup interrupted");
        Ok(())
    }

    /// Stop if running, then destroy; waits for the router to drain
    pub async fn shutdown(&self) -> Result<()> {
        let state = self.current_state().await?;

        if state == LifecycleState::Running {
            if let Err(e) = self.step("stop", |s| s.stop()).await {
                warn!(error = %e, "Module did not stop cleanly");
            }
        }
        if state != LifecycleState::Destroyed {
            self.step("destroy", |s| s.destroy()).await?;
        }

        self.drain_router().await;
        info!("Device shut down");
        Ok(())
    }

    async fn drain_router(&self) {
        let router = self
            .router
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(router) = router {
            if let Err(e) = router.await {
                warn!(error = %e, "Telemetry router ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use monisens_core::{ConnectionAnswer, Schema, Settings};
    use monisens_module::{ConnectionFailed, Courier, RunError, SimThermometer};
    use std::path::Path;

    fn config(dir: &Path, host: &str) -> Config {
        let mut config = Config::default();
        config.daemon.data_dir = dir.to_path_buf();
        config.daemon.step_timeout_secs = 5;
        config
            .device
            .connection
            .insert("host".to_string(), toml::Value::String(host.to_string()));
        config
            .device
            .settings
            .insert("1".to_string(), toml::Value::Integer(10));
        config
    }

    #[tokio::test]
    async fn test_sim_bring_up_run_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(config(dir.path(), "10.0.0.5"));
        let host = Host::new(Box::new(SimThermometer::new()), state.clone());

        let catalog = host.bring_up(&state.config.device).await.unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(
            state.status.read().await.state,
            LifecycleState::SensorInfoObtained
        );

        host.start(catalog).await.unwrap();
        for _ in 0..100 {
            if state.counters.snapshot().accepted >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(state.counters.snapshot().accepted >= 3);
        assert_eq!(state.counters.snapshot().rejected, 0);

        host.shutdown().await.unwrap();
        assert_eq!(state.status.read().await.state, LifecycleState::Destroyed);
    }

    #[tokio::test]
    async fn test_lost_link_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(config(dir.path(), "flaky"));
        let host = Host::new(Box::new(SimThermometer::new()), state.clone());

        host.bring_up(&state.config.device).await.unwrap();
        assert!(state.status.read().await.last_error.is_none());
        host.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_gives_up_after_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path(), "unreachable");
        config.daemon.connect_attempts = 2;
        let state = AppState::new(config);
        let host = Host::new(Box::new(SimThermometer::new()), state.clone());

        assert!(host.bring_up(&state.config.device).await.is_err());
        let status = state.status.read().await.clone();
        assert_eq!(status.state, LifecycleState::DeviceInfoObtained);
        assert!(status.last_error.unwrap().contains("connect_device"));
        host.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_config_table_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path(), "10.0.0.5");
        config
            .device
            .connection
            .insert("baud".to_string(), toml::Value::Integer(9600));
        let state = AppState::new(config);
        let host = Host::new(Box::new(SimThermometer::new()), state.clone());

        let err = host.bring_up(&state.config.device).await.unwrap_err();
        assert!(err.to_string().contains("baud"));
    }

    #[tokio::test]
    async fn test_interrupt_replaces_session() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(config(dir.path(), "10.0.0.5"));
        let host = Host::new(Box::new(SimThermometer::new()), state.clone());

        let catalog = host.bring_up(&state.config.device).await.unwrap();
        host.start(catalog).await.unwrap();
        let first = state.status.read().await.id;

        host.interrupt(Box::new(SimThermometer::new())).await.unwrap();
        let status = state.status.read().await.clone();
        assert_eq!(status.state, LifecycleState::Created);
        assert_ne!(status.id, first);
        assert!(state.latest_readings().await.is_empty());

        // Setup can begin again on the fresh session
        let schema = host.begin().await.unwrap();
        assert!(schema.entry_by_name("host").is_some());
        host.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_interrupt_half_finished_setup() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(config(dir.path(), "10.0.0.5"));
        let host = Host::new(Box::new(SimThermometer::new()), state.clone());

        host.begin().await.unwrap();
        host.connect(&state.config.device.connection).await.unwrap();
        assert_eq!(
            state.status.read().await.state,
            LifecycleState::ConfInfoObtained
        );

        host.interrupt(Box::new(SimThermometer::new())).await.unwrap();
        assert_eq!(host.current_state().await.unwrap(), LifecycleState::Created);
        assert!(state.status.read().await.device_schema.is_none());
    }

    /// Module whose init never returns in time
    struct Stalled;

    impl Module for Stalled {
        fn init(&mut self, _data_dir: &Path) {
            std::thread::sleep(Duration::from_millis(1500));
        }
        fn obtain_device_info(&mut self) -> Schema {
            Schema::default()
        }
        fn connect_device(&mut self, _answer: &ConnectionAnswer) -> Result<(), ComError> {
            Ok(())
        }
        fn obtain_device_conf_info(&mut self) -> Schema {
            Schema::default()
        }
        fn configure_device(&mut self, _settings: &Settings) -> Result<(), ComError> {
            Ok(())
        }
        fn obtain_sensor_type_infos(
            &mut self,
        ) -> Result<Vec<SensorTypeDescriptor>, ConnectionFailed> {
            Ok(Vec::new())
        }
        fn start(&mut self, _courier: Courier) -> Result<(), RunError> {
            Ok(())
        }
        fn stop(&mut self) -> Result<(), RunError> {
            Ok(())
        }
        fn destroy(&mut self) {}
    }

    #[tokio::test]
    async fn test_step_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path(), "10.0.0.5");
        config.daemon.step_timeout_secs = 1;
        let state = AppState::new(config);
        let host = Host::new(Box::new(Stalled), state.clone());

        let err = host.bring_up(&state.config.device).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StepError>(),
            Some(StepError::Timeout { step: "init", .. })
        ));
    }
}
