//! Host-side lifecycle state machine for one module instance
//!
//! ```text
//! Created -> Initialized -> DeviceInfoObtained -> Connected -> ConfInfoObtained
//!   -> Configured -> SensorInfoObtained -> Running -> Stopped -> Destroyed
//! ```
//!
//! Any non-terminal state may fall into `Failed`, from which only `destroy`
//! is accepted. Result codes roll the session back rather than forward:
//! a failed connect stays in DeviceInfoObtained, a connection failure while
//! configuring or describing sensors returns to DeviceInfoObtained so the
//! host reconnects, and invalid parameters leave the state untouched.

use monisens_core::{
    validate, validate_descriptors, ConfigValue, ConnectionAnswer, Schema, SensorTypeDescriptor,
    Settings,
};
use std::fmt;
use std::path::Path;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::courier::{Lease, MessageHandler};
use crate::error::{ComError, SessionError};
use crate::module::{Module, ProtocolVersion};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Created,
    Initialized,
    DeviceInfoObtained,
    Connected,
    ConfInfoObtained,
    Configured,
    SensorInfoObtained,
    Running,
    Stopped,
    Destroyed,
    Failed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Created => "created",
            LifecycleState::Initialized => "initialized",
            LifecycleState::DeviceInfoObtained => "device_info_obtained",
            LifecycleState::Connected => "connected",
            LifecycleState::ConfInfoObtained => "conf_info_obtained",
            LifecycleState::Configured => "configured",
            LifecycleState::SensorInfoObtained => "sensor_info_obtained",
            LifecycleState::Running => "running",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Destroyed => "destroyed",
            LifecycleState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A module instance together with the state the host tracks for it
pub struct ModuleSession {
    id: Uuid,
    module: Box<dyn Module>,
    state: LifecycleState,
    version: Option<ProtocolVersion>,
    /// Whether the module's own `init` ran, so `destroy` has state to release
    initialized: bool,
    conn_schema: Option<Schema>,
    conf_schema: Option<Schema>,
    sensors: Option<Vec<SensorTypeDescriptor>>,
    lease: Option<Lease>,
}

impl fmt::Debug for ModuleSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("version", &self.version)
            .finish()
    }
}

impl ModuleSession {
    pub fn new(module: Box<dyn Module>) -> Self {
        Self {
            id: Uuid::new_v4(),
            module,
            state: LifecycleState::Created,
            version: None,
            initialized: false,
            conn_schema: None,
            conf_schema: None,
            sensors: None,
            lease: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn version(&self) -> Option<ProtocolVersion> {
        self.version
    }

    pub fn connection_schema(&self) -> Option<&Schema> {
        self.conn_schema.as_ref()
    }

    pub fn device_schema(&self) -> Option<&Schema> {
        self.conf_schema.as_ref()
    }

    pub fn sensors(&self) -> Option<&[SensorTypeDescriptor]> {
        self.sensors.as_deref()
    }

    /// Check the module's protocol revision and let it set up its state
    pub fn init(&mut self, data_dir: &Path) -> Result<(), SessionError> {
        self.require_state("init", &[LifecycleState::Created])?;

        let version = match ProtocolVersion::try_from(self.module.version()) {
            Ok(version) => version,
            Err(e) => return Err(self.fail(e)),
        };

        self.module.init(data_dir);
        self.initialized = true;
        self.version = Some(version);
        self.transition(LifecycleState::Initialized);
        info!(
            session = %self.id,
            version = version.as_u8(),
            data_dir = %data_dir.display(),
            "Module initialized"
        );
        Ok(())
    }

    /// Obtain the connection parameter schema
    ///
    /// Repeated calls before connecting return the schema already obtained.
    pub fn obtain_device_info(&mut self) -> Result<&Schema, SessionError> {
        if self.state == LifecycleState::DeviceInfoObtained && self.conn_schema.is_some() {
            return self.cached(&self.conn_schema, "obtain_device_info");
        }
        self.require_state("obtain_device_info", &[LifecycleState::Initialized])?;

        let schema = self.module.obtain_device_info();
        // Connection answers reach the module keyed by name
        if let Err(e) = schema.check().and_then(|()| schema.check_unique_names()) {
            return Err(self.fail(e));
        }
        let version = self.version.unwrap_or(ProtocolVersion::V2);
        if let Err(e) = version.check_connection_schema(&schema) {
            return Err(self.fail(e));
        }

        debug!(session = %self.id, entries = schema.len(), "Obtained connection schema");
        self.transition(LifecycleState::DeviceInfoObtained);
        Ok(&*self.conn_schema.insert(schema))
    }

    /// Validate a connection draft and hand the encoded answer to the module
    ///
    /// Validation failures never reach the module. On any failure the session
    /// stays in DeviceInfoObtained.
    pub fn connect_device(&mut self, draft: &[ConfigValue]) -> Result<(), SessionError> {
        self.require_state("connect_device", &[LifecycleState::DeviceInfoObtained])?;

        let schema = self.conn_schema.as_ref().ok_or(SessionError::IllegalCall {
            op: "connect_device",
            state: self.state,
        })?;
        let settings = validate(schema, draft)?;
        let answer = ConnectionAnswer::from_settings(schema, &settings);

        match self.module.connect_device(&answer) {
            Ok(()) => {
                self.transition(LifecycleState::Connected);
                info!(session = %self.id, "Device connected");
                Ok(())
            }
            Err(e) => {
                warn!(session = %self.id, error = %e, "Device connection failed");
                Err(e.into())
            }
        }
    }

    /// Obtain the device configuration schema
    pub fn obtain_device_conf_info(&mut self) -> Result<&Schema, SessionError> {
        if self.state == LifecycleState::ConfInfoObtained && self.conf_schema.is_some() {
            return self.cached(&self.conf_schema, "obtain_device_conf_info");
        }
        self.require_state("obtain_device_conf_info", &[LifecycleState::Connected])?;

        let schema = self.module.obtain_device_conf_info();
        if let Err(e) = schema.check() {
            return Err(self.fail(e));
        }

        debug!(session = %self.id, entries = schema.len(), "Obtained configuration schema");
        self.transition(LifecycleState::ConfInfoObtained);
        Ok(&*self.conf_schema.insert(schema))
    }

    /// Validate a configuration answer and apply it
    ///
    /// Returns the normalized settings handed to the module.
    pub fn configure_device(&mut self, answer: &[ConfigValue]) -> Result<Settings, SessionError> {
        self.require_state("configure_device", &[LifecycleState::ConfInfoObtained])?;

        let schema = self.conf_schema.as_ref().ok_or(SessionError::IllegalCall {
            op: "configure_device",
            state: self.state,
        })?;
        let settings = validate(schema, answer)?;

        match self.module.configure_device(&settings) {
            Ok(()) => {
                self.transition(LifecycleState::Configured);
                info!(session = %self.id, values = settings.len(), "Device configured");
                Ok(settings)
            }
            Err(ComError::ConnectionFailed) => {
                warn!(session = %self.id, "Connection lost while configuring, reconnect required");
                self.back_to_reconnect();
                Err(ComError::ConnectionFailed.into())
            }
            Err(e) => {
                warn!(session = %self.id, error = %e, "Configuration rejected by device");
                Err(e.into())
            }
        }
    }

    /// Obtain and check the sensor descriptors
    ///
    /// A naming violation is fatal for the session.
    pub fn obtain_sensor_type_infos(&mut self) -> Result<&[SensorTypeDescriptor], SessionError> {
        if self.state == LifecycleState::SensorInfoObtained && self.sensors.is_some() {
            return self
                .cached(&self.sensors, "obtain_sensor_type_infos")
                .map(Vec::as_slice);
        }
        self.require_state("obtain_sensor_type_infos", &[LifecycleState::Configured])?;

        let sensors = match self.module.obtain_sensor_type_infos() {
            Ok(sensors) => sensors,
            Err(e) => {
                warn!(session = %self.id, "Connection lost while describing sensors, reconnect required");
                self.back_to_reconnect();
                return Err(ComError::from(e).into());
            }
        };

        if let Err(e) = validate_descriptors(&sensors) {
            return Err(self.fail(e));
        }

        info!(session = %self.id, sensors = sensors.len(), "Obtained sensor descriptors");
        self.transition(LifecycleState::SensorInfoObtained);
        Ok(self.sensors.insert(sensors).as_slice())
    }

    /// Lend `handler` to the module and start acquisition
    pub fn start<H: MessageHandler + 'static>(&mut self, handler: H) -> Result<(), SessionError> {
        self.require_state("start", &[LifecycleState::SensorInfoObtained])?;

        let (lease, courier) = Lease::new(Box::new(handler));
        match self.module.start(courier) {
            Ok(()) => {
                self.lease = Some(lease);
                self.transition(LifecycleState::Running);
                info!(session = %self.id, "Module started");
                Ok(())
            }
            Err(e) => {
                lease.revoke();
                warn!(session = %self.id, error = %e, "Module failed to start");
                Err(e.into())
            }
        }
    }

    /// Stop acquisition and take the handler back
    ///
    /// When this returns, the handler has been released and will not be
    /// invoked again, whatever the module reported.
    pub fn stop(&mut self) -> Result<(), SessionError> {
        self.require_state("stop", &[LifecycleState::Running])?;

        let result = self.module.stop();
        if let Some(lease) = self.lease.take() {
            lease.revoke();
        }

        match result {
            Ok(()) => {
                self.transition(LifecycleState::Stopped);
                info!(session = %self.id, "Module stopped");
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Release the module's private state
    pub fn destroy(&mut self) -> Result<(), SessionError> {
        if matches!(
            self.state,
            LifecycleState::Running | LifecycleState::Destroyed
        ) {
            return Err(SessionError::IllegalCall {
                op: "destroy",
                state: self.state,
            });
        }

        if self.initialized {
            self.module.destroy();
            self.initialized = false;
        }
        self.conn_schema = None;
        self.conf_schema = None;
        self.sensors = None;
        self.transition(LifecycleState::Destroyed);
        debug!(session = %self.id, "Module destroyed");
        Ok(())
    }

    fn cached<'a, T>(
        &self,
        slot: &'a Option<T>,
        op: &'static str,
    ) -> Result<&'a T, SessionError> {
        slot.as_ref().ok_or(SessionError::IllegalCall {
            op,
            state: self.state,
        })
    }

    fn require_state(
        &self,
        op: &'static str,
        allowed: &[LifecycleState],
    ) -> Result<(), SessionError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SessionError::IllegalCall {
                op,
                state: self.state,
            })
        }
    }

    fn transition(&mut self, next: LifecycleState) {
        debug!(session = %self.id, from = %self.state, to = %next, "Lifecycle transition");
        self.state = next;
    }

    fn back_to_reconnect(&mut self) {
        self.conf_schema = None;
        self.sensors = None;
        self.transition(LifecycleState::DeviceInfoObtained);
    }

    fn fail(&mut self, err: impl Into<SessionError>) -> SessionError {
        let err = err.into();
        error!(session = %self.id, state = %self.state, error = %err, "Module session failed");
        self.transition(LifecycleState::Failed);
        err
    }
}

impl Drop for ModuleSession {
    fn drop(&mut self) {
        if self.state == LifecycleState::Running {
            if let Err(e) = self.stop() {
                warn!(session = %self.id, error = %e, "Stop on drop failed");
            }
        }
        if self.state != LifecycleState::Destroyed {
            let _ = self.destroy();
        }
    }
}
