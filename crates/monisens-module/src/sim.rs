//! Simulated multi-probe thermometer
//!
//! Behaves like a small networked device: the probe count given at connect
//! time shapes the configuration schema, the enabled probes shape the sensor
//! list, and a polling thread produces readings until stopped.
//!
//! Host names trigger scripted faults:
//! - `unreachable`: every connect fails with `ConnectionFailed`
//! - `flaky`: the first configure loses the link; reconnecting recovers it

use chrono::Utc;
use monisens_core::{
    ChoiceListRules, ConnectionAnswer, FloatRangeRules, IntRules, JsonRules, Schema, SchemaEntry,
    SensorDataType, SensorMsg, SensorTypeDescriptor, SensorValue, Settings, Span, StringRules,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::courier::Courier;
use crate::error::{ComError, ConnectionFailed, RunError};
use crate::module::Module;

pub const MAX_PROBES: i32 = 8;

const STATE_FILE: &str = "sim.json";
/// First configuration id of the per-probe switches
const PROBE_ID_BASE: i32 = 10;
/// A status reading is sent every this many polls
const STATUS_EVERY: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Celsius,
    Fahrenheit,
}

#[derive(Debug, Clone)]
struct Link {
    host: String,
    port: u16,
    unit: Unit,
    probes: usize,
}

/// Applied configuration, also persisted to the data directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SimConfig {
    interval_ms: u64,
    alarm_low: f32,
    alarm_high: f32,
    label: String,
    /// Per-probe additive correction, keyed by sensor name
    calibration: HashMap<String, f32>,
    enabled: Vec<bool>,
}

struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Built-in module producing synthetic temperature readings
#[derive(Default)]
pub struct SimThermometer {
    data_dir: Option<PathBuf>,
    saved: Option<SimConfig>,
    link: Option<Link>,
    config: Option<SimConfig>,
    worker: Option<Worker>,
    /// Set once a `flaky` link has been dropped
    dropped_link: bool,
}

impl SimThermometer {
    pub fn new() -> Self {
        Self::default()
    }

    fn probe_name(index: usize) -> String {
        format!("probe_{}", index)
    }

    fn state_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join(STATE_FILE))
    }

    fn persist(&self, config: &SimConfig) {
        let Some(path) = self.state_path() else {
            return;
        };
        let result = serde_json::to_vec_pretty(config)
            .map_err(std::io::Error::other)
            .and_then(|bytes| std::fs::write(&path, bytes));
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "Failed to persist sim configuration");
        }
    }

    fn conf_schema(probes: usize, saved: Option<&SimConfig>) -> Schema {
        let mut band = FloatRangeRules::new(-50.0, 150.0);
        band.default = Some(
            saved
                .map(|s| Span::new(s.alarm_low, s.alarm_high))
                .unwrap_or(Span::new(-10.0, 40.0)),
        );

        let mut entries = vec![
            SchemaEntry::section("Acquisition"),
            SchemaEntry::int(
                1,
                "interval_ms",
                IntRules {
                    default: Some(saved.map_or(1000, |s| {
                        i32::try_from(s.interval_ms).unwrap_or(i32::MAX)
                    })),
                    gt: Some(9),
                    lt: Some(60_001),
                    ..Default::default()
                },
            ),
            SchemaEntry::float_range(2, "alarm_band", band),
            SchemaEntry::section("Metadata"),
            SchemaEntry::string(
                3,
                "label",
                StringRules {
                    default: Some(saved.map_or_else(|| "sim".to_string(), |s| s.label.clone())),
                    max_len: Some(32),
                    match_regex: Some("[A-Za-z0-9_ -]*".to_string()),
                    ..Default::default()
                },
            ),
            SchemaEntry::json(
                4,
                "calibration",
                JsonRules {
                    required: false,
                    default: Some("{}".to_string()),
                },
            ),
            SchemaEntry::section("Probes"),
        ];

        for i in 0..probes {
            let mut rules = ChoiceListRules::new(["on", "off"]);
            rules.default = Some(0);
            entries.push(SchemaEntry::choice_list(
                PROBE_ID_BASE + i as i32,
                Self::probe_name(i),
                rules,
            ));
        }

        Schema::new(entries)
    }

    fn halt_worker(&mut self) -> Result<(), RunError> {
        let worker = self.worker.take().ok_or(RunError::NotStarted)?;
        worker.stop.store(true, Ordering::SeqCst);
        worker
            .handle
            .join()
            .map_err(|_| RunError::Device("acquisition thread panicked".to_string()))
    }
}

impl Module for SimThermometer {
    fn init(&mut self, data_dir: &Path) {
        if let Err(e) = std::fs::create_dir_all(data_dir) {
            warn!(path = %data_dir.display(), error = %e, "Data directory unavailable");
        }
        self.data_dir = Some(data_dir.to_path_buf());

        let path = data_dir.join(STATE_FILE);
        self.saved = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Ignoring unreadable sim state");
                    None
                }
            },
            Err(_) => None,
        };
        debug!(restored = self.saved.is_some(), "Sim thermometer initialized");
    }

    fn obtain_device_info(&mut self) -> Schema {
        Schema::new(vec![
            SchemaEntry::section("Address"),
            SchemaEntry::string(
                1,
                "host",
                StringRules {
                    required: true,
                    min_len: Some(1),
                    max_len: Some(253),
                    ..Default::default()
                },
            ),
            SchemaEntry::int(
                2,
                "port",
                IntRules {
                    default: Some(502),
                    gt: Some(0),
                    lt: Some(65536),
                    ..Default::default()
                },
            ),
            SchemaEntry::section("Probes"),
            SchemaEntry::choice_list(3, "unit", {
                let mut rules = ChoiceListRules::new(["celsius", "fahrenheit"]);
                rules.default = Some(0);
                rules
            }),
            SchemaEntry::int(
                4,
                "probes",
                IntRules {
                    default: Some(2),
                    gt: Some(0),
                    lt: Some(MAX_PROBES + 1),
                    ..Default::default()
                },
            ),
        ])
    }

    fn connect_device(&mut self, answer: &ConnectionAnswer) -> Result<(), ComError> {
        let host = answer
            .require("host")
            .map_err(|_| ComError::InvalidParameters)?;
        let port: u16 = answer
            .parse("port")
            .map_err(|_| ComError::InvalidParameters)?;
        let unit = match answer.get("unit") {
            Some("fahrenheit") => Unit::Fahrenheit,
            Some("celsius") | None => Unit::Celsius,
            Some(_) => return Err(ComError::InvalidParameters),
        };
        let probes: usize = answer
            .parse("probes")
            .map_err(|_| ComError::InvalidParameters)?;

        if host == "unreachable" {
            self.link = None;
            return Err(ComError::ConnectionFailed);
        }

        info!(host, port, probes, "Sim thermometer connected");
        self.link = Some(Link {
            host: host.to_string(),
            port,
            unit,
            probes,
        });
        Ok(())
    }

    fn obtain_device_conf_info(&mut self) -> Schema {
        let probes = self.link.as_ref().map_or(0, |l| l.probes);
        let schema = Self::conf_schema(probes, self.saved.as_ref());
        match schema.check() {
            Ok(()) => schema,
            Err(e) => {
                // Restored values become defaults and must fit the rules
                warn!(error = %e, "Discarding saved sim configuration");
                self.saved = None;
                Self::conf_schema(probes, None)
            }
        }
    }

    fn configure_device(&mut self, settings: &Settings) -> Result<(), ComError> {
        let link = self.link.as_ref().ok_or(ComError::ConnectionFailed)?;
        if link.host == "flaky" && !self.dropped_link {
            warn!(host = %link.host, "Sim link dropped while configuring");
            self.dropped_link = true;
            self.link = None;
            return Err(ComError::ConnectionFailed);
        }
        let probes = link.probes;

        let interval_ms = settings.int(1).ok_or(ComError::InvalidParameters)?;
        let band = settings.float_range(2).ok_or(ComError::InvalidParameters)?;
        let label = settings.string(3).unwrap_or("sim").to_string();
        let calibration: HashMap<String, f32> = match settings.string(4) {
            Some(text) => serde_json::from_str(text).map_err(|_| ComError::InvalidParameters)?,
            None => HashMap::new(),
        };
        if let Some(unknown) = calibration
            .keys()
            .find(|k| !(0..probes).any(|i| **k == Self::probe_name(i)))
        {
            warn!(probe = %unknown, "Calibration names a probe the device does not have");
            return Err(ComError::InvalidParameters);
        }

        let enabled = (0..probes)
            .map(|i| settings.choice(PROBE_ID_BASE + i as i32) != Some(1))
            .collect();

        let config = SimConfig {
            interval_ms: interval_ms as u64,
            alarm_low: band.from,
            alarm_high: band.to,
            label,
            calibration,
            enabled,
        };
        self.persist(&config);
        self.saved = Some(config.clone());
        self.config = Some(config);
        Ok(())
    }

    fn obtain_sensor_type_infos(&mut self) -> Result<Vec<SensorTypeDescriptor>, ConnectionFailed> {
        if self.link.is_none() {
            return Err(ConnectionFailed);
        }
        let config = self.config.as_ref().ok_or(ConnectionFailed)?;

        let mut sensors: Vec<SensorTypeDescriptor> = config
            .enabled
            .iter()
            .enumerate()
            .filter(|(_, on)| **on)
            .map(|(i, _)| {
                SensorTypeDescriptor::new(Self::probe_name(i))
                    .with_field("temperature", SensorDataType::Float32)
                    .with_field("sampled_at", SensorDataType::Timestamp)
            })
            .collect();
        sensors.push(
            SensorTypeDescriptor::new("status")
                .with_field("uptime_s", SensorDataType::Int64)
                .with_field("note", SensorDataType::String),
        );
        Ok(sensors)
    }

    fn start(&mut self, courier: Courier) -> Result<(), RunError> {
        if self.worker.is_some() {
            return Err(RunError::AlreadyStarted);
        }
        let link = self
            .link
            .clone()
            .ok_or_else(|| RunError::Device("device not connected".to_string()))?;
        let config = self
            .config
            .clone()
            .ok_or_else(|| RunError::Device("device not configured".to_string()))?;

        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = std::thread::Builder::new()
            .name("sim-acquisition".to_string())
            .spawn(move || poll_loop(link, config, courier, flag))
            .map_err(|e| RunError::Device(e.to_string()))?;

        self.worker = Some(Worker { stop, handle });
        Ok(())
    }

    fn stop(&mut self) -> Result<(), RunError> {
        self.halt_worker()?;
        debug!("Sim acquisition stopped");
        Ok(())
    }

    fn destroy(&mut self) {
        if self.worker.is_some() {
            let _ = self.halt_worker();
        }
        self.link = None;
        self.config = None;
        self.saved = None;
    }
}

fn poll_loop(link: Link, config: SimConfig, courier: Courier, stop: Arc<AtomicBool>) {
    let started = Instant::now();
    let interval = Duration::from_millis(config.interval_ms);
    let mut tick: u64 = 0;

    courier.info(format!(
        "acquisition started on {}:{} ({})",
        link.host, link.port, config.label
    ));

    while !stop.load(Ordering::SeqCst) {
        let t = started.elapsed().as_secs_f32();

        for (i, _) in config.enabled.iter().enumerate().filter(|(_, on)| **on) {
            let name = SimThermometer::probe_name(i);
            let offset = config.calibration.get(&name).copied().unwrap_or(0.0);
            let celsius = 21.0 + 6.0 * (t / 30.0 + i as f32).sin() + offset;

            if celsius < config.alarm_low || celsius > config.alarm_high {
                courier.warn(format!("{} outside alarm band: {:.1} C", name, celsius));
            }

            let value = match link.unit {
                Unit::Celsius => celsius,
                Unit::Fahrenheit => celsius * 9.0 / 5.0 + 32.0,
            };
            let msg = SensorMsg::new(name)
                .with("temperature", SensorValue::Float32(value))
                .with("sampled_at", SensorValue::Timestamp(Utc::now()));
            if !courier.reading(msg) {
                return;
            }
        }

        if tick % STATUS_EVERY == 0 {
            courier.reading(
                SensorMsg::new("status")
                    .with("uptime_s", SensorValue::Int64(started.elapsed().as_secs() as i64))
                    .with("note", SensorValue::String(config.label.clone())),
            );
        }
        tick += 1;

        // Sleep in slices so a stop request is noticed promptly
        let deadline = Instant::now() + interval;
        while !stop.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(5)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monisens_core::{validate, ConfigValue, Payload};

    fn connected(probes: &str) -> SimThermometer {
        let mut sim = SimThermometer::new();
        let mut answer = ConnectionAnswer::new();
        answer.insert("host", "10.0.0.7");
        answer.insert("port", "502");
        answer.insert("unit", "celsius");
        answer.insert("probes", probes);
        sim.connect_device(&answer).unwrap();
        sim
    }

    #[test]
    fn test_schemas_are_well_formed() {
        let mut sim = connected("3");
        assert_eq!(sim.obtain_device_info().check(), Ok(()));

        let conf = sim.obtain_device_conf_info();
        assert_eq!(conf.check(), Ok(()));
        assert!(conf.entry_by_name("probe_2").is_some());
        assert!(conf.entry_by_name("probe_3").is_none());
    }

    #[test]
    fn test_unreachable_host() {
        let mut sim = SimThermometer::new();
        let mut answer = ConnectionAnswer::new();
        answer.insert("host", "unreachable");
        answer.insert("port", "502");
        answer.insert("probes", "1");
        assert_eq!(sim.connect_device(&answer), Err(ComError::ConnectionFailed));

        answer.insert("port", "not-a-port");
        assert_eq!(sim.connect_device(&answer), Err(ComError::InvalidParameters));
    }

    #[test]
    fn test_disabled_probe_is_not_described() {
        let mut sim = connected("2");
        let schema = sim.obtain_device_conf_info();
        let settings = validate(
            &schema,
            &[ConfigValue::new(PROBE_ID_BASE + 1, Payload::ChoiceList(1))],
        )
        .unwrap();
        sim.configure_device(&settings).unwrap();

        let names: Vec<String> = sim
            .obtain_sensor_type_infos()
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["probe_0", "status"]);
    }

    #[test]
    fn test_calibration_for_unknown_probe_rejected() {
        let mut sim = connected("1");
        let schema = sim.obtain_device_conf_info();
        let settings = validate(
            &schema,
            &[ConfigValue::new(4, Payload::Json(r#"{"probe_5": 0.5}"#.into()))],
        )
        .unwrap();
        assert_eq!(
            sim.configure_device(&settings),
            Err(ComError::InvalidParameters)
        );
    }

    #[test]
    fn test_configuration_restored_from_data_dir() {
        let dir = tempfile::tempdir().unwrap();

        let mut sim = SimThermometer::new();
        sim.init(dir.path());
        let mut answer = ConnectionAnswer::new();
        answer.insert("host", "10.0.0.7");
        answer.insert("port", "502");
        answer.insert("probes", "1");
        sim.connect_device(&answer).unwrap();
        let schema = sim.obtain_device_conf_info();
        let settings = validate(&schema, &[ConfigValue::new(1, Payload::Int(250))]).unwrap();
        sim.configure_device(&settings).unwrap();
        sim.destroy();

        let mut again = SimThermometer::new();
        again.init(dir.path());
        again.connect_device(&answer).unwrap();
        let schema = again.obtain_device_conf_info();
        assert_eq!(schema.entry(1).and_then(|e| e.default_payload()), Some(Payload::Int(250)));
    }

    #[test]
    fn test_out_of_range_saved_state_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(STATE_FILE),
            r#"{"interval_ms":5,"alarm_low":-10.0,"alarm_high":40.0,"label":"lab","calibration":{},"enabled":[true]}"#,
        )
        .unwrap();

        let mut sim = SimThermometer::new();
        sim.init(dir.path());
        let mut answer = ConnectionAnswer::new();
        answer.insert("host", "10.0.0.7");
        answer.insert("port", "502");
        answer.insert("probes", "1");
        sim.connect_device(&answer).unwrap();

        let schema = sim.obtain_device_conf_info();
        assert_eq!(schema.check(), Ok(()));
        assert_eq!(schema.entry(1).and_then(|e| e.default_payload()), Some(Payload::Int(1000)));
        assert_eq!(
            schema.entry(3).and_then(|e| e.default_payload()),
            Some(Payload::String("sim".into()))
        );
    }

    #[test]
    fn test_stop_without_start() {
        let mut sim = connected("1");
        assert_eq!(sim.stop(), Err(RunError::NotStarted));
    }
}
