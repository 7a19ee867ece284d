//! Configuration loading

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub device: DeviceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Bind address for the status API
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Root of per-module data directories
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Upper bound on each blocking lifecycle step
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,
    /// Connect attempts before giving up, including reconnects after a lost link
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            data_dir: default_data_dir(),
            step_timeout_secs: default_step_timeout(),
            connect_attempts: default_connect_attempts(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8090".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_step_timeout() -> u64 {
    30
}

fn default_connect_attempts() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Display name, also used for the data directory
    #[serde(default = "default_device_name")]
    pub name: String,
    /// Built-in module key
    #[serde(default = "default_module")]
    pub module: String,
    /// Connection parameters by name
    #[serde(default)]
    pub connection: BTreeMap<String, toml::Value>,
    /// Configuration values by entry id
    #[serde(default)]
    pub settings: BTreeMap<String, toml::Value>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: default_device_name(),
            module: default_module(),
            connection: BTreeMap::new(),
            settings: BTreeMap::new(),
        }
    }
}

fn default_device_name() -> String {
    "device".to_string()
}

fn default_module() -> String {
    "sim".to_string()
}

impl Config {
    /// Private data directory of the configured device
    pub fn device_data_dir(&self) -> PathBuf {
        self.daemon.data_dir.join(&self.device.name)
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Save an example configuration for the simulated thermometer
pub fn save_default_config(path: &Path) -> Result<()> {
    let mut device = DeviceConfig {
        name: "bench-thermometer".to_string(),
        ..Default::default()
    };
    device
        .connection
        .insert("host".to_string(), toml::Value::String("192.168.1.40".to_string()));
    device
        .connection
        .insert("probes".to_string(), toml::Value::Integer(3));
    device
        .settings
        .insert("1".to_string(), toml::Value::Integer(500));
    device.settings.insert(
        "2".to_string(),
        toml::Value::Array(vec![toml::Value::Float(-5.0), toml::Value::Float(45.0)]),
    );

    let config = Config {
        daemon: DaemonConfig::default(),
        device,
    };

    let content = toml::to_string_pretty(&config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.daemon.bind, "127.0.0.1:8090");
        assert_eq!(config.daemon.connect_attempts, 3);
        assert_eq!(config.device.module, "sim");
    }

    #[test]
    fn test_parse_device_tables() {
        let config: Config = toml::from_str(
            r#"
            [daemon]
            step_timeout_secs = 5

            [device]
            name = "boiler"

            [device.connection]
            host = "10.0.0.9"
            port = 1502

            [device.settings]
            1 = 250
            2 = [0.0, 80.0]
            "#,
        )
        .unwrap();

        assert_eq!(config.daemon.step_timeout_secs, 5);
        assert_eq!(config.daemon.data_dir, PathBuf::from("./data"));
        assert_eq!(config.device.connection["port"].as_integer(), Some(1502));
        assert!(config.device.settings["2"].is_array());
        assert_eq!(config.device_data_dir(), PathBuf::from("./data/boiler"));
    }

    #[test]
    fn test_default_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monisens.toml");
        save_default_config(&path).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.device.name, "bench-thermometer");
        assert_eq!(config.device.connection.len(), 2);
    }
}
