use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

use crate::{
    api::factory::ConnectionMode,
    core::{dispatcher::RetryPolicy, error::MpsError},
    protocol::types::StationType,
};

/// Dispatcher timing, shared by all machines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    pub heartbeat_interval_ms: u64,
    pub retry_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub connect_timeout_ms: u64,
    /// Consecutive connection failures between two error-level log lines.
    pub escalate_after: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 5000,
            retry_delay_ms: 1000,
            poll_interval_ms: 100,
            connect_timeout_ms: 3000,
            escalate_after: 5,
        }
    }
}

impl TimingConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            escalate_after: self.escalate_after,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MockupConfig {
    /// Speed-up factor applied to every simulated operation.
    pub exec_speed: f32,
}

impl Default for MockupConfig {
    fn default() -> Self {
        Self { exec_speed: 1.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OpcuaConfig {
    pub subscription_interval_ms: u64,
    pub application_name: String,
}

impl Default for OpcuaConfig {
    fn default() -> Self {
        Self {
            subscription_interval_ms: 100,
            application_name: "rcll-refbox".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MqttConfig {
    pub topic_prefix: String,
    /// Delay between two publishes of one legacy instruction, in ms.
    pub publish_delay_ms: u64,
    pub keep_alive_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            topic_prefix: "MPS".to_string(),
            publish_delay_ms: 20,
            keep_alive_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpsConfig {
    pub hosts: Vec<String>,
    pub port: u16,
    pub machines_per_plc: usize,
    pub unit_id: u8,
    pub rfid_write_timeout_ms: u64,
}

impl Default for SpsConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            port: 502,
            machines_per_plc: crate::api::sps::SPS_NUM_MACHINES,
            unit_id: 1,
            rfid_write_timeout_ms: 1000,
        }
    }
}

/// One MPS as listed in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MachineConfig {
    pub name: String,
    pub station_type: StationType,
    pub host: String,
    pub port: u16,
    pub connection_mode: ConnectionMode,
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CommConfig {
    pub timing: TimingConfig,
    pub mockup: MockupConfig,
    pub opcua: OpcuaConfig,
    pub mqtt: MqttConfig,
    pub sps: SpsConfig,
    pub machines: Vec<MachineConfig>,
}

impl CommConfig {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML configuration")
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse JSON configuration")
    }

    /// Read a configuration file, choosing the format by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(&content)?,
            Some("toml") | None => Self::from_toml(&content)?,
            Some(other) => return Err(anyhow!("Unsupported config format: .{other}")),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    pub fn machine(&self, name: &str) -> Option<&MachineConfig> {
        self.machines.iter().find(|m| m.name == name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.mockup.exec_speed <= 0.0 {
            return Err(MpsError::invalid("mockup.exec_speed must be positive").into());
        }
        if self.sps.machines_per_plc == 0 {
            return Err(MpsError::invalid("sps.machines_per_plc must be at least 1").into());
        }
        for (i, machine) in self.machines.iter().enumerate() {
            if self.machines[..i].iter().any(|m| m.name == machine.name) {
                return Err(MpsError::invalid(format!(
                    "machine {} is configured twice",
                    machine.name
                ))
                .into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[timing]
heartbeat_interval_ms = 2000

[mockup]
exec_speed = 2.5

[sps]
hosts = ["192.168.2.17", "192.168.2.18"]
machines_per_plc = 8

[[machines]]
name = "C-BS"
station_type = "BS"
host = "192.168.2.27"
port = 4840
connection_mode = "plc"

[[machines]]
name = "M-RS1"
station_type = "RS"
host = "localhost"
port = 1883
connection_mode = "mqtt_legacy"
"#;

    #[test]
    fn test_parse_toml_with_defaults() {
        let config = CommConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.timing.heartbeat_interval_ms, 2000);
        assert_eq!(config.timing.retry_delay_ms, 1000);
        assert_eq!(config.mockup.exec_speed, 2.5);
        assert_eq!(config.mqtt.topic_prefix, "MPS");
        assert_eq!(config.sps.hosts.len(), 2);
        assert_eq!(config.sps.port, 502);
        assert_eq!(config.machines.len(), 2);

        let ring = config.machine("M-RS1").unwrap();
        assert_eq!(ring.station_type, StationType::Ring);
        assert_eq!(ring.connection_mode, ConnectionMode::MqttLegacy);
        config.validate().unwrap();
    }

    #[test]
    fn test_toml_roundtrip_and_json() {
        let config = CommConfig::from_toml(SAMPLE).unwrap();
        let text = config.to_toml().unwrap();
        assert_eq!(CommConfig::from_toml(&text).unwrap(), config);

        let json = r#"{"machines":[{"name":"C-DS","station_type":"DS","host":"127.0.0.1",
            "port":4840,"connection_mode":"mockup"}]}"#;
        let config = CommConfig::from_json(json).unwrap();
        assert_eq!(config.machines[0].connection_mode, ConnectionMode::Mockup);
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let mut config = CommConfig::from_toml(SAMPLE).unwrap();
        let duplicate = config.machines[0].clone();
        config.machines.push(duplicate);
        assert!(config.validate().is_err());
    }
}
