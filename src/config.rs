//! Configuration schema and loader. Grounded in
//! `original_source/rctmon/config.py`, expressed as `serde`-deserializable
//! structs loaded from YAML per spec.md §6.

use std::fs;
use std::path::Path;

use secrecy::Secret;
use serde::Deserialize;
use thiserror::Error;

fn default_device_port() -> u16 {
    8899
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

fn default_prometheus_bind_port() -> u16 {
    9831
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_client_name() -> String {
    "rctmon".to_string()
}

fn default_mqtt_flush_interval() -> u64 {
    30
}

fn default_mqtt_topic_prefix() -> String {
    "rctmon".to_string()
}

#[derive(Debug, Deserialize)]
pub struct DeviceConfig {
    pub host: String,
    #[serde(default = "default_device_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct PrometheusConfig {
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default = "default_false")]
    pub exposition: bool,
    pub bind_address: String,
    #[serde(default = "default_prometheus_bind_port")]
    pub bind_port: u16,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self { enable: true, exposition: false, bind_address: "127.0.0.1".to_string(), bind_port: default_prometheus_bind_port() }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct InfluxDbConfig {
    #[serde(default = "default_false")]
    pub enable: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub token: Option<Secret<String>>,
    #[serde(default)]
    pub org: Option<String>,
    #[serde(default)]
    pub bucket: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_false")]
    pub enable: bool,
    #[serde(default)]
    pub mqtt_host: Option<String>,
    #[serde(default = "default_mqtt_port")]
    pub mqtt_port: u16,
    #[serde(default = "default_mqtt_client_name")]
    pub client_name: String,
    #[serde(default = "default_mqtt_flush_interval")]
    pub flush_interval_seconds: u64,
    #[serde(default = "default_mqtt_topic_prefix")]
    pub topic_prefix: String,
    #[serde(default = "default_true")]
    pub mqtt_retain: bool,
    #[serde(default)]
    pub auth_user: Option<String>,
    #[serde(default)]
    pub auth_pass: Option<Secret<String>>,
    #[serde(default = "default_false")]
    pub tls_enable: bool,
    #[serde(default = "default_false")]
    pub tls_insecure: bool,
    #[serde(default)]
    pub tls_ca_cert: Option<String>,
    #[serde(default)]
    pub tls_certfile: Option<String>,
    #[serde(default)]
    pub tls_keyfile: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enable: false,
            mqtt_host: None,
            mqtt_port: default_mqtt_port(),
            client_name: default_mqtt_client_name(),
            flush_interval_seconds: default_mqtt_flush_interval(),
            topic_prefix: default_mqtt_topic_prefix(),
            mqtt_retain: true,
            auth_user: None,
            auth_pass: None,
            tls_enable: false,
            tls_insecure: false,
            tls_ca_cert: None,
            tls_certfile: None,
            tls_keyfile: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RctMonConfig {
    pub device: DeviceConfig,
    #[serde(default)]
    pub prometheus: PrometheusConfig,
    #[serde(default)]
    pub influxdb: InfluxDbConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: String, #[source] source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: String, #[source] source: serde_yaml::Error },
    #[error("prometheus.exposition requires prometheus.enable")]
    ExpositionWithoutEnable,
}

impl RctMonConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let text = fs::read_to_string(path_ref)
            .map_err(|source| ConfigError::Read { path: path_ref.display().to_string(), source })?;
        let mut config: RctMonConfig = serde_yaml::from_str(&text)
            .map_err(|source| ConfigError::Parse { path: path_ref.display().to_string(), source })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&mut self) -> Result<(), ConfigError> {
        // exposition=true implies enable=true, per config.py's PrometheusConfig.
        if self.prometheus.exposition {
            self.prometheus.enable = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_documented_defaults() {
        let yaml = "device:\n  host: 10.0.0.5\nprometheus:\n  bind_address: 0.0.0.0\n";
        let config: RctMonConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.device.port, 8899);
        assert!(config.prometheus.enable);
        assert!(!config.prometheus.exposition);
        assert_eq!(config.prometheus.bind_port, 9831);
        assert!(!config.influxdb.enable);
        assert!(!config.mqtt.enable);
        assert_eq!(config.mqtt.mqtt_port, 1883);
        assert_eq!(config.mqtt.client_name, "rctmon");
        assert!(config.mqtt.mqtt_retain);
    }

    #[test]
    fn exposition_implies_enable() {
        let yaml = "device:\n  host: 10.0.0.5\nprometheus:\n  bind_address: 0.0.0.0\n  enable: false\n  exposition: true\n";
        let mut config: RctMonConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        assert!(config.prometheus.enable);
    }
}
