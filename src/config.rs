// src/config.rs
use std::collections::HashMap;
use std::path::Path;

use config::{self, File};
use log::{debug, error};
use serde::Deserialize;

use crate::error::{ReporterError, Result};
use crate::packet::ThresholdPolicy;
use crate::record::Value;
use crate::schedule::SchedulePolicy;

/// Reporter configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ReporterConfig {
    /// Collector host
    pub host: String,
    /// Collector port
    pub port: u16,
    /// Client identifier stamped on every record; defaults to
    /// `"<hostname>:<pid>"`
    #[serde(default)]
    pub client_id: Option<String>,
    /// Extra key/value pairs merged into every record
    #[serde(default)]
    pub extras: HashMap<String, Value>,
    /// Flush threshold basis in pre-compression bytes
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,
    /// Sampling interval in seconds
    #[serde(default = "default_interval")]
    pub interval: f64,
    /// Offset of the aligned schedule within the interval, in seconds
    #[serde(default)]
    pub interval_offset: f64,
    /// Upper bound on the random delay after a mid-tick adaptive flush,
    /// in seconds
    #[serde(default = "default_flush_delay")]
    pub flush_delay: f64,
    /// Scheduling policy
    #[serde(default)]
    pub schedule: SchedulePolicy,
    /// Flush threshold policy
    #[serde(default)]
    pub threshold: ThresholdPolicy,
    /// Logging level
    #[serde(default)]
    pub log_level: LogLevel,
}

fn default_max_packet_size() -> usize {
    1000
}

fn default_interval() -> f64 {
    60.0
}

fn default_flush_delay() -> f64 {
    0.6
}

impl ReporterConfig {
    /// Create a configuration with defaults for everything but the
    /// collector address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: None,
            extras: HashMap::new(),
            max_packet_size: default_max_packet_size(),
            interval: default_interval(),
            interval_offset: 0.0,
            flush_delay: default_flush_delay(),
            schedule: SchedulePolicy::default(),
            threshold: ThresholdPolicy::default(),
            log_level: LogLevel::default(),
        }
    }

    /// The effective client id: the configured one, or
    /// `"<hostname>:<pid>"`.
    pub fn effective_client_id(&self) -> String {
        match &self.client_id {
            Some(id) => id.clone(),
            None => default_client_id(),
        }
    }

    /// Validate the configuration invariants.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(ReporterError::Config("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(ReporterError::Config("port must be non-zero".to_string()));
        }
        if !(self.interval > 0.0) {
            return Err(ReporterError::Config(format!(
                "interval must be positive, got {}",
                self.interval
            )));
        }
        if self.interval_offset < 0.0 || self.interval_offset >= self.interval {
            return Err(ReporterError::Config(format!(
                "interval_offset must be in [0, {}), got {}",
                self.interval, self.interval_offset
            )));
        }
        if self.max_packet_size == 0 {
            return Err(ReporterError::Config(
                "max_packet_size must be positive".to_string(),
            ));
        }
        if self.flush_delay < 0.0 {
            return Err(ReporterError::Config(format!(
                "flush_delay must not be negative, got {}",
                self.flush_delay
            )));
        }
        Ok(())
    }
}

/// The default `"<hostname>:<pid>"` client identity.
pub fn default_client_id() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string());
    format!("{}:{}", host, std::process::id())
}

/// Builder for reporter configuration
pub struct ReporterConfigBuilder {
    config: ReporterConfig,
}

impl ReporterConfigBuilder {
    /// Create a new reporter config builder for a collector address
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            config: ReporterConfig::new(host, port),
        }
    }

    /// Set the client identifier
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.config.client_id = Some(client_id.into());
        self
    }

    /// Add an extra key/value pair merged into every record
    pub fn extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.extras.insert(key.into(), value.into());
        self
    }

    /// Set the flush threshold basis in bytes
    pub fn max_packet_size(mut self, bytes: usize) -> Self {
        self.config.max_packet_size = bytes;
        self
    }

    /// Set the sampling interval in seconds
    pub fn interval(mut self, seconds: f64) -> Self {
        self.config.interval = seconds;
        self
    }

    /// Set the aligned-schedule offset in seconds
    pub fn interval_offset(mut self, seconds: f64) -> Self {
        self.config.interval_offset = seconds;
        self
    }

    /// Set the mid-tick flush jitter cap in seconds
    pub fn flush_delay(mut self, seconds: f64) -> Self {
        self.config.flush_delay = seconds;
        self
    }

    /// Set the scheduling policy
    pub fn schedule(mut self, policy: SchedulePolicy) -> Self {
        self.config.schedule = policy;
        self
    }

    /// Set the flush threshold policy
    pub fn threshold(mut self, policy: ThresholdPolicy) -> Self {
        self.config.threshold = policy;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<ReporterConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Logging level
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level
    #[default]
    Info,
    /// Debug level
    Debug,
    /// Trace level
    Trace,
}

/// Load reporter configuration from a file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ReporterConfig> {
    let path = path.as_ref();
    debug!("Loading configuration from {}", path.display());

    if !path.exists() {
        error!("Configuration file {} does not exist", path.display());
        return Err(ReporterError::Config(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    let extension = match path.extension() {
        Some(ext) => ext.to_string_lossy().to_lowercase(),
        None => {
            error!("Configuration file has no extension");
            return Err(ReporterError::Config(format!(
                "Configuration file has no extension: {}",
                path.display()
            )));
        }
    };

    let format = match extension.as_str() {
        "toml" => config::FileFormat::Toml,
        "json" => config::FileFormat::Json,
        "yaml" | "yml" => config::FileFormat::Yaml,
        format => {
            error!("Unsupported configuration format: {}", format);
            return Err(ReporterError::Config(format!(
                "Unsupported config format: {}",
                format
            )));
        }
    };

    let config = config::Config::builder()
        .add_source(File::with_name(&path.to_string_lossy()).format(format))
        .build()
        .map_err(|e| ReporterError::Config(e.to_string()))?;

    let config: ReporterConfig = config
        .try_deserialize()
        .map_err(|e| ReporterError::Config(e.to_string()))?;

    config.validate()?;
    Ok(config)
}

/// Load reporter configuration from a TOML string
pub fn load_config_from_toml(toml: &str) -> Result<ReporterConfig> {
    let config = config::Config::builder()
        .add_source(config::File::from_str(toml, config::FileFormat::Toml))
        .build()
        .map_err(|e| ReporterError::Config(e.to_string()))?;

    let config: ReporterConfig = config
        .try_deserialize()
        .map_err(|e| ReporterError::Config(e.to_string()))?;

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = ReporterConfig::new("collector.internal", 8125);
        assert_eq!(config.max_packet_size, 1000);
        assert_eq!(config.interval, 60.0);
        assert_eq!(config.interval_offset, 0.0);
        assert_eq!(config.flush_delay, 0.6);
        assert_eq!(config.schedule, SchedulePolicy::Aligned);
        assert_eq!(config.threshold, ThresholdPolicy::Adaptive);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_client_id_is_host_and_pid() {
        let id = default_client_id();
        let (_, pid) = id.rsplit_once(':').unwrap();
        assert_eq!(pid.parse::<u32>().unwrap(), std::process::id());
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = ReporterConfigBuilder::new("collector", 9999)
            .client_id("web-1:123")
            .extra("env", "prod")
            .max_packet_size(512)
            .interval(10.0)
            .interval_offset(2.5)
            .flush_delay(0.1)
            .schedule(SchedulePolicy::Fixed)
            .threshold(ThresholdPolicy::Fixed)
            .build()
            .unwrap();

        assert_eq!(config.effective_client_id(), "web-1:123");
        assert_eq!(config.extras["env"], Value::Str("prod".to_string()));
        assert_eq!(config.max_packet_size, 512);
        assert_eq!(config.interval, 10.0);
    }

    #[test]
    fn rejects_invalid_invariants() {
        assert!(ReporterConfigBuilder::new("", 1).build().is_err());
        assert!(ReporterConfigBuilder::new("h", 0).build().is_err());
        assert!(ReporterConfigBuilder::new("h", 1).interval(0.0).build().is_err());
        assert!(
            ReporterConfigBuilder::new("h", 1)
                .interval(10.0)
                .interval_offset(10.0)
                .build()
                .is_err()
        );
        assert!(
            ReporterConfigBuilder::new("h", 1)
                .max_packet_size(0)
                .build()
                .is_err()
        );
    }

    #[test]
    fn loads_toml_with_defaults_applied() {
        let config = load_config_from_toml(
            r#"
            host = "collector.internal"
            port = 8125
            interval = 30.0

            [extras]
            env = "staging"
            shard = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.host, "collector.internal");
        assert_eq!(config.interval, 30.0);
        assert_eq!(config.max_packet_size, 1000);
        assert_eq!(config.extras["env"], Value::Str("staging".to_string()));
        assert_eq!(config.extras["shard"], Value::Int(3));
    }

    #[test]
    fn missing_required_address_is_a_config_error() {
        assert!(matches!(
            load_config_from_toml("port = 8125"),
            Err(ReporterError::Config(_))
        ));
    }
}
