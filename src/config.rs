//! Configuration module for DomiSafe.
//!
//! Loads a JSON configuration file over built-in defaults, then applies
//! environment variable overrides.

use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Agent configuration.
///
/// Every field has a default, so a config file only needs the keys it
/// changes. Unknown keys and mistyped values are rejected.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    /// Security sensor poll interval in seconds (default: 5)
    pub security_check_interval: u64,
    /// Security summary report interval in seconds (default: 60)
    pub security_send_interval: u64,
    /// Environmental poll interval in seconds (default: 360)
    pub env_interval: u64,
    /// Audit log fsync interval in seconds (default: 10)
    pub flushing_interval: u64,
    /// Minimum seconds between image captures (default: 10)
    pub cooldown_duration_sec: u64,
    /// Minimum seconds between alerts of the same kind (default: 300)
    pub alert_cooldown_sec: u64,
    /// Cloud sync cadence in seconds (default: 30)
    pub sync_interval: u64,
    /// Delay before the first sync attempt in seconds (default: 5)
    pub sync_initial_delay: u64,
    /// Pause between consecutive feed publishes in milliseconds (default: 500)
    pub publish_delay_ms: u64,
    /// Sleep after a failed runloop tick in seconds (default: 5)
    pub error_backoff_sec: u64,
    /// Bounded wait for each loop on shutdown in seconds (default: 10)
    pub shutdown_timeout_sec: u64,
    /// Capacity of the inbound command queue (default: 64)
    pub inbound_queue_capacity: usize,
    pub camera_enabled: bool,
    pub log_dir: PathBuf,
    pub image_dir: PathBuf,

    #[serde(rename = "LOCAL_DB_PATH")]
    pub local_db_path: PathBuf,
    #[serde(rename = "NEON_DATABASE_URL")]
    pub remote_database_url: Option<String>,

    #[serde(rename = "ADAFRUIT_IO_USERNAME")]
    pub broker_username: String,
    #[serde(rename = "ADAFRUIT_IO_KEY")]
    pub broker_key: String,
    #[serde(rename = "MQTT_BROKER")]
    pub broker_host: String,
    #[serde(rename = "MQTT_PORT")]
    pub broker_port: u16,
    #[serde(rename = "MQTT_KEEPALIVE")]
    pub broker_keepalive: u64,
    #[serde(rename = "MQTT_CLIENT_ID")]
    pub broker_client_id: String,

    #[serde(rename = "SMTP_HOST")]
    pub smtp_host: Option<String>,
    #[serde(rename = "SMTP_PORT")]
    pub smtp_port: Option<u16>,
    #[serde(rename = "SMTP_USER")]
    pub smtp_user: Option<String>,
    #[serde(rename = "SMTP_PASS")]
    pub smtp_pass: Option<String>,
    #[serde(rename = "ALERT_FROM")]
    pub alert_from: Option<String>,
    #[serde(rename = "ALERT_TO")]
    pub alert_to: Option<String>,
    pub mailing_list: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            security_check_interval: 5,
            security_send_interval: 60,
            env_interval: 360,
            flushing_interval: 10,
            cooldown_duration_sec: 10,
            alert_cooldown_sec: 300,
            sync_interval: 30,
            sync_initial_delay: 5,
            publish_delay_ms: 500,
            error_backoff_sec: 5,
            shutdown_timeout_sec: 10,
            inbound_queue_capacity: 64,
            camera_enabled: false,
            log_dir: PathBuf::from("logs"),
            image_dir: PathBuf::from("captured_images"),
            local_db_path: PathBuf::from("domisafe_local.db"),
            remote_database_url: None,
            broker_username: "username".to_string(),
            broker_key: "userkey".to_string(),
            broker_host: "io.adafruit.com".to_string(),
            broker_port: 1883,
            broker_keepalive: 60,
            broker_client_id: "domisafe-agent".to_string(),
            smtp_host: None,
            smtp_port: None,
            smtp_user: None,
            smtp_pass: None,
            alert_from: None,
            alert_to: None,
            mailing_list: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// Load configuration.
    ///
    /// Environment variables:
    /// - `DOMISAFE_CONFIG`: config file path (default: "config.json")
    /// - `DOMISAFE_DB_PATH`: local database path, overrides `LOCAL_DB_PATH`
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("DOMISAFE_CONFIG").unwrap_or_else(|_| "config.json".to_string());
        let mut cfg = Self::from_file(&path)?;

        if let Ok(db_path) = env::var("DOMISAFE_DB_PATH") {
            cfg.local_db_path = PathBuf::from(db_path);
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Read a config file; a missing file yields the defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("Config file {} not found, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reject values the runloops cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("security_check_interval", self.security_check_interval),
            ("security_send_interval", self.security_send_interval),
            ("env_interval", self.env_interval),
            ("flushing_interval", self.flushing_interval),
            ("sync_interval", self.sync_interval),
            ("error_backoff_sec", self.error_backoff_sec),
        ];
        for (key, value) in intervals {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "interval must be at least 1 second".to_string(),
                });
            }
        }

        if self.security_send_interval < self.security_check_interval {
            return Err(ConfigError::Invalid {
                key: "security_send_interval",
                reason: format!(
                    "{}s is shorter than security_check_interval ({}s)",
                    self.security_send_interval, self.security_check_interval
                ),
            });
        }

        if self.smtp_user.is_some() && self.smtp_pass.is_none() {
            return Err(ConfigError::Invalid {
                key: "SMTP_PASS",
                reason: "required when SMTP_USER is set".to_string(),
            });
        }

        if self.inbound_queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "inbound_queue_capacity",
                reason: "queue needs room for at least one message".to_string(),
            });
        }

        Ok(())
    }

    pub fn security_check_interval(&self) -> Duration {
        Duration::from_secs(self.security_check_interval)
    }

    pub fn security_send_interval(&self) -> Duration {
        Duration::from_secs(self.security_send_interval)
    }

    pub fn env_interval(&self) -> Duration {
        Duration::from_secs(self.env_interval)
    }

    pub fn flushing_interval(&self) -> Duration {
        Duration::from_secs(self.flushing_interval)
    }

    pub fn capture_cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_duration_sec)
    }

    pub fn alert_cooldown(&self) -> Duration {
        Duration::from_secs(self.alert_cooldown_sec)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval)
    }

    pub fn sync_initial_delay(&self) -> Duration {
        Duration::from_secs(self.sync_initial_delay)
    }

    pub fn publish_delay(&self) -> Duration {
        Duration::from_millis(self.publish_delay_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_sec)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_sec)
    }

    /// All alert recipients: `ALERT_TO` followed by the mailing list.
    pub fn alert_recipients(&self) -> Vec<String> {
        self.alert_to
            .iter()
            .chain(self.mailing_list.iter())
            .cloned()
            .collect()
    }
}
