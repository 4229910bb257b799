//! Server configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use stroller_core::WalkThresholds;

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server settings.
    pub server: ServerConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Telemetry bus settings.
    pub mqtt: MqttConfig,
    /// API authentication settings.
    pub security: SecurityConfig,
    /// Walk-detection thresholds.
    pub walk: WalkThresholds,
    /// Provisioned devices.
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        // Create parent directories if needed
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return any errors.
    ///
    /// This checks:
    /// - Server bind address is valid (host:port format)
    /// - Storage path is not empty
    /// - Broker URL carries an mqtt:// or mqtts:// scheme
    /// - Walk thresholds are internally consistent
    /// - Device IDs are not empty and not duplicated
    ///
    /// # Example
    ///
    /// ```
    /// use stroller_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.mqtt.validate());
        errors.extend(self.security.validate());

        if let Err(e) = self.walk.validate() {
            errors.push(ValidationError {
                field: "walk".to_string(),
                message: e.to_string(),
            });
        }

        // Validate devices
        let mut seen_ids = std::collections::HashSet::new();
        for (i, device) in self.devices.iter().enumerate() {
            let prefix = format!("devices[{}]", i);
            errors.extend(device.validate(&prefix));

            // Check for duplicate IDs
            let id_lower = device.id.to_lowercase();
            if !seen_ids.insert(id_lower.clone()) {
                errors.push(ValidationError {
                    field: format!("{}.id", prefix),
                    message: format!("duplicate device ID '{}'", device.id),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    ///
    /// This is a convenience method that combines `load()` and `validate()`.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Look up a provisioned device by ID.
    pub fn device(&self, device_id: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.id == device_id)
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind: String,
    /// Per-device event channel capacity. Slow WebSocket clients that fall
    /// further behind than this lose the oldest events.
    pub broadcast_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            broadcast_buffer: 64,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError {
                field: "server.bind".to_string(),
                message: "bind address cannot be empty".to_string(),
            });
        } else {
            // Check for valid host:port format
            let parts: Vec<&str> = self.bind.rsplitn(2, ':').collect();
            if parts.len() != 2 {
                errors.push(ValidationError {
                    field: "server.bind".to_string(),
                    message: format!(
                        "invalid bind address '{}': expected format 'host:port'",
                        self.bind
                    ),
                });
            } else {
                // Validate port
                let port_str = parts[0];
                match port_str.parse::<u16>() {
                    Ok(0) => {
                        errors.push(ValidationError {
                            field: "server.bind".to_string(),
                            message: "port cannot be 0".to_string(),
                        });
                    }
                    Err(_) => {
                        errors.push(ValidationError {
                            field: "server.bind".to_string(),
                            message: format!(
                                "invalid port '{}': must be a number 1-65535",
                                port_str
                            ),
                        });
                    }
                    Ok(_) => {} // Valid port
                }
            }
        }

        if self.broadcast_buffer == 0 {
            errors.push(ValidationError {
                field: "server.broadcast_buffer".to_string(),
                message: "broadcast buffer must be at least 1".to_string(),
            });
        }

        errors
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: stroller_store::default_db_path(),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "storage.path".to_string(),
                message: "database path cannot be empty".to_string(),
            });
        }

        errors
    }
}

/// Telemetry bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Whether to connect to the broker at all. Disable for API-only runs.
    pub enabled: bool,
    /// Broker URL, e.g. "mqtt://localhost:1883" or "mqtts://broker.example.com:8883".
    pub broker: String,
    /// MQTT client ID.
    pub client_id: String,
    /// Broker username (optional).
    pub username: Option<String>,
    /// Broker password (optional).
    pub password: Option<String>,
    /// Keep-alive interval in seconds.
    pub keep_alive_secs: u64,
    /// QoS level for subscriptions and published commands (0, 1, or 2).
    pub qos: u8,
    /// Initial reconnect delay in seconds.
    pub reconnect_initial_secs: u64,
    /// Reconnect delay ceiling in seconds.
    pub reconnect_max_secs: u64,
    /// Backoff multiplier applied per failed reconnect attempt.
    pub reconnect_multiplier: f64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            broker: "mqtt://localhost:1883".to_string(),
            client_id: "stroller-backend".to_string(),
            username: None,
            password: None,
            keep_alive_secs: 30,
            qos: 1,
            reconnect_initial_secs: 1,
            reconnect_max_secs: 60,
            reconnect_multiplier: 2.0,
        }
    }
}

impl MqttConfig {
    /// Validate telemetry bus configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        let rest = self
            .broker
            .strip_prefix("mqtt://")
            .or_else(|| self.broker.strip_prefix("mqtts://"));
        match rest {
            None => {
                errors.push(ValidationError {
                    field: "mqtt.broker".to_string(),
                    message: format!(
                        "invalid broker URL '{}': expected mqtt:// or mqtts:// scheme",
                        self.broker
                    ),
                });
            }
            Some("") => {
                errors.push(ValidationError {
                    field: "mqtt.broker".to_string(),
                    message: "broker host cannot be empty".to_string(),
                });
            }
            Some(_) => {}
        }

        if self.client_id.is_empty() {
            errors.push(ValidationError {
                field: "mqtt.client_id".to_string(),
                message: "client ID cannot be empty".to_string(),
            });
        }

        // rumqttc requires keep-alive of at least 5 seconds
        if !(5..=3600).contains(&self.keep_alive_secs) {
            errors.push(ValidationError {
                field: "mqtt.keep_alive_secs".to_string(),
                message: format!(
                    "keep-alive {} is out of range (5-3600 seconds)",
                    self.keep_alive_secs
                ),
            });
        }

        if self.qos > 2 {
            errors.push(ValidationError {
                field: "mqtt.qos".to_string(),
                message: format!("QoS {} is invalid: must be 0, 1, or 2", self.qos),
            });
        }

        if self.reconnect_initial_secs == 0 {
            errors.push(ValidationError {
                field: "mqtt.reconnect_initial_secs".to_string(),
                message: "initial reconnect delay must be at least 1 second".to_string(),
            });
        } else if self.reconnect_max_secs < self.reconnect_initial_secs {
            errors.push(ValidationError {
                field: "mqtt.reconnect_max_secs".to_string(),
                message: "reconnect delay ceiling cannot be below the initial delay".to_string(),
            });
        }

        if !self.reconnect_multiplier.is_finite() || self.reconnect_multiplier < 1.0 {
            errors.push(ValidationError {
                field: "mqtt.reconnect_multiplier".to_string(),
                message: format!(
                    "backoff multiplier {} is invalid: must be at least 1.0",
                    self.reconnect_multiplier
                ),
            });
        }

        errors
    }
}

/// API authentication configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Shared API token. When unset, authentication is disabled.
    pub api_token: Option<String>,
}

impl SecurityConfig {
    /// Validate security configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Some(token) = &self.api_token
            && token.is_empty()
        {
            errors.push(ValidationError {
                field: "security.api_token".to_string(),
                message: "API token cannot be empty string (use null/omit instead)".to_string(),
            });
        }

        errors
    }
}

/// A provisioned device.
///
/// Only devices listed here can be initialized; telemetry from unlisted
/// device IDs is still ingested, but `/api/initialize` refuses them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device ID as printed on the stroller.
    pub id: String,
    /// Friendly alias for the device.
    #[serde(default)]
    pub alias: Option<String>,
}

impl DeviceConfig {
    /// Validate device configuration.
    pub fn validate(&self, prefix: &str) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.id.is_empty() {
            errors.push(ValidationError {
                field: format!("{}.id", prefix),
                message: "device ID cannot be empty".to_string(),
            });
        } else if self.id.len() < 3 {
            errors.push(ValidationError {
                field: format!("{}.id", prefix),
                message: format!(
                    "device ID '{}' is too short (minimum 3 characters)",
                    self.id
                ),
            });
        }

        // Alias validation (if provided)
        if let Some(alias) = &self.alias
            && alias.is_empty()
        {
            errors.push(ValidationError {
                field: format!("{}.alias", prefix),
                message: "alias cannot be empty string (use null/omit instead)".to_string(),
            });
        }

        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `devices[0].id`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stroller")
        .join("server.toml")
}
