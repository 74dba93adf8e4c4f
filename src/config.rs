//! Configuration for the library watcher.
//!
//! Settings are layered:
//! - Default values
//! - The configuration file given on the command line (JSON or TOML)
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `SHELFWATCH_` and use double
//! underscores to separate nested levels:
//! - `SHELFWATCH_MQTT__PORT=1884` sets `mqtt.port`
//! - `SHELFWATCH_BATCHING__WINDOW_SECS=5` sets `batching.window_secs`
//! - `SHELFWATCH_LOGGING__DEFAULT=debug` sets `logging.default`
//!
//! # Example
//!
//! ```json
//! {
//!   "mqtt": { "ip": "192.168.1.10", "port": 1883, "user": "plex",
//!             "password": "secret", "topic": "homeassistant/SMBNotifier" },
//!   "libraries": { "movies": ["/srv/media/movies"], "shows": ["/srv/media/tv"] }
//! }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized, Toml},
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Payload field that carries the raw events; no library may use it.
pub const EVENTS_FIELD: &str = "events";

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file {path} not found")]
    NotFound { path: PathBuf },

    #[error("Failed to load config: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("No libraries configured")]
    NoLibraries,

    #[error("Library '{library}' has no directories")]
    EmptyLibrary { library: String },

    #[error("Library name '{library}' is reserved")]
    ReservedName { library: String },

    #[error("Invalid MQTT qos {qos}, expected 0, 1 or 2")]
    InvalidQos { qos: u8 },

    #[error("Collection window must be greater than zero")]
    InvalidWindow,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Broker connection settings
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Library name -> watched directories, in file order
    #[serde(default)]
    pub libraries: IndexMap<String, Vec<PathBuf>>,

    /// Collection window and path matching
    #[serde(default)]
    pub batching: BatchingConfig,

    /// Delivery policy for completed batches
    #[serde(default)]
    pub publish: PublishConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_ip")]
    pub ip: String,

    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_topic")]
    pub topic: String,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// MQTT quality of service (0, 1 or 2)
    #[serde(default)]
    pub qos: u8,

    #[serde(default)]
    pub retain: bool,

    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Upper bound for connect and disconnect handshakes
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// How an event path is matched against a watched directory.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// The watched directory must be the event path or one of its ancestors.
    #[default]
    Segment,
    /// Legacy: the watched directory appears anywhere in the event path.
    Substring,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BatchingConfig {
    /// Window length, anchored to the first event of a batch
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    #[serde(default)]
    pub match_mode: MatchMode,

    /// Capacity of the event channel between watcher and engine
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PublishConfig {
    /// Attempts per batch before it is discarded
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay between attempts, multiplied by the attempt number
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// How long an in-flight publish may run after shutdown is requested
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default level for all modules
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module overrides, e.g. `shelfwatch::aggregate = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_mqtt_ip() -> String {
    "127.0.0.1".to_string()
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_topic() -> String {
    "homeassistant/SMBNotifier".to_string()
}
fn default_client_id() -> String {
    "SMBNotifier".to_string()
}
fn default_keep_alive_secs() -> u64 {
    30
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_window_secs() -> u64 {
    30
}
fn default_channel_capacity() -> usize {
    1024
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    1000
}
fn default_shutdown_grace_ms() -> u64 {
    2000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig::default(),
            libraries: IndexMap::new(),
            batching: BatchingConfig::default(),
            publish: PublishConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            ip: default_mqtt_ip(),
            port: default_mqtt_port(),
            user: String::new(),
            password: String::new(),
            topic: default_topic(),
            client_id: default_client_id(),
            qos: 0,
            retain: false,
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            match_mode: MatchMode::default(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl MqttConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl BatchingConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl PublishConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Settings {
    /// Load configuration from a file, layering defaults and environment.
    ///
    /// `.toml` files are parsed as TOML, everything else as JSON. The file
    /// must exist; a missing file is an error rather than an empty config.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let figment = Figment::new().merge(Serialized::defaults(Settings::default()));

        let is_toml = path.extension().and_then(|ext| ext.to_str()) == Some("toml");
        let figment = if is_toml {
            figment.merge(Toml::file_exact(path))
        } else {
            figment.merge(Json::file_exact(path))
        };

        let mut settings: Settings = figment
            // Double underscore separates nested levels
            .merge(Env::prefixed("SHELFWATCH_").split("__"))
            .extract()
            .map_err(Box::new)?;

        // Figment sorts dict keys; restore the order the file declares them in
        let order = library_order(path, is_toml)?;
        settings.libraries = reorder_libraries(std::mem::take(&mut settings.libraries), &order);

        settings.validate()?;
        Ok(settings)
    }

    /// Check structural invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.libraries.is_empty() {
            return Err(ConfigError::NoLibraries);
        }

        for (library, dirs) in &self.libraries {
            if library == EVENTS_FIELD {
                return Err(ConfigError::ReservedName {
                    library: library.clone(),
                });
            }
            if dirs.is_empty() {
                return Err(ConfigError::EmptyLibrary {
                    library: library.clone(),
                });
            }
        }

        if self.mqtt.qos > 2 {
            return Err(ConfigError::InvalidQos { qos: self.mqtt.qos });
        }

        if self.batching.window_secs == 0 {
            return Err(ConfigError::InvalidWindow);
        }

        Ok(())
    }
}

/// Only the `libraries` keys, read in stream order.
#[derive(Deserialize)]
struct LibraryKeys {
    #[serde(default)]
    libraries: IndexMap<String, serde::de::IgnoredAny>,
}

fn library_order(path: &Path, is_toml: bool) -> Result<Vec<String>, ConfigError> {
    let parse_error = |reason: String| ConfigError::Parse {
        path: path.to_path_buf(),
        reason,
    };

    let content = std::fs::read_to_string(path).map_err(|e| parse_error(e.to_string()))?;
    let keys: LibraryKeys = if is_toml {
        toml::from_str(&content).map_err(|e| parse_error(e.to_string()))?
    } else {
        serde_json::from_str(&content).map_err(|e| parse_error(e.to_string()))?
    };
    Ok(keys.libraries.into_keys().collect())
}

/// File-declared libraries first, then any only an override introduced.
fn reorder_libraries(
    mut libraries: IndexMap<String, Vec<PathBuf>>,
    order: &[String],
) -> IndexMap<String, Vec<PathBuf>> {
    let mut ordered = IndexMap::with_capacity(libraries.len());
    for name in order {
        if let Some(dirs) = libraries.shift_remove(name) {
            ordered.insert(name.clone(), dirs);
        }
    }
    ordered.extend(libraries);
    ordered
}
