//! Daemon and client settings.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `RBC_*` environment variables. Command-line flags are applied last by the
//! binaries.

use super::env::EnvParser;
use super::{ConfigError, EnvError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

fn default_listen_addr() -> String {
    "127.0.0.1:7878".to_string()
}

fn default_heartbeat_timeout_secs() -> u64 {
    60
}

fn default_health_check_interval_secs() -> u64 {
    30
}

fn default_forward_timeout_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_poll_timeout_secs() -> u64 {
    300
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("dist")
}

fn default_artifact_name() -> String {
    "app".to_string()
}

fn default_true() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Default config directory (`~/.config/rbc` on Linux).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "rbc", "rbc").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Settings for the coordinator daemon (`rbcd`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Address the HTTP API binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// A node whose last heartbeat is older than this is marked offline.
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
    /// Period of the health sweep.
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    /// Timeout for forwarding a job to a node.
    #[serde(default = "default_forward_timeout_secs")]
    pub forward_timeout_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            health_check_interval_secs: default_health_check_interval_secs(),
            forward_timeout_secs: default_forward_timeout_secs(),
            log_level: default_log_level(),
        }
    }
}

impl CoordinatorConfig {
    pub fn default_path() -> Option<PathBuf> {
        config_dir().map(|dir| dir.join("rbcd.toml"))
    }

    /// Load from `path` (or the default location) and overlay the environment.
    ///
    /// An explicit path must exist; a missing default file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config: Self = load_file(path, Self::default_path())?;
        config.apply_env(&mut EnvParser::new())?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self, parser: &mut EnvParser) -> Result<(), ConfigError> {
        if let Some(addr) = parser.get_optional_string("LISTEN_ADDR").env_override().flatten() {
            self.listen_addr = addr;
        }
        if let Some(secs) = parser
            .get_u64_range("HEARTBEAT_TIMEOUT_SECS", self.heartbeat_timeout_secs, 1, MAX_TIMEOUT_SECS)
            .env_override()
        {
            self.heartbeat_timeout_secs = secs;
        }
        if let Some(secs) = parser
            .get_u64_range(
                "HEALTH_CHECK_INTERVAL_SECS",
                self.health_check_interval_secs,
                1,
                MAX_TIMEOUT_SECS,
            )
            .env_override()
        {
            self.health_check_interval_secs = secs;
        }
        if let Some(level) = parser.get_log_level("LOG_LEVEL", &self.log_level).env_override() {
            self.log_level = level;
        }
        finish_env(parser)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_addr.trim().is_empty() {
            return Err(ConfigError::invalid("listen_addr", "must not be empty"));
        }
        require_positive("heartbeat_timeout_secs", self.heartbeat_timeout_secs)?;
        require_positive("health_check_interval_secs", self.health_check_interval_secs)?;
        require_positive("forward_timeout_secs", self.forward_timeout_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_secs(self.forward_timeout_secs)
    }
}

/// Settings for the build client (`rbc`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub coordinator_url: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Base name of downloaded artifacts (`{artifact_name}-{target}`).
    #[serde(default = "default_artifact_name")]
    pub artifact_name: String,
    /// Retry a failed local build remotely.
    #[serde(default = "default_true")]
    pub fallback_enabled: bool,
    /// Program run for local builds.
    pub local_command: Option<String>,
    /// Program that triggers a CI-backed build.
    pub ci_command: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            coordinator_url: None,
            api_key: None,
            poll_timeout_secs: default_poll_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            output_dir: default_output_dir(),
            artifact_name: default_artifact_name(),
            fallback_enabled: true,
            local_command: None,
            ci_command: None,
            log_level: default_log_level(),
        }
    }
}

impl ClientConfig {
    pub fn default_path() -> Option<PathBuf> {
        config_dir().map(|dir| dir.join("config.toml"))
    }

    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config: Self = load_file(path, Self::default_path())?;
        config.apply_env(&mut EnvParser::new())?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self, parser: &mut EnvParser) -> Result<(), ConfigError> {
        if let Some(url) = parser.get_optional_string("COORDINATOR_URL").env_override() {
            self.coordinator_url = url;
        }
        if let Some(key) = parser.get_optional_string("API_KEY").env_override() {
            self.api_key = key;
        }
        if let Some(secs) = parser
            .get_u64_range("POLL_TIMEOUT_SECS", self.poll_timeout_secs, 1, MAX_TIMEOUT_SECS)
            .env_override()
        {
            self.poll_timeout_secs = secs;
        }
        if let Some(secs) = parser
            .get_u64_range("POLL_INTERVAL_SECS", self.poll_interval_secs, 1, MAX_TIMEOUT_SECS)
            .env_override()
        {
            self.poll_interval_secs = secs;
        }
        if let Some(dir) = parser.get_optional_path("OUTPUT_DIR").env_override().flatten() {
            self.output_dir = dir;
        }
        if let Some(level) = parser.get_log_level("LOG_LEVEL", &self.log_level).env_override() {
            self.log_level = level;
        }
        finish_env(parser)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("poll_timeout_secs", self.poll_timeout_secs)?;
        require_positive("poll_interval_secs", self.poll_interval_secs)?;
        require_positive("request_timeout_secs", self.request_timeout_secs)?;
        if self.artifact_name.trim().is_empty() {
            return Err(ConfigError::invalid("artifact_name", "must not be empty"));
        }
        Ok(())
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn load_file<T>(explicit: Option<&Path>, fallback: Option<PathBuf>) -> Result<T, ConfigError>
where
    T: Default + for<'de> Deserialize<'de>,
{
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            path.to_path_buf()
        }
        None => match fallback {
            Some(path) if path.exists() => path,
            _ => return Ok(T::default()),
        },
    };

    debug!(path = %path.display(), "Loading config file");
    let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path,
        message: source.to_string(),
    })
}

fn finish_env(parser: &mut EnvParser) -> Result<(), ConfigError> {
    let errors: Vec<EnvError> = parser.take_errors();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Env(errors))
    }
}

fn require_positive(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::invalid(field, "must be greater than zero"))
    } else {
        Ok(())
    }
}
