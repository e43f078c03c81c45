//! Configuration system for rbc.
//!
//! - Environment variable parsing with type safety and error collection
//! - Source tracking for debugging
//! - TOML settings for the daemon and the client

pub mod env;
pub mod settings;
pub mod source;

pub use env::{EnvError, EnvParser};
pub use settings::{ClientConfig, CoordinatorConfig, config_dir};
pub use source::{ConfigSource, Sourced};

use crate::errors::ErrorCode;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to assemble a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("invalid environment: {}", join_env_errors(.0))]
    Env(Vec<EnvError>),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::ConfigNotFound,
            Self::Read { .. } => ErrorCode::ConfigReadError,
            Self::Parse { .. } => ErrorCode::ConfigParseError,
            Self::Env(_) => ErrorCode::ConfigEnvError,
            Self::Invalid { .. } => ErrorCode::ConfigValidationError,
        }
    }
}

fn join_env_errors(errors: &[EnvError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_codes() {
        let err = ConfigError::Env(vec![EnvError::InvalidLogLevel {
            var: "RBC_LOG_LEVEL".into(),
            value: "loud".into(),
        }]);
        assert_eq!(err.code(), ErrorCode::ConfigEnvError);
        assert!(err.to_string().contains("RBC_LOG_LEVEL"));

        let err = ConfigError::invalid("poll_timeout_secs", "must be greater than zero");
        assert_eq!(err.code().code_string(), "RBC-E007");
    }
}
