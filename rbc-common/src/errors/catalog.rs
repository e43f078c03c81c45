//! Error Catalog for the Remote Build Coordinator
//!
//! Every caller-visible failure maps to a stable code in the `RBC-Exxx`
//! format with a message and remediation steps.
//!
//! # Error Code Ranges
//!
//! | Range      | Category    | Description                           |
//! |------------|-------------|---------------------------------------|
//! | E001-E099  | Config      | Configuration and setup errors        |
//! | E100-E199  | Network     | Coordinator and node connectivity     |
//! | E200-E299  | Node        | Node registry and selection           |
//! | E300-E399  | Build       | Build strategy and execution          |
//! | E400-E499  | Artifact    | Artifact download and placement       |
//! | E500-E599  | Internal    | Internal/unexpected errors            |

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error code enumeration covering all RBC error scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // =========================================================================
    // Config Errors (E001-E099)
    // =========================================================================
    /// Configuration file not found
    ConfigNotFound,
    /// Configuration file could not be read
    ConfigReadError,
    /// Configuration file contains invalid TOML syntax
    ConfigParseError,
    /// Environment variable has invalid value
    ConfigEnvError,
    /// No coordinator URL configured
    ConfigMissingCoordinator,
    /// No API key configured
    ConfigMissingCredentials,
    /// Configuration contains invalid values
    ConfigValidationError,

    // =========================================================================
    // Network Errors (E100-E199)
    // =========================================================================
    /// Coordinator could not be reached
    CoordinatorUnreachable,
    /// Coordinator answered with an unexpected HTTP status
    CoordinatorHttpError,
    /// Coordinator response could not be decoded
    CoordinatorProtocolError,
    /// Forwarding a job to a build node failed
    NodeForwardFailed,

    // =========================================================================
    // Node Errors (E200-E299)
    // =========================================================================
    /// Node registration is missing required fields
    NodeMissingFields,
    /// Node id is not registered
    NodeNotFound,
    /// Node is at capacity or not available
    NodeBusy,
    /// No node satisfies the architecture and capability requirements
    NoAvailableNodes,
    /// Registry actor is not running
    RegistryUnavailable,
    /// Job id is not tracked
    JobNotFound,

    // =========================================================================
    // Build Errors (E300-E399)
    // =========================================================================
    /// Build request failed validation
    RequestValidationFailed,
    /// Coordinator reported the build as failed
    BuildFailed,
    /// Build did not reach a terminal state in time
    BuildTimeout,
    /// Local compilation failed
    LocalCompileFailed,
    /// CI-backed build failed
    CiBuildFailed,
    /// Unknown build strategy
    InvalidStrategy,
    /// No executor configured for the chosen strategy
    ExecutorNotConfigured,

    // =========================================================================
    // Artifact Errors (E400-E499)
    // =========================================================================
    /// Downloaded artifact was empty
    ArtifactEmpty,
    /// Artifact could not be written to disk
    ArtifactWriteFailed,
    /// Completed build carried no artifact URL
    ArtifactUrlMissing,
    /// Artifact permissions could not be set
    ArtifactPermissions,

    // =========================================================================
    // Internal Errors (E500-E599)
    // =========================================================================
    /// Internal invariant violated
    InternalStateError,
    /// Serialization failed
    InternalSerdeError,
    /// Logging could not be initialized
    InternalLoggingError,
}

impl ErrorCode {
    /// Returns the numeric error code (without prefix).
    #[must_use]
    pub const fn code_number(&self) -> u16 {
        match self {
            Self::ConfigNotFound => 1,
            Self::ConfigReadError => 2,
            Self::ConfigParseError => 3,
            Self::ConfigEnvError => 4,
            Self::ConfigMissingCoordinator => 5,
            Self::ConfigMissingCredentials => 6,
            Self::ConfigValidationError => 7,

            Self::CoordinatorUnreachable => 100,
            Self::CoordinatorHttpError => 101,
            Self::CoordinatorProtocolError => 102,
            Self::NodeForwardFailed => 103,

            Self::NodeMissingFields => 200,
            Self::NodeNotFound => 201,
            Self::NodeBusy => 202,
            Self::NoAvailableNodes => 203,
            Self::RegistryUnavailable => 204,
            Self::JobNotFound => 205,

            Self::RequestValidationFailed => 300,
            Self::BuildFailed => 301,
            Self::BuildTimeout => 302,
            Self::LocalCompileFailed => 303,
            Self::CiBuildFailed => 304,
            Self::InvalidStrategy => 305,
            Self::ExecutorNotConfigured => 306,

            Self::ArtifactEmpty => 400,
            Self::ArtifactWriteFailed => 401,
            Self::ArtifactUrlMissing => 402,
            Self::ArtifactPermissions => 403,

            Self::InternalStateError => 500,
            Self::InternalSerdeError => 501,
            Self::InternalLoggingError => 502,
        }
    }

    /// Returns the formatted error code string (e.g., "RBC-E001").
    #[must_use]
    pub fn code_string(&self) -> String {
        format!("RBC-E{:03}", self.code_number())
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self.code_number() {
            1..=99 => ErrorCategory::Config,
            100..=199 => ErrorCategory::Network,
            200..=299 => ErrorCategory::Node,
            300..=399 => ErrorCategory::Build,
            400..=499 => ErrorCategory::Artifact,
            _ => ErrorCategory::Internal,
        }
    }

    /// Returns the full error entry with all metadata.
    #[must_use]
    pub fn entry(&self) -> ErrorEntry {
        ErrorEntry {
            code: self.code_string(),
            category: self.category(),
            message: self.message().to_string(),
            remediation: self
                .remediation()
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }

    /// Returns the error message template.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::ConfigNotFound => "Configuration file not found",
            Self::ConfigReadError => "Failed to read configuration file",
            Self::ConfigParseError => "Configuration file contains invalid TOML syntax",
            Self::ConfigEnvError => "Environment variable has an invalid value",
            Self::ConfigMissingCoordinator => "No coordinator URL configured",
            Self::ConfigMissingCredentials => "No coordinator API key configured",
            Self::ConfigValidationError => "Configuration contains invalid values",

            Self::CoordinatorUnreachable => "Coordinator could not be reached",
            Self::CoordinatorHttpError => "Coordinator returned an error status",
            Self::CoordinatorProtocolError => "Coordinator response could not be decoded",
            Self::NodeForwardFailed => "Failed to forward the job to the build node",

            Self::NodeMissingFields => "Node registration is missing required fields",
            Self::NodeNotFound => "Build node is not registered",
            Self::NodeBusy => "Build node is busy or not accepting jobs",
            Self::NoAvailableNodes => "No available build node matches the requirements",
            Self::RegistryUnavailable => "Node registry is not running",
            Self::JobNotFound => "Job is not tracked by the registry",

            Self::RequestValidationFailed => "Build request failed validation",
            Self::BuildFailed => "Remote build failed",
            Self::BuildTimeout => "Build did not finish before the poll timeout",
            Self::LocalCompileFailed => "Local compilation failed",
            Self::CiBuildFailed => "CI build failed",
            Self::InvalidStrategy => "Unknown build strategy",
            Self::ExecutorNotConfigured => "No executor configured for this strategy",

            Self::ArtifactEmpty => "Downloaded artifact is empty",
            Self::ArtifactWriteFailed => "Failed to write artifact to disk",
            Self::ArtifactUrlMissing => "Completed build has no artifact URL",
            Self::ArtifactPermissions => "Failed to mark artifact executable",

            Self::InternalStateError => "Internal state error",
            Self::InternalSerdeError => "Internal serialization error",
            Self::InternalLoggingError => "Failed to initialize logging",
        }
    }

    /// Returns remediation steps for the error.
    #[must_use]
    pub const fn remediation(&self) -> &'static [&'static str] {
        match self {
            Self::ConfigNotFound => &[
                "Create a config file at ~/.config/rbc/config.toml",
                "Or pass --config with an explicit path",
            ],
            Self::ConfigReadError => &[
                "Check file permissions on the config file",
                "Verify the path points to a regular file",
            ],
            Self::ConfigParseError => &[
                "Check the TOML syntax near the reported line",
                "Remove unknown keys or fix value types",
            ],
            Self::ConfigEnvError => &[
                "Check RBC_* environment variables for typos",
                "Numeric settings take whole seconds",
            ],
            Self::ConfigMissingCoordinator => &[
                "Set RBC_COORDINATOR_URL",
                "Or add coordinator_url to the config file",
            ],
            Self::ConfigMissingCredentials => &[
                "Set RBC_API_KEY",
                "Or add api_key to the config file",
            ],
            Self::ConfigValidationError => &[
                "Check the reported field against its allowed range",
                "Timeouts and intervals must be greater than zero",
            ],

            Self::CoordinatorUnreachable => &[
                "Verify the coordinator URL and that the service is running",
                "Check network connectivity and proxy settings",
            ],
            Self::CoordinatorHttpError => &[
                "Inspect the response body for the server's reason",
                "Check that the API key is valid",
            ],
            Self::CoordinatorProtocolError => &[
                "Check that client and coordinator versions match",
            ],
            Self::NodeForwardFailed => &[
                "Check that the node's endpoint is reachable from the coordinator",
                "Inspect the node agent logs",
            ],

            Self::NodeMissingFields => &[
                "Include id, architecture, endpoint and capabilities when registering",
            ],
            Self::NodeNotFound => &[
                "Check the node id",
                "The node may have been deregistered; re-register it",
            ],
            Self::NodeBusy => &[
                "Retry once a job on the node completes",
                "Raise max_concurrent on the node if it has spare capacity",
            ],
            Self::NoAvailableNodes => &[
                "Register a node for the requested architecture",
                "Check that registered nodes are sending heartbeats",
                "Relax the requested capabilities",
            ],
            Self::RegistryUnavailable => &[
                "Restart the coordinator daemon",
            ],
            Self::JobNotFound => &[
                "The job may already be completed or its node deregistered",
            ],

            Self::RequestValidationFailed => &[
                "Check the version and target architecture",
                "Targets look like linux-x64, darwin-arm64 or windows-x64",
            ],
            Self::BuildFailed => &[
                "Inspect the error message reported by the coordinator",
                "Retry the build locally with --strategy local_only",
            ],
            Self::BuildTimeout => &[
                "Raise RBC_POLL_TIMEOUT_SECS",
                "Check the coordinator queue with `rbc queue`",
            ],
            Self::LocalCompileFailed => &[
                "Inspect the local build command output",
                "Enable fallback so remote capacity is tried",
            ],
            Self::CiBuildFailed => &[
                "Inspect the CI run logs",
            ],
            Self::InvalidStrategy => &[
                "Use one of local_only, remote_only or ci",
            ],
            Self::ExecutorNotConfigured => &[
                "Set local_command or ci_command in the config file",
            ],

            Self::ArtifactEmpty => &[
                "The coordinator served an empty binary; rebuild",
            ],
            Self::ArtifactWriteFailed => &[
                "Check that the output directory is writable",
                "Check free disk space",
            ],
            Self::ArtifactUrlMissing => &[
                "Check the coordinator's artifact storage configuration",
            ],
            Self::ArtifactPermissions => &[
                "Check filesystem permissions for the output directory",
            ],

            Self::InternalStateError => &[
                "Re-run with --verbose and report the logs",
            ],
            Self::InternalSerdeError => &[
                "Re-run with --verbose and report the logs",
            ],
            Self::InternalLoggingError => &[
                "Check RUST_LOG for an invalid filter directive",
            ],
        }
    }

    /// Returns all error codes.
    #[must_use]
    pub const fn all() -> &'static [ErrorCode] {
        &[
            Self::ConfigNotFound,
            Self::ConfigReadError,
            Self::ConfigParseError,
            Self::ConfigEnvError,
            Self::ConfigMissingCoordinator,
            Self::ConfigMissingCredentials,
            Self::ConfigValidationError,
            Self::CoordinatorUnreachable,
            Self::CoordinatorHttpError,
            Self::CoordinatorProtocolError,
            Self::NodeForwardFailed,
            Self::NodeMissingFields,
            Self::NodeNotFound,
            Self::NodeBusy,
            Self::NoAvailableNodes,
            Self::RegistryUnavailable,
            Self::JobNotFound,
            Self::RequestValidationFailed,
            Self::BuildFailed,
            Self::BuildTimeout,
            Self::LocalCompileFailed,
            Self::CiBuildFailed,
            Self::InvalidStrategy,
            Self::ExecutorNotConfigured,
            Self::ArtifactEmpty,
            Self::ArtifactWriteFailed,
            Self::ArtifactUrlMissing,
            Self::ArtifactPermissions,
            Self::InternalStateError,
            Self::InternalSerdeError,
            Self::InternalLoggingError,
        ]
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code_string(), self.message())
    }
}

/// Error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Configuration and setup errors (E001-E099)
    Config,
    /// Coordinator and node connectivity errors (E100-E199)
    Network,
    /// Node registry and selection errors (E200-E299)
    Node,
    /// Build strategy and execution errors (E300-E399)
    Build,
    /// Artifact download and placement errors (E400-E499)
    Artifact,
    /// Internal/unexpected errors (E500-E599)
    Internal,
}

impl ErrorCategory {
    /// Returns a human-readable name for the category.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Config => "Configuration",
            Self::Network => "Network",
            Self::Node => "Node",
            Self::Build => "Build",
            Self::Artifact => "Artifact",
            Self::Internal => "Internal",
        }
    }

    /// Returns a short description of the category.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Config => "Configuration file and environment setup issues",
            Self::Network => "Coordinator and build node communication issues",
            Self::Node => "Build node registration, health, and selection issues",
            Self::Build => "Build strategy and execution issues",
            Self::Artifact => "Artifact download and placement issues",
            Self::Internal => "Internal errors that may indicate bugs",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Complete error entry with all metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Error code string (e.g., "RBC-E001")
    pub code: String,
    /// Error category
    pub category: ErrorCategory,
    /// Human-readable error message
    pub message: String,
    /// Steps to remediate the error
    pub remediation: Vec<String>,
}

impl ErrorEntry {
    /// Formats the error for display with full remediation steps.
    #[must_use]
    pub fn format_full(&self) -> String {
        let mut output = format!("[{}] {}\n\n", self.code, self.message);

        if !self.remediation.is_empty() {
            output.push_str("Remediation steps:\n");
            for (i, step) in self.remediation.iter().enumerate() {
                output.push_str(&format!("  {}. {}\n", i + 1, step));
            }
        }

        output
    }

    /// Formats the error as a single line.
    #[must_use]
    pub fn format_brief(&self) -> String {
        format!("[{}] {}", self.code, self.message)
    }
}

impl fmt::Display for ErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_brief())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_numbers_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for code in ErrorCode::all() {
            let num = code.code_number();
            assert!(
                seen.insert(num),
                "Duplicate error code number: {} for {:?}",
                num,
                code
            );
        }
    }

    #[test]
    fn test_error_code_format() {
        assert_eq!(ErrorCode::ConfigNotFound.code_string(), "RBC-E001");
        assert_eq!(ErrorCode::CoordinatorUnreachable.code_string(), "RBC-E100");
        assert_eq!(ErrorCode::NodeMissingFields.code_string(), "RBC-E200");
        assert_eq!(ErrorCode::NoAvailableNodes.code_string(), "RBC-E203");
        assert_eq!(ErrorCode::BuildTimeout.code_string(), "RBC-E302");
        assert_eq!(ErrorCode::ArtifactEmpty.code_string(), "RBC-E400");
        assert_eq!(ErrorCode::InternalStateError.code_string(), "RBC-E500");
    }

    #[test]
    fn test_category_ranges() {
        for code in ErrorCode::all() {
            let num = code.code_number();
            let expected = match num {
                1..=99 => ErrorCategory::Config,
                100..=199 => ErrorCategory::Network,
                200..=299 => ErrorCategory::Node,
                300..=399 => ErrorCategory::Build,
                400..=499 => ErrorCategory::Artifact,
                _ => ErrorCategory::Internal,
            };
            assert_eq!(code.category(), expected, "{:?}", code);
        }
    }

    #[test]
    fn test_all_errors_have_message_and_remediation() {
        for code in ErrorCode::all() {
            assert!(!code.message().is_empty(), "{:?} has empty message", code);
            assert!(
                !code.remediation().is_empty(),
                "{:?} has no remediation steps",
                code
            );
        }
    }

    #[test]
    fn test_error_entry_serialization() {
        let entry = ErrorCode::NodeBusy.entry();
        let json = serde_json::to_string(&entry).expect("serialization failed");
        assert!(json.contains("RBC-E202"));
        assert!(json.contains("\"node\""));

        let parsed: ErrorEntry = serde_json::from_str(&json).expect("deserialization failed");
        assert_eq!(parsed, entry);
    }

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::NoAvailableNodes).unwrap();
        assert_eq!(json, "\"NO_AVAILABLE_NODES\"");
    }

    #[test]
    fn test_format_full_and_brief() {
        let entry = ErrorCode::ConfigMissingCoordinator.entry();
        let full = entry.format_full();
        assert!(full.contains("[RBC-E005]"));
        assert!(full.contains("Remediation steps:"));
        assert!(full.contains("RBC_COORDINATOR_URL"));

        assert_eq!(
            entry.format_brief(),
            "[RBC-E005] No coordinator URL configured"
        );
    }

    #[test]
    fn test_display_implementations() {
        let display = ErrorCode::BuildFailed.to_string();
        assert_eq!(display, "RBC-E301: Remote build failed");
        assert_eq!(ErrorCategory::Artifact.to_string(), "Artifact");
    }
}
