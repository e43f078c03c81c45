//! Error catalog and shared error types.
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

pub mod catalog;

pub use catalog::{ErrorCategory, ErrorCode, ErrorEntry};

/// A value failed pre-flight validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self.field {
            "strategy" => ErrorCode::InvalidStrategy,
            _ => ErrorCode::RequestValidationFailed,
        }
    }
}
