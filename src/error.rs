//! Failure taxonomy for a single duty cycle.
//!
//! Every variant aborts the current cycle. The scheduler maps each one to a
//! user-visible message class through [`CycleError::class`].

use std::fmt;

/// Errors that can end a duty cycle early.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CycleError {
    /// Missing or invalid configuration (e.g. empty collection identifier).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Non-success HTTP status, or no response at all (`status: None`).
    #[error("network error{}: {message}", status_suffix(.status))]
    Network {
        status: Option<u16>,
        message: String,
    },

    /// The response body is not valid JSON.
    #[error("parse error: {0}")]
    ParseSyntax(String),

    /// The parsed document would not fit into its store.
    #[error("parse overflow: document needs more than {capacity} bytes (reached {required})")]
    ParseOverflow { capacity: usize, required: usize },

    /// The document parsed but does not have the expected structure.
    #[error("unexpected response shape: {0}")]
    Shape(String),

    /// The collection parsed fine but holds no entries.
    #[error("collection is empty")]
    EmptyResult,
}

/// Message class shown to the user when a cycle aborts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Configuration,
    Fetch,
    Content,
}

impl CycleError {
    pub fn network(status: Option<u16>, message: impl Into<String>) -> Self {
        CycleError::Network {
            status,
            message: message.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            CycleError::Configuration(_) => ErrorClass::Configuration,
            CycleError::Network { .. }
            | CycleError::ParseSyntax(_)
            | CycleError::ParseOverflow { .. } => ErrorClass::Fetch,
            CycleError::Shape(_) | CycleError::EmptyResult => ErrorClass::Content,
        }
    }

    /// True for the two parse failures.
    pub fn is_parse(&self) -> bool {
        matches!(
            self,
            CycleError::ParseSyntax(_) | CycleError::ParseOverflow { .. }
        )
    }

    /// Status code carried by a network error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            CycleError::Network { status, .. } => *status,
            _ => None,
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorClass::Configuration => "Configuration error",
            ErrorClass::Fetch => "Failed to fetch records",
            ErrorClass::Content => "No usable content",
        };
        f.write_str(s)
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

pub type CycleResult<T> = Result<T, CycleError>;
