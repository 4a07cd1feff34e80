//! Unified error system for the chore tracker.
//!
//! Errors serialize to JSON so the web frontend can parse and display them
//! with recovery hints. Every remote failure is converted into one of the
//! tracker's error kinds at the call site; nothing reaches the rendering
//! layer as an unstructured fault.
//!
//! # Usage
//!
//! ```rust
//! use chore_tracker::error::{ErrorCode, TrackerError};
//! use chore_tracker::tracker_err;
//!
//! let err = TrackerError::new(ErrorCode::TaskNotFound, "No chore with id 42");
//! let err = tracker_err!(TitleMissing, "Chore title is empty: {:?}", "  ");
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;

/// Error codes, grouped by thousands into categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum ErrorCode {
    // Fetch errors (1xxx)
    FetchFailed = 1001,
    FetchTimeout = 1002,

    // Lookup errors (2xxx)
    TaskNotFound = 2001,

    // Validation errors (3xxx)
    TitleMissing = 3001,
    RecurrenceMissing = 3002,
    RecurrenceInvalid = 3003,
    WeekOutOfRange = 3004,

    // Write errors (4xxx)
    WriteFailed = 4001,
    WriteTimeout = 4002,

    // Config errors (5xxx)
    ConfigInvalid = 5001,

    // IO errors (7xxx)
    FileNotFound = 7003,
    FilePermissionDenied = 7004,
    FileWriteFailed = 7005,

    // Unknown/fallback
    Unknown = 0,
}

/// The failure kinds callers are expected to branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    FetchFailure,
    NotFound,
    ValidationFailure,
    WriteFailure,
    Config,
    Io,
    Unknown,
}

impl ErrorCode {
    /// Category label sent to the frontend.
    pub fn category(&self) -> &'static str {
        match (*self as u16) / 1000 {
            1 => "fetch",
            2 => "not_found",
            3 => "validation",
            4 => "write",
            5 => "config",
            7 => "io",
            _ => "unknown",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match (*self as u16) / 1000 {
            1 => ErrorKind::FetchFailure,
            2 => ErrorKind::NotFound,
            3 => ErrorKind::ValidationFailure,
            4 => ErrorKind::WriteFailure,
            5 => ErrorKind::Config,
            7 => ErrorKind::Io,
            _ => ErrorKind::Unknown,
        }
    }

    /// Whether retrying the same operation can succeed.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            ErrorCode::TaskNotFound
                | ErrorCode::TitleMissing
                | ErrorCode::RecurrenceMissing
                | ErrorCode::RecurrenceInvalid
                | ErrorCode::WeekOutOfRange
                | ErrorCode::ConfigInvalid
                | ErrorCode::FilePermissionDenied
        )
    }

    /// Hints shown next to the error message.
    pub fn default_hints(&self) -> Vec<&'static str> {
        match self {
            ErrorCode::FetchFailed => vec![
                "Check your network connection",
                "Pull to refresh once the connection is back",
            ],
            ErrorCode::FetchTimeout | ErrorCode::WriteTimeout => vec![
                "The chore service is slow to respond, try again",
                "Raise remote_timeout_ms in the config file",
            ],
            ErrorCode::TaskNotFound => vec!["Refresh the grid, the chore may have been removed"],
            ErrorCode::TitleMissing => vec!["Give the chore a title"],
            ErrorCode::RecurrenceMissing | ErrorCode::RecurrenceInvalid => {
                vec!["Pick one of: daily, weekly, monthly"]
            }
            ErrorCode::WriteFailed => vec![
                "Your change is shown locally but was not saved",
                "Refresh to see the saved state",
            ],
            ErrorCode::ConfigInvalid => vec!["Check the YAML syntax of the config file"],
            ErrorCode::FileNotFound => vec![
                "Check if the path is correct",
                "Verify the file exists",
            ],
            ErrorCode::FilePermissionDenied => vec!["Check file permissions"],
            _ => vec![],
        }
    }
}

/// Structured error returned by every tracker operation.
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[error("[{error_id}] {message}")]
pub struct TrackerError {
    pub error_id: String,
    pub code: u16,
    pub category: String,
    pub message: String,
    pub recoverable: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recovery_hints: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl TrackerError {
    /// Create a new TrackerError with default hints.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error_id: format!("CT-{:04}", code as u16),
            code: code as u16,
            category: code.category().to_string(),
            message: message.into(),
            recoverable: code.is_recoverable(),
            recovery_hints: code
                .default_hints()
                .into_iter()
                .map(String::from)
                .collect(),
            cause: None,
        }
    }

    /// Replace the default recovery hints.
    pub fn with_hints(mut self, hints: Vec<&str>) -> Self {
        self.recovery_hints = hints.into_iter().map(String::from).collect();
        self
    }

    /// Attach the underlying failure for logs.
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Wrap any std error, keeping its debug form as the cause.
    pub fn from_error<E: std::error::Error>(code: ErrorCode, error: E) -> Self {
        Self::new(code, error.to_string()).with_cause(format!("{:?}", error))
    }

    /// A store failure while reading.
    pub fn fetch(context: &str, error: StoreError) -> Self {
        Self::new(ErrorCode::FetchFailed, format!("{}: {}", context, error))
            .with_cause(format!("{:?}", error))
    }

    /// A store failure while writing.
    pub fn write(context: &str, error: StoreError) -> Self {
        Self::new(ErrorCode::WriteFailed, format!("{}: {}", context, error))
            .with_cause(format!("{:?}", error))
    }

    pub fn code(&self) -> ErrorCode {
        code_from_u16(self.code)
    }

    pub fn kind(&self) -> ErrorKind {
        self.code().kind()
    }

    /// Convert to JSON string for the IPC boundary.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.message.clone())
    }
}

fn code_from_u16(code: u16) -> ErrorCode {
    match code {
        1001 => ErrorCode::FetchFailed,
        1002 => ErrorCode::FetchTimeout,
        2001 => ErrorCode::TaskNotFound,
        3001 => ErrorCode::TitleMissing,
        3002 => ErrorCode::RecurrenceMissing,
        3003 => ErrorCode::RecurrenceInvalid,
        3004 => ErrorCode::WeekOutOfRange,
        4001 => ErrorCode::WriteFailed,
        4002 => ErrorCode::WriteTimeout,
        5001 => ErrorCode::ConfigInvalid,
        7003 => ErrorCode::FileNotFound,
        7004 => ErrorCode::FilePermissionDenied,
        7005 => ErrorCode::FileWriteFailed,
        _ => ErrorCode::Unknown,
    }
}

/// Build a [`TrackerError`] from a code name and a format string.
#[macro_export]
macro_rules! tracker_err {
    ($code:ident, $msg:expr) => {
        $crate::error::TrackerError::new($crate::error::ErrorCode::$code, $msg)
    };
    ($code:ident, $fmt:expr, $($arg:tt)*) => {
        $crate::error::TrackerError::new(
            $crate::error::ErrorCode::$code,
            format!($fmt, $($arg)*)
        )
    };
}

impl From<std::io::Error> for TrackerError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => TrackerError::from_error(ErrorCode::FileNotFound, e),
            std::io::ErrorKind::PermissionDenied => {
                TrackerError::from_error(ErrorCode::FilePermissionDenied, e)
            }
            _ => TrackerError::from_error(ErrorCode::FileWriteFailed, e),
        }
    }
}

impl From<serde_yaml::Error> for TrackerError {
    fn from(e: serde_yaml::Error) -> Self {
        TrackerError::from_error(ErrorCode::ConfigInvalid, e)
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;
