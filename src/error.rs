use std::fmt;
use thiserror::Error;

use crate::settings::Field;

/// Failure talking to the device.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("{0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status}: {reason}")]
    Status { status: u16, reason: String },

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    // raised by the simulated device
    #[error("{0}")]
    Unavailable(String),
}

/// A settings or telemetry read failed. Never retried.
#[derive(Debug, Error)]
#[error("Error loading settings: {0}")]
pub struct LoadError(#[from] pub DeviceError);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: Field,
    pub message: String,
}

/// Every local validation failure from one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    pub fn fields(&self) -> Vec<Field> {
        self.0.iter().map(|e| e.field).collect()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<&str> = self.0.iter().map(|e| e.message.as_str()).collect();
        f.write_str(&messages.join("\n"))
    }
}

impl std::error::Error for ValidationErrors {}

/// A single echoed value that differs from what was submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMismatch {
    pub field: &'static str,
    pub got: String,
    pub expected: String,
}

impl fmt::Display for FieldMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (got {}, expected {})", self.field, self.got, self.expected)
    }
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("HTTP {status}: {reason}")]
    Http { status: u16, reason: String },

    #[error("Server reported save failure")]
    Rejected,

    #[error("Server response carried no settings echo")]
    MissingEcho,

    #[error("{0}")]
    Device(DeviceError),

    #[error("Settings validation failed after {attempts} attempts: {}", join_mismatches(.fields))]
    Mismatch {
        attempts: u32,
        fields: Vec<FieldMismatch>,
    },

    #[error("Failed to save settings after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<WriteError>,
    },
}

impl WriteError {
    /// Mismatched fields reported by the last attempt, if that is why it failed.
    pub fn mismatches(&self) -> &[FieldMismatch] {
        match self {
            WriteError::Mismatch { fields, .. } => fields,
            WriteError::Exhausted { last, .. } => last.mismatches(),
            _ => &[],
        }
    }
}

impl From<DeviceError> for WriteError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::Status { status, reason } => WriteError::Http { status, reason },
            other => WriteError::Device(other),
        }
    }
}

pub(crate) fn join_mismatches(fields: &[FieldMismatch]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("a save is already in progress")]
    Busy,

    #[error("{0}")]
    Validation(#[from] ValidationErrors),

    #[error("Error saving settings: {0}")]
    Write(#[from] WriteError),
}

#[derive(Debug, Error)]
#[error("status monitor is no longer running")]
pub struct MonitorClosed;
