//! Error types for recording load and wire decode failures.

use thiserror::Error;

/// Errors that can occur when loading a recording from a tabular file.
///
/// Load errors are always fatal: replay never starts on a file that does
/// not parse cleanly.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// A row could not be parsed into a valid sample
    #[error("Malformed record at line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },

    /// The file parsed but produced no samples at all
    #[error("Recording contains no samples")]
    EmptyRecording,
}

impl LoadError {
    /// Build a `MalformedRecord` for a 1-based source line
    pub fn malformed(line: usize, reason: impl Into<String>) -> Self {
        LoadError::MalformedRecord {
            line,
            reason: reason.into(),
        }
    }
}

/// Errors that can occur when decoding a wire payload or frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Payload is too short to contain a full sample
    #[error("Payload too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    /// Payload carries unexpected trailing bytes
    #[error("Payload length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Sensor id field is negative
    #[error("Invalid sensor id: {0}")]
    InvalidSensorId(i32),

    /// Frame topic is not valid UTF-8
    #[error("Frame topic is not valid UTF-8")]
    InvalidTopic,
}
