//! Unified error type for the telemetry pipeline and command layer.
//!
//! `AppError` serializes as `{ "kind": "...", "message": "..." }` so a
//! renderer can distinguish error categories without parsing messages.
//! None of these errors are fatal: the pipeline skips the offending input
//! and keeps its prior derived state.

use serde::ser::SerializeStruct;

/// Application-level error returned by the pipeline, view, and commands.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AppError {
    /// An incoming message could not be decoded into a snapshot.
    #[error("malformed snapshot: {0}")]
    MalformedSnapshot(String),

    /// The quick-filter pattern failed to compile as a regular expression.
    #[error("invalid quick filter pattern: {0}")]
    InvalidFilterPattern(String),

    /// The telemetry stream ended or failed.
    #[error("stream disconnected: {0}")]
    StreamDisconnected(String),

    /// Invalid or missing user input.
    #[error("{0}")]
    InvalidInput(String),

    /// I/O and OS-level errors.
    #[error("{0}")]
    Io(String),
}

impl AppError {
    /// Returns the error kind as a string matching the variant name.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::MalformedSnapshot(_) => "MalformedSnapshot",
            AppError::InvalidFilterPattern(_) => "InvalidFilterPattern",
            AppError::StreamDisconnected(_) => "StreamDisconnected",
            AppError::InvalidInput(_) => "InvalidInput",
            AppError::Io(_) => "Io",
        }
    }
}

/// Custom Serialize: produces `{ "kind": "Variant", "message": "..." }`.
impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut s = serializer.serialize_struct("AppError", 2)?;
        s.serialize_field("kind", self.kind())?;
        s.serialize_field("message", &self.to_string())?;
        s.end()
    }
}

// ---- From implementations for ergonomic error conversion ----

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::MalformedSnapshot(err.to_string())
    }
}

impl From<regex::Error> for AppError {
    fn from(err: regex::Error) -> Self {
        AppError::InvalidFilterPattern(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        AppError::StreamDisconnected(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}
