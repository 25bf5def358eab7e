//! Error types for the K-Hive pipeline.
//!
//! Library crates use [`KhiveError`] via `thiserror`.
//! The `khive` binary wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum KhiveError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// JSON artifact parsing error (manifest, selection, report...).
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Data validation error (bad artifact content, invalid state transition...).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// External media tool failure (spawn error or non-zero exit).
    #[error("{tool} failed: {message}")]
    Tool { tool: String, message: String },

    /// A pipeline stage (agent process) failed.
    #[error("stage {stage} failed: {message}")]
    Stage { stage: String, message: String },

    /// The run was interrupted by a shutdown signal.
    #[error("pipeline cancelled by signal")]
    Cancelled,
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, KhiveError>;

impl KhiveError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a media tool error.
    pub fn tool(tool: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Tool {
            tool: tool.into(),
            message: msg.into(),
        }
    }

    /// Create a stage failure.
    pub fn stage(stage: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
