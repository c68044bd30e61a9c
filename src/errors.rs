//! Error taxonomy for stage execution
//!
//! Every failure is one of:
//! - configuration errors: raised before any side effect, never retried
//! - execution failures: a local or remote command exited nonzero
//! - transport failures: the remote channel broke (handled like execution failures)
//! - local I/O errors

use std::io;

use stagewright_source::{ConversionError, SourceType};
use thiserror::Error;

use crate::config::ConfigError;
use crate::remote::TransportError;

/// Coarse classification of a [`DriverError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Execution,
    Transport,
    Io,
}

/// Errors raised by steps, stages and the registry
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("missing dynamic configuration `{0}`; pass it with `-s {0}=<value>`")]
    MissingDynamicConfiguration(String),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error("step `{step}` takes {expected} argument(s), got {actual}")]
    Arity {
        step: String,
        expected: usize,
        actual: usize,
    },

    #[error("step `{step}` parameter `{param}` expects {expected}, got {actual}")]
    ParameterType {
        step: String,
        param: String,
        expected: SourceType,
        actual: SourceType,
    },

    #[error("step `{step}` declares return type {expected} but produced nothing")]
    MissingReturn { step: String, expected: SourceType },

    #[error("step `{step}` declares return type {expected} but produced {actual}")]
    ReturnType {
        step: String,
        expected: SourceType,
        actual: SourceType,
    },

    #[error("step `{step}` declares no return value but produced {actual}")]
    UnexpectedReturn { step: String, actual: SourceType },

    #[error("step `{step}` has no parameter `{param}`")]
    UnknownParameter { step: String, param: String },

    #[error("value `{value}` was already consumed before step `{step}`")]
    ValueConsumed { step: String, value: String },

    #[error("step `{step}` parameter `{param}` does not hold a `{expected}`")]
    UntypedMismatch {
        step: String,
        param: String,
        expected: &'static str,
    },

    #[error("step `{0}` is not marked as a release step")]
    NotReleaseStep(String),

    #[error("`{command}' failed:\n{stderr}")]
    StepFailure { command: String, stderr: String },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("no stage path from `{from}` to `{to}`")]
    NoPath { from: String, to: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl DriverError {
    /// Build a step failure from a command line and its captured stderr
    pub fn step_failure(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        DriverError::StepFailure {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DriverError::MissingDynamicConfiguration(_)
            | DriverError::Arity { .. }
            | DriverError::ParameterType { .. }
            | DriverError::MissingReturn { .. }
            | DriverError::ReturnType { .. }
            | DriverError::UnexpectedReturn { .. }
            | DriverError::UnknownParameter { .. }
            | DriverError::ValueConsumed { .. }
            | DriverError::UntypedMismatch { .. }
            | DriverError::NotReleaseStep(_)
            | DriverError::Config(_)
            | DriverError::NoPath { .. } => ErrorKind::Configuration,
            DriverError::Conversion(ConversionError::Io(_)) => ErrorKind::Io,
            DriverError::Conversion(_) => ErrorKind::Configuration,
            DriverError::StepFailure { .. } => ErrorKind::Execution,
            DriverError::Transport(_) => ErrorKind::Transport,
            DriverError::Io(_) => ErrorKind::Io,
        }
    }

    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Configuration => 1,
            ErrorKind::Execution => 2,
            ErrorKind::Transport => 3,
            ErrorKind::Io => 4,
        }
    }
}

/// Result type for stage operations
pub type DriverResult<T> = Result<T, DriverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_failure_message_contains_command() {
        let err = DriverError::step_failure("false", "boom");
        let msg = err.to_string();
        assert!(msg.contains("false"));
        assert!(msg.contains("boom"));
        assert_eq!(err.kind(), ErrorKind::Execution);
    }

    #[test]
    fn test_conversion_classification() {
        let not_dir: DriverError =
            ConversionError::SourceConversionNotDirectory("a.txt".into()).into();
        assert_eq!(not_dir.kind(), ErrorKind::Configuration);

        let io: DriverError = ConversionError::Io(io::Error::other("disk")).into();
        assert_eq!(io.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(DriverError::MissingDynamicConfiguration("wdb.host".into()).exit_code(), 1);
        assert_eq!(DriverError::step_failure("x", "").exit_code(), 2);
        assert_eq!(
            DriverError::Transport(TransportError::ConnectionFailed("h".into())).exit_code(),
            3
        );
    }
}
