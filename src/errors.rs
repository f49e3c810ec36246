use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::options::RunningMode;

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Structured error types for the segmenter.
///
/// Each variant carries the context of its domain (session lifecycle, filesystem,
/// image processing, model operations) so callers can match on the failure instead
/// of parsing strings.
#[derive(Error, Debug)]
pub enum SegError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Session not ready: {operation} requires an open segmenter")]
    NotReady { operation: String },

    #[error("Invalid state: {operation} is not allowed in {mode} mode")]
    InvalidState { operation: String, mode: RunningMode },

    #[error(transparent)]
    EngineInit(#[from] EngineInitError),

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Image processing error: {operation} failed")]
    ImageProcessing {
        operation: String,
        #[source]
        source: BoxedError,
    },

    #[error("Model error: {operation} failed")]
    Model {
        operation: String,
        #[source]
        source: BoxedError,
    },

    #[error("Validation error: {field} {reason}")]
    Validation { field: String, reason: String },
}

pub type Result<T> = std::result::Result<T, SegError>;

impl SegError {
    pub(crate) fn not_ready(operation: &str) -> Self {
        Self::NotReady {
            operation: operation.to_string(),
        }
    }

    pub(crate) fn model(operation: impl Into<String>, message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::Model {
            operation: operation.into(),
            source: message.into(),
        }
    }
}

/// Error code handed to `SegmenterListener::on_error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Generic,
    DelegateUnsupported,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generic => f.write_str("generic"),
            Self::DelegateUnsupported => f.write_str("delegate-unsupported"),
        }
    }
}

/// Why an engine could not be constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineInitKind {
    /// Malformed options, unreadable model, or an internal engine setup failure.
    InvalidOptions,
    /// The requested execution delegate cannot run this model on this device.
    DelegateUnsupported,
}

impl EngineInitKind {
    pub const fn error_code(self) -> ErrorCode {
        match self {
            Self::InvalidOptions => ErrorCode::Generic,
            Self::DelegateUnsupported => ErrorCode::DelegateUnsupported,
        }
    }
}

/// Tagged failure returned by `EngineFactory::create`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Engine initialization failed ({kind:?}): {message}")]
pub struct EngineInitError {
    pub kind: EngineInitKind,
    pub message: String,
}

impl EngineInitError {
    pub fn invalid_options(message: impl Into<String>) -> Self {
        Self {
            kind: EngineInitKind::InvalidOptions,
            message: message.into(),
        }
    }

    pub fn delegate_unsupported(message: impl Into<String>) -> Self {
        Self {
            kind: EngineInitKind::DelegateUnsupported,
            message: message.into(),
        }
    }
}

/// Convert anyhow errors to configuration errors.
///
/// Only the binary produces anyhow errors; they are flattened into a message at the
/// library boundary.
impl From<anyhow::Error> for SegError {
    fn from(err: anyhow::Error) -> Self {
        Self::Configuration {
            message: err.to_string(),
        }
    }
}

/// Convert I/O errors to filesystem errors.
///
/// Code that knows the path and operation should build `SegError::FileSystem`
/// directly; this is the fallback for bare `?`.
impl From<std::io::Error> for SegError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

impl From<image::ImageError> for SegError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageProcessing {
            operation: "image processing".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<ort::Error> for SegError {
    fn from(err: ort::Error) -> Self {
        Self::Model {
            operation: "ort operation".to_string(),
            source: Box::new(err),
        }
    }
}

/// Shape errors come out of tensor handling during inference, so they are filed
/// under model errors.
impl From<ndarray::ShapeError> for SegError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Model {
            operation: "tensor shape conversion".to_string(),
            source: Box::new(err),
        }
    }
}
