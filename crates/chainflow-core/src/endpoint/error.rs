//! Endpoint error types

use thiserror::Error;

use super::IoMode;
use crate::buffer::FormatError;

/// Errors raised by audio endpoints
#[derive(Error, Debug)]
pub enum EndpointError {
    /// Underlying file or device I/O failed
    #[error("I/O error on '{label}': {source}")]
    Io {
        label: String,
        #[source]
        source: std::io::Error,
    },

    /// WAV encoding or decoding failed
    #[error("WAV error on '{label}': {source}")]
    Wav {
        label: String,
        #[source]
        source: hound::Error,
    },

    /// Operation needs an open endpoint
    #[error("Endpoint '{0}' is not open")]
    NotOpen(String),

    /// Endpoint can't be used in the requested direction
    #[error("Endpoint '{label}' does not support {mode} mode")]
    UnsupportedIoMode { label: String, mode: IoMode },

    /// Endpoint can't move to the requested position
    #[error("Endpoint '{0}' is not seekable")]
    NotSeekable(String),

    /// Realtime device missed its deadline
    #[error("Xrun on '{0}'")]
    Xrun(String),

    /// Sample conversion failed
    #[error("Format error on '{label}': {source}")]
    Format {
        label: String,
        #[source]
        source: FormatError,
    },

    /// Endpoint parameters rejected at open time
    #[error("Setup error on '{label}': {reason}")]
    Setup { label: String, reason: String },
}

impl EndpointError {
    pub fn io(label: &str, source: std::io::Error) -> Self {
        EndpointError::Io {
            label: label.to_string(),
            source,
        }
    }

    pub fn wav(label: &str, source: hound::Error) -> Self {
        EndpointError::Wav {
            label: label.to_string(),
            source,
        }
    }

    pub fn format(label: &str, source: FormatError) -> Self {
        EndpointError::Format {
            label: label.to_string(),
            source,
        }
    }

    pub fn setup(label: &str, reason: impl Into<String>) -> Self {
        EndpointError::Setup {
            label: label.to_string(),
            reason: reason.into(),
        }
    }

    /// Runtime hiccup the engine may recover from, as opposed to a setup failure
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EndpointError::Io { .. } | EndpointError::Wav { .. } | EndpointError::Xrun(_)
        )
    }
}

/// Result type for endpoint operations
pub type EndpointResult<T> = Result<T, EndpointError>;
