//! Engine errors

use thiserror::Error;

use crate::chain::ChainError;
use crate::endpoint::EndpointError;

/// Fatal engine errors
///
/// Everything here refuses (or aborts) a run. Recoverable endpoint trouble
/// during processing is handled inside the engine and only logged.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no chains configured")]
    NoChains,

    #[error("no inputs configured")]
    NoInputs,

    #[error("no outputs configured")]
    NoOutputs,

    /// A chain is missing an endpoint or points at one that doesn't exist
    #[error("chain '{0}' is not connected to a valid input and output")]
    InvalidChain(String),

    #[error("endpoint '{label}' could not be set up: {source}")]
    EndpointSetup {
        label: String,
        #[source]
        source: EndpointError,
    },

    #[error(transparent)]
    Chain(#[from] ChainError),

    /// Multitrack start measured a negative clock offset
    #[error("multitrack sync produced a negative offset")]
    NegativeSyncOffset,

    #[error("bad argument {value} for command '{command}'")]
    BadCommandArgument { command: String, value: f64 },

    #[error("unknown command code {0}")]
    UnknownCommand(u8),

    /// Outputs were closed after errors during the run
    #[error("{} output(s) failed during processing: {}", .0.len(), .0.join(", "))]
    OutputsFailed(Vec<String>),
}

impl EngineError {
    pub fn endpoint(label: &str, source: EndpointError) -> Self {
        Self::EndpointSetup {
            label: label.to_string(),
            source,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(EngineError::NoChains.to_string(), "no chains configured");
        let err = EngineError::OutputsFailed(vec!["a.raw".into(), "b.raw".into()]);
        assert_eq!(err.to_string(), "2 output(s) failed during processing: a.raw, b.raw");
    }
}
