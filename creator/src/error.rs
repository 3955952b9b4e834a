use std::time::Duration;

use thiserror::Error;

use crate::transport::TransportError;

/// Everything the creation workflow can fail with. Each variant maps to one
/// thing a caller may want to react to differently.
#[derive(Debug, Error)]
pub enum CreatorError {
    #[error("Creation request failed: {0}")]
    CreationRequest(#[source] TransportError),

    /// The service answered, but not with the markup we expect. Usually the
    /// prompt was rejected or the page layout changed.
    #[error("Unexpected response from the creation page: {reason}")]
    UnexpectedResponse { reason: String },

    #[error("Polling failed after {attempts} attempts: {source}")]
    PollingTransport {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("Polling was cancelled")]
    PollingCancelled,

    #[error("Polling timed out after {elapsed:?}")]
    PollingTimedOut { elapsed: Duration },

    #[error("Malformed image markup: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CreatorError>;
