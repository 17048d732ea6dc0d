//! Error types for the sync layer.

use thiserror::Error;

/// Errors from the push-channel transport.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The transport failed to open or dropped the channel.
    #[error("channel transport error: {0}")]
    Transport(String),

    /// The server refused the topic.
    #[error("subscription rejected: {0}")]
    Rejected(String),
}

/// Errors from the authoritative API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The acting identity has no alias configured server-side; content
    /// mutations are refused until one is set.
    #[error("acting identity has no alias configured")]
    MissingAlias,

    /// The referenced entity does not exist server-side.
    #[error("not found: {0}")]
    NotFound(String),

    /// The server refused the request.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The request never reached a decision.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Errors from the optimistic mutation coordinator.
///
/// `MissingAlias` is user-recoverable (set an alias and resubmit) and
/// is never auto-retried; everything else is surfaced after the
/// speculative write has been rolled back.
#[derive(Debug, Error)]
pub enum MutationError {
    /// No alias configured for the acting identity, locally or
    /// server-side; content mutations require one.
    #[error("no alias configured for the local user")]
    MissingAlias,

    /// The mutation's target is not cached locally, so there is nothing
    /// to apply the speculative write to.
    #[error("{0} is not cached locally")]
    PreconditionMissing(String),

    /// The authoritative call failed; the speculative write has been
    /// rolled back.
    #[error(transparent)]
    Api(ApiError),
}

impl From<ApiError> for MutationError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::MissingAlias => Self::MissingAlias,
            other => Self::Api(other),
        }
    }
}
