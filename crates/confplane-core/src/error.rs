//! Error taxonomy for the configuration service.
//!
//! Evaluation errors (mismatched types, missing properties) are deliberately
//! *not* represented here: they become condition-failed outcomes with a
//! diagnostic in an evaluator trace (see `confplane-eval`), never a `Result::Err`.
//! This enum is for the errors that do bubble to a boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// Requested entity absent in the replica.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed request, e.g. `context` query parameter is not a JSON object.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Permission check failed in the (external) admin/authoring collaborator.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Store or network failure. Logged, retried by the replicator, surfaced
    /// as a 5xx to callers.
    #[error("transient store error: {0}")]
    Transient(String),

    /// The replicator's event-hub consumer row is gone. Fatal to that
    /// replicator; triggers a full resync on next start.
    #[error("consumer destroyed: {0}")]
    ConsumerDestroyed(String),

    /// Invariant violation that must not be silently swallowed.
    #[error("fatal internal error: {0}")]
    FatalInternal(String),
}

impl ConfigError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConfigError::Transient(_))
    }
}

impl From<sqlx::Error> for ConfigError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ConfigError::NotFound(err.to_string()),
            other => ConfigError::Transient(other.to_string()),
        }
    }
}
