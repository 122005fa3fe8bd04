//! The public error taxonomy (§7 of the design).
//!
//! Downstream crates keep their own narrow `thiserror` enums for crate-local failure modes and
//! map into [`WireError`] at the `wire-sdk-core` boundary, the way the teacher splits
//! `DsRequestError`/`JobError` from the broader `anyhow::Error` used for internal plumbing.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("missing required parameter: {0}")]
    MissingParameter(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("entity not found: {0}")]
    EntityNotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// HTTP 4xx from the backend. Carries the parsed body so callers can inspect it for a
    /// stale-epoch label without re-parsing.
    #[error("backend rejected request ({status}): {body}")]
    ClientError { status: u16, body: String },

    /// HTTP 5xx from the backend. The caller is expected to have already retried with backoff.
    #[error("backend server error ({status})")]
    ServerError { status: u16 },

    #[error("cryptographic system error: {0}")]
    CryptographicSystemError(String),

    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl WireError {
    pub fn missing_parameter(msg: impl Into<String>) -> Self {
        Self::MissingParameter(msg.into())
    }

    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    pub fn entity_not_found(msg: impl Into<String>) -> Self {
        Self::EntityNotFound(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn cryptographic(msg: impl Into<String>) -> Self {
        Self::CryptographicSystemError(msg.into())
    }

    /// Used by the send/add-members retry-once paths to recognize a stale-epoch response without
    /// depending on a particular backend error body schema beyond "does it mention staleness".
    pub fn is_stale_epoch(&self) -> bool {
        matches!(self, Self::ClientError { body, .. } if body.contains("mls-stale-message") || body.contains("mls-client-mismatch"))
    }
}
