//! Backend transport errors and the retry policy for server errors (§5, §7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid backend URL: {0}")]
    InvalidUrl(String),

    #[error("failed to decode backend response: {0}")]
    Decode(String),

    /// HTTP 4xx. Carries the raw response body so callers can sniff it for a stale-epoch label
    /// without re-parsing a typed error shape the backend does not guarantee.
    #[error("backend rejected request ({status}): {body}")]
    Client { status: u16, body: String },

    /// HTTP 5xx, only returned once the retry budget (§5, max 10 attempts) is exhausted.
    #[error("backend server error ({status}) after retries")]
    Server { status: u16 },

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("not authenticated: {0}")]
    Unauthenticated(String),
}

impl BackendError {
    pub fn is_stale_epoch(&self) -> bool {
        matches!(self, Self::Client { body, .. } if body.contains("mls-stale-message") || body.contains("mls-client-mismatch"))
    }
}

impl From<BackendError> for wire_sdk_common::WireError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Client { status, body } => wire_sdk_common::WireError::ClientError { status, body },
            BackendError::Server { status } => wire_sdk_common::WireError::ServerError { status },
            other => wire_sdk_common::WireError::invalid_parameter(other.to_string()),
        }
    }
}
