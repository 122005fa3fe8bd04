//! `MlsTransport` (C4): the adapter the crypto engine is handed so it never talks to the backend
//! itself. Keeping this as a trait (rather than wiring `wire-sdk-apiclient` directly into
//! `wire-sdk-crypto`) is what lets `FakeCryptoEngine`-based tests run with no network at all.

use async_trait::async_trait;
use thiserror::Error;
use wire_sdk_common::identifiers::MlsGroupId;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("backend rejected commit bundle: {0}")]
    Rejected(String),
    #[error("transport I/O error: {0}")]
    Io(String),
}

#[async_trait]
pub trait MlsTransport: Send + Sync {
    /// Posts a commit bundle (`message/mls` content type) for a group.
    async fn send_commit_bundle(&self, group_id: &MlsGroupId, bundle: &[u8]) -> Result<(), TransportError>;

    /// Posts a plaintext MLS application message (`POST /mls/messages`).
    async fn send_message(&self, group_id: &MlsGroupId, message: &[u8]) -> Result<(), TransportError>;

    /// Fetches the group-info bytes (`content-type: message/mls`) needed for an external commit.
    async fn fetch_group_info(&self, group_id: &MlsGroupId) -> Result<Vec<u8>, TransportError>;
}
