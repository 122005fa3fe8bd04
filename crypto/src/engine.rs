//! The `CryptoEngine` capability trait (C2).
//!
//! Deliberately narrow: the MLS/Proteus primitives themselves are an external, opaque concern
//! (§2's component table marks C2's implementation share "—"). What lives here is the surface the
//! rest of the SDK needs to drive group lifecycle and message protection without knowing anything
//! about how key material is stored or how the wire protocol is framed internally.

use async_trait::async_trait;
use thiserror::Error;
use wire_sdk_common::identifiers::{CryptoClientId, MlsGroupId};
use wire_sdk_common::WireError;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("unsupported ciphersuite: {0}")]
    UnsupportedCiphersuite(String),

    #[error("corrupted MLS bundle: {0}")]
    CorruptedBundle(String),

    #[error("MLS protocol error: {0}")]
    Protocol(String),

    #[error("group not found: {0}")]
    GroupNotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl From<CryptoError> for WireError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::GroupNotFound(msg) => WireError::entity_not_found(msg),
            other => WireError::cryptographic(other.to_string()),
        }
    }
}

/// The result of processing an MLS welcome. A welcome that targets a group the engine cannot
/// find ratchet tree material for is `Orphan`, recovered via `join_by_external_commit` rather than
/// treated as a hard failure (§4.2, P6).
#[derive(Debug)]
pub enum WelcomeOutcome {
    Joined { epoch: u64 },
    Orphan,
}

/// The result of decrypting an inbound MLS application/handshake message. `EpochUpdate` covers
/// handshake messages (commits, proposals) that advance group state but carry no application
/// payload — the §4.2 table's "`null` ⇒ epoch update only" case.
#[derive(Debug)]
pub enum DecryptOutcome {
    Message(Vec<u8>),
    EpochUpdate,
}

/// Material returned from joining (or creating) a group, handed back to `ConversationService` so
/// it can be posted to the backend as a commit bundle.
#[derive(Debug)]
pub struct CommitBundle {
    pub commit: Vec<u8>,
    pub group_info: Vec<u8>,
    pub welcome: Option<Vec<u8>>,
}

impl CommitBundle {
    /// The wire format described in §6: `commit || group_info.payload || (welcome || ∅)`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            self.commit.len() + self.group_info.len() + self.welcome.as_ref().map_or(0, Vec::len),
        );
        out.extend_from_slice(&self.commit);
        out.extend_from_slice(&self.group_info);
        if let Some(welcome) = &self.welcome {
            out.extend_from_slice(welcome);
        }
        out
    }
}

#[async_trait]
pub trait CryptoEngine: Send + Sync {
    /// This device's own crypto identity within the engine's keystore.
    fn client_id(&self) -> &CryptoClientId;

    async fn conversation_exists(&self, group_id: &MlsGroupId) -> Result<bool, CryptoError>;

    async fn conversation_epoch(&self, group_id: &MlsGroupId) -> Result<u64, CryptoError>;

    async fn process_welcome(&self, welcome: &[u8]) -> Result<(MlsGroupId, WelcomeOutcome), CryptoError>;

    async fn decrypt_mls(&self, group_id: &MlsGroupId, message: &[u8]) -> Result<DecryptOutcome, CryptoError>;

    async fn encrypt_mls(&self, group_id: &MlsGroupId, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Joins a group via external commit using fetched group-info bytes. Used both for orphan
    /// welcome recovery and for epoch-drift resync (§4.4).
    async fn join_by_external_commit(&self, group_info: &[u8]) -> Result<(MlsGroupId, CommitBundle), CryptoError>;

    async fn create_conversation(
        &self,
        external_senders_public_key: &[u8],
        ciphersuite: u16,
    ) -> Result<(MlsGroupId, CommitBundle), CryptoError>;

    async fn add_members(
        &self,
        group_id: &MlsGroupId,
        key_packages: &[Vec<u8>],
    ) -> Result<CommitBundle, CryptoError>;

    async fn remove_members(
        &self,
        group_id: &MlsGroupId,
        members: &[CryptoClientId],
    ) -> Result<CommitBundle, CryptoError>;

    /// Commits an empty proposal list to seal the group without adding members, e.g. when no key
    /// packages could be claimed for anyone.
    async fn update_keying_material(&self, group_id: &MlsGroupId) -> Result<CommitBundle, CryptoError>;

    async fn generate_key_packages(&self, count: usize, ciphersuite: u16) -> Result<Vec<Vec<u8>>, CryptoError>;

    /// Number of still-valid (unclaimed) key packages currently uploaded, used for the I4
    /// replenishment check.
    async fn key_package_count(&self) -> Result<usize, CryptoError>;

    fn public_key(&self) -> Vec<u8>;

    async fn wipe_conversation(&self, group_id: &MlsGroupId) -> Result<(), CryptoError>;
}
