//! Epoch-drift recovery (C6).
//!
//! Invoked whenever the router or `AppManager` suspects the app has fallen behind a group's
//! current epoch (a stale-epoch response on send, or a decrypt failure on receive). Modeled as a
//! plain comparison-then-recover function rather than raising and catching an exception, per the
//! REDESIGN FLAGS note on treating epoch drift as a tagged result instead of exception-shaped
//! control flow.

use std::sync::Arc;

use wire_sdk_apiclient::ApiClient;
use wire_sdk_common::identifiers::{MlsGroupId, QualifiedId};
use wire_sdk_common::WireError;
use wire_sdk_crypto::CryptoEngine;
use wire_sdk_storage::Store;

use crate::error::storage_err;

pub struct MlsFallback<E> {
    engine: Arc<E>,
    api: ApiClient,
    store: Store,
}

impl<E: CryptoEngine> MlsFallback<E> {
    pub fn new(engine: Arc<E>, api: ApiClient, store: Store) -> Self {
        Self { engine, api, store }
    }

    /// Compares the engine's live epoch for `mls_group_id` against the backend's view of
    /// `conversation_id` and, if they disagree, rejoins by external commit and refreshes the
    /// local projection. A no-op when already in sync.
    pub async fn verify_conversation_out_of_sync(
        &self,
        mls_group_id: &MlsGroupId,
        conversation_id: &QualifiedId,
    ) -> Result<(), WireError> {
        let local_epoch = self.engine.conversation_epoch(mls_group_id).await?;
        let backend_conversation = self.api.get_conversation(conversation_id).await?;
        if backend_conversation.epoch == local_epoch {
            return Ok(());
        }

        tracing::warn!(
            %conversation_id,
            local_epoch,
            backend_epoch = backend_conversation.epoch,
            "conversation epoch drift detected, rejoining by external commit"
        );

        let group_info = self.api.fetch_group_info(mls_group_id).await?;
        let (joined_group_id, bundle) = self.engine.join_by_external_commit(&group_info).await?;
        self.api.post_commit_bundle(&joined_group_id, bundle.to_bytes()).await?;

        let refreshed = self.api.get_conversation(conversation_id).await?;
        let entity = refreshed.to_entity().map_err(storage_err)?;
        self.store.conversations().upsert(&entity).await.map_err(storage_err)?;
        for member in refreshed.to_members().map_err(storage_err)? {
            self.store
                .conversations()
                .upsert_member(conversation_id, &member.user_id, member.role)
                .await
                .map_err(storage_err)?;
        }
        Ok(())
    }
}
