//! Conversation lifecycle operations (C5).
//!
//! Every mutating method here either drives the crypto engine and then tells the backend about
//! the result (create/add/remove/leave/delete), or pulls backend state down into the local
//! projection (`establish_or_rejoin_conversations`, catch-up for conversations created or joined
//! on another device). `MlsWelcome` handling lives here too since it shares the "refetch full
//! `ConversationResponse`, upsert entity and members" tail with every other mutating path.

use std::sync::Arc;

use tracing::warn;
use wire_sdk_apiclient::dto::{removal_key_for_ciphersuite, ConversationResponse};
use wire_sdk_apiclient::ApiClient;
use wire_sdk_common::identifiers::{CryptoClientId, MlsGroupId, QualifiedId, TeamId};
use wire_sdk_common::{ConversationType, Role, WireError};
use wire_sdk_crypto::{CryptoEngine, WelcomeOutcome};
use wire_sdk_storage::Store;

use crate::crypto_bootstrap::DEFAULT_KEYPACKAGE_COUNT;
use crate::error::storage_err;
use crate::mls_fallback::MlsFallback;

/// Page size used both for `conversations/list-ids` paging and the follow-up
/// `conversations/list` detail fetch (§4.3's `establishOrRejoinConversations`).
const REJOIN_PAGE_SIZE: u32 = 1000;

/// Outcome of a partial-success membership change: some users may have had no claimable key
/// package, or the backend may have rejected the commit for reasons unrelated to epoch drift.
#[derive(Debug)]
pub struct AddMembersOutcome {
    pub added: Vec<QualifiedId>,
    pub failed: Vec<(QualifiedId, WireError)>,
}

pub struct ConversationService<E> {
    engine: Arc<E>,
    api: ApiClient,
    store: Store,
    fallback: Arc<MlsFallback<E>>,
    ciphersuite: u16,
    self_user_id: QualifiedId,
}

impl<E: CryptoEngine> ConversationService<E> {
    pub fn new(
        engine: Arc<E>,
        api: ApiClient,
        store: Store,
        fallback: Arc<MlsFallback<E>>,
        ciphersuite: u16,
        self_user_id: QualifiedId,
    ) -> Self {
        Self { engine, api, store, fallback, ciphersuite, self_user_id }
    }

    pub async fn create_group(&self, name: Option<&str>, user_ids: &[QualifiedId]) -> Result<QualifiedId, WireError> {
        let response = self.api.create_conversation(name, "GROUP", None).await?;
        self.establish_conversation(response, user_ids).await
    }

    /// Channels are team-scoped group conversations; the backend has no separate wire type for
    /// them, so the team id is what distinguishes this from `create_group`.
    pub async fn create_channel(
        &self,
        team_id: TeamId,
        name: Option<&str>,
        user_ids: &[QualifiedId],
    ) -> Result<QualifiedId, WireError> {
        let response = self.api.create_conversation(name, "GROUP", Some(team_id.0)).await?;
        self.establish_conversation(response, user_ids).await
    }

    pub async fn create_one_to_one(&self, user_id: QualifiedId) -> Result<QualifiedId, WireError> {
        let response = self.api.get_one_to_one(&user_id).await?;
        self.establish_conversation(response, std::slice::from_ref(&user_id)).await
    }

    /// Shared tail of every create path: refuses a SELF response, reuses an already-established
    /// MLS group idempotently (I1, I2), otherwise creates the group, claims key packages for
    /// `claim_for` plus this device, commits, and posts the resulting bundle.
    async fn establish_conversation(
        &self,
        response: ConversationResponse,
        claim_for: &[QualifiedId],
    ) -> Result<QualifiedId, WireError> {
        let entity = response.to_entity().map_err(storage_err)?;
        if entity.conversation_type == ConversationType::SelfConversation {
            return Err(WireError::invalid_state("refusing to establish a SELF conversation"));
        }

        if self.engine.conversation_exists(&entity.mls_group_id).await? {
            self.persist_conversation(&response).await?;
            return Ok(entity.id);
        }

        let removal_keys = self.api.mls_public_keys().await?;
        let external_senders_public_key = removal_key_for_ciphersuite(&removal_keys, self.ciphersuite)
            .ok_or_else(|| WireError::missing_parameter("no removal public key for configured ciphersuite"))?;

        let (group_id, _) = self.engine.create_conversation(&external_senders_public_key, self.ciphersuite).await?;

        let mut key_packages = Vec::new();
        for user in claim_for.iter().chain(std::iter::once(&self.self_user_id)) {
            match self.api.claim_key_packages(user).await {
                Ok(packages) => key_packages.extend(packages),
                Err(error) => warn!(%user, %error, "failed to claim key package, skipping (no retry)"),
            }
        }

        let bundle = if key_packages.is_empty() {
            self.engine.update_keying_material(&group_id).await?
        } else {
            self.engine.add_members(&group_id, &key_packages).await?
        };
        self.api.post_commit_bundle(&group_id, bundle.to_bytes()).await?;

        let epoch = self.engine.conversation_epoch(&group_id).await?;
        let mut entity = entity;
        entity.mls_group_id = group_id;
        entity.epoch = epoch;
        self.store.conversations().upsert(&entity).await.map_err(storage_err)?;
        self.store
            .conversations()
            .upsert_member(&entity.id, &self.self_user_id, Role::Admin)
            .await
            .map_err(storage_err)?;
        for user in claim_for {
            self.store.conversations().upsert_member(&entity.id, user, Role::Member).await.map_err(storage_err)?;
        }
        Ok(entity.id)
    }

    pub(crate) async fn persist_conversation(&self, response: &ConversationResponse) -> Result<(), WireError> {
        let entity = response.to_entity().map_err(storage_err)?;
        self.store.conversations().upsert(&entity).await.map_err(storage_err)?;
        for member in response.to_members().map_err(storage_err)? {
            self.store.conversations().upsert_member(&entity.id, &member.user_id, member.role).await.map_err(storage_err)?;
        }
        Ok(())
    }

    pub async fn add_members_to_conversation(
        &self,
        conversation_id: &QualifiedId,
        user_ids: &[QualifiedId],
    ) -> Result<AddMembersOutcome, WireError> {
        let entity = self
            .store
            .conversations()
            .get(conversation_id)
            .await
            .map_err(storage_err)?
            .ok_or_else(|| WireError::entity_not_found(conversation_id.to_string()))?;
        if entity.conversation_type == ConversationType::OneToOne {
            return Err(WireError::forbidden("cannot add members to a one-to-one conversation"));
        }

        let mut ok = Vec::new();
        let mut failed = Vec::new();
        let mut key_packages = Vec::new();
        for user in user_ids {
            match self.api.claim_key_packages(user).await {
                Ok(packages) => {
                    key_packages.extend(packages);
                    ok.push(user.clone());
                }
                Err(error) => failed.push((user.clone(), error.into())),
            }
        }
        if ok.is_empty() {
            return Ok(AddMembersOutcome { added: ok, failed });
        }

        self.commit_add_members(&entity.mls_group_id, conversation_id, &key_packages).await?;

        let epoch = self.engine.conversation_epoch(&entity.mls_group_id).await?;
        self.store.conversations().set_epoch(conversation_id, epoch).await.map_err(storage_err)?;
        for user in &ok {
            self.store.conversations().upsert_member(conversation_id, user, Role::Member).await.map_err(storage_err)?;
        }
        Ok(AddMembersOutcome { added: ok, failed })
    }

    /// Posts the add-members commit, retrying exactly once via `MlsFallback` on a stale-epoch
    /// rejection (§4.3).
    async fn commit_add_members(
        &self,
        group_id: &MlsGroupId,
        conversation_id: &QualifiedId,
        key_packages: &[Vec<u8>],
    ) -> Result<(), WireError> {
        let bundle = self.engine.add_members(group_id, key_packages).await?;
        match self.api.post_commit_bundle(group_id, bundle.to_bytes()).await {
            Ok(()) => Ok(()),
            Err(error) if error.is_stale_epoch() => {
                self.fallback.verify_conversation_out_of_sync(group_id, conversation_id).await?;
                let bundle = self.engine.add_members(group_id, key_packages).await?;
                self.api.post_commit_bundle(group_id, bundle.to_bytes()).await?;
                Ok(())
            }
            Err(error) => Err(error.into()),
        }
    }

    pub async fn remove_members_from_conversation(
        &self,
        conversation_id: &QualifiedId,
        user_ids: &[QualifiedId],
    ) -> Result<(), WireError> {
        let entity = self
            .store
            .conversations()
            .get(conversation_id)
            .await
            .map_err(storage_err)?
            .ok_or_else(|| WireError::entity_not_found(conversation_id.to_string()))?;
        if entity.conversation_type == ConversationType::OneToOne {
            return Err(WireError::forbidden("cannot remove members from a one-to-one conversation"));
        }

        // This SDK never learns another user's device id; a single assumed device ("0") is
        // the engine's only way to name that user's credential for removal.
        let client_ids: Vec<CryptoClientId> =
            user_ids.iter().map(|u| CryptoClientId::new(u.id, "0", &u.domain)).collect();
        let bundle = self.engine.remove_members(&entity.mls_group_id, &client_ids).await?;
        self.api.post_commit_bundle(&entity.mls_group_id, bundle.to_bytes()).await?;

        for user in user_ids {
            self.api.remove_member(conversation_id, user).await?;
            self.store.conversations().remove_member(conversation_id, user).await.map_err(storage_err)?;
        }
        let epoch = self.engine.conversation_epoch(&entity.mls_group_id).await?;
        self.store.conversations().set_epoch(conversation_id, epoch).await.map_err(storage_err)?;
        Ok(())
    }

    pub async fn update_conversation_member_role(
        &self,
        conversation_id: &QualifiedId,
        user_id: &QualifiedId,
        new_role: Role,
    ) -> Result<(), WireError> {
        self.api.update_member_role(conversation_id, user_id, new_role).await?;
        self.store
            .conversations()
            .upsert_member(conversation_id, user_id, new_role)
            .await
            .map_err(storage_err)
    }

    pub async fn leave_conversation(&self, conversation_id: &QualifiedId) -> Result<(), WireError> {
        let entity = self
            .store
            .conversations()
            .get(conversation_id)
            .await
            .map_err(storage_err)?
            .ok_or_else(|| WireError::invalid_parameter("unknown conversation"))?;
        if entity.conversation_type != ConversationType::Group {
            return Err(WireError::invalid_parameter("can only leave a group conversation"));
        }
        let is_member = self
            .store
            .conversations()
            .members(conversation_id)
            .await
            .map_err(storage_err)?
            .iter()
            .any(|m| m.user_id == self.self_user_id);
        if !is_member {
            return Err(WireError::forbidden("not a member of this conversation"));
        }

        self.api.remove_member(conversation_id, &self.self_user_id).await?;
        self.engine.wipe_conversation(&entity.mls_group_id).await?;
        self.store.conversations().delete(conversation_id).await.map_err(storage_err)
    }

    pub async fn delete_conversation(&self, conversation_id: &QualifiedId) -> Result<(), WireError> {
        let entity = self
            .store
            .conversations()
            .get(conversation_id)
            .await
            .map_err(storage_err)?
            .ok_or_else(|| WireError::entity_not_found(conversation_id.to_string()))?;
        if entity.conversation_type != ConversationType::Group {
            return Err(WireError::invalid_parameter("can only delete a group conversation"));
        }
        let is_admin = self
            .store
            .conversations()
            .members(conversation_id)
            .await
            .map_err(storage_err)?
            .iter()
            .any(|m| m.user_id == self.self_user_id && m.role == Role::Admin);
        if !is_admin {
            return Err(WireError::forbidden("must be an admin to delete this conversation"));
        }

        self.api.delete_conversation(conversation_id).await?;
        self.engine.wipe_conversation(&entity.mls_group_id).await?;
        self.store.conversations().delete(conversation_id).await.map_err(storage_err)
    }

    /// Recovers from the one-time startup gap between "this device registered" and "this device
    /// has caught up with every conversation it was already a member of" (§4.3, §4.8). A no-op
    /// once the flag set by `CryptoBootstrap`'s first registration has been cleared.
    pub async fn establish_or_rejoin_conversations(&self) -> Result<(), WireError> {
        if !self.store.app().should_rejoin_conversations().await.map_err(storage_err)? {
            return Ok(());
        }

        let mut paging_state = None;
        loop {
            let page = self.api.list_conversation_ids(paging_state.clone(), REJOIN_PAGE_SIZE).await?;
            if !page.qualified_conversations.is_empty() {
                let ids: Vec<QualifiedId> = page.qualified_conversations.into_iter().map(Into::into).collect();
                let details = self.api.list_conversations(&ids).await?;
                for response in details.found {
                    self.rejoin_if_needed(&response).await?;
                }
            }
            if !page.has_more {
                break;
            }
            paging_state = page.paging_state;
        }

        self.store.app().set_should_rejoin_conversations(false).await.map_err(storage_err)?;
        Ok(())
    }

    async fn rejoin_if_needed(&self, response: &ConversationResponse) -> Result<(), WireError> {
        let entity = response.to_entity().map_err(storage_err)?;
        if entity.conversation_type == ConversationType::SelfConversation {
            return Ok(());
        }
        if entity.is_mls() && !self.engine.conversation_exists(&entity.mls_group_id).await? {
            let group_info = self.api.fetch_group_info(&entity.mls_group_id).await?;
            let (joined_group_id, bundle) = self.engine.join_by_external_commit(&group_info).await?;
            self.api.post_commit_bundle(&joined_group_id, bundle.to_bytes()).await?;
        }
        self.persist_conversation(response).await
    }

    /// Processes an inbound `MlsWelcome` event (§4.2): resolves an `Orphan` welcome by fetching
    /// the conversation's group-info and joining by external commit, refuses a welcome into a
    /// SELF conversation (I6), and tops up this device's key-package supply if the welcome
    /// dropped it below half the default batch (I4).
    pub async fn handle_welcome(
        &self,
        conversation_id: &QualifiedId,
        welcome: &[u8],
    ) -> Result<QualifiedId, WireError> {
        let response = self.api.get_conversation(conversation_id).await?;
        if response.conversation_type == "SELF" {
            return Err(WireError::invalid_state(format!("refusing welcome into self-conversation {conversation_id}")));
        }

        let (group_id, outcome) = self.engine.process_welcome(welcome).await?;
        let group_id = match outcome {
            WelcomeOutcome::Joined { .. } => group_id,
            WelcomeOutcome::Orphan => {
                let target_group_id = MlsGroupId::from_base64(&response.group_id)?;
                let group_info = self.api.fetch_group_info(&target_group_id).await?;
                let (joined_group_id, bundle) = self.engine.join_by_external_commit(&group_info).await?;
                self.api.post_commit_bundle(&joined_group_id, bundle.to_bytes()).await?;
                joined_group_id
            }
        };

        let refreshed = self.api.get_conversation(conversation_id).await?;
        let mut entity = refreshed.to_entity().map_err(storage_err)?;
        entity.mls_group_id = group_id;
        self.store.conversations().upsert(&entity).await.map_err(storage_err)?;
        for member in refreshed.to_members().map_err(storage_err)? {
            self.store.conversations().upsert_member(conversation_id, &member.user_id, member.role).await.map_err(storage_err)?;
        }

        if self.engine.key_package_count().await? < DEFAULT_KEYPACKAGE_COUNT / 2 {
            let packages = self.engine.generate_key_packages(DEFAULT_KEYPACKAGE_COUNT, self.ciphersuite).await?;
            self.api.upload_key_packages(self.engine.client_id(), packages).await?;
        }

        Ok(conversation_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;
    use wire_sdk_crypto::FakeCryptoEngine;

    use super::*;

    async fn test_store() -> Store {
        let pool = wire_sdk_storage::open(":memory:").await.unwrap();
        Store::new(pool).0
    }

    fn self_id() -> QualifiedId {
        QualifiedId::new(Uuid::new_v4(), "example.com")
    }

    async fn service(
        server: &mockito::ServerGuard,
    ) -> ConversationService<FakeCryptoEngine> {
        let api = ApiClient::bearer_token(url::Url::parse(&server.url()).unwrap(), "token").unwrap();
        let store = test_store().await;
        let self_user_id = self_id();
        let client_id = CryptoClientId::new(self_user_id.id, "device1", &self_user_id.domain);
        let engine = Arc::new(FakeCryptoEngine::new(client_id));
        let fallback = Arc::new(MlsFallback::new(engine.clone(), api.clone(), store.clone()));
        ConversationService::new(engine, api, store, fallback, 0xf031, self_user_id)
    }

    #[tokio::test]
    async fn create_group_refuses_self_conversation() {
        let mut server = mockito::Server::new_async().await;
        let conversation_id = Uuid::new_v4();
        let _mock = server
            .mock("POST", "/conversations")
            .with_status(200)
            .with_body(format!(
                r#"{{"qualified_id":{{"id":"{conversation_id}","domain":"example.com"}},
                    "name":null,"team":null,"group_id":"AAA=","epoch":0,
                    "type":"SELF","protocol":"MLS","members":[]}}"#
            ))
            .create_async()
            .await;

        let service = service(&server).await;
        let error = service.create_group(None, &[]).await.unwrap_err();
        assert!(matches!(error, WireError::InvalidState(_)));
    }

    #[tokio::test]
    async fn create_group_establishes_mls_group_and_persists_members() {
        let mut server = mockito::Server::new_async().await;
        let conversation_id = Uuid::new_v4();
        let other = self_id();
        let _create = server
            .mock("POST", "/conversations")
            .with_status(200)
            .with_body(format!(
                r#"{{"qualified_id":{{"id":"{conversation_id}","domain":"example.com"}},
                    "name":"Team","team":null,"group_id":"AAA=","epoch":0,
                    "type":"GROUP","protocol":"MLS","members":[]}}"#
            ))
            .create_async()
            .await;
        let _keys = server
            .mock("GET", "/mls/public-keys")
            .with_status(200)
            .with_body(r#"{"removal":{"ed25519":"AAAA"}}"#)
            .create_async()
            .await;
        let _claim = server
            .mock("POST", mockito::Matcher::Regex(r"^/mls/key-packages/claim/.*".into()))
            .with_status(200)
            .with_body(r#"{"key_packages":[]}"#)
            .create_async()
            .await;
        let _commit = server
            .mock("POST", mockito::Matcher::Regex(r"^/mls/commit-bundles/.*".into()))
            .with_status(200)
            .create_async()
            .await;

        let service = service(&server).await;
        let conversation_id = service.create_group(Some("Team"), &[other.clone()]).await.unwrap();

        let entity = service.store.conversations().get(&conversation_id).await.unwrap().unwrap();
        assert_eq!(entity.name.as_deref(), Some("Team"));
        let members = service.store.conversations().members(&conversation_id).await.unwrap();
        assert!(members.iter().any(|m| m.user_id == service.self_user_id && m.role == Role::Admin));
        assert!(members.iter().any(|m| m.user_id == other));
    }

    #[tokio::test]
    async fn add_members_refuses_one_to_one() {
        let server = mockito::Server::new_async().await;
        let service = service(&server).await;
        let conversation_id = self_id();
        let entity = wire_sdk_common::ConversationEntity {
            id: conversation_id.clone(),
            name: None,
            team_id: None,
            mls_group_id: MlsGroupId::from_bytes(vec![1]),
            epoch: 0,
            conversation_type: ConversationType::OneToOne,
            protocol: wire_sdk_common::Protocol::Mls,
        };
        service.store.conversations().upsert(&entity).await.unwrap();

        let error = service
            .add_members_to_conversation(&conversation_id, &[self_id()])
            .await
            .unwrap_err();
        assert!(matches!(error, WireError::Forbidden(_)));
    }

    #[tokio::test]
    async fn establish_or_rejoin_is_noop_without_the_flag() {
        let server = mockito::Server::new_async().await;
        let service = service(&server).await;
        service.establish_or_rejoin_conversations().await.unwrap();
    }

    #[tokio::test]
    async fn handle_welcome_refuses_self_conversation() {
        let mut server = mockito::Server::new_async().await;
        let conversation_id = self_id();
        let _mock = server
            .mock("GET", mockito::Matcher::Regex(r"^/conversations/.*".into()))
            .with_status(200)
            .with_body(format!(
                r#"{{"qualified_id":{{"id":"{}","domain":"{}"}},
                    "name":null,"team":null,"group_id":"AAA=","epoch":0,
                    "type":"SELF","protocol":"MLS","members":[]}}"#,
                conversation_id.id, conversation_id.domain
            ))
            .create_async()
            .await;

        let service = service(&server).await;
        let error = service.handle_welcome(&conversation_id, b"welcome").await.unwrap_err();
        assert!(matches!(error, WireError::InvalidState(_)));
    }

    #[tokio::test]
    async fn handle_welcome_tops_up_key_packages_below_the_floor() {
        let mut server = mockito::Server::new_async().await;
        let conversation_id = self_id();
        let _get = server
            .mock("GET", mockito::Matcher::Regex(r"^/conversations/.*".into()))
            .with_status(200)
            .with_body(format!(
                r#"{{"qualified_id":{{"id":"{}","domain":"{}"}},
                    "name":null,"team":null,"group_id":"AAA=","epoch":0,
                    "type":"GROUP","protocol":"MLS","members":[]}}"#,
                conversation_id.id, conversation_id.domain
            ))
            .create_async()
            .await;
        let _upload = server
            .mock("POST", mockito::Matcher::Regex(r"^/mls/key-packages/self/.*".into()))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let service = service(&server).await;
        service.engine.set_key_package_count(DEFAULT_KEYPACKAGE_COUNT / 2 - 1);

        service.handle_welcome(&conversation_id, b"welcome").await.unwrap();

        assert_eq!(service.engine.key_package_count().await.unwrap(), DEFAULT_KEYPACKAGE_COUNT);
        _upload.assert_async().await;
    }
}
