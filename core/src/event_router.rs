//! Per-conversation ordered event dispatch (C7).
//!
//! One bounded `mpsc` queue per conversation, each drained by exactly one `tokio::spawn`-ed
//! worker, gives FIFO processing within a conversation while different conversations make
//! progress in parallel. The queue map itself is a `DashMap`, the same "concurrent map of
//! per-entity task state" shape the teacher's `applogic` attachments registry uses for exactly
//! the same reason (`attachments_repository.rs`'s `InProgressMap`).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, Entry};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};
use wire_sdk_apiclient::ApiClient;
use wire_sdk_common::conversation::ConversationType;
use wire_sdk_common::event::{Event, Notification};
use wire_sdk_common::WireError;
use wire_sdk_crypto::{CryptoEngine, DecryptOutcome};
use wire_sdk_storage::Store;

use crate::conversation_service::ConversationService;
use crate::error::storage_err;
use crate::handlers::MessageHandlers;
use crate::mls_fallback::MlsFallback;

/// `"<id>@<domain>"` for conversation-scoped events, or the fixed non-conversation key.
type ChannelKey = String;

const NON_CONVERSATION_KEY: &str = "$non-conversation";

/// Queues with no traffic for this long become eligible for reaping once their sender has no
/// other clones in flight.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Bounded capacity of each per-conversation queue; `route()` suspends rather than drop once full.
const DEFAULT_QUEUE_CAPACITY: usize = 256;

struct Inner<E> {
    engine: Arc<E>,
    api: ApiClient,
    store: Store,
    conversation_service: Arc<ConversationService<E>>,
    fallback: Arc<MlsFallback<E>>,
    handlers: MessageHandlers,
    channels: DashMap<ChannelKey, mpsc::Sender<Notification>>,
    queue_capacity: usize,
    idle_timeout: Duration,
    cancel: CancellationToken,
}

pub struct EventRouter<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for EventRouter<E> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<E: CryptoEngine + 'static> EventRouter<E> {
    pub fn new(
        engine: Arc<E>,
        api: ApiClient,
        store: Store,
        conversation_service: Arc<ConversationService<E>>,
        fallback: Arc<MlsFallback<E>>,
        handlers: MessageHandlers,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                api,
                store,
                conversation_service,
                fallback,
                handlers,
                channels: DashMap::new(),
                queue_capacity: DEFAULT_QUEUE_CAPACITY,
                idle_timeout: DEFAULT_IDLE_TIMEOUT,
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Cancels every per-conversation worker. Queued-but-undrained events are dropped; the
    /// caller is expected to be shutting down the whole SDK at this point.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    /// Enqueues `notification` onto its conversation's queue, spawning the queue's worker on
    /// first use. Suspends if the queue is full (backpressure, never drops).
    pub async fn route(&self, notification: Notification) -> Result<(), WireError> {
        let key = channel_key(&notification.event);
        let sender = self.channel_for(&key);
        sender
            .send(notification)
            .await
            .map_err(|_| WireError::invalid_state("event queue closed"))
    }

    fn channel_for(&self, key: &str) -> mpsc::Sender<Notification> {
        match self.inner.channels.entry(key.to_string()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let (tx, rx) = mpsc::channel(self.inner.queue_capacity);
                let worker = self.clone();
                let worker_key = key.to_string();
                let cancel = self.inner.cancel.child_token();
                tokio::spawn(cancel.run_until_cancelled_owned(worker.drain(worker_key, rx)));
                entry.insert(tx.clone());
                tx
            }
        }
    }

    async fn drain(self, key: ChannelKey, mut rx: mpsc::Receiver<Notification>) {
        loop {
            match tokio::time::timeout(self.inner.idle_timeout, rx.recv()).await {
                Ok(Some(notification)) => {
                    if let Err(error) = self.process(notification.event, notification.received_at).await {
                        warn!(channel = %key, %error, "event processing failed");
                    }
                }
                Ok(None) => break,
                Err(_elapsed) => {
                    // Best-effort: nothing arrived within the idle window and the DashMap's own
                    // clone is the only one left, so no `route()` call is concurrently holding
                    // this sender.
                    let reaped = self.inner.channels.remove_if(&key, |_, sender| sender.strong_count() <= 1);
                    if reaped.is_some() {
                        break;
                    }
                }
            }
        }
    }

    async fn process(&self, event: Event, received_at: DateTime<Utc>) -> Result<(), WireError> {
        match event {
            Event::TeamInvite(payload) => {
                self.inner.api.confirm_team_invite(&payload.team_id).await?;
                self.inner.store.teams().upsert(payload.team_id, &payload.team_name).await.map_err(storage_err)
            }
            Event::ConversationCreate(payload) => {
                if payload.conversation_type == ConversationType::SelfConversation {
                    return Err(WireError::invalid_state(format!(
                        "refusing self-conversation create event for {}",
                        payload.conversation_id
                    )));
                }
                let response = self.inner.api.get_conversation(&payload.conversation_id).await?;
                self.inner.conversation_service.persist_conversation(&response).await
            }
            Event::ConversationDelete(payload) => {
                if let Some(entity) =
                    self.inner.store.conversations().get(&payload.conversation_id).await.map_err(storage_err)?
                {
                    self.inner.engine.wipe_conversation(&entity.mls_group_id).await?;
                }
                self.inner.store.conversations().delete(&payload.conversation_id).await.map_err(storage_err)?;
                self.inner.handlers.dispatch_conversation_deleted(payload.conversation_id).await;
                Ok(())
            }
            Event::MemberJoin(payload) => {
                for member in &payload.members {
                    self.inner
                        .store
                        .conversations()
                        .upsert_member(&payload.conversation_id, &member.user_id, member.role)
                        .await
                        .map_err(storage_err)?;
                }
                let joined = payload.members.into_iter().map(|m| m.user_id).collect();
                self.inner.handlers.dispatch_members_joined(payload.conversation_id, joined).await;
                Ok(())
            }
            Event::MemberLeave(payload) => {
                for user_id in &payload.members {
                    self.inner
                        .store
                        .conversations()
                        .remove_member(&payload.conversation_id, user_id)
                        .await
                        .map_err(storage_err)?;
                }
                self.inner.handlers.dispatch_members_left(payload.conversation_id, payload.members).await;
                Ok(())
            }
            Event::MemberUpdate(payload) => self
                .inner
                .store
                .conversations()
                .upsert_member(&payload.conversation_id, &payload.user_id, payload.role)
                .await
                .map_err(storage_err),
            Event::MlsWelcome(payload) => {
                self.inner.conversation_service.handle_welcome(&payload.conversation_id, &payload.welcome).await?;
                self.inner.handlers.dispatch_app_added_to_conversation(payload.conversation_id).await;
                Ok(())
            }
            Event::NewMlsMessage(payload) => self.process_new_mls_message(payload, received_at).await,
            Event::Typing(_) => Ok(()),
            Event::DataTransfer(_) | Event::Availability(_) => Ok(()),
            Event::Unknown => {
                trace!("dropping unrecognized event");
                Ok(())
            }
        }
    }

    async fn process_new_mls_message(
        &self,
        payload: wire_sdk_common::event::NewMlsMessagePayload,
        received_at: DateTime<Utc>,
    ) -> Result<(), WireError> {
        let entity = self
            .inner
            .store
            .conversations()
            .get(&payload.conversation_id)
            .await
            .map_err(storage_err)?
            .ok_or_else(|| WireError::entity_not_found(payload.conversation_id.to_string()))?;

        match self.inner.engine.decrypt_mls(&entity.mls_group_id, &payload.message).await {
            Ok(DecryptOutcome::Message(bytes)) => {
                let message = wire_sdk_protos::decode(&bytes, payload.conversation_id, payload.sender, received_at);
                self.inner.handlers.dispatch_message(message).await;
                Ok(())
            }
            Ok(DecryptOutcome::EpochUpdate) => {
                let epoch = self.inner.engine.conversation_epoch(&entity.mls_group_id).await?;
                self.inner.store.conversations().set_epoch(&payload.conversation_id, epoch).await.map_err(storage_err)
            }
            Err(error) => {
                warn!(
                    conversation_id = %payload.conversation_id,
                    %error,
                    "decrypt failed, checking for epoch drift (no retry this pass)"
                );
                self.inner.fallback.verify_conversation_out_of_sync(&entity.mls_group_id, &payload.conversation_id).await
            }
        }
    }
}

fn channel_key(event: &Event) -> ChannelKey {
    event.conversation_id().map(|id| id.channel_key()).unwrap_or_else(|| NON_CONVERSATION_KEY.to_string())
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;
    use wire_sdk_common::event::{MemberJoinEntry, MemberJoinPayload};
    use wire_sdk_common::identifiers::{CryptoClientId, MlsGroupId, QualifiedId};
    use wire_sdk_common::{ConversationEntity, Protocol, Role};
    use wire_sdk_crypto::FakeCryptoEngine;

    use super::*;

    fn qid() -> QualifiedId {
        QualifiedId::new(Uuid::new_v4(), "example.com")
    }

    async fn router_for_test(server_url: &str) -> (EventRouter<FakeCryptoEngine>, Store) {
        let api = ApiClient::bearer_token(url::Url::parse(server_url).unwrap(), "token").unwrap();
        let pool = wire_sdk_storage::open(":memory:").await.unwrap();
        let (store, _rx) = Store::new(pool);
        let self_user_id = qid();
        let client_id = CryptoClientId::new(self_user_id.id, "device1", &self_user_id.domain);
        let engine = Arc::new(FakeCryptoEngine::new(client_id));
        let fallback = Arc::new(MlsFallback::new(engine.clone(), api.clone(), store.clone()));
        let conversation_service = Arc::new(ConversationService::new(
            engine.clone(),
            api.clone(),
            store.clone(),
            fallback.clone(),
            0xf031,
            self_user_id,
        ));
        let router =
            EventRouter::new(engine, api, store.clone(), conversation_service, fallback, MessageHandlers::new());
        (router, store)
    }

    fn notification(event: Event) -> Notification {
        Notification { id: Uuid::new_v4(), received_at: Utc::now(), event }
    }

    #[tokio::test]
    async fn member_join_is_projected_in_fifo_order() {
        let server = mockito::Server::new_async().await;
        let (router, store) = router_for_test(&server.url()).await;

        let conversation_id = qid();
        let entity = ConversationEntity {
            id: conversation_id.clone(),
            name: None,
            team_id: None,
            mls_group_id: MlsGroupId::from_bytes(vec![9]),
            epoch: 0,
            conversation_type: ConversationType::Group,
            protocol: Protocol::Mls,
        };
        store.conversations().upsert(&entity).await.unwrap();

        let first = qid();
        let second = qid();
        router
            .route(notification(Event::MemberJoin(MemberJoinPayload {
                conversation_id: conversation_id.clone(),
                members: vec![MemberJoinEntry { user_id: first.clone(), role: Role::Member }],
            })))
            .await
            .unwrap();
        router
            .route(notification(Event::MemberJoin(MemberJoinPayload {
                conversation_id: conversation_id.clone(),
                members: vec![MemberJoinEntry { user_id: second.clone(), role: Role::Admin }],
            })))
            .await
            .unwrap();

        // Give the single-consumer worker a chance to drain both queued events.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let members = store.conversations().members(&conversation_id).await.unwrap();
        assert!(members.iter().any(|m| m.user_id == first && m.role == Role::Member));
        assert!(members.iter().any(|m| m.user_id == second && m.role == Role::Admin));
    }

    #[tokio::test]
    async fn unknown_event_is_dropped_without_error() {
        let server = mockito::Server::new_async().await;
        let (router, _store) = router_for_test(&server.url()).await;
        router.route(notification(Event::Unknown)).await.unwrap();
    }
}
