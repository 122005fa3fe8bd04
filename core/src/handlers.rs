//! The app-facing handler surface (§4.7).
//!
//! Two flavors, matching the teacher's own split between fire-and-forget blocking work and
//! suspending async work: a blocking callback is run on the blocking pool via
//! `tokio::task::spawn_blocking` (`coreclient/src/clients/chats.rs`'s
//! `spawn_blocking(move || resize_profile_image(&picture)).await??` pattern), while an
//! [`AsyncHandler`] implementation is simply awaited in place. An event kind with neither
//! installed falls through to a trace-level no-op rather than being dropped silently.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{trace, warn};
use wire_sdk_common::{QualifiedId, WireMessage};

pub type BlockingMessageCallback = dyn Fn(WireMessage) + Send + Sync;
pub type BlockingConversationCallback = dyn Fn(QualifiedId) + Send + Sync;
pub type BlockingMembersCallback = dyn Fn(QualifiedId, Vec<QualifiedId>) + Send + Sync;

/// Suspending counterpart to the blocking callbacks. Every method defaults to a no-op so an
/// application only needs to override the events it cares about.
#[async_trait]
pub trait AsyncHandler: Send + Sync {
    async fn on_message(&self, _message: WireMessage) {
        trace!("on_message: no async handler installed");
    }

    async fn on_conversation_deleted(&self, _conversation_id: QualifiedId) {
        trace!("on_conversation_deleted: no async handler installed");
    }

    async fn on_app_added_to_conversation(&self, _conversation_id: QualifiedId) {
        trace!("on_app_added_to_conversation: no async handler installed");
    }

    async fn on_members_joined(&self, _conversation_id: QualifiedId, _members: Vec<QualifiedId>) {
        trace!("on_members_joined: no async handler installed");
    }

    async fn on_members_left(&self, _conversation_id: QualifiedId, _members: Vec<QualifiedId>) {
        trace!("on_members_left: no async handler installed");
    }
}

/// Holds at most one callback per event kind. A blocking callback, if registered, takes
/// precedence over the async handler for that event kind.
#[derive(Default, Clone)]
pub struct MessageHandlers {
    blocking_on_message: Option<Arc<BlockingMessageCallback>>,
    blocking_on_conversation_deleted: Option<Arc<BlockingConversationCallback>>,
    blocking_on_app_added: Option<Arc<BlockingConversationCallback>>,
    blocking_on_members_joined: Option<Arc<BlockingMembersCallback>>,
    blocking_on_members_left: Option<Arc<BlockingMembersCallback>>,
    async_handler: Option<Arc<dyn AsyncHandler>>,
}

impl MessageHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_async_handler(mut self, handler: Arc<dyn AsyncHandler>) -> Self {
        self.async_handler = Some(handler);
        self
    }

    pub fn with_blocking_on_message(mut self, f: impl Fn(WireMessage) + Send + Sync + 'static) -> Self {
        self.blocking_on_message = Some(Arc::new(f));
        self
    }

    pub fn with_blocking_on_conversation_deleted(mut self, f: impl Fn(QualifiedId) + Send + Sync + 'static) -> Self {
        self.blocking_on_conversation_deleted = Some(Arc::new(f));
        self
    }

    pub fn with_blocking_on_app_added(mut self, f: impl Fn(QualifiedId) + Send + Sync + 'static) -> Self {
        self.blocking_on_app_added = Some(Arc::new(f));
        self
    }

    pub fn with_blocking_on_members_joined(mut self, f: impl Fn(QualifiedId, Vec<QualifiedId>) + Send + Sync + 'static) -> Self {
        self.blocking_on_members_joined = Some(Arc::new(f));
        self
    }

    pub fn with_blocking_on_members_left(mut self, f: impl Fn(QualifiedId, Vec<QualifiedId>) + Send + Sync + 'static) -> Self {
        self.blocking_on_members_left = Some(Arc::new(f));
        self
    }

    pub async fn dispatch_message(&self, message: WireMessage) {
        if let Some(cb) = self.blocking_on_message.clone() {
            if let Err(error) = tokio::task::spawn_blocking(move || cb(message)).await {
                warn!(%error, "on_message handler panicked");
            }
            return;
        }
        match &self.async_handler {
            Some(handler) => handler.on_message(message).await,
            None => trace!("no message handler installed, dropping decoded message"),
        }
    }

    pub async fn dispatch_conversation_deleted(&self, conversation_id: QualifiedId) {
        if let Some(cb) = self.blocking_on_conversation_deleted.clone() {
            if let Err(error) = tokio::task::spawn_blocking(move || cb(conversation_id)).await {
                warn!(%error, "on_conversation_deleted handler panicked");
            }
            return;
        }
        if let Some(handler) = &self.async_handler {
            handler.on_conversation_deleted(conversation_id).await;
        }
    }

    pub async fn dispatch_app_added_to_conversation(&self, conversation_id: QualifiedId) {
        if let Some(cb) = self.blocking_on_app_added.clone() {
            if let Err(error) = tokio::task::spawn_blocking(move || cb(conversation_id)).await {
                warn!(%error, "on_app_added_to_conversation handler panicked");
            }
            return;
        }
        if let Some(handler) = &self.async_handler {
            handler.on_app_added_to_conversation(conversation_id).await;
        }
    }

    pub async fn dispatch_members_joined(&self, conversation_id: QualifiedId, members: Vec<QualifiedId>) {
        if let Some(cb) = self.blocking_on_members_joined.clone() {
            if let Err(error) = tokio::task::spawn_blocking(move || cb(conversation_id, members)).await {
                warn!(%error, "on_members_joined handler panicked");
            }
            return;
        }
        if let Some(handler) = &self.async_handler {
            handler.on_members_joined(conversation_id, members).await;
        }
    }

    pub async fn dispatch_members_left(&self, conversation_id: QualifiedId, members: Vec<QualifiedId>) {
        if let Some(cb) = self.blocking_on_members_left.clone() {
            if let Err(error) = tokio::task::spawn_blocking(move || cb(conversation_id, members)).await {
                warn!(%error, "on_members_left handler panicked");
            }
            return;
        }
        if let Some(handler) = &self.async_handler {
            handler.on_members_left(conversation_id, members).await;
        }
    }
}
