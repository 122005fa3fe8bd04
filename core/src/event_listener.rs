//! Durable event feed: catch-up paging plus the live WebSocket (C8).
//!
//! `spawn()` follows the teacher's `EventLoop::spawn` idiom exactly: a `CancellationToken` owned
//! by the listener wraps the whole run future via `run_until_cancelled_owned`, so cancelling it
//! from anywhere tears the task down without a separate shutdown channel.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use uuid::Uuid;
use wire_sdk_apiclient::dto::EventEnvelope;
use wire_sdk_apiclient::error::BackendError;
use wire_sdk_apiclient::ApiClient;
use wire_sdk_common::identifiers::CryptoClientId;
use wire_sdk_storage::Store;

use crate::event_router::EventRouter;
use wire_sdk_crypto::CryptoEngine;

/// How long the live WebSocket goes between keepalive pings (§4.1).
const PING_INTERVAL: Duration = Duration::from_secs(20);

/// Page size for the `/notifications` catch-up walk (§4.1).
const CATCH_UP_PAGE_SIZE: u32 = 100;

/// Backoff between catch-up attempts after a transient failure, so a flapping connection doesn't
/// spin the loop hot.
const RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
enum ListenError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
    #[error(transparent)]
    Router(#[from] wire_sdk_common::WireError),
}

impl ListenError {
    /// Mirrors §4.1 step 3/4: a dropped socket or failed connect attempt is recoverable by
    /// looping back to catch-up; anything else (storage corruption, a closed router queue, a
    /// non-transient backend rejection) is fatal.
    fn is_transient(&self) -> bool {
        matches!(
            self,
            ListenError::Backend(BackendError::Http(_) | BackendError::WebSocket(_) | BackendError::Server { .. })
        )
    }
}

/// Hook for connection-state changes, installed/replaced at any time even while `run()` is live.
pub trait BackendConnectionListener: Send + Sync {
    fn on_connected(&self) {}
    fn on_disconnected(&self) {}
}

pub struct EventListener<E> {
    api: ApiClient,
    store: Store,
    router: EventRouter<E>,
    client_id: CryptoClientId,
    cancel: CancellationToken,
    connection_listener: Mutex<Option<Arc<dyn BackendConnectionListener>>>,
}

impl<E: CryptoEngine + 'static> EventListener<E> {
    pub fn new(api: ApiClient, store: Store, router: EventRouter<E>, client_id: CryptoClientId) -> Arc<Self> {
        Arc::new(Self {
            api,
            store,
            router,
            client_id,
            cancel: CancellationToken::new(),
            connection_listener: Mutex::new(None),
        })
    }

    pub fn set_backend_connection_listener(&self, listener: Option<Arc<dyn BackendConnectionListener>>) {
        *self.connection_listener.lock().unwrap() = listener;
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawns the run loop as an owned, cancellable task. Stops once `cancel_token()` is
    /// cancelled, or when a non-transient error terminates `run()` on its own.
    pub fn spawn(self: Arc<Self>) {
        let cancel = self.cancel.clone();
        tokio::spawn(cancel.run_until_cancelled_owned(self.run()));
    }

    async fn run(self: Arc<Self>) {
        loop {
            if let Err(error) = self.catch_up().await {
                if error.is_transient() {
                    warn!(%error, "catch-up hit a transient error, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                    continue;
                }
                error!(%error, "catch-up failed with a non-transient error, stopping event listener");
                self.notify_disconnected();
                return;
            }

            match self.websocket_loop().await {
                Ok(()) => continue,
                Err(error) => {
                    error!(%error, "event listener terminating on non-transient error");
                    self.notify_disconnected();
                    return;
                }
            }
        }
    }

    /// Pages `/notifications` from the persisted cursor (seeding it from the backend's latest
    /// notification id on first run) until caught up.
    async fn catch_up(&self) -> Result<(), ListenError> {
        let mut since = self.store.app().last_notification_id().await?;
        if since.is_none() {
            since = self.api.last_notification_id().await?;
            if let Some(id) = since {
                self.store.app().set_last_notification_id(id).await?;
            }
        }

        loop {
            let page = self.api.notifications_since(since, CATCH_UP_PAGE_SIZE).await?.into_page(Utc::now());
            for notification in page.notifications {
                self.router.route(notification.clone()).await?;
                self.store.app().set_last_notification_id(notification.id).await?;
                since = Some(notification.id);
            }
            if !page.has_more {
                break;
            }
        }
        Ok(())
    }

    /// Runs one WebSocket session to completion. Returns `Ok(())` whenever the session ends in a
    /// way the caller should recover from by reconnecting (closed socket, ping failure, a failed
    /// connect attempt); only a closed event router surfaces as `Err`.
    async fn websocket_loop(&self) -> Result<(), ListenError> {
        let mut connection = match self.api.connect_websocket(self.client_id.as_str()).await {
            Ok(connection) => connection,
            Err(error) => {
                warn!(%error, "failed to open event websocket, will retry");
                return Ok(());
            }
        };
        self.notify_connected();

        let mut processed = HashSet::new();
        let mut ping_interval = tokio::time::interval(PING_INTERVAL);
        ping_interval.reset();

        loop {
            tokio::select! {
                _ = ping_interval.tick() => {
                    if let Err(error) = connection.send_ping().await {
                        warn!(%error, "event websocket ping failed, reconnecting");
                        return Ok(());
                    }
                }
                frame = connection.recv() => {
                    match frame {
                        Ok(Some(bytes)) => self.handle_frame(&bytes, &mut processed).await?,
                        Ok(None) => {
                            warn!("event websocket closed, reconnecting");
                            return Ok(());
                        }
                        Err(error) => {
                            warn!(%error, "event websocket error, reconnecting");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn handle_frame(&self, bytes: &[u8], processed: &mut HashSet<Uuid>) -> Result<(), ListenError> {
        let envelope: EventEnvelope = match serde_json::from_slice(bytes) {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!(%error, "failed to decode event frame, dropping it");
                return Ok(());
            }
        };
        let transient = envelope.transient;
        for notification in envelope.into_notifications(Utc::now()) {
            if transient || processed.contains(&notification.id) {
                continue;
            }
            processed.clear();
            self.router.route(notification.clone()).await?;
            self.store.app().set_last_notification_id(notification.id).await?;
            processed.insert(notification.id);
        }
        Ok(())
    }

    fn notify_connected(&self) {
        if let Some(listener) = self.connection_listener.lock().unwrap().clone() {
            listener.on_connected();
        }
    }

    fn notify_disconnected(&self) {
        if let Some(listener) = self.connection_listener.lock().unwrap().clone() {
            listener.on_disconnected();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use wire_sdk_crypto::FakeCryptoEngine;

    use super::*;
    use crate::conversation_service::ConversationService;
    use crate::handlers::MessageHandlers;
    use crate::mls_fallback::MlsFallback;

    struct RecordingListener {
        connected: Arc<AtomicBool>,
        disconnected: Arc<AtomicBool>,
    }

    impl BackendConnectionListener for RecordingListener {
        fn on_connected(&self) {
            self.connected.store(true, Ordering::SeqCst);
        }

        fn on_disconnected(&self) {
            self.disconnected.store(true, Ordering::SeqCst);
        }
    }

    async fn listener_for_test(server_url: &str) -> Arc<EventListener<FakeCryptoEngine>> {
        let api = ApiClient::bearer_token(url::Url::parse(server_url).unwrap(), "token").unwrap();
        let pool = wire_sdk_storage::open(":memory:").await.unwrap();
        let (store, _rx) = Store::new(pool);
        let self_user_id = wire_sdk_common::QualifiedId::new(Uuid::new_v4(), "example.com");
        let client_id = CryptoClientId::new(self_user_id.id, "device1", &self_user_id.domain);
        let engine = Arc::new(FakeCryptoEngine::new(client_id.clone()));
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
            EventRouter::new(engine, api.clone(), store.clone(), conversation_service, fallback, MessageHandlers::new());
        EventListener::new(api, store, router, client_id)
    }

    #[tokio::test]
    async fn catch_up_seeds_cursor_from_last_notification_when_absent() {
        let mut server = mockito::Server::new_async().await;
        let notification_id = Uuid::new_v4();
        let _last = server
            .mock("GET", "/notifications/last")
            .with_status(200)
            .with_body(format!(r#"{{"id":"{notification_id}"}}"#))
            .create_async()
            .await;
        let _page = server
            .mock("GET", mockito::Matcher::Regex(r"^/notifications\?.*".into()))
            .with_status(200)
            .with_body(r#"{"notifications":[],"has_more":false}"#)
            .create_async()
            .await;

        let listener = listener_for_test(&server.url()).await;
        listener.catch_up().await.unwrap();

        let stored = listener.store.app().last_notification_id().await.unwrap();
        assert_eq!(stored, Some(notification_id));
    }

    #[tokio::test]
    async fn connection_listener_can_be_replaced_while_idle() {
        let server = mockito::Server::new_async().await;
        let listener = listener_for_test(&server.url()).await;
        let connected = Arc::new(AtomicBool::new(false));
        let disconnected = Arc::new(AtomicBool::new(false));
        listener.set_backend_connection_listener(Some(Arc::new(RecordingListener {
            connected: connected.clone(),
            disconnected: disconnected.clone(),
        })));
        listener.notify_connected();
        listener.notify_disconnected();
        assert!(connected.load(Ordering::SeqCst));
        assert!(disconnected.load(Ordering::SeqCst));
    }
}
