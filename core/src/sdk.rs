//! Top-level composition root and public SDK handle.
//!
//! Ties together every collaborator named in §2's control/data flow: `EventListener` (C8) feeds
//! `EventRouter` (C7), which drives `ConversationStore`/`CryptoEngine` and calls into
//! `ConversationService` (C5); `AppManager` (C10) is the outbound façade over the same
//! `ConversationService`/`MlsFallback` (C6); `CryptoBootstrap` (C9) runs once, here, before
//! anything else is constructed. This is the SDK's one composition root — per the REDESIGN FLAGS
//! note on replacing dynamic DI wiring, every concrete type is built once in `Sdk::start` and
//! handed out by reference or clone from then on; there is no other place in the crate that
//! constructs an `ApiClient` or a `Store`.

use std::sync::Arc;

use url::Url;
use wire_sdk_apiclient::ApiClient;
use wire_sdk_common::identifiers::QualifiedId;
use wire_sdk_common::WireError;
use wire_sdk_crypto::openmls_engine::ciphersuite_from_wire;
use wire_sdk_crypto::OpenMlsCryptoEngine;
use wire_sdk_storage::Store;

use crate::app_manager::AppManager;
use crate::config::Settings;
use crate::conversation_service::ConversationService;
use crate::crypto_bootstrap::CryptoBootstrap;
use crate::error::storage_err;
use crate::event_listener::{BackendConnectionListener, EventListener};
use crate::event_router::EventRouter;
use crate::handlers::MessageHandlers;
use crate::mls_fallback::MlsFallback;

/// The SDK's public handle. Holds every long-lived collaborator constructed in [`Sdk::start`].
/// [`Sdk::close`] cancels the listener first (stops new events from entering the router), then
/// the router's own per-conversation workers (§5's resource-cleanup rule); the remaining handles
/// are `Arc`/clone-based and are simply dropped afterward along with `self`, in field declaration
/// order, which carries no ordering guarantee of its own.
pub struct Sdk {
    api: ApiClient,
    store: Store,
    self_user_id: QualifiedId,
    conversation_service: Arc<ConversationService<OpenMlsCryptoEngine>>,
    fallback: Arc<MlsFallback<OpenMlsCryptoEngine>>,
    router: EventRouter<OpenMlsCryptoEngine>,
    listener: Arc<EventListener<OpenMlsCryptoEngine>>,
    app_manager: AppManager<OpenMlsCryptoEngine>,
}

impl Sdk {
    /// Runs the full startup sequence: build the backend client, open storage, bootstrap (or
    /// reload) the device identity and crypto engine (C9), rejoin any conversation this device
    /// missed while offline (§4.3), then start the live event feed (C8). Returns once the SDK is
    /// ready to send and receive; the event listener keeps running in the background until
    /// [`Sdk::close`].
    pub async fn start(settings: Settings, handlers: MessageHandlers) -> Result<Self, WireError> {
        let base_url = Url::parse(&settings.application.api_host)
            .map_err(|e| WireError::invalid_parameter(format!("invalid api_host: {e}")))?;

        let api = match &settings.demo_login {
            Some(demo) => ApiClient::demo_login(base_url, demo.email.clone(), demo.password.clone())?,
            None => {
                let token = settings
                    .application
                    .api_token
                    .clone()
                    .ok_or_else(|| WireError::missing_parameter("application.api_token or demo_login must be set"))?;
                ApiClient::bearer_token(base_url, token)?
            }
        };

        let pool = wire_sdk_storage::open(&settings.application.db_path).await.map_err(storage_err)?;
        let (store, _notifications) = Store::new(pool);

        let outcome = CryptoBootstrap::run(&settings, &api, &store, |client_id, ciphersuite| {
            let suite = ciphersuite_from_wire(ciphersuite)?;
            OpenMlsCryptoEngine::new(client_id, suite).map_err(WireError::from)
        })
        .await?;

        api.set_client_id(outcome.client_id.as_str());
        let self_user_id = QualifiedId::new(settings.user_id, outcome.domain.as_str());

        let fallback = Arc::new(MlsFallback::new(outcome.engine.clone(), api.clone(), store.clone()));
        let conversation_service = Arc::new(ConversationService::new(
            outcome.engine.clone(),
            api.clone(),
            store.clone(),
            fallback.clone(),
            outcome.ciphersuite,
            self_user_id.clone(),
        ));

        // §4.3: recover any conversation this device was added to before its first successful
        // registration caught up with the backend's notification feed.
        conversation_service.establish_or_rejoin_conversations().await?;

        let router = EventRouter::new(
            outcome.engine.clone(),
            api.clone(),
            store.clone(),
            conversation_service.clone(),
            fallback.clone(),
            handlers,
        );
        let listener = EventListener::new(api.clone(), store.clone(), router.clone(), outcome.client_id.clone());
        listener.clone().spawn();

        let app_manager = AppManager::new(
            outcome.engine,
            api.clone(),
            store.clone(),
            conversation_service.clone(),
            fallback.clone(),
            self_user_id.clone(),
            settings.application.max_asset_size,
        );

        Ok(Self { api, store, self_user_id, conversation_service, fallback, router, listener, app_manager })
    }

    /// The app-facing façade for sending messages/assets and managing conversations (C10).
    pub fn app_manager(&self) -> &AppManager<OpenMlsCryptoEngine> {
        &self.app_manager
    }

    /// Direct access to conversation lifecycle operations (C5), for callers that need finer
    /// control than `app_manager()` exposes (e.g. role updates).
    pub fn conversation_service(&self) -> &Arc<ConversationService<OpenMlsCryptoEngine>> {
        &self.conversation_service
    }

    pub fn fallback(&self) -> &Arc<MlsFallback<OpenMlsCryptoEngine>> {
        &self.fallback
    }

    pub fn self_user_id(&self) -> &QualifiedId {
        &self.self_user_id
    }

    pub fn api_client(&self) -> &ApiClient {
        &self.api
    }

    /// Installs or clears the connection-state hook on the live event listener (§4.1).
    pub fn set_backend_connection_listener(&self, listener: Option<Arc<dyn BackendConnectionListener>>) {
        self.listener.set_backend_connection_listener(listener);
    }

    /// Cancels the listener loop and every per-conversation router worker, in that order (§5's
    /// resource-cleanup rule), then drops the remaining handles.
    pub async fn close(self) {
        self.listener.cancel_token().cancel();
        self.router.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_fails_fast_without_token_or_demo_login() {
        let settings = Settings {
            user_id: uuid::Uuid::new_v4(),
            application: crate::config::ApplicationSettings {
                api_host: "http://127.0.0.1:1/".to_string(),
                api_token: None,
                db_path: ":memory:".to_string(),
                log: "info".to_string(),
                cryptography_storage_key: base64_32_bytes(),
                max_asset_size: 1024,
            },
            demo_login: None,
        };
        let error = Sdk::start(settings, MessageHandlers::new()).await.unwrap_err();
        assert!(matches!(error, WireError::MissingParameter(_)));
    }

    fn base64_32_bytes() -> String {
        use base64::Engine as _;
        base64::engine::general_purpose::STANDARD.encode([0u8; 32])
    }
}
