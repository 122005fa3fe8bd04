//! Conversation lifecycle, event dispatch, and the app-facing operations of the Wire SDK (C5–C10).
//!
//! This crate owns no wire format and no MLS state of its own — it composes
//! [`wire_sdk_storage`], [`wire_sdk_crypto`] and [`wire_sdk_apiclient`] into the operations an
//! application actually calls: create/join/leave a conversation, send/receive a message, keep the
//! local projection in sync with the backend's event feed.

pub mod app_manager;
pub mod config;
pub mod conversation_service;
pub mod crypto_bootstrap;
pub mod error;
pub mod event_listener;
pub mod event_router;
pub mod handlers;
pub mod logging;
pub mod mls_fallback;
pub mod sdk;

pub use app_manager::AppManager;
pub use config::Settings;
pub use conversation_service::ConversationService;
pub use crypto_bootstrap::CryptoBootstrap;
pub use event_listener::EventListener;
pub use event_router::EventRouter;
pub use handlers::MessageHandlers;
pub use mls_fallback::MlsFallback;
pub use sdk::Sdk;
