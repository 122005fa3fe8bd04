//! Shared types for the Wire app SDK.
//!
//! This crate has no I/O of its own: identifiers, the [`message::WireMessage`] and
//! [`event::Event`] algebras, and the [`error::WireError`] taxonomy that every other crate in the
//! workspace maps its own errors into at the boundary.

pub mod conversation;
pub mod error;
pub mod event;
pub mod identifiers;
pub mod message;

pub use conversation::{ConversationEntity, ConversationMember, ConversationType, Protocol, Role};
pub use error::WireError;
pub use event::{Event, Notification, NotificationPage};
pub use identifiers::{CryptoClientId, MlsGroupId, QualifiedId, TeamId};
pub use message::{MessageHeader, WireMessage};
