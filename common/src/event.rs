//! The event feed algebra (§3, §4.1).
//!
//! Events arrive either inline in a [`NotificationPage`] during catch-up or one at a time over the
//! live WebSocket; both paths decode into the same [`Event`] sum so [`crate::WireError`]-free
//! dispatch code never has to know which leg delivered them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversation::{ConversationType, Protocol, Role};
use crate::identifiers::QualifiedId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamInvitePayload {
    pub team_id: crate::identifiers::TeamId,
    pub team_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationCreatePayload {
    pub conversation_id: QualifiedId,
    pub name: Option<String>,
    pub conversation_type: ConversationType,
    pub protocol: Protocol,
    pub mls_group_id_base64: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationDeletePayload {
    pub conversation_id: QualifiedId,
}

/// One member as carried by a `MemberJoin` event: unlike `MemberLeave` (which only needs an id to
/// remove), a join must project a role (I2), so the event itself has to carry it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberJoinEntry {
    pub user_id: QualifiedId,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberJoinPayload {
    pub conversation_id: QualifiedId,
    pub members: Vec<MemberJoinEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberLeavePayload {
    pub conversation_id: QualifiedId,
    pub members: Vec<QualifiedId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberUpdatePayload {
    pub conversation_id: QualifiedId,
    pub user_id: QualifiedId,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlsWelcomePayload {
    pub conversation_id: QualifiedId,
    /// Raw MLS `Welcome` message bytes, handed to the crypto engine untouched.
    pub welcome: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMlsMessagePayload {
    pub conversation_id: QualifiedId,
    pub sender: QualifiedId,
    /// Raw MLS application/handshake message bytes.
    pub message: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingPayload {
    pub conversation_id: QualifiedId,
    pub user_id: QualifiedId,
    pub is_typing: bool,
}

/// Decoded but not surfaced on [`crate::message::WireMessage`] — see SPEC_FULL.md's Open
/// Questions resolution: these reach `ConversationService` for bookkeeping only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataTransferPayload {
    pub conversation_id: QualifiedId,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AvailabilityStatus {
    None,
    Available,
    Away,
    Busy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityPayload {
    pub user_id: QualifiedId,
    pub status: AvailabilityStatus,
}

/// A single notification from the event feed, whether replayed from a catch-up page or received
/// live over the WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub received_at: DateTime<Utc>,
    pub event: Event,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    TeamInvite(TeamInvitePayload),
    ConversationCreate(ConversationCreatePayload),
    ConversationDelete(ConversationDeletePayload),
    MemberJoin(MemberJoinPayload),
    MemberLeave(MemberLeavePayload),
    MemberUpdate(MemberUpdatePayload),
    MlsWelcome(MlsWelcomePayload),
    NewMlsMessage(NewMlsMessagePayload),
    Typing(TypingPayload),
    DataTransfer(DataTransferPayload),
    Availability(AvailabilityPayload),
    /// An event type the SDK does not recognize. Dropped after being acknowledged so catch-up
    /// can advance past it.
    Unknown,
}

impl Event {
    /// The conversation a dispatch-relevant event belongs to, used by the event router to pick a
    /// per-conversation queue. `None` for events with no conversation scope (team invites,
    /// availability) or for `Unknown`.
    pub fn conversation_id(&self) -> Option<&QualifiedId> {
        match self {
            Event::ConversationCreate(p) => Some(&p.conversation_id),
            Event::ConversationDelete(p) => Some(&p.conversation_id),
            Event::MemberJoin(p) => Some(&p.conversation_id),
            Event::MemberLeave(p) => Some(&p.conversation_id),
            Event::MemberUpdate(p) => Some(&p.conversation_id),
            Event::MlsWelcome(p) => Some(&p.conversation_id),
            Event::NewMlsMessage(p) => Some(&p.conversation_id),
            Event::Typing(p) => Some(&p.conversation_id),
            Event::DataTransfer(p) => Some(&p.conversation_id),
            Event::TeamInvite(_) | Event::Availability(_) | Event::Unknown => None,
        }
    }
}

/// One page of the paginated catch-up feed (`GET /notifications`, §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPage {
    pub notifications: Vec<Notification>,
    /// `true` when another page is available; the caller keeps paging on `since` until `false`.
    pub has_more: bool,
}
