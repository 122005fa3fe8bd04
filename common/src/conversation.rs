//! Conversation and membership data model (§3).

use serde::{Deserialize, Serialize};

use crate::identifiers::{MlsGroupId, QualifiedId, TeamId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationType {
    Group,
    OneToOne,
    #[serde(rename = "SELF")]
    SelfConversation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    Mls,
    Proteus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Member,
}

/// A locally-projected conversation. Unique by `id` (I2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationEntity {
    pub id: QualifiedId,
    pub name: Option<String>,
    pub team_id: Option<TeamId>,
    pub mls_group_id: MlsGroupId,
    pub epoch: u64,
    pub conversation_type: ConversationType,
    pub protocol: Protocol,
}

impl ConversationEntity {
    pub fn is_mls(&self) -> bool {
        matches!(self.protocol, Protocol::Mls)
    }
}

/// Keyed by `(conversation_id, user_id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationMember {
    pub user_id: QualifiedId,
    pub role: Role,
}

/// Reserved keys in the `app` key/value bookkeeping table.
pub mod app_data_keys {
    pub const DEVICE_ID: &str = "device_id";
    pub const LAST_NOTIFICATION_ID: &str = "last_notification_id";
    pub const SHOULD_REJOIN_CONVERSATIONS: &str = "should_rejoin_conversations";
}
