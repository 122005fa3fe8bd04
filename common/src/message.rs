//! The `WireMessage` algebra (§3, §4.6).
//!
//! This is a closed tagged sum with an `Unknown`/`Ignored` catch-all so a schema addition on the
//! wire degrades to a dropped message instead of a decode failure, per the REDESIGN FLAGS note on
//! modelling the protobuf message algebra as a closed sum.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identifiers::QualifiedId;

/// Fields every content-carrying variant has.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub id: Uuid,
    pub conversation_id: QualifiedId,
    pub sender: QualifiedId,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptType {
    Delivered,
    Read,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    pub user_id: QualifiedId,
    pub offset: u32,
    pub length: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRemoteData {
    pub asset_id: String,
    pub asset_domain: Option<String>,
    pub asset_token: Option<String>,
    pub otr_key: Vec<u8>,
    pub sha256: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetMetadata {
    pub mime_type: String,
    pub size: u64,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeItem {
    pub text: Option<String>,
    pub button_ids: Vec<String>,
}

/// The subset of `WireMessage` an [`WireMessage::Ephemeral`] may wrap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EphemeralContent {
    Text { text: String, mentions: Vec<Mention> },
    Asset { asset: AssetRemoteData, metadata: AssetMetadata },
    Knock,
    Location { latitude: f32, longitude: f32, name: Option<String>, zoom: Option<i32> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireMessage {
    Text {
        header: MessageHeader,
        text: String,
        mentions: Vec<Mention>,
        quoted_message_id: Option<Uuid>,
    },
    Asset {
        header: MessageHeader,
        asset: AssetRemoteData,
        metadata: AssetMetadata,
    },
    Composite {
        header: MessageHeader,
        items: Vec<CompositeItem>,
    },
    Button {
        header: MessageHeader,
        button_id: String,
        text: String,
    },
    ButtonAction {
        header: MessageHeader,
        button_id: String,
        reference_message_id: Uuid,
    },
    ButtonActionConfirmation {
        header: MessageHeader,
        /// Omitted on the wire when `None` (§4.6).
        button_id: Option<String>,
        reference_message_id: Uuid,
    },
    Knock {
        header: MessageHeader,
    },
    Location {
        header: MessageHeader,
        latitude: f32,
        longitude: f32,
        name: Option<String>,
        zoom: Option<i32>,
    },
    Deleted {
        header: MessageHeader,
        deleted_message_id: Uuid,
    },
    TextEdited {
        header: MessageHeader,
        replacing_message_id: Uuid,
        text: String,
        mentions: Vec<Mention>,
    },
    CompositeEdited {
        header: MessageHeader,
        replacing_message_id: Uuid,
        items: Vec<CompositeItem>,
    },
    Receipt {
        header: MessageHeader,
        receipt_type: ReceiptType,
        message_ids: Vec<Uuid>,
    },
    Reaction {
        header: MessageHeader,
        reference_message_id: Uuid,
        emojis: Vec<String>,
    },
    InCallEmoji {
        header: MessageHeader,
        emojis: std::collections::HashMap<String, i32>,
    },
    InCallHandRaise {
        header: MessageHeader,
        is_hand_up: bool,
    },
    /// Wraps exactly one of `Text`/`Asset`/`Knock`/`Location`; `expire_after_millis` is lifted out
    /// of the protobuf wrapper so callers match on one shape instead of duplicating every field.
    Ephemeral {
        header: MessageHeader,
        expire_after_millis: u64,
        content: Box<EphemeralContent>,
    },
    /// A recognized-but-uninteresting payload (e.g. a `Receipt` with an unknown confirmation
    /// type, or an `Edited` with neither text nor composite content).
    Ignored,
    /// An unrecognized top-level content tag.
    Unknown,
}

impl WireMessage {
    pub fn header(&self) -> Option<&MessageHeader> {
        match self {
            WireMessage::Text { header, .. }
            | WireMessage::Asset { header, .. }
            | WireMessage::Composite { header, .. }
            | WireMessage::Button { header, .. }
            | WireMessage::ButtonAction { header, .. }
            | WireMessage::ButtonActionConfirmation { header, .. }
            | WireMessage::Knock { header }
            | WireMessage::Location { header, .. }
            | WireMessage::Deleted { header, .. }
            | WireMessage::TextEdited { header, .. }
            | WireMessage::CompositeEdited { header, .. }
            | WireMessage::Receipt { header, .. }
            | WireMessage::Reaction { header, .. }
            | WireMessage::InCallEmoji { header, .. }
            | WireMessage::InCallHandRaise { header, .. }
            | WireMessage::Ephemeral { header, .. } => Some(header),
            WireMessage::Ignored | WireMessage::Unknown => None,
        }
    }

    pub fn id(&self) -> Option<Uuid> {
        self.header().map(|h| h.id)
    }
}
