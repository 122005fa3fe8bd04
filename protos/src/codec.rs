use chrono::{DateTime, Utc};
use prost::Message as _;
use uuid::Uuid;
use wire_sdk_common::identifiers::QualifiedId;
use wire_sdk_common::message::{
    AssetMetadata, AssetRemoteData, CompositeItem, EphemeralContent, Mention, MessageHeader,
    ReceiptType, WireMessage,
};

use crate::{generic_message, message_edit, ephemeral};
use crate::{
    Asset, ButtonAction, ButtonActionConfirmation, Button, Composite, Confirmation,
    ConfirmationType, Ephemeral, GenericMessage, Hidden, InCallEmoji, InCallHandRaise, Knock,
    Location, MessageEdit, Mention as ProtoMention, Reaction, Text,
};

fn mention_to_proto(m: &Mention) -> ProtoMention {
    ProtoMention {
        user_id: Some(crate::QualifiedUserId {
            uuid: m.user_id.id.to_string(),
            domain: m.user_id.domain.clone(),
        }),
        offset: m.offset,
        length: m.length,
    }
}

fn mention_from_proto(m: &ProtoMention) -> Option<Mention> {
    let user_id = m.user_id.as_ref()?;
    Some(Mention {
        user_id: QualifiedId::new(user_id.uuid.parse().ok()?, user_id.domain.clone()),
        offset: m.offset,
        length: m.length,
    })
}

fn composite_items_to_proto(items: &[CompositeItem]) -> Vec<crate::CompositeItem> {
    items
        .iter()
        .map(|i| crate::CompositeItem {
            text: i.text.clone(),
            button_ids: i.button_ids.clone(),
        })
        .collect()
}

fn composite_items_from_proto(items: &[crate::CompositeItem]) -> Vec<CompositeItem> {
    items
        .iter()
        .map(|i| CompositeItem {
            text: i.text.clone(),
            button_ids: i.button_ids.clone(),
        })
        .collect()
}

fn asset_to_proto(asset: &AssetRemoteData, metadata: &AssetMetadata) -> Asset {
    Asset {
        remote: Some(crate::asset::RemoteData {
            asset_id: asset.asset_id.clone(),
            asset_domain: asset.asset_domain.clone(),
            asset_token: asset.asset_token.clone(),
            otr_key: asset.otr_key.clone(),
            sha256: asset.sha256.clone(),
        }),
        mime_type: metadata.mime_type.clone(),
        size: metadata.size,
        name: metadata.name.clone(),
    }
}

fn asset_from_proto(asset: &Asset) -> Option<(AssetRemoteData, AssetMetadata)> {
    let remote = asset.remote.as_ref()?;
    Some((
        AssetRemoteData {
            asset_id: remote.asset_id.clone(),
            asset_domain: remote.asset_domain.clone(),
            asset_token: remote.asset_token.clone(),
            otr_key: remote.otr_key.clone(),
            sha256: remote.sha256.clone(),
        },
        AssetMetadata {
            mime_type: asset.mime_type.clone(),
            size: asset.size,
            name: asset.name.clone(),
        },
    ))
}

fn location_to_proto(latitude: f32, longitude: f32, name: &Option<String>, zoom: &Option<i32>) -> Location {
    Location {
        latitude,
        longitude,
        name: name.clone(),
        zoom: *zoom,
    }
}

/// Encodes a [`WireMessage`] to protobuf bytes. Returns `None` for [`WireMessage::Ignored`] and
/// [`WireMessage::Unknown`], which carry no wire representation.
pub fn encode(message: &WireMessage) -> Option<Vec<u8>> {
    let header = message.header()?;
    let message_id = header.id.to_string();
    let content = content_for(message)?;
    let generic = GenericMessage {
        message_id,
        content: Some(content),
    };
    Some(generic.encode_to_vec())
}

fn content_for(message: &WireMessage) -> Option<generic_message::Content> {
    use generic_message::Content;
    Some(match message {
        WireMessage::Text { text, mentions, quoted_message_id, .. } => Content::Text(Text {
            content: text.clone(),
            mentions: mentions.iter().map(mention_to_proto).collect(),
            quoted_message_id: quoted_message_id.map(|id| id.to_string()),
        }),
        WireMessage::Asset { asset, metadata, .. } => Content::Asset(asset_to_proto(asset, metadata)),
        WireMessage::Composite { items, .. } => Content::Composite(Composite {
            items: composite_items_to_proto(items),
        }),
        WireMessage::Button { button_id, text, .. } => Content::Button(Button {
            button_id: button_id.clone(),
            text: text.clone(),
        }),
        WireMessage::ButtonAction { button_id, reference_message_id, .. } => {
            Content::ButtonAction(ButtonAction {
                button_id: button_id.clone(),
                reference_message_id: reference_message_id.to_string(),
            })
        }
        WireMessage::ButtonActionConfirmation { button_id, reference_message_id, .. } => {
            Content::ButtonActionConfirmation(ButtonActionConfirmation {
                // Omitted from the wire when absent (§4.6).
                button_id: button_id.clone(),
                reference_message_id: reference_message_id.to_string(),
            })
        }
        WireMessage::Knock { .. } => Content::Knock(Knock {}),
        WireMessage::Location { latitude, longitude, name, zoom, .. } => {
            Content::Location(location_to_proto(*latitude, *longitude, name, zoom))
        }
        WireMessage::Deleted { deleted_message_id, .. } => Content::Hidden(Hidden {
            message_id: deleted_message_id.to_string(),
        }),
        WireMessage::TextEdited { replacing_message_id, text, mentions, .. } => {
            Content::Edited(MessageEdit {
                replacing_message_id: replacing_message_id.to_string(),
                content: Some(message_edit::Content::Text(Text {
                    content: text.clone(),
                    mentions: mentions.iter().map(mention_to_proto).collect(),
                    quoted_message_id: None,
                })),
            })
        }
        WireMessage::CompositeEdited { replacing_message_id, items, .. } => {
            Content::Edited(MessageEdit {
                replacing_message_id: replacing_message_id.to_string(),
                content: Some(message_edit::Content::Composite(Composite {
                    items: composite_items_to_proto(items),
                })),
            })
        }
        WireMessage::Receipt { receipt_type, message_ids, .. } => Content::Confirmation(Confirmation {
            r#type: match receipt_type {
                ReceiptType::Delivered => ConfirmationType::Delivered as i32,
                ReceiptType::Read => ConfirmationType::Read as i32,
            },
            message_ids: message_ids.iter().map(Uuid::to_string).collect(),
        }),
        WireMessage::Reaction { reference_message_id, emojis, .. } => Content::Reaction(Reaction {
            reference_message_id: reference_message_id.to_string(),
            emojis: emojis.clone(),
        }),
        WireMessage::InCallEmoji { emojis, .. } => Content::InCallEmoji(InCallEmoji {
            emojis: emojis.clone(),
        }),
        WireMessage::InCallHandRaise { is_hand_up, .. } => Content::InCallHandRaise(InCallHandRaise {
            is_hand_up: *is_hand_up,
        }),
        WireMessage::Ephemeral { expire_after_millis, content, .. } => {
            let inner = match content.as_ref() {
                EphemeralContent::Text { text, mentions } => ephemeral::Content::Text(Text {
                    content: text.clone(),
                    mentions: mentions.iter().map(mention_to_proto).collect(),
                    quoted_message_id: None,
                }),
                EphemeralContent::Asset { asset, metadata } => {
                    ephemeral::Content::Asset(asset_to_proto(asset, metadata))
                }
                EphemeralContent::Knock => ephemeral::Content::Knock(Knock {}),
                EphemeralContent::Location { latitude, longitude, name, zoom } => {
                    ephemeral::Content::Location(location_to_proto(*latitude, *longitude, name, zoom))
                }
            };
            Content::Ephemeral(Ephemeral {
                expire_after_millis: *expire_after_millis,
                content: Some(inner),
            })
        }
        WireMessage::Ignored | WireMessage::Unknown => return None,
    })
}

/// Decodes protobuf bytes into a [`WireMessage`], attaching the header fields the caller already
/// knows (conversation, sender, timestamp) since they are not part of the message content itself.
pub fn decode(
    bytes: &[u8],
    conversation_id: QualifiedId,
    sender: QualifiedId,
    timestamp: DateTime<Utc>,
) -> WireMessage {
    let Ok(generic) = GenericMessage::decode(bytes) else {
        return WireMessage::Unknown;
    };
    let Ok(id) = generic.message_id.parse::<Uuid>() else {
        return WireMessage::Unknown;
    };
    let header = MessageHeader {
        id,
        conversation_id,
        sender,
        timestamp,
    };
    decode_content(generic.content, header)
}

fn decode_content(content: Option<generic_message::Content>, header: MessageHeader) -> WireMessage {
    use generic_message::Content;
    match content {
        Some(Content::Text(t)) => WireMessage::Text {
            header,
            text: t.content,
            mentions: t.mentions.iter().filter_map(mention_from_proto).collect(),
            quoted_message_id: t.quoted_message_id.and_then(|s| s.parse().ok()),
        },
        Some(Content::Asset(a)) => match asset_from_proto(&a) {
            Some((asset, metadata)) => WireMessage::Asset { header, asset, metadata },
            None => WireMessage::Ignored,
        },
        Some(Content::Composite(c)) => WireMessage::Composite {
            header,
            items: composite_items_from_proto(&c.items),
        },
        Some(Content::Button(b)) => WireMessage::Button {
            header,
            button_id: b.button_id,
            text: b.text,
        },
        Some(Content::ButtonAction(a)) => {
            let Ok(reference_message_id) = a.reference_message_id.parse() else {
                return WireMessage::Ignored;
            };
            WireMessage::ButtonAction {
                header,
                button_id: a.button_id,
                reference_message_id,
            }
        }
        Some(Content::ButtonActionConfirmation(c)) => {
            let Ok(reference_message_id) = c.reference_message_id.parse() else {
                return WireMessage::Ignored;
            };
            WireMessage::ButtonActionConfirmation {
                header,
                button_id: c.button_id,
                reference_message_id,
            }
        }
        Some(Content::Knock(_)) => WireMessage::Knock { header },
        Some(Content::Location(l)) => WireMessage::Location {
            header,
            latitude: l.latitude,
            longitude: l.longitude,
            name: l.name,
            zoom: l.zoom,
        },
        Some(Content::Hidden(h)) => {
            let Ok(deleted_message_id) = h.message_id.parse() else {
                return WireMessage::Ignored;
            };
            WireMessage::Deleted { header, deleted_message_id }
        }
        Some(Content::Edited(e)) => {
            let Ok(replacing_message_id) = e.replacing_message_id.parse() else {
                return WireMessage::Ignored;
            };
            match e.content {
                Some(message_edit::Content::Text(t)) => WireMessage::TextEdited {
                    header,
                    replacing_message_id,
                    text: t.content,
                    mentions: t.mentions.iter().filter_map(mention_from_proto).collect(),
                },
                Some(message_edit::Content::Composite(c)) => WireMessage::CompositeEdited {
                    header,
                    replacing_message_id,
                    items: composite_items_from_proto(&c.items),
                },
                // Edited whose payload is neither text nor composite collapses to Ignored (§4.6).
                None => WireMessage::Ignored,
            }
        }
        Some(Content::Confirmation(c)) => {
            let receipt_type = match ConfirmationType::try_from(c.r#type) {
                Ok(ConfirmationType::Delivered) => ReceiptType::Delivered,
                Ok(ConfirmationType::Read) => ReceiptType::Read,
                // Neither DELIVERED nor READ collapses to Ignored (§4.6).
                _ => return WireMessage::Ignored,
            };
            WireMessage::Receipt {
                header,
                receipt_type,
                message_ids: c.message_ids.iter().filter_map(|s| s.parse().ok()).collect(),
            }
        }
        Some(Content::Reaction(r)) => {
            let Ok(reference_message_id) = r.reference_message_id.parse() else {
                return WireMessage::Ignored;
            };
            WireMessage::Reaction {
                header,
                reference_message_id,
                emojis: r.emojis,
            }
        }
        Some(Content::InCallEmoji(e)) => WireMessage::InCallEmoji {
            header,
            emojis: e.emojis,
        },
        Some(Content::InCallHandRaise(h)) => WireMessage::InCallHandRaise {
            header,
            is_hand_up: h.is_hand_up,
        },
        Some(Content::Ephemeral(e)) => {
            let content = match e.content {
                Some(ephemeral::Content::Text(t)) => EphemeralContent::Text {
                    text: t.content,
                    mentions: t.mentions.iter().filter_map(mention_from_proto).collect(),
                },
                Some(ephemeral::Content::Asset(a)) => match asset_from_proto(&a) {
                    Some((asset, metadata)) => EphemeralContent::Asset { asset, metadata },
                    // Unknown inner content collapses to Ignored (§4.6).
                    None => return WireMessage::Ignored,
                },
                Some(ephemeral::Content::Knock(_)) => EphemeralContent::Knock,
                Some(ephemeral::Content::Location(l)) => EphemeralContent::Location {
                    latitude: l.latitude,
                    longitude: l.longitude,
                    name: l.name,
                    zoom: l.zoom,
                },
                None => return WireMessage::Ignored,
            };
            WireMessage::Ephemeral {
                header,
                expire_after_millis: e.expire_after_millis,
                content: Box::new(content),
            }
        }
        None => WireMessage::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(conversation_id: QualifiedId, sender: QualifiedId) -> MessageHeader {
        MessageHeader {
            id: Uuid::new_v4(),
            conversation_id,
            sender,
            timestamp: Utc::now(),
        }
    }

    fn ids() -> (QualifiedId, QualifiedId) {
        (
            QualifiedId::new(Uuid::new_v4(), "example.com"),
            QualifiedId::new(Uuid::new_v4(), "example.com"),
        )
    }

    #[test]
    fn text_round_trips() {
        let (conversation_id, sender) = ids();
        let header = header(conversation_id.clone(), sender.clone());
        let message = WireMessage::Text {
            header: header.clone(),
            text: "hello".into(),
            mentions: vec![],
            quoted_message_id: None,
        };
        let bytes = encode(&message).unwrap();
        let decoded = decode(&bytes, conversation_id, sender, header.timestamp);
        match decoded {
            WireMessage::Text { text, .. } => assert_eq!(text, "hello"),
            other => panic!("expected Text, got {other:?}"),
        }
    }

    #[test]
    fn button_action_confirmation_omits_absent_button_id() {
        let (conversation_id, sender) = ids();
        let header = header(conversation_id.clone(), sender.clone());
        let message = WireMessage::ButtonActionConfirmation {
            header: header.clone(),
            button_id: None,
            reference_message_id: Uuid::new_v4(),
        };
        let bytes = encode(&message).unwrap();
        let generic = GenericMessage::decode(bytes.as_slice()).unwrap();
        match generic.content {
            Some(generic_message::Content::ButtonActionConfirmation(c)) => {
                assert_eq!(c.button_id, None);
            }
            other => panic!("unexpected content: {other:?}"),
        }
    }

    #[test]
    fn receipt_with_unrecognized_type_is_ignored() {
        let (conversation_id, sender) = ids();
        let header = header(conversation_id.clone(), sender.clone());
        let generic = GenericMessage {
            message_id: header.id.to_string(),
            content: Some(generic_message::Content::Confirmation(Confirmation {
                r#type: ConfirmationType::Unknown as i32,
                message_ids: vec![],
            })),
        };
        let bytes = generic.encode_to_vec();
        let decoded = decode(&bytes, conversation_id, sender, header.timestamp);
        assert!(matches!(decoded, WireMessage::Ignored));
    }

    #[test]
    fn ephemeral_unwraps_inner_content_and_propagates_expiry() {
        let (conversation_id, sender) = ids();
        let header = header(conversation_id.clone(), sender.clone());
        let message = WireMessage::Ephemeral {
            header: header.clone(),
            expire_after_millis: 5_000,
            content: Box::new(EphemeralContent::Text {
                text: "vanish".into(),
                mentions: vec![],
            }),
        };
        let bytes = encode(&message).unwrap();
        let decoded = decode(&bytes, conversation_id, sender, header.timestamp);
        match decoded {
            WireMessage::Ephemeral { expire_after_millis, content, .. } => {
                assert_eq!(expire_after_millis, 5_000);
                assert!(matches!(*content, EphemeralContent::Text { .. }));
            }
            other => panic!("expected Ephemeral, got {other:?}"),
        }
    }

    #[test]
    fn edited_with_neither_text_nor_composite_is_ignored() {
        let (conversation_id, sender) = ids();
        let header = header(conversation_id.clone(), sender.clone());
        let generic = GenericMessage {
            message_id: header.id.to_string(),
            content: Some(generic_message::Content::Edited(MessageEdit {
                replacing_message_id: Uuid::new_v4().to_string(),
                content: None,
            })),
        };
        let bytes = generic.encode_to_vec();
        let decoded = decode(&bytes, conversation_id, sender, header.timestamp);
        assert!(matches!(decoded, WireMessage::Ignored));
    }

    #[test]
    fn unknown_top_level_content_decodes_to_unknown() {
        let (conversation_id, sender) = ids();
        let generic = GenericMessage {
            message_id: Uuid::new_v4().to_string(),
            content: None,
        };
        let bytes = generic.encode_to_vec();
        let decoded = decode(&bytes, conversation_id, sender, Utc::now());
        assert!(matches!(decoded, WireMessage::Unknown));
    }

    #[test]
    fn ignored_and_unknown_do_not_encode() {
        assert!(encode(&WireMessage::Ignored).is_none());
        assert!(encode(&WireMessage::Unknown).is_none());
    }
}
