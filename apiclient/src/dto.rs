//! JSON wire shapes for the REST/WebSocket surface (§6), and the conversions between them and
//! `wire-sdk-common`'s domain types.
//!
//! Kept deliberately separate from `wire_sdk_common`'s own (derive-based) `Serialize`/`Deserialize`
//! impls: the backend's casing conventions (`"GROUP"`, `"ONE_TO_ONE"`) don't line up with what a
//! plain `#[derive(Deserialize)]` on the domain enums would produce, so these DTOs parse the wire
//! strings by hand, the same way `wire-sdk-storage` does for its own on-disk encoding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wire_sdk_common::{
    ConversationEntity, ConversationMember, ConversationType, MlsGroupId, Protocol, QualifiedId, Role, TeamId,
};
use wire_sdk_common::event::{
    AvailabilityPayload, AvailabilityStatus, ConversationCreatePayload, ConversationDeletePayload,
    DataTransferPayload, Event, MemberJoinEntry, MemberJoinPayload, MemberLeavePayload, MemberUpdatePayload,
    MlsWelcomePayload, Notification, NotificationPage, NewMlsMessagePayload, TeamInvitePayload, TypingPayload,
};

#[derive(Debug, Clone, Deserialize)]
pub struct ApiVersionResponse {
    pub domain: String,
    pub federation: bool,
    pub supported: Vec<u32>,
    pub development: Vec<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MlsFeatureConfig {
    pub status: String,
    pub allowed_ciphersuites: Vec<u16>,
    pub default_ciphersuite: u16,
    pub default_protocol: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeatureConfigsResponse {
    pub mls: MlsFeatureConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessTokenResponse {
    pub access_token: String,
    pub expires_in: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterClientRequest {
    pub prekeys: Vec<PrekeyDto>,
    pub last_prekey: PrekeyDto,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrekeyDto {
    pub id: u16,
    pub key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterClientResponse {
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttachMlsPublicKeyRequest {
    pub mls_public_keys: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadKeyPackagesRequest {
    pub key_packages: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClaimedKeyPackagesResponse {
    pub key_packages: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MlsPublicKeysResponse {
    pub removal: std::collections::HashMap<String, String>,
}

pub fn removal_key_for_ciphersuite(keys: &MlsPublicKeysResponse, ciphersuite: u16) -> Option<Vec<u8>> {
    let name = match ciphersuite {
        0x0001 | 0xf031 => "ecdsa_secp256r1_sha256",
        0x0002 => "ecdsa_secp384r1_sha384",
        0x0003 => "ecdsa_secp521r1_sha512",
        0x0004 | 0x0005 => "ed25519",
        0x0006 | 0x0007 => "ed448",
        _ => return None,
    };
    let encoded = keys.removal.get(name)?;
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.decode(encoded).ok()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualifiedIdDto {
    pub id: Uuid,
    pub domain: String,
}

impl From<&QualifiedId> for QualifiedIdDto {
    fn from(id: &QualifiedId) -> Self {
        Self { id: id.id, domain: id.domain.clone() }
    }
}

impl From<QualifiedIdDto> for QualifiedId {
    fn from(dto: QualifiedIdDto) -> Self {
        QualifiedId::new(dto.id, dto.domain)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberDto {
    pub qualified_id: QualifiedIdDto,
    pub conversation_role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationResponse {
    pub qualified_id: QualifiedIdDto,
    pub name: Option<String>,
    pub team: Option<Uuid>,
    pub group_id: String,
    pub epoch: u64,
    #[serde(rename = "type")]
    pub conversation_type: String,
    pub protocol: String,
    #[serde(default)]
    pub members: Vec<MemberDto>,
}

fn parse_conversation_type(s: &str) -> anyhow::Result<ConversationType> {
    Ok(match s {
        "GROUP" => ConversationType::Group,
        "ONE_TO_ONE" => ConversationType::OneToOne,
        "SELF" => ConversationType::SelfConversation,
        other => anyhow::bail!("unknown conversation type {other}"),
    })
}

fn parse_protocol(s: &str) -> anyhow::Result<Protocol> {
    Ok(match s {
        "MLS" => Protocol::Mls,
        "PROTEUS" => Protocol::Proteus,
        other => anyhow::bail!("unknown protocol {other}"),
    })
}

pub fn parse_role(s: &str) -> anyhow::Result<Role> {
    Ok(match s {
        "ADMIN" => Role::Admin,
        "MEMBER" => Role::Member,
        other => anyhow::bail!("unknown role {other}"),
    })
}

pub fn role_to_wire(role: Role) -> &'static str {
    match role {
        Role::Admin => "ADMIN",
        Role::Member => "MEMBER",
    }
}

impl ConversationResponse {
    pub fn to_entity(&self) -> anyhow::Result<ConversationEntity> {
        Ok(ConversationEntity {
            id: self.qualified_id.clone().into(),
            name: self.name.clone(),
            team_id: self.team.map(TeamId),
            mls_group_id: MlsGroupId::from_base64(&self.group_id)?,
            epoch: self.epoch,
            conversation_type: parse_conversation_type(&self.conversation_type)?,
            protocol: parse_protocol(&self.protocol)?,
        })
    }

    pub fn to_members(&self) -> anyhow::Result<Vec<ConversationMember>> {
        self.members
            .iter()
            .map(|m| {
                Ok(ConversationMember {
                    user_id: m.qualified_id.clone().into(),
                    role: parse_role(&m.conversation_role)?,
                })
            })
            .collect()
    }
}

/// Tagged event payload as it travels over the wire, one element of an [`EventEnvelope`]'s
/// `payload` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventPayload {
    #[serde(rename = "team.invite")]
    TeamInvite { team: Uuid, team_name: String },
    #[serde(rename = "conversation.create")]
    ConversationCreate {
        conversation: QualifiedIdDto,
        name: Option<String>,
        #[serde(rename = "type")]
        conversation_type: String,
        protocol: String,
        group_id: Option<String>,
    },
    #[serde(rename = "conversation.delete")]
    ConversationDelete { conversation: QualifiedIdDto },
    #[serde(rename = "conversation.member-join")]
    MemberJoin { conversation: QualifiedIdDto, members: Vec<MemberDto> },
    #[serde(rename = "conversation.member-leave")]
    MemberLeave { conversation: QualifiedIdDto, members: Vec<QualifiedIdDto> },
    #[serde(rename = "conversation.member-update")]
    MemberUpdate { conversation: QualifiedIdDto, user: QualifiedIdDto, role: String },
    #[serde(rename = "conversation.mls-welcome")]
    MlsWelcome {
        conversation: QualifiedIdDto,
        #[serde(with = "base64_bytes")]
        welcome: Vec<u8>,
    },
    #[serde(rename = "conversation.mls-message-add")]
    NewMlsMessage {
        conversation: QualifiedIdDto,
        from: QualifiedIdDto,
        #[serde(with = "base64_bytes")]
        message: Vec<u8>,
    },
    #[serde(rename = "conversation.typing")]
    Typing { conversation: QualifiedIdDto, user: QualifiedIdDto, status: String },
    #[serde(rename = "conversation.data-transfer")]
    DataTransfer { conversation: QualifiedIdDto, data: serde_json::Value },
    #[serde(rename = "user.availability")]
    Availability { user: QualifiedIdDto, status: String },
    #[serde(other)]
    Unknown,
}

mod base64_bytes {
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(&s)
            .map_err(serde::de::Error::custom)
    }
}

impl EventPayload {
    pub fn into_event(self) -> Event {
        match self {
            EventPayload::TeamInvite { team, team_name } => Event::TeamInvite(TeamInvitePayload {
                team_id: TeamId(team),
                team_name,
            }),
            EventPayload::ConversationCreate {
                conversation,
                name,
                conversation_type,
                protocol,
                group_id,
            } => {
                let Ok(conversation_type) = parse_conversation_type(&conversation_type) else {
                    return Event::Unknown;
                };
                let Ok(protocol) = parse_protocol(&protocol) else {
                    return Event::Unknown;
                };
                Event::ConversationCreate(ConversationCreatePayload {
                    conversation_id: conversation.into(),
                    name,
                    conversation_type,
                    protocol,
                    mls_group_id_base64: group_id,
                })
            }
            EventPayload::ConversationDelete { conversation } => {
                Event::ConversationDelete(ConversationDeletePayload { conversation_id: conversation.into() })
            }
            EventPayload::MemberJoin { conversation, members } => {
                let Ok(members) = members
                    .into_iter()
                    .map(|m| {
                        Ok(MemberJoinEntry { user_id: m.qualified_id.into(), role: parse_role(&m.conversation_role)? })
                    })
                    .collect::<anyhow::Result<Vec<_>>>()
                else {
                    return Event::Unknown;
                };
                Event::MemberJoin(MemberJoinPayload { conversation_id: conversation.into(), members })
            }
            EventPayload::MemberLeave { conversation, members } => Event::MemberLeave(MemberLeavePayload {
                conversation_id: conversation.into(),
                members: members.into_iter().map(Into::into).collect(),
            }),
            EventPayload::MemberUpdate { conversation, user, role } => {
                let Ok(role) = parse_role(&role) else {
                    return Event::Unknown;
                };
                Event::MemberUpdate(MemberUpdatePayload {
                    conversation_id: conversation.into(),
                    user_id: user.into(),
                    role,
                })
            }
            EventPayload::MlsWelcome { conversation, welcome } => {
                Event::MlsWelcome(MlsWelcomePayload { conversation_id: conversation.into(), welcome })
            }
            EventPayload::NewMlsMessage { conversation, from, message } => Event::NewMlsMessage(NewMlsMessagePayload {
                conversation_id: conversation.into(),
                sender: from.into(),
                message,
            }),
            EventPayload::Typing { conversation, user, status } => Event::Typing(TypingPayload {
                conversation_id: conversation.into(),
                user_id: user.into(),
                is_typing: status == "started",
            }),
            EventPayload::DataTransfer { conversation, data } => {
                Event::DataTransfer(DataTransferPayload { conversation_id: conversation.into(), data })
            }
            EventPayload::Availability { user, status } => Event::Availability(AvailabilityPayload {
                user_id: user.into(),
                status: match status.as_str() {
                    "available" => AvailabilityStatus::Available,
                    "away" => AvailabilityStatus::Away,
                    "busy" => AvailabilityStatus::Busy,
                    _ => AvailabilityStatus::None,
                },
            }),
            EventPayload::Unknown => Event::Unknown,
        }
    }
}

/// One envelope from the notification feed: a single id carrying one or more event payloads
/// (§6, §4.1). `transient` events are delivered live only, never replayed on catch-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    #[serde(default)]
    pub payload: Vec<EventPayload>,
    #[serde(default)]
    pub transient: bool,
}

impl EventEnvelope {
    /// Expands the envelope into one [`Notification`] per payload, all sharing the envelope's id
    /// so catch-up bookkeeping (`last_notification_id`) advances once per envelope.
    pub fn into_notifications(self, received_at: DateTime<Utc>) -> Vec<Notification> {
        self.payload
            .into_iter()
            .map(|payload| Notification { id: self.id, received_at, event: payload.into_event() })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationPageResponse {
    pub notifications: Vec<EventEnvelope>,
    pub has_more: bool,
}

impl NotificationPageResponse {
    pub fn into_page(self, received_at: DateTime<Utc>) -> NotificationPage {
        NotificationPage {
            notifications: self
                .notifications
                .into_iter()
                .flat_map(|e| e.into_notifications(received_at))
                .collect(),
            has_more: self.has_more,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateConversationRequest<'a> {
    pub name: Option<&'a str>,
    #[serde(rename = "type")]
    pub conversation_type: &'static str,
    pub team: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateMemberRoleRequest {
    pub conversation_role: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListConversationIdsRequest {
    pub paging_state: Option<String>,
    pub size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListConversationIdsResponse {
    pub qualified_conversations: Vec<QualifiedIdDto>,
    pub paging_state: Option<String>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListConversationsRequest {
    pub qualified_ids: Vec<QualifiedIdDto>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListConversationsResponse {
    pub found: Vec<ConversationResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssetMetadataPart {
    pub public: bool,
    #[serde(rename = "retention")]
    pub retention: &'static str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetUploadResponse {
    pub key: String,
    pub domain: Option<String>,
    pub token: Option<String>,
}
