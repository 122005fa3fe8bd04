//! Conversation and membership projection (C1 `ConversationStore`).
//!
//! Every mutating method is idempotent under event replay (I1): creating a conversation that
//! already exists updates it in place, adding a member who is already present is a no-op beyond
//! refreshing their role, and removing an absent member is a no-op.

use sqlx::query;
use wire_sdk_common::{ConversationEntity, ConversationMember, ConversationType, MlsGroupId, Protocol, QualifiedId, Role, TeamId};

use crate::notifier::StoreEntityId;
use crate::Store;

pub struct ConversationStore<'a> {
    store: &'a Store,
}

fn conversation_type_str(t: ConversationType) -> &'static str {
    match t {
        ConversationType::Group => "GROUP",
        ConversationType::OneToOne => "ONE_TO_ONE",
        ConversationType::SelfConversation => "SELF",
    }
}

fn parse_conversation_type(s: &str) -> anyhow::Result<ConversationType> {
    Ok(match s {
        "GROUP" => ConversationType::Group,
        "ONE_TO_ONE" => ConversationType::OneToOne,
        "SELF" => ConversationType::SelfConversation,
        other => anyhow::bail!("unknown conversation_type {other}"),
    })
}

fn protocol_str(p: Protocol) -> &'static str {
    match p {
        Protocol::Mls => "MLS",
        Protocol::Proteus => "PROTEUS",
    }
}

fn parse_protocol(s: &str) -> anyhow::Result<Protocol> {
    Ok(match s {
        "MLS" => Protocol::Mls,
        "PROTEUS" => Protocol::Proteus,
        other => anyhow::bail!("unknown protocol {other}"),
    })
}

fn role_str(r: Role) -> &'static str {
    match r {
        Role::Admin => "ADMIN",
        Role::Member => "MEMBER",
    }
}

fn parse_role(s: &str) -> anyhow::Result<Role> {
    Ok(match s {
        "ADMIN" => Role::Admin,
        "MEMBER" => Role::Member,
        other => anyhow::bail!("unknown role {other}"),
    })
}

impl<'a> ConversationStore<'a> {
    pub(crate) fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub async fn upsert(&self, conversation: &ConversationEntity) -> anyhow::Result<()> {
        self.store
            .with_transaction_and_notifier(async |conn, notifier| {
                let id = conversation.id.id;
                let domain = &conversation.id.domain;
                let team_id_str = conversation.team_id.map(|t| t.to_string());
                let mls_group_id = conversation.mls_group_id.to_base64();
                let epoch = conversation.epoch as i64;
                let conversation_type = conversation_type_str(conversation.conversation_type);
                let protocol = protocol_str(conversation.protocol);
                query!(
                    "INSERT INTO conversations
                        (id, domain, name, team_id, mls_group_id, epoch, conversation_type, protocol)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT (id, domain) DO UPDATE SET
                        name = excluded.name,
                        team_id = excluded.team_id,
                        mls_group_id = excluded.mls_group_id,
                        epoch = excluded.epoch,
                        conversation_type = excluded.conversation_type,
                        protocol = excluded.protocol",
                    id,
                    domain,
                    conversation.name,
                    team_id_str,
                    mls_group_id,
                    epoch,
                    conversation_type,
                    protocol,
                )
                .execute(&mut *conn)
                .await?;
                notifier.add(StoreEntityId::Conversation(conversation.id.clone()));
                Ok(())
            })
            .await
    }

    pub async fn get(&self, id: &QualifiedId) -> anyhow::Result<Option<ConversationEntity>> {
        let id_uuid = id.id;
        let domain = &id.domain;
        let row = query!(
            "SELECT id, domain, name, team_id, mls_group_id, epoch, conversation_type, protocol
             FROM conversations WHERE id = ?1 AND domain = ?2",
            id_uuid,
            domain,
        )
        .fetch_optional(self.store.pool())
        .await?;
        row.map(|r| {
            Ok(ConversationEntity {
                id: QualifiedId::new(r.id.parse()?, r.domain),
                name: r.name,
                team_id: r.team_id.map(|t| anyhow::Ok(TeamId(t.parse()?))).transpose()?,
                mls_group_id: MlsGroupId::from_base64(&r.mls_group_id)?,
                epoch: r.epoch as u64,
                conversation_type: parse_conversation_type(&r.conversation_type)?,
                protocol: parse_protocol(&r.protocol)?,
            })
        })
        .transpose()
    }

    /// Resolves an incoming MLS message's opaque group id back to the conversation it belongs
    /// to. Used by `MlsFallback`'s epoch-drift recovery and by the event router.
    pub async fn get_by_mls_group_id(&self, group_id: &MlsGroupId) -> anyhow::Result<Option<ConversationEntity>> {
        let mls_group_id = group_id.to_base64();
        let row = query!(
            "SELECT id, domain, name, team_id, mls_group_id, epoch, conversation_type, protocol
             FROM conversations WHERE mls_group_id = ?1",
            mls_group_id,
        )
        .fetch_optional(self.store.pool())
        .await?;
        row.map(|r| {
            Ok(ConversationEntity {
                id: QualifiedId::new(r.id.parse()?, r.domain),
                name: r.name,
                team_id: r.team_id.map(|t| anyhow::Ok(TeamId(t.parse()?))).transpose()?,
                mls_group_id: MlsGroupId::from_base64(&r.mls_group_id)?,
                epoch: r.epoch as u64,
                conversation_type: parse_conversation_type(&r.conversation_type)?,
                protocol: parse_protocol(&r.protocol)?,
            })
        })
        .transpose()
    }

    pub async fn list(&self) -> anyhow::Result<Vec<ConversationEntity>> {
        let rows = query!(
            "SELECT id, domain, name, team_id, mls_group_id, epoch, conversation_type, protocol
             FROM conversations"
        )
        .fetch_all(self.store.pool())
        .await?;
        rows.into_iter()
            .map(|r| {
                Ok(ConversationEntity {
                    id: QualifiedId::new(r.id.parse()?, r.domain),
                    name: r.name,
                    team_id: r.team_id.map(|t| anyhow::Ok(TeamId(t.parse()?))).transpose()?,
                    mls_group_id: MlsGroupId::from_base64(&r.mls_group_id)?,
                    epoch: r.epoch as u64,
                    conversation_type: parse_conversation_type(&r.conversation_type)?,
                    protocol: parse_protocol(&r.protocol)?,
                })
            })
            .collect()
    }

    /// Bumps the local epoch counter after a successfully applied MLS commit (I3). Does not
    /// touch anything else about the conversation.
    pub async fn set_epoch(&self, id: &QualifiedId, epoch: u64) -> anyhow::Result<()> {
        self.store
            .with_transaction_and_notifier(async |conn, notifier| {
                let id_uuid = id.id;
                let domain = &id.domain;
                let epoch = epoch as i64;
                query!(
                    "UPDATE conversations SET epoch = ?1 WHERE id = ?2 AND domain = ?3",
                    epoch,
                    id_uuid,
                    domain,
                )
                .execute(&mut *conn)
                .await?;
                notifier.update(StoreEntityId::Conversation(id.clone()));
                Ok(())
            })
            .await
    }

    pub async fn delete(&self, id: &QualifiedId) -> anyhow::Result<()> {
        self.store
            .with_transaction_and_notifier(async |conn, notifier| {
                let id_uuid = id.id;
                let domain = &id.domain;
                query!(
                    "DELETE FROM conversations WHERE id = ?1 AND domain = ?2",
                    id_uuid,
                    domain,
                )
                .execute(&mut *conn)
                .await?;
                notifier.remove(StoreEntityId::Conversation(id.clone()));
                Ok(())
            })
            .await
    }

    pub async fn members(&self, conversation_id: &QualifiedId) -> anyhow::Result<Vec<ConversationMember>> {
        let conv_id = conversation_id.id;
        let conv_domain = &conversation_id.domain;
        let rows = query!(
            "SELECT user_id, user_domain, role FROM conversation_members
             WHERE conversation_id = ?1 AND conversation_domain = ?2",
            conv_id,
            conv_domain,
        )
        .fetch_all(self.store.pool())
        .await?;
        rows.into_iter()
            .map(|r| {
                Ok(ConversationMember {
                    user_id: QualifiedId::new(r.user_id.parse()?, r.user_domain),
                    role: parse_role(&r.role)?,
                })
            })
            .collect()
    }

    /// Adds or refreshes one member's role. Idempotent (I1).
    pub async fn upsert_member(
        &self,
        conversation_id: &QualifiedId,
        user_id: &QualifiedId,
        role: Role,
    ) -> anyhow::Result<()> {
        self.store
            .with_transaction_and_notifier(async |conn, notifier| {
                let conv_id = conversation_id.id;
                let conv_domain = &conversation_id.domain;
                let usr_id = user_id.id;
                let usr_domain = &user_id.domain;
                let role_str = role_str(role);
                query!(
                    "INSERT INTO conversation_members
                        (conversation_id, conversation_domain, user_id, user_domain, role)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT (conversation_id, conversation_domain, user_id, user_domain)
                     DO UPDATE SET role = excluded.role",
                    conv_id,
                    conv_domain,
                    usr_id,
                    usr_domain,
                    role_str,
                )
                .execute(&mut *conn)
                .await?;
                notifier.update(StoreEntityId::Member {
                    conversation: conversation_id.clone(),
                    user: user_id.clone(),
                });
                Ok(())
            })
            .await
    }

    /// Removing an absent member is a no-op (I1); `rows_affected` is intentionally not checked.
    pub async fn remove_member(&self, conversation_id: &QualifiedId, user_id: &QualifiedId) -> anyhow::Result<()> {
        self.store
            .with_transaction_and_notifier(async |conn, notifier| {
                let conv_id = conversation_id.id;
                let conv_domain = &conversation_id.domain;
                let usr_id = user_id.id;
                let usr_domain = &user_id.domain;
                query!(
                    "DELETE FROM conversation_members
                     WHERE conversation_id = ?1 AND conversation_domain = ?2
                       AND user_id = ?3 AND user_domain = ?4",
                    conv_id,
                    conv_domain,
                    usr_id,
                    usr_domain,
                )
                .execute(&mut *conn)
                .await?;
                notifier.remove(StoreEntityId::Member {
                    conversation: conversation_id.clone(),
                    user: user_id.clone(),
                });
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    async fn test_store() -> Store {
        let pool = crate::open(":memory:").await.unwrap();
        Store::new(pool).0
    }

    fn test_conversation() -> ConversationEntity {
        ConversationEntity {
            id: QualifiedId::new(Uuid::new_v4(), "example.com"),
            name: Some("Team chat".into()),
            team_id: None,
            mls_group_id: MlsGroupId::from_bytes(vec![1, 2, 3]),
            epoch: 0,
            conversation_type: ConversationType::Group,
            protocol: Protocol::Mls,
        }
    }

    #[tokio::test]
    async fn upsert_and_get_roundtrip() {
        let store = test_store().await;
        let conversation = test_conversation();
        store.conversations().upsert(&conversation).await.unwrap();

        let loaded = store.conversations().get(&conversation.id).await.unwrap().unwrap();
        assert_eq!(loaded, conversation);
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_updates_in_place() {
        let store = test_store().await;
        let mut conversation = test_conversation();
        store.conversations().upsert(&conversation).await.unwrap();

        conversation.name = Some("Renamed".into());
        store.conversations().upsert(&conversation).await.unwrap();

        let all = store.conversations().list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name.as_deref(), Some("Renamed"));
    }

    #[tokio::test]
    async fn member_add_remove_is_idempotent() {
        let store = test_store().await;
        let conversation = test_conversation();
        store.conversations().upsert(&conversation).await.unwrap();

        let user = QualifiedId::new(Uuid::new_v4(), "example.com");
        store
            .conversations()
            .upsert_member(&conversation.id, &user, Role::Member)
            .await
            .unwrap();
        store
            .conversations()
            .upsert_member(&conversation.id, &user, Role::Admin)
            .await
            .unwrap();

        let members = store.conversations().members(&conversation.id).await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].role, Role::Admin);

        store.conversations().remove_member(&conversation.id, &user).await.unwrap();
        store.conversations().remove_member(&conversation.id, &user).await.unwrap();
        assert!(store.conversations().members(&conversation.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_by_mls_group_id_resolves_conversation() {
        let store = test_store().await;
        let conversation = test_conversation();
        store.conversations().upsert(&conversation).await.unwrap();

        let found = store
            .conversations()
            .get_by_mls_group_id(&conversation.mls_group_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, conversation.id);
    }

    #[tokio::test]
    async fn delete_cascades_members() {
        let store = test_store().await;
        let conversation = test_conversation();
        store.conversations().upsert(&conversation).await.unwrap();
        let user = QualifiedId::new(Uuid::new_v4(), "example.com");
        store
            .conversations()
            .upsert_member(&conversation.id, &user, Role::Member)
            .await
            .unwrap();

        store.conversations().delete(&conversation.id).await.unwrap();

        assert!(store.conversations().get(&conversation.id).await.unwrap().is_none());
        assert!(store.conversations().members(&conversation.id).await.unwrap().is_empty());
    }
}
