//! Small key/value bookkeeping store (C1 `AppStore`): device id, last consumed notification id,
//! and the "should rejoin conversations" flag set by orphan-welcome recovery (§4.4).

use sqlx::query;

use crate::Store;

pub struct AppStore<'a> {
    store: &'a Store,
}

impl<'a> AppStore<'a> {
    pub(crate) fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let row = query!("SELECT value FROM app_kv WHERE key = ?1", key)
            .fetch_optional(self.store.pool())
            .await?;
        Ok(row.map(|r| r.value))
    }

    pub async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        query!(
            "INSERT INTO app_kv (key, value) VALUES (?1, ?2)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
            key,
            value,
        )
        .execute(self.store.pool())
        .await?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> anyhow::Result<()> {
        query!("DELETE FROM app_kv WHERE key = ?1", key)
            .execute(self.store.pool())
            .await?;
        Ok(())
    }

    /// The last notification id consumed from the catch-up feed, used to resume paging after a
    /// restart (§4.1).
    pub async fn last_notification_id(&self) -> anyhow::Result<Option<uuid::Uuid>> {
        use wire_sdk_common::conversation::app_data_keys::LAST_NOTIFICATION_ID;
        self.get(LAST_NOTIFICATION_ID)
            .await?
            .map(|v| v.parse().map_err(anyhow::Error::from))
            .transpose()
    }

    pub async fn set_last_notification_id(&self, id: uuid::Uuid) -> anyhow::Result<()> {
        use wire_sdk_common::conversation::app_data_keys::LAST_NOTIFICATION_ID;
        self.set(LAST_NOTIFICATION_ID, &id.to_string()).await
    }

    pub async fn should_rejoin_conversations(&self) -> anyhow::Result<bool> {
        use wire_sdk_common::conversation::app_data_keys::SHOULD_REJOIN_CONVERSATIONS;
        Ok(self.get(SHOULD_REJOIN_CONVERSATIONS).await?.as_deref() == Some("true"))
    }

    pub async fn set_should_rejoin_conversations(&self, value: bool) -> anyhow::Result<()> {
        use wire_sdk_common::conversation::app_data_keys::SHOULD_REJOIN_CONVERSATIONS;
        self.set(SHOULD_REJOIN_CONVERSATIONS, if value { "true" } else { "false" }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;

    async fn test_store() -> Store {
        let pool = crate::open(":memory:").await.unwrap();
        Store::new(pool).0
    }

    #[tokio::test]
    async fn set_get_delete_roundtrip() {
        let store = test_store().await;
        assert_eq!(store.app().get("device_id").await.unwrap(), None);

        store.app().set("device_id", "abc123").await.unwrap();
        assert_eq!(store.app().get("device_id").await.unwrap().as_deref(), Some("abc123"));

        store.app().set("device_id", "def456").await.unwrap();
        assert_eq!(store.app().get("device_id").await.unwrap().as_deref(), Some("def456"));

        store.app().delete("device_id").await.unwrap();
        assert_eq!(store.app().get("device_id").await.unwrap(), None);
    }

    #[tokio::test]
    async fn should_rejoin_conversations_defaults_to_false() {
        let store = test_store().await;
        assert!(!store.app().should_rejoin_conversations().await.unwrap());
        store.app().set_should_rejoin_conversations(true).await.unwrap();
        assert!(store.app().should_rejoin_conversations().await.unwrap());
    }
}
