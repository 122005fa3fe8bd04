//! Team bookkeeping (C1 `TeamStore`): local projection of which teams this device has been
//! invited into.

use sqlx::query;
use wire_sdk_common::TeamId;

use crate::notifier::StoreEntityId;
use crate::Store;

pub struct TeamStore<'a> {
    store: &'a Store,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
}

impl<'a> TeamStore<'a> {
    pub(crate) fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Idempotent: re-applying the same `TeamInvite` event twice is a no-op (I1).
    pub async fn upsert(&self, id: TeamId, name: &str) -> anyhow::Result<()> {
        self.store
            .with_transaction_and_notifier(async |conn, notifier| {
                let id_str = id.to_string();
                query!(
                    "INSERT INTO teams (id, name) VALUES (?1, ?2)
                     ON CONFLICT (id) DO UPDATE SET name = excluded.name",
                    id_str,
                    name,
                )
                .execute(&mut *conn)
                .await?;
                notifier.add(StoreEntityId::Team(id));
                Ok(())
            })
            .await
    }

    pub async fn get(&self, id: TeamId) -> anyhow::Result<Option<Team>> {
        let id_str = id.to_string();
        let row = query!("SELECT id, name FROM teams WHERE id = ?1", id_str)
            .fetch_optional(self.store.pool())
            .await?;
        Ok(row.map(|r| Team {
            id,
            name: r.name,
        }))
    }

    pub async fn list(&self) -> anyhow::Result<Vec<Team>> {
        let rows = query!("SELECT id, name FROM teams ORDER BY name")
            .fetch_all(self.store.pool())
            .await?;
        rows.into_iter()
            .map(|r| {
                Ok(Team {
                    id: TeamId(r.id.parse()?),
                    name: r.name,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    async fn test_store() -> (Store, tokio::sync::mpsc::UnboundedReceiver<crate::StoreNotification>) {
        let pool = crate::open(":memory:").await.unwrap();
        Store::new(pool)
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let (store, _rx) = test_store().await;
        let id = TeamId(Uuid::new_v4());
        store.teams().upsert(id, "Acme").await.unwrap();
        store.teams().upsert(id, "Acme").await.unwrap();
        store.teams().upsert(id, "Acme Renamed").await.unwrap();

        let teams = store.teams().list().await.unwrap();
        assert_eq!(teams.len(), 1);
        assert_eq!(teams[0].name, "Acme Renamed");
    }

    #[tokio::test]
    async fn upsert_notifies() {
        let (store, mut rx) = test_store().await;
        let id = TeamId(Uuid::new_v4());
        store.teams().upsert(id, "Acme").await.unwrap();

        let notification = rx.try_recv().unwrap();
        assert!(notification.ops.contains_key(&StoreEntityId::Team(id)));
    }
}
