//! Local SQLite-backed projection of the backend's team/conversation/membership state (C1).
//!
//! Every write goes through [`app_store::AppStore`], [`team_store::TeamStore`] or
//! [`conversation_store::ConversationStore`], each of which opens its own `BEGIN IMMEDIATE`
//! transaction and commits before telling a [`notifier::StoreNotifier`] about it, mirroring the
//! teacher's `StoreExt::with_transaction_and_notifier` pattern.

pub mod app_store;
pub mod conversation_store;
pub mod notifier;
pub mod team_store;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

pub use app_store::AppStore;
pub use conversation_store::ConversationStore;
pub use notifier::{StoreEntityId, StoreNotification, StoreNotifier, StoreOperation};
pub use team_store::TeamStore;

/// Opens (creating if necessary) the SQLite database at `path` and runs pending migrations.
///
/// `path` is typically the value of the `WIRE_SDK_DB_PATH` setting; pass `":memory:"` for tests.
pub async fn open(path: &str) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    sqlx::migrate!().run(&pool).await?;
    Ok(pool)
}

/// A cheap handle bundling the connection pool with the channel [`StoreNotifier`]s send on.
///
/// Cloning shares the pool and the sender; each store method builds its own short-lived
/// [`StoreNotifier`] around the shared sender per unit of work, rather than threading one
/// notifier through the whole SDK by value.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    notify_tx: tokio::sync::mpsc::UnboundedSender<StoreNotification>,
}

impl Store {
    pub fn new(pool: SqlitePool) -> (Self, tokio::sync::mpsc::UnboundedReceiver<StoreNotification>) {
        let (notify_tx, notify_rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { pool, notify_tx }, notify_rx)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn notifier(&self) -> StoreNotifier {
        StoreNotifier::new(self.notify_tx.clone())
    }

    pub fn teams(&self) -> TeamStore<'_> {
        TeamStore::new(self)
    }

    pub fn conversations(&self) -> ConversationStore<'_> {
        ConversationStore::new(self)
    }

    pub fn app(&self) -> AppStore<'_> {
        AppStore::new(self)
    }

    /// Runs `f` inside a `BEGIN IMMEDIATE` transaction and, if it returns `Ok`, commits and
    /// flushes the accumulated [`StoreNotifier`] operations. Rolled back on `Err`, in which case
    /// no notification is sent.
    pub(crate) async fn with_transaction_and_notifier<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send,
        F: AsyncFnOnce(&mut sqlx::SqliteConnection, &mut StoreNotifier) -> anyhow::Result<T>,
    {
        use sqlx::Acquire;
        let mut txn = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        let mut notifier = self.notifier();
        let value = f(&mut txn, &mut notifier).await?;
        txn.commit().await?;
        notifier.notify();
        Ok(value)
    }
}
