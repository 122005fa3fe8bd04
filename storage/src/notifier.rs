//! Local-store change notifications: a write accumulates entity operations on a
//! [`StoreNotifier`], and `notify()` flushes them to the in-process subscriber channel after
//! commit so the app layer only sees entities that actually survived.

use std::collections::BTreeMap;

use enumset::{EnumSet, EnumSetType};
use wire_sdk_common::{QualifiedId, TeamId};

#[derive(Debug, EnumSetType)]
pub enum StoreOperation {
    Add,
    Update,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StoreEntityId {
    Team(TeamId),
    Conversation(QualifiedId),
    Member {
        conversation: QualifiedId,
        user: QualifiedId,
    },
}

/// Accumulated, deduplicated set of entity operations since the last drain.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StoreNotification {
    pub ops: BTreeMap<StoreEntityId, EnumSet<StoreOperation>>,
}

impl StoreNotification {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Accumulates entity operations during a unit of work; call [`StoreNotifier::notify`] once the
/// transaction that produced them has committed.
pub struct StoreNotifier {
    pending: StoreNotification,
    sender: Option<tokio::sync::mpsc::UnboundedSender<StoreNotification>>,
}

impl StoreNotifier {
    pub fn new(sender: tokio::sync::mpsc::UnboundedSender<StoreNotification>) -> Self {
        Self {
            pending: StoreNotification::default(),
            sender: Some(sender),
        }
    }

    /// A notifier with no subscriber; used in tests and one-off migrations.
    pub fn noop() -> Self {
        Self {
            pending: StoreNotification::default(),
            sender: None,
        }
    }

    pub fn add(&mut self, entity_id: StoreEntityId) {
        self.pending.ops.entry(entity_id).or_default().insert(StoreOperation::Add);
    }

    pub fn update(&mut self, entity_id: StoreEntityId) {
        self.pending.ops.entry(entity_id).or_default().insert(StoreOperation::Update);
    }

    pub fn remove(&mut self, entity_id: StoreEntityId) {
        self.pending.ops.entry(entity_id).or_default().insert(StoreOperation::Remove);
    }

    /// Flushes accumulated operations to the subscriber channel, if any, and clears them.
    pub fn notify(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let notification = std::mem::take(&mut self.pending);
        if let Some(sender) = &self.sender {
            // A closed receiver means nobody is listening right now; the change is still
            // reflected in the store itself, so this is not an error.
            let _ = sender.send(notification);
        }
    }
}
