//! Engine event notifications.
//!
//! Interested parties subscribe to a broadcast channel; the engine publishes
//! typed events as catalogs and items change. Publishing never blocks and
//! never fails: with no subscribers an event is simply dropped.

use tokio::sync::broadcast;

/// Something observable happened inside the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentEvent {
    /// The merged catalog changed; readers should reopen it
    CatalogUpdated { fingerprint: String },
    ItemInstalled { item_id: i64 },
    ItemUninstalled { item_id: i64 },
    /// A network transfer began (first of possibly many concurrent)
    TransferStarted,
    TransferFinished,
}

/// Cloneable publish/subscribe handle for [`ContentEvent`]s.
///
/// Slow subscribers that fall more than the channel capacity behind lose the
/// oldest events rather than stalling the engine.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ContentEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ContentEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: ContentEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
