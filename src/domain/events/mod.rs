//! Cart events and user-facing notices

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;
use crate::domain::value_objects::OwnerId;

/// Published to the event bus after every successful cart mutation.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CartEvent {
    ItemAdded { owner: OwnerId, product_id: Uuid, quantity: u32 },
    QuantityChanged { owner: OwnerId, product_id: Uuid, quantity: u32 },
    ItemRemoved { owner: OwnerId, product_id: Uuid },
    Cleared { owner: OwnerId },
    CheckedOut { owner: OwnerId, total: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel { Success, Error, Info }

/// A transient, dismissible message for the storefront UI. Notices are a side
/// channel; operations additionally report failure through their return value.
#[derive(Clone, Debug, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

/// Fan-out handle for notices. Dropped messages (no subscribers) are fine.
#[derive(Clone, Debug)]
pub struct Notifier {
    tx: broadcast::Sender<Notice>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> { self.tx.subscribe() }

    pub fn success(&self, message: impl Into<String>) { self.send(NoticeLevel::Success, message); }
    pub fn error(&self, message: impl Into<String>) { self.send(NoticeLevel::Error, message); }
    pub fn info(&self, message: impl Into<String>) { self.send(NoticeLevel::Info, message); }

    fn send(&self, level: NoticeLevel, message: impl Into<String>) {
        let _ = self.tx.send(Notice { level, message: message.into() });
    }
}

impl Default for Notifier {
    fn default() -> Self { Self::new(64) }
}
