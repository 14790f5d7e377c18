use serde::{Deserialize, Serialize};

use super::BoxFuture;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageCreatedEvent {
    pub message_id: i64,
    pub channel_id: i64,
    /// Set when the message is a thread reply.
    pub parent_message_id: Option<i64>,
    pub author_id: String,
    pub created_at_ms: i64,
}

/// Consumed by the external push-notification collaborator. Delivery is
/// best-effort and never fails the write that produced the event.
pub trait NotificationPublisher: Send + Sync {
    fn message_created(&self, event: &MessageCreatedEvent) -> BoxFuture<'_, ()>;
}
