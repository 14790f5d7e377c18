use std::collections::HashMap;
use std::sync::Arc;

use kanal_domain::ports::attachments::{AttachmentError, AttachmentMeta, AttachmentStore};
use kanal_domain::ports::directory::{UserDirectory, UserProfile};
use kanal_domain::ports::notify::{MessageCreatedEvent, NotificationPublisher};
use kanal_domain::ports::BoxFuture;
use kanal_domain::DomainResult;
use tokio::sync::RwLock;

/// Fixed profile table seeded at startup. Unknown users resolve to no entry;
/// callers fall back to the raw id.
#[derive(Default)]
pub struct StaticUserDirectory {
    profiles: Arc<RwLock<HashMap<String, UserProfile>>>,
}

impl StaticUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, profile: UserProfile) {
        let mut profiles = self.profiles.write().await;
        profiles.insert(profile.user_id.clone(), profile);
    }
}

impl UserDirectory for StaticUserDirectory {
    fn profiles(
        &self,
        user_ids: &[String],
    ) -> BoxFuture<'_, DomainResult<HashMap<String, UserProfile>>> {
        let user_ids = user_ids.to_vec();
        let profiles = self.profiles.clone();
        Box::pin(async move {
            let profiles = profiles.read().await;
            Ok(user_ids
                .iter()
                .filter_map(|id| profiles.get(id).cloned())
                .map(|profile| (profile.user_id.clone(), profile))
                .collect())
        })
    }
}

/// Stand-in for the push-notification collaborator: logs the event and moves
/// on.
#[derive(Default, Clone)]
pub struct TracingNotificationPublisher;

impl NotificationPublisher for TracingNotificationPublisher {
    fn message_created(&self, event: &MessageCreatedEvent) -> BoxFuture<'_, ()> {
        let event = event.clone();
        Box::pin(async move {
            tracing::info!(
                message_id = event.message_id,
                channel_id = event.channel_id,
                parent_message_id = event.parent_message_id,
                author_id = %event.author_id,
                "message created"
            );
        })
    }
}

/// Attachment metadata registry. Uploads are registered out of band; `attach`
/// binds them to a message.
#[derive(Default)]
pub struct InMemoryAttachmentStore {
    uploads: Arc<RwLock<HashMap<String, AttachmentMeta>>>,
    by_message: Arc<RwLock<HashMap<i64, Vec<AttachmentMeta>>>>,
}

impl InMemoryAttachmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_upload(&self, meta: AttachmentMeta) {
        let mut uploads = self.uploads.write().await;
        uploads.insert(meta.attachment_id.clone(), meta);
    }
}

impl AttachmentStore for InMemoryAttachmentStore {
    fn attach(
        &self,
        message_id: i64,
        attachment_ids: &[String],
    ) -> BoxFuture<'_, Result<Vec<AttachmentMeta>, AttachmentError>> {
        let attachment_ids = attachment_ids.to_vec();
        let uploads = self.uploads.clone();
        let by_message = self.by_message.clone();
        Box::pin(async move {
            let uploads = uploads.read().await;
            let mut bound = Vec::with_capacity(attachment_ids.len());
            for id in &attachment_ids {
                let meta = uploads
                    .get(id)
                    .cloned()
                    .ok_or_else(|| AttachmentError::NotFound(id.clone()))?;
                bound.push(meta);
            }
            drop(uploads);

            let mut by_message = by_message.write().await;
            by_message
                .entry(message_id)
                .or_default()
                .extend(bound.clone());
            Ok(bound)
        })
    }

    fn for_messages(
        &self,
        message_ids: &[i64],
    ) -> BoxFuture<'_, Result<HashMap<i64, Vec<AttachmentMeta>>, AttachmentError>> {
        let message_ids = message_ids.to_vec();
        let by_message = self.by_message.clone();
        Box::pin(async move {
            let by_message = by_message.read().await;
            Ok(message_ids
                .iter()
                .filter_map(|id| by_message.get(id).map(|metas| (*id, metas.clone())))
                .collect())
        })
    }
}
