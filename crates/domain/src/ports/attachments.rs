use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::BoxFuture;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttachmentMeta {
    pub attachment_id: String,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub url: String,
}

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("attachment not found: {0}")]
    NotFound(String),
    #[error("attachment store error: {0}")]
    Store(String),
}

/// Attachment metadata, owned by the external file-storage collaborator.
pub trait AttachmentStore: Send + Sync {
    /// Binds uploaded attachments to a message and returns their metadata.
    fn attach(
        &self,
        message_id: i64,
        attachment_ids: &[String],
    ) -> BoxFuture<'_, Result<Vec<AttachmentMeta>, AttachmentError>>;

    /// One batched fetch for a page of messages.
    fn for_messages(
        &self,
        message_ids: &[i64],
    ) -> BoxFuture<'_, Result<HashMap<i64, Vec<AttachmentMeta>>, AttachmentError>>;
}
