use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::identity::ActorIdentity;
use crate::ports::deletion::DeletionLogRepository;
use crate::ports::message::MessageRepository;
use crate::ports::thread::ThreadRepository;
use crate::util::now_ms;
use crate::DomainResult;

/// Tombstone state of a message or thread reply. Replaces the original
/// nullable `deleted_at` column: a zero or absent timestamp means active, so
/// the legacy zero-date sentinel can never masquerade as a deletion.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Lifecycle {
    Active,
    Deleted { at_ms: i64, by: String },
}

impl Lifecycle {
    pub fn deleted(at_ms: i64, by: impl Into<String>) -> Self {
        Lifecycle::Deleted {
            at_ms,
            by: by.into(),
        }
    }

    /// Maps a legacy `deleted_at` value onto the tagged state. `None` and
    /// zero/negative timestamps are both active.
    pub fn from_deleted_at(deleted_at_ms: Option<i64>, by: impl Into<String>) -> Self {
        match deleted_at_ms {
            Some(at_ms) if at_ms > 0 => Lifecycle::Deleted {
                at_ms,
                by: by.into(),
            },
            _ => Lifecycle::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Lifecycle::Active)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeletionKind {
    Main,
    Thread,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeletionRecord {
    pub message_id: i64,
    pub kind: DeletionKind,
    /// Parent message id for thread replies, 0 otherwise.
    pub thread_id: i64,
    pub channel_id: i64,
    pub deleted_by: String,
    pub deleted_at_ms: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityRef {
    Message(i64),
    Reply(i64),
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub deleted: bool,
    pub cascaded_parent_deleted: bool,
    #[serde(skip)]
    pub channel_id: i64,
}

/// Carries the channel so callers can invalidate the pages and unread
/// entries the row reappears in.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct RestoreOutcome {
    pub restored: bool,
    #[serde(skip)]
    pub channel_id: i64,
}

/// Soft-delete ledger: idempotent tombstoning with an append-only audit log.
/// Attachments and reactions are owned elsewhere and are not cascaded here.
#[derive(Clone)]
pub struct DeletionLedger {
    messages: Arc<dyn MessageRepository>,
    threads: Arc<dyn ThreadRepository>,
    log: Arc<dyn DeletionLogRepository>,
}

impl DeletionLedger {
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        threads: Arc<dyn ThreadRepository>,
        log: Arc<dyn DeletionLogRepository>,
    ) -> Self {
        Self {
            messages,
            threads,
            log,
        }
    }

    /// Idempotent: deleting an already-deleted entity is a no-op success and
    /// appends no second record. Deleting the last active reply under a parent
    /// cascades to the parent, which gets its own record.
    pub async fn soft_delete(
        &self,
        actor: &ActorIdentity,
        entity: EntityRef,
    ) -> DomainResult<DeleteOutcome> {
        match entity {
            EntityRef::Message(id) => self.soft_delete_message(actor, id).await,
            EntityRef::Reply(id) => self.soft_delete_reply(actor, id).await,
        }
    }

    /// Idempotent. Restoring a reply never auto-restores a cascaded parent;
    /// that is a separate explicit call.
    pub async fn restore(
        &self,
        actor: &ActorIdentity,
        entity: EntityRef,
    ) -> DomainResult<RestoreOutcome> {
        match entity {
            EntityRef::Message(id) => {
                let message = self
                    .messages
                    .get(id)
                    .await?
                    .ok_or(DomainError::NotFound)?;
                if message.state.is_active() {
                    return Ok(RestoreOutcome {
                        restored: true,
                        channel_id: message.channel_id,
                    });
                }
                if message.user_id != actor.user_id {
                    return Err(DomainError::Forbidden);
                }
                let restored = self.messages.set_state(id, &Lifecycle::Active).await?;
                Ok(RestoreOutcome {
                    restored,
                    channel_id: message.channel_id,
                })
            }
            EntityRef::Reply(id) => {
                let reply = self.threads.get(id).await?.ok_or(DomainError::NotFound)?;
                if reply.state.is_active() {
                    return Ok(RestoreOutcome {
                        restored: true,
                        channel_id: reply.channel_id,
                    });
                }
                if reply.user_id != actor.user_id {
                    return Err(DomainError::Forbidden);
                }
                let restored = self.threads.set_state(id, &Lifecycle::Active).await?;
                Ok(RestoreOutcome {
                    restored,
                    channel_id: reply.channel_id,
                })
            }
        }
    }

    async fn soft_delete_message(
        &self,
        actor: &ActorIdentity,
        message_id: i64,
    ) -> DomainResult<DeleteOutcome> {
        let message = self
            .messages
            .get(message_id)
            .await?
            .ok_or(DomainError::NotFound)?;
        if !message.state.is_active() {
            return Ok(DeleteOutcome {
                deleted: true,
                cascaded_parent_deleted: false,
                channel_id: message.channel_id,
            });
        }
        if message.user_id != actor.user_id {
            return Err(DomainError::Forbidden);
        }

        let now = now_ms();
        self.messages
            .set_state(message_id, &Lifecycle::deleted(now, &actor.user_id))
            .await?;
        self.log
            .append(&DeletionRecord {
                message_id,
                kind: DeletionKind::Main,
                thread_id: 0,
                channel_id: message.channel_id,
                deleted_by: actor.user_id.clone(),
                deleted_at_ms: now,
            })
            .await?;

        Ok(DeleteOutcome {
            deleted: true,
            cascaded_parent_deleted: false,
            channel_id: message.channel_id,
        })
    }

    async fn soft_delete_reply(
        &self,
        actor: &ActorIdentity,
        thread_message_id: i64,
    ) -> DomainResult<DeleteOutcome> {
        let reply = self
            .threads
            .get(thread_message_id)
            .await?
            .ok_or(DomainError::NotFound)?;
        if !reply.state.is_active() {
            return Ok(DeleteOutcome {
                deleted: true,
                cascaded_parent_deleted: false,
                channel_id: reply.channel_id,
            });
        }
        if reply.user_id != actor.user_id {
            return Err(DomainError::Forbidden);
        }

        let now = now_ms();
        self.threads
            .set_state(thread_message_id, &Lifecycle::deleted(now, &actor.user_id))
            .await?;
        self.log
            .append(&DeletionRecord {
                message_id: thread_message_id,
                kind: DeletionKind::Thread,
                thread_id: reply.parent_message_id,
                channel_id: reply.channel_id,
                deleted_by: actor.user_id.clone(),
                deleted_at_ms: now,
            })
            .await?;

        let cascaded = self
            .cascade_parent_if_empty(actor, reply.parent_message_id)
            .await?;

        Ok(DeleteOutcome {
            deleted: true,
            cascaded_parent_deleted: cascaded,
            channel_id: reply.channel_id,
        })
    }

    /// A parent whose last visible reply disappears is itself removable. The
    /// cascade bypasses the owner check: it is a structural rule, not a user
    /// action on the parent.
    async fn cascade_parent_if_empty(
        &self,
        actor: &ActorIdentity,
        parent_message_id: i64,
    ) -> DomainResult<bool> {
        if self.threads.active_reply_count(parent_message_id).await? > 0 {
            return Ok(false);
        }
        let parent = match self.messages.get(parent_message_id).await? {
            Some(parent) => parent,
            None => return Ok(false),
        };
        if !parent.state.is_active() {
            return Ok(false);
        }

        let now = now_ms();
        self.messages
            .set_state(parent_message_id, &Lifecycle::deleted(now, &actor.user_id))
            .await?;
        self.log
            .append(&DeletionRecord {
                message_id: parent_message_id,
                kind: DeletionKind::Main,
                thread_id: 0,
                channel_id: parent.channel_id,
                deleted_by: actor.user_id.clone(),
                deleted_at_ms: now,
            })
            .await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_date_sentinel_is_active() {
        assert!(Lifecycle::from_deleted_at(None, "a").is_active());
        assert!(Lifecycle::from_deleted_at(Some(0), "a").is_active());
        assert!(Lifecycle::from_deleted_at(Some(-1), "a").is_active());
        assert!(!Lifecycle::from_deleted_at(Some(1), "a").is_active());
    }

    #[test]
    fn lifecycle_serializes_as_tagged_state() {
        let deleted = Lifecycle::deleted(42, "user-1");
        let value = serde_json::to_value(&deleted).unwrap();
        assert_eq!(value["status"], "deleted");
        assert_eq!(value["at_ms"], 42);

        let active: Lifecycle = serde_json::from_value(
            serde_json::json!({ "status": "active" }),
        )
        .unwrap();
        assert!(active.is_active());
    }
}
