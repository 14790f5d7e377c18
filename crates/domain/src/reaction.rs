use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{first_page_key, reaction_lock_key};
use crate::error::DomainError;
use crate::identity::ActorIdentity;
use crate::ports::cache::CacheStore;
use crate::ports::lock::LockStore;
use crate::ports::message::MessageRepository;
use crate::ports::reaction::ReactionRepository;
use crate::ports::thread::ThreadRepository;
use crate::util::now_ms;
use crate::DomainResult;

pub const MAX_EMOJI_LENGTH: usize = 32;
pub const MAX_BATCH_SIZE: usize = 50;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reaction {
    pub target_id: i64,
    pub is_thread: bool,
    pub user_id: String,
    pub emoji: String,
    pub created_at_ms: i64,
}

/// Short-lived delta-feed entry: one retained logical state per
/// `(target_id, is_thread)`, superseded on every change and purged after the
/// retention window.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionChangeEvent {
    pub target_id: i64,
    /// Parent message id for thread targets, 0 otherwise.
    pub thread_id: i64,
    pub channel_id: i64,
    pub is_thread: bool,
    pub reactions: Vec<Reaction>,
    pub timestamp_ms: i64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReactionOp {
    Add,
    Remove,
    Toggle,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReactionUpdate {
    pub target_id: i64,
    pub is_thread: bool,
    pub emoji: String,
    pub op: ReactionOp,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct BatchItemResult {
    pub target_id: i64,
    pub is_thread: bool,
    pub emoji: String,
    pub ok: bool,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct BatchReport {
    pub success_count: usize,
    pub error_count: usize,
    /// Set only when every item failed.
    pub failed: bool,
    pub details: Vec<BatchItemResult>,
}

#[derive(Clone)]
pub struct ReactionService {
    reactions: Arc<dyn ReactionRepository>,
    messages: Arc<dyn MessageRepository>,
    threads: Arc<dyn ThreadRepository>,
    locks: Arc<dyn LockStore>,
    cache: Arc<dyn CacheStore>,
    lock_ttl: Duration,
}

impl ReactionService {
    pub fn new(
        reactions: Arc<dyn ReactionRepository>,
        messages: Arc<dyn MessageRepository>,
        threads: Arc<dyn ThreadRepository>,
        locks: Arc<dyn LockStore>,
        cache: Arc<dyn CacheStore>,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            reactions,
            messages,
            threads,
            locks,
            cache,
            lock_ttl,
        }
    }

    /// Presence toggles the reaction. A concurrent duplicate for the same
    /// `(user, target, emoji)` fails with `Busy` while the first call holds
    /// the lock; the TTL only bounds a crashed holder.
    pub async fn toggle(
        &self,
        actor: &ActorIdentity,
        target_id: i64,
        is_thread: bool,
        emoji: &str,
    ) -> DomainResult<Vec<Reaction>> {
        self.apply(actor, target_id, is_thread, emoji, ReactionOp::Toggle)
            .await
    }

    /// Applies a list of add/remove/toggle operations, reporting per item.
    /// Partial success is allowed; the batch as a whole fails only when every
    /// item failed.
    pub async fn batch_update(
        &self,
        actor: &ActorIdentity,
        updates: Vec<ReactionUpdate>,
    ) -> DomainResult<BatchReport> {
        if updates.is_empty() {
            return Err(DomainError::Validation("updates is required".into()));
        }
        if updates.len() > MAX_BATCH_SIZE {
            return Err(DomainError::Validation(format!(
                "updates exceeds max batch of {MAX_BATCH_SIZE}"
            )));
        }

        let mut details = Vec::with_capacity(updates.len());
        let mut success_count = 0;
        for update in updates {
            let result = self
                .apply(
                    actor,
                    update.target_id,
                    update.is_thread,
                    &update.emoji,
                    update.op,
                )
                .await;
            let (ok, error) = match result {
                Ok(_) => {
                    success_count += 1;
                    (true, None)
                }
                Err(err) => (false, Some(err.to_string())),
            };
            details.push(BatchItemResult {
                target_id: update.target_id,
                is_thread: update.is_thread,
                emoji: update.emoji,
                ok,
                error,
            });
        }

        let error_count = details.len() - success_count;
        Ok(BatchReport {
            success_count,
            error_count,
            failed: success_count == 0,
            details,
        })
    }

    async fn apply(
        &self,
        actor: &ActorIdentity,
        target_id: i64,
        is_thread: bool,
        emoji: &str,
        op: ReactionOp,
    ) -> DomainResult<Vec<Reaction>> {
        validate_emoji(emoji)?;
        let (channel_id, thread_id) = self.resolve_target(target_id, is_thread).await?;

        let lock_key = reaction_lock_key(&actor.user_id, target_id, is_thread, emoji);
        let acquired = self
            .locks
            .acquire(&lock_key, self.lock_ttl)
            .await
            .map_err(|err| DomainError::Storage(err.to_string()))?;
        if !acquired {
            return Err(DomainError::Busy);
        }

        let result = self
            .apply_locked(actor, target_id, is_thread, emoji, op, channel_id, thread_id)
            .await;

        if let Err(err) = self.locks.release(&lock_key).await {
            tracing::warn!(key = %lock_key, error = %err, "reaction lock release failed");
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_locked(
        &self,
        actor: &ActorIdentity,
        target_id: i64,
        is_thread: bool,
        emoji: &str,
        op: ReactionOp,
        channel_id: i64,
        thread_id: i64,
    ) -> DomainResult<Vec<Reaction>> {
        let existing = self
            .reactions
            .get(target_id, is_thread, &actor.user_id, emoji)
            .await?;

        let changed = match (op, existing) {
            (ReactionOp::Add, Some(_)) => false,
            (ReactionOp::Add, None) | (ReactionOp::Toggle, None) => {
                self.reactions
                    .insert(&Reaction {
                        target_id,
                        is_thread,
                        user_id: actor.user_id.clone(),
                        emoji: emoji.to_string(),
                        created_at_ms: now_ms(),
                    })
                    .await?;
                true
            }
            (ReactionOp::Remove, None) => false,
            (ReactionOp::Remove, Some(_)) | (ReactionOp::Toggle, Some(_)) => {
                self.reactions
                    .remove(target_id, is_thread, &actor.user_id, emoji)
                    .await?
            }
        };

        let snapshot = self.reactions.list_for_target(target_id, is_thread).await?;

        if changed {
            self.reactions
                .record_event(&ReactionChangeEvent {
                    target_id,
                    thread_id,
                    channel_id,
                    is_thread,
                    reactions: snapshot.clone(),
                    timestamp_ms: now_ms(),
                })
                .await?;
            // Channel pages embed reaction arrays.
            if let Err(err) = self.cache.delete(&first_page_key(channel_id)).await {
                tracing::debug!(channel_id, error = %err, "page cache invalidation failed");
            }
        }

        Ok(snapshot)
    }

    async fn resolve_target(&self, target_id: i64, is_thread: bool) -> DomainResult<(i64, i64)> {
        if is_thread {
            let reply = self
                .threads
                .get(target_id)
                .await?
                .filter(|reply| reply.state.is_active())
                .ok_or(DomainError::NotFound)?;
            Ok((reply.channel_id, reply.parent_message_id))
        } else {
            let message = self
                .messages
                .get(target_id)
                .await?
                .filter(|message| message.state.is_active())
                .ok_or(DomainError::NotFound)?;
            Ok((message.channel_id, 0))
        }
    }
}

fn validate_emoji(emoji: &str) -> DomainResult<()> {
    if emoji.is_empty() {
        return Err(DomainError::Validation("emoji is required".into()));
    }
    if emoji.chars().count() > MAX_EMOJI_LENGTH {
        return Err(DomainError::Validation(format!(
            "emoji exceeds max length of {MAX_EMOJI_LENGTH}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emoji_must_be_present_and_bounded() {
        assert!(validate_emoji("👍").is_ok());
        assert!(validate_emoji("").is_err());
        assert!(validate_emoji(&"x".repeat(MAX_EMOJI_LENGTH + 1)).is_err());
    }
}
