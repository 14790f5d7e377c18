use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;

use crate::ports::channel::ChannelRepository;
use crate::ports::message::MessageRepository;
use crate::ports::reaction::ReactionRepository;
use crate::ports::thread::ThreadRepository;
use crate::DomainResult;

/// Result of one check: the offending rows, or the error that kept the check
/// from running. A failed check never hides the others.
#[derive(Clone, Debug, Serialize)]
pub struct CheckOutcome<T> {
    pub items: Vec<T>,
    pub error: Option<String>,
}

impl<T> CheckOutcome<T> {
    fn ok(items: Vec<T>) -> Self {
        Self { items, error: None }
    }

    fn failed(err: impl ToString) -> Self {
        Self {
            items: Vec::new(),
            error: Some(err.to_string()),
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct OrphanReply {
    pub thread_message_id: i64,
    pub parent_message_id: i64,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct DanglingChannelMessage {
    pub message_id: i64,
    pub channel_id: i64,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct DuplicateMembership {
    pub channel_id: i64,
    pub user_id: String,
    pub occurrences: usize,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct DanglingReaction {
    pub target_id: i64,
    pub is_thread: bool,
    pub user_id: String,
    pub emoji: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct IntegrityReport {
    pub orphan_replies: CheckOutcome<OrphanReply>,
    pub dangling_messages: CheckOutcome<DanglingChannelMessage>,
    pub duplicate_memberships: CheckOutcome<DuplicateMembership>,
    pub dangling_reactions: CheckOutcome<DanglingReaction>,
    pub clean: bool,
}

/// Read-only referential sweeps over the raw rows. Reports; never repairs.
#[derive(Clone)]
pub struct IntegrityService {
    channels: Arc<dyn ChannelRepository>,
    messages: Arc<dyn MessageRepository>,
    threads: Arc<dyn ThreadRepository>,
    reactions: Arc<dyn ReactionRepository>,
}

impl IntegrityService {
    pub fn new(
        channels: Arc<dyn ChannelRepository>,
        messages: Arc<dyn MessageRepository>,
        threads: Arc<dyn ThreadRepository>,
        reactions: Arc<dyn ReactionRepository>,
    ) -> Self {
        Self {
            channels,
            messages,
            threads,
            reactions,
        }
    }

    pub async fn report(&self) -> IntegrityReport {
        let orphan_replies = match self.orphan_replies().await {
            Ok(items) => CheckOutcome::ok(items),
            Err(err) => CheckOutcome::failed(err),
        };
        let dangling_messages = match self.dangling_messages().await {
            Ok(items) => CheckOutcome::ok(items),
            Err(err) => CheckOutcome::failed(err),
        };
        let duplicate_memberships = match self.duplicate_memberships().await {
            Ok(items) => CheckOutcome::ok(items),
            Err(err) => CheckOutcome::failed(err),
        };
        let dangling_reactions = match self.dangling_reactions().await {
            Ok(items) => CheckOutcome::ok(items),
            Err(err) => CheckOutcome::failed(err),
        };

        let clean = [
            orphan_replies.items.is_empty() && orphan_replies.error.is_none(),
            dangling_messages.items.is_empty() && dangling_messages.error.is_none(),
            duplicate_memberships.items.is_empty() && duplicate_memberships.error.is_none(),
            dangling_reactions.items.is_empty() && dangling_reactions.error.is_none(),
        ]
        .into_iter()
        .all(|ok| ok);

        IntegrityReport {
            orphan_replies,
            dangling_messages,
            duplicate_memberships,
            dangling_reactions,
            clean,
        }
    }

    /// Replies whose parent message row no longer exists at all. Soft-deleted
    /// parents are fine; only hard-missing rows count.
    async fn orphan_replies(&self) -> DomainResult<Vec<OrphanReply>> {
        let message_ids: HashSet<i64> = self
            .messages
            .channel_refs()
            .await?
            .into_iter()
            .map(|(message_id, _)| message_id)
            .collect();

        let mut orphans: Vec<OrphanReply> = self
            .threads
            .parent_refs()
            .await?
            .into_iter()
            .filter(|(_, parent_id)| !message_ids.contains(parent_id))
            .map(|(thread_message_id, parent_message_id)| OrphanReply {
                thread_message_id,
                parent_message_id,
            })
            .collect();
        orphans.sort_by_key(|row| row.thread_message_id);
        Ok(orphans)
    }

    async fn dangling_messages(&self) -> DomainResult<Vec<DanglingChannelMessage>> {
        let channel_ids: HashSet<i64> = self.channels.ids().await?.into_iter().collect();

        let mut dangling: Vec<DanglingChannelMessage> = self
            .messages
            .channel_refs()
            .await?
            .into_iter()
            .filter(|(_, channel_id)| !channel_ids.contains(channel_id))
            .map(|(message_id, channel_id)| DanglingChannelMessage {
                message_id,
                channel_id,
            })
            .collect();
        dangling.sort_by_key(|row| row.message_id);
        Ok(dangling)
    }

    async fn duplicate_memberships(&self) -> DomainResult<Vec<DuplicateMembership>> {
        let mut occurrences: HashMap<(i64, String), usize> = HashMap::new();
        for row in self.channels.membership_rows().await? {
            *occurrences.entry((row.channel_id, row.user_id)).or_insert(0) += 1;
        }

        let mut duplicates: Vec<DuplicateMembership> = occurrences
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|((channel_id, user_id), occurrences)| DuplicateMembership {
                channel_id,
                user_id,
                occurrences,
            })
            .collect();
        duplicates.sort_by(|a, b| {
            (a.channel_id, &a.user_id).cmp(&(b.channel_id, &b.user_id))
        });
        Ok(duplicates)
    }

    async fn dangling_reactions(&self) -> DomainResult<Vec<DanglingReaction>> {
        let message_ids: HashSet<i64> = self
            .messages
            .channel_refs()
            .await?
            .into_iter()
            .map(|(message_id, _)| message_id)
            .collect();
        let thread_ids: HashSet<i64> = self
            .threads
            .parent_refs()
            .await?
            .into_iter()
            .map(|(thread_message_id, _)| thread_message_id)
            .collect();

        let mut dangling: Vec<DanglingReaction> = self
            .reactions
            .all()
            .await?
            .into_iter()
            .filter(|reaction| {
                let targets = if reaction.is_thread {
                    &thread_ids
                } else {
                    &message_ids
                };
                !targets.contains(&reaction.target_id)
            })
            .map(|reaction| DanglingReaction {
                target_id: reaction.target_id,
                is_thread: reaction.is_thread,
                user_id: reaction.user_id,
                emoji: reaction.emoji,
            })
            .collect();
        dangling.sort_by(|a, b| {
            (a.target_id, a.is_thread, &a.user_id).cmp(&(b.target_id, b.is_thread, &b.user_id))
        });
        Ok(dangling)
    }
}
