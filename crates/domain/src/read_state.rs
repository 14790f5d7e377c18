use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::unread_key;
use crate::error::DomainError;
use crate::identity::ActorIdentity;
use crate::ports::cache::CacheStore;
use crate::ports::channel::ChannelRepository;
use crate::ports::message::MessageRepository;
use crate::ports::read_state::ReadStateRepository;
use crate::ports::thread::ThreadRepository;
use crate::util::now_ms;
use crate::DomainResult;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadCursor {
    pub user_id: String,
    pub channel_id: i64,
    pub last_read_message_id: i64,
    pub last_viewed_at_ms: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThreadReadCursor {
    pub user_id: String,
    pub parent_message_id: i64,
    pub last_viewed_at_ms: i64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnreadCounts {
    pub channels: HashMap<i64, u64>,
    pub threads: HashMap<i64, u64>,
    pub total: u64,
}

#[derive(Clone)]
pub struct UnreadService {
    read_state: Arc<dyn ReadStateRepository>,
    messages: Arc<dyn MessageRepository>,
    threads: Arc<dyn ThreadRepository>,
    channels: Arc<dyn ChannelRepository>,
    cache: Arc<dyn CacheStore>,
    cache_ttl: Duration,
}

impl UnreadService {
    pub fn new(
        read_state: Arc<dyn ReadStateRepository>,
        messages: Arc<dyn MessageRepository>,
        threads: Arc<dyn ThreadRepository>,
        channels: Arc<dyn ChannelRepository>,
        cache: Arc<dyn CacheStore>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            read_state,
            messages,
            threads,
            channels,
            cache,
            cache_ttl,
        }
    }

    /// Monotonic upsert: a cursor never moves backward. Marking with an older
    /// `upto_message_id` than the stored cursor is a no-op.
    pub async fn mark_channel_read(
        &self,
        actor: &ActorIdentity,
        channel_id: i64,
        upto_message_id: Option<i64>,
    ) -> DomainResult<ReadCursor> {
        if self.channels.get(channel_id).await?.is_none() {
            return Err(DomainError::NotFound);
        }
        if !self.channels.is_member(channel_id, &actor.user_id).await? {
            return Err(DomainError::Forbidden);
        }

        let upto = match upto_message_id {
            Some(id) => id,
            None => self.messages.max_id(channel_id).await?,
        };

        let existing = self
            .read_state
            .channel_cursor(&actor.user_id, channel_id)
            .await?;
        if let Some(cursor) = existing {
            if cursor.last_read_message_id >= upto {
                return Ok(cursor);
            }
        }

        let cursor = self
            .read_state
            .upsert_channel_cursor(&ReadCursor {
                user_id: actor.user_id.clone(),
                channel_id,
                last_read_message_id: upto,
                last_viewed_at_ms: now_ms(),
            })
            .await?;
        self.invalidate_user(&actor.user_id).await;
        Ok(cursor)
    }

    pub async fn mark_thread_read(
        &self,
        actor: &ActorIdentity,
        parent_message_id: i64,
        upto_ms: Option<i64>,
    ) -> DomainResult<ThreadReadCursor> {
        // A deleted parent stays markable: its replies remain visible.
        let parent = self
            .messages
            .get(parent_message_id)
            .await?
            .ok_or(DomainError::NotFound)?;
        if !self
            .channels
            .is_member(parent.channel_id, &actor.user_id)
            .await?
        {
            return Err(DomainError::Forbidden);
        }

        let upto = upto_ms.unwrap_or_else(now_ms);
        let existing = self
            .read_state
            .thread_cursor(&actor.user_id, parent_message_id)
            .await?;
        if let Some(cursor) = existing {
            if cursor.last_viewed_at_ms >= upto {
                return Ok(cursor);
            }
        }

        let cursor = self
            .read_state
            .upsert_thread_cursor(&ThreadReadCursor {
                user_id: actor.user_id.clone(),
                parent_message_id,
                last_viewed_at_ms: upto,
            })
            .await?;
        self.invalidate_user(&actor.user_id).await;
        Ok(cursor)
    }

    /// Cached per user with a short TTL; any write that could change the
    /// answer invalidates the affected members' entries explicitly.
    pub async fn unread_counts(
        &self,
        actor: &ActorIdentity,
        force_refresh: bool,
    ) -> DomainResult<UnreadCounts> {
        let key = unread_key(&actor.user_id);
        if !force_refresh {
            if let Ok(Some(cached)) = self.cache.get(&key).await {
                if let Ok(counts) = serde_json::from_value::<UnreadCounts>(cached) {
                    return Ok(counts);
                }
            }
        }

        let counts = self.compute(actor).await?;

        if let Ok(value) = serde_json::to_value(&counts) {
            if let Err(err) = self.cache.set(&key, &value, self.cache_ttl).await {
                tracing::debug!(user_id = %actor.user_id, error = %err, "unread cache write failed");
            }
        }
        Ok(counts)
    }

    async fn compute(&self, actor: &ActorIdentity) -> DomainResult<UnreadCounts> {
        let channels = self.channels.channels_for_user(&actor.user_id).await?;

        let mut channel_pairs = Vec::with_capacity(channels.len());
        for channel in &channels {
            let after_id = self
                .read_state
                .channel_cursor(&actor.user_id, channel.id)
                .await?
                .map(|cursor| cursor.last_read_message_id)
                .unwrap_or(0);
            channel_pairs.push((channel.id, after_id));
        }
        let channel_counts = self
            .messages
            .unread_counts(&actor.user_id, &channel_pairs)
            .await?;

        let member_channels: std::collections::HashSet<i64> =
            channels.iter().map(|channel| channel.id).collect();
        let participated: Vec<i64> = self
            .threads
            .participated_parents(&actor.user_id)
            .await?
            .into_iter()
            .filter(|(_, channel_id)| member_channels.contains(channel_id))
            .map(|(parent_id, _)| parent_id)
            .collect();

        let thread_counts = if participated.is_empty() {
            HashMap::new()
        } else {
            let cursors = self
                .read_state
                .thread_cursors(&actor.user_id, &participated)
                .await?;
            let pairs: Vec<(i64, i64)> = participated
                .iter()
                .map(|parent_id| {
                    let since = cursors
                        .get(parent_id)
                        .map(|cursor| cursor.last_viewed_at_ms)
                        .unwrap_or(0);
                    (*parent_id, since)
                })
                .collect();
            self.threads
                .unread_counts(&actor.user_id, &pairs)
                .await?
                .into_iter()
                .filter(|(_, count)| *count > 0)
                .collect()
        };

        let total = channel_counts.values().sum::<u64>() + thread_counts.values().sum::<u64>();
        Ok(UnreadCounts {
            channels: channel_counts,
            threads: thread_counts,
            total,
        })
    }

    pub async fn invalidate_user(&self, user_id: &str) {
        if let Err(err) = self.cache.delete(&unread_key(user_id)).await {
            tracing::warn!(user_id, error = %err, "unread cache invalidation failed");
        }
    }

    /// A new message touches every member of its channel, so invalidation
    /// fans out to all of them, not just the writer.
    pub async fn invalidate_channel_members(&self, channel_id: i64) {
        match self.channels.members(channel_id).await {
            Ok(members) => {
                for member in members {
                    self.invalidate_user(&member).await;
                }
            }
            Err(err) => {
                tracing::warn!(channel_id, error = %err, "member fan-out lookup failed");
            }
        }
    }
}
