use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::unread_key;
use crate::deletion::Lifecycle;
use crate::error::DomainError;
use crate::identity::ActorIdentity;
use crate::message::{profile_parts, Message, Pagination, MAX_BODY_LENGTH, MAX_PAGE_SIZE};
use crate::ports::cache::CacheStore;
use crate::ports::channel::ChannelRepository;
use crate::ports::directory::UserDirectory;
use crate::ports::message::MessageRepository;
use crate::ports::notify::{MessageCreatedEvent, NotificationPublisher};
use crate::ports::reaction::ReactionRepository;
use crate::ports::read_state::ReadStateRepository;
use crate::ports::thread::ThreadRepository;
use crate::reaction::Reaction;
use crate::util::now_ms;
use crate::DomainResult;

pub const MAX_INFO_BATCH: usize = 100;
const MAX_AVATARS: usize = 3;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThreadMessage {
    pub id: i64,
    pub parent_message_id: i64,
    /// Denormalized from the parent at create time so the poll feed can scan
    /// replies per channel without walking parents.
    pub channel_id: i64,
    pub user_id: String,
    pub body: String,
    pub created_at_ms: i64,
    pub state: Lifecycle,
}

#[derive(Clone, Debug)]
pub struct NewThreadMessage {
    pub parent_message_id: i64,
    pub channel_id: i64,
    pub user_id: String,
    pub body: String,
    pub created_at_ms: i64,
}

/// Per-parent rollup produced by one batched repository pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadSummaryRow {
    pub parent_message_id: i64,
    pub reply_count: u64,
    pub latest_reply_at_ms: i64,
    /// Reply authors, newest first, deduplicated.
    pub recent_author_ids: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HydratedReply {
    #[serde(flatten)]
    pub reply: ThreadMessage,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub reactions: Vec<Reaction>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThreadPage {
    pub parent: Message,
    pub replies: Vec<HydratedReply>,
    pub pagination: Pagination,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThreadInfo {
    pub reply_count: u64,
    pub unread_count: u64,
    /// Relative-time bucket of the newest reply, `None` when there are none.
    pub latest_reply: Option<String>,
    pub avatars: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct ThreadInfoInput {
    pub channel_id: i64,
    pub parent_message_ids: Vec<i64>,
    pub include_deleted: bool,
}

#[derive(Clone)]
pub struct ThreadService {
    threads: Arc<dyn ThreadRepository>,
    messages: Arc<dyn MessageRepository>,
    channels: Arc<dyn ChannelRepository>,
    reactions: Arc<dyn ReactionRepository>,
    read_state: Arc<dyn ReadStateRepository>,
    directory: Arc<dyn UserDirectory>,
    notifier: Arc<dyn NotificationPublisher>,
    cache: Arc<dyn CacheStore>,
}

impl ThreadService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        threads: Arc<dyn ThreadRepository>,
        messages: Arc<dyn MessageRepository>,
        channels: Arc<dyn ChannelRepository>,
        reactions: Arc<dyn ReactionRepository>,
        read_state: Arc<dyn ReadStateRepository>,
        directory: Arc<dyn UserDirectory>,
        notifier: Arc<dyn NotificationPublisher>,
        cache: Arc<dyn CacheStore>,
    ) -> Self {
        Self {
            threads,
            messages,
            channels,
            reactions,
            read_state,
            directory,
            notifier,
            cache,
        }
    }

    /// Fails when the parent does not exist or is already deleted at send
    /// time. A parent deleted afterwards leaves existing replies valid.
    pub async fn reply(
        &self,
        actor: &ActorIdentity,
        parent_message_id: i64,
        body: String,
    ) -> DomainResult<ThreadMessage> {
        let body = body.trim().to_string();
        if body.is_empty() {
            return Err(DomainError::Validation("reply body is required".into()));
        }
        if body.chars().count() > MAX_BODY_LENGTH {
            return Err(DomainError::Validation(format!(
                "body exceeds max length of {MAX_BODY_LENGTH}"
            )));
        }

        let parent = self
            .messages
            .get(parent_message_id)
            .await?
            .filter(|parent| parent.state.is_active())
            .ok_or(DomainError::NotFound)?;
        if !self
            .channels
            .is_member(parent.channel_id, &actor.user_id)
            .await?
        {
            return Err(DomainError::Forbidden);
        }

        let reply = self
            .threads
            .create(&NewThreadMessage {
                parent_message_id,
                channel_id: parent.channel_id,
                user_id: actor.user_id.clone(),
                body,
                created_at_ms: now_ms(),
            })
            .await?;

        self.notifier
            .message_created(&MessageCreatedEvent {
                message_id: reply.id,
                channel_id: reply.channel_id,
                parent_message_id: Some(parent_message_id),
                author_id: reply.user_id.clone(),
                created_at_ms: reply.created_at_ms,
            })
            .await;

        self.invalidate_unread_fanout(reply.channel_id).await;

        Ok(reply)
    }

    pub async fn list_replies(
        &self,
        actor: &ActorIdentity,
        parent_message_id: i64,
        page: usize,
        page_size: usize,
        include_deleted: bool,
    ) -> DomainResult<ThreadPage> {
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

        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let rows = self
            .threads
            .list_by_parent(parent_message_id, page, page_size, include_deleted)
            .await?;
        let has_more = rows.len() == page_size;

        let ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
        let mut reactions = self.reactions.list_for_targets(&ids, true).await?;
        let mut user_ids: Vec<String> = rows.iter().map(|row| row.user_id.clone()).collect();
        user_ids.sort();
        user_ids.dedup();
        let profiles = self.directory.profiles(&user_ids).await.unwrap_or_default();

        let replies = rows
            .into_iter()
            .map(|reply| {
                let (display_name, avatar_url) = profile_parts(&profiles, &reply.user_id);
                HydratedReply {
                    reactions: reactions.remove(&reply.id).unwrap_or_default(),
                    display_name,
                    avatar_url,
                    reply,
                }
            })
            .collect();

        Ok(ThreadPage {
            parent,
            replies,
            pagination: Pagination {
                page,
                page_size,
                has_more,
            },
        })
    }

    /// Batched rollups for a channel page load. Stays O(1) repository calls
    /// per batch: one summary pass, one cursor fetch, one unread pass, one
    /// profile lookup.
    pub async fn info(
        &self,
        actor: &ActorIdentity,
        input: ThreadInfoInput,
    ) -> DomainResult<HashMap<i64, ThreadInfo>> {
        if input.parent_message_ids.is_empty() {
            return Err(DomainError::Validation(
                "parent_message_ids is required".into(),
            ));
        }
        if input.parent_message_ids.len() > MAX_INFO_BATCH {
            return Err(DomainError::Validation(format!(
                "parent_message_ids exceeds max batch of {MAX_INFO_BATCH}"
            )));
        }
        if self.channels.get(input.channel_id).await?.is_none() {
            return Err(DomainError::NotFound);
        }
        if !self
            .channels
            .is_member(input.channel_id, &actor.user_id)
            .await?
        {
            return Err(DomainError::Forbidden);
        }

        let mut ids = input.parent_message_ids.clone();
        ids.sort_unstable();
        ids.dedup();

        let summaries = self.threads.summaries(&ids, input.include_deleted).await?;
        let summary_map: HashMap<i64, &ThreadSummaryRow> = summaries
            .iter()
            .map(|row| (row.parent_message_id, row))
            .collect();

        let cursors = self.read_state.thread_cursors(&actor.user_id, &ids).await?;
        let unread_pairs: Vec<(i64, i64)> = summaries
            .iter()
            .map(|row| {
                let since = cursors
                    .get(&row.parent_message_id)
                    .map(|cursor| cursor.last_viewed_at_ms)
                    .unwrap_or(0);
                (row.parent_message_id, since)
            })
            .collect();
        let unread = self
            .threads
            .unread_counts(&actor.user_id, &unread_pairs)
            .await?;

        let mut author_ids: Vec<String> = summaries
            .iter()
            .flat_map(|row| row.recent_author_ids.iter().take(MAX_AVATARS).cloned())
            .collect();
        author_ids.sort();
        author_ids.dedup();
        let profiles = self.directory.profiles(&author_ids).await.unwrap_or_default();

        let now = now_ms();
        let mut output = HashMap::with_capacity(ids.len());
        for id in ids {
            let info = match summary_map.get(&id) {
                Some(row) => ThreadInfo {
                    reply_count: row.reply_count,
                    unread_count: unread.get(&id).copied().unwrap_or(0),
                    latest_reply: Some(relative_time_bucket(now, row.latest_reply_at_ms)),
                    avatars: row
                        .recent_author_ids
                        .iter()
                        .take(MAX_AVATARS)
                        .filter_map(|author| {
                            profiles.get(author).and_then(|p| p.avatar_url.clone())
                        })
                        .collect(),
                },
                None => ThreadInfo {
                    reply_count: 0,
                    unread_count: 0,
                    latest_reply: None,
                    avatars: Vec::new(),
                },
            };
            output.insert(id, info);
        }
        Ok(output)
    }

    async fn invalidate_unread_fanout(&self, channel_id: i64) {
        match self.channels.members(channel_id).await {
            Ok(members) => {
                for member in members {
                    if let Err(err) = self.cache.delete(&unread_key(&member)).await {
                        tracing::warn!(
                            channel_id,
                            user_id = %member,
                            error = %err,
                            "unread cache invalidation failed"
                        );
                    }
                }
            }
            Err(err) => {
                tracing::warn!(channel_id, error = %err, "member fan-out lookup failed");
            }
        }
    }
}

/// Display bucket for the newest reply. The boundaries are part of the
/// contract: under a minute reads "just now", then minutes, hours, days.
pub fn relative_time_bucket(now_ms: i64, then_ms: i64) -> String {
    let delta_secs = (now_ms - then_ms).max(0) / 1_000;
    if delta_secs < 60 {
        return "just now".to_string();
    }
    let minutes = delta_secs / 60;
    if minutes < 60 {
        return plural(minutes, "minute");
    }
    let hours = minutes / 60;
    if hours < 24 {
        return plural(hours, "hour");
    }
    plural(hours / 24, "day")
}

fn plural(count: i64, unit: &str) -> String {
    if count == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{count} {unit}s ago")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: i64 = 60_000;
    const HOUR: i64 = 60 * MINUTE;
    const DAY: i64 = 24 * HOUR;

    #[test]
    fn buckets_match_contract() {
        let now = 10 * DAY;
        assert_eq!(relative_time_bucket(now, now), "just now");
        assert_eq!(relative_time_bucket(now, now - 59_000), "just now");
        assert_eq!(relative_time_bucket(now, now - MINUTE), "1 minute ago");
        assert_eq!(relative_time_bucket(now, now - 5 * MINUTE), "5 minutes ago");
        assert_eq!(relative_time_bucket(now, now - HOUR), "1 hour ago");
        assert_eq!(relative_time_bucket(now, now - 23 * HOUR), "23 hours ago");
        assert_eq!(relative_time_bucket(now, now - DAY), "1 day ago");
        assert_eq!(relative_time_bucket(now, now - 3 * DAY), "3 days ago");
    }

    #[test]
    fn future_timestamps_clamp_to_just_now() {
        assert_eq!(relative_time_bucket(0, 5_000), "just now");
    }
}
