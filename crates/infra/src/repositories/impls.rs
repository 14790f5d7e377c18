use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use kanal_domain::channel::{Channel, ChannelMember, NewChannel};
use kanal_domain::deletion::{DeletionKind, DeletionRecord, Lifecycle};
use kanal_domain::error::DomainError;
use kanal_domain::message::{Message, NewMessage};
use kanal_domain::ports::channel::ChannelRepository;
use kanal_domain::ports::deletion::DeletionLogRepository;
use kanal_domain::ports::message::MessageRepository;
use kanal_domain::ports::reaction::ReactionRepository;
use kanal_domain::ports::read_state::ReadStateRepository;
use kanal_domain::ports::thread::ThreadRepository;
use kanal_domain::ports::BoxFuture;
use kanal_domain::reaction::{Reaction, ReactionChangeEvent};
use kanal_domain::read_state::{ReadCursor, ThreadReadCursor};
use kanal_domain::thread::{NewThreadMessage, ThreadMessage, ThreadSummaryRow};
use kanal_domain::DomainResult;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryChannelRepository {
    channels: Arc<RwLock<HashMap<i64, Channel>>>,
    members: Arc<RwLock<Vec<ChannelMember>>>,
    next_id: AtomicI64,
}

impl InMemoryChannelRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChannelRepository for InMemoryChannelRepository {
    fn create(&self, channel: &NewChannel) -> BoxFuture<'_, DomainResult<Channel>> {
        let channel = channel.clone();
        let channels = self.channels.clone();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Box::pin(async move {
            let stored = Channel {
                id,
                name: channel.name,
                kind: channel.kind,
                created_at_ms: channel.created_at_ms,
            };
            let mut channels = channels.write().await;
            channels.insert(id, stored.clone());
            Ok(stored)
        })
    }

    fn get(&self, channel_id: i64) -> BoxFuture<'_, DomainResult<Option<Channel>>> {
        let channels = self.channels.clone();
        Box::pin(async move {
            let channels = channels.read().await;
            Ok(channels.get(&channel_id).cloned())
        })
    }

    fn add_member(
        &self,
        channel_id: i64,
        user_id: &str,
        joined_at_ms: i64,
    ) -> BoxFuture<'_, DomainResult<ChannelMember>> {
        let user_id = user_id.to_string();
        let members = self.members.clone();
        Box::pin(async move {
            let row = ChannelMember {
                channel_id,
                user_id,
                joined_at_ms,
            };
            let mut members = members.write().await;
            members.push(row.clone());
            Ok(row)
        })
    }

    fn is_member(&self, channel_id: i64, user_id: &str) -> BoxFuture<'_, DomainResult<bool>> {
        let user_id = user_id.to_string();
        let members = self.members.clone();
        Box::pin(async move {
            let members = members.read().await;
            Ok(members
                .iter()
                .any(|row| row.channel_id == channel_id && row.user_id == user_id))
        })
    }

    fn members(&self, channel_id: i64) -> BoxFuture<'_, DomainResult<Vec<String>>> {
        let members = self.members.clone();
        Box::pin(async move {
            let members = members.read().await;
            let mut out: Vec<String> = members
                .iter()
                .filter(|row| row.channel_id == channel_id)
                .map(|row| row.user_id.clone())
                .collect();
            out.sort();
            out.dedup();
            Ok(out)
        })
    }

    fn channels_for_user(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<Channel>>> {
        let user_id = user_id.to_string();
        let channels = self.channels.clone();
        let members = self.members.clone();
        Box::pin(async move {
            let members = members.read().await;
            let mut ids: Vec<i64> = members
                .iter()
                .filter(|row| row.user_id == user_id)
                .map(|row| row.channel_id)
                .collect();
            ids.sort_unstable();
            ids.dedup();

            let channels = channels.read().await;
            Ok(ids
                .into_iter()
                .filter_map(|id| channels.get(&id).cloned())
                .collect())
        })
    }

    fn ids(&self) -> BoxFuture<'_, DomainResult<Vec<i64>>> {
        let channels = self.channels.clone();
        Box::pin(async move {
            let channels = channels.read().await;
            let mut ids: Vec<i64> = channels.keys().copied().collect();
            ids.sort_unstable();
            Ok(ids)
        })
    }

    fn membership_rows(&self) -> BoxFuture<'_, DomainResult<Vec<ChannelMember>>> {
        let members = self.members.clone();
        Box::pin(async move {
            let members = members.read().await;
            Ok(members.clone())
        })
    }
}

#[derive(Default)]
pub struct InMemoryMessageRepository {
    messages: Arc<RwLock<HashMap<i64, Message>>>,
    next_id: AtomicI64,
}

impl InMemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageRepository for InMemoryMessageRepository {
    fn create(&self, message: &NewMessage) -> BoxFuture<'_, DomainResult<Message>> {
        let message = message.clone();
        let messages = self.messages.clone();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Box::pin(async move {
            let stored = Message {
                id,
                channel_id: message.channel_id,
                user_id: message.user_id,
                body: message.body,
                created_at_ms: message.created_at_ms,
                state: Lifecycle::Active,
            };
            let mut messages = messages.write().await;
            messages.insert(id, stored.clone());
            Ok(stored)
        })
    }

    fn get(&self, message_id: i64) -> BoxFuture<'_, DomainResult<Option<Message>>> {
        let messages = self.messages.clone();
        Box::pin(async move {
            let messages = messages.read().await;
            Ok(messages.get(&message_id).cloned())
        })
    }

    fn list_page(
        &self,
        channel_id: i64,
        page: usize,
        page_size: usize,
        after_id: Option<i64>,
    ) -> BoxFuture<'_, DomainResult<Vec<Message>>> {
        let messages = self.messages.clone();
        Box::pin(async move {
            let messages = messages.read().await;
            let mut rows: Vec<Message> = messages
                .values()
                .filter(|row| row.channel_id == channel_id && row.state.is_active())
                .filter(|row| after_id.map(|after| row.id > after).unwrap_or(true))
                .cloned()
                .collect();
            rows.sort_by_key(|row| std::cmp::Reverse(row.id));
            let skip = page.saturating_sub(1) * page_size;
            Ok(rows.into_iter().skip(skip).take(page_size).collect())
        })
    }

    fn list_after(
        &self,
        channel_id: i64,
        after_id: i64,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<Message>>> {
        let messages = self.messages.clone();
        Box::pin(async move {
            let messages = messages.read().await;
            let mut rows: Vec<Message> = messages
                .values()
                .filter(|row| {
                    row.channel_id == channel_id && row.id > after_id && row.state.is_active()
                })
                .cloned()
                .collect();
            rows.sort_by_key(|row| row.id);
            rows.truncate(limit);
            Ok(rows)
        })
    }

    fn max_id(&self, channel_id: i64) -> BoxFuture<'_, DomainResult<i64>> {
        let messages = self.messages.clone();
        Box::pin(async move {
            let messages = messages.read().await;
            Ok(messages
                .values()
                .filter(|row| row.channel_id == channel_id)
                .map(|row| row.id)
                .max()
                .unwrap_or(0))
        })
    }

    fn set_state(
        &self,
        message_id: i64,
        state: &Lifecycle,
    ) -> BoxFuture<'_, DomainResult<bool>> {
        let state = state.clone();
        let messages = self.messages.clone();
        Box::pin(async move {
            let mut messages = messages.write().await;
            match messages.get_mut(&message_id) {
                Some(row) => {
                    row.state = state;
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    fn unread_counts(
        &self,
        exclude_user: &str,
        pairs: &[(i64, i64)],
    ) -> BoxFuture<'_, DomainResult<HashMap<i64, u64>>> {
        let exclude_user = exclude_user.to_string();
        let pairs = pairs.to_vec();
        let messages = self.messages.clone();
        Box::pin(async move {
            let messages = messages.read().await;
            let mut counts = HashMap::with_capacity(pairs.len());
            for (channel_id, after_id) in pairs {
                let count = messages
                    .values()
                    .filter(|row| {
                        row.channel_id == channel_id
                            && row.id > after_id
                            && row.state.is_active()
                            && row.user_id != exclude_user
                    })
                    .count() as u64;
                counts.insert(channel_id, count);
            }
            Ok(counts)
        })
    }

    fn channel_refs(&self) -> BoxFuture<'_, DomainResult<Vec<(i64, i64)>>> {
        let messages = self.messages.clone();
        Box::pin(async move {
            let messages = messages.read().await;
            Ok(messages
                .values()
                .map(|row| (row.id, row.channel_id))
                .collect())
        })
    }
}

#[derive(Default)]
pub struct InMemoryThreadRepository {
    replies: Arc<RwLock<HashMap<i64, ThreadMessage>>>,
    next_id: AtomicI64,
}

impl InMemoryThreadRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ThreadRepository for InMemoryThreadRepository {
    fn create(&self, reply: &NewThreadMessage) -> BoxFuture<'_, DomainResult<ThreadMessage>> {
        let reply = reply.clone();
        let replies = self.replies.clone();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Box::pin(async move {
            let stored = ThreadMessage {
                id,
                parent_message_id: reply.parent_message_id,
                channel_id: reply.channel_id,
                user_id: reply.user_id,
                body: reply.body,
                created_at_ms: reply.created_at_ms,
                state: Lifecycle::Active,
            };
            let mut replies = replies.write().await;
            replies.insert(id, stored.clone());
            Ok(stored)
        })
    }

    fn get(&self, thread_message_id: i64) -> BoxFuture<'_, DomainResult<Option<ThreadMessage>>> {
        let replies = self.replies.clone();
        Box::pin(async move {
            let replies = replies.read().await;
            Ok(replies.get(&thread_message_id).cloned())
        })
    }

    fn list_by_parent(
        &self,
        parent_message_id: i64,
        page: usize,
        page_size: usize,
        include_deleted: bool,
    ) -> BoxFuture<'_, DomainResult<Vec<ThreadMessage>>> {
        let replies = self.replies.clone();
        Box::pin(async move {
            let replies = replies.read().await;
            let mut rows: Vec<ThreadMessage> = replies
                .values()
                .filter(|row| row.parent_message_id == parent_message_id)
                .filter(|row| include_deleted || row.state.is_active())
                .cloned()
                .collect();
            rows.sort_by_key(|row| row.id);
            let skip = page.saturating_sub(1) * page_size;
            Ok(rows.into_iter().skip(skip).take(page_size).collect())
        })
    }

    fn active_reply_count(&self, parent_message_id: i64) -> BoxFuture<'_, DomainResult<u64>> {
        let replies = self.replies.clone();
        Box::pin(async move {
            let replies = replies.read().await;
            Ok(replies
                .values()
                .filter(|row| row.parent_message_id == parent_message_id && row.state.is_active())
                .count() as u64)
        })
    }

    fn summaries(
        &self,
        parent_message_ids: &[i64],
        include_deleted: bool,
    ) -> BoxFuture<'_, DomainResult<Vec<ThreadSummaryRow>>> {
        let parent_message_ids = parent_message_ids.to_vec();
        let replies = self.replies.clone();
        Box::pin(async move {
            let replies = replies.read().await;
            let mut rows = Vec::new();
            for parent_id in parent_message_ids {
                let mut matching: Vec<&ThreadMessage> = replies
                    .values()
                    .filter(|row| row.parent_message_id == parent_id)
                    .filter(|row| include_deleted || row.state.is_active())
                    .collect();
                if matching.is_empty() {
                    continue;
                }
                matching.sort_by_key(|row| std::cmp::Reverse(row.id));

                let mut recent_author_ids = Vec::new();
                for row in &matching {
                    if !recent_author_ids.contains(&row.user_id) {
                        recent_author_ids.push(row.user_id.clone());
                    }
                }
                rows.push(ThreadSummaryRow {
                    parent_message_id: parent_id,
                    reply_count: matching.len() as u64,
                    latest_reply_at_ms: matching
                        .iter()
                        .map(|row| row.created_at_ms)
                        .max()
                        .unwrap_or(0),
                    recent_author_ids,
                });
            }
            Ok(rows)
        })
    }

    fn unread_counts(
        &self,
        viewer: &str,
        pairs: &[(i64, i64)],
    ) -> BoxFuture<'_, DomainResult<HashMap<i64, u64>>> {
        let viewer = viewer.to_string();
        let pairs = pairs.to_vec();
        let replies = self.replies.clone();
        Box::pin(async move {
            let replies = replies.read().await;
            let mut counts = HashMap::with_capacity(pairs.len());
            for (parent_id, since_ms) in pairs {
                let count = replies
                    .values()
                    .filter(|row| {
                        row.parent_message_id == parent_id
                            && row.created_at_ms > since_ms
                            && row.state.is_active()
                            && row.user_id != viewer
                    })
                    .count() as u64;
                counts.insert(parent_id, count);
            }
            Ok(counts)
        })
    }

    fn list_after_in_channel(
        &self,
        channel_id: i64,
        after_id: i64,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<ThreadMessage>>> {
        let replies = self.replies.clone();
        Box::pin(async move {
            let replies = replies.read().await;
            let mut rows: Vec<ThreadMessage> = replies
                .values()
                .filter(|row| {
                    row.channel_id == channel_id && row.id > after_id && row.state.is_active()
                })
                .cloned()
                .collect();
            rows.sort_by_key(|row| row.id);
            rows.truncate(limit);
            Ok(rows)
        })
    }

    fn participated_parents(
        &self,
        user_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<(i64, i64)>>> {
        let user_id = user_id.to_string();
        let replies = self.replies.clone();
        Box::pin(async move {
            let replies = replies.read().await;
            let mut parents: Vec<(i64, i64)> = replies
                .values()
                .filter(|row| row.user_id == user_id)
                .map(|row| (row.parent_message_id, row.channel_id))
                .collect();
            parents.sort_unstable();
            parents.dedup();
            Ok(parents)
        })
    }

    fn set_state(
        &self,
        thread_message_id: i64,
        state: &Lifecycle,
    ) -> BoxFuture<'_, DomainResult<bool>> {
        let state = state.clone();
        let replies = self.replies.clone();
        Box::pin(async move {
            let mut replies = replies.write().await;
            match replies.get_mut(&thread_message_id) {
                Some(row) => {
                    row.state = state;
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    fn parent_refs(&self) -> BoxFuture<'_, DomainResult<Vec<(i64, i64)>>> {
        let replies = self.replies.clone();
        Box::pin(async move {
            let replies = replies.read().await;
            Ok(replies
                .values()
                .map(|row| (row.id, row.parent_message_id))
                .collect())
        })
    }
}

type ReactionKey = (i64, bool, String, String);

#[derive(Default)]
pub struct InMemoryReactionRepository {
    rows: Arc<RwLock<HashMap<ReactionKey, Reaction>>>,
    /// One retained event per `(target_id, is_thread)` pair.
    events: Arc<RwLock<HashMap<(i64, bool), ReactionChangeEvent>>>,
}

impl InMemoryReactionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(target_id: i64, is_thread: bool, user_id: &str, emoji: &str) -> ReactionKey {
        (target_id, is_thread, user_id.to_string(), emoji.to_string())
    }
}

impl ReactionRepository for InMemoryReactionRepository {
    fn get(
        &self,
        target_id: i64,
        is_thread: bool,
        user_id: &str,
        emoji: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Reaction>>> {
        let key = Self::key(target_id, is_thread, user_id, emoji);
        let rows = self.rows.clone();
        Box::pin(async move {
            let rows = rows.read().await;
            Ok(rows.get(&key).cloned())
        })
    }

    fn insert(&self, reaction: &Reaction) -> BoxFuture<'_, DomainResult<Reaction>> {
        let reaction = reaction.clone();
        let rows = self.rows.clone();
        Box::pin(async move {
            let key = Self::key(
                reaction.target_id,
                reaction.is_thread,
                &reaction.user_id,
                &reaction.emoji,
            );
            let mut rows = rows.write().await;
            if rows.contains_key(&key) {
                return Err(DomainError::Conflict);
            }
            rows.insert(key, reaction.clone());
            Ok(reaction)
        })
    }

    fn remove(
        &self,
        target_id: i64,
        is_thread: bool,
        user_id: &str,
        emoji: &str,
    ) -> BoxFuture<'_, DomainResult<bool>> {
        let key = Self::key(target_id, is_thread, user_id, emoji);
        let rows = self.rows.clone();
        Box::pin(async move {
            let mut rows = rows.write().await;
            Ok(rows.remove(&key).is_some())
        })
    }

    fn list_for_target(
        &self,
        target_id: i64,
        is_thread: bool,
    ) -> BoxFuture<'_, DomainResult<Vec<Reaction>>> {
        let rows = self.rows.clone();
        Box::pin(async move {
            let rows = rows.read().await;
            let mut out: Vec<Reaction> = rows
                .values()
                .filter(|row| row.target_id == target_id && row.is_thread == is_thread)
                .cloned()
                .collect();
            out.sort_by(|a, b| {
                (a.created_at_ms, &a.user_id, &a.emoji).cmp(&(b.created_at_ms, &b.user_id, &b.emoji))
            });
            Ok(out)
        })
    }

    fn list_for_targets(
        &self,
        target_ids: &[i64],
        is_thread: bool,
    ) -> BoxFuture<'_, DomainResult<HashMap<i64, Vec<Reaction>>>> {
        let target_ids = target_ids.to_vec();
        let rows = self.rows.clone();
        Box::pin(async move {
            let rows = rows.read().await;
            let mut out: HashMap<i64, Vec<Reaction>> = HashMap::new();
            for row in rows.values() {
                if row.is_thread == is_thread && target_ids.contains(&row.target_id) {
                    out.entry(row.target_id).or_default().push(row.clone());
                }
            }
            for reactions in out.values_mut() {
                reactions.sort_by(|a, b| {
                    (a.created_at_ms, &a.user_id, &a.emoji)
                        .cmp(&(b.created_at_ms, &b.user_id, &b.emoji))
                });
            }
            Ok(out)
        })
    }

    fn record_event(
        &self,
        event: &ReactionChangeEvent,
    ) -> BoxFuture<'_, DomainResult<ReactionChangeEvent>> {
        let mut event = event.clone();
        let events = self.events.clone();
        Box::pin(async move {
            let mut events = events.write().await;
            let pair = (event.target_id, event.is_thread);
            if let Some(previous) = events.get(&pair) {
                if event.timestamp_ms <= previous.timestamp_ms {
                    event.timestamp_ms = previous.timestamp_ms + 1;
                }
            }
            events.insert(pair, event.clone());
            Ok(event)
        })
    }

    fn events_since(
        &self,
        channel_id: i64,
        since_ts_ms: i64,
        thread_id: Option<i64>,
    ) -> BoxFuture<'_, DomainResult<Vec<ReactionChangeEvent>>> {
        let events = self.events.clone();
        Box::pin(async move {
            let events = events.read().await;
            let mut out: Vec<ReactionChangeEvent> = events
                .values()
                .filter(|event| event.timestamp_ms > since_ts_ms)
                .filter(|event| {
                    if event.is_thread {
                        thread_id.map(|id| event.thread_id == id).unwrap_or(false)
                    } else {
                        event.channel_id == channel_id
                    }
                })
                .cloned()
                .collect();
            out.sort_by_key(|event| event.timestamp_ms);
            Ok(out)
        })
    }

    fn purge_events_before(&self, cutoff_ms: i64) -> BoxFuture<'_, DomainResult<u64>> {
        let events = self.events.clone();
        Box::pin(async move {
            let mut events = events.write().await;
            let before = events.len();
            events.retain(|_, event| event.timestamp_ms >= cutoff_ms);
            Ok((before - events.len()) as u64)
        })
    }

    fn all(&self) -> BoxFuture<'_, DomainResult<Vec<Reaction>>> {
        let rows = self.rows.clone();
        Box::pin(async move {
            let rows = rows.read().await;
            Ok(rows.values().cloned().collect())
        })
    }
}

#[derive(Default)]
pub struct InMemoryReadStateRepository {
    channel_cursors: Arc<RwLock<HashMap<(String, i64), ReadCursor>>>,
    thread_cursors: Arc<RwLock<HashMap<(String, i64), ThreadReadCursor>>>,
}

impl InMemoryReadStateRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReadStateRepository for InMemoryReadStateRepository {
    fn channel_cursor(
        &self,
        user_id: &str,
        channel_id: i64,
    ) -> BoxFuture<'_, DomainResult<Option<ReadCursor>>> {
        let key = (user_id.to_string(), channel_id);
        let cursors = self.channel_cursors.clone();
        Box::pin(async move {
            let cursors = cursors.read().await;
            Ok(cursors.get(&key).cloned())
        })
    }

    fn upsert_channel_cursor(
        &self,
        cursor: &ReadCursor,
    ) -> BoxFuture<'_, DomainResult<ReadCursor>> {
        let cursor = cursor.clone();
        let cursors = self.channel_cursors.clone();
        Box::pin(async move {
            let mut cursors = cursors.write().await;
            cursors.insert((cursor.user_id.clone(), cursor.channel_id), cursor.clone());
            Ok(cursor)
        })
    }

    fn thread_cursor(
        &self,
        user_id: &str,
        parent_message_id: i64,
    ) -> BoxFuture<'_, DomainResult<Option<ThreadReadCursor>>> {
        let key = (user_id.to_string(), parent_message_id);
        let cursors = self.thread_cursors.clone();
        Box::pin(async move {
            let cursors = cursors.read().await;
            Ok(cursors.get(&key).cloned())
        })
    }

    fn thread_cursors(
        &self,
        user_id: &str,
        parent_message_ids: &[i64],
    ) -> BoxFuture<'_, DomainResult<HashMap<i64, ThreadReadCursor>>> {
        let user_id = user_id.to_string();
        let parent_message_ids = parent_message_ids.to_vec();
        let cursors = self.thread_cursors.clone();
        Box::pin(async move {
            let cursors = cursors.read().await;
            Ok(parent_message_ids
                .iter()
                .filter_map(|parent_id| {
                    cursors
                        .get(&(user_id.clone(), *parent_id))
                        .map(|cursor| (*parent_id, cursor.clone()))
                })
                .collect())
        })
    }

    fn upsert_thread_cursor(
        &self,
        cursor: &ThreadReadCursor,
    ) -> BoxFuture<'_, DomainResult<ThreadReadCursor>> {
        let cursor = cursor.clone();
        let cursors = self.thread_cursors.clone();
        Box::pin(async move {
            let mut cursors = cursors.write().await;
            cursors.insert(
                (cursor.user_id.clone(), cursor.parent_message_id),
                cursor.clone(),
            );
            Ok(cursor)
        })
    }
}

#[derive(Default)]
pub struct InMemoryDeletionLogRepository {
    records: Arc<RwLock<Vec<DeletionRecord>>>,
}

impl InMemoryDeletionLogRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeletionLogRepository for InMemoryDeletionLogRepository {
    fn append(&self, record: &DeletionRecord) -> BoxFuture<'_, DomainResult<DeletionRecord>> {
        let record = record.clone();
        let records = self.records.clone();
        Box::pin(async move {
            let mut records = records.write().await;
            records.push(record.clone());
            Ok(record)
        })
    }

    fn recent(
        &self,
        channel_id: i64,
        kind: DeletionKind,
        since_ms: i64,
    ) -> BoxFuture<'_, DomainResult<Vec<DeletionRecord>>> {
        let records = self.records.clone();
        Box::pin(async move {
            let records = records.read().await;
            let mut out: Vec<DeletionRecord> = records
                .iter()
                .filter(|record| {
                    record.channel_id == channel_id
                        && record.kind == kind
                        && record.deleted_at_ms >= since_ms
                })
                .cloned()
                .collect();
            out.sort_by_key(|record| record.deleted_at_ms);
            Ok(out)
        })
    }

    fn purge_before(&self, cutoff_ms: i64) -> BoxFuture<'_, DomainResult<u64>> {
        let records = self.records.clone();
        Box::pin(async move {
            let mut records = records.write().await;
            let before = records.len();
            records.retain(|record| record.deleted_at_ms >= cutoff_ms);
            Ok((before - records.len()) as u64)
        })
    }
}
