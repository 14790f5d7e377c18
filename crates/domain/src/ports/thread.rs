use std::collections::HashMap;

use crate::deletion::Lifecycle;
use crate::thread::{NewThreadMessage, ThreadMessage, ThreadSummaryRow};
use crate::DomainResult;

use super::BoxFuture;

pub trait ThreadRepository: Send + Sync {
    fn create(&self, reply: &NewThreadMessage) -> BoxFuture<'_, DomainResult<ThreadMessage>>;

    fn get(&self, thread_message_id: i64) -> BoxFuture<'_, DomainResult<Option<ThreadMessage>>>;

    /// Replies under a parent in chronological order. Tombstones are included
    /// only when `include_deleted` is set.
    fn list_by_parent(
        &self,
        parent_message_id: i64,
        page: usize,
        page_size: usize,
        include_deleted: bool,
    ) -> BoxFuture<'_, DomainResult<Vec<ThreadMessage>>>;

    fn active_reply_count(&self, parent_message_id: i64) -> BoxFuture<'_, DomainResult<u64>>;

    /// Per-parent rollups for a batch of parents in one pass. Parents without
    /// matching replies produce no row.
    fn summaries(
        &self,
        parent_message_ids: &[i64],
        include_deleted: bool,
    ) -> BoxFuture<'_, DomainResult<Vec<ThreadSummaryRow>>>;

    /// Batched unread arithmetic: for each `(parent_message_id, since_ms)`
    /// pair, the count of active replies not authored by `viewer` with
    /// `created_at_ms > since_ms`.
    fn unread_counts(
        &self,
        viewer: &str,
        pairs: &[(i64, i64)],
    ) -> BoxFuture<'_, DomainResult<HashMap<i64, u64>>>;

    /// Active replies in a channel with `id > after_id`, ascending, capped.
    fn list_after_in_channel(
        &self,
        channel_id: i64,
        after_id: i64,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<ThreadMessage>>>;

    /// Parents the user wrote a reply under, as `(parent_message_id, channel_id)`.
    fn participated_parents(
        &self,
        user_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<(i64, i64)>>>;

    fn set_state(
        &self,
        thread_message_id: i64,
        state: &Lifecycle,
    ) -> BoxFuture<'_, DomainResult<bool>>;

    /// `(thread_message_id, parent_message_id)` for every row, for integrity
    /// checks.
    fn parent_refs(&self) -> BoxFuture<'_, DomainResult<Vec<(i64, i64)>>>;
}
