use std::collections::HashMap;

use crate::deletion::Lifecycle;
use crate::message::{Message, NewMessage};
use crate::DomainResult;

use super::BoxFuture;

pub trait MessageRepository: Send + Sync {
    /// Assigns a monotonically increasing id and returns the stored row.
    fn create(&self, message: &NewMessage) -> BoxFuture<'_, DomainResult<Message>>;

    fn get(&self, message_id: i64) -> BoxFuture<'_, DomainResult<Option<Message>>>;

    /// Active messages for one display page, newest first. Page numbering
    /// starts at 1; `after_id` restricts to ids strictly greater.
    fn list_page(
        &self,
        channel_id: i64,
        page: usize,
        page_size: usize,
        after_id: Option<i64>,
    ) -> BoxFuture<'_, DomainResult<Vec<Message>>>;

    /// Active messages with `id > after_id`, ascending, capped at `limit`.
    fn list_after(
        &self,
        channel_id: i64,
        after_id: i64,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<Message>>>;

    /// Highest message id in the channel, 0 when empty.
    fn max_id(&self, channel_id: i64) -> BoxFuture<'_, DomainResult<i64>>;

    /// Returns `false` when no row exists.
    fn set_state(
        &self,
        message_id: i64,
        state: &Lifecycle,
    ) -> BoxFuture<'_, DomainResult<bool>>;

    /// Batched unread arithmetic: for each `(channel_id, after_id)` pair,
    /// the count of active messages not authored by `exclude_user` with
    /// `id > after_id`.
    fn unread_counts(
        &self,
        exclude_user: &str,
        pairs: &[(i64, i64)],
    ) -> BoxFuture<'_, DomainResult<HashMap<i64, u64>>>;

    /// `(message_id, channel_id)` for every row, for integrity checks.
    fn channel_refs(&self) -> BoxFuture<'_, DomainResult<Vec<(i64, i64)>>>;
}
