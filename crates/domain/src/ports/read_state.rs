use std::collections::HashMap;

use crate::read_state::{ReadCursor, ThreadReadCursor};
use crate::DomainResult;

use super::BoxFuture;

pub trait ReadStateRepository: Send + Sync {
    fn channel_cursor(
        &self,
        user_id: &str,
        channel_id: i64,
    ) -> BoxFuture<'_, DomainResult<Option<ReadCursor>>>;

    /// Raw replace; the monotonicity guard lives in the service.
    fn upsert_channel_cursor(&self, cursor: &ReadCursor)
        -> BoxFuture<'_, DomainResult<ReadCursor>>;

    fn thread_cursor(
        &self,
        user_id: &str,
        parent_message_id: i64,
    ) -> BoxFuture<'_, DomainResult<Option<ThreadReadCursor>>>;

    fn thread_cursors(
        &self,
        user_id: &str,
        parent_message_ids: &[i64],
    ) -> BoxFuture<'_, DomainResult<HashMap<i64, ThreadReadCursor>>>;

    fn upsert_thread_cursor(
        &self,
        cursor: &ThreadReadCursor,
    ) -> BoxFuture<'_, DomainResult<ThreadReadCursor>>;
}
