use crate::deletion::{DeletionKind, DeletionRecord};
use crate::DomainResult;

use super::BoxFuture;

/// Append-only audit log of soft deletes, consumed by the poll delta's
/// "deleted" arrays and pruned by the retention sweeper.
pub trait DeletionLogRepository: Send + Sync {
    fn append(&self, record: &DeletionRecord) -> BoxFuture<'_, DomainResult<DeletionRecord>>;

    /// Records for a channel and kind with `deleted_at_ms >= since_ms`,
    /// ascending by deletion time.
    fn recent(
        &self,
        channel_id: i64,
        kind: DeletionKind,
        since_ms: i64,
    ) -> BoxFuture<'_, DomainResult<Vec<DeletionRecord>>>;

    fn purge_before(&self, cutoff_ms: i64) -> BoxFuture<'_, DomainResult<u64>>;
}
