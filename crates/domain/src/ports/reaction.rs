use std::collections::HashMap;

use crate::reaction::{Reaction, ReactionChangeEvent};
use crate::DomainResult;

use super::BoxFuture;

pub trait ReactionRepository: Send + Sync {
    fn get(
        &self,
        target_id: i64,
        is_thread: bool,
        user_id: &str,
        emoji: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Reaction>>>;

    /// `Conflict` when the `(target, user, emoji)` triple already exists.
    fn insert(&self, reaction: &Reaction) -> BoxFuture<'_, DomainResult<Reaction>>;

    /// Returns `false` when no such row existed.
    fn remove(
        &self,
        target_id: i64,
        is_thread: bool,
        user_id: &str,
        emoji: &str,
    ) -> BoxFuture<'_, DomainResult<bool>>;

    fn list_for_target(
        &self,
        target_id: i64,
        is_thread: bool,
    ) -> BoxFuture<'_, DomainResult<Vec<Reaction>>>;

    /// One batched fetch for a page of targets.
    fn list_for_targets(
        &self,
        target_ids: &[i64],
        is_thread: bool,
    ) -> BoxFuture<'_, DomainResult<HashMap<i64, Vec<Reaction>>>>;

    /// Supersedes any prior event for the same `(target_id, is_thread)` pair
    /// and stores the event with a strictly-increasing timestamp: when the
    /// candidate timestamp does not exceed the pair's previous maximum it is
    /// bumped to `max + 1`. Returns the stored event.
    fn record_event(
        &self,
        event: &ReactionChangeEvent,
    ) -> BoxFuture<'_, DomainResult<ReactionChangeEvent>>;

    /// Channel-scoped events newer than `since_ts_ms`, plus events for
    /// `thread_id` when given, ascending by timestamp.
    fn events_since(
        &self,
        channel_id: i64,
        since_ts_ms: i64,
        thread_id: Option<i64>,
    ) -> BoxFuture<'_, DomainResult<Vec<ReactionChangeEvent>>>;

    /// Drops events older than the cutoff, returning how many were removed.
    fn purge_events_before(&self, cutoff_ms: i64) -> BoxFuture<'_, DomainResult<u64>>;

    /// Every reaction row, for integrity checks.
    fn all(&self) -> BoxFuture<'_, DomainResult<Vec<Reaction>>>;
}
