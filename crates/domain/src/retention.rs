use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::ports::deletion::DeletionLogRepository;
use crate::ports::reaction::ReactionRepository;
use crate::util::now_ms;
use crate::DomainResult;

#[derive(Clone, Debug)]
pub struct RetentionConfig {
    /// Reaction change events older than this are dead weight: every client
    /// has either polled them or lost interest.
    pub reaction_event_retention: Duration,
    /// Deletion records only matter while a poll window can still report
    /// them.
    pub deletion_record_retention: Duration,
    pub sweep_interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            reaction_event_retention: Duration::from_secs(3600),
            deletion_record_retention: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(300),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq, Eq)]
pub struct SweepStats {
    pub reaction_events_purged: u64,
    pub deletion_records_purged: u64,
}

#[derive(Clone)]
pub struct RetentionSweeper {
    reactions: Arc<dyn ReactionRepository>,
    deletions: Arc<dyn DeletionLogRepository>,
    config: RetentionConfig,
}

impl RetentionSweeper {
    pub fn new(
        reactions: Arc<dyn ReactionRepository>,
        deletions: Arc<dyn DeletionLogRepository>,
        config: RetentionConfig,
    ) -> Self {
        Self {
            reactions,
            deletions,
            config,
        }
    }

    pub fn interval(&self) -> Duration {
        self.config.sweep_interval
    }

    pub async fn sweep(&self) -> DomainResult<SweepStats> {
        let now = now_ms();
        let reaction_cutoff = now - self.config.reaction_event_retention.as_millis() as i64;
        let deletion_cutoff = now - self.config.deletion_record_retention.as_millis() as i64;

        let reaction_events_purged = self.reactions.purge_events_before(reaction_cutoff).await?;
        let deletion_records_purged = self.deletions.purge_before(deletion_cutoff).await?;

        let stats = SweepStats {
            reaction_events_purged,
            deletion_records_purged,
        };
        if stats.reaction_events_purged > 0 || stats.deletion_records_purged > 0 {
            tracing::info!(
                reaction_events = stats.reaction_events_purged,
                deletion_records = stats.deletion_records_purged,
                "retention sweep purged rows"
            );
        }
        Ok(stats)
    }
}
