use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::deletion::DeletionKind;
use crate::error::DomainError;
use crate::identity::ActorIdentity;
use crate::message::{profile_parts, Message};
use crate::ports::channel::ChannelRepository;
use crate::ports::deletion::DeletionLogRepository;
use crate::ports::directory::UserDirectory;
use crate::ports::message::MessageRepository;
use crate::ports::reaction::ReactionRepository;
use crate::ports::thread::ThreadRepository;
use crate::reaction::ReactionChangeEvent;
use crate::read_state::{UnreadCounts, UnreadService};
use crate::thread::ThreadMessage;
use crate::util::now_ms;
use crate::DomainResult;

#[derive(Clone, Debug, Deserialize)]
pub struct PollRequest {
    pub channel_id: i64,
    pub last_message_id: i64,
    pub last_thread_message_id: i64,
    pub last_reaction_ts_ms: i64,
    /// Set when the client has a thread panel open, to include that thread's
    /// reaction events.
    pub current_thread_id: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedMessage {
    #[serde(flatten)]
    pub message: Message,
    pub display_name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedReply {
    #[serde(flatten)]
    pub reply: ThreadMessage,
    pub display_name: String,
}

/// One consolidated "what changed since X" answer. Every array is ascending
/// by its id/timestamp so clients advance watermarks to the max observed
/// value; re-polling with the same watermarks yields an empty delta.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Delta {
    pub new_messages: Vec<FeedMessage>,
    pub deleted_messages: Vec<i64>,
    pub new_thread_messages: Vec<FeedReply>,
    pub deleted_thread_messages: Vec<i64>,
    pub reaction_updates: Vec<ReactionChangeEvent>,
    pub unread_counts: UnreadCounts,
}

#[derive(Clone, Debug)]
pub struct FeedConfig {
    pub message_limit: usize,
    /// Short window: clients poll frequently, and a long window would keep
    /// re-announcing stale deletions.
    pub deleted_window: Duration,
    /// Thread panels open less often, so their deletions linger longer.
    pub thread_deleted_window: Duration,
    pub circuit_fail_threshold: u32,
    pub circuit_open: Duration,
    /// Manual poison pill for the poll path.
    pub emergency_stop: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            message_limit: 50,
            deleted_window: Duration::from_secs(30),
            thread_deleted_window: Duration::from_secs(300),
            circuit_fail_threshold: 5,
            circuit_open: Duration::from_secs(15),
            emergency_stop: false,
        }
    }
}

#[derive(Debug, Default)]
struct CircuitState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

/// Trips after repeated storage failures and fails fast for a cooldown
/// period instead of hammering a broken backend.
#[derive(Clone)]
pub struct CircuitBreaker {
    fail_threshold: u32,
    open_duration: Duration,
    state: Arc<Mutex<CircuitState>>,
}

impl CircuitBreaker {
    pub fn new(fail_threshold: u32, open_duration: Duration) -> Self {
        Self {
            fail_threshold,
            open_duration,
            state: Arc::new(Mutex::new(CircuitState::default())),
        }
    }

    pub fn ensure_closed(&self) -> DomainResult<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| DomainError::Storage("circuit mutex poisoned".into()))?;
        if let Some(open_until) = state.open_until {
            if Instant::now() < open_until {
                return Err(DomainError::Busy);
            }
            state.open_until = None;
            state.consecutive_failures = 0;
        }
        Ok(())
    }

    pub fn record_success(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.consecutive_failures = 0;
            state.open_until = None;
        }
    }

    pub fn record_failure(&self) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let now = Instant::now();
        if let Some(open_until) = state.open_until {
            if now < open_until {
                return;
            }
        }
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        if state.consecutive_failures >= self.fail_threshold {
            state.open_until = Some(now + self.open_duration);
            state.consecutive_failures = 0;
            tracing::warn!(
                open_for_ms = self.open_duration.as_millis() as u64,
                "poll circuit opened after repeated failures"
            );
        }
    }
}

#[derive(Clone)]
pub struct FeedService {
    messages: Arc<dyn MessageRepository>,
    threads: Arc<dyn ThreadRepository>,
    reactions: Arc<dyn ReactionRepository>,
    deletions: Arc<dyn DeletionLogRepository>,
    channels: Arc<dyn ChannelRepository>,
    directory: Arc<dyn UserDirectory>,
    unread: UnreadService,
    config: FeedConfig,
    circuit: CircuitBreaker,
}

impl FeedService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        threads: Arc<dyn ThreadRepository>,
        reactions: Arc<dyn ReactionRepository>,
        deletions: Arc<dyn DeletionLogRepository>,
        channels: Arc<dyn ChannelRepository>,
        directory: Arc<dyn UserDirectory>,
        unread: UnreadService,
        config: FeedConfig,
    ) -> Self {
        let circuit = CircuitBreaker::new(config.circuit_fail_threshold, config.circuit_open);
        Self {
            messages,
            threads,
            reactions,
            deletions,
            channels,
            directory,
            unread,
            config,
            circuit,
        }
    }

    pub async fn poll(&self, actor: &ActorIdentity, request: PollRequest) -> DomainResult<Delta> {
        if self.config.emergency_stop {
            return Err(DomainError::Busy);
        }
        self.circuit.ensure_closed()?;

        if self.channels.get(request.channel_id).await?.is_none() {
            return Err(DomainError::NotFound);
        }
        if !self
            .channels
            .is_member(request.channel_id, &actor.user_id)
            .await?
        {
            return Err(DomainError::Forbidden);
        }

        match self.poll_inner(actor, &request).await {
            Ok(delta) => {
                self.circuit.record_success();
                Ok(delta)
            }
            Err(err) => {
                if matches!(err, DomainError::Storage(_)) {
                    self.circuit.record_failure();
                }
                Err(err)
            }
        }
    }

    async fn poll_inner(
        &self,
        actor: &ActorIdentity,
        request: &PollRequest,
    ) -> DomainResult<Delta> {
        let now = now_ms();

        let messages = self
            .messages
            .list_after(
                request.channel_id,
                request.last_message_id,
                self.config.message_limit,
            )
            .await?;

        let deleted_since = now - self.config.deleted_window.as_millis() as i64;
        let deleted_messages = dedup_ascending(
            self.deletions
                .recent(request.channel_id, DeletionKind::Main, deleted_since)
                .await?
                .into_iter()
                .map(|record| record.message_id),
        );

        let replies = self
            .threads
            .list_after_in_channel(
                request.channel_id,
                request.last_thread_message_id,
                self.config.message_limit,
            )
            .await?;

        let thread_deleted_since = now - self.config.thread_deleted_window.as_millis() as i64;
        let deleted_thread_messages = dedup_ascending(
            self.deletions
                .recent(request.channel_id, DeletionKind::Thread, thread_deleted_since)
                .await?
                .into_iter()
                .map(|record| record.message_id),
        );

        // An open-thread id only counts if its parent lives in the polled
        // channel; anything else is silently dropped so one channel's thread
        // traffic never leaks into another channel's delta. Deleted parents
        // still qualify, their replies stay visible.
        let current_thread_id = match request.current_thread_id {
            Some(parent_id) => self
                .messages
                .get(parent_id)
                .await?
                .filter(|parent| parent.channel_id == request.channel_id)
                .map(|parent| parent.id),
            None => None,
        };

        let reaction_updates = self
            .reactions
            .events_since(
                request.channel_id,
                request.last_reaction_ts_ms,
                current_thread_id,
            )
            .await?;

        // A single subsystem outage must not block the rest of the delta.
        let unread_counts = match self.unread.unread_counts(actor, false).await {
            Ok(counts) => counts,
            Err(err) => {
                tracing::warn!(user_id = %actor.user_id, error = %err, "unread snapshot failed; defaulting to zero");
                UnreadCounts::default()
            }
        };

        let mut author_ids: Vec<String> = messages
            .iter()
            .map(|row| row.user_id.clone())
            .chain(replies.iter().map(|row| row.user_id.clone()))
            .collect();
        author_ids.sort();
        author_ids.dedup();
        let profiles = self.directory.profiles(&author_ids).await.unwrap_or_default();

        let new_messages = messages
            .into_iter()
            .map(|message| {
                let (display_name, _) = profile_parts(&profiles, &message.user_id);
                FeedMessage {
                    display_name,
                    message,
                }
            })
            .collect();
        let new_thread_messages = replies
            .into_iter()
            .map(|reply| {
                let (display_name, _) = profile_parts(&profiles, &reply.user_id);
                FeedReply {
                    display_name,
                    reply,
                }
            })
            .collect();

        Ok(Delta {
            new_messages,
            deleted_messages,
            new_thread_messages,
            deleted_thread_messages,
            reaction_updates,
            unread_counts,
        })
    }
}

fn dedup_ascending(ids: impl Iterator<Item = i64>) -> Vec<i64> {
    let mut out: Vec<i64> = ids.collect();
    out.sort_unstable();
    out.dedup();
    out
}

/// Max observed watermarks of a delta, used by clients (and tests) to build
/// the next poll request.
pub fn advance_watermarks(request: &PollRequest, delta: &Delta) -> PollRequest {
    let mut next = request.clone();
    if let Some(last) = delta.new_messages.last() {
        next.last_message_id = next.last_message_id.max(last.message.id);
    }
    if let Some(last) = delta.new_thread_messages.last() {
        next.last_thread_message_id = next.last_thread_message_id.max(last.reply.id);
    }
    if let Some(last) = delta.reaction_updates.last() {
        next.last_reaction_ts_ms = next.last_reaction_ts_ms.max(last.timestamp_ms);
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circuit_opens_after_threshold_and_recovers() {
        let circuit = CircuitBreaker::new(3, Duration::from_millis(20));
        assert!(circuit.ensure_closed().is_ok());

        circuit.record_failure();
        circuit.record_failure();
        assert!(circuit.ensure_closed().is_ok());
        circuit.record_failure();
        assert!(matches!(circuit.ensure_closed(), Err(DomainError::Busy)));

        std::thread::sleep(Duration::from_millis(30));
        assert!(circuit.ensure_closed().is_ok());
    }

    #[test]
    fn success_resets_failure_streak() {
        let circuit = CircuitBreaker::new(2, Duration::from_secs(60));
        circuit.record_failure();
        circuit.record_success();
        circuit.record_failure();
        assert!(circuit.ensure_closed().is_ok());
    }

    #[test]
    fn dedup_ascending_sorts_and_dedups() {
        assert_eq!(dedup_ascending(vec![3, 1, 3, 2].into_iter()), vec![1, 2, 3]);
    }
}
