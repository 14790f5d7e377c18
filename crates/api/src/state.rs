use std::sync::Arc;
use std::time::Duration;

use kanal_domain::channel::ChannelService;
use kanal_domain::deletion::DeletionLedger;
use kanal_domain::feed::{FeedConfig, FeedService};
use kanal_domain::integrity::IntegrityService;
use kanal_domain::message::{MessageCacheConfig, MessageService};
use kanal_domain::cache::{InMemoryCacheStore, InMemoryLockStore};
use kanal_domain::ports::cache::CacheStore;
use kanal_domain::ports::lock::LockStore;
use kanal_domain::reaction::ReactionService;
use kanal_domain::read_state::UnreadService;
use kanal_domain::retention::{RetentionConfig, RetentionSweeper};
use kanal_domain::thread::ThreadService;
use kanal_infra::cache::{RedisCacheStore, RedisLockStore};
use kanal_infra::config::AppConfig;
use kanal_infra::directory::{
    InMemoryAttachmentStore, StaticUserDirectory, TracingNotificationPublisher,
};
use kanal_infra::repositories::{
    InMemoryChannelRepository, InMemoryDeletionLogRepository, InMemoryMessageRepository,
    InMemoryReactionRepository, InMemoryReadStateRepository, InMemoryThreadRepository,
};

/// Every service is constructed once at startup and shared via the router
/// state; handlers never assemble services per request.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub channels: ChannelService,
    pub messages: MessageService,
    pub threads: ThreadService,
    pub reactions: ReactionService,
    pub unread: UnreadService,
    pub feed: FeedService,
    pub ledger: DeletionLedger,
    pub integrity: IntegrityService,
    pub sweeper: RetentionSweeper,
}

impl AppState {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let (cache, locks): (Arc<dyn CacheStore>, Arc<dyn LockStore>) =
            if config.cache_backend.eq_ignore_ascii_case("redis") {
                let cache = RedisCacheStore::connect(&config.redis_url)
                    .await
                    .map_err(|err| anyhow::anyhow!("redis cache connect: {err}"))?;
                let locks = RedisLockStore::connect(&config.redis_url)
                    .await
                    .map_err(|err| anyhow::anyhow!("redis lock connect: {err}"))?;
                (Arc::new(cache), Arc::new(locks))
            } else {
                (
                    Arc::new(InMemoryCacheStore::new()),
                    Arc::new(InMemoryLockStore::new()),
                )
            };
        Ok(Self::assemble(config, cache, locks))
    }

    pub fn for_tests(config: AppConfig) -> Self {
        Self::assemble(
            config,
            Arc::new(InMemoryCacheStore::new()),
            Arc::new(InMemoryLockStore::new()),
        )
    }

    fn assemble(config: AppConfig, cache: Arc<dyn CacheStore>, locks: Arc<dyn LockStore>) -> Self {
        let channels = Arc::new(InMemoryChannelRepository::new());
        let messages = Arc::new(InMemoryMessageRepository::new());
        let threads = Arc::new(InMemoryThreadRepository::new());
        let reactions = Arc::new(InMemoryReactionRepository::new());
        let deletions = Arc::new(InMemoryDeletionLogRepository::new());
        let read_state = Arc::new(InMemoryReadStateRepository::new());
        let directory = Arc::new(StaticUserDirectory::new());
        let attachments = Arc::new(InMemoryAttachmentStore::new());
        let notifier = Arc::new(TracingNotificationPublisher);

        let channel_service = ChannelService::new(channels.clone());
        let message_service = MessageService::new(
            messages.clone(),
            channels.clone(),
            reactions.clone(),
            attachments.clone(),
            directory.clone(),
            notifier.clone(),
            cache.clone(),
            MessageCacheConfig {
                first_page_ttl: Duration::from_millis(config.cache_first_page_ttl_ms),
                history_page_ttl: Duration::from_millis(config.cache_history_page_ttl_ms),
            },
        );
        let thread_service = ThreadService::new(
            threads.clone(),
            messages.clone(),
            channels.clone(),
            reactions.clone(),
            read_state.clone(),
            directory.clone(),
            notifier.clone(),
            cache.clone(),
        );
        let reaction_service = ReactionService::new(
            reactions.clone(),
            messages.clone(),
            threads.clone(),
            locks,
            cache.clone(),
            Duration::from_millis(config.reaction_lock_ttl_ms),
        );
        let unread_service = UnreadService::new(
            read_state,
            messages.clone(),
            threads.clone(),
            channels.clone(),
            cache,
            Duration::from_millis(config.cache_unread_ttl_ms),
        );
        let feed_service = FeedService::new(
            messages.clone(),
            threads.clone(),
            reactions.clone(),
            deletions.clone(),
            channels.clone(),
            directory,
            unread_service.clone(),
            FeedConfig {
                message_limit: config.poll_message_limit,
                deleted_window: Duration::from_millis(config.poll_deleted_window_ms),
                thread_deleted_window: Duration::from_millis(config.poll_thread_deleted_window_ms),
                circuit_fail_threshold: config.poll_circuit_fail_threshold,
                circuit_open: Duration::from_millis(config.poll_circuit_open_ms),
                emergency_stop: config.poll_emergency_stop,
            },
        );
        let ledger = DeletionLedger::new(messages.clone(), threads.clone(), deletions.clone());
        let integrity = IntegrityService::new(
            channels,
            messages,
            threads.clone(),
            reactions.clone(),
        );
        let sweeper = RetentionSweeper::new(
            reactions,
            deletions,
            RetentionConfig {
                reaction_event_retention: Duration::from_millis(config.reaction_event_retention_ms),
                deletion_record_retention: Duration::from_millis(config.deletion_record_retention_ms),
                sweep_interval: Duration::from_millis(config.retention_sweep_interval_ms),
            },
        );

        Self {
            config,
            channels: channel_service,
            messages: message_service,
            threads: thread_service,
            reactions: reaction_service,
            unread: unread_service,
            feed: feed_service,
            ledger,
            integrity,
            sweeper,
        }
    }
}
