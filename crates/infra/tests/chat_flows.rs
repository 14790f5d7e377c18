use std::sync::Arc;
use std::time::Duration;

use kanal_domain::cache::{reaction_lock_key, InMemoryCacheStore, InMemoryLockStore};
use kanal_domain::channel::{ChannelCreate, ChannelKind, ChannelService};
use kanal_domain::deletion::{DeletionLedger, DeletionRecord, DeletionKind, EntityRef};
use kanal_domain::error::DomainError;
use kanal_domain::feed::{advance_watermarks, FeedConfig, FeedService, PollRequest};
use kanal_domain::identity::ActorIdentity;
use kanal_domain::integrity::IntegrityService;
use kanal_domain::message::{MessageCacheConfig, MessageService, SendMessageInput};
use kanal_domain::ports::channel::ChannelRepository;
use kanal_domain::ports::deletion::DeletionLogRepository;
use kanal_domain::ports::lock::LockStore;
use kanal_domain::ports::message::MessageRepository;
use kanal_domain::ports::reaction::ReactionRepository;
use kanal_domain::ports::thread::ThreadRepository;
use kanal_domain::reaction::{Reaction, ReactionOp, ReactionService, ReactionUpdate};
use kanal_domain::read_state::UnreadService;
use kanal_domain::retention::{RetentionConfig, RetentionSweeper};
use kanal_domain::thread::{ThreadInfoInput, ThreadService};
use kanal_infra::directory::{InMemoryAttachmentStore, StaticUserDirectory, TracingNotificationPublisher};
use kanal_infra::repositories::{
    InMemoryChannelRepository, InMemoryDeletionLogRepository, InMemoryMessageRepository,
    InMemoryReactionRepository, InMemoryReadStateRepository, InMemoryThreadRepository,
};

struct Fixture {
    channels: Arc<InMemoryChannelRepository>,
    messages: Arc<InMemoryMessageRepository>,
    threads: Arc<InMemoryThreadRepository>,
    reactions: Arc<InMemoryReactionRepository>,
    deletions: Arc<InMemoryDeletionLogRepository>,
    locks: Arc<InMemoryLockStore>,
    channel_service: ChannelService,
    message_service: MessageService,
    thread_service: ThreadService,
    reaction_service: ReactionService,
    unread_service: UnreadService,
    feed_service: FeedService,
    ledger: DeletionLedger,
    integrity: IntegrityService,
    sweeper: RetentionSweeper,
}

fn fixture() -> Fixture {
    fixture_with(FeedConfig::default(), RetentionConfig::default())
}

fn fixture_with(feed_config: FeedConfig, retention_config: RetentionConfig) -> Fixture {
    let channels = Arc::new(InMemoryChannelRepository::new());
    let messages = Arc::new(InMemoryMessageRepository::new());
    let threads = Arc::new(InMemoryThreadRepository::new());
    let reactions = Arc::new(InMemoryReactionRepository::new());
    let deletions = Arc::new(InMemoryDeletionLogRepository::new());
    let read_state = Arc::new(InMemoryReadStateRepository::new());
    let cache = Arc::new(InMemoryCacheStore::new());
    let locks = Arc::new(InMemoryLockStore::new());
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
        MessageCacheConfig::default(),
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
        locks.clone(),
        cache.clone(),
        Duration::from_secs(10),
    );
    let unread_service = UnreadService::new(
        read_state.clone(),
        messages.clone(),
        threads.clone(),
        channels.clone(),
        cache.clone(),
        Duration::from_secs(60),
    );
    let feed_service = FeedService::new(
        messages.clone(),
        threads.clone(),
        reactions.clone(),
        deletions.clone(),
        channels.clone(),
        directory.clone(),
        unread_service.clone(),
        feed_config,
    );
    let ledger = DeletionLedger::new(messages.clone(), threads.clone(), deletions.clone());
    let integrity = IntegrityService::new(
        channels.clone(),
        messages.clone(),
        threads.clone(),
        reactions.clone(),
    );
    let sweeper = RetentionSweeper::new(reactions.clone(), deletions.clone(), retention_config);

    Fixture {
        channels,
        messages,
        threads,
        reactions,
        deletions,
        locks,
        channel_service,
        message_service,
        thread_service,
        reaction_service,
        unread_service,
        feed_service,
        ledger,
        integrity,
        sweeper,
    }
}

async fn seed_channel(fx: &Fixture, creator: &ActorIdentity, members: &[&str]) -> i64 {
    let channel = fx
        .channel_service
        .create(
            creator,
            ChannelCreate {
                name: "general".into(),
                kind: ChannelKind::Public,
                members: members.iter().map(|m| m.to_string()).collect(),
            },
        )
        .await
        .unwrap();
    channel.id
}

async fn send(fx: &Fixture, actor: &ActorIdentity, channel_id: i64, body: &str) -> i64 {
    fx.message_service
        .send(
            actor,
            SendMessageInput {
                channel_id,
                body: body.into(),
                attachment_ids: vec![],
            },
        )
        .await
        .unwrap()
        .message
        .id
}

#[tokio::test]
async fn toggle_is_busy_while_lock_held() {
    let fx = fixture();
    let alice = ActorIdentity::with_user_id("alice");
    let channel_id = seed_channel(&fx, &alice, &[]).await;
    let message_id = send(&fx, &alice, channel_id, "hello").await;

    let key = reaction_lock_key("alice", message_id, false, "👍");
    assert!(fx.locks.acquire(&key, Duration::from_secs(10)).await.unwrap());

    let err = fx
        .reaction_service
        .toggle(&alice, message_id, false, "👍")
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Busy));

    fx.locks.release(&key).await.unwrap();
    let snapshot = fx
        .reaction_service
        .toggle(&alice, message_id, false, "👍")
        .await
        .unwrap();
    assert_eq!(snapshot.len(), 1);
}

#[tokio::test]
async fn sequential_toggles_flip_presence() {
    let fx = fixture();
    let alice = ActorIdentity::with_user_id("alice");
    let channel_id = seed_channel(&fx, &alice, &[]).await;
    let message_id = send(&fx, &alice, channel_id, "hello").await;

    let after_add = fx
        .reaction_service
        .toggle(&alice, message_id, false, "🎉")
        .await
        .unwrap();
    assert_eq!(after_add.len(), 1);

    let after_remove = fx
        .reaction_service
        .toggle(&alice, message_id, false, "🎉")
        .await
        .unwrap();
    assert!(after_remove.is_empty());
}

#[tokio::test]
async fn deleting_last_reply_cascades_to_parent() {
    let fx = fixture();
    let alice = ActorIdentity::with_user_id("alice");
    let channel_id = seed_channel(&fx, &alice, &["bob"]).await;
    let parent_id = send(&fx, &alice, channel_id, "root").await;
    let reply = fx
        .thread_service
        .reply(&alice, parent_id, "only reply".into())
        .await
        .unwrap();

    let outcome = fx
        .ledger
        .soft_delete(&alice, EntityRef::Reply(reply.id))
        .await
        .unwrap();
    assert!(outcome.deleted);
    assert!(outcome.cascaded_parent_deleted);

    let parent = fx.messages.get(parent_id).await.unwrap().unwrap();
    assert!(!parent.state.is_active());

    // The rollup degrades to zero rather than erroring on the tombstoned
    // parent.
    let info = fx
        .thread_service
        .info(
            &alice,
            ThreadInfoInput {
                channel_id,
                parent_message_ids: vec![parent_id],
                include_deleted: false,
            },
        )
        .await
        .unwrap();
    assert_eq!(info[&parent_id].reply_count, 0);
    assert!(info[&parent_id].latest_reply.is_none());
}

#[tokio::test]
async fn restore_is_idempotent_and_never_restores_parent() {
    let fx = fixture();
    let alice = ActorIdentity::with_user_id("alice");
    let channel_id = seed_channel(&fx, &alice, &[]).await;
    let parent_id = send(&fx, &alice, channel_id, "root").await;
    let reply = fx
        .thread_service
        .reply(&alice, parent_id, "only reply".into())
        .await
        .unwrap();

    fx.ledger
        .soft_delete(&alice, EntityRef::Reply(reply.id))
        .await
        .unwrap();
    let first = fx.ledger.restore(&alice, EntityRef::Reply(reply.id)).await.unwrap();
    assert!(first.restored);
    assert_eq!(first.channel_id, channel_id);
    // Second restore is a no-op success.
    assert!(fx.ledger.restore(&alice, EntityRef::Reply(reply.id)).await.unwrap().restored);

    // The cascaded parent stays deleted until restored explicitly.
    let parent = fx.messages.get(parent_id).await.unwrap().unwrap();
    assert!(!parent.state.is_active());
    assert!(fx.ledger.restore(&alice, EntityRef::Message(parent_id)).await.unwrap().restored);
    let parent = fx.messages.get(parent_id).await.unwrap().unwrap();
    assert!(parent.state.is_active());
}

#[tokio::test]
async fn delete_requires_ownership() {
    let fx = fixture();
    let alice = ActorIdentity::with_user_id("alice");
    let bob = ActorIdentity::with_user_id("bob");
    let channel_id = seed_channel(&fx, &alice, &["bob"]).await;
    let message_id = send(&fx, &alice, channel_id, "mine").await;

    let err = fx
        .ledger
        .soft_delete(&bob, EntityRef::Message(message_id))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Forbidden));
}

#[tokio::test]
async fn read_cursor_never_moves_backward() {
    let fx = fixture();
    let alice = ActorIdentity::with_user_id("alice");
    let bob = ActorIdentity::with_user_id("bob");
    let channel_id = seed_channel(&fx, &alice, &["bob"]).await;
    send(&fx, &alice, channel_id, "one").await;
    let second = send(&fx, &alice, channel_id, "two").await;

    let cursor = fx
        .unread_service
        .mark_channel_read(&bob, channel_id, Some(second))
        .await
        .unwrap();
    assert_eq!(cursor.last_read_message_id, second);

    let stale = fx
        .unread_service
        .mark_channel_read(&bob, channel_id, Some(second - 1))
        .await
        .unwrap();
    assert_eq!(stale.last_read_message_id, second);
}

#[tokio::test]
async fn thread_cursor_never_moves_backward() {
    let fx = fixture();
    let alice = ActorIdentity::with_user_id("alice");
    let bob = ActorIdentity::with_user_id("bob");
    let channel_id = seed_channel(&fx, &alice, &["bob"]).await;
    let parent_id = send(&fx, &alice, channel_id, "root").await;

    let cursor = fx
        .unread_service
        .mark_thread_read(&bob, parent_id, Some(5_000))
        .await
        .unwrap();
    assert_eq!(cursor.last_viewed_at_ms, 5_000);

    let stale = fx
        .unread_service
        .mark_thread_read(&bob, parent_id, Some(1_000))
        .await
        .unwrap();
    assert_eq!(stale.last_viewed_at_ms, 5_000);
}

#[tokio::test]
async fn unread_counts_follow_sends_and_marks() {
    let fx = fixture();
    let alice = ActorIdentity::with_user_id("alice");
    let bob = ActorIdentity::with_user_id("bob");
    let channel_id = seed_channel(&fx, &alice, &["bob"]).await;

    send(&fx, &alice, channel_id, "one").await;
    send(&fx, &alice, channel_id, "two").await;

    let counts = fx.unread_service.unread_counts(&bob, false).await.unwrap();
    assert_eq!(counts.channels.get(&channel_id), Some(&2));
    assert_eq!(counts.total, 2);

    // Own messages never count against the author.
    let own = fx.unread_service.unread_counts(&alice, false).await.unwrap();
    assert_eq!(own.channels.get(&channel_id), Some(&0));

    fx.unread_service
        .mark_channel_read(&bob, channel_id, None)
        .await
        .unwrap();
    let counts = fx.unread_service.unread_counts(&bob, false).await.unwrap();
    assert_eq!(counts.total, 0);

    // A new send invalidates the cached zero for every member.
    send(&fx, &alice, channel_id, "three").await;
    let counts = fx.unread_service.unread_counts(&bob, false).await.unwrap();
    assert_eq!(counts.channels.get(&channel_id), Some(&1));
}

#[tokio::test]
async fn poll_is_empty_once_watermarks_catch_up() {
    let fx = fixture();
    let alice = ActorIdentity::with_user_id("alice");
    let bob = ActorIdentity::with_user_id("bob");
    let channel_id = seed_channel(&fx, &alice, &["bob"]).await;
    let first = send(&fx, &alice, channel_id, "one").await;
    send(&fx, &alice, channel_id, "two").await;
    fx.thread_service
        .reply(&alice, first, "threaded".into())
        .await
        .unwrap();
    fx.reaction_service
        .toggle(&alice, first, false, "👍")
        .await
        .unwrap();

    let request = PollRequest {
        channel_id,
        last_message_id: 0,
        last_thread_message_id: 0,
        last_reaction_ts_ms: 0,
        current_thread_id: None,
    };
    let delta = fx.feed_service.poll(&bob, request.clone()).await.unwrap();
    assert_eq!(delta.new_messages.len(), 2);
    assert_eq!(delta.new_thread_messages.len(), 1);
    assert_eq!(delta.reaction_updates.len(), 1);

    let caught_up = advance_watermarks(&request, &delta);
    let delta = fx.feed_service.poll(&bob, caught_up).await.unwrap();
    assert!(delta.new_messages.is_empty());
    assert!(delta.new_thread_messages.is_empty());
    assert!(delta.reaction_updates.is_empty());
}

#[tokio::test]
async fn poll_reports_recent_deletions() {
    let fx = fixture();
    let alice = ActorIdentity::with_user_id("alice");
    let channel_id = seed_channel(&fx, &alice, &[]).await;
    let message_id = send(&fx, &alice, channel_id, "doomed").await;
    fx.ledger
        .soft_delete(&alice, EntityRef::Message(message_id))
        .await
        .unwrap();

    let delta = fx
        .feed_service
        .poll(
            &alice,
            PollRequest {
                channel_id,
                last_message_id: message_id,
                last_thread_message_id: 0,
                last_reaction_ts_ms: 0,
                current_thread_id: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(delta.deleted_messages, vec![message_id]);
}

#[tokio::test]
async fn poll_requires_membership() {
    let fx = fixture();
    let alice = ActorIdentity::with_user_id("alice");
    let stranger = ActorIdentity::with_user_id("mallory");
    let channel_id = seed_channel(&fx, &alice, &[]).await;

    let err = fx
        .feed_service
        .poll(
            &stranger,
            PollRequest {
                channel_id,
                last_message_id: 0,
                last_thread_message_id: 0,
                last_reaction_ts_ms: 0,
                current_thread_id: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Forbidden));
}

#[tokio::test]
async fn thread_reaction_events_need_open_thread() {
    let fx = fixture();
    let alice = ActorIdentity::with_user_id("alice");
    let channel_id = seed_channel(&fx, &alice, &[]).await;
    let parent_id = send(&fx, &alice, channel_id, "root").await;
    let reply = fx
        .thread_service
        .reply(&alice, parent_id, "reply".into())
        .await
        .unwrap();
    fx.reaction_service
        .toggle(&alice, reply.id, true, "👀")
        .await
        .unwrap();

    let closed = fx
        .feed_service
        .poll(
            &alice,
            PollRequest {
                channel_id,
                last_message_id: i64::MAX,
                last_thread_message_id: i64::MAX,
                last_reaction_ts_ms: 0,
                current_thread_id: None,
            },
        )
        .await
        .unwrap();
    assert!(closed.reaction_updates.is_empty());

    let open = fx
        .feed_service
        .poll(
            &alice,
            PollRequest {
                channel_id,
                last_message_id: i64::MAX,
                last_thread_message_id: i64::MAX,
                last_reaction_ts_ms: 0,
                current_thread_id: Some(parent_id),
            },
        )
        .await
        .unwrap();
    assert_eq!(open.reaction_updates.len(), 1);
    assert!(open.reaction_updates[0].is_thread);
}

#[tokio::test]
async fn foreign_thread_reactions_stay_out_of_the_delta() {
    let fx = fixture();
    let alice = ActorIdentity::with_user_id("alice");
    let mallory = ActorIdentity::with_user_id("mallory");

    let alice_channel = seed_channel(&fx, &alice, &[]).await;
    let parent_id = send(&fx, &alice, alice_channel, "root").await;
    let reply = fx
        .thread_service
        .reply(&alice, parent_id, "reply".into())
        .await
        .unwrap();
    fx.reaction_service
        .toggle(&alice, reply.id, true, "🔒")
        .await
        .unwrap();

    // Polling her own channel while claiming alice's thread is open must
    // not surface alice's thread reactions.
    let mallory_channel = seed_channel(&fx, &mallory, &[]).await;
    let delta = fx
        .feed_service
        .poll(
            &mallory,
            PollRequest {
                channel_id: mallory_channel,
                last_message_id: i64::MAX,
                last_thread_message_id: i64::MAX,
                last_reaction_ts_ms: 0,
                current_thread_id: Some(parent_id),
            },
        )
        .await
        .unwrap();
    assert!(delta.reaction_updates.is_empty());
}

#[tokio::test]
async fn batch_allows_partial_success() {
    let fx = fixture();
    let alice = ActorIdentity::with_user_id("alice");
    let channel_id = seed_channel(&fx, &alice, &[]).await;
    let message_id = send(&fx, &alice, channel_id, "hello").await;

    let report = fx
        .reaction_service
        .batch_update(
            &alice,
            vec![
                ReactionUpdate {
                    target_id: message_id,
                    is_thread: false,
                    emoji: "👍".into(),
                    op: ReactionOp::Add,
                },
                ReactionUpdate {
                    target_id: 9_999,
                    is_thread: false,
                    emoji: "👍".into(),
                    op: ReactionOp::Add,
                },
            ],
        )
        .await
        .unwrap();
    assert_eq!(report.success_count, 1);
    assert_eq!(report.error_count, 1);
    assert!(!report.failed);
}

#[tokio::test]
async fn retention_sweep_purges_expired_rows() {
    let fx = fixture_with(
        FeedConfig::default(),
        RetentionConfig {
            reaction_event_retention: Duration::from_millis(0),
            deletion_record_retention: Duration::from_millis(0),
            sweep_interval: Duration::from_secs(300),
        },
    );
    let alice = ActorIdentity::with_user_id("alice");
    let channel_id = seed_channel(&fx, &alice, &[]).await;
    let message_id = send(&fx, &alice, channel_id, "old").await;

    fx.reaction_service
        .toggle(&alice, message_id, false, "👍")
        .await
        .unwrap();
    fx.deletions
        .append(&DeletionRecord {
            message_id,
            kind: DeletionKind::Main,
            thread_id: 0,
            channel_id,
            deleted_by: "alice".into(),
            deleted_at_ms: 1,
        })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    let stats = fx.sweeper.sweep().await.unwrap();
    assert_eq!(stats.reaction_events_purged, 1);
    assert_eq!(stats.deletion_records_purged, 1);
}

#[tokio::test]
async fn integrity_report_flags_broken_references() {
    let fx = fixture();
    let alice = ActorIdentity::with_user_id("alice");
    let channel_id = seed_channel(&fx, &alice, &[]).await;
    send(&fx, &alice, channel_id, "fine").await;

    // Duplicate membership row.
    fx.channels.add_member(channel_id, "alice", 1).await.unwrap();
    // Reaction pointing at a message that does not exist.
    fx.reactions
        .insert(&Reaction {
            target_id: 9_999,
            is_thread: false,
            user_id: "alice".into(),
            emoji: "💥".into(),
            created_at_ms: 1,
        })
        .await
        .unwrap();
    // Reply under a missing parent, written straight to storage.
    fx.threads
        .create(&kanal_domain::thread::NewThreadMessage {
            parent_message_id: 8_888,
            channel_id,
            user_id: "alice".into(),
            body: "orphan".into(),
            created_at_ms: 1,
        })
        .await
        .unwrap();

    let report = fx.integrity.report().await;
    assert!(!report.clean);
    assert_eq!(report.duplicate_memberships.items.len(), 1);
    assert_eq!(report.duplicate_memberships.items[0].occurrences, 2);
    assert_eq!(report.dangling_reactions.items.len(), 1);
    assert_eq!(report.orphan_replies.items.len(), 1);
    assert!(report.dangling_messages.items.is_empty());
}

#[tokio::test]
async fn clean_store_reports_clean() {
    let fx = fixture();
    let alice = ActorIdentity::with_user_id("alice");
    let channel_id = seed_channel(&fx, &alice, &["bob"]).await;
    send(&fx, &alice, channel_id, "fine").await;

    let report = fx.integrity.report().await;
    assert!(report.clean);
}
