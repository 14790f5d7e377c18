use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{first_page_key, message_page_key, DEFAULT_PAGE_SIZE};
use crate::deletion::Lifecycle;
use crate::error::DomainError;
use crate::identity::ActorIdentity;
use crate::ports::attachments::{AttachmentMeta, AttachmentStore};
use crate::ports::cache::CacheStore;
use crate::ports::channel::ChannelRepository;
use crate::ports::directory::UserDirectory;
use crate::ports::message::MessageRepository;
use crate::ports::notify::{MessageCreatedEvent, NotificationPublisher};
use crate::ports::reaction::ReactionRepository;
use crate::reaction::Reaction;
use crate::util::{now_ms, utc_date_key};
use crate::DomainResult;

pub const MAX_BODY_LENGTH: usize = 4_000;
pub const MAX_ATTACHMENT_COUNT: usize = 10;
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: i64,
    pub channel_id: i64,
    pub user_id: String,
    pub body: String,
    pub created_at_ms: i64,
    pub state: Lifecycle,
}

#[derive(Clone, Debug)]
pub struct NewMessage {
    pub channel_id: i64,
    pub user_id: String,
    pub body: String,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HydratedMessage {
    #[serde(flatten)]
    pub message: Message,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub reactions: Vec<Reaction>,
    pub attachments: Vec<AttachmentMeta>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pagination {
    pub page: usize,
    pub page_size: usize,
    pub has_more: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateGroup {
    pub date: String,
    pub messages: Vec<HydratedMessage>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagePage {
    pub groups: Vec<DateGroup>,
    pub pagination: Pagination,
}

#[derive(Clone, Debug)]
pub struct SendMessageInput {
    pub channel_id: i64,
    pub body: String,
    pub attachment_ids: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct ListMessagesInput {
    pub channel_id: i64,
    pub page: usize,
    pub page_size: usize,
    pub after_id: Option<i64>,
}

/// Tiered page-cache TTLs: the first page turns over quickly, history pages
/// are effectively immutable.
#[derive(Clone, Copy, Debug)]
pub struct MessageCacheConfig {
    pub first_page_ttl: Duration,
    pub history_page_ttl: Duration,
}

impl Default for MessageCacheConfig {
    fn default() -> Self {
        Self {
            first_page_ttl: Duration::from_secs(5),
            history_page_ttl: Duration::from_secs(60),
        }
    }
}

#[derive(Clone)]
pub struct MessageService {
    messages: Arc<dyn MessageRepository>,
    channels: Arc<dyn ChannelRepository>,
    reactions: Arc<dyn ReactionRepository>,
    attachments: Arc<dyn AttachmentStore>,
    directory: Arc<dyn UserDirectory>,
    notifier: Arc<dyn NotificationPublisher>,
    cache: Arc<dyn CacheStore>,
    cache_config: MessageCacheConfig,
}

impl MessageService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        channels: Arc<dyn ChannelRepository>,
        reactions: Arc<dyn ReactionRepository>,
        attachments: Arc<dyn AttachmentStore>,
        directory: Arc<dyn UserDirectory>,
        notifier: Arc<dyn NotificationPublisher>,
        cache: Arc<dyn CacheStore>,
        cache_config: MessageCacheConfig,
    ) -> Self {
        Self {
            messages,
            channels,
            reactions,
            attachments,
            directory,
            notifier,
            cache,
            cache_config,
        }
    }

    pub async fn send(
        &self,
        actor: &ActorIdentity,
        input: SendMessageInput,
    ) -> DomainResult<HydratedMessage> {
        let body = input.body.trim().to_string();
        validate_message_input(&body, &input.attachment_ids)?;

        if self.channels.get(input.channel_id).await?.is_none() {
            return Err(DomainError::NotFound);
        }
        if !self
            .channels
            .is_member(input.channel_id, &actor.user_id)
            .await?
        {
            return Err(DomainError::Forbidden);
        }

        let message = self
            .messages
            .create(&NewMessage {
                channel_id: input.channel_id,
                user_id: actor.user_id.clone(),
                body,
                created_at_ms: now_ms(),
            })
            .await?;

        // Attach is not atomic with the insert: a failure here leaves the
        // message standing and is only logged. Known gap carried over.
        let attachments = if input.attachment_ids.is_empty() {
            Vec::new()
        } else {
            match self
                .attachments
                .attach(message.id, &input.attachment_ids)
                .await
            {
                Ok(metas) => metas,
                Err(err) => {
                    tracing::warn!(
                        message_id = message.id,
                        error = %err,
                        "attachment bind failed after message insert"
                    );
                    Vec::new()
                }
            }
        };

        self.notifier
            .message_created(&MessageCreatedEvent {
                message_id: message.id,
                channel_id: message.channel_id,
                parent_message_id: None,
                author_id: message.user_id.clone(),
                created_at_ms: message.created_at_ms,
            })
            .await;

        self.invalidate_channel_caches(message.channel_id).await;

        let profiles = self
            .directory
            .profiles(std::slice::from_ref(&actor.user_id))
            .await
            .unwrap_or_default();
        let (display_name, avatar_url) = profile_parts(&profiles, &actor.user_id);

        Ok(HydratedMessage {
            message,
            display_name,
            avatar_url,
            reactions: Vec::new(),
            attachments,
        })
    }

    pub async fn list(
        &self,
        actor: &ActorIdentity,
        input: ListMessagesInput,
    ) -> DomainResult<MessagePage> {
        if self.channels.get(input.channel_id).await?.is_none() {
            return Err(DomainError::NotFound);
        }
        if !self
            .channels
            .is_member(input.channel_id, &actor.user_id)
            .await?
        {
            return Err(DomainError::Forbidden);
        }

        let page = input.page.max(1);
        let page_size = input.page_size.clamp(1, MAX_PAGE_SIZE);
        let cache_key = message_page_key(input.channel_id, page, page_size, input.after_id);

        if let Some(cached) = self.cache_get(&cache_key).await {
            if let Ok(page) = serde_json::from_value::<MessagePage>(cached) {
                return Ok(page);
            }
        }

        let mut rows = self
            .messages
            .list_page(input.channel_id, page, page_size, input.after_id)
            .await?;
        let has_more = rows.len() == page_size;
        // Newest page first internally; chronological for display.
        rows.reverse();

        let hydrated = self.hydrate(rows).await?;
        let result = MessagePage {
            groups: group_by_date(hydrated),
            pagination: Pagination {
                page,
                page_size,
                has_more,
            },
        };

        let ttl = if page == 1 {
            self.cache_config.first_page_ttl
        } else {
            self.cache_config.history_page_ttl
        };
        self.cache_put(&cache_key, &result, ttl).await;

        Ok(result)
    }

    /// Hydrates a chronological slice of messages with reactions, attachments
    /// and author profiles, one batched lookup each.
    pub async fn hydrate(&self, rows: Vec<Message>) -> DomainResult<Vec<HydratedMessage>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
        let mut reactions = self.reactions.list_for_targets(&ids, false).await?;
        let mut attachments = match self.attachments.for_messages(&ids).await {
            Ok(map) => map,
            Err(err) => {
                tracing::warn!(error = %err, "attachment hydration failed; returning bare page");
                HashMap::new()
            }
        };

        let mut user_ids: Vec<String> = rows.iter().map(|row| row.user_id.clone()).collect();
        user_ids.sort();
        user_ids.dedup();
        let profiles = self.directory.profiles(&user_ids).await.unwrap_or_default();

        Ok(rows
            .into_iter()
            .map(|message| {
                let (display_name, avatar_url) = profile_parts(&profiles, &message.user_id);
                HydratedMessage {
                    reactions: reactions.remove(&message.id).unwrap_or_default(),
                    attachments: attachments.remove(&message.id).unwrap_or_default(),
                    display_name,
                    avatar_url,
                    message,
                }
            })
            .collect())
    }

    /// Drops the channel's canonical first page and every member's unread
    /// entry. Best-effort: a cache outage must not fail the write.
    pub async fn invalidate_channel_caches(&self, channel_id: i64) {
        if let Err(err) = self.cache.delete(&first_page_key(channel_id)).await {
            tracing::warn!(channel_id, error = %err, "first-page cache invalidation failed");
        }
        match self.channels.members(channel_id).await {
            Ok(members) => {
                for member in members {
                    if let Err(err) = self.cache.delete(&crate::cache::unread_key(&member)).await {
                        tracing::warn!(
                            channel_id,
                            user_id = %member,
                            error = %err,
                            "unread cache invalidation failed"
                        );
                    }
                }
            }
            Err(err) => {
                tracing::warn!(channel_id, error = %err, "member fan-out lookup failed");
            }
        }
    }

    async fn cache_get(&self, key: &str) -> Option<serde_json::Value> {
        match self.cache.get(key).await {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(key, error = %err, "page cache read failed");
                None
            }
        }
    }

    async fn cache_put(&self, key: &str, page: &MessagePage, ttl: Duration) {
        let value = match serde_json::to_value(page) {
            Ok(value) => value,
            Err(_) => return,
        };
        if let Err(err) = self.cache.set(key, &value, ttl).await {
            tracing::debug!(key, error = %err, "page cache write failed");
        }
    }
}

pub(crate) fn profile_parts(
    profiles: &HashMap<String, crate::ports::directory::UserProfile>,
    user_id: &str,
) -> (String, Option<String>) {
    match profiles.get(user_id) {
        Some(profile) => (profile.display_name.clone(), profile.avatar_url.clone()),
        None => (user_id.to_string(), None),
    }
}

fn validate_message_input(body: &str, attachment_ids: &[String]) -> DomainResult<()> {
    if body.is_empty() && attachment_ids.is_empty() {
        return Err(DomainError::Validation(
            "message body or attachments required".into(),
        ));
    }
    if body.chars().count() > MAX_BODY_LENGTH {
        return Err(DomainError::Validation(format!(
            "body exceeds max length of {MAX_BODY_LENGTH}"
        )));
    }
    if attachment_ids.len() > MAX_ATTACHMENT_COUNT {
        return Err(DomainError::Validation(format!(
            "attachments exceed max of {MAX_ATTACHMENT_COUNT}"
        )));
    }
    Ok(())
}

fn group_by_date(messages: Vec<HydratedMessage>) -> Vec<DateGroup> {
    let mut groups: Vec<DateGroup> = Vec::new();
    for message in messages {
        let date = utc_date_key(message.message.created_at_ms);
        match groups.last_mut() {
            Some(group) if group.date == date => group.messages.push(message),
            _ => groups.push(DateGroup {
                date,
                messages: vec![message],
            }),
        }
    }
    groups
}

pub fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_without_attachments_is_rejected() {
        assert!(matches!(
            validate_message_input("", &[]),
            Err(DomainError::Validation(_))
        ));
        assert!(validate_message_input("", &["file-1".into()]).is_ok());
        assert!(validate_message_input("hello", &[]).is_ok());
    }

    #[test]
    fn body_length_is_bounded() {
        let long = "x".repeat(MAX_BODY_LENGTH + 1);
        assert!(validate_message_input(&long, &[]).is_err());
    }

    #[test]
    fn attachment_count_is_bounded() {
        let ids: Vec<String> = (0..=MAX_ATTACHMENT_COUNT)
            .map(|index| format!("file-{index}"))
            .collect();
        assert!(validate_message_input("hi", &ids).is_err());
    }

    #[test]
    fn grouping_keeps_chronological_order_within_dates() {
        let make = |id: i64, at_ms: i64| HydratedMessage {
            message: Message {
                id,
                channel_id: 1,
                user_id: "u".into(),
                body: "b".into(),
                created_at_ms: at_ms,
                state: Lifecycle::Active,
            },
            display_name: "u".into(),
            avatar_url: None,
            reactions: Vec::new(),
            attachments: Vec::new(),
        };
        let day = 86_400_000;
        let groups = group_by_date(vec![make(1, 10), make(2, 20), make(3, day + 5)]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].messages.len(), 2);
        assert_eq!(groups[0].messages[1].message.id, 2);
        assert_eq!(groups[1].messages[0].message.id, 3);
    }
}
