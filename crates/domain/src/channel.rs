use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::identity::ActorIdentity;
use crate::ports::channel::ChannelRepository;
use crate::util::now_ms;
use crate::DomainResult;

const MAX_NAME_LENGTH: usize = 80;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Public,
    Direct,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Channel {
    pub id: i64,
    pub name: String,
    pub kind: ChannelKind,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelMember {
    pub channel_id: i64,
    pub user_id: String,
    pub joined_at_ms: i64,
}

#[derive(Clone, Debug)]
pub struct NewChannel {
    pub name: String,
    pub kind: ChannelKind,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug)]
pub struct ChannelCreate {
    pub name: String,
    pub kind: ChannelKind,
    /// Members to add alongside the creator.
    pub members: Vec<String>,
}

#[derive(Clone)]
pub struct ChannelService {
    channels: Arc<dyn ChannelRepository>,
}

impl ChannelService {
    pub fn new(channels: Arc<dyn ChannelRepository>) -> Self {
        Self { channels }
    }

    pub async fn create(
        &self,
        actor: &ActorIdentity,
        input: ChannelCreate,
    ) -> DomainResult<Channel> {
        let input = validate_channel_create(input)?;
        let now = now_ms();
        let channel = self
            .channels
            .create(&NewChannel {
                name: input.name,
                kind: input.kind,
                created_at_ms: now,
            })
            .await?;

        self.channels
            .add_member(channel.id, &actor.user_id, now)
            .await?;
        for member in &input.members {
            if member == &actor.user_id {
                continue;
            }
            self.channels.add_member(channel.id, member, now).await?;
        }

        Ok(channel)
    }

    pub async fn join(&self, actor: &ActorIdentity, channel_id: i64) -> DomainResult<ChannelMember> {
        let channel = self
            .channels
            .get(channel_id)
            .await?
            .ok_or(DomainError::NotFound)?;
        if channel.kind == ChannelKind::Direct {
            return Err(DomainError::Forbidden);
        }
        if self.channels.is_member(channel_id, &actor.user_id).await? {
            return Ok(ChannelMember {
                channel_id,
                user_id: actor.user_id.clone(),
                joined_at_ms: now_ms(),
            });
        }
        self.channels
            .add_member(channel_id, &actor.user_id, now_ms())
            .await
    }

    pub async fn list_for_user(&self, actor: &ActorIdentity) -> DomainResult<Vec<Channel>> {
        self.channels.channels_for_user(&actor.user_id).await
    }

    pub async fn assert_member(&self, channel_id: i64, user_id: &str) -> DomainResult<()> {
        if self.channels.get(channel_id).await?.is_none() {
            return Err(DomainError::NotFound);
        }
        if self.channels.is_member(channel_id, user_id).await? {
            Ok(())
        } else {
            Err(DomainError::Forbidden)
        }
    }
}

fn validate_channel_create(mut input: ChannelCreate) -> DomainResult<ChannelCreate> {
    input.name = input.name.trim().to_string();
    if input.name.is_empty() {
        return Err(DomainError::Validation("channel name is required".into()));
    }
    if input.name.chars().count() > MAX_NAME_LENGTH {
        return Err(DomainError::Validation(format!(
            "channel name exceeds max length of {MAX_NAME_LENGTH}"
        )));
    }
    if input.kind == ChannelKind::Direct && input.members.len() != 1 {
        return Err(DomainError::Validation(
            "direct channels need exactly one other member".into(),
        ));
    }
    Ok(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_channel_needs_exactly_one_peer() {
        let input = ChannelCreate {
            name: "dm".into(),
            kind: ChannelKind::Direct,
            members: vec![],
        };
        assert!(validate_channel_create(input).is_err());

        let input = ChannelCreate {
            name: "dm".into(),
            kind: ChannelKind::Direct,
            members: vec!["user-2".into()],
        };
        assert!(validate_channel_create(input).is_ok());
    }

    #[test]
    fn name_is_trimmed_and_bounded() {
        let input = ChannelCreate {
            name: "  general  ".into(),
            kind: ChannelKind::Public,
            members: vec![],
        };
        assert_eq!(validate_channel_create(input).unwrap().name, "general");

        let input = ChannelCreate {
            name: "x".repeat(MAX_NAME_LENGTH + 1),
            kind: ChannelKind::Public,
            members: vec![],
        };
        assert!(validate_channel_create(input).is_err());
    }
}
