use crate::channel::{Channel, ChannelMember, NewChannel};
use crate::DomainResult;

use super::BoxFuture;

pub trait ChannelRepository: Send + Sync {
    /// Assigns the channel id and returns the stored row.
    fn create(&self, channel: &NewChannel) -> BoxFuture<'_, DomainResult<Channel>>;

    fn get(&self, channel_id: i64) -> BoxFuture<'_, DomainResult<Option<Channel>>>;

    /// Appends a membership row. Rows are not deduplicated at this layer;
    /// duplicate detection belongs to the integrity queries.
    fn add_member(
        &self,
        channel_id: i64,
        user_id: &str,
        joined_at_ms: i64,
    ) -> BoxFuture<'_, DomainResult<ChannelMember>>;

    fn is_member(&self, channel_id: i64, user_id: &str) -> BoxFuture<'_, DomainResult<bool>>;

    /// Distinct member user ids for a channel.
    fn members(&self, channel_id: i64) -> BoxFuture<'_, DomainResult<Vec<String>>>;

    fn channels_for_user(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<Channel>>>;

    fn ids(&self) -> BoxFuture<'_, DomainResult<Vec<i64>>>;

    /// Raw membership rows, duplicates included, for integrity checks.
    fn membership_rows(&self) -> BoxFuture<'_, DomainResult<Vec<ChannelMember>>>;
}
