use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::DomainResult;

use super::BoxFuture;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    pub user_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// Display-name/avatar resolution, supplied by the external identity
/// collaborator. Callers fall back to the raw user id for unknown users.
pub trait UserDirectory: Send + Sync {
    fn profiles(
        &self,
        user_ids: &[String],
    ) -> BoxFuture<'_, DomainResult<HashMap<String, UserProfile>>>;
}
