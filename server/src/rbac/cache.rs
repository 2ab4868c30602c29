//! Effective-permission cache.
//!
//! Redis-backed read-through cache keyed by user id. The value is the full
//! effective set serialized as JSON so an empty set is still a cache hit,
//! which a Redis SET cannot represent.

use std::collections::HashSet;

use fred::prelude::*;
use uuid::Uuid;

use super::store::{PermissionCache, StoreError};

/// Redis key for a user's effective permission set.
fn permissions_key(user_id: Uuid) -> String {
    format!("perms:{user_id}")
}

/// Redis-backed [`PermissionCache`].
#[derive(Clone)]
pub struct RedisPermissionCache {
    redis: Client,
}

impl RedisPermissionCache {
    #[must_use]
    pub const fn new(redis: Client) -> Self {
        Self { redis }
    }
}

impl PermissionCache for RedisPermissionCache {
    async fn get(&self, user_id: Uuid) -> Result<Option<HashSet<String>>, StoreError> {
        let raw: Option<String> = self.redis.get(permissions_key(user_id)).await?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        user_id: Uuid,
        permissions: &HashSet<String>,
        ttl_secs: i64,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(permissions)?;
        let _: () = self
            .redis
            .set(
                permissions_key(user_id),
                json,
                Some(Expiration::EX(ttl_secs)),
                None,
                false,
            )
            .await?;

        Ok(())
    }

    async fn invalidate(&self, user_id: Uuid) -> Result<(), StoreError> {
        let _: () = self.redis.del(permissions_key(user_id)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        let id = Uuid::nil();
        assert_eq!(
            permissions_key(id),
            "perms:00000000-0000-0000-0000-000000000000"
        );
    }
}
