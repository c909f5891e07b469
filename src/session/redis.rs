//! Redis storage via `fred`, the preferred primary when configured.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use fred::prelude::*;

use super::backend::StorageBackend;
use super::UserSession;

pub struct RedisBackend {
    client: Client,
}

impl RedisBackend {
    /// Connect and wait for the handshake to finish. Callers bound this
    /// with their own timeout; a refused or misconfigured server surfaces
    /// here instead of on the first dialogue turn.
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let config = Config::from_url(redis_url).context("invalid redis url")?;
        let client = Client::new(config, None, None, None);
        client.connect();
        client
            .wait_for_connect()
            .await
            .context("redis connect failed")?;
        Ok(Self { client })
    }

    fn key(user_id: i64) -> String {
        format!("session:{user_id}")
    }
}

#[async_trait]
impl StorageBackend for RedisBackend {
    fn name(&self) -> &str {
        "redis"
    }

    async fn health_check(&self) -> bool {
        self.client.is_connected()
    }

    async fn get(&self, user_id: i64) -> anyhow::Result<Option<UserSession>> {
        let raw: Option<String> = self.client.get(Self::key(user_id)).await?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let session = serde_json::from_str(&raw)
            .with_context(|| format!("corrupt session record for user {user_id}"))?;
        Ok(Some(session))
    }

    async fn put(&self, session: &UserSession, ttl: Duration) -> anyhow::Result<()> {
        let serialized = serde_json::to_string(session)?;
        let expire_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX).max(1);
        self.client
            .set::<(), _, _>(
                Self::key(session.user_id),
                serialized,
                Some(Expiration::EX(expire_secs)),
                None,
                false,
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, user_id: i64) -> anyhow::Result<()> {
        let _: () = self.client.del(Self::key(user_id)).await?;
        Ok(())
    }

    async fn sweep_expired(&self, _ttl: Duration) -> anyhow::Result<usize> {
        // EX on write lets the server expire records; nothing to sweep here.
        Ok(0)
    }
}
