//! Storage capability behind the session store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{FileBackend, RedisBackend, UserSession};
use crate::config::StorageConfig;

#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn name(&self) -> &str;
    async fn health_check(&self) -> bool;
    async fn get(&self, user_id: i64) -> anyhow::Result<Option<UserSession>>;
    async fn put(&self, session: &UserSession, ttl: Duration) -> anyhow::Result<()>;
    async fn delete(&self, user_id: i64) -> anyhow::Result<()>;
    /// Remove records past their TTL, returning how many went. Backends
    /// with server-side expiry have nothing to do here.
    async fn sweep_expired(&self, ttl: Duration) -> anyhow::Result<usize>;
}

/// Write-through pair of backends.
///
/// Writes land on both sides so a primary outage mid-session cannot lose
/// in-flight state; reads prefer the primary and fall through on error or
/// miss. One healthy side is enough for the pair to count as healthy.
pub struct FallbackBackend {
    name: String,
    primary: Arc<dyn StorageBackend>,
    secondary: Arc<dyn StorageBackend>,
}

impl FallbackBackend {
    #[must_use]
    pub fn new(primary: Arc<dyn StorageBackend>, secondary: Arc<dyn StorageBackend>) -> Self {
        Self {
            name: format!("{}+{}", primary.name(), secondary.name()),
            primary,
            secondary,
        }
    }
}

#[async_trait]
impl StorageBackend for FallbackBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn health_check(&self) -> bool {
        self.primary.health_check().await || self.secondary.health_check().await
    }

    async fn get(&self, user_id: i64) -> anyhow::Result<Option<UserSession>> {
        match self.primary.get(user_id).await {
            Ok(Some(session)) => return Ok(Some(session)),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    backend = self.primary.name(),
                    user_id,
                    error = %e,
                    "primary read failed, trying fallback"
                );
            }
        }
        self.secondary.get(user_id).await
    }

    async fn put(&self, session: &UserSession, ttl: Duration) -> anyhow::Result<()> {
        let primary = self.primary.put(session, ttl).await;
        if let Err(e) = &primary {
            tracing::warn!(
                backend = self.primary.name(),
                user_id = session.user_id,
                error = %e,
                "primary write failed"
            );
        }
        let secondary = self.secondary.put(session, ttl).await;
        if let Err(e) = &secondary {
            tracing::warn!(
                backend = self.secondary.name(),
                user_id = session.user_id,
                error = %e,
                "fallback write failed"
            );
        }
        if primary.is_err() && secondary.is_err() {
            anyhow::bail!("both storage backends rejected the write");
        }
        Ok(())
    }

    async fn delete(&self, user_id: i64) -> anyhow::Result<()> {
        let primary = self.primary.delete(user_id).await;
        if let Err(e) = &primary {
            tracing::warn!(backend = self.primary.name(), user_id, error = %e, "primary delete failed");
        }
        let secondary = self.secondary.delete(user_id).await;
        if let Err(e) = &secondary {
            tracing::warn!(backend = self.secondary.name(), user_id, error = %e, "fallback delete failed");
        }
        if primary.is_err() && secondary.is_err() {
            anyhow::bail!("both storage backends rejected the delete");
        }
        Ok(())
    }

    async fn sweep_expired(&self, ttl: Duration) -> anyhow::Result<usize> {
        let mut removed = 0;
        match self.primary.sweep_expired(ttl).await {
            Ok(count) => removed += count,
            Err(e) => {
                tracing::warn!(backend = self.primary.name(), error = %e, "primary sweep failed");
            }
        }
        match self.secondary.sweep_expired(ttl).await {
            Ok(count) => removed += count,
            Err(e) => {
                tracing::warn!(backend = self.secondary.name(), error = %e, "fallback sweep failed");
            }
        }
        Ok(removed)
    }
}

/// Pick the storage chain for this process.
///
/// Redis, when configured and reachable within the connect budget, runs as
/// primary with the file store mirroring underneath. Anything less leaves
/// the file store alone; degraded startup is logged, never fatal.
pub async fn connect_backend(cfg: &StorageConfig) -> Arc<dyn StorageBackend> {
    let file = Arc::new(FileBackend::new(cfg.file_path.clone()));

    let Some(redis_url) = cfg.redis_url.as_deref().filter(|url| !url.is_empty()) else {
        tracing::info!(path = %cfg.file_path.display(), "session storage: file only");
        return file;
    };

    let connect_budget = Duration::from_secs(cfg.redis_connect_timeout_secs);
    match tokio::time::timeout(connect_budget, RedisBackend::connect(redis_url)).await {
        Ok(Ok(redis)) => {
            tracing::info!("session storage: redis with file fallback");
            Arc::new(FallbackBackend::new(Arc::new(redis), file))
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "redis unavailable, session storage degraded to file only");
            file
        }
        Err(_) => {
            tracing::warn!(
                timeout_secs = cfg.redis_connect_timeout_secs,
                "redis connect timed out, session storage degraded to file only"
            );
            file
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MemoryBackend {
        records: Mutex<HashMap<i64, UserSession>>,
    }

    impl MemoryBackend {
        fn new() -> Self {
            Self {
                records: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl StorageBackend for MemoryBackend {
        fn name(&self) -> &str {
            "memory"
        }

        async fn health_check(&self) -> bool {
            true
        }

        async fn get(&self, user_id: i64) -> anyhow::Result<Option<UserSession>> {
            Ok(self.records.lock().unwrap().get(&user_id).cloned())
        }

        async fn put(&self, session: &UserSession, _ttl: Duration) -> anyhow::Result<()> {
            self.records
                .lock()
                .unwrap()
                .insert(session.user_id, session.clone());
            Ok(())
        }

        async fn delete(&self, user_id: i64) -> anyhow::Result<()> {
            self.records.lock().unwrap().remove(&user_id);
            Ok(())
        }

        async fn sweep_expired(&self, ttl: Duration) -> anyhow::Result<usize> {
            let mut records = self.records.lock().unwrap();
            let before = records.len();
            records.retain(|_, session| !session.is_expired(ttl));
            Ok(before - records.len())
        }
    }

    struct BrokenBackend;

    #[async_trait]
    impl StorageBackend for BrokenBackend {
        fn name(&self) -> &str {
            "broken"
        }

        async fn health_check(&self) -> bool {
            false
        }

        async fn get(&self, _user_id: i64) -> anyhow::Result<Option<UserSession>> {
            anyhow::bail!("connection refused")
        }

        async fn put(&self, _session: &UserSession, _ttl: Duration) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }

        async fn delete(&self, _user_id: i64) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }

        async fn sweep_expired(&self, _ttl: Duration) -> anyhow::Result<usize> {
            anyhow::bail!("connection refused")
        }
    }

    const TTL: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn writes_land_on_both_sides() {
        let primary = Arc::new(MemoryBackend::new());
        let secondary = Arc::new(MemoryBackend::new());
        let pair = FallbackBackend::new(Arc::clone(&primary) as _, Arc::clone(&secondary) as _);

        let session = UserSession::new(7, 70);
        pair.put(&session, TTL).await.unwrap();

        assert!(primary.get(7).await.unwrap().is_some());
        assert!(secondary.get(7).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn dead_primary_still_reads_from_fallback() {
        let secondary = Arc::new(MemoryBackend::new());
        let session = UserSession::new(7, 70);
        secondary.put(&session, TTL).await.unwrap();

        let pair = FallbackBackend::new(Arc::new(BrokenBackend), secondary);
        let loaded = pair.get(7).await.unwrap().unwrap();
        assert_eq!(loaded.user_id, 7);
    }

    #[tokio::test]
    async fn dead_primary_still_accepts_writes() {
        let secondary = Arc::new(MemoryBackend::new());
        let pair = FallbackBackend::new(Arc::new(BrokenBackend), Arc::clone(&secondary) as _);

        pair.put(&UserSession::new(7, 70), TTL).await.unwrap();
        assert!(secondary.get(7).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn both_sides_dead_surfaces_an_error() {
        let pair = FallbackBackend::new(Arc::new(BrokenBackend), Arc::new(BrokenBackend));
        assert!(pair.put(&UserSession::new(7, 70), TTL).await.is_err());
    }

    #[tokio::test]
    async fn one_healthy_side_reports_healthy() {
        let pair = FallbackBackend::new(Arc::new(BrokenBackend), Arc::new(MemoryBackend::new()));
        assert!(pair.health_check().await);

        let dead = FallbackBackend::new(Arc::new(BrokenBackend), Arc::new(BrokenBackend));
        assert!(!dead.health_check().await);
    }

    #[tokio::test]
    async fn primary_miss_falls_through_to_fallback() {
        let primary = Arc::new(MemoryBackend::new());
        let secondary = Arc::new(MemoryBackend::new());
        let session = UserSession::new(7, 70);
        secondary.put(&session, TTL).await.unwrap();

        let pair = FallbackBackend::new(primary, secondary);
        assert!(pair.get(7).await.unwrap().is_some());
    }
}
