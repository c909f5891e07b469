//! Durable per-user dialogue sessions.
//!
//! One [`UserSession`] per Telegram user, persisted through a pluggable
//! [`StorageBackend`] with TTL expiry. [`SessionStore`] adds the two
//! guarantees the dialogue needs on top of raw storage: expired records
//! never resume a conversation, and all read-modify-write work for a user
//! happens under that user's [`SessionLease`].

pub mod backend;
pub mod file;
pub mod redis;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

pub use backend::{FallbackBackend, StorageBackend, connect_backend};
pub use file::FileBackend;
pub use redis::RedisBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    Init,
    AwaitingQuizType,
    AwaitingQuizJson,
    Processing,
    Complete,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QuizType {
    Anonymous,
    NonAnonymous,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSession {
    pub user_id: i64,
    pub chat_id: i64,
    pub state: SessionState,
    #[serde(default)]
    pub quiz_type: Option<QuizType>,
    /// Raw payload text held while a delivery is in flight. Cleared at
    /// Complete/Error.
    #[serde(default)]
    pub pending_payload: Option<String>,
    /// Quizzes completed over this session's lifetime.
    #[serde(default)]
    pub quiz_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl UserSession {
    #[must_use]
    pub fn new(user_id: i64, chat_id: i64) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            chat_id,
            state: SessionState::Init,
            quiz_type: None,
            pending_payload: None,
            quiz_count: 0,
            created_at: now,
            last_activity_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }

    #[must_use]
    pub fn is_expired(&self, ttl: Duration) -> bool {
        Utc::now()
            .signed_duration_since(self.last_activity_at)
            .to_std()
            .is_ok_and(|age| age > ttl)
    }
}

/// Exclusive critical section for one user's dialogue work.
///
/// Held across the whole read-transition-send-write cycle so concurrent
/// webhook deliveries for the same user serialize instead of clobbering
/// each other's state.
pub struct SessionLease {
    _guard: OwnedMutexGuard<()>,
}

pub struct SessionStore {
    backend: Arc<dyn StorageBackend>,
    ttl: Duration,
    locks: StdMutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl SessionStore {
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Enter the per-user critical section. Waits behind any holder for the
    /// same user; different users never contend.
    pub async fn acquire(&self, user_id: i64) -> SessionLease {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            Arc::clone(
                locks
                    .entry(user_id)
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        SessionLease {
            _guard: lock.lock_owned().await,
        }
    }

    /// Fetch the user's live session. Expired or unreadable records count
    /// as absent; the dialogue starts fresh rather than resuming them.
    pub async fn get(&self, user_id: i64) -> Option<UserSession> {
        let session = match self.backend.get(user_id).await {
            Ok(found) => found?,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "session read failed, starting fresh");
                return None;
            }
        };
        if session.is_expired(self.ttl) {
            if let Err(e) = self.backend.delete(user_id).await {
                tracing::debug!(user_id, error = %e, "expired session cleanup failed");
            }
            return None;
        }
        Some(session)
    }

    /// Persist the session. Storage trouble is logged and absorbed here so
    /// a degraded backend never aborts the conversation.
    pub async fn put(&self, session: &UserSession) {
        if let Err(e) = self.backend.put(session, self.ttl).await {
            tracing::warn!(user_id = session.user_id, error = %e, "session write failed");
        }
    }

    pub async fn delete(&self, user_id: i64) {
        if let Err(e) = self.backend.delete(user_id).await {
            tracing::warn!(user_id, error = %e, "session delete failed");
        }
    }

    /// Drop every record past its TTL and prune idle per-user locks.
    /// Returns how many records were removed.
    pub async fn sweep(&self) -> usize {
        let removed = match self.backend.sweep_expired(self.ttl).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(error = %e, "session sweep failed");
                0
            }
        };
        if removed > 0 {
            tracing::info!(removed, "swept expired sessions");
        }

        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        removed
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub async fn backend_healthy(&self) -> bool {
        self.backend.health_check().await
    }
}
