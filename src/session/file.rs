//! Local JSON file storage, the always-available fallback.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;

use super::backend::StorageBackend;
use super::UserSession;

/// Whole-map JSON file, rewritten atomically (temp file + rename) on each
/// mutation. A mutation lock serializes the read-modify-write cycle;
/// readers go lock-free since rename swaps complete files.
pub struct FileBackend {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileBackend {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> anyhow::Result<HashMap<i64, UserSession>> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("failed reading session file: {}", self.path.display())
                });
            }
        };
        match serde_json::from_str(&raw) {
            Ok(map) => Ok(map),
            Err(e) => {
                // A torn or hand-edited file costs its sessions, not uptime.
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "session file unreadable, starting empty"
                );
                Ok(HashMap::new())
            }
        }
    }

    async fn save(&self, map: &HashMap<i64, UserSession>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await.with_context(|| {
                format!("failed creating session dir: {}", parent.display())
            })?;
        }

        let serialized = serde_json::to_string(map)?;
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, serialized).await.with_context(|| {
            format!("failed writing session temp file: {}", temp_path.display())
        })?;

        if let Err(rename_error) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(rename_error).with_context(|| {
                format!("failed replacing session file: {}", self.path.display())
            });
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    fn name(&self) -> &str {
        "file"
    }

    async fn health_check(&self) -> bool {
        self.load().await.is_ok()
    }

    async fn get(&self, user_id: i64) -> anyhow::Result<Option<UserSession>> {
        Ok(self.load().await?.remove(&user_id))
    }

    async fn put(&self, session: &UserSession, _ttl: Duration) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.load().await?;
        map.insert(session.user_id, session.clone());
        self.save(&map).await
    }

    async fn delete(&self, user_id: i64) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.load().await?;
        if map.remove(&user_id).is_some() {
            self.save(&map).await?;
        }
        Ok(())
    }

    async fn sweep_expired(&self, ttl: Duration) -> anyhow::Result<usize> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.load().await?;
        let before = map.len();
        map.retain(|_, session| !session.is_expired(ttl));
        let removed = before - map.len();
        if removed > 0 {
            self.save(&map).await?;
        }
        Ok(removed)
    }
}
