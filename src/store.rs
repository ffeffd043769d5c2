use crate::model::{Content, ContentKey};
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// TTL-aware keyed store for the last known canonical record of each title.
///
/// Keyed by `(tmdb_id, media_type)`. Writes are last-write-wins and always
/// stamp `last_synced_at`, so even a no-op refresh resets the TTL clock.
/// When a backing file is configured the whole map is persisted
/// write-through; I/O failures are logged and never propagated (a lost
/// flush degrades to a cold start, it must not fail the caller).
pub struct CacheStore {
    path: Option<PathBuf>,
    entries: RwLock<HashMap<ContentKey, Content>>,
}

impl CacheStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Opens a file-backed store. A missing or unreadable file is not an
    /// error; the store simply starts empty.
    pub async fn open(path: PathBuf) -> Self {
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<Vec<Content>>(&bytes) {
                Ok(list) => {
                    info!("loaded {} cached titles from {}", list.len(), path.display());
                    list.into_iter().map(|c| (c.key(), c)).collect()
                }
                Err(e) => {
                    warn!("content store {} is corrupt, starting empty: {e}", path.display());
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Self {
            path: Some(path),
            entries: RwLock::new(entries),
        }
    }

    pub async fn get(&self, key: &ContentKey) -> Option<(Content, bool)> {
        let now = Utc::now();
        self.entries
            .read()
            .await
            .get(key)
            .map(|c| (c.clone(), c.is_fresh(now)))
    }

    /// Never returns a stale record. Callers wanting degrade-to-stale use
    /// `get` and interpret the freshness flag themselves.
    pub async fn get_fresh(&self, key: &ContentKey) -> Option<Content> {
        self.get(key)
            .await
            .and_then(|(content, fresh)| fresh.then_some(content))
    }

    /// Listing-derived records carry no cast or provider data; a shallow
    /// write must not erase those fields on a previously cached full record.
    pub async fn upsert(&self, mut content: Content) -> Content {
        content.last_synced_at = Some(Utc::now());
        {
            let mut entries = self.entries.write().await;
            if let Some(prev) = entries.get(&content.key()) {
                if content.cast.is_empty() {
                    content.cast = prev.cast.clone();
                }
                if content.providers.is_none() {
                    content.providers = prev.providers.clone();
                }
            }
            entries.insert(content.key(), content.clone());
        }
        self.flush().await;
        content
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    async fn flush(&self) {
        let Some(path) = &self.path else { return };
        let snapshot: Vec<Content> = self.entries.read().await.values().cloned().collect();
        match serde_json::to_vec(&snapshot) {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::write(path, bytes).await {
                    warn!("failed to persist content store to {}: {e}", path.display());
                }
            }
            Err(e) => warn!("failed to serialize content store: {e}"),
        }
    }
}
