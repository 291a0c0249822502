//! Generated image storage
//!
//! Two tiers: an in-memory map that always works, and an optional on-disk
//! directory. Disk failures fall back to memory so image generation never
//! fails on storage. Entries are dropped by the periodic sweep once older
//! than the configured retention.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::config::ImageConfig;
use crate::error::Result;

struct MemoryImage {
    data: Bytes,
    stored_at: SystemTime,
}

/// Image store with a memory tier and an optional disk tier
pub struct ImageStore {
    memory: DashMap<String, MemoryImage>,
    dir: Option<PathBuf>,
    retention: Duration,
}

impl ImageStore {
    pub fn new(config: &ImageConfig) -> Self {
        Self {
            memory: DashMap::new(),
            dir: config.dir.clone(),
            retention: config.retention,
        }
    }

    /// Create the on-disk directory; falls back to memory-only on failure
    pub async fn ensure_dir(&mut self) {
        let Some(dir) = &self.dir else {
            info!("Image storage is memory-only");
            return;
        };

        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!(
                "Failed to create image directory {}: {}; using memory storage",
                dir.display(),
                e
            );
            self.dir = None;
        } else {
            info!("Image directory ready: {}", dir.display());
        }
    }

    /// Store an image under the given filename
    pub async fn save(&self, filename: &str, data: Bytes) {
        if let Some(dir) = &self.dir {
            let path = dir.join(filename);
            match tokio::fs::write(&path, &data).await {
                Ok(()) => {
                    debug!("Image saved to {}", path.display());
                    return;
                }
                Err(e) => {
                    warn!(
                        "Failed to write {}: {}; keeping image in memory",
                        path.display(),
                        e
                    );
                }
            }
        }

        self.memory.insert(
            filename.to_string(),
            MemoryImage {
                data,
                stored_at: SystemTime::now(),
            },
        );
    }

    /// Load an image by filename: memory first, then disk
    pub async fn load(&self, filename: &str) -> Option<Bytes> {
        if let Some(entry) = self.memory.get(filename) {
            return Some(entry.data.clone());
        }

        let dir = self.dir.as_ref()?;
        match tokio::fs::read(dir.join(filename)).await {
            Ok(data) => Some(Bytes::from(data)),
            Err(_) => None,
        }
    }

    /// Remove entries older than the retention window; returns removed count
    pub async fn sweep(&self) -> Result<usize> {
        let mut removed = 0;

        let now = SystemTime::now();
        let retention = self.retention;
        let before = self.memory.len();
        self.memory.retain(|_, image| {
            now.duration_since(image.stored_at)
                .map(|age| age < retention)
                .unwrap_or(true)
        });
        removed += before - self.memory.len();

        if let Some(dir) = &self.dir {
            let mut entries = tokio::fs::read_dir(dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let metadata = match entry.metadata().await {
                    Ok(m) if m.is_file() => m,
                    _ => continue,
                };
                let expired = metadata
                    .modified()
                    .ok()
                    .and_then(|mtime| now.duration_since(mtime).ok())
                    .map(|age| age >= retention)
                    .unwrap_or(false);
                if expired {
                    if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                        warn!("Failed to remove {}: {}", entry.path().display(), e);
                    } else {
                        removed += 1;
                    }
                }
            }
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_only(retention: Duration) -> ImageStore {
        ImageStore::new(&ImageConfig {
            dir: None,
            retention,
            return_base64: true,
            base_url: None,
        })
    }

    #[tokio::test]
    async fn test_memory_save_and_load() {
        let store = memory_only(Duration::from_secs(3600));
        store.save("a.webp", Bytes::from_static(b"img")).await;

        assert_eq!(store.load("a.webp").await.unwrap(), Bytes::from_static(b"img"));
        assert!(store.load("missing.webp").await.is_none());
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_memory_entries() {
        let store = memory_only(Duration::ZERO);
        store.save("old.webp", Bytes::from_static(b"img")).await;

        let removed = store.sweep().await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.load("old.webp").await.is_none());
    }

    #[tokio::test]
    async fn test_sweep_keeps_fresh_memory_entries() {
        let store = memory_only(Duration::from_secs(3600));
        store.save("fresh.webp", Bytes::from_static(b"img")).await;

        let removed = store.sweep().await.unwrap();
        assert_eq!(removed, 0);
        assert!(store.load("fresh.webp").await.is_some());
    }

    #[tokio::test]
    async fn test_disk_save_load_and_sweep() {
        let dir = std::env::temp_dir().join(format!("gondola-test-{}", uuid::Uuid::new_v4()));
        let mut store = ImageStore::new(&ImageConfig {
            dir: Some(dir.clone()),
            retention: Duration::ZERO,
            return_base64: false,
            base_url: None,
        });
        store.ensure_dir().await;

        store.save("x.webp", Bytes::from_static(b"img")).await;
        assert_eq!(store.load("x.webp").await.unwrap(), Bytes::from_static(b"img"));

        let removed = store.sweep().await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.load("x.webp").await.is_none());

        let _ = tokio::fs::remove_dir_all(dir).await;
    }
}
