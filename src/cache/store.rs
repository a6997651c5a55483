//! Persistent cache tier
//!
//! One record per owner, laid out as
//! `{"ts": <epoch millis>, "entries": [[name, definition], ...]}`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{HivemojiError, Result};
use crate::registry::{EmojiDefinition, Registry};

/// A registry as written to the persistent tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSnapshot {
    /// When the registry was built, in epoch milliseconds
    pub ts: i64,
    pub entries: Vec<(String, EmojiDefinition)>,
}

impl StoredSnapshot {
    pub fn new(registry: &Registry, built_at: DateTime<Utc>) -> Self {
        Self {
            ts: built_at.timestamp_millis(),
            entries: registry.to_entries(),
        }
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.ts).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn registry(&self) -> Registry {
        Registry::from_entries(self.entries.iter().cloned())
    }
}

/// Storage for the persistent tier
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self, owner: &str) -> Result<Option<StoredSnapshot>>;

    async fn save(&self, owner: &str, snapshot: &StoredSnapshot) -> Result<()>;
}

/// Keeps one JSON file per owner under a base directory
#[derive(Debug, Clone)]
pub struct FsSnapshotStore {
    base_path: PathBuf,
}

impl FsSnapshotStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn file_for(&self, owner: &str) -> Result<PathBuf> {
        let safe = !owner.is_empty()
            && !owner.starts_with('.')
            && owner
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
        if !safe {
            return Err(HivemojiError::Store(format!(
                "owner {:?} cannot be used as a storage key",
                owner
            )));
        }
        Ok(self.base_path.join(format!("{}.json", owner)))
    }
}

#[async_trait]
impl SnapshotStore for FsSnapshotStore {
    async fn load(&self, owner: &str) -> Result<Option<StoredSnapshot>> {
        let path = self.file_for(owner)?;
        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&content)?))
    }

    async fn save(&self, owner: &str, snapshot: &StoredSnapshot) -> Result<()> {
        let path = self.file_for(owner)?;
        fs::create_dir_all(&self.base_path).await?;

        // Write then rename so a reader never sees half a snapshot
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, serde_json::to_vec(snapshot)?).await?;
        fs::rename(&staging, &path).await?;
        Ok(())
    }
}

/// In-process persistent tier, for tests and embedding
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<HashMap<String, StoredSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored owners
    pub fn len(&self) -> usize {
        self.snapshots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.lock().is_empty()
    }

    /// Seed a snapshot directly
    pub fn insert(&self, owner: impl Into<String>, snapshot: StoredSnapshot) {
        self.snapshots.lock().insert(owner.into(), snapshot);
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self, owner: &str) -> Result<Option<StoredSnapshot>> {
        Ok(self.snapshots.lock().get(owner).cloned())
    }

    async fn save(&self, owner: &str, snapshot: &StoredSnapshot) -> Result<()> {
        self.snapshots
            .lock()
            .insert(owner.to_string(), snapshot.clone());
        Ok(())
    }
}
