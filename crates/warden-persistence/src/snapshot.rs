//! Snapshot stores.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PersistenceError, PersistenceResult};

/// On-disk layout of a registry snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot<T, K = String> {
    /// Write time, milliseconds since Unix epoch.
    pub timestamp: u64,
    pub entries: Vec<T>,
    /// Keys whose work finished while the object they follow is still live.
    #[serde(default = "Vec::new", skip_serializing_if = "Vec::is_empty")]
    pub completed: Vec<K>,
}

impl<T: Serialize, K: Serialize> Snapshot<T, K> {
    pub fn encode(&self) -> PersistenceResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl<T: DeserializeOwned, K: DeserializeOwned> Snapshot<T, K> {
    pub fn decode(raw: &str) -> PersistenceResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Destination for serialized snapshots.
///
/// Implementations store an opaque document; the registry owns the format.
pub trait SnapshotStore: Send + Sync {
    /// Replace the stored snapshot.
    fn save(&self, contents: &str) -> PersistenceResult<()>;

    /// Read the stored snapshot, `None` if nothing was ever written.
    fn load(&self) -> PersistenceResult<Option<String>>;

    /// Human-readable location for log lines.
    fn describe(&self) -> String;
}

/// Snapshot stored as a single JSON file, replaced atomically.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<dir>/<name>.json`
    pub fn in_dir(dir: impl AsRef<Path>, name: &str) -> Self {
        Self::new(dir.as_ref().join(format!("{name}.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }
}

impl SnapshotStore for JsonFileStore {
    fn save(&self, contents: &str) -> PersistenceResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.temp_path();
        {
            let mut file = File::create(&tmp)?;
            file.write_all(contents.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), bytes = contents.len(), "Snapshot written");
        Ok(())
    }

    fn load(&self) -> PersistenceResult<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => {
                info!(path = %self.path.display(), bytes = raw.len(), "Snapshot loaded");
                Ok(Some(raw))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory snapshot store.
///
/// Used by tests and by registries that run without a data directory.
/// Writes can be made to fail on demand.
#[derive(Debug, Default)]
pub struct MemoryStore {
    contents: Mutex<Option<String>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a snapshot, as if written by a previous run.
    pub fn with_contents(contents: impl Into<String>) -> Self {
        let store = Self::default();
        *store.contents.lock() = Some(contents.into());
        store
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn contents(&self) -> Option<String> {
        self.contents.lock().clone()
    }
}

impl SnapshotStore for MemoryStore {
    fn save(&self, contents: &str) -> PersistenceResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable(
                "memory store write failure injected".to_string(),
            ));
        }
        *self.contents.lock() = Some(contents.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load(&self) -> PersistenceResult<Option<String>> {
        Ok(self.contents.lock().clone())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        key: String,
        n: u32,
    }

    fn sample() -> Snapshot<Row> {
        Snapshot {
            timestamp: 1_700_000_000_000,
            entries: vec![
                Row { key: "BTCUSDT".to_string(), n: 1 },
                Row { key: "ETHUSDT".to_string(), n: 2 },
            ],
            completed: vec!["SOLUSDT".to_string()],
        }
    }

    #[test]
    fn test_file_store_write_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::in_dir(temp_dir.path().join("registry"), "strategy_update");

        assert!(store.load().unwrap().is_none());

        store.save(&sample().encode().unwrap()).unwrap();
        let raw = store.load().unwrap().unwrap();
        let back: Snapshot<Row> = Snapshot::decode(&raw).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn test_file_store_replaces_and_leaves_no_temp() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::in_dir(temp_dir.path(), "top_up");

        store.save("{\"timestamp\":1,\"entries\":[]}").unwrap();
        store.save(&sample().encode().unwrap()).unwrap();

        let files: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(files, vec!["top_up.json".to_string()]);

        let back: Snapshot<Row> = Snapshot::decode(&store.load().unwrap().unwrap()).unwrap();
        assert_eq!(back.entries.len(), 2);
    }

    #[test]
    fn test_snapshot_without_completed_keys_decodes() {
        let back: Snapshot<Row> = Snapshot::decode("{\"timestamp\":1,\"entries\":[]}").unwrap();
        assert!(back.completed.is_empty());
        assert!(!back.encode().unwrap().contains("completed"));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Snapshot::<Row>::decode("not json").is_err());
    }

    #[test]
    fn test_memory_store_failure_injection() {
        let store = MemoryStore::new();
        store.save("a").unwrap();
        store.set_fail_writes(true);
        assert!(store.save("b").is_err());
        assert_eq!(store.contents().as_deref(), Some("a"));
        assert_eq!(store.write_count(), 1);
    }
}
