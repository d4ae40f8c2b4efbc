//! This device's slice of the ledger: an in-memory increment list flushed
//! wholesale to one JSON document in the synced folder.
//!
//! The file is a snapshot, not an append stream: sync layers replace whole
//! files, so a partial append format would be torn apart anyway.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use wordledger_core::types::{DeviceLog, Increment};

use crate::identity::DeviceIdentity;
use crate::paths;
use crate::storage::Storage;

pub struct DeviceLogStore {
    identity: DeviceIdentity,
    storage: Arc<dyn Storage>,
    file_name: String,
    increments: Vec<Increment>,
    dirty: bool,
}

impl DeviceLogStore {
    pub fn new(identity: DeviceIdentity, storage: Arc<dyn Storage>) -> Self {
        let file_name = paths::device_log_file(&identity.file_stem());
        Self {
            identity,
            storage,
            file_name,
            increments: Vec::new(),
            dirty: false,
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn increments(&self) -> &[Increment] {
        &self.increments
    }

    pub fn is_empty(&self) -> bool {
        self.increments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.increments.len()
    }

    /// Whether the in-memory log is ahead of the file.  A failed flush keeps
    /// this set so the next flush, wherever it comes from, retries the write.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Load this device's increments from the synced folder.
    ///
    /// The expected file name is tried first.  When it misses (the device
    /// was renamed on another install, or the local name cache was lost)
    /// every device log in the folder is scanned for a matching embedded
    /// `deviceId`; the first match is adopted and rewritten under the
    /// expected name so the next session finds it directly.  Nothing here is
    /// fatal: unreadable data loads as an empty log.
    pub async fn load(&mut self) {
        if let Some(doc) = self.read_doc(&self.file_name).await {
            if doc.device_id == self.identity.id {
                self.increments = doc.increments;
                return;
            }
            // Another device slugged to the same stem.  Switch to the
            // id-based name so our flushes never clobber its log.
            warn!(
                file = %self.file_name,
                other_device = %doc.device_id,
                "device log name collision, falling back to id-based file name"
            );
            self.file_name = paths::device_log_file(&self.identity.id);
            if let Some(own) = self.read_doc(&self.file_name).await {
                if own.device_id == self.identity.id {
                    self.increments = own.increments;
                    return;
                }
            }
        }
        self.adopt_scan().await;
    }

    async fn adopt_scan(&mut self) {
        let names = match self.storage.list("").await {
            Ok(names) => names,
            Err(err) => {
                warn!(error = %err, "folder listing failed, starting with an empty log");
                return;
            }
        };

        for name in names.iter().filter(|n| paths::is_device_log_file(n)) {
            if *name == self.file_name {
                continue;
            }
            let Some(doc) = self.read_doc(name).await else {
                continue;
            };
            if doc.device_id != self.identity.id {
                continue;
            }

            info!(from = %name, to = %self.file_name, "adopting device log found under a stale name");
            self.increments = doc.increments;
            self.dirty = true;
            if let Err(err) = self.flush().await {
                warn!(
                    error = %err,
                    "adopted log could not be rewritten under the expected name, keeping the old name"
                );
                // The old file still matches what we hold.
                self.file_name = name.clone();
                self.dirty = false;
                return;
            }
            if let Err(err) = self.storage.remove(name).await {
                if !err.is_not_found() {
                    warn!(file = %name, error = %err, "stale device log left behind after adoption");
                }
            }
            return;
        }

        debug!(file = %self.file_name, "no existing device log, starting empty");
    }

    async fn read_doc(&self, name: &str) -> Option<DeviceLog> {
        let bytes = match self.storage.read(name).await {
            Ok(bytes) => bytes,
            Err(err) if err.is_not_found() => return None,
            Err(err) => {
                warn!(file = %name, error = %err, "device log unreadable, treating as absent");
                return None;
            }
        };
        match serde_json::from_slice::<DeviceLog>(&bytes) {
            Ok(doc) => Some(doc),
            Err(err) => {
                warn!(file = %name, error = %err, "device log malformed, treating as absent");
                None
            }
        }
    }

    /// Stage an increment in memory.  [`flush`](Self::flush) persists it.
    pub fn append(&mut self, increment: Increment) {
        self.increments.push(increment);
        self.dirty = true;
    }

    /// Write the whole log as one document.
    pub async fn flush(&mut self) -> Result<()> {
        let doc = DeviceLog {
            device_id: self.identity.id.clone(),
            device_name: self.identity.name.clone(),
            increments: self.increments.clone(),
        };
        let bytes = serde_json::to_vec(&doc)?;
        self.storage
            .write(&self.file_name, &bytes)
            .await
            .with_context(|| format!("flushing device log {}", self.file_name))?;
        self.dirty = false;
        debug!(file = %self.file_name, count = self.increments.len(), "device log flushed");
        Ok(())
    }

    /// Apply a new display name: rewrite the log under the new file name,
    /// then delete the old file.  When the rewrite fails the old name stays
    /// active so no increments are lost; when only the delete fails the
    /// stale file lingers harmlessly (merging dedups it) until a later
    /// adoption pass cleans it up.
    pub async fn rename_to(&mut self, name: Option<String>) -> Result<()> {
        let old_file = self.file_name.clone();
        self.identity.name = name;
        let new_file = paths::device_log_file(&self.identity.file_stem());

        if new_file == old_file {
            // Same slug: rewrite in place so the embedded name stays fresh.
            return self.flush().await;
        }

        self.file_name = new_file;
        if let Err(err) = self.flush().await {
            self.file_name = old_file;
            return Err(err);
        }
        info!(from = %old_file, to = %self.file_name, "device log renamed");

        if let Err(err) = self.storage.remove(&old_file).await {
            if !err.is_not_found() {
                warn!(file = %old_file, error = %err, "old device log left behind after rename");
            }
        }
        Ok(())
    }

    /// Drain every increment dated strictly before `cutoff`, preserving log
    /// order.
    pub fn remove_before(&mut self, cutoff: &str) -> Vec<Increment> {
        let (eligible, kept): (Vec<Increment>, Vec<Increment>) = self
            .increments
            .drain(..)
            .partition(|inc| inc.date.as_str() < cutoff);
        self.increments = kept;
        if !eligible.is_empty() {
            self.dirty = true;
        }
        eligible
    }

    /// Put drained increments back, after the write that was meant to persist
    /// their removal failed.  The log stays dirty; the next flush rewrites
    /// the file with everything restored.
    pub fn restore(&mut self, increments: Vec<Increment>) {
        self.increments.splice(0..0, increments);
    }

    /// Drop every increment dated exactly `date`, returning how many went.
    pub fn remove_on(&mut self, date: &str) -> usize {
        let before = self.increments.len();
        self.increments.retain(|inc| inc.date != date);
        let removed = before - self.increments.len();
        if removed > 0 {
            self.dirty = true;
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::storage::{MemoryStorage, StorageError};

    fn identity(id: &str, name: Option<&str>) -> DeviceIdentity {
        DeviceIdentity {
            id: id.to_string(),
            name: name.map(str::to_string),
        }
    }

    fn inc(timestamp: i64, date: &str, added: u64, deleted: u64) -> Increment {
        Increment {
            timestamp,
            date: date.to_string(),
            words_added: added,
            words_deleted: deleted,
        }
    }

    /// Storage wrapper whose writes fail for selected paths.
    struct FlakyStorage {
        inner: MemoryStorage,
        fail_writes: Mutex<HashSet<String>>,
    }

    impl FlakyStorage {
        fn new() -> Self {
            Self {
                inner: MemoryStorage::new(),
                fail_writes: Mutex::new(HashSet::new()),
            }
        }

        fn fail_writes_to(&self, path: &str) {
            self.fail_writes.lock().unwrap().insert(path.to_string());
        }
    }

    #[async_trait]
    impl Storage for FlakyStorage {
        async fn exists(&self, path: &str) -> Result<bool, StorageError> {
            self.inner.exists(path).await
        }
        async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
            self.inner.read(path).await
        }
        async fn write(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError> {
            if self.fail_writes.lock().unwrap().contains(path) {
                return Err(StorageError::Io(format!("{path}: injected write failure")));
            }
            self.inner.write(path, bytes).await
        }
        async fn remove(&self, path: &str) -> Result<(), StorageError> {
            self.inner.remove(path).await
        }
        async fn list(&self, dir: &str) -> Result<Vec<String>, StorageError> {
            self.inner.list(dir).await
        }
    }

    #[tokio::test]
    async fn flush_and_load_round_trip_preserves_order() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut log = DeviceLogStore::new(identity("aaa111", Some("Laptop")), Arc::clone(&storage));
        log.append(inc(3, "2024-01-02", 5, 0));
        log.append(inc(1, "2024-01-01", 10, 2));
        log.append(inc(2, "2024-01-01", 0, 4));
        log.flush().await.unwrap();

        let mut reloaded =
            DeviceLogStore::new(identity("aaa111", Some("Laptop")), Arc::clone(&storage));
        reloaded.load().await;
        assert_eq!(reloaded.increments(), log.increments());
        assert_eq!(reloaded.file_name(), "device-laptop.json");
    }

    #[tokio::test]
    async fn load_missing_file_starts_empty() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut log = DeviceLogStore::new(identity("aaa111", None), storage);
        log.load().await;
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn load_malformed_file_starts_empty() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        storage
            .write("device-aaa111.json", b"{ not json")
            .await
            .unwrap();
        let mut log = DeviceLogStore::new(identity("aaa111", None), storage);
        log.load().await;
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn load_adopts_log_under_stale_name_and_heals() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let old_doc = DeviceLog {
            device_id: "aaa111".to_string(),
            device_name: Some("Old Name".to_string()),
            increments: vec![inc(1, "2024-01-01", 7, 0)],
        };
        storage
            .write("device-old-name.json", &serde_json::to_vec(&old_doc).unwrap())
            .await
            .unwrap();

        let mut log = DeviceLogStore::new(identity("aaa111", Some("New Name")), Arc::clone(&storage));
        log.load().await;
        assert_eq!(log.len(), 1);
        assert_eq!(log.file_name(), "device-new-name.json");
        assert!(storage.exists("device-new-name.json").await.unwrap());
        assert!(!storage.exists("device-old-name.json").await.unwrap());
    }

    #[tokio::test]
    async fn load_ignores_other_devices_logs() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let foreign = DeviceLog {
            device_id: "bbb222".to_string(),
            device_name: None,
            increments: vec![inc(1, "2024-01-01", 100, 0)],
        };
        storage
            .write("device-bbb222.json", &serde_json::to_vec(&foreign).unwrap())
            .await
            .unwrap();

        let mut log = DeviceLogStore::new(identity("aaa111", None), storage);
        log.load().await;
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn name_collision_falls_back_to_id_file() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        // Another device already owns `device-laptop.json`.
        let foreign = DeviceLog {
            device_id: "bbb222".to_string(),
            device_name: Some("Laptop".to_string()),
            increments: vec![inc(1, "2024-01-01", 100, 0)],
        };
        let foreign_bytes = serde_json::to_vec(&foreign).unwrap();
        storage
            .write("device-laptop.json", &foreign_bytes)
            .await
            .unwrap();

        let mut log = DeviceLogStore::new(identity("aaa111", Some("Laptop")), Arc::clone(&storage));
        log.load().await;
        log.append(inc(9, "2024-01-02", 3, 0));
        log.flush().await.unwrap();

        assert_eq!(log.file_name(), "device-aaa111.json");
        // The other device's log is untouched.
        assert_eq!(
            storage.read("device-laptop.json").await.unwrap(),
            foreign_bytes
        );
    }

    #[tokio::test]
    async fn rename_moves_the_file_and_updates_the_doc() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut log = DeviceLogStore::new(identity("aaa111", None), Arc::clone(&storage));
        log.append(inc(1, "2024-01-01", 5, 1));
        log.flush().await.unwrap();
        assert!(storage.exists("device-aaa111.json").await.unwrap());

        log.rename_to(Some("Blue Laptop".to_string())).await.unwrap();
        assert!(!storage.exists("device-aaa111.json").await.unwrap());
        let bytes = storage.read("device-blue-laptop.json").await.unwrap();
        let doc: DeviceLog = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(doc.device_name.as_deref(), Some("Blue Laptop"));
        assert_eq!(doc.increments.len(), 1);
    }

    #[tokio::test]
    async fn failed_rename_keeps_the_old_file_live() {
        let flaky = Arc::new(FlakyStorage::new());
        flaky.fail_writes_to("device-new.json");
        let storage: Arc<dyn Storage> = flaky.clone();

        let mut log = DeviceLogStore::new(identity("aaa111", None), storage);
        log.append(inc(1, "2024-01-01", 5, 0));
        log.flush().await.unwrap();

        assert!(log.rename_to(Some("new".to_string())).await.is_err());
        assert_eq!(log.file_name(), "device-aaa111.json");

        // Later flushes still land under the old name.
        log.append(inc(2, "2024-01-01", 2, 0));
        log.flush().await.unwrap();
        let doc: DeviceLog =
            serde_json::from_slice(&flaky.inner.read("device-aaa111.json").await.unwrap()).unwrap();
        assert_eq!(doc.increments.len(), 2);
    }

    #[test]
    fn remove_before_partitions_by_date() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut log = DeviceLogStore::new(identity("aaa111", None), storage);
        log.append(inc(1, "2024-01-01", 1, 0));
        log.append(inc(2, "2024-01-03", 2, 0));
        log.append(inc(3, "2024-01-02", 3, 0));

        let drained = log.remove_before("2024-01-03");
        let drained_ts: Vec<i64> = drained.iter().map(|i| i.timestamp).collect();
        assert_eq!(drained_ts, vec![1, 3]);
        assert_eq!(log.len(), 1);
        assert_eq!(log.increments()[0].timestamp, 2);
    }

    #[tokio::test]
    async fn dirty_tracks_unpersisted_changes() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut log = DeviceLogStore::new(identity("aaa111", None), storage);
        assert!(!log.is_dirty());

        log.append(inc(1, "2024-01-01", 1, 0));
        assert!(log.is_dirty());
        log.flush().await.unwrap();
        assert!(!log.is_dirty());

        log.remove_on("2024-01-01");
        assert!(log.is_dirty());
        log.flush().await.unwrap();
        assert!(!log.is_dirty());

        // Removing nothing leaves the log clean.
        log.remove_on("2024-01-01");
        assert!(!log.is_dirty());
    }

    #[tokio::test]
    async fn failed_flush_stays_dirty_until_a_retry_lands() {
        let flaky = Arc::new(FlakyStorage::new());
        flaky.fail_writes_to("device-aaa111.json");
        let storage: Arc<dyn Storage> = flaky.clone();

        let mut log = DeviceLogStore::new(identity("aaa111", None), storage);
        log.append(inc(1, "2024-01-01", 5, 0));
        assert!(log.flush().await.is_err());
        assert!(log.is_dirty());

        flaky.fail_writes.lock().unwrap().clear();
        log.flush().await.unwrap();
        assert!(!log.is_dirty());
        assert!(flaky.inner.exists("device-aaa111.json").await.unwrap());
    }

    #[test]
    fn restore_puts_drained_increments_back() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut log = DeviceLogStore::new(identity("aaa111", None), storage);
        log.append(inc(1, "2024-01-01", 1, 0));
        log.append(inc(2, "2024-02-01", 2, 0));

        let drained = log.remove_before("2024-01-15");
        log.restore(drained);

        let ts: Vec<i64> = log.increments().iter().map(|i| i.timestamp).collect();
        assert_eq!(ts, vec![1, 2]);
        assert!(log.is_dirty());
    }

    #[test]
    fn remove_on_targets_one_day() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut log = DeviceLogStore::new(identity("aaa111", None), storage);
        log.append(inc(1, "2024-01-01", 1, 0));
        log.append(inc(2, "2024-01-02", 2, 0));
        log.append(inc(3, "2024-01-02", 3, 0));

        assert_eq!(log.remove_on("2024-01-02"), 2);
        assert_eq!(log.len(), 1);
        assert_eq!(log.remove_on("2024-01-02"), 0);
    }
}
