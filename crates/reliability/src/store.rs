use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::to_writer_pretty;

use planweave_core_types::WeaveError;

use crate::record::{PerfKey, ToolPerformanceRecord};

/// External persistence for performance records.
///
/// `save` is called after every recorded attempt; implementations may
/// coalesce writes internally but must never lose a failure that
/// preceded a success, since that would invert future ordering.
#[async_trait]
pub trait PerformanceStore: Send + Sync {
    async fn load(&self) -> Result<Vec<ToolPerformanceRecord>, WeaveError>;

    async fn save(&self, record: &ToolPerformanceRecord) -> Result<(), WeaveError>;

    /// Drop one persisted record. Backs the learner's per-pair reset;
    /// the record must not resurface on a later `load`.
    async fn remove(&self, key: &PerfKey) -> Result<(), WeaveError>;

    /// Drop all persisted records. Backs the learner's explicit reset.
    async fn clear(&self) -> Result<(), WeaveError>;
}

/// Ephemeral store for tests and single-run usage.
#[derive(Default)]
pub struct InMemoryPerformanceStore {
    records: DashMap<PerfKey, ToolPerformanceRecord>,
}

impl InMemoryPerformanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl PerformanceStore for InMemoryPerformanceStore {
    async fn load(&self) -> Result<Vec<ToolPerformanceRecord>, WeaveError> {
        Ok(self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn save(&self, record: &ToolPerformanceRecord) -> Result<(), WeaveError> {
        self.records.insert(record.key(), record.clone());
        Ok(())
    }

    async fn remove(&self, key: &PerfKey) -> Result<(), WeaveError> {
        self.records.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), WeaveError> {
        self.records.clear();
        Ok(())
    }
}

/// JSON-file store: the whole record set is rewritten on every save.
///
/// Good enough for the record volumes involved (tools × targets); the
/// write lock keeps concurrent saves from interleaving.
pub struct JsonFilePerformanceStore {
    path: PathBuf,
    cache: DashMap<PerfKey, ToolPerformanceRecord>,
    write_lock: Mutex<()>,
}

impl JsonFilePerformanceStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            cache: DashMap::new(),
            write_lock: Mutex::new(()),
        }
    }

    fn read_file(&self) -> Result<Vec<ToolPerformanceRecord>, WeaveError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let bytes = std::fs::read(&self.path)
            .map_err(|err| WeaveError::Store(format!("read {}: {err}", self.path.display())))?;
        serde_json::from_slice(&bytes)
            .map_err(|err| WeaveError::Store(format!("parse {}: {err}", self.path.display())))
    }

    fn write_file(&self) -> Result<(), WeaveError> {
        let _guard = self.write_lock.lock();
        let records: Vec<ToolPerformanceRecord> = self
            .cache
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        let file = File::create(&self.path)
            .map_err(|err| WeaveError::Store(format!("create {}: {err}", self.path.display())))?;
        let mut writer = BufWriter::new(file);
        to_writer_pretty(&mut writer, &records)
            .map_err(|err| WeaveError::Store(format!("write {}: {err}", self.path.display())))
    }
}

#[async_trait]
impl PerformanceStore for JsonFilePerformanceStore {
    async fn load(&self) -> Result<Vec<ToolPerformanceRecord>, WeaveError> {
        let records = self.read_file()?;
        for record in &records {
            self.cache.insert(record.key(), record.clone());
        }
        Ok(records)
    }

    async fn save(&self, record: &ToolPerformanceRecord) -> Result<(), WeaveError> {
        self.cache.insert(record.key(), record.clone());
        self.write_file()
    }

    async fn remove(&self, key: &PerfKey) -> Result<(), WeaveError> {
        if self.cache.remove(key).is_none() {
            // Cold cache: the record may still sit in the file.
            let mut records = self.read_file()?;
            let before = records.len();
            records.retain(|record| &record.key() != key);
            if records.len() == before {
                return Ok(());
            }
            for record in records {
                self.cache.insert(record.key(), record);
            }
        }
        self.write_file()
    }

    async fn clear(&self) -> Result<(), WeaveError> {
        self.cache.clear();
        if self.path.exists() {
            std::fs::remove_file(&self.path).map_err(|err| {
                WeaveError::Store(format!("remove {}: {err}", self.path.display()))
            })?;
        }
        Ok(())
    }
}
