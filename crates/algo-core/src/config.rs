//! Manager configuration.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::store::{EventLog, FileEventLog, MemoryEventLog};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Number of worker lanes. Each lane is one OS thread.
    pub threads: usize,
    /// Event log file. Without one the log is kept in memory only.
    pub store_path: Option<PathBuf>,
    /// fsync after every append.
    pub sync_writes: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            threads: 4,
            store_path: None,
            sync_writes: true,
        }
    }
}

impl ManagerConfig {
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    /// Open the event log this configuration describes.
    pub fn open_log(&self) -> Result<Arc<dyn EventLog>, StoreError> {
        Ok(match &self.store_path {
            Some(path) => Arc::new(FileEventLog::open(path, self.sync_writes)?),
            None => Arc::new(MemoryEventLog::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: ManagerConfig = serde_json::from_str(r#"{"threads": 2}"#).unwrap();
        assert_eq!(cfg.threads, 2);
        assert!(cfg.store_path.is_none());
        assert!(cfg.sync_writes);
    }

    #[test]
    fn file_log_is_opened_when_a_path_is_set() {
        let dir = tempfile::TempDir::new().unwrap();
        let cfg = ManagerConfig::default().with_store_path(dir.path().join("log/algos.jsonl"));
        let log = cfg.open_log().unwrap();
        assert_eq!(log.last_seq(), 0);
        assert!(dir.path().join("log/algos.jsonl").exists());
    }
}
