//! Task-id persistence for async jobs
//!
//! Video and other async generations return a task id the client polls
//! later, possibly against a different gateway instance. The store maps
//! the public task id to the channel that owns the upstream job.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::utils::error::{RelayError, RelayResult};

/// Persisted metadata for one async task
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TaskRecord {
    /// Upstream task id
    pub upstream_task_id: String,
    /// Channel the job was submitted through
    pub channel_id: u64,
    /// Model name the client asked for
    pub origin_model: String,
}

/// Task-record storage backend
#[async_trait]
pub trait Store: Send + Sync {
    async fn save(&self, task_id: &str, record: TaskRecord) -> RelayResult<()>;
    async fn load(&self, task_id: &str) -> RelayResult<TaskRecord>;
}

/// In-process store, suitable for a single gateway instance
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, TaskRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save(&self, task_id: &str, record: TaskRecord) -> RelayResult<()> {
        self.records.write().await.insert(task_id.to_string(), record);
        Ok(())
    }

    async fn load(&self, task_id: &str) -> RelayResult<TaskRecord> {
        self.records
            .read()
            .await
            .get(task_id)
            .cloned()
            .ok_or_else(|| RelayError::NotFound(format!("unknown task id: {}", task_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_and_load() {
        let store = MemoryStore::new();
        let record = TaskRecord {
            upstream_task_id: "up-123".to_string(),
            channel_id: 7,
            origin_model: "wanx2.1-t2v-turbo".to_string(),
        };
        store.save("task-abc", record).await.unwrap();

        let loaded = store.load("task-abc").await.unwrap();
        assert_eq!(loaded.upstream_task_id, "up-123");
        assert_eq!(loaded.channel_id, 7);
    }

    #[tokio::test]
    async fn test_load_missing() {
        let store = MemoryStore::new();
        let err = store.load("nope").await.unwrap_err();
        assert!(matches!(err, RelayError::NotFound(_)));
    }
}
