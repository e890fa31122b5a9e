//! Task record persistence port.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use probos_types::{RigError, TaskId, TaskRecord};

/// Persistence port for task lifecycle records.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert(&self, record: TaskRecord) -> Result<(), RigError>;

    /// Replace an existing record.
    ///
    /// # Errors
    ///
    /// [`RigError::Storage`] when no record with the given id exists.
    async fn update(&self, record: TaskRecord) -> Result<(), RigError>;

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, RigError>;

    /// All records, newest first.
    async fn all(&self) -> Result<Vec<TaskRecord>, RigError>;
}

/// Process-local store backed by a hash map.
#[derive(Default)]
pub struct InMemoryTaskStore {
    records: Mutex<HashMap<TaskId, TaskRecord>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<TaskId, TaskRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, record: TaskRecord) -> Result<(), RigError> {
        self.records().insert(record.id, record);
        Ok(())
    }

    async fn update(&self, record: TaskRecord) -> Result<(), RigError> {
        let mut records = self.records();
        if !records.contains_key(&record.id) {
            return Err(RigError::Storage(format!("unknown task {}", record.id)));
        }
        records.insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, RigError> {
        Ok(self.records().get(&id).cloned())
    }

    async fn all(&self) -> Result<Vec<TaskRecord>, RigError> {
        let mut records: Vec<TaskRecord> = self.records().values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use probos_types::TaskStatus;

    #[tokio::test]
    async fn insert_get_update_round_trip() {
        let store = InMemoryTaskStore::new();
        let record = TaskRecord::new("demo", serde_json::json!({}));
        let id = record.id;

        store.insert(record).await.unwrap();
        let mut stored = store.get(id).await.unwrap().expect("record present");
        assert_eq!(stored.status, TaskStatus::Scheduled);

        stored.status = TaskStatus::Running;
        store.update(stored).await.unwrap();
        assert_eq!(
            store.get(id).await.unwrap().unwrap().status,
            TaskStatus::Running
        );
    }

    #[tokio::test]
    async fn update_of_unknown_record_fails() {
        let store = InMemoryTaskStore::new();
        let record = TaskRecord::new("demo", serde_json::json!({}));
        let err = store.update(record).await.unwrap_err();
        assert!(matches!(err, RigError::Storage(_)));
    }

    #[tokio::test]
    async fn all_returns_newest_first() {
        let store = InMemoryTaskStore::new();
        let older = TaskRecord::new("older", serde_json::json!({}));
        let mut newer = TaskRecord::new("newer", serde_json::json!({}));
        newer.created_at = older.created_at + chrono::Duration::seconds(1);
        store.insert(older).await.unwrap();
        store.insert(newer).await.unwrap();

        let all = store.all().await.unwrap();
        assert_eq!(all[0].name, "newer");
        assert_eq!(all[1].name, "older");
    }
}
