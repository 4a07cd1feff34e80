//! Local JSON-file store.
//!
//! Keeps chores, completion records and users in one JSON document, which
//! lets the CLI and desktop shell run without a hosted backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

use crate::model::{CompletionRecord, NewCompletion, NewTask, RecordFilter, Task, User};
use crate::store::{completion_record, new_id, ChoreStore, StoreError, StoreResult};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreDocument {
    #[serde(default)]
    tasks: Vec<Task>,
    #[serde(default)]
    records: Vec<CompletionRecord>,
    #[serde(default)]
    users: Vec<User>,
}

/// Store backed by a single JSON file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles on the file.
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> StoreResult<StoreDocument> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(StoreDocument::default()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoreDocument::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_document(&self, doc: &StoreDocument) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let data = serde_json::to_string_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), "store document written");
        Ok(())
    }

    /// Add a household member. Not part of [`ChoreStore`]: users are managed
    /// outside the tracker.
    pub async fn add_user(&self, name: &str, color: &str) -> StoreResult<User> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read_document().await?;
        let user = User {
            id: new_id(),
            name: name.to_string(),
            color: color.to_string(),
        };
        doc.users.push(user.clone());
        self.write_document(&doc).await?;
        Ok(user)
    }
}

#[async_trait]
impl ChoreStore for JsonFileStore {
    async fn list_tasks(&self) -> StoreResult<Vec<Task>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_document().await?.tasks)
    }

    async fn list_completion_records(&self, filter: &RecordFilter) -> StoreResult<Vec<CompletionRecord>> {
        let _guard = self.lock.lock().await;
        let doc = self.read_document().await?;
        let mut records = filter.apply(&doc.records);
        // Expand the chore relation the way the hosted store does.
        for record in records.iter_mut().filter(|r| r.task_title.is_none()) {
            record.task_title = doc
                .tasks
                .iter()
                .find(|t| t.id == record.task_id)
                .map(|t| t.title.clone());
        }
        Ok(records)
    }

    async fn create_completion_record(&self, new: NewCompletion) -> StoreResult<CompletionRecord> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read_document().await?;
        let title = doc
            .tasks
            .iter()
            .find(|t| t.id == new.task_id)
            .map(|t| t.title.clone())
            .ok_or_else(|| StoreError::TaskNotFound(new.task_id.clone()))?;
        let record = completion_record(new, Some(title));
        doc.records.push(record.clone());
        self.write_document(&doc).await?;
        Ok(record)
    }

    async fn create_task(&self, new: NewTask) -> StoreResult<Task> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read_document().await?;
        let task = Task {
            id: new_id(),
            title: new.title,
            recurrence: Some(new.recurrence),
        };
        doc.tasks.push(task.clone());
        self.write_document(&doc).await?;
        Ok(task)
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_document().await?.users)
    }
}
