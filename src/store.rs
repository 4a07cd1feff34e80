//! The document store the tracker reads from and writes to.
//!
//! The tracker only needs list/create operations with equality, order and
//! limit filters, so any backend (hosted document database, REST service,
//! a local JSON file) can sit behind [`ChoreStore`].

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::model::{CompletionRecord, NewCompletion, NewTask, RecordFilter, Task, User};

/// Failure reported by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("remote store error: {0}")]
    Remote(String),
    #[error("chore not found: {0}")]
    TaskNotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed store document: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Operations the tracker consumes from its backend.
#[async_trait]
pub trait ChoreStore: Send + Sync {
    async fn list_tasks(&self) -> StoreResult<Vec<Task>>;

    async fn list_completion_records(&self, filter: &RecordFilter) -> StoreResult<Vec<CompletionRecord>>;

    async fn create_completion_record(&self, new: NewCompletion) -> StoreResult<CompletionRecord>;

    async fn create_task(&self, new: NewTask) -> StoreResult<Task>;

    async fn list_users(&self) -> StoreResult<Vec<User>>;
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Build the stored record for a completion, embedding the chore title.
pub(crate) fn completion_record(new: NewCompletion, task_title: Option<String>) -> CompletionRecord {
    CompletionRecord {
        id: new_id(),
        task_id: new.task_id,
        task_title,
        user_id: new.user_id,
        percentage_done: Some(new.percentage_done),
        week: Some(new.week),
        year: Some(new.year),
        created_at: new.timestamp,
    }
}

#[derive(Debug, Default)]
struct MemoryData {
    tasks: Vec<Task>,
    records: Vec<CompletionRecord>,
    users: Vec<User>,
}

/// In-process store with failure and latency injection.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<MemoryData>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    /// Delays consumed one per `list_tasks` call.
    read_delays: Mutex<VecDeque<Duration>>,
    write_delay: Mutex<Option<Duration>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(tasks: Vec<Task>, records: Vec<CompletionRecord>, users: Vec<User>) -> Self {
        Self {
            data: RwLock::new(MemoryData {
                tasks,
                records,
                users,
            }),
            ..Self::default()
        }
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Delay the next `list_tasks` call by `delay`.
    pub fn push_read_delay(&self, delay: Duration) {
        if let Ok(mut delays) = self.read_delays.lock() {
            delays.push_back(delay);
        }
    }

    pub fn set_write_delay(&self, delay: Option<Duration>) {
        if let Ok(mut d) = self.write_delay.lock() {
            *d = delay;
        }
    }

    /// Number of successful writes.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn records(&self) -> Vec<CompletionRecord> {
        self.data.read().await.records.clone()
    }

    pub async fn push_record(&self, record: CompletionRecord) {
        self.data.write().await.records.push(record);
    }

    fn check_reads(&self) -> StoreResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Remote("service unavailable".into()));
        }
        Ok(())
    }

    async fn before_write(&self) -> StoreResult<()> {
        let delay = self.write_delay.lock().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Remote("write rejected".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChoreStore for MemoryStore {
    async fn list_tasks(&self) -> StoreResult<Vec<Task>> {
        let delay = self.read_delays.lock().ok().and_then(|mut d| d.pop_front());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_reads()?;
        Ok(self.data.read().await.tasks.clone())
    }

    async fn list_completion_records(&self, filter: &RecordFilter) -> StoreResult<Vec<CompletionRecord>> {
        self.check_reads()?;
        Ok(filter.apply(&self.data.read().await.records))
    }

    async fn create_completion_record(&self, new: NewCompletion) -> StoreResult<CompletionRecord> {
        self.before_write().await?;
        let mut data = self.data.write().await;
        let title = data
            .tasks
            .iter()
            .find(|t| t.id == new.task_id)
            .map(|t| t.title.clone());
        let record = completion_record(new, title);
        data.records.push(record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(record)
    }

    async fn create_task(&self, new: NewTask) -> StoreResult<Task> {
        self.before_write().await?;
        let task = Task {
            id: new_id(),
            title: new.title,
            recurrence: Some(new.recurrence),
        };
        self.data.write().await.tasks.push(task.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(task)
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        self.check_reads()?;
        Ok(self.data.read().await.users.clone())
    }
}
