//! Reconciliation loop: fetch -> build -> publish -> toggle -> persist.
//!
//! The loop owns the published matrix. Toggles mutate it optimistically and
//! publish immediately; the completion write runs as a detached task whose
//! outcome is reported on the event channel instead of being awaited.
//!
//! Fetches are sequenced: a fetch that resolves after a newer one was applied
//! is dropped, and local edits whose writes had not settled when a fetch
//! started are replayed on top of its result.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::TrackerConfig;
use crate::error::{ErrorCode, Result, TrackerError};
use crate::matrix::{build_matrix, BuildStats, CompletionMatrix, Slot, TieBreak, ToggleOutcome};
use crate::model::{
    ChoreSummary, CompletionRecord, NewCompletion, NewTask, RecordFilter, RecordOrder, Recurrence,
    Task, User,
};
use crate::store::{ChoreStore, StoreError};
use crate::tracker_err;
use crate::view::{grid_view, GridView};
use crate::week::WeekGrid;

const EVENT_CAPACITY: usize = 64;

/// Source of "now" for toggles and the current-week highlight.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Notifications for the rendering layer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackerEvent {
    MatrixPublished {
        matrix: CompletionMatrix,
    },
    WriteSucceeded {
        task_id: String,
        week_index: usize,
        record_id: String,
    },
    WriteFailed {
        task_id: String,
        week_index: usize,
        error: TrackerError,
        rolled_back: bool,
    },
}

/// What a refresh did with its result.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Applied { seq: u64, stats: BuildStats },
    /// A newer fetch had already been applied.
    Stale { seq: u64 },
}

#[derive(Debug, Clone)]
enum EditKind {
    Slot {
        task_id: String,
        week_index: usize,
        value: Option<Slot>,
    },
    InsertTask(Task),
}

#[derive(Debug, Clone)]
struct LocalEdit {
    seq: u64,
    kind: EditKind,
    /// The remote write finished (either way).
    settled: bool,
}

impl LocalEdit {
    /// What the edit writes to: one slot, or one chore's row.
    fn target(&self) -> (&str, Option<usize>) {
        match &self.kind {
            EditKind::Slot {
                task_id, week_index, ..
            } => (task_id.as_str(), Some(*week_index)),
            EditKind::InsertTask(task) => (task.id.as_str(), None),
        }
    }

    fn replay(&self, matrix: &mut CompletionMatrix) {
        match &self.kind {
            EditKind::Slot {
                task_id,
                week_index,
                value,
            } => {
                if let Err(e) = matrix.set_slot(task_id, *week_index, value.clone()) {
                    debug!(task = %task_id, error = %e, "local edit no longer applies");
                }
            }
            EditKind::InsertTask(task) => {
                matrix.insert_task(task);
            }
        }
    }
}

/// Screen state owned by the loop.
#[derive(Debug)]
pub struct TrackerState {
    /// `None` until the first successful fetch.
    matrix: Option<CompletionMatrix>,
    users: Vec<User>,
    grid: WeekGrid,
    applied_fetch: u64,
    edit_seq: u64,
    pending: Vec<LocalEdit>,
}

impl TrackerState {
    fn new(grid: WeekGrid) -> Self {
        Self {
            matrix: None,
            users: Vec::new(),
            grid,
            applied_fetch: 0,
            edit_seq: 0,
            pending: Vec::new(),
        }
    }

    fn push_edit(&mut self, kind: EditKind, settled: bool) -> u64 {
        self.edit_seq += 1;
        self.pending.push(LocalEdit {
            seq: self.edit_seq,
            kind,
            settled,
        });
        self.edit_seq
    }

    /// Drop edits the store already reflects. An edit is only dropped when
    /// every earlier edit on the same target is dropped too, so replaying
    /// what remains in order never lets an older value win.
    fn prune_settled(&mut self, is_settled: impl Fn(&LocalEdit) -> bool) {
        let mut kept_targets: HashSet<(String, Option<usize>)> = HashSet::new();
        self.pending.retain(|edit| {
            let (task_id, slot) = edit.target();
            let target = (task_id.to_string(), slot);
            if is_settled(edit) && !kept_targets.contains(&target) {
                false
            } else {
                kept_targets.insert(target);
                true
            }
        });
    }
}

/// Counts a fetch as in flight until dropped.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handle to a detached completion write. Dropping it does not cancel the
/// write.
#[derive(Debug)]
pub struct PendingWrite {
    handle: JoinHandle<Result<CompletionRecord>>,
}

impl PendingWrite {
    /// Wait for the write to finish.
    pub async fn wait(self) -> Result<CompletionRecord> {
        self.handle.await.map_err(|e| {
            TrackerError::new(ErrorCode::WriteFailed, "Completion write task aborted")
                .with_cause(e.to_string())
        })?
    }
}

/// Drives the fetch/toggle/persist cycle against a [`ChoreStore`].
pub struct Reconciler<S> {
    store: Arc<S>,
    state: Arc<RwLock<TrackerState>>,
    events: broadcast::Sender<TrackerEvent>,
    fetch_seq: Arc<AtomicU64>,
    /// Incremented under the state lock, so a holder of the lock that reads
    /// zero knows no fetch can still need settled edits.
    fetches_in_flight: Arc<AtomicUsize>,
    timeout: Duration,
    tie_break: TieBreak,
    rollback_on_write_failure: bool,
    clock: Clock,
}

impl<S> Clone for Reconciler<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            state: self.state.clone(),
            events: self.events.clone(),
            fetch_seq: self.fetch_seq.clone(),
            fetches_in_flight: self.fetches_in_flight.clone(),
            timeout: self.timeout,
            tie_break: self.tie_break,
            rollback_on_write_failure: self.rollback_on_write_failure,
            clock: self.clock.clone(),
        }
    }
}

impl<S: ChoreStore + 'static> Reconciler<S> {
    pub fn new(store: Arc<S>, config: &TrackerConfig) -> Self {
        Self::with_clock(store, config, Arc::new(Utc::now))
    }

    pub fn with_clock(store: Arc<S>, config: &TrackerConfig, clock: Clock) -> Self {
        let grid = config.grid(clock());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            state: Arc::new(RwLock::new(TrackerState::new(grid))),
            events,
            fetch_seq: Arc::new(AtomicU64::new(0)),
            fetches_in_flight: Arc::new(AtomicUsize::new(0)),
            timeout: config.remote_timeout(),
            tie_break: config.tie_break,
            rollback_on_write_failure: config.rollback_on_write_failure,
            clock,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn grid(&self) -> WeekGrid {
        self.state.read().await.grid
    }

    /// The currently published matrix.
    pub async fn matrix(&self) -> Option<CompletionMatrix> {
        self.state.read().await.matrix.clone()
    }

    pub async fn users(&self) -> Vec<User> {
        self.state.read().await.users.clone()
    }

    /// Render model of the published matrix.
    pub async fn view(&self) -> Option<GridView> {
        let state = self.state.read().await;
        let matrix = state.matrix.as_ref()?;
        Some(grid_view(matrix, &state.users, &state.grid, (self.clock)()))
    }

    /// Fetch chores, records and users, rebuild the matrix and publish it.
    ///
    /// On failure the published matrix is left untouched.
    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        let seq = self.fetch_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let (settled, _in_flight) = {
            let state = self.state.write().await;
            self.fetches_in_flight.fetch_add(1, Ordering::SeqCst);
            let in_flight = InFlight(self.fetches_in_flight.clone());
            let settled: HashSet<u64> = state
                .pending
                .iter()
                .filter(|e| e.settled)
                .map(|e| e.seq)
                .collect();
            (settled, in_flight)
        };
        debug!(seq, "fetching chores");

        let filter = RecordFilter::all();
        let fetched = tokio::try_join!(
            self.fetch_call("listing chores", self.store.list_tasks()),
            self.fetch_call("listing completions", self.store.list_completion_records(&filter)),
            self.fetch_call("listing users", self.store.list_users()),
        );
        let (tasks, records, users) = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(seq, error = %e, "fetch failed, keeping published matrix");
                return Err(e);
            }
        };

        let snapshot = {
            let mut state = self.state.write().await;
            if seq < state.applied_fetch {
                info!(seq, applied = state.applied_fetch, "discarding stale fetch");
                return Ok(RefreshOutcome::Stale { seq });
            }
            let (mut matrix, stats) = build_matrix(&tasks, &records, &state.grid, self.tie_break);
            state.prune_settled(|e| settled.contains(&e.seq));
            for edit in &state.pending {
                edit.replay(&mut matrix);
            }
            state.matrix = Some(matrix.clone());
            state.users = users;
            state.applied_fetch = seq;
            (matrix, stats)
        };

        let (matrix, stats) = snapshot;
        info!(seq, rows = matrix.rows.len(), applied = stats.applied, "published matrix");
        self.publish(matrix);
        Ok(RefreshOutcome::Applied { seq, stats })
    }

    /// Toggle a slot for `user` and persist it in the background.
    ///
    /// The published matrix reflects the toggle when this returns; the
    /// returned handle may be dropped.
    pub async fn toggle(&self, task_id: &str, week_index: usize, user: &str) -> Result<PendingWrite> {
        let now = (self.clock)();
        let (seq, outcome, snapshot) = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            let matrix = state
                .matrix
                .as_mut()
                .ok_or_else(|| tracker_err!(TaskNotFound, "No chore with id {}", task_id))?;
            let outcome = matrix.toggle(task_id, week_index, user, now)?;
            let snapshot = matrix.clone();
            let seq = state.push_edit(
                EditKind::Slot {
                    task_id: task_id.to_string(),
                    week_index,
                    value: outcome.current.clone(),
                },
                false,
            );
            (seq, outcome, snapshot)
        };
        let year = snapshot.year;
        debug!(task = %task_id, week_index, marked = outcome.marked(), "optimistic toggle");
        self.publish(snapshot);

        let new = NewCompletion {
            task_id: task_id.to_string(),
            user_id: user.to_string(),
            week: week_index as i32 + 1,
            year,
            percentage_done: outcome.percentage_done(),
            timestamp: now,
        };
        let this = self.clone();
        let handle = tokio::spawn(async move { this.persist_completion(seq, outcome, new).await });
        Ok(PendingWrite { handle })
    }

    async fn persist_completion(
        &self,
        seq: u64,
        outcome: ToggleOutcome,
        new: NewCompletion,
    ) -> Result<CompletionRecord> {
        let result = self
            .write_call("saving completion", self.store.create_completion_record(new))
            .await;

        let mut guard = self.state.write().await;
        let state = &mut *guard;
        if let Some(edit) = state.pending.iter_mut().find(|e| e.seq == seq) {
            edit.settled = true;
        }
        if self.fetches_in_flight.load(Ordering::SeqCst) == 0 {
            state.prune_settled(|e| e.settled);
        }

        match result {
            Ok(record) => {
                drop(guard);
                debug!(record = %record.id, task = %outcome.task_id, "completion saved");
                let _ = self.events.send(TrackerEvent::WriteSucceeded {
                    task_id: outcome.task_id.clone(),
                    week_index: outcome.week_index,
                    record_id: record.id.clone(),
                });
                Ok(record)
            }
            Err(error) => {
                let mut rolled_back = None;
                if self.rollback_on_write_failure {
                    if let Some(matrix) = state.matrix.as_mut() {
                        let still_ours = matrix
                            .row(&outcome.task_id)
                            .and_then(|r| r.slots.get(outcome.week_index))
                            .map_or(false, |slot| *slot == outcome.current);
                        if still_ours
                            && matrix
                                .set_slot(&outcome.task_id, outcome.week_index, outcome.previous.clone())
                                .is_ok()
                        {
                            rolled_back = Some(matrix.clone());
                        }
                    }
                    state.pending.retain(|e| e.seq != seq);
                }
                drop(guard);

                warn!(
                    task = %outcome.task_id,
                    week_index = outcome.week_index,
                    rolled_back = rolled_back.is_some(),
                    error = %error,
                    "completion write failed"
                );
                let was_rolled_back = rolled_back.is_some();
                if let Some(matrix) = rolled_back {
                    self.publish(matrix);
                }
                let _ = self.events.send(TrackerEvent::WriteFailed {
                    task_id: outcome.task_id.clone(),
                    week_index: outcome.week_index,
                    error: error.clone(),
                    rolled_back: was_rolled_back,
                });
                Err(error)
            }
        }
    }

    /// Validate and create a chore, then show it immediately as an empty row.
    pub async fn create_task(&self, title: &str, recurrence: Option<Recurrence>) -> Result<Task> {
        let new = NewTask::validate(title, recurrence)?;
        let task = match self.write_call("creating chore", self.store.create_task(new)).await {
            Ok(task) => task,
            Err(e) => {
                warn!(title, error = %e, "chore creation failed");
                return Err(e);
            }
        };

        let snapshot = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            state.push_edit(EditKind::InsertTask(task.clone()), true);
            state.matrix.as_mut().map(|matrix| {
                matrix.insert_task(&task);
                matrix.clone()
            })
        };
        info!(task = %task.id, title = %task.title, "chore created");
        if let Some(matrix) = snapshot {
            self.publish(matrix);
        }
        Ok(task)
    }

    /// Every chore with who did it last.
    pub async fn chore_summaries(&self) -> Result<Vec<ChoreSummary>> {
        let tasks = self.fetch_call("listing chores", self.store.list_tasks()).await?;
        let mut summaries = Vec::with_capacity(tasks.len());
        for task in tasks {
            let latest = self.latest_completion(&task.id).await?;
            summaries.push(ChoreSummary {
                last_done_at: latest.as_ref().map(|r| r.created_at),
                last_done_by: latest.map(|r| r.user_id),
                task,
            });
        }
        Ok(summaries)
    }

    /// Newest mark on `task_id` that no later undo withdrew.
    async fn latest_completion(&self, task_id: &str) -> Result<Option<CompletionRecord>> {
        let filter = RecordFilter::latest_for(task_id);
        let latest = self
            .fetch_call("fetching latest completion", self.store.list_completion_records(&filter))
            .await?;
        match latest.into_iter().next() {
            Some(record) if record.is_unmark() => {
                let filter = RecordFilter {
                    task_id: Some(task_id.to_string()),
                    order: RecordOrder::Descending,
                    limit: None,
                };
                let history = self
                    .fetch_call("fetching completions", self.store.list_completion_records(&filter))
                    .await?;
                let grid = self.grid().await;
                Ok(standing_mark(history, &grid))
            }
            other => Ok(other),
        }
    }

    fn publish(&self, matrix: CompletionMatrix) {
        // No subscribers is fine; the state remains readable.
        let _ = self.events.send(TrackerEvent::MatrixPublished { matrix });
    }

    async fn fetch_call<T, F>(&self, context: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(TrackerError::fetch(context, e)),
            Err(_) => Err(tracker_err!(
                FetchTimeout,
                "{} timed out after {:?}",
                context,
                self.timeout
            )),
        }
    }

    async fn write_call<T, F>(&self, context: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(TrackerError::write(context, e)),
            Err(_) => Err(tracker_err!(
                WriteTimeout,
                "{} timed out after {:?}",
                context,
                self.timeout
            )),
        }
    }
}

/// Walk records newest first; the first fact seen for a week decides it, and
/// the first week decided by a mark yields the answer.
fn standing_mark(newest_first: Vec<CompletionRecord>, grid: &WeekGrid) -> Option<CompletionRecord> {
    let mut decided: HashSet<(i32, i32)> = HashSet::new();
    for record in newest_first {
        let week = match (record.week, record.year) {
            (Some(week), Some(year)) => (year, week),
            (Some(week), None) => (grid.year, week),
            (None, _) => (grid.year, grid.week_of(record.created_at)),
        };
        if !decided.insert(week) {
            continue;
        }
        if !record.is_unmark() {
            return Some(record);
        }
    }
    None
}
