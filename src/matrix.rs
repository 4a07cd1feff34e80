//! Completion matrix: chore x week -> who did it.
//!
//! The matrix is rebuilt wholesale from completion records on every fetch
//! and mutated in place by local toggles. Each (chore, week) slot holds at
//! most one owner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::Result;
use crate::model::{CompletionRecord, Recurrence, Task};
use crate::tracker_err;
use crate::week::{slot_index, WeekGrid, WEEKS_IN_YEAR};

/// A filled slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub owner: String,
    /// Creation time of the record (or local toggle) that set this slot.
    pub recorded_at: Option<DateTime<Utc>>,
}

impl Slot {
    pub fn new(owner: impl Into<String>, recorded_at: DateTime<Utc>) -> Self {
        Self {
            owner: owner.into(),
            recorded_at: Some(recorded_at),
        }
    }
}

/// One chore row of the grid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskRow {
    pub id: String,
    pub name: String,
    pub recurrence: Option<Recurrence>,
    /// Always `WEEKS_IN_YEAR` long.
    pub slots: Vec<Option<Slot>>,
}

impl TaskRow {
    pub fn empty(id: impl Into<String>, name: impl Into<String>, recurrence: Option<Recurrence>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            recurrence,
            slots: vec![None; WEEKS_IN_YEAR],
        }
    }

    pub fn from_task(task: &Task) -> Self {
        Self::empty(&task.id, &task.title, task.recurrence)
    }

    /// Owner of the slot at a 0-based week index.
    pub fn owner(&self, week_index: usize) -> Option<&str> {
        self.slots
            .get(week_index)
            .and_then(|s| s.as_ref())
            .map(|s| s.owner.as_str())
    }
}

/// How competing records for the same slot are resolved.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// The most recent `created_at` wins; equal timestamps fall back to
    /// input order.
    #[default]
    LatestTimestamp,
    /// The last record processed wins, whatever its timestamp.
    InputOrder,
}

/// Result of a local toggle.
#[derive(Debug, Clone, PartialEq)]
pub struct ToggleOutcome {
    pub task_id: String,
    pub week_index: usize,
    pub previous: Option<Slot>,
    pub current: Option<Slot>,
}

impl ToggleOutcome {
    /// True when the toggle marked the slot, false when it cleared it.
    pub fn marked(&self) -> bool {
        self.current.is_some()
    }

    /// Percentage to persist for this toggle.
    pub fn percentage_done(&self) -> u8 {
        if self.marked() {
            100
        } else {
            0
        }
    }
}

/// Counters from a build pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub applied: usize,
    /// Records outside weeks 1..=52 of the grid year.
    pub skipped: usize,
    /// Records older than what the slot already holds.
    pub superseded: usize,
    /// Rows created for records naming an unknown chore.
    pub synthesized: usize,
}

/// The grid for one year.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompletionMatrix {
    pub year: i32,
    pub rows: Vec<TaskRow>,
}

/// Fold completion records into a fresh matrix for `tasks`.
pub fn build_matrix(
    tasks: &[Task],
    records: &[CompletionRecord],
    grid: &WeekGrid,
    tie_break: TieBreak,
) -> (CompletionMatrix, BuildStats) {
    let mut matrix = CompletionMatrix::from_tasks(tasks, grid.year);
    let mut stats = BuildStats::default();
    // Latest fact per (row, slot), including un-marks that left the slot empty.
    let mut latest: HashMap<(usize, usize), DateTime<Utc>> = HashMap::new();

    for record in records {
        let Some(index) = record_week(record, grid).and_then(slot_index) else {
            warn!(
                record = %record.id,
                task = %record.task_id,
                created_at = %record.created_at,
                year = grid.year,
                "completion outside the grid year, skipped"
            );
            stats.skipped += 1;
            continue;
        };

        let row = match matrix.position(&record.task_id) {
            Some(row) => row,
            None => {
                let name = record
                    .task_title
                    .clone()
                    .unwrap_or_else(|| record.task_id.clone());
                debug!(task = %record.task_id, %name, "synthesizing row for unknown chore");
                matrix.rows.push(TaskRow::empty(&record.task_id, name, None));
                stats.synthesized += 1;
                matrix.rows.len() - 1
            }
        };

        if tie_break == TieBreak::LatestTimestamp {
            if let Some(seen) = latest.get(&(row, index)) {
                if record.created_at < *seen {
                    stats.superseded += 1;
                    continue;
                }
            }
            latest.insert((row, index), record.created_at);
        }

        matrix.rows[row].slots[index] = if record.is_unmark() {
            None
        } else {
            Some(Slot::new(&record.user_id, record.created_at))
        };
        stats.applied += 1;
    }

    debug!(
        rows = matrix.rows.len(),
        applied = stats.applied,
        skipped = stats.skipped,
        superseded = stats.superseded,
        "built completion matrix"
    );
    (matrix, stats)
}

/// Week a record belongs to on `grid`. Explicit placement wins over the
/// creation time; placement in another year never lands on this grid.
fn record_week(record: &CompletionRecord, grid: &WeekGrid) -> Option<i32> {
    match (record.week, record.year) {
        (Some(week), Some(year)) if year == grid.year => Some(week),
        (Some(_), Some(_)) => None,
        (Some(week), None) => Some(week),
        (None, _) => Some(grid.week_of(record.created_at)),
    }
}

impl CompletionMatrix {
    pub fn new(year: i32) -> Self {
        Self {
            year,
            rows: Vec::new(),
        }
    }

    /// Matrix with one empty row per chore.
    pub fn from_tasks(tasks: &[Task], year: i32) -> Self {
        Self {
            year,
            rows: tasks.iter().map(TaskRow::from_task).collect(),
        }
    }

    fn position(&self, task_id: &str) -> Option<usize> {
        self.rows.iter().position(|r| r.id == task_id)
    }

    pub fn row(&self, task_id: &str) -> Option<&TaskRow> {
        self.rows.iter().find(|r| r.id == task_id)
    }

    pub fn owner(&self, task_id: &str, week_index: usize) -> Option<&str> {
        self.row(task_id).and_then(|r| r.owner(week_index))
    }

    /// Append an all-empty row for a new chore. Returns false if present.
    pub fn insert_task(&mut self, task: &Task) -> bool {
        if self.position(&task.id).is_some() {
            return false;
        }
        self.rows.push(TaskRow::from_task(task));
        true
    }

    /// Toggle a slot for `user`: their own mark is cleared, anything else is
    /// replaced by their mark.
    pub fn toggle(
        &mut self,
        task_id: &str,
        week_index: usize,
        user: &str,
        at: DateTime<Utc>,
    ) -> Result<ToggleOutcome> {
        check_week_index(week_index)?;
        let row = self
            .rows
            .iter_mut()
            .find(|r| r.id == task_id)
            .ok_or_else(|| tracker_err!(TaskNotFound, "No chore with id {}", task_id))?;

        let slot = &mut row.slots[week_index];
        let previous = slot.clone();
        let current = match &previous {
            Some(s) if s.owner == user => None,
            _ => Some(Slot::new(user, at)),
        };
        *slot = current.clone();

        Ok(ToggleOutcome {
            task_id: task_id.to_string(),
            week_index,
            previous,
            current,
        })
    }

    /// Overwrite a slot, returning what it held.
    pub fn set_slot(&mut self, task_id: &str, week_index: usize, value: Option<Slot>) -> Result<Option<Slot>> {
        check_week_index(week_index)?;
        let row = self
            .rows
            .iter_mut()
            .find(|r| r.id == task_id)
            .ok_or_else(|| tracker_err!(TaskNotFound, "No chore with id {}", task_id))?;
        Ok(std::mem::replace(&mut row.slots[week_index], value))
    }

    /// Number of slots `user` holds across all chores.
    pub fn completed_count(&self, user: &str) -> usize {
        self.rows
            .iter()
            .flat_map(|r| r.slots.iter())
            .filter(|s| s.as_ref().map_or(false, |s| s.owner == user))
            .count()
    }
}

fn check_week_index(week_index: usize) -> Result<()> {
    if week_index >= WEEKS_IN_YEAR {
        return Err(tracker_err!(
            WeekOutOfRange,
            "Week index {} is outside 0..{}",
            week_index,
            WEEKS_IN_YEAR
        ));
    }
    Ok(())
}
