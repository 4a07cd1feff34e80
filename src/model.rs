//! Chores, completion records and users as stored by the document store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TrackerError;
use crate::tracker_err;

/// Declared cadence of a chore. Informational only; the grid is weekly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Recurrence {
    Daily,
    Weekly,
    Monthly,
}

impl Recurrence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recurrence::Daily => "daily",
            Recurrence::Weekly => "weekly",
            Recurrence::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Recurrence {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Recurrence::Daily),
            "weekly" => Ok(Recurrence::Weekly),
            "monthly" => Ok(Recurrence::Monthly),
            "" => Err(tracker_err!(RecurrenceMissing, "Recurrence is not set")),
            other => Err(tracker_err!(
                RecurrenceInvalid,
                "Invalid recurrence value: {}",
                other
            )),
        }
    }
}

/// A recurring chore definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub recurrence: Option<Recurrence>,
}

/// Immutable fact: a user did (or undid) a chore at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRecord {
    pub id: String,
    pub task_id: String,
    /// Title of the chore as embedded by the store, used when the chore
    /// itself is not in the task list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_title: Option<String>,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage_done: Option<u8>,
    /// Explicit 1-based week written by grid toggles. Older records carry
    /// none and are placed by `created_at`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub week: Option<i32>,
    /// Grid year `week` refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl CompletionRecord {
    /// `percentage_done == 0` records an un-mark.
    pub fn is_unmark(&self) -> bool {
        self.percentage_done == Some(0)
    }
}

/// A household member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    /// Display color, e.g. `#FF5733`.
    pub color: String,
}

/// Payload for creating a chore.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub title: String,
    pub recurrence: Recurrence,
}

impl NewTask {
    /// Validate raw form input. Runs before any remote call.
    pub fn validate(title: &str, recurrence: Option<Recurrence>) -> crate::error::Result<Self> {
        let title = title.trim();
        if title.is_empty() {
            return Err(tracker_err!(TitleMissing, "Please provide a chore title"));
        }
        let recurrence = recurrence
            .ok_or_else(|| tracker_err!(RecurrenceMissing, "Please choose a recurrence"))?;
        Ok(Self {
            title: title.to_string(),
            recurrence,
        })
    }
}

/// Payload for recording a completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewCompletion {
    pub task_id: String,
    pub user_id: String,
    pub week: i32,
    pub year: i32,
    pub percentage_done: u8,
    pub timestamp: DateTime<Utc>,
}

/// Sort direction on record creation time.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrder {
    #[default]
    Ascending,
    Descending,
}

/// Query over completion records: equality on chore, order, limit.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecordFilter {
    pub task_id: Option<String>,
    pub order: RecordOrder,
    pub limit: Option<usize>,
}

impl RecordFilter {
    /// All records, oldest first.
    pub fn all() -> Self {
        Self::default()
    }

    /// The latest record for one chore.
    pub fn latest_for(task_id: impl Into<String>) -> Self {
        Self {
            task_id: Some(task_id.into()),
            order: RecordOrder::Descending,
            limit: Some(1),
        }
    }

    /// Apply the filter to an in-memory record list.
    pub fn apply(&self, records: &[CompletionRecord]) -> Vec<CompletionRecord> {
        let mut matched: Vec<CompletionRecord> = records
            .iter()
            .filter(|r| self.task_id.as_ref().map_or(true, |id| &r.task_id == id))
            .cloned()
            .collect();
        // Stable sort keeps insertion order between equal timestamps.
        matched.sort_by_key(|r| r.created_at);
        if self.order == RecordOrder::Descending {
            matched.reverse();
        }
        if let Some(limit) = self.limit {
            matched.truncate(limit);
        }
        matched
    }
}

/// One line of the chores list: the chore and who last did it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChoreSummary {
    pub task: Task,
    pub last_done_at: Option<DateTime<Utc>>,
    pub last_done_by: Option<String>,
}
