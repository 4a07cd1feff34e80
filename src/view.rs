//! Render model for the week grid.
//!
//! The desktop frontend receives [`GridView`] as JSON; the CLI prints it with
//! [`render_text`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write;

use crate::matrix::CompletionMatrix;
use crate::model::{Recurrence, User};
use crate::week::WeekGrid;

/// Color for owners missing from the user list.
pub const UNKNOWN_OWNER_COLOR: &str = "#9E9E9E";

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GridView {
    pub year: i32,
    /// Monday label per week column.
    pub headers: Vec<String>,
    /// 1-based week to highlight.
    pub current_week: Option<i32>,
    pub rows: Vec<RowView>,
    pub legend: Vec<LegendEntry>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RowView {
    pub task_id: String,
    pub name: String,
    pub recurrence: Option<Recurrence>,
    pub cells: Vec<CellView>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CellView {
    pub week: i32,
    pub owner_id: Option<String>,
    pub owner_name: Option<String>,
    pub color: Option<String>,
    pub current: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LegendEntry {
    pub user_id: String,
    pub name: String,
    pub color: String,
    pub completed: usize,
}

/// Join the matrix with user display data.
pub fn grid_view(matrix: &CompletionMatrix, users: &[User], grid: &WeekGrid, now: DateTime<Utc>) -> GridView {
    let current_week = if grid.year == matrix.year {
        grid.current_week(now)
    } else {
        None
    };

    let rows = matrix
        .rows
        .iter()
        .map(|row| RowView {
            task_id: row.id.clone(),
            name: row.name.clone(),
            recurrence: row.recurrence,
            cells: row
                .slots
                .iter()
                .enumerate()
                .map(|(i, slot)| {
                    let week = i as i32 + 1;
                    let owner = slot.as_ref().map(|s| s.owner.as_str());
                    let user = owner.and_then(|id| users.iter().find(|u| u.id == id));
                    CellView {
                        week,
                        owner_id: owner.map(String::from),
                        owner_name: match (owner, user) {
                            (_, Some(u)) => Some(u.name.clone()),
                            (Some(id), None) => Some(id.to_string()),
                            (None, None) => None,
                        },
                        color: owner.map(|_| {
                            user.map_or(UNKNOWN_OWNER_COLOR.to_string(), |u| u.color.clone())
                        }),
                        current: current_week == Some(week),
                    }
                })
                .collect(),
        })
        .collect();

    let legend = users
        .iter()
        .map(|u| LegendEntry {
            user_id: u.id.clone(),
            name: u.name.clone(),
            color: u.color.clone(),
            completed: matrix.completed_count(&u.id),
        })
        .collect();

    GridView {
        year: matrix.year,
        headers: WeekGrid::new(matrix.year, grid.offset).labels(),
        current_week,
        rows,
        legend,
    }
}

fn initial(name: &str) -> char {
    name.chars()
        .find(|c| c.is_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .unwrap_or('?')
}

/// Plain-text grid: one line per chore, one column per week.
///
/// Marked cells show the owner's initial; the current week's header carries
/// a `*`.
pub fn render_text(view: &GridView) -> String {
    let name_width = view
        .rows
        .iter()
        .map(|r| r.name.chars().count())
        .max()
        .unwrap_or(0)
        .clamp(5, 24);

    let mut out = String::new();
    let _ = write!(out, "{:<width$}", view.year, width = name_width);
    for week in 1..=view.headers.len() as i32 {
        if view.current_week == Some(week) {
            let _ = write!(out, "{:>3}*", week);
        } else {
            let _ = write!(out, "{:>4}", week);
        }
    }
    out.push('\n');

    for row in &view.rows {
        let name: String = row.name.chars().take(name_width).collect();
        let _ = write!(out, "{:<width$}", name, width = name_width);
        for cell in &row.cells {
            let mark = cell.owner_name.as_deref().map_or('.', initial);
            let _ = write!(out, "{:>4}", mark);
        }
        out.push('\n');
    }

    if !view.legend.is_empty() {
        out.push('\n');
        for entry in &view.legend {
            let _ = writeln!(
                out,
                "{} = {} ({}) x{}",
                initial(&entry.name),
                entry.name,
                entry.color,
                entry.completed
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::Slot;
    use crate::model::Task;
    use crate::week::WEEKS_IN_YEAR;
    use chrono::{FixedOffset, TimeZone};

    fn fixture() -> (CompletionMatrix, Vec<User>, WeekGrid) {
        let mut matrix = CompletionMatrix::from_tasks(
            &[Task {
                id: "1".into(),
                title: "Clean".into(),
                recurrence: Some(Recurrence::Weekly),
            }],
            2025,
        );
        let at = Utc.with_ymd_and_hms(2025, 2, 1, 10, 0, 0).unwrap();
        matrix.set_slot("1", 4, Some(Slot::new("U1", at))).unwrap();
        matrix.set_slot("1", 5, Some(Slot::new("ghost", at))).unwrap();
        let users = vec![
            User {
                id: "U1".into(),
                name: "alice".into(),
                color: "#FF5733".into(),
            },
            User {
                id: "U2".into(),
                name: "Bob".into(),
                color: "#3366FF".into(),
            },
        ];
        (matrix, users, WeekGrid::new(2025, FixedOffset::east_opt(0).unwrap()))
    }

    #[test]
    fn test_view_joins_users() {
        let (matrix, users, grid) = fixture();
        let now = Utc.with_ymd_and_hms(2025, 3, 3, 12, 0, 0).unwrap();
        let view = grid_view(&matrix, &users, &grid, now);

        assert_eq!(view.headers.len(), WEEKS_IN_YEAR);
        assert_eq!(view.current_week, Some(9));
        let cells = &view.rows[0].cells;
        assert_eq!(cells[4].owner_name.as_deref(), Some("alice"));
        assert_eq!(cells[4].color.as_deref(), Some("#FF5733"));
        assert!(cells[8].current);
        assert_eq!(cells[0].color, None);

        assert_eq!(view.legend[0].completed, 1);
        assert_eq!(view.legend[1].completed, 0);
    }

    #[test]
    fn test_unknown_owner_gets_fallback() {
        let (matrix, users, grid) = fixture();
        let view = grid_view(&matrix, &users, &grid, Utc::now());
        let cell = &view.rows[0].cells[5];
        assert_eq!(cell.owner_name.as_deref(), Some("ghost"));
        assert_eq!(cell.color.as_deref(), Some(UNKNOWN_OWNER_COLOR));
    }

    #[test]
    fn test_no_highlight_outside_year() {
        let (matrix, users, grid) = fixture();
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        let view = grid_view(&matrix, &users, &grid, now);
        assert_eq!(view.current_week, None);
        assert!(view.rows[0].cells.iter().all(|c| !c.current));
    }

    #[test]
    fn test_render_text() {
        let (matrix, users, grid) = fixture();
        let now = Utc.with_ymd_and_hms(2025, 3, 3, 12, 0, 0).unwrap();
        let text = render_text(&grid_view(&matrix, &users, &grid, now));
        let lines: Vec<&str> = text.lines().collect();

        assert!(lines[0].starts_with("2025"));
        assert!(lines[0].contains("  9*"));
        assert!(lines[1].starts_with("Clean"));
        assert!(lines[1].contains("   A   G"));
        assert!(text.contains("A = alice (#FF5733) x1"));
        assert!(text.contains("B = Bob (#3366FF) x0"));
    }

    #[test]
    fn test_view_serializes_camel_case() {
        let (matrix, users, grid) = fixture();
        let json = serde_json::to_value(grid_view(&matrix, &users, &grid, Utc::now())).unwrap();
        assert!(json.get("currentWeek").is_some());
        assert!(json["rows"][0]["cells"][4].get("ownerName").is_some());
    }
}
