//! Week index arithmetic for the completion grid.
//!
//! Two week grids coexist here and they are deliberately not the same:
//! - the *day-count* grid numbers weeks by counting days from January 1st
//!   (`week_number_of`), which is how completions are bucketed;
//! - the *Monday* grid starts week 1 on the first Monday on/after January 1st
//!   (`start_date_of_week`), which is only used for column labels.
//!
//! All functions are pure; the reference year and UTC offset are passed in
//! explicitly (see [`WeekGrid`]) instead of being read from the clock.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Utc};

/// Number of week columns in a tracker year.
pub const WEEKS_IN_YEAR: usize = 52;

/// January 1st of `year`. Years outside chrono's range saturate.
fn jan_first(year: i32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or(if year < 0 {
        NaiveDate::MIN
    } else {
        NaiveDate::MAX
    })
}

/// 1-based week number of `date`, counting days from January 1st of
/// `reference_year` and rounding up to whole weeks.
///
/// No clamping: dates before the reference year yield values `<= 0`, and the
/// last day or two of a year yield 53.
pub fn week_number_of(date: NaiveDate, reference_year: i32) -> i32 {
    let day_of_year = date.signed_duration_since(jan_first(reference_year)).num_days() + 1;
    let week = (day_of_year + 6).div_euclid(7);
    week.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// Week number of an instant, taking the calendar date it has at `offset`.
pub fn week_number_of_instant(ts: DateTime<Utc>, offset: FixedOffset, reference_year: i32) -> i32 {
    week_number_of(ts.with_timezone(&offset).date_naive(), reference_year)
}

/// First Monday on or after January 1st of `year`.
pub fn first_monday(year: i32) -> NaiveDate {
    let jan1 = jan_first(year);
    // Sunday counts as 6 days after Monday.
    let day_offset = jan1.weekday().num_days_from_monday() as i64;
    jan1.checked_add_signed(Duration::days((7 - day_offset) % 7))
        .unwrap_or(jan1)
}

/// The Monday that begins week `week` of `year` on the Monday-aligned grid.
pub fn start_date_of_week(week: i32, year: i32) -> Option<NaiveDate> {
    let offset = Duration::try_days((week as i64 - 1) * 7)?;
    first_monday(year).checked_add_signed(offset)
}

/// Short column label for a week, e.g. `Jan 6`.
pub fn week_label(week: i32, year: i32) -> Option<String> {
    start_date_of_week(week, year).map(|d| d.format("%b %-d").to_string())
}

/// 0-based slot index for a week number, if the week is on the grid.
pub fn slot_index(week: i32) -> Option<usize> {
    if (1..=WEEKS_IN_YEAR as i32).contains(&week) {
        Some((week - 1) as usize)
    } else {
        None
    }
}

/// Reference year and UTC offset used to place timestamps on the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekGrid {
    pub year: i32,
    pub offset: FixedOffset,
}

impl WeekGrid {
    pub fn new(year: i32, offset: FixedOffset) -> Self {
        Self { year, offset }
    }

    /// Grid for the year `now` falls in at `offset`.
    pub fn for_instant(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self {
            year: now.with_timezone(&offset).year(),
            offset,
        }
    }

    pub fn week_of(&self, ts: DateTime<Utc>) -> i32 {
        week_number_of_instant(ts, self.offset, self.year)
    }

    /// Week to highlight for `now`; `None` when `now` is outside the grid year.
    pub fn current_week(&self, now: DateTime<Utc>) -> Option<i32> {
        let week = self.week_of(now);
        slot_index(week).map(|_| week)
    }

    /// Header labels for all week columns.
    pub fn labels(&self) -> Vec<String> {
        (1..=WEEKS_IN_YEAR as i32)
            .map(|w| week_label(w, self.year).unwrap_or_default())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Weekday};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_first_days_of_year() {
        assert_eq!(week_number_of(date(2025, 1, 1), 2025), 1);
        assert_eq!(week_number_of(date(2025, 1, 7), 2025), 1);
        assert_eq!(week_number_of(date(2025, 1, 8), 2025), 2);
        assert_eq!(week_number_of(date(2025, 2, 1), 2025), 5);
    }

    #[test]
    fn test_no_clamp_at_year_edges() {
        // 2024 is a leap year: Dec 31 is day 366.
        assert_eq!(week_number_of(date(2024, 12, 30), 2024), 53);
        assert_eq!(week_number_of(date(2024, 12, 31), 2024), 53);
        assert_eq!(week_number_of(date(2023, 12, 31), 2024), 0);
        assert_eq!(week_number_of(date(2023, 12, 25), 2024), 0);
        assert_eq!(week_number_of(date(2023, 12, 24), 2024), -1);
    }

    #[test]
    fn test_monotonic_within_year() {
        let mut d = date(2025, 1, 1);
        let mut last = week_number_of(d, 2025);
        assert_eq!(last, 1);
        while d.year() == 2025 {
            let w = week_number_of(d, 2025);
            assert!(w >= last, "{} went backwards", d);
            last = w;
            d = d.succ_opt().unwrap();
        }
    }

    #[test]
    fn test_instant_uses_offset_date() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 7, 23, 30, 0).unwrap();
        let utc = FixedOffset::east_opt(0).unwrap();
        let cet = FixedOffset::east_opt(3600).unwrap();
        assert_eq!(week_number_of_instant(ts, utc, 2024), 1);
        assert_eq!(week_number_of_instant(ts, cet, 2024), 2);
    }

    #[test]
    fn test_first_monday() {
        assert_eq!(first_monday(2024), date(2024, 1, 1)); // Monday
        assert_eq!(first_monday(2025), date(2025, 1, 6)); // Jan 1 is Wednesday
        assert_eq!(first_monday(2023), date(2023, 1, 2)); // Jan 1 is Sunday
    }

    #[test]
    fn test_start_date_and_label() {
        assert_eq!(start_date_of_week(1, 2024), Some(date(2024, 1, 1)));
        assert_eq!(start_date_of_week(5, 2024), Some(date(2024, 1, 29)));
        assert_eq!(week_label(1, 2025).as_deref(), Some("Jan 6"));
        assert_eq!(week_label(9, 2024).as_deref(), Some("Feb 26"));
    }

    // A Monday on or before every date exists only when January 1st is a
    // Monday. Otherwise the first days of the year precede week 1's Monday,
    // so the general check is a Monday label within six days of the date.
    #[test]
    fn test_week_label_is_a_monday_within_six_days_of_date() {
        for year in [2023, 2024, 2025, 2026] {
            let mut d = date(year, 1, 1);
            while d.year() == year {
                let week = week_number_of(d, year);
                if slot_index(week).is_some() {
                    let start = start_date_of_week(week, year).unwrap();
                    assert_eq!(start.weekday(), Weekday::Mon);
                    let gap = (d - start).num_days().abs();
                    assert!(gap <= 6, "{} -> {} ({} days)", d, start, gap);
                    if first_monday(year) == date(year, 1, 1) {
                        assert!(start <= d);
                    }
                }
                d = d.succ_opt().unwrap();
            }
        }
    }

    #[test]
    fn test_grid_current_week_and_labels() {
        let offset = FixedOffset::east_opt(0).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 3, 3, 12, 0, 0).unwrap();
        let grid = WeekGrid::for_instant(now, offset);
        assert_eq!(grid.year, 2025);
        assert_eq!(grid.current_week(now), Some(9));

        let labels = grid.labels();
        assert_eq!(labels.len(), WEEKS_IN_YEAR);
        assert_eq!(labels[0], "Jan 6");

        let next_year = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
        assert_eq!(grid.current_week(next_year), None);
    }

    #[test]
    fn test_slot_index() {
        assert_eq!(slot_index(1), Some(0));
        assert_eq!(slot_index(52), Some(51));
        assert_eq!(slot_index(0), None);
        assert_eq!(slot_index(53), None);
    }
}
