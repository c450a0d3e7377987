//! crates/iqra_core/src/recurrence.rs
//!
//! Expands a weekly recurrence definition into concrete occurrence
//! timestamps. All arithmetic is naive wall-clock; there is no timezone
//! normalization, so a DST transition can shift apparent times by an hour.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};

use crate::domain::{DayOfWeek, RecurrencePattern, TimeOfDay};

/// Number of recurrence periods a schedule is expanded across at creation
/// time. Fixed, not configurable per call.
pub const HORIZON_WEEKS: u32 = 12;

/// Expands a recurrence definition into occurrence timestamps.
///
/// For each period in `[0, horizon_weeks)` and each weekday in ascending
/// index order, the occurrence lands on that weekday of the calendar week
/// containing `start_date`, shifted by the period stride, with the weekday's
/// slot overlaid as its time of day.
///
/// Output is ordered period-then-weekday, which is not strictly
/// chronological relative to `start_date`: a weekday earlier in the week
/// than the start's weekday yields a period-0 occurrence dated before
/// `start_date`. Such occurrences are kept, not skipped.
///
/// A weekday without a slot produces no occurrence; validated definitions
/// never hit that case.
pub fn expand(
    start_date: NaiveDate,
    days_of_week: &BTreeSet<DayOfWeek>,
    time_slots: &BTreeMap<DayOfWeek, TimeOfDay>,
    horizon_weeks: u32,
    pattern: RecurrencePattern,
) -> Vec<NaiveDateTime> {
    let start_weekday = i64::from(start_date.weekday().num_days_from_sunday());
    let stride_days = i64::from(pattern.week_step()) * 7;

    let mut occurrences = Vec::with_capacity(horizon_weeks as usize * days_of_week.len());
    for period in 0..i64::from(horizon_weeks) {
        for &day in days_of_week {
            let Some(slot) = time_slots.get(&day) else {
                continue;
            };
            let offset = i64::from(day) - start_weekday + period * stride_days;
            let date = start_date + Duration::days(offset);
            let Some(at) = date.and_hms_opt(slot.hour().into(), slot.minute().into(), 0) else {
                continue;
            };
            occurrences.push(at);
        }
    }
    occurrences
}
