//! crates/iqra_core/src/projection.rs
//!
//! Projects a heterogeneous collection of calendar entries onto the days of
//! one displayed month, producing the day -> occurrences index the calendar
//! UI renders and answers day-click queries from.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use uuid::Uuid;

use crate::domain::{CalendarEntry, DayOfWeek};

/// Display name used when a calendar entry has no resolvable class name.
pub const UNTITLED_CLASS: &str = "Untitled Class";

/// One occurrence landing on a projected day.
#[derive(Debug, Clone, PartialEq)]
pub struct DayOccurrence {
    /// The owning schedule id for recurring entries, the session id for
    /// single-date entries.
    pub source_id: Uuid,
    pub name: String,
    pub starts_at: NaiveDateTime,
}

/// Builds the day -> occurrences map for the given month.
///
/// Recurring entries synthesize an occurrence on every day of the month
/// whose weekday holds a slot; single-date entries contribute their own
/// calendar day when it falls inside the month. Occurrences for a day are
/// kept in the order the entries produced them. An invalid month yields an
/// empty map.
pub fn project_month(
    entries: &[CalendarEntry],
    year: i32,
    month: u32,
) -> BTreeMap<NaiveDate, Vec<DayOccurrence>> {
    let mut by_day: BTreeMap<NaiveDate, Vec<DayOccurrence>> = BTreeMap::new();

    let Some(first) = NaiveDate::from_ymd_opt(year, month, 1) else {
        return by_day;
    };
    let next_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    let Some(last) = next_first.and_then(|d| d.pred_opt()) else {
        return by_day;
    };

    for entry in entries {
        match entry {
            CalendarEntry::Recurring {
                schedule_id,
                name,
                days_of_week,
                time_slots,
            } => {
                let mut day = first;
                while day <= last {
                    let weekday = day.weekday().num_days_from_sunday() as DayOfWeek;
                    if days_of_week.contains(&weekday) {
                        if let Some(slot) = time_slots.get(&weekday) {
                            if let Some(at) =
                                day.and_hms_opt(slot.hour().into(), slot.minute().into(), 0)
                            {
                                by_day.entry(day).or_default().push(DayOccurrence {
                                    source_id: *schedule_id,
                                    name: display_name(name),
                                    starts_at: at,
                                });
                            }
                        }
                    }
                    match day.succ_opt() {
                        Some(next) => day = next,
                        None => break,
                    }
                }
            }
            CalendarEntry::SingleDate {
                session_id,
                name,
                starts_at,
            } => {
                let at = starts_at.naive_utc();
                let day = at.date();
                if day >= first && day <= last {
                    by_day.entry(day).or_default().push(DayOccurrence {
                        source_id: *session_id,
                        name: display_name(name),
                        starts_at: at,
                    });
                }
            }
        }
    }

    by_day
}

fn display_name(name: &Option<String>) -> String {
    name.clone().unwrap_or_else(|| UNTITLED_CLASS.to_string())
}
