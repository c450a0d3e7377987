//! crates/iqra_core/src/domain.rs
//!
//! Defines the pure, core data structures for the scheduling platform.
//! These structs are independent of any database or serialization format;
//! the one exception is `TimeOfDay`, which round-trips through its "HH:MM"
//! string form because that is the shape stored in the slot-map column.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error returned when a stored or user-supplied value string does not match
/// any known variant.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct InvalidValue(pub String);

/// Weekday index, Sunday = 0 through Saturday = 6.
pub type DayOfWeek = u8;

//=========================================================================================
// Users and Roles
//=========================================================================================

/// The access role carried by a user's claim. This is a closed set; any
/// other claim string fails to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = InvalidValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Role::Student),
            "teacher" => Ok(Role::Teacher),
            "admin" => Ok(Role::Admin),
            other => Err(InvalidValue(format!("unknown role '{}'", other))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Represents a user - used throughout app
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: Option<String>,
    pub role: Role,
}

// Only used internally for login/signup - contains sensitive data
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user_id: Uuid,
    pub email: String,
    pub hashed_password: String,
    pub role: Role,
}

// Represents a browser login session (auth cookie)
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub id: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

//=========================================================================================
// Classes
//=========================================================================================

/// A reading class owned by one teacher, with a student enrollment list.
#[derive(Debug, Clone)]
pub struct Class {
    pub id: Uuid,
    pub name: String,
    pub teacher_id: Uuid,
    pub student_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

//=========================================================================================
// Time of day
//=========================================================================================

/// A wall-clock time of day with minute precision, parsed from and rendered
/// as "HH:MM". Seconds do not exist in this representation, so occurrence
/// timestamps built from a slot always have a zero seconds component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    pub fn new(hour: u8, minute: u8) -> Result<Self, InvalidValue> {
        if hour > 23 || minute > 59 {
            return Err(InvalidValue(format!(
                "time of day {:02}:{:02} out of range",
                hour, minute
            )));
        }
        Ok(Self { hour, minute })
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }
}

impl FromStr for TimeOfDay {
    type Err = InvalidValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (h, m) = s
            .split_once(':')
            .ok_or_else(|| InvalidValue(format!("invalid time of day '{}'", s)))?;
        let hour = h
            .parse::<u8>()
            .map_err(|_| InvalidValue(format!("invalid time of day '{}'", s)))?;
        let minute = m
            .parse::<u8>()
            .map_err(|_| InvalidValue(format!("invalid time of day '{}'", s)))?;
        TimeOfDay::new(hour, minute)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = InvalidValue;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(t: TimeOfDay) -> Self {
        t.to_string()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

//=========================================================================================
// Schedules
//=========================================================================================

/// How a schedule steps between expansion periods. Monthly recurrence from
/// the legacy data model is rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecurrencePattern {
    Weekly,
    Biweekly,
}

impl RecurrencePattern {
    /// Stride between consecutive expansion periods, in weeks.
    pub fn week_step(&self) -> u32 {
        match self {
            RecurrencePattern::Weekly => 1,
            RecurrencePattern::Biweekly => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecurrencePattern::Weekly => "weekly",
            RecurrencePattern::Biweekly => "biweekly",
        }
    }
}

impl FromStr for RecurrencePattern {
    type Err = InvalidValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weekly" => Ok(RecurrencePattern::Weekly),
            "biweekly" => Ok(RecurrencePattern::Biweekly),
            "monthly" => Err(InvalidValue(
                "monthly recurrence is not supported".to_string(),
            )),
            other => Err(InvalidValue(format!(
                "unknown recurrence pattern '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for RecurrencePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recurrence definition: weekday + time pairs owned by a teacher for one
/// class. Sessions are materialized from it once, at creation time.
#[derive(Debug, Clone)]
pub struct Schedule {
    pub id: Uuid,
    pub class_id: Uuid,
    pub teacher_id: Uuid,
    pub start_date: NaiveDate,
    pub recurrence_pattern: RecurrencePattern,
    pub days_of_week: BTreeSet<DayOfWeek>,
    pub time_slots: BTreeMap<DayOfWeek, TimeOfDay>,
    pub duration_minutes: u32,
    /// Session ids produced by the last expansion, in expansion order.
    /// Empty until creation back-fills it.
    pub session_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input to schedule creation, before the store assigns an id and the class
/// lookup denormalizes the teacher.
#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub class_id: Uuid,
    pub start_date: NaiveDate,
    pub recurrence_pattern: RecurrencePattern,
    pub days_of_week: BTreeSet<DayOfWeek>,
    pub time_slots: BTreeMap<DayOfWeek, TimeOfDay>,
    pub duration_minutes: u32,
}

/// A partial schedule update; `None` fields are left untouched. Merging
/// never re-runs expansion.
#[derive(Debug, Clone, Default)]
pub struct ScheduleUpdate {
    pub start_date: Option<NaiveDate>,
    pub recurrence_pattern: Option<RecurrencePattern>,
    pub days_of_week: Option<BTreeSet<DayOfWeek>>,
    pub time_slots: Option<BTreeMap<DayOfWeek, TimeOfDay>>,
    pub duration_minutes: Option<u32>,
}

/// The outcome of a successful schedule creation.
#[derive(Debug, Clone)]
pub struct CreatedSchedule {
    pub schedule_id: Uuid,
    pub session_ids: Vec<Uuid>,
}

//=========================================================================================
// Sessions
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Scheduled,
    Active,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
        }
    }
}

impl FromStr for SessionStatus {
    type Err = InvalidValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(SessionStatus::Scheduled),
            "active" => Ok(SessionStatus::Active),
            "completed" => Ok(SessionStatus::Completed),
            other => Err(InvalidValue(format!("unknown session status '{}'", other))),
        }
    }
}

/// One concrete, dated occurrence. Sessions materialized from a schedule
/// carry its id; one-off sessions have none.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub schedule_id: Option<Uuid>,
    pub class_id: Uuid,
    pub teacher_id: Uuid,
    pub starts_at: DateTime<Utc>,
    /// Copied from the schedule at expansion time; not re-derived if the
    /// schedule's duration changes later.
    pub duration_minutes: u32,
    pub status: SessionStatus,
    pub event_id: Option<String>,
    pub meet_link: Option<String>,
    pub last_activity: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub end_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub schedule_id: Option<Uuid>,
    pub class_id: Uuid,
    pub teacher_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub event_id: Option<String>,
    pub meet_link: Option<String>,
}

//=========================================================================================
// Recordings and cleanup bookkeeping
//=========================================================================================

/// A stored class recording. Important recordings are exempt from retention.
#[derive(Debug, Clone)]
pub struct Recording {
    pub id: Uuid,
    pub session_id: Option<Uuid>,
    pub storage_path: String,
    pub is_important: bool,
    pub created_at: DateTime<Utc>,
}

/// One row per retention sweep. When a sweep fails part-way, the counts
/// reflect what the committed batches achieved before the error.
#[derive(Debug, Clone)]
pub struct CleanupRun {
    pub ran_at: DateTime<Utc>,
    pub sessions_deleted: u64,
    pub recordings_deleted: u64,
    pub error: Option<String>,
}

//=========================================================================================
// Calendar projection input
//=========================================================================================

/// One projectable calendar item. The two variants replace the source
/// system's field-presence probing with a closed tag set.
#[derive(Debug, Clone)]
pub enum CalendarEntry {
    /// A recurrence definition: projected onto every day of the displayed
    /// month whose weekday holds a slot.
    Recurring {
        schedule_id: Uuid,
        name: Option<String>,
        days_of_week: BTreeSet<DayOfWeek>,
        time_slots: BTreeMap<DayOfWeek, TimeOfDay>,
    },
    /// A one-off dated item: projected onto its own calendar day only.
    SingleDate {
        session_id: Uuid,
        name: Option<String>,
        starts_at: DateTime<Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_of_day_parses_and_renders() {
        let t: TimeOfDay = "09:05".parse().unwrap();
        assert_eq!(t.hour(), 9);
        assert_eq!(t.minute(), 5);
        assert_eq!(t.to_string(), "09:05");
    }

    #[test]
    fn time_of_day_rejects_out_of_range() {
        assert!("24:00".parse::<TimeOfDay>().is_err());
        assert!("12:60".parse::<TimeOfDay>().is_err());
        assert!("noon".parse::<TimeOfDay>().is_err());
    }

    #[test]
    fn monthly_recurrence_is_rejected() {
        assert!("weekly".parse::<RecurrencePattern>().is_ok());
        assert!("biweekly".parse::<RecurrencePattern>().is_ok());
        assert!("monthly".parse::<RecurrencePattern>().is_err());
    }

    #[test]
    fn role_round_trips() {
        for role in [Role::Student, Role::Teacher, Role::Admin] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("superuser".parse::<Role>().is_err());
    }
}
