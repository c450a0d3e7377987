//! crates/iqra_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the
//! core to be independent of specific external implementations like databases
//! or calendar providers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    Class, CleanupRun, InvalidValue, NewSchedule, NewSession, Role, Schedule, Session, User,
    UserCredentials,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g.,
/// database, calendar API).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Permission denied")]
    PermissionDenied,
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

impl From<InvalidValue> for PortError {
    fn from(e: InvalidValue) -> Self {
        PortError::InvalidArgument(e.to_string())
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Query scoping
//=========================================================================================

/// Which slice of the schedule/session collections a query covers. Resolved
/// from the caller's role before the store is consulted.
#[derive(Debug, Clone)]
pub enum QueryScope {
    /// Rows owned by one teacher.
    Teacher(Uuid),
    /// Rows belonging to any of the given classes.
    Classes(Vec<Uuid>),
    /// Every row; admin callers only.
    All,
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- User Management ---
    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
    ) -> PortResult<User>;

    async fn get_user(&self, user_id: Uuid) -> PortResult<User>;

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials>;

    async fn set_user_role(&self, user_id: Uuid, role: Role) -> PortResult<()>;

    // --- Auth Methods ---
    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid>;

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()>;

    // --- Class Management ---
    async fn create_class(&self, name: &str, teacher_id: Uuid) -> PortResult<Class>;

    async fn get_class(&self, class_id: Uuid) -> PortResult<Class>;

    async fn classes_by_ids(&self, class_ids: &[Uuid]) -> PortResult<Vec<Class>>;

    /// Adds a student to a class roster. Enrolling an already-enrolled
    /// student is a no-op.
    async fn add_class_student(&self, class_id: Uuid, student_id: Uuid) -> PortResult<()>;

    /// Ids of the classes a student is enrolled in.
    async fn class_ids_for_student(&self, student_id: Uuid) -> PortResult<Vec<Uuid>>;

    // --- Schedule Management ---
    /// Persists a new schedule with an empty session list and returns it.
    async fn insert_schedule(
        &self,
        definition: &NewSchedule,
        teacher_id: Uuid,
    ) -> PortResult<Schedule>;

    async fn get_schedule(&self, schedule_id: Uuid) -> PortResult<Schedule>;

    /// Persists the mutable fields of an already-merged schedule, including
    /// its `updated_at` stamp.
    async fn update_schedule(&self, schedule: &Schedule) -> PortResult<()>;

    /// Back-fills the session ids produced by expansion.
    async fn set_schedule_sessions(
        &self,
        schedule_id: Uuid,
        session_ids: &[Uuid],
    ) -> PortResult<()>;

    async fn delete_schedule(&self, schedule_id: Uuid) -> PortResult<()>;

    async fn schedules_in(&self, scope: &QueryScope) -> PortResult<Vec<Schedule>>;

    // --- Session Management ---
    async fn insert_session(&self, session: &NewSession) -> PortResult<Session>;

    async fn get_session(&self, session_id: Uuid) -> PortResult<Session>;

    async fn sessions_for_schedule(&self, schedule_id: Uuid) -> PortResult<Vec<Session>>;

    /// Sessions with no owning schedule, i.e. one-off occurrences.
    async fn one_off_sessions_in(&self, scope: &QueryScope) -> PortResult<Vec<Session>>;

    async fn reschedule_session(
        &self,
        session_id: Uuid,
        starts_at: DateTime<Utc>,
    ) -> PortResult<()>;

    /// Live-session heartbeat: marks the session active and stamps
    /// `last_activity`.
    async fn record_session_activity(
        &self,
        session_id: Uuid,
        at: DateTime<Utc>,
    ) -> PortResult<()>;

    async fn delete_sessions(&self, session_ids: &[Uuid]) -> PortResult<u64>;

    // --- Janitor Queries ---
    /// Active sessions whose `last_activity` is at or before the cutoff.
    /// Sessions that never reported activity are not matched.
    async fn idle_active_sessions(&self, idle_since: DateTime<Utc>) -> PortResult<Vec<Uuid>>;

    async fn complete_sessions(
        &self,
        session_ids: &[Uuid],
        ended_at: DateTime<Utc>,
        end_reason: &str,
    ) -> PortResult<u64>;

    /// Sessions whose occurrence timestamp is at or before the cutoff,
    /// regardless of status.
    async fn sessions_started_before(&self, cutoff: DateTime<Utc>) -> PortResult<Vec<Uuid>>;

    /// Active sessions that started at or before the cutoff and whose
    /// `last_activity` (or start, if none was ever reported) is also at or
    /// before it.
    async fn lapsed_active_sessions(&self, cutoff: DateTime<Utc>) -> PortResult<Vec<Uuid>>;

    /// Recordings past the cutoff that are not flagged important.
    async fn expired_recordings(&self, cutoff: DateTime<Utc>) -> PortResult<Vec<Uuid>>;

    async fn delete_recordings(&self, recording_ids: &[Uuid]) -> PortResult<u64>;

    async fn record_cleanup_run(&self, run: &CleanupRun) -> PortResult<()>;
}

//=========================================================================================
// Calendar / meeting provider port
//=========================================================================================

#[derive(Debug, Clone)]
pub struct EventDetails {
    pub summary: String,
    pub starts_at: DateTime<Utc>,
    pub duration_minutes: u32,
}

#[derive(Debug, Clone)]
pub struct CalendarEvent {
    pub event_id: String,
    pub meet_link: String,
}

#[derive(Debug, Clone, Default)]
pub struct EventChange {
    pub starts_at: Option<DateTime<Utc>>,
    pub duration_minutes: Option<u32>,
}

#[async_trait]
pub trait CalendarService: Send + Sync {
    /// Creates a calendar event with an attached meeting link.
    async fn create_event(&self, details: &EventDetails) -> PortResult<CalendarEvent>;

    async fn update_event(&self, event_id: &str, change: &EventChange) -> PortResult<()>;

    async fn delete_event(&self, event_id: &str) -> PortResult<()>;

    /// Refreshes the provider's access token for the fixed calendar scopes.
    async fn refresh_access_token(&self) -> PortResult<()>;
}
