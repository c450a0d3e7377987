//! crates/iqra_core/src/test_support.rs
//!
//! In-memory port implementations backing the scheduling and janitor unit
//! tests. The store keeps everything in a single mutex-guarded state struct
//! and mirrors the query predicates the real adapter expresses in SQL.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    AuthSession, Class, CleanupRun, NewSchedule, NewSession, Recording, Role, Schedule, Session,
    SessionStatus, User, UserCredentials,
};
use crate::ports::{
    CalendarEvent, CalendarService, DatabaseService, EventChange, EventDetails, PortError,
    PortResult, QueryScope,
};

#[derive(Default)]
struct State {
    users: HashMap<Uuid, UserCredentials>,
    auth_sessions: HashMap<String, AuthSession>,
    classes: HashMap<Uuid, Class>,
    schedules: HashMap<Uuid, Schedule>,
    sessions: HashMap<Uuid, Session>,
    recordings: HashMap<Uuid, Recording>,
    cleanup_runs: Vec<CleanupRun>,
}

/// In-memory `DatabaseService`, with counters the tests assert on.
#[derive(Default)]
pub struct InMemoryDb {
    state: Mutex<State>,
    /// Number of `schedules_in` calls issued.
    pub schedule_queries: AtomicUsize,
    /// Largest id slice ever handed to `delete_sessions`/`delete_recordings`.
    pub max_delete_chunk: AtomicUsize,
    /// When set, `delete_recordings` fails, for partial-sweep tests.
    pub fail_delete_recordings: AtomicBool,
}

impl InMemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_class(&self, name: &str, teacher_id: Uuid, student_ids: Vec<Uuid>) -> Class {
        let class = Class {
            id: Uuid::new_v4(),
            name: name.to_string(),
            teacher_id,
            student_ids,
            created_at: Utc::now(),
        };
        let mut state = self.state.lock().unwrap();
        state.classes.insert(class.id, class.clone());
        class
    }

    pub fn add_session(&self, session: Session) {
        let mut state = self.state.lock().unwrap();
        state.sessions.insert(session.id, session);
    }

    pub fn add_recording(&self, created_at: DateTime<Utc>, is_important: bool) -> Recording {
        let recording = Recording {
            id: Uuid::new_v4(),
            session_id: None,
            storage_path: format!("recordings/{}.webm", Uuid::new_v4()),
            is_important,
            created_at,
        };
        let mut state = self.state.lock().unwrap();
        state.recordings.insert(recording.id, recording.clone());
        recording
    }

    pub fn get_session_sync(&self, session_id: Uuid) -> Option<Session> {
        self.state.lock().unwrap().sessions.get(&session_id).cloned()
    }

    pub fn get_schedule_sync(&self, schedule_id: Uuid) -> Option<Schedule> {
        self.state
            .lock()
            .unwrap()
            .schedules
            .get(&schedule_id)
            .cloned()
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }

    pub fn recording_count(&self) -> usize {
        self.state.lock().unwrap().recordings.len()
    }

    pub fn cleanup_runs(&self) -> Vec<CleanupRun> {
        self.state.lock().unwrap().cleanup_runs.clone()
    }

    fn note_chunk(&self, len: usize) {
        self.max_delete_chunk.fetch_max(len, Ordering::SeqCst);
    }
}

/// Builds a session row for seeding the store.
pub fn make_session(
    schedule_id: Option<Uuid>,
    class_id: Uuid,
    teacher_id: Uuid,
    starts_at: DateTime<Utc>,
    status: SessionStatus,
    last_activity: Option<DateTime<Utc>>,
) -> Session {
    Session {
        id: Uuid::new_v4(),
        schedule_id,
        class_id,
        teacher_id,
        starts_at,
        duration_minutes: 60,
        status,
        event_id: None,
        meet_link: None,
        last_activity,
        ended_at: None,
        end_reason: None,
        created_at: starts_at,
    }
}

fn in_scope_class(scope: &QueryScope, class_id: Uuid, teacher_id: Uuid) -> bool {
    match scope {
        QueryScope::Teacher(id) => teacher_id == *id,
        QueryScope::Classes(ids) => ids.contains(&class_id),
        QueryScope::All => true,
    }
}

#[async_trait]
impl DatabaseService for InMemoryDb {
    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
    ) -> PortResult<User> {
        let creds = UserCredentials {
            user_id: Uuid::new_v4(),
            email: email.to_string(),
            hashed_password: hashed_password.to_string(),
            role: Role::Student,
        };
        let mut state = self.state.lock().unwrap();
        state.users.insert(creds.user_id, creds.clone());
        Ok(User {
            id: creds.user_id,
            email: Some(creds.email),
            role: creds.role,
        })
    }

    async fn get_user(&self, user_id: Uuid) -> PortResult<User> {
        let state = self.state.lock().unwrap();
        let creds = state
            .users
            .get(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))?;
        Ok(User {
            id: creds.user_id,
            email: Some(creds.email.clone()),
            role: creds.role,
        })
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let state = self.state.lock().unwrap();
        state
            .users
            .values()
            .find(|c| c.email == email)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", email)))
    }

    async fn set_user_role(&self, user_id: Uuid, role: Role) -> PortResult<()> {
        let mut state = self.state.lock().unwrap();
        let creds = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))?;
        creds.role = role;
        Ok(())
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        let mut state = self.state.lock().unwrap();
        state.auth_sessions.insert(
            session_id.to_string(),
            AuthSession {
                id: session_id.to_string(),
                user_id,
                expires_at,
            },
        );
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        let state = self.state.lock().unwrap();
        state
            .auth_sessions
            .get(session_id)
            .filter(|s| s.expires_at > Utc::now())
            .map(|s| s.user_id)
            .ok_or_else(|| PortError::NotFound("auth session not found".to_string()))
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        self.state.lock().unwrap().auth_sessions.remove(session_id);
        Ok(())
    }

    async fn create_class(&self, name: &str, teacher_id: Uuid) -> PortResult<Class> {
        Ok(self.add_class(name, teacher_id, Vec::new()))
    }

    async fn get_class(&self, class_id: Uuid) -> PortResult<Class> {
        let state = self.state.lock().unwrap();
        state
            .classes
            .get(&class_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Class {} not found", class_id)))
    }

    async fn classes_by_ids(&self, class_ids: &[Uuid]) -> PortResult<Vec<Class>> {
        let state = self.state.lock().unwrap();
        Ok(class_ids
            .iter()
            .filter_map(|id| state.classes.get(id).cloned())
            .collect())
    }

    async fn add_class_student(&self, class_id: Uuid, student_id: Uuid) -> PortResult<()> {
        let mut state = self.state.lock().unwrap();
        let class = state
            .classes
            .get_mut(&class_id)
            .ok_or_else(|| PortError::NotFound(format!("Class {} not found", class_id)))?;
        if !class.student_ids.contains(&student_id) {
            class.student_ids.push(student_id);
        }
        Ok(())
    }

    async fn class_ids_for_student(&self, student_id: Uuid) -> PortResult<Vec<Uuid>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .classes
            .values()
            .filter(|c| c.student_ids.contains(&student_id))
            .map(|c| c.id)
            .collect())
    }

    async fn insert_schedule(
        &self,
        definition: &NewSchedule,
        teacher_id: Uuid,
    ) -> PortResult<Schedule> {
        let now = Utc::now();
        let schedule = Schedule {
            id: Uuid::new_v4(),
            class_id: definition.class_id,
            teacher_id,
            start_date: definition.start_date,
            recurrence_pattern: definition.recurrence_pattern,
            days_of_week: definition.days_of_week.clone(),
            time_slots: definition.time_slots.clone(),
            duration_minutes: definition.duration_minutes,
            session_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        let mut state = self.state.lock().unwrap();
        state.schedules.insert(schedule.id, schedule.clone());
        Ok(schedule)
    }

    async fn get_schedule(&self, schedule_id: Uuid) -> PortResult<Schedule> {
        let state = self.state.lock().unwrap();
        state
            .schedules
            .get(&schedule_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Schedule {} not found", schedule_id)))
    }

    async fn update_schedule(&self, schedule: &Schedule) -> PortResult<()> {
        let mut state = self.state.lock().unwrap();
        match state.schedules.get_mut(&schedule.id) {
            Some(existing) => {
                *existing = schedule.clone();
                Ok(())
            }
            None => Err(PortError::NotFound(format!(
                "Schedule {} not found",
                schedule.id
            ))),
        }
    }

    async fn set_schedule_sessions(
        &self,
        schedule_id: Uuid,
        session_ids: &[Uuid],
    ) -> PortResult<()> {
        let mut state = self.state.lock().unwrap();
        let schedule = state.schedules.get_mut(&schedule_id).ok_or_else(|| {
            PortError::NotFound(format!("Schedule {} not found", schedule_id))
        })?;
        schedule.session_ids = session_ids.to_vec();
        schedule.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_schedule(&self, schedule_id: Uuid) -> PortResult<()> {
        self.state.lock().unwrap().schedules.remove(&schedule_id);
        Ok(())
    }

    async fn schedules_in(&self, scope: &QueryScope) -> PortResult<Vec<Schedule>> {
        self.schedule_queries.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        let mut schedules: Vec<Schedule> = state
            .schedules
            .values()
            .filter(|s| in_scope_class(scope, s.class_id, s.teacher_id))
            .cloned()
            .collect();
        schedules.sort_by_key(|s| s.created_at);
        Ok(schedules)
    }

    async fn insert_session(&self, session: &NewSession) -> PortResult<Session> {
        let row = Session {
            id: Uuid::new_v4(),
            schedule_id: session.schedule_id,
            class_id: session.class_id,
            teacher_id: session.teacher_id,
            starts_at: session.starts_at,
            duration_minutes: session.duration_minutes,
            status: SessionStatus::Scheduled,
            event_id: session.event_id.clone(),
            meet_link: session.meet_link.clone(),
            last_activity: None,
            ended_at: None,
            end_reason: None,
            created_at: Utc::now(),
        };
        let mut state = self.state.lock().unwrap();
        state.sessions.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_session(&self, session_id: Uuid) -> PortResult<Session> {
        let state = self.state.lock().unwrap();
        state
            .sessions
            .get(&session_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Session {} not found", session_id)))
    }

    async fn sessions_for_schedule(&self, schedule_id: Uuid) -> PortResult<Vec<Session>> {
        let state = self.state.lock().unwrap();
        let mut sessions: Vec<Session> = state
            .sessions
            .values()
            .filter(|s| s.schedule_id == Some(schedule_id))
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.starts_at);
        Ok(sessions)
    }

    async fn one_off_sessions_in(&self, scope: &QueryScope) -> PortResult<Vec<Session>> {
        let state = self.state.lock().unwrap();
        let mut sessions: Vec<Session> = state
            .sessions
            .values()
            .filter(|s| s.schedule_id.is_none())
            .filter(|s| in_scope_class(scope, s.class_id, s.teacher_id))
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.starts_at);
        Ok(sessions)
    }

    async fn reschedule_session(
        &self,
        session_id: Uuid,
        starts_at: DateTime<Utc>,
    ) -> PortResult<()> {
        let mut state = self.state.lock().unwrap();
        let session = state.sessions.get_mut(&session_id).ok_or_else(|| {
            PortError::NotFound(format!("Session {} not found", session_id))
        })?;
        session.starts_at = starts_at;
        Ok(())
    }

    async fn record_session_activity(
        &self,
        session_id: Uuid,
        at: DateTime<Utc>,
    ) -> PortResult<()> {
        let mut state = self.state.lock().unwrap();
        let session = state.sessions.get_mut(&session_id).ok_or_else(|| {
            PortError::NotFound(format!("Session {} not found", session_id))
        })?;
        session.status = SessionStatus::Active;
        session.last_activity = Some(at);
        Ok(())
    }

    async fn delete_sessions(&self, session_ids: &[Uuid]) -> PortResult<u64> {
        self.note_chunk(session_ids.len());
        let mut state = self.state.lock().unwrap();
        let mut deleted = 0u64;
        for id in session_ids {
            if state.sessions.remove(id).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn idle_active_sessions(&self, idle_since: DateTime<Utc>) -> PortResult<Vec<Uuid>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .sessions
            .values()
            .filter(|s| s.status == SessionStatus::Active)
            .filter(|s| s.last_activity.is_some_and(|at| at <= idle_since))
            .map(|s| s.id)
            .collect())
    }

    async fn complete_sessions(
        &self,
        session_ids: &[Uuid],
        ended_at: DateTime<Utc>,
        end_reason: &str,
    ) -> PortResult<u64> {
        let mut state = self.state.lock().unwrap();
        let mut completed = 0u64;
        for id in session_ids {
            if let Some(session) = state.sessions.get_mut(id) {
                session.status = SessionStatus::Completed;
                session.ended_at = Some(ended_at);
                session.end_reason = Some(end_reason.to_string());
                completed += 1;
            }
        }
        Ok(completed)
    }

    async fn sessions_started_before(&self, cutoff: DateTime<Utc>) -> PortResult<Vec<Uuid>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .sessions
            .values()
            .filter(|s| s.starts_at <= cutoff)
            .map(|s| s.id)
            .collect())
    }

    async fn lapsed_active_sessions(&self, cutoff: DateTime<Utc>) -> PortResult<Vec<Uuid>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .sessions
            .values()
            .filter(|s| s.status == SessionStatus::Active)
            .filter(|s| s.starts_at <= cutoff)
            .filter(|s| s.last_activity.unwrap_or(s.starts_at) <= cutoff)
            .map(|s| s.id)
            .collect())
    }

    async fn expired_recordings(&self, cutoff: DateTime<Utc>) -> PortResult<Vec<Uuid>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .recordings
            .values()
            .filter(|r| !r.is_important && r.created_at <= cutoff)
            .map(|r| r.id)
            .collect())
    }

    async fn delete_recordings(&self, recording_ids: &[Uuid]) -> PortResult<u64> {
        if self.fail_delete_recordings.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected(
                "recording storage unavailable".to_string(),
            ));
        }
        self.note_chunk(recording_ids.len());
        let mut state = self.state.lock().unwrap();
        let mut deleted = 0u64;
        for id in recording_ids {
            if state.recordings.remove(id).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn record_cleanup_run(&self, run: &CleanupRun) -> PortResult<()> {
        self.state.lock().unwrap().cleanup_runs.push(run.clone());
        Ok(())
    }
}

/// Calendar port double that records calls and can fail after a set number
/// of event creations.
#[derive(Default)]
pub struct TestCalendar {
    pub created: Mutex<Vec<EventDetails>>,
    pub updated: Mutex<Vec<(String, EventChange)>>,
    pub deleted: Mutex<Vec<String>>,
    pub fail_after: Option<usize>,
}

impl TestCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_after(calls: usize) -> Self {
        Self {
            fail_after: Some(calls),
            ..Self::default()
        }
    }
}

#[async_trait]
impl CalendarService for TestCalendar {
    async fn create_event(&self, details: &EventDetails) -> PortResult<CalendarEvent> {
        let mut created = self.created.lock().unwrap();
        if self.fail_after.is_some_and(|limit| created.len() >= limit) {
            return Err(PortError::Unexpected("calendar API unavailable".to_string()));
        }
        created.push(details.clone());
        let n = created.len();
        Ok(CalendarEvent {
            event_id: format!("evt-{}", n),
            meet_link: format!("https://meet.google.com/test-{}", n),
        })
    }

    async fn update_event(&self, event_id: &str, change: &EventChange) -> PortResult<()> {
        self.updated
            .lock()
            .unwrap()
            .push((event_id.to_string(), change.clone()));
        Ok(())
    }

    async fn delete_event(&self, event_id: &str) -> PortResult<()> {
        self.deleted.lock().unwrap().push(event_id.to_string());
        Ok(())
    }

    async fn refresh_access_token(&self) -> PortResult<()> {
        Ok(())
    }
}
