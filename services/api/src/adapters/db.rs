//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete
//! implementation of the `DatabaseService` port from the `core` crate. It
//! handles all interactions with the PostgreSQL database using `sqlx`.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::warn;
use uuid::Uuid;

use iqra_core::domain::{
    Class, CleanupRun, DayOfWeek, NewSchedule, NewSession, Role, Schedule, Session, TimeOfDay,
    User, UserCredentials,
};
use iqra_core::ports::{DatabaseService, PortError, PortResult, QueryScope};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    user_id: Uuid,
    email: Option<String>,
    role: String,
}
impl UserRecord {
    fn to_domain(self) -> PortResult<User> {
        let role = self
            .role
            .parse::<Role>()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(User {
            id: self.user_id,
            email: self.email,
            role,
        })
    }
}

#[derive(FromRow)]
struct CredentialsRecord {
    user_id: Uuid,
    email: String,
    hashed_password: String,
    role: String,
}
impl CredentialsRecord {
    fn to_domain(self) -> PortResult<UserCredentials> {
        let role = self
            .role
            .parse::<Role>()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(UserCredentials {
            user_id: self.user_id,
            email: self.email,
            hashed_password: self.hashed_password,
            role,
        })
    }
}

#[derive(FromRow)]
struct ClassRecord {
    id: Uuid,
    name: String,
    teacher_id: Uuid,
    student_ids: Vec<Uuid>,
    created_at: DateTime<Utc>,
}
impl ClassRecord {
    fn to_domain(self) -> Class {
        Class {
            id: self.id,
            name: self.name,
            teacher_id: self.teacher_id,
            student_ids: self.student_ids,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct ScheduleRecord {
    id: Uuid,
    class_id: Uuid,
    teacher_id: Uuid,
    start_date: NaiveDate,
    recurrence_pattern: String,
    days_of_week: Vec<i32>,
    time_slots: serde_json::Value,
    duration_minutes: i32,
    session_ids: Vec<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl ScheduleRecord {
    fn to_domain(self) -> PortResult<Schedule> {
        let recurrence_pattern = self
            .recurrence_pattern
            .parse()
            .map_err(|e: iqra_core::domain::InvalidValue| PortError::Unexpected(e.to_string()))?;
        let mut days_of_week = BTreeSet::new();
        for day in self.days_of_week {
            let day = DayOfWeek::try_from(day)
                .ok()
                .filter(|d| *d <= 6)
                .ok_or_else(|| {
                    PortError::Unexpected(format!("stored weekday index {} out of range", day))
                })?;
            days_of_week.insert(day);
        }
        let time_slots: BTreeMap<DayOfWeek, TimeOfDay> = serde_json::from_value(self.time_slots)
            .map_err(|e| PortError::Unexpected(format!("malformed time slot map: {}", e)))?;
        Ok(Schedule {
            id: self.id,
            class_id: self.class_id,
            teacher_id: self.teacher_id,
            start_date: self.start_date,
            recurrence_pattern,
            days_of_week,
            time_slots,
            duration_minutes: self.duration_minutes as u32,
            session_ids: self.session_ids,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct SessionRecord {
    id: Uuid,
    schedule_id: Option<Uuid>,
    class_id: Uuid,
    teacher_id: Uuid,
    starts_at: DateTime<Utc>,
    duration_minutes: i32,
    status: String,
    event_id: Option<String>,
    meet_link: Option<String>,
    last_activity: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    end_reason: Option<String>,
    created_at: DateTime<Utc>,
}
impl SessionRecord {
    fn to_domain(self) -> PortResult<Session> {
        let status = self
            .status
            .parse()
            .map_err(|e: iqra_core::domain::InvalidValue| PortError::Unexpected(e.to_string()))?;
        Ok(Session {
            id: self.id,
            schedule_id: self.schedule_id,
            class_id: self.class_id,
            teacher_id: self.teacher_id,
            starts_at: self.starts_at,
            duration_minutes: self.duration_minutes as u32,
            status,
            event_id: self.event_id,
            meet_link: self.meet_link,
            last_activity: self.last_activity,
            ended_at: self.ended_at,
            end_reason: self.end_reason,
            created_at: self.created_at,
        })
    }
}

/// Converts list-query records, dropping rows whose stored data no longer
/// parses so a single malformed row cannot abort the whole listing.
fn collect_rows<R, T>(records: Vec<R>, convert: fn(R) -> PortResult<T>, what: &str) -> Vec<T> {
    records
        .into_iter()
        .filter_map(|record| match convert(record) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Skipping malformed {} row: {:?}", what, e);
                None
            }
        })
        .collect()
}

const SCHEDULE_COLUMNS: &str = "id, class_id, teacher_id, start_date, recurrence_pattern, \
     days_of_week, time_slots, duration_minutes, session_ids, created_at, updated_at";

const SESSION_COLUMNS: &str = "id, schedule_id, class_id, teacher_id, starts_at, \
     duration_minutes, status, event_id, meet_link, last_activity, ended_at, end_reason, \
     created_at";

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
    ) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(
            "INSERT INTO users (user_id, email, hashed_password, role) \
             VALUES ($1, $2, $3, 'student') RETURNING user_id, email, role",
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(hashed_password)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        record.to_domain()
    }

    async fn get_user(&self, user_id: Uuid) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT user_id, email, role FROM users WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("User {} not found", user_id)),
            _ => unexpected(e),
        })?;
        record.to_domain()
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let record = sqlx::query_as::<_, CredentialsRecord>(
            "SELECT user_id, email, hashed_password, role FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("User {} not found", email)),
            _ => unexpected(e),
        })?;
        record.to_domain()
    }

    async fn set_user_role(&self, user_id: Uuid, role: Role) -> PortResult<()> {
        let result = sqlx::query("UPDATE users SET role = $2 WHERE user_id = $1")
            .bind(user_id)
            .bind(role.as_str())
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("User {} not found", user_id)));
        }
        Ok(())
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(session_id)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT user_id FROM auth_sessions WHERE id = $1 AND expires_at > $2",
        )
        .bind(session_id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound("auth session not found".to_string()),
            _ => unexpected(e),
        })
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn create_class(&self, name: &str, teacher_id: Uuid) -> PortResult<Class> {
        let record = sqlx::query_as::<_, ClassRecord>(
            "INSERT INTO classes (id, name, teacher_id) VALUES ($1, $2, $3) \
             RETURNING id, name, teacher_id, student_ids, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(teacher_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn get_class(&self, class_id: Uuid) -> PortResult<Class> {
        let record = sqlx::query_as::<_, ClassRecord>(
            "SELECT id, name, teacher_id, student_ids, created_at FROM classes WHERE id = $1",
        )
        .bind(class_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                PortError::NotFound(format!("Class {} not found", class_id))
            }
            _ => unexpected(e),
        })?;
        Ok(record.to_domain())
    }

    async fn classes_by_ids(&self, class_ids: &[Uuid]) -> PortResult<Vec<Class>> {
        let records = sqlx::query_as::<_, ClassRecord>(
            "SELECT id, name, teacher_id, student_ids, created_at FROM classes \
             WHERE id = ANY($1)",
        )
        .bind(class_ids.to_vec())
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn add_class_student(&self, class_id: Uuid, student_id: Uuid) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE classes SET student_ids = array_append(student_ids, $2) \
             WHERE id = $1 AND NOT ($2 = ANY(student_ids))",
        )
        .bind(class_id)
        .bind(student_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            // Distinguish a missing class from an already-enrolled student.
            self.get_class(class_id).await?;
        }
        Ok(())
    }

    async fn class_ids_for_student(&self, student_id: Uuid) -> PortResult<Vec<Uuid>> {
        sqlx::query_scalar::<_, Uuid>("SELECT id FROM classes WHERE $1 = ANY(student_ids)")
            .bind(student_id)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)
    }

    async fn insert_schedule(
        &self,
        definition: &NewSchedule,
        teacher_id: Uuid,
    ) -> PortResult<Schedule> {
        let days: Vec<i32> = definition
            .days_of_week
            .iter()
            .map(|d| i32::from(*d))
            .collect();
        let record = sqlx::query_as::<_, ScheduleRecord>(&format!(
            "INSERT INTO schedules \
             (id, class_id, teacher_id, start_date, recurrence_pattern, days_of_week, \
              time_slots, duration_minutes) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {}",
            SCHEDULE_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(definition.class_id)
        .bind(teacher_id)
        .bind(definition.start_date)
        .bind(definition.recurrence_pattern.as_str())
        .bind(days)
        .bind(Json(&definition.time_slots))
        .bind(definition.duration_minutes as i32)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        record.to_domain()
    }

    async fn get_schedule(&self, schedule_id: Uuid) -> PortResult<Schedule> {
        let record = sqlx::query_as::<_, ScheduleRecord>(&format!(
            "SELECT {} FROM schedules WHERE id = $1",
            SCHEDULE_COLUMNS
        ))
        .bind(schedule_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                PortError::NotFound(format!("Schedule {} not found", schedule_id))
            }
            _ => unexpected(e),
        })?;
        record.to_domain()
    }

    async fn update_schedule(&self, schedule: &Schedule) -> PortResult<()> {
        let days: Vec<i32> = schedule.days_of_week.iter().map(|d| i32::from(*d)).collect();
        let result = sqlx::query(
            "UPDATE schedules SET start_date = $2, recurrence_pattern = $3, \
             days_of_week = $4, time_slots = $5, duration_minutes = $6, updated_at = $7 \
             WHERE id = $1",
        )
        .bind(schedule.id)
        .bind(schedule.start_date)
        .bind(schedule.recurrence_pattern.as_str())
        .bind(days)
        .bind(Json(&schedule.time_slots))
        .bind(schedule.duration_minutes as i32)
        .bind(schedule.updated_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Schedule {} not found",
                schedule.id
            )));
        }
        Ok(())
    }

    async fn set_schedule_sessions(
        &self,
        schedule_id: Uuid,
        session_ids: &[Uuid],
    ) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE schedules SET session_ids = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(schedule_id)
        .bind(session_ids.to_vec())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Schedule {} not found",
                schedule_id
            )));
        }
        Ok(())
    }

    async fn delete_schedule(&self, schedule_id: Uuid) -> PortResult<()> {
        sqlx::query("DELETE FROM schedules WHERE id = $1")
            .bind(schedule_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn schedules_in(&self, scope: &QueryScope) -> PortResult<Vec<Schedule>> {
        let records = match scope {
            QueryScope::Teacher(teacher_id) => {
                sqlx::query_as::<_, ScheduleRecord>(&format!(
                    "SELECT {} FROM schedules WHERE teacher_id = $1 ORDER BY created_at",
                    SCHEDULE_COLUMNS
                ))
                .bind(teacher_id)
                .fetch_all(&self.pool)
                .await
            }
            QueryScope::Classes(class_ids) => {
                sqlx::query_as::<_, ScheduleRecord>(&format!(
                    "SELECT {} FROM schedules WHERE class_id = ANY($1) ORDER BY created_at",
                    SCHEDULE_COLUMNS
                ))
                .bind(class_ids.to_vec())
                .fetch_all(&self.pool)
                .await
            }
            QueryScope::All => {
                sqlx::query_as::<_, ScheduleRecord>(&format!(
                    "SELECT {} FROM schedules ORDER BY created_at",
                    SCHEDULE_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(unexpected)?;
        Ok(collect_rows(records, ScheduleRecord::to_domain, "schedule"))
    }

    async fn insert_session(&self, session: &NewSession) -> PortResult<Session> {
        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "INSERT INTO sessions \
             (id, schedule_id, class_id, teacher_id, starts_at, duration_minutes, status, \
              event_id, meet_link) \
             VALUES ($1, $2, $3, $4, $5, $6, 'scheduled', $7, $8) RETURNING {}",
            SESSION_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(session.schedule_id)
        .bind(session.class_id)
        .bind(session.teacher_id)
        .bind(session.starts_at)
        .bind(session.duration_minutes as i32)
        .bind(&session.event_id)
        .bind(&session.meet_link)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        record.to_domain()
    }

    async fn get_session(&self, session_id: Uuid) -> PortResult<Session> {
        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {} FROM sessions WHERE id = $1",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                PortError::NotFound(format!("Session {} not found", session_id))
            }
            _ => unexpected(e),
        })?;
        record.to_domain()
    }

    async fn sessions_for_schedule(&self, schedule_id: Uuid) -> PortResult<Vec<Session>> {
        let records = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {} FROM sessions WHERE schedule_id = $1 ORDER BY starts_at",
            SESSION_COLUMNS
        ))
        .bind(schedule_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(collect_rows(records, SessionRecord::to_domain, "session"))
    }

    async fn one_off_sessions_in(&self, scope: &QueryScope) -> PortResult<Vec<Session>> {
        let records = match scope {
            QueryScope::Teacher(teacher_id) => {
                sqlx::query_as::<_, SessionRecord>(&format!(
                    "SELECT {} FROM sessions WHERE schedule_id IS NULL AND teacher_id = $1 \
                     ORDER BY starts_at",
                    SESSION_COLUMNS
                ))
                .bind(teacher_id)
                .fetch_all(&self.pool)
                .await
            }
            QueryScope::Classes(class_ids) => {
                sqlx::query_as::<_, SessionRecord>(&format!(
                    "SELECT {} FROM sessions WHERE schedule_id IS NULL AND class_id = ANY($1) \
                     ORDER BY starts_at",
                    SESSION_COLUMNS
                ))
                .bind(class_ids.to_vec())
                .fetch_all(&self.pool)
                .await
            }
            QueryScope::All => {
                sqlx::query_as::<_, SessionRecord>(&format!(
                    "SELECT {} FROM sessions WHERE schedule_id IS NULL ORDER BY starts_at",
                    SESSION_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(unexpected)?;
        Ok(collect_rows(records, SessionRecord::to_domain, "session"))
    }

    async fn reschedule_session(
        &self,
        session_id: Uuid,
        starts_at: DateTime<Utc>,
    ) -> PortResult<()> {
        let result = sqlx::query("UPDATE sessions SET starts_at = $2 WHERE id = $1")
            .bind(session_id)
            .bind(starts_at)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Session {} not found",
                session_id
            )));
        }
        Ok(())
    }

    async fn record_session_activity(
        &self,
        session_id: Uuid,
        at: DateTime<Utc>,
    ) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE sessions SET status = 'active', last_activity = $2 WHERE id = $1",
        )
        .bind(session_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Session {} not found",
                session_id
            )));
        }
        Ok(())
    }

    async fn delete_sessions(&self, session_ids: &[Uuid]) -> PortResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ANY($1)")
            .bind(session_ids.to_vec())
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(result.rows_affected())
    }

    async fn idle_active_sessions(&self, idle_since: DateTime<Utc>) -> PortResult<Vec<Uuid>> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM sessions WHERE status = 'active' AND last_activity <= $1",
        )
        .bind(idle_since)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)
    }

    async fn complete_sessions(
        &self,
        session_ids: &[Uuid],
        ended_at: DateTime<Utc>,
        end_reason: &str,
    ) -> PortResult<u64> {
        let result = sqlx::query(
            "UPDATE sessions SET status = 'completed', ended_at = $2, end_reason = $3 \
             WHERE id = ANY($1)",
        )
        .bind(session_ids.to_vec())
        .bind(ended_at)
        .bind(end_reason)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(result.rows_affected())
    }

    async fn sessions_started_before(&self, cutoff: DateTime<Utc>) -> PortResult<Vec<Uuid>> {
        sqlx::query_scalar::<_, Uuid>("SELECT id FROM sessions WHERE starts_at <= $1")
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)
    }

    async fn lapsed_active_sessions(&self, cutoff: DateTime<Utc>) -> PortResult<Vec<Uuid>> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM sessions WHERE status = 'active' AND starts_at <= $1 \
             AND COALESCE(last_activity, starts_at) <= $1",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)
    }

    async fn expired_recordings(&self, cutoff: DateTime<Utc>) -> PortResult<Vec<Uuid>> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM recordings WHERE is_important = FALSE AND created_at <= $1",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)
    }

    async fn delete_recordings(&self, recording_ids: &[Uuid]) -> PortResult<u64> {
        let result = sqlx::query("DELETE FROM recordings WHERE id = ANY($1)")
            .bind(recording_ids.to_vec())
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(result.rows_affected())
    }

    async fn record_cleanup_run(&self, run: &CleanupRun) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO cleanup_runs (ran_at, sessions_deleted, recordings_deleted, error) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(run.ran_at)
        .bind(run.sessions_deleted as i64)
        .bind(run.recordings_deleted as i64)
        .bind(&run.error)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }
}
