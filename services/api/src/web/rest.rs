//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::{IntoParams, OpenApi, ToSchema};
use uuid::Uuid;

use iqra_core::domain::{
    Class, DayOfWeek, NewSchedule, RecurrencePattern, Role, Schedule, ScheduleUpdate, Session,
    TimeOfDay,
};
use iqra_core::ports::PortError;
use iqra_core::projection::DayOccurrence;

use crate::web::middleware::AuthUser;
use crate::web::state::AppState;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::web::auth::signup_handler,
        crate::web::auth::login_handler,
        crate::web::auth::logout_handler,
        crate::web::auth::assign_role_handler,
        create_class_handler,
        get_class_handler,
        enroll_student_handler,
        create_schedule_handler,
        list_schedules_handler,
        update_schedule_handler,
        update_slot_handler,
        delete_schedule_handler,
        list_schedule_sessions_handler,
        calendar_view_handler,
        session_activity_handler,
        refresh_calendar_token_handler,
    ),
    components(
        schemas(
            crate::web::auth::SignupRequest,
            crate::web::auth::LoginRequest,
            crate::web::auth::AuthResponse,
            crate::web::auth::AssignRoleRequest,
            CreateClassRequest,
            EnrollStudentRequest,
            ClassResponse,
            CreateScheduleRequest,
            CreateScheduleResponse,
            UpdateScheduleRequest,
            UpdateSlotRequest,
            ScheduleResponse,
            SessionResponse,
            OccurrenceResponse,
            CalendarMonthResponse,
        )
    ),
    tags(
        (name = "Iqra Scheduling API", description = "API endpoints for class schedules, sessions, and the calendar view.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Request and Response Structs
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct CreateClassRequest {
    pub name: String,
}

#[derive(Deserialize, ToSchema)]
pub struct EnrollStudentRequest {
    pub student_id: Uuid,
}

#[derive(Serialize, ToSchema)]
pub struct ClassResponse {
    pub id: Uuid,
    pub name: String,
    pub teacher_id: Uuid,
    pub student_ids: Vec<Uuid>,
}

impl From<Class> for ClassResponse {
    fn from(class: Class) -> Self {
        Self {
            id: class.id,
            name: class.name,
            teacher_id: class.teacher_id,
            student_ids: class.student_ids,
        }
    }
}

/// The recurrence definition submitted by the scheduling wizard. Weekdays
/// are indexed Sunday = 0; each scheduled weekday needs a "HH:MM" slot.
#[derive(Deserialize, ToSchema)]
pub struct CreateScheduleRequest {
    pub class_id: Uuid,
    pub start_date: NaiveDate,
    pub recurrence_pattern: String,
    pub days_of_week: Vec<DayOfWeek>,
    pub time_slots: BTreeMap<DayOfWeek, String>,
    pub duration_minutes: u32,
}

#[derive(Serialize, ToSchema)]
pub struct CreateScheduleResponse {
    pub schedule_id: Uuid,
    pub session_ids: Vec<Uuid>,
}

#[derive(Deserialize, ToSchema, Default)]
pub struct UpdateScheduleRequest {
    pub start_date: Option<NaiveDate>,
    pub recurrence_pattern: Option<String>,
    pub days_of_week: Option<Vec<DayOfWeek>>,
    pub time_slots: Option<BTreeMap<DayOfWeek, String>>,
    pub duration_minutes: Option<u32>,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateSlotRequest {
    pub time_slot: String,
}

#[derive(Serialize, ToSchema)]
pub struct ScheduleResponse {
    pub id: Uuid,
    pub class_id: Uuid,
    pub teacher_id: Uuid,
    pub start_date: NaiveDate,
    pub recurrence_pattern: String,
    pub days_of_week: Vec<DayOfWeek>,
    pub time_slots: BTreeMap<DayOfWeek, String>,
    pub duration_minutes: u32,
    pub session_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Schedule> for ScheduleResponse {
    fn from(schedule: Schedule) -> Self {
        Self {
            id: schedule.id,
            class_id: schedule.class_id,
            teacher_id: schedule.teacher_id,
            start_date: schedule.start_date,
            recurrence_pattern: schedule.recurrence_pattern.as_str().to_string(),
            days_of_week: schedule.days_of_week.into_iter().collect(),
            time_slots: schedule
                .time_slots
                .into_iter()
                .map(|(day, slot)| (day, slot.to_string()))
                .collect(),
            duration_minutes: schedule.duration_minutes,
            session_ids: schedule.session_ids,
            created_at: schedule.created_at,
            updated_at: schedule.updated_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct SessionResponse {
    pub id: Uuid,
    pub schedule_id: Option<Uuid>,
    pub class_id: Uuid,
    pub teacher_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub status: String,
    pub meet_link: Option<String>,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        Self {
            id: session.id,
            schedule_id: session.schedule_id,
            class_id: session.class_id,
            teacher_id: session.teacher_id,
            starts_at: session.starts_at,
            duration_minutes: session.duration_minutes,
            status: session.status.as_str().to_string(),
            meet_link: session.meet_link,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct OccurrenceResponse {
    pub source_id: Uuid,
    pub name: String,
    pub starts_at: NaiveDateTime,
}

impl From<DayOccurrence> for OccurrenceResponse {
    fn from(occurrence: DayOccurrence) -> Self {
        Self {
            source_id: occurrence.source_id,
            name: occurrence.name,
            starts_at: occurrence.starts_at,
        }
    }
}

/// The month projection, keyed by ISO calendar day.
#[derive(Serialize, ToSchema)]
pub struct CalendarMonthResponse {
    pub days: BTreeMap<String, Vec<OccurrenceResponse>>,
}

#[derive(Deserialize, IntoParams)]
pub struct CalendarQuery {
    /// Displayed year.
    pub year: i32,
    /// Displayed month, 1-12.
    pub month: u32,
}

//=========================================================================================
// Shared helpers
//=========================================================================================

fn port_error_response(e: PortError) -> (StatusCode, String) {
    let status = match e {
        PortError::NotFound(_) => StatusCode::NOT_FOUND,
        PortError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        PortError::PermissionDenied => StatusCode::FORBIDDEN,
        PortError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

/// Schedule and class mutation is reserved for teachers and admins.
fn require_staff(auth: &AuthUser) -> Result<(), (StatusCode, String)> {
    match auth.role {
        Role::Teacher | Role::Admin => Ok(()),
        Role::Student => Err((StatusCode::FORBIDDEN, "Permission denied".to_string())),
    }
}

fn parse_time_slots(
    raw: &BTreeMap<DayOfWeek, String>,
) -> Result<BTreeMap<DayOfWeek, TimeOfDay>, (StatusCode, String)> {
    let mut slots = BTreeMap::new();
    for (day, slot) in raw {
        let slot: TimeOfDay = slot
            .parse()
            .map_err(|e: iqra_core::domain::InvalidValue| {
                (StatusCode::BAD_REQUEST, e.to_string())
            })?;
        slots.insert(*day, slot);
    }
    Ok(slots)
}

//=========================================================================================
// Class Handlers
//=========================================================================================

/// Create a class owned by the calling teacher.
#[utoipa::path(
    post,
    path = "/classes",
    request_body = CreateClassRequest,
    responses(
        (status = 201, description = "Class created", body = ClassResponse),
        (status = 403, description = "Caller is not a teacher or admin")
    )
)]
pub async fn create_class_handler(
    State(state): State<Arc<AppState>>,
    axum::Extension(auth): axum::Extension<AuthUser>,
    Json(req): Json<CreateClassRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    require_staff(&auth)?;

    let class = state
        .db
        .create_class(&req.name, auth.user_id)
        .await
        .map_err(|e| {
            error!("Failed to create class: {:?}", e);
            port_error_response(e)
        })?;

    Ok((StatusCode::CREATED, Json(ClassResponse::from(class))))
}

/// Fetch one class.
#[utoipa::path(
    get,
    path = "/classes/{id}",
    params(("id" = Uuid, Path, description = "Class id")),
    responses(
        (status = 200, description = "The class", body = ClassResponse),
        (status = 404, description = "Class not found")
    )
)]
pub async fn get_class_handler(
    State(state): State<Arc<AppState>>,
    Path(class_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let class = state
        .db
        .get_class(class_id)
        .await
        .map_err(port_error_response)?;
    Ok(Json(ClassResponse::from(class)))
}

/// Enroll a student in a class.
#[utoipa::path(
    post,
    path = "/classes/{id}/students",
    params(("id" = Uuid, Path, description = "Class id")),
    request_body = EnrollStudentRequest,
    responses(
        (status = 200, description = "Student enrolled"),
        (status = 403, description = "Caller is not a teacher or admin"),
        (status = 404, description = "Class not found")
    )
)]
pub async fn enroll_student_handler(
    State(state): State<Arc<AppState>>,
    axum::Extension(auth): axum::Extension<AuthUser>,
    Path(class_id): Path<Uuid>,
    Json(req): Json<EnrollStudentRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    require_staff(&auth)?;

    state
        .db
        .add_class_student(class_id, req.student_id)
        .await
        .map_err(|e| {
            error!("Failed to enroll student: {:?}", e);
            port_error_response(e)
        })?;
    Ok(StatusCode::OK)
}

//=========================================================================================
// Schedule Handlers
//=========================================================================================

/// Create a recurring schedule and materialize its sessions.
#[utoipa::path(
    post,
    path = "/schedules",
    request_body = CreateScheduleRequest,
    responses(
        (status = 201, description = "Schedule created with its sessions", body = CreateScheduleResponse),
        (status = 400, description = "Invalid recurrence definition"),
        (status = 403, description = "Caller is not a teacher or admin"),
        (status = 404, description = "Referenced class not found")
    )
)]
pub async fn create_schedule_handler(
    State(state): State<Arc<AppState>>,
    axum::Extension(auth): axum::Extension<AuthUser>,
    Json(req): Json<CreateScheduleRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    require_staff(&auth)?;

    let recurrence_pattern: RecurrencePattern = req
        .recurrence_pattern
        .parse()
        .map_err(|e: iqra_core::domain::InvalidValue| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let time_slots = parse_time_slots(&req.time_slots)?;

    let definition = NewSchedule {
        class_id: req.class_id,
        start_date: req.start_date,
        recurrence_pattern,
        days_of_week: req.days_of_week.iter().copied().collect(),
        time_slots,
        duration_minutes: req.duration_minutes,
    };

    let created = state
        .scheduling
        .create_schedule(definition)
        .await
        .map_err(port_error_response)?;

    Ok((
        StatusCode::CREATED,
        Json(CreateScheduleResponse {
            schedule_id: created.schedule_id,
            session_ids: created.session_ids,
        }),
    ))
}

/// List the schedules visible to the caller's role.
#[utoipa::path(
    get,
    path = "/schedules",
    responses(
        (status = 200, description = "Role-scoped schedules", body = [ScheduleResponse])
    )
)]
pub async fn list_schedules_handler(
    State(state): State<Arc<AppState>>,
    axum::Extension(auth): axum::Extension<AuthUser>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let schedules = state
        .scheduling
        .list_schedules(auth.user_id, auth.role)
        .await
        .map_err(port_error_response)?;
    let response: Vec<ScheduleResponse> =
        schedules.into_iter().map(ScheduleResponse::from).collect();
    Ok(Json(response))
}

/// Merge fields into a schedule. Existing sessions are not regenerated.
#[utoipa::path(
    patch,
    path = "/schedules/{id}",
    params(("id" = Uuid, Path, description = "Schedule id")),
    request_body = UpdateScheduleRequest,
    responses(
        (status = 200, description = "Schedule updated"),
        (status = 400, description = "Merged definition is invalid"),
        (status = 403, description = "Caller is not a teacher or admin"),
        (status = 404, description = "Schedule not found")
    )
)]
pub async fn update_schedule_handler(
    State(state): State<Arc<AppState>>,
    axum::Extension(auth): axum::Extension<AuthUser>,
    Path(schedule_id): Path<Uuid>,
    Json(req): Json<UpdateScheduleRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    require_staff(&auth)?;

    let recurrence_pattern = match &req.recurrence_pattern {
        Some(raw) => Some(raw.parse::<RecurrencePattern>().map_err(
            |e: iqra_core::domain::InvalidValue| (StatusCode::BAD_REQUEST, e.to_string()),
        )?),
        None => None,
    };
    let time_slots = match &req.time_slots {
        Some(raw) => Some(parse_time_slots(raw)?),
        None => None,
    };

    let update = ScheduleUpdate {
        start_date: req.start_date,
        recurrence_pattern,
        days_of_week: req.days_of_week.map(|days| days.into_iter().collect()),
        time_slots,
        duration_minutes: req.duration_minutes,
    };

    state
        .scheduling
        .update_schedule(schedule_id, update)
        .await
        .map_err(port_error_response)?;
    Ok(StatusCode::OK)
}

/// Change the template slot for one weekday of a schedule.
///
/// This moves the weekday's time going forward and re-times the next
/// upcoming session; it does not create a one-occurrence exception.
#[utoipa::path(
    put,
    path = "/schedules/{id}/slots/{day}",
    params(
        ("id" = Uuid, Path, description = "Schedule id"),
        ("day" = u8, Path, description = "Weekday index, Sunday = 0")
    ),
    request_body = UpdateSlotRequest,
    responses(
        (status = 200, description = "Slot updated"),
        (status = 400, description = "Invalid weekday or time"),
        (status = 403, description = "Caller is not a teacher or admin"),
        (status = 404, description = "Schedule not found")
    )
)]
pub async fn update_slot_handler(
    State(state): State<Arc<AppState>>,
    axum::Extension(auth): axum::Extension<AuthUser>,
    Path((schedule_id, day)): Path<(Uuid, DayOfWeek)>,
    Json(req): Json<UpdateSlotRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    require_staff(&auth)?;

    let slot: TimeOfDay = req
        .time_slot
        .parse()
        .map_err(|e: iqra_core::domain::InvalidValue| (StatusCode::BAD_REQUEST, e.to_string()))?;

    state
        .scheduling
        .update_weekday_slot(schedule_id, day, slot)
        .await
        .map_err(port_error_response)?;
    Ok(StatusCode::OK)
}

/// Delete a schedule together with its sessions.
#[utoipa::path(
    delete,
    path = "/schedules/{id}",
    params(("id" = Uuid, Path, description = "Schedule id")),
    responses(
        (status = 204, description = "Schedule deleted"),
        (status = 403, description = "Caller is not a teacher or admin"),
        (status = 404, description = "Schedule not found")
    )
)]
pub async fn delete_schedule_handler(
    State(state): State<Arc<AppState>>,
    axum::Extension(auth): axum::Extension<AuthUser>,
    Path(schedule_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    require_staff(&auth)?;

    state
        .scheduling
        .delete_schedule(schedule_id)
        .await
        .map_err(port_error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// List the sessions materialized from a schedule.
#[utoipa::path(
    get,
    path = "/schedules/{id}/sessions",
    params(("id" = Uuid, Path, description = "Schedule id")),
    responses(
        (status = 200, description = "Sessions in start order", body = [SessionResponse])
    )
)]
pub async fn list_schedule_sessions_handler(
    State(state): State<Arc<AppState>>,
    Path(schedule_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let sessions = state
        .db
        .sessions_for_schedule(schedule_id)
        .await
        .map_err(|e| {
            error!("Failed to list sessions: {:?}", e);
            port_error_response(e)
        })?;
    let response: Vec<SessionResponse> = sessions.into_iter().map(SessionResponse::from).collect();
    Ok(Json(response))
}

//=========================================================================================
// Calendar Handlers
//=========================================================================================

/// The caller's calendar for one displayed month.
#[utoipa::path(
    get,
    path = "/calendar",
    params(CalendarQuery),
    responses(
        (status = 200, description = "Occurrences keyed by calendar day", body = CalendarMonthResponse),
        (status = 400, description = "Invalid month")
    )
)]
pub async fn calendar_view_handler(
    State(state): State<Arc<AppState>>,
    axum::Extension(auth): axum::Extension<AuthUser>,
    Query(query): Query<CalendarQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if !(1..=12).contains(&query.month) {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("month {} out of range", query.month),
        ));
    }

    let view = state
        .scheduling
        .month_view(auth.user_id, auth.role, query.year, query.month)
        .await
        .map_err(port_error_response)?;

    let days = view
        .into_iter()
        .map(|(day, occurrences)| {
            (
                day.to_string(),
                occurrences
                    .into_iter()
                    .map(OccurrenceResponse::from)
                    .collect(),
            )
        })
        .collect();
    Ok(Json(CalendarMonthResponse { days }))
}

//=========================================================================================
// Session Handlers
//=========================================================================================

/// Live-session heartbeat: marks the session active and stamps its last
/// activity, which the inactivity sweep watches.
#[utoipa::path(
    post,
    path = "/sessions/{id}/activity",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Activity recorded"),
        (status = 404, description = "Session not found")
    )
)]
pub async fn session_activity_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state
        .db
        .record_session_activity(session_id, Utc::now())
        .await
        .map_err(|e| {
            error!("Failed to record session activity: {:?}", e);
            port_error_response(e)
        })?;
    Ok(StatusCode::OK)
}

//=========================================================================================
// Admin Handlers
//=========================================================================================

/// Refresh the calendar provider's access token.
#[utoipa::path(
    post,
    path = "/admin/calendar/token",
    responses(
        (status = 200, description = "Token refreshed"),
        (status = 403, description = "Caller is not an admin")
    )
)]
pub async fn refresh_calendar_token_handler(
    State(state): State<Arc<AppState>>,
    axum::Extension(auth): axum::Extension<AuthUser>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if auth.role != Role::Admin {
        return Err((StatusCode::FORBIDDEN, "Permission denied".to_string()));
    }

    state
        .calendar
        .refresh_access_token()
        .await
        .map_err(|e| {
            error!("Failed to refresh calendar token: {:?}", e);
            port_error_response(e)
        })?;
    Ok(StatusCode::OK)
}
