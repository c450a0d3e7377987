//! crates/iqra_core/src/scheduling.rs
//!
//! Orchestrates schedule and session persistence against the database and
//! calendar ports: creation with recurrence expansion, partial updates,
//! weekday slot edits, deletion, role-scoped listing, and the month view.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, TimeZone, Utc};
use tracing::{error, warn};
use uuid::Uuid;

use crate::domain::{
    CalendarEntry, CreatedSchedule, DayOfWeek, NewSchedule, NewSession, Role, Schedule,
    ScheduleUpdate, TimeOfDay,
};
use crate::ports::{
    CalendarService, DatabaseService, EventChange, EventDetails, PortError, PortResult,
    QueryScope,
};
use crate::projection::{project_month, DayOccurrence};
use crate::recurrence::{expand, HORIZON_WEEKS};

/// Schedule and session orchestration over the database and calendar ports.
/// Constructed once at startup with its collaborators injected.
#[derive(Clone)]
pub struct SchedulingService {
    db: Arc<dyn DatabaseService>,
    calendar: Arc<dyn CalendarService>,
}

impl SchedulingService {
    pub fn new(db: Arc<dyn DatabaseService>, calendar: Arc<dyn CalendarService>) -> Self {
        Self { db, calendar }
    }

    /// Creates a schedule and materializes its sessions across the fixed
    /// horizon, one calendar event per occurrence.
    pub async fn create_schedule(&self, definition: NewSchedule) -> PortResult<CreatedSchedule> {
        match self.create_schedule_inner(definition).await {
            Ok(created) => Ok(created),
            Err(e) => {
                error!("Failed to create schedule: {:?}", e);
                Err(e)
            }
        }
    }

    async fn create_schedule_inner(
        &self,
        definition: NewSchedule,
    ) -> PortResult<CreatedSchedule> {
        validate_recurrence(
            &definition.days_of_week,
            &definition.time_slots,
            definition.duration_minutes,
        )?;

        let class = self.db.get_class(definition.class_id).await?;
        let schedule = self.db.insert_schedule(&definition, class.teacher_id).await?;

        let occurrences = expand(
            definition.start_date,
            &definition.days_of_week,
            &definition.time_slots,
            HORIZON_WEEKS,
            definition.recurrence_pattern,
        );

        // The loop is not wrapped per-occurrence: a calendar or store failure
        // aborts the remaining batch, leaving the schedule with the sessions
        // created so far and an empty session list.
        let mut session_ids = Vec::with_capacity(occurrences.len());
        for at in occurrences {
            let starts_at = Utc.from_utc_datetime(&at);
            let event = self
                .calendar
                .create_event(&EventDetails {
                    summary: class.name.clone(),
                    starts_at,
                    duration_minutes: definition.duration_minutes,
                })
                .await?;
            let session = self
                .db
                .insert_session(&NewSession {
                    schedule_id: Some(schedule.id),
                    class_id: class.id,
                    teacher_id: class.teacher_id,
                    starts_at,
                    duration_minutes: definition.duration_minutes,
                    event_id: Some(event.event_id),
                    meet_link: Some(event.meet_link),
                })
                .await?;
            session_ids.push(session.id);
        }

        self.db
            .set_schedule_sessions(schedule.id, &session_ids)
            .await?;

        Ok(CreatedSchedule {
            schedule_id: schedule.id,
            session_ids,
        })
    }

    /// Merges the provided fields into the schedule and stamps `updated_at`.
    /// Expansion is never re-run; existing sessions keep their dates and
    /// durations.
    pub async fn update_schedule(
        &self,
        schedule_id: Uuid,
        update: ScheduleUpdate,
    ) -> PortResult<()> {
        let mut schedule = self.db.get_schedule(schedule_id).await.map_err(|e| {
            error!("Failed to load schedule {} for update: {:?}", schedule_id, e);
            e
        })?;

        if let Some(start_date) = update.start_date {
            schedule.start_date = start_date;
        }
        if let Some(pattern) = update.recurrence_pattern {
            schedule.recurrence_pattern = pattern;
        }
        if let Some(days_of_week) = update.days_of_week {
            schedule.days_of_week = days_of_week;
        }
        if let Some(time_slots) = update.time_slots {
            schedule.time_slots = time_slots;
        }
        if let Some(duration_minutes) = update.duration_minutes {
            schedule.duration_minutes = duration_minutes;
        }

        validate_recurrence(
            &schedule.days_of_week,
            &schedule.time_slots,
            schedule.duration_minutes,
        )?;

        schedule.updated_at = Utc::now();
        self.db.update_schedule(&schedule).await.map_err(|e| {
            error!("Failed to update schedule {}: {:?}", schedule_id, e);
            e
        })
    }

    /// Overwrites one weekday's template slot. This changes the slot for
    /// that weekday going forward, not just one occurrence; the next
    /// upcoming session on the weekday is re-timed along with its linked
    /// calendar event.
    pub async fn update_weekday_slot(
        &self,
        schedule_id: Uuid,
        day: DayOfWeek,
        slot: TimeOfDay,
    ) -> PortResult<()> {
        match self.update_weekday_slot_inner(schedule_id, day, slot).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(
                    "Failed to update weekday {} of schedule {}: {:?}",
                    day, schedule_id, e
                );
                Err(e)
            }
        }
    }

    async fn update_weekday_slot_inner(
        &self,
        schedule_id: Uuid,
        day: DayOfWeek,
        slot: TimeOfDay,
    ) -> PortResult<()> {
        let mut schedule = self.db.get_schedule(schedule_id).await?;
        if !schedule.days_of_week.contains(&day) {
            return Err(PortError::InvalidArgument(format!(
                "schedule has no weekday {}",
                day
            )));
        }

        schedule.time_slots.insert(day, slot);
        schedule.updated_at = Utc::now();
        self.db.update_schedule(&schedule).await?;

        let now = Utc::now();
        let sessions = self.db.sessions_for_schedule(schedule_id).await?;
        let upcoming = sessions
            .iter()
            .filter(|s| s.starts_at >= now)
            .find(|s| s.starts_at.weekday().num_days_from_sunday() as DayOfWeek == day);
        if let Some(session) = upcoming {
            let date = session.starts_at.date_naive();
            if let Some(at) = date.and_hms_opt(slot.hour().into(), slot.minute().into(), 0) {
                let starts_at = Utc.from_utc_datetime(&at);
                self.db.reschedule_session(session.id, starts_at).await?;
                if let Some(event_id) = &session.event_id {
                    self.calendar
                        .update_event(
                            event_id,
                            &EventChange {
                                starts_at: Some(starts_at),
                                ..EventChange::default()
                            },
                        )
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Deletes a schedule together with its sessions. Calendar events are
    /// removed best-effort; a provider failure does not block the store
    /// delete.
    pub async fn delete_schedule(&self, schedule_id: Uuid) -> PortResult<()> {
        match self.delete_schedule_inner(schedule_id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("Failed to delete schedule {}: {:?}", schedule_id, e);
                Err(e)
            }
        }
    }

    async fn delete_schedule_inner(&self, schedule_id: Uuid) -> PortResult<()> {
        let schedule = self.db.get_schedule(schedule_id).await?;
        let sessions = self.db.sessions_for_schedule(schedule.id).await?;

        for session in &sessions {
            if let Some(event_id) = &session.event_id {
                if let Err(e) = self.calendar.delete_event(event_id).await {
                    warn!("Failed to delete calendar event {}: {:?}", event_id, e);
                }
            }
        }

        let session_ids: Vec<Uuid> = sessions.iter().map(|s| s.id).collect();
        if !session_ids.is_empty() {
            self.db.delete_sessions(&session_ids).await?;
        }
        self.db.delete_schedule(schedule.id).await
    }

    /// Role-scoped listing: teachers see their own schedules, students the
    /// schedules of classes they are enrolled in, admins everything.
    pub async fn list_schedules(&self, user_id: Uuid, role: Role) -> PortResult<Vec<Schedule>> {
        let Some(scope) = self.scope_for(user_id, role).await? else {
            return Ok(Vec::new());
        };
        self.db.schedules_in(&scope).await.map_err(|e| {
            error!("Failed to list schedules for {}: {:?}", user_id, e);
            e
        })
    }

    /// The day -> occurrences index for one displayed month, built from the
    /// caller's role-scoped schedules and one-off sessions.
    pub async fn month_view(
        &self,
        user_id: Uuid,
        role: Role,
        year: i32,
        month: u32,
    ) -> PortResult<BTreeMap<NaiveDate, Vec<DayOccurrence>>> {
        let Some(scope) = self.scope_for(user_id, role).await? else {
            return Ok(BTreeMap::new());
        };

        let schedules = self.db.schedules_in(&scope).await?;
        let one_offs = self.db.one_off_sessions_in(&scope).await?;

        let mut class_ids: Vec<Uuid> = schedules
            .iter()
            .map(|s| s.class_id)
            .chain(one_offs.iter().map(|s| s.class_id))
            .collect();
        class_ids.sort_unstable();
        class_ids.dedup();
        let class_names: HashMap<Uuid, String> = if class_ids.is_empty() {
            HashMap::new()
        } else {
            self.db
                .classes_by_ids(&class_ids)
                .await?
                .into_iter()
                .map(|c| (c.id, c.name))
                .collect()
        };

        let mut entries = Vec::with_capacity(schedules.len() + one_offs.len());
        for schedule in schedules {
            entries.push(CalendarEntry::Recurring {
                schedule_id: schedule.id,
                name: class_names.get(&schedule.class_id).cloned(),
                days_of_week: schedule.days_of_week,
                time_slots: schedule.time_slots,
            });
        }
        for session in one_offs {
            entries.push(CalendarEntry::SingleDate {
                session_id: session.id,
                name: class_names.get(&session.class_id).cloned(),
                starts_at: session.starts_at,
            });
        }

        Ok(project_month(&entries, year, month))
    }

    /// Resolves a role to a store query scope. `None` means the caller can
    /// see nothing and no collection query should be issued at all.
    async fn scope_for(&self, user_id: Uuid, role: Role) -> PortResult<Option<QueryScope>> {
        match role {
            Role::Teacher => Ok(Some(QueryScope::Teacher(user_id))),
            Role::Admin => Ok(Some(QueryScope::All)),
            Role::Student => {
                let class_ids = self.db.class_ids_for_student(user_id).await?;
                if class_ids.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(QueryScope::Classes(class_ids)))
                }
            }
        }
    }
}

/// The cross-field invariant of a recurrence definition: a non-empty weekday
/// set, every weekday in range and holding a slot, and a positive duration.
fn validate_recurrence(
    days_of_week: &BTreeSet<DayOfWeek>,
    time_slots: &BTreeMap<DayOfWeek, TimeOfDay>,
    duration_minutes: u32,
) -> PortResult<()> {
    if days_of_week.is_empty() {
        return Err(PortError::InvalidArgument(
            "days_of_week must not be empty".to_string(),
        ));
    }
    for day in days_of_week {
        if *day > 6 {
            return Err(PortError::InvalidArgument(format!(
                "invalid weekday index {}",
                day
            )));
        }
        if !time_slots.contains_key(day) {
            return Err(PortError::InvalidArgument(format!(
                "weekday {} has no time slot",
                day
            )));
        }
    }
    if duration_minutes == 0 {
        return Err(PortError::InvalidArgument(
            "duration_minutes must be positive".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RecurrencePattern;
    use crate::test_support::{make_session, InMemoryDb, TestCalendar};
    use chrono::Duration;
    use std::sync::atomic::Ordering;

    fn definition(class_id: Uuid) -> NewSchedule {
        NewSchedule {
            class_id,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            recurrence_pattern: RecurrencePattern::Weekly,
            days_of_week: [1, 3].into_iter().collect(),
            time_slots: [(1u8, "09:00".parse().unwrap()), (3u8, "14:00".parse().unwrap())]
                .into_iter()
                .collect(),
            duration_minutes: 60,
        }
    }

    fn service(db: Arc<InMemoryDb>, calendar: Arc<TestCalendar>) -> SchedulingService {
        SchedulingService::new(db, calendar)
    }

    #[tokio::test]
    async fn create_schedule_materializes_the_full_horizon() {
        let db = Arc::new(InMemoryDb::new());
        let calendar = Arc::new(TestCalendar::new());
        let class = db.add_class("Tajweed", Uuid::new_v4(), Vec::new());
        let svc = service(db.clone(), calendar.clone());

        let created = svc.create_schedule(definition(class.id)).await.unwrap();

        assert_eq!(created.session_ids.len(), 24);
        let schedule = db.get_schedule_sync(created.schedule_id).unwrap();
        assert_eq!(schedule.session_ids, created.session_ids);
        assert_eq!(schedule.teacher_id, class.teacher_id);

        let first = db.get_session_sync(created.session_ids[0]).unwrap();
        let second = db.get_session_sync(created.session_ids[1]).unwrap();
        assert_eq!(
            first.starts_at,
            Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()
        );
        assert_eq!(
            second.starts_at,
            Utc.with_ymd_and_hms(2024, 1, 3, 14, 0, 0).unwrap()
        );
        assert!(first.event_id.is_some());
        assert!(first.meet_link.is_some());
        assert_eq!(calendar.created.lock().unwrap().len(), 24);
    }

    #[tokio::test]
    async fn create_schedule_requires_an_existing_class() {
        let db = Arc::new(InMemoryDb::new());
        let svc = service(db, Arc::new(TestCalendar::new()));

        let err = svc.create_schedule(definition(Uuid::new_v4())).await;
        assert!(matches!(err, Err(PortError::NotFound(_))));
    }

    #[tokio::test]
    async fn create_schedule_rejects_a_weekday_without_a_slot() {
        let db = Arc::new(InMemoryDb::new());
        let class = db.add_class("Tajweed", Uuid::new_v4(), Vec::new());
        let svc = service(db, Arc::new(TestCalendar::new()));

        let mut def = definition(class.id);
        def.days_of_week.insert(5);
        let err = svc.create_schedule(def).await;
        assert!(matches!(err, Err(PortError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn create_schedule_rejects_an_empty_weekday_set() {
        let db = Arc::new(InMemoryDb::new());
        let class = db.add_class("Tajweed", Uuid::new_v4(), Vec::new());
        let svc = service(db, Arc::new(TestCalendar::new()));

        let mut def = definition(class.id);
        def.days_of_week.clear();
        def.time_slots.clear();
        let err = svc.create_schedule(def).await;
        assert!(matches!(err, Err(PortError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn calendar_failure_mid_loop_leaves_partial_state() {
        let db = Arc::new(InMemoryDb::new());
        let calendar = Arc::new(TestCalendar::failing_after(5));
        let class = db.add_class("Tajweed", Uuid::new_v4(), Vec::new());
        let svc = service(db.clone(), calendar);

        let err = svc.create_schedule(definition(class.id)).await;
        assert!(matches!(err, Err(PortError::Unexpected(_))));

        // The schedule row exists with the sessions created before the
        // failure, and the session list was never back-filled.
        assert_eq!(db.session_count(), 5);
        let schedules = db
            .schedules_in(&QueryScope::All)
            .await
            .unwrap();
        assert_eq!(schedules.len(), 1);
        assert!(schedules[0].session_ids.is_empty());
    }

    #[tokio::test]
    async fn update_schedule_merges_and_validates() {
        let db = Arc::new(InMemoryDb::new());
        let class = db.add_class("Tajweed", Uuid::new_v4(), Vec::new());
        let svc = service(db.clone(), Arc::new(TestCalendar::new()));
        let created = svc.create_schedule(definition(class.id)).await.unwrap();

        svc.update_schedule(
            created.schedule_id,
            ScheduleUpdate {
                duration_minutes: Some(45),
                ..ScheduleUpdate::default()
            },
        )
        .await
        .unwrap();
        let schedule = db.get_schedule_sync(created.schedule_id).unwrap();
        assert_eq!(schedule.duration_minutes, 45);

        // Dropping a weekday's slot while keeping the weekday violates the
        // cross-field invariant.
        let err = svc
            .update_schedule(
                created.schedule_id,
                ScheduleUpdate {
                    time_slots: Some([(1u8, "10:00".parse().unwrap())].into_iter().collect()),
                    ..ScheduleUpdate::default()
                },
            )
            .await;
        assert!(matches!(err, Err(PortError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn update_schedule_does_not_touch_existing_sessions() {
        let db = Arc::new(InMemoryDb::new());
        let class = db.add_class("Tajweed", Uuid::new_v4(), Vec::new());
        let svc = service(db.clone(), Arc::new(TestCalendar::new()));
        let created = svc.create_schedule(definition(class.id)).await.unwrap();

        svc.update_schedule(
            created.schedule_id,
            ScheduleUpdate {
                duration_minutes: Some(90),
                ..ScheduleUpdate::default()
            },
        )
        .await
        .unwrap();

        let first = db.get_session_sync(created.session_ids[0]).unwrap();
        assert_eq!(first.duration_minutes, 60);
    }

    #[tokio::test]
    async fn weekday_slot_edit_rewrites_the_template_and_next_session() {
        let db = Arc::new(InMemoryDb::new());
        let calendar = Arc::new(TestCalendar::new());
        let class = db.add_class("Tajweed", Uuid::new_v4(), Vec::new());
        let svc = service(db.clone(), calendar.clone());

        // Start the schedule far enough in the future that every session is
        // upcoming.
        let mut def = definition(class.id);
        def.start_date = (Utc::now() + Duration::weeks(2)).date_naive();
        let created = svc.create_schedule(def).await.unwrap();

        let new_slot: TimeOfDay = "11:30".parse().unwrap();
        svc.update_weekday_slot(created.schedule_id, 3, new_slot)
            .await
            .unwrap();

        let schedule = db.get_schedule_sync(created.schedule_id).unwrap();
        assert_eq!(schedule.time_slots.get(&3), Some(&new_slot));

        // The earliest upcoming Wednesday session moved to the new time and
        // its calendar event was updated.
        let sessions = db.sessions_for_schedule(created.schedule_id).await.unwrap();
        let wednesday = sessions
            .iter()
            .find(|s| s.starts_at.weekday().num_days_from_sunday() == 3)
            .unwrap();
        assert_eq!(wednesday.starts_at.format("%H:%M").to_string(), "11:30");
        assert_eq!(calendar.updated.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn weekday_slot_edit_rejects_an_unscheduled_weekday() {
        let db = Arc::new(InMemoryDb::new());
        let class = db.add_class("Tajweed", Uuid::new_v4(), Vec::new());
        let svc = service(db.clone(), Arc::new(TestCalendar::new()));
        let created = svc.create_schedule(definition(class.id)).await.unwrap();

        let err = svc
            .update_weekday_slot(created.schedule_id, 5, "10:00".parse().unwrap())
            .await;
        assert!(matches!(err, Err(PortError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn delete_schedule_cascades_to_sessions_and_events() {
        let db = Arc::new(InMemoryDb::new());
        let calendar = Arc::new(TestCalendar::new());
        let class = db.add_class("Tajweed", Uuid::new_v4(), Vec::new());
        let svc = service(db.clone(), calendar.clone());
        let created = svc.create_schedule(definition(class.id)).await.unwrap();

        svc.delete_schedule(created.schedule_id).await.unwrap();

        assert!(db.get_schedule_sync(created.schedule_id).is_none());
        assert_eq!(db.session_count(), 0);
        assert_eq!(calendar.deleted.lock().unwrap().len(), 24);
    }

    #[tokio::test]
    async fn list_schedules_scopes_by_role() {
        let db = Arc::new(InMemoryDb::new());
        let teacher_a = Uuid::new_v4();
        let teacher_b = Uuid::new_v4();
        let student = Uuid::new_v4();
        let class_a = db.add_class("Tajweed", teacher_a, vec![student]);
        let class_b = db.add_class("Hifz", teacher_b, Vec::new());
        let svc = service(db.clone(), Arc::new(TestCalendar::new()));

        svc.create_schedule(definition(class_a.id)).await.unwrap();
        svc.create_schedule(definition(class_b.id)).await.unwrap();

        let for_teacher = svc.list_schedules(teacher_a, Role::Teacher).await.unwrap();
        assert_eq!(for_teacher.len(), 1);
        assert_eq!(for_teacher[0].class_id, class_a.id);

        let for_student = svc.list_schedules(student, Role::Student).await.unwrap();
        assert_eq!(for_student.len(), 1);
        assert_eq!(for_student[0].class_id, class_a.id);

        let for_admin = svc.list_schedules(student, Role::Admin).await.unwrap();
        assert_eq!(for_admin.len(), 2);
    }

    #[tokio::test]
    async fn unenrolled_student_short_circuits_without_a_schedule_query() {
        let db = Arc::new(InMemoryDb::new());
        let svc = service(db.clone(), Arc::new(TestCalendar::new()));

        let schedules = svc
            .list_schedules(Uuid::new_v4(), Role::Student)
            .await
            .unwrap();

        assert!(schedules.is_empty());
        assert_eq!(db.schedule_queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn month_view_projects_schedules_and_one_offs() {
        let db = Arc::new(InMemoryDb::new());
        let teacher = Uuid::new_v4();
        let class = db.add_class("Tajweed", teacher, Vec::new());
        let svc = service(db.clone(), Arc::new(TestCalendar::new()));
        svc.create_schedule(definition(class.id)).await.unwrap();

        db.add_session(make_session(
            None,
            class.id,
            teacher,
            Utc.with_ymd_and_hms(2024, 1, 6, 10, 0, 0).unwrap(),
            crate::domain::SessionStatus::Scheduled,
            None,
        ));

        let view = svc.month_view(teacher, Role::Teacher, 2024, 1).await.unwrap();

        // January 2024: Mondays 1/8/15/22/29 and Wednesdays 3/10/17/24/31,
        // plus the one-off on Saturday the 6th.
        assert_eq!(view.len(), 11);
        let saturday = NaiveDate::from_ymd_opt(2024, 1, 6).unwrap();
        assert_eq!(view[&saturday].len(), 1);
        assert_eq!(view[&saturday][0].name, "Tajweed");
        let monday = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(
            view[&monday][0].starts_at,
            monday.and_hms_opt(9, 0, 0).unwrap()
        );
    }
}
