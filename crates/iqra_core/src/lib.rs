pub mod domain;
pub mod janitor;
pub mod ports;
pub mod projection;
pub mod recurrence;
pub mod scheduling;

#[cfg(test)]
pub(crate) mod test_support;

pub use domain::{
    CalendarEntry, Class, CleanupRun, CreatedSchedule, DayOfWeek, NewSchedule, NewSession,
    Recording, RecurrencePattern, Role, Schedule, ScheduleUpdate, Session, SessionStatus,
    TimeOfDay, User, UserCredentials,
};
pub use janitor::Janitor;
pub use ports::{
    CalendarEvent, CalendarService, DatabaseService, EventChange, EventDetails, PortError,
    PortResult, QueryScope,
};
pub use projection::{project_month, DayOccurrence};
pub use scheduling::SchedulingService;
