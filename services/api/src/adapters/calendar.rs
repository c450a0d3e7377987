//! services/api/src/adapters/calendar.rs
//!
//! Placeholder implementation of the `CalendarService` port. It hands back
//! synthetic event ids and meeting links so the scheduling flow is complete
//! end-to-end; a real OAuth-backed Google Calendar client would slot in
//! behind the same port.

use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use iqra_core::ports::{CalendarEvent, CalendarService, EventChange, EventDetails, PortResult};

/// The calendar permissions a real client would request when refreshing its
/// access token.
pub const CALENDAR_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/calendar.events",
    "https://www.googleapis.com/auth/calendar.readonly",
];

/// A calendar adapter that fabricates provider responses.
#[derive(Clone, Default)]
pub struct StubCalendarAdapter;

impl StubCalendarAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CalendarService for StubCalendarAdapter {
    async fn create_event(&self, details: &EventDetails) -> PortResult<CalendarEvent> {
        let token = Uuid::new_v4().simple().to_string();
        let event = CalendarEvent {
            event_id: format!("evt-{}", token),
            meet_link: format!(
                "https://meet.google.com/{}-{}-{}",
                &token[..3],
                &token[3..7],
                &token[7..10]
            ),
        };
        debug!(
            "Created stub calendar event {} for '{}' at {}",
            event.event_id, details.summary, details.starts_at
        );
        Ok(event)
    }

    async fn update_event(&self, event_id: &str, change: &EventChange) -> PortResult<()> {
        debug!("Updated stub calendar event {}: {:?}", event_id, change);
        Ok(())
    }

    async fn delete_event(&self, event_id: &str) -> PortResult<()> {
        debug!("Deleted stub calendar event {}", event_id);
        Ok(())
    }

    async fn refresh_access_token(&self) -> PortResult<()> {
        info!(
            "Stub calendar token refresh requested for scopes {:?}",
            CALENDAR_SCOPES
        );
        Ok(())
    }
}
