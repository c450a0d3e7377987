//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use std::sync::Arc;

use iqra_core::ports::{CalendarService, DatabaseService};
use iqra_core::scheduling::SchedulingService;

use crate::config::Config;

/// The shared application state, created once at startup and passed to all
/// handlers. Every collaborator sits behind a port trait so adapters can be
/// swapped without touching the web layer.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn DatabaseService>,
    pub calendar: Arc<dyn CalendarService>,
    pub scheduling: SchedulingService,
    pub config: Arc<Config>,
}
