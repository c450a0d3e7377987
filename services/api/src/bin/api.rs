//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{calendar::StubCalendarAdapter, db::DbAdapter},
    config::Config,
    error::ApiError,
    sweeper,
    web::{
        auth::{assign_role_handler, login_handler, logout_handler, signup_handler},
        middleware::require_auth,
        rest::{
            calendar_view_handler, create_class_handler, create_schedule_handler,
            delete_schedule_handler, enroll_student_handler, get_class_handler,
            list_schedule_sessions_handler, list_schedules_handler,
            refresh_calendar_token_handler, session_activity_handler, update_schedule_handler,
            update_slot_handler, ApiDoc,
        },
        state::AppState,
    },
};
use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{delete, get, patch, post, put},
    Router,
};
use iqra_core::{janitor::Janitor, scheduling::SchedulingService};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool.clone()));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters & Core Services ---
    let calendar_adapter = Arc::new(StubCalendarAdapter::new());
    let scheduling = SchedulingService::new(db_adapter.clone(), calendar_adapter.clone());
    let janitor = Janitor::new(db_adapter.clone());

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        db: db_adapter,
        calendar: calendar_adapter,
        scheduling,
        config: config.clone(),
    });

    // --- 5. Start the Session Sweeper ---
    let shutdown = CancellationToken::new();
    let sweeper_handle = tokio::spawn(sweeper::run(janitor, shutdown.clone()));

    let cors = CorsLayer::new()
        .allow_origin("http://localhost:3000".parse::<HeaderValue>().unwrap())
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // --- 6. Create the Web Router ---
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/auth/signup", post(signup_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/classes", post(create_class_handler))
        .route("/classes/{id}", get(get_class_handler))
        .route("/classes/{id}/students", post(enroll_student_handler))
        .route(
            "/schedules",
            post(create_schedule_handler).get(list_schedules_handler),
        )
        .route(
            "/schedules/{id}",
            patch(update_schedule_handler).delete(delete_schedule_handler),
        )
        .route("/schedules/{id}/slots/{day}", put(update_slot_handler))
        .route("/schedules/{id}/sessions", get(list_schedule_sessions_handler))
        .route("/calendar", get(calendar_view_handler))
        .route("/sessions/{id}/activity", post(session_activity_handler))
        .route("/admin/roles", post(assign_role_handler))
        .route("/admin/calendar/token", post(refresh_calendar_token_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    // Combine API routes
    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete
    // application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    // --- 8. Stop the Sweeper ---
    shutdown.cancel();
    let _ = sweeper_handle.await;

    Ok(())
}
