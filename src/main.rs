use dotenvy::dotenv;
use axum::{
    routing::{get, post, put},
    Router,
    middleware
};
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tower_http::cors::{CorsLayer, AllowOrigin};
use tower_http::trace::{TraceLayer, DefaultMakeSpan, DefaultOnResponse};
use tracing::Level;
use std::sync::Arc;
use sentry;
mod handlers {
    pub mod contact_handlers;
    pub mod internal_middleware;
    pub mod notification_handlers;
    pub mod payment_handlers;
    pub mod reminder_handlers;
    pub mod settings_handlers;
}
mod utils {
    pub mod email_utils;
    pub mod intent_classifier;
    pub mod reminder_scheduler;
    pub mod reminder_templates;
}
mod api {
    pub mod whatsapp_api;
    pub mod whatsapp_webhook;
}
mod error;
mod models {
    pub mod domain_models;
}
mod repositories {
    pub mod contact_repository;
    pub mod message_repository;
    pub mod notification_repository;
    pub mod payment_repository;
    pub mod reminder_repository;
    pub mod user_core;
}
mod schema;
mod jobs {
    pub mod reminder_dispatcher;
    pub mod scheduler;
}
#[cfg(test)]
mod test_utils;
use repositories::contact_repository::ContactRepository;
use repositories::message_repository::MessageRepository;
use repositories::notification_repository::NotificationRepository;
use repositories::payment_repository::PaymentRepository;
use repositories::reminder_repository::ReminderRepository;
use repositories::user_core::UserCore;
use handlers::{
    contact_handlers, internal_middleware, notification_handlers, payment_handlers,
    reminder_handlers, settings_handlers,
};
use api::whatsapp_webhook;
type DbPool = r2d2::Pool<ConnectionManager<SqliteConnection>>;
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();
async fn health_check() -> &'static str {
    "OK"
}
pub struct AppState {
    db_pool: DbPool,
    user_core: Arc<UserCore>,
    contact_repository: Arc<ContactRepository>,
    message_repository: Arc<MessageRepository>,
    payment_repository: Arc<PaymentRepository>,
    reminder_repository: Arc<ReminderRepository>,
    notification_repository: Arc<NotificationRepository>,
}
pub fn validate_env() {
    let required_vars = [
        "DATABASE_URL", "WHATSAPP_ACCESS_TOKEN", "WHATSAPP_VERIFY_TOKEN",
        "OPENROUTER_API_KEY", "INTERNAL_API_SECRET",
    ];
    for var in required_vars.iter() {
        std::env::var(var).expect(&format!("{} must be set", var));
    }
}
#[tokio::main]
async fn main() {
    dotenv().ok();
    let _guard = std::env::var("SENTRY_DSN").ok().map(|dsn| {
        sentry::init((dsn, sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        }))
    });
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pagotrack=debug"));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .init();
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set in environment");
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    let pool = r2d2::Pool::builder()
        .build(manager)
        .expect("Failed to create pool");
    {
        let mut conn = pool.get().expect("Failed to get DB connection");
        conn.run_pending_migrations(MIGRATIONS)
            .expect("Failed to run migrations");
    }
    let user_core = Arc::new(UserCore::new(pool.clone()));
    let contact_repository = Arc::new(ContactRepository::new(pool.clone()));
    let message_repository = Arc::new(MessageRepository::new(pool.clone()));
    let payment_repository = Arc::new(PaymentRepository::new(pool.clone()));
    let reminder_repository = Arc::new(ReminderRepository::new(pool.clone()));
    let notification_repository = Arc::new(NotificationRepository::new(pool.clone()));
    let state = Arc::new(AppState {
        db_pool: pool,
        user_core,
        contact_repository,
        message_repository,
        payment_repository,
        reminder_repository,
        notification_repository,
    });
    let webhook_routes = Router::new()
        .route("/api/webhooks/whatsapp", get(whatsapp_webhook::verify_webhook).post(whatsapp_webhook::receive_webhook));
    let internal_routes = Router::new()
        .route("/api/internal/reminders/schedule", post(reminder_handlers::schedule_reminders))
        .route("/api/internal/reminders/dispatch", post(reminder_handlers::dispatch_reminders))
        .route_layer(middleware::from_fn(internal_middleware::require_internal_secret));
    let dashboard_routes = Router::new()
        .route("/api/payments", post(payment_handlers::create_payment))
        .route("/api/payments/{payment_id}/confirm", post(payment_handlers::confirm_payment))
        .route("/api/payments/{payment_id}/reject", post(payment_handlers::reject_payment))
        .route("/api/payments/{payment_id}/cancel", post(payment_handlers::cancel_payment))
        .route("/api/payments/{payment_id}/due-date", put(payment_handlers::set_payment_due_date))
        .route("/api/promises/{promise_id}/fulfill", post(payment_handlers::fulfill_promise))
        .route("/api/promises/{promise_id}/expire", post(payment_handlers::expire_promise))
        .route("/api/reminders/{reminder_id}/cancel", post(reminder_handlers::cancel_reminder))
        .route("/api/notifications/{notification_id}/read", post(notification_handlers::mark_notification_read))
        .route("/api/users/{user_id}/payments", get(payment_handlers::list_payments))
        .route("/api/users/{user_id}/promises", get(payment_handlers::list_promises))
        .route("/api/users/{user_id}/reminders", get(reminder_handlers::list_reminders))
        .route("/api/users/{user_id}/contacts", get(contact_handlers::list_contacts))
        .route("/api/users/{user_id}/contacts/{contact_id}/messages", get(contact_handlers::list_contact_messages))
        .route("/api/users/{user_id}/notifications", get(notification_handlers::list_notifications))
        .route("/api/users/{user_id}/settings/reminders", get(settings_handlers::get_reminder_settings).put(settings_handlers::update_reminder_settings));
    let app = Router::new()
        .merge(webhook_routes)
        .merge(internal_routes)
        .merge(dashboard_routes)
        .route("/api/health", get(health_check))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO))
        )
        .layer(
            CorsLayer::new()
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST, axum::http::Method::PUT, axum::http::Method::OPTIONS])
                .allow_origin(AllowOrigin::exact(std::env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:8080".to_string()).parse().expect("Invalid FRONTEND_URL")))
                .allow_headers([
                    axum::http::header::CONTENT_TYPE,
                    axum::http::header::AUTHORIZATION,
                    axum::http::header::ACCEPT,
                ])
                .allow_credentials(true)
        )
        .with_state(state.clone());
    let state_for_scheduler = state.clone();
    tokio::spawn(async move {
        if let Err(e) = jobs::scheduler::start_scheduler(state_for_scheduler).await {
            tracing::error!("Failed to start reminder scheduler: {}", e);
        }
    });
    use tokio::net::TcpListener;
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);
    validate_env();
    tracing::info!("Starting server on port {}", port);
    let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await.unwrap();
    axum::serve(listener, app.into_make_service()).await.unwrap();
}
