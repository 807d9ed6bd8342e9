//! Shared fixtures for the unit tests. Every test gets its own in-memory
//! database with the full migration set applied.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use diesel::r2d2::{self, ConnectionManager};
use diesel::SqliteConnection;
use diesel_migrations::MigrationHarness;

use crate::models::domain_models::{
    Contact, NewPayment, NewReminderSettings, NewUser, Payment, ReminderSettings, User,
};
use crate::repositories::contact_repository::ContactRepository;
use crate::repositories::message_repository::MessageRepository;
use crate::repositories::notification_repository::NotificationRepository;
use crate::repositories::payment_repository::PaymentRepository;
use crate::repositories::reminder_repository::ReminderRepository;
use crate::repositories::user_core::UserCore;
use crate::AppState;

static USER_SEQ: AtomicUsize = AtomicUsize::new(0);

/// A single-connection pool: every new connection to `:memory:` opens a
/// fresh empty database, so all queries have to share the one connection.
pub fn test_state() -> Arc<AppState> {
    let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
    let pool = r2d2::Pool::builder()
        .max_size(1)
        .build(manager)
        .expect("Failed to create test pool");
    {
        let mut conn = pool.get().expect("Failed to get DB connection");
        conn.run_pending_migrations(crate::MIGRATIONS)
            .expect("Failed to run migrations");
    }
    Arc::new(AppState {
        db_pool: pool.clone(),
        user_core: Arc::new(UserCore::new(pool.clone())),
        contact_repository: Arc::new(ContactRepository::new(pool.clone())),
        message_repository: Arc::new(MessageRepository::new(pool.clone())),
        payment_repository: Arc::new(PaymentRepository::new(pool.clone())),
        reminder_repository: Arc::new(ReminderRepository::new(pool.clone())),
        notification_repository: Arc::new(NotificationRepository::new(pool)),
    })
}

pub fn epoch_now() -> i32 {
    chrono::Utc::now().timestamp() as i32
}

pub fn seed_user(state: &Arc<AppState>) -> User {
    seed_user_with(state, |_| {})
}

pub fn seed_user_with(state: &Arc<AppState>, mutate: impl FnOnce(&mut NewUser)) -> User {
    let n = USER_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut new_user = NewUser {
        email: format!("owner{}@pagotrack.test", n),
        business_name: Some("Tienda Lima".to_string()),
        phone_number: Some("51999888777".to_string()),
        whatsapp_phone_number_id: None,
        auto_process_messages: true,
        created_at: epoch_now(),
    };
    mutate(&mut new_user);
    state.user_core.create_user(&new_user).expect("Failed to seed user")
}

/// Contact with no profile name, so the repository falls back to the phone.
pub fn seed_contact(state: &Arc<AppState>, user_id: i32, phone: &str) -> Contact {
    state
        .contact_repository
        .upsert_by_phone(user_id, phone, None, epoch_now())
        .expect("Failed to seed contact")
}

/// Writes the reminder policy for the user, starting from the defaults.
pub fn seed_settings(
    state: &Arc<AppState>,
    user_id: i32,
    mutate: impl FnOnce(&mut NewReminderSettings),
) {
    let mut settings = UserCore::default_settings(user_id, epoch_now());
    mutate(&mut settings);
    state
        .user_core
        .update_reminder_settings(user_id, &settings)
        .expect("Failed to seed reminder settings");
}

/// Pending payment row only. Contact aggregates are left untouched so
/// tests can control them explicitly.
pub fn seed_payment(
    state: &Arc<AppState>,
    user_id: i32,
    contact_id: i32,
    amount: f64,
    due_date: Option<&str>,
) -> Payment {
    let now = epoch_now();
    state
        .payment_repository
        .create_payment(&NewPayment {
            user_id,
            contact_id,
            message_id: None,
            amount,
            currency: "PEN".to_string(),
            status: "pending".to_string(),
            method: None,
            reference_number: None,
            payment_date: None,
            confidence: None,
            due_date: due_date.map(|d| d.to_string()),
            created_at: now,
            updated_at: now,
        })
        .expect("Failed to seed payment")
}

/// In-memory settings row for tests that never touch the database.
pub fn settings_template(user_id: i32) -> ReminderSettings {
    ReminderSettings {
        id: 1,
        user_id,
        auto_remind_enabled: true,
        days_before: "[3,1]".to_string(),
        remind_on_due_date: true,
        days_after: "[1,3,7]".to_string(),
        preferred_hour: 9,
        timezone: "America/Lima".to_string(),
        whatsapp_enabled: true,
        email_enabled: false,
        template_before: None,
        template_on_due: None,
        template_after: None,
        updated_at: 1_718_000_000,
    }
}
