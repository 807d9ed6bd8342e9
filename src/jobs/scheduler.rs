use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::jobs::reminder_dispatcher::{self, DISPATCH_BATCH_LIMIT};
use crate::models::domain_models::NewNotification;
use crate::AppState;

// Reminder dispatch polls every minute; promise expiry runs once a day,
// off-peak for Latin American timezones.
const DISPATCH_SCHEDULE: &str = "0 * * * * *";
const PROMISE_EXPIRY_SCHEDULE: &str = "0 5 8 * * *";

pub async fn start_scheduler(state: Arc<AppState>) -> anyhow::Result<()> {
    let scheduler = JobScheduler::new().await?;

    let dispatch_state = state.clone();
    scheduler
        .add(Job::new_async(DISPATCH_SCHEDULE, move |_uuid, _lock| {
            let state = dispatch_state.clone();
            Box::pin(async move {
                reminder_dispatcher::dispatch_due_reminders(&state, DISPATCH_BATCH_LIMIT, false)
                    .await;
            })
        })?)
        .await?;

    let expiry_state = state.clone();
    scheduler
        .add(Job::new_async(PROMISE_EXPIRY_SCHEDULE, move |_uuid, _lock| {
            let state = expiry_state.clone();
            Box::pin(async move {
                if let Err(e) = expire_overdue_promises(&state).await {
                    tracing::error!("Promise expiry job failed: {}", e);
                }
            })
        })?)
        .await?;

    scheduler.start().await?;
    tracing::info!("Job scheduler started (reminder dispatch + promise expiry)");
    Ok(())
}

/// Marks pending promises whose promised date is behind the current UTC date
/// as expired and tells each affected user how many lapsed.
pub async fn expire_overdue_promises(state: &Arc<AppState>) -> anyhow::Result<usize> {
    let now = Utc::now();
    let today = now.format("%Y-%m-%d").to_string();

    let expired = state
        .payment_repository
        .expire_overdue_promises(&today, now.timestamp() as i32)?;
    if expired.is_empty() {
        return Ok(0);
    }

    let mut per_user: HashMap<i32, usize> = HashMap::new();
    for promise in &expired {
        *per_user.entry(promise.user_id).or_insert(0) += 1;
    }
    for (user_id, count) in per_user {
        let message = if count == 1 {
            "1 promesa de pago venció sin cumplirse.".to_string()
        } else {
            format!("{} promesas de pago vencieron sin cumplirse.", count)
        };
        let notification = NewNotification {
            user_id,
            notification_type: "promise_expired".to_string(),
            title: "Promesas vencidas".to_string(),
            message,
            read: false,
            created_at: now.timestamp() as i32,
        };
        if let Err(e) = state.notification_repository.create(&notification) {
            tracing::error!("Failed to create promise_expired notification: {}", e);
        }
    }

    tracing::info!("Expired {} overdue payment promises", expired.len());
    Ok(expired.len())
}
