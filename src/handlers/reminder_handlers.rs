use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::AppError;
use crate::jobs::reminder_dispatcher::{self, DISPATCH_BATCH_LIMIT};
use crate::utils::reminder_scheduler;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ScheduleRemindersRequest {
    pub payment_id: i32,
    pub user_id: i32,
    pub contact_id: i32,
    pub due_date: String,
    pub amount: f64,
    pub currency: String,
}

#[derive(Debug, Deserialize)]
pub struct DispatchRequest {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StatusFilter {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UserScopedRequest {
    pub user_id: i32,
}

// Internal trigger: the webhook pipeline and the payment handlers call the
// scheduler directly, this route exists for operators and backfills.
pub async fn schedule_reminders(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ScheduleRemindersRequest>,
) -> Result<Json<Value>, AppError> {
    let due_date = NaiveDate::parse_from_str(&request.due_date, "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest("due_date must be YYYY-MM-DD".to_string()))?;

    let payment = state
        .payment_repository
        .find_by_id(request.payment_id, request.user_id)?
        .ok_or_else(|| AppError::NotFound("Payment not found".to_string()))?;
    if payment.contact_id != request.contact_id {
        return Err(AppError::BadRequest(
            "contact_id does not match the payment".to_string(),
        ));
    }

    let created = reminder_scheduler::schedule_payment_reminders(
        &state,
        request.payment_id,
        request.user_id,
        request.contact_id,
        due_date,
        request.amount,
        &request.currency,
    )?;

    Ok(Json(json!({
        "scheduled": created.len(),
        "reminders": created
    })))
}

// Internal trigger: one dispatcher tick on demand (the cron hits the same
// function every minute).
pub async fn dispatch_reminders(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DispatchRequest>,
) -> Result<Json<Value>, AppError> {
    let limit = request.limit.unwrap_or(DISPATCH_BATCH_LIMIT);
    if limit <= 0 {
        return Err(AppError::BadRequest("limit must be positive".to_string()));
    }

    let stats = reminder_dispatcher::dispatch_due_reminders(&state, limit, false).await;
    Ok(Json(json!({
        "processed": stats.processed,
        "sent": stats.sent,
        "failed": stats.failed
    })))
}

pub async fn list_reminders(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i32>,
    Query(filter): Query<StatusFilter>,
) -> Result<Json<Value>, AppError> {
    let reminders = state
        .reminder_repository
        .list_for_user(user_id, filter.status.as_deref())?;
    Ok(Json(json!({ "reminders": reminders })))
}

pub async fn cancel_reminder(
    State(state): State<Arc<AppState>>,
    Path(reminder_id): Path<i32>,
    Json(request): Json<UserScopedRequest>,
) -> Result<Json<Value>, AppError> {
    let reminder = state
        .reminder_repository
        .find_by_id(reminder_id, request.user_id)?
        .ok_or_else(|| AppError::NotFound("Reminder not found".to_string()))?;

    let updated = state
        .reminder_repository
        .cancel(reminder_id, request.user_id)?;
    if updated == 0 {
        return Err(AppError::Conflict(format!(
            "Only scheduled reminders can be cancelled (reminder is {})",
            reminder.status
        )));
    }

    tracing::info!("Reminder {} cancelled manually", reminder_id);
    Ok(Json(json!({ "message": "Reminder cancelled" })))
}
