use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::AppError;
use crate::models::domain_models::NewPayment;
use crate::utils::reminder_scheduler;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub user_id: i32,
    pub contact_id: i32,
    pub amount: f64,
    pub currency: Option<String>,
    pub method: Option<String>,
    pub reference_number: Option<String>,
    pub payment_date: Option<String>,
    pub due_date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmPaymentRequest {
    pub user_id: i32,
    pub confirmed_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RejectPaymentRequest {
    pub user_id: i32,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UserScopedRequest {
    pub user_id: i32,
}

#[derive(Debug, Deserialize)]
pub struct SetDueDateRequest {
    pub user_id: i32,
    pub due_date: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusFilter {
    pub status: Option<String>,
}

fn parse_iso_date(value: &str, field: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest(format!("{} must be YYYY-MM-DD", field)))
}

// Manual entry from the dashboard; no source message behind it.
pub async fn create_payment(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<Json<Value>, AppError> {
    if request.amount <= 0.0 {
        return Err(AppError::BadRequest("amount must be positive".to_string()));
    }
    if let Some(date) = &request.payment_date {
        parse_iso_date(date, "payment_date")?;
    }
    let due_date = match &request.due_date {
        Some(date) => Some(parse_iso_date(date, "due_date")?),
        None => None,
    };

    let contact = state
        .contact_repository
        .find_by_id(request.user_id, request.contact_id)?
        .ok_or_else(|| AppError::NotFound("Contact not found".to_string()))?;

    let now = Utc::now().timestamp() as i32;
    let currency = request.currency.unwrap_or_else(|| "PEN".to_string());
    let payment = state.payment_repository.create_payment(&NewPayment {
        user_id: request.user_id,
        contact_id: contact.id,
        message_id: None,
        amount: request.amount,
        currency: currency.clone(),
        status: "pending".to_string(),
        method: request.method,
        reference_number: request.reference_number,
        payment_date: request.payment_date,
        confidence: None,
        due_date: request.due_date,
        created_at: now,
        updated_at: now,
    })?;
    state
        .contact_repository
        .add_pending(request.user_id, contact.id, request.amount, now)?;

    let reminders_scheduled = match due_date {
        Some(due_date) => reminder_scheduler::schedule_payment_reminders(
            &state,
            payment.id,
            request.user_id,
            contact.id,
            due_date,
            payment.amount,
            &currency,
        )?
        .len(),
        None => 0,
    };

    tracing::info!(
        "Created manual payment {} for user {} ({} reminders scheduled)",
        payment.id,
        request.user_id,
        reminders_scheduled
    );
    Ok(Json(json!({
        "payment": payment,
        "reminders_scheduled": reminders_scheduled
    })))
}

pub async fn list_payments(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i32>,
    Query(filter): Query<StatusFilter>,
) -> Result<Json<Value>, AppError> {
    let payments = state
        .payment_repository
        .list_for_user(user_id, filter.status.as_deref())?;
    Ok(Json(json!({ "payments": payments })))
}

pub async fn confirm_payment(
    State(state): State<Arc<AppState>>,
    Path(payment_id): Path<i32>,
    Json(request): Json<ConfirmPaymentRequest>,
) -> Result<Json<Value>, AppError> {
    let payment = state
        .payment_repository
        .find_by_id(payment_id, request.user_id)?
        .ok_or_else(|| AppError::NotFound("Payment not found".to_string()))?;

    let now = Utc::now().timestamp() as i32;
    let confirmed_by = request.confirmed_by.as_deref().unwrap_or("owner");
    let updated = state
        .payment_repository
        .confirm(payment_id, request.user_id, confirmed_by, now)?;
    if updated == 0 {
        return Err(AppError::Conflict(format!(
            "Payment is already {}",
            payment.status
        )));
    }

    state.contact_repository.record_payment_confirmed(
        request.user_id,
        payment.contact_id,
        payment.amount,
        now,
    )?;
    // A settled payment no longer needs chasing.
    let cancelled = state
        .reminder_repository
        .cancel_scheduled_for_payment(payment_id, request.user_id)?;
    if cancelled > 0 {
        tracing::info!(
            "Cancelled {} scheduled reminders for confirmed payment {}",
            cancelled,
            payment_id
        );
    }

    let payment = state
        .payment_repository
        .find_by_id(payment_id, request.user_id)?;
    Ok(Json(json!({
        "message": "Payment confirmed",
        "payment": payment
    })))
}

pub async fn reject_payment(
    State(state): State<Arc<AppState>>,
    Path(payment_id): Path<i32>,
    Json(request): Json<RejectPaymentRequest>,
) -> Result<Json<Value>, AppError> {
    let payment = state
        .payment_repository
        .find_by_id(payment_id, request.user_id)?
        .ok_or_else(|| AppError::NotFound("Payment not found".to_string()))?;

    let now = Utc::now().timestamp() as i32;
    let updated = state.payment_repository.reject(
        payment_id,
        request.user_id,
        request.reason.as_deref(),
        now,
    )?;
    if updated == 0 {
        return Err(AppError::Conflict(format!(
            "Payment is already {}",
            payment.status
        )));
    }

    state.contact_repository.release_pending(
        request.user_id,
        payment.contact_id,
        payment.amount,
        now,
    )?;
    let cancelled = state
        .reminder_repository
        .cancel_scheduled_for_payment(payment_id, request.user_id)?;
    if cancelled > 0 {
        tracing::info!(
            "Cancelled {} scheduled reminders for rejected payment {}",
            cancelled,
            payment_id
        );
    }

    Ok(Json(json!({ "message": "Payment rejected" })))
}

pub async fn cancel_payment(
    State(state): State<Arc<AppState>>,
    Path(payment_id): Path<i32>,
    Json(request): Json<UserScopedRequest>,
) -> Result<Json<Value>, AppError> {
    let payment = state
        .payment_repository
        .find_by_id(payment_id, request.user_id)?
        .ok_or_else(|| AppError::NotFound("Payment not found".to_string()))?;

    let now = Utc::now().timestamp() as i32;
    let updated = state
        .payment_repository
        .cancel(payment_id, request.user_id, now)?;
    if updated == 0 {
        return Err(AppError::Conflict(format!(
            "Payment is already {}",
            payment.status
        )));
    }

    state.contact_repository.release_pending(
        request.user_id,
        payment.contact_id,
        payment.amount,
        now,
    )?;
    let cancelled = state
        .reminder_repository
        .cancel_scheduled_for_payment(payment_id, request.user_id)?;
    if cancelled > 0 {
        tracing::info!(
            "Cancelled {} scheduled reminders for cancelled payment {}",
            cancelled,
            payment_id
        );
    }

    Ok(Json(json!({ "message": "Payment cancelled" })))
}

// Changing the date throws away the old plan and rebuilds it; already-sent
// rows are history and stay untouched.
pub async fn set_payment_due_date(
    State(state): State<Arc<AppState>>,
    Path(payment_id): Path<i32>,
    Json(request): Json<SetDueDateRequest>,
) -> Result<Json<Value>, AppError> {
    let due_date = parse_iso_date(&request.due_date, "due_date")?;

    let payment = state
        .payment_repository
        .find_by_id(payment_id, request.user_id)?
        .ok_or_else(|| AppError::NotFound("Payment not found".to_string()))?;

    let now = Utc::now().timestamp() as i32;
    let updated = state.payment_repository.set_due_date(
        payment_id,
        request.user_id,
        &request.due_date,
        now,
    )?;
    if updated == 0 {
        return Err(AppError::Conflict(format!(
            "Due date can only change while pending (payment is {})",
            payment.status
        )));
    }

    let cancelled = state
        .reminder_repository
        .cancel_scheduled_for_payment(payment_id, request.user_id)?;
    let scheduled = reminder_scheduler::schedule_payment_reminders(
        &state,
        payment_id,
        request.user_id,
        payment.contact_id,
        due_date,
        payment.amount,
        &payment.currency,
    )?;

    tracing::info!(
        "Due date for payment {} moved to {}: {} reminders cancelled, {} scheduled",
        payment_id,
        request.due_date,
        cancelled,
        scheduled.len()
    );
    Ok(Json(json!({
        "message": "Due date updated",
        "reminders_cancelled": cancelled,
        "reminders_scheduled": scheduled.len()
    })))
}

pub async fn fulfill_promise(
    State(state): State<Arc<AppState>>,
    Path(promise_id): Path<i32>,
    Json(request): Json<UserScopedRequest>,
) -> Result<Json<Value>, AppError> {
    let promise = state
        .payment_repository
        .find_promise_by_id(promise_id, request.user_id)?
        .ok_or_else(|| AppError::NotFound("Promise not found".to_string()))?;

    let now = Utc::now().timestamp() as i32;
    let updated = state
        .payment_repository
        .fulfill_promise(promise_id, request.user_id, now)?;
    if updated == 0 {
        return Err(AppError::Conflict(format!(
            "Promise is already {}",
            promise.status
        )));
    }
    Ok(Json(json!({ "message": "Promise fulfilled" })))
}

pub async fn expire_promise(
    State(state): State<Arc<AppState>>,
    Path(promise_id): Path<i32>,
    Json(request): Json<UserScopedRequest>,
) -> Result<Json<Value>, AppError> {
    let promise = state
        .payment_repository
        .find_promise_by_id(promise_id, request.user_id)?
        .ok_or_else(|| AppError::NotFound("Promise not found".to_string()))?;

    let now = Utc::now().timestamp() as i32;
    let updated = state
        .payment_repository
        .expire_promise(promise_id, request.user_id, now)?;
    if updated == 0 {
        return Err(AppError::Conflict(format!(
            "Promise is already {}",
            promise.status
        )));
    }
    Ok(Json(json!({ "message": "Promise expired" })))
}

pub async fn list_promises(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i32>,
    Query(filter): Query<StatusFilter>,
) -> Result<Json<Value>, AppError> {
    let promises = state
        .payment_repository
        .list_promises_for_user(user_id, filter.status.as_deref())?;
    Ok(Json(json!({ "promises": promises })))
}
