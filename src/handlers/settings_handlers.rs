use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::AppError;
use crate::models::domain_models::NewReminderSettings;
use crate::utils::reminder_scheduler::MAX_DAY_OFFSET;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct UpdateReminderSettingsRequest {
    pub auto_remind_enabled: bool,
    pub days_before: Vec<i64>,
    pub remind_on_due_date: bool,
    pub days_after: Vec<i64>,
    pub preferred_hour: i32,
    pub timezone: String,
    pub whatsapp_enabled: bool,
    pub email_enabled: bool,
    pub template_before: Option<String>,
    pub template_on_due: Option<String>,
    pub template_after: Option<String>,
}

// Reads lazily create the default policy so the dashboard always has
// something to show; the scheduler itself never creates one.
pub async fn get_reminder_settings(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i32>,
) -> Result<Json<Value>, AppError> {
    state
        .user_core
        .find_by_id(user_id)?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    let now = Utc::now().timestamp() as i32;
    let settings = state.user_core.get_or_create_reminder_settings(user_id, now)?;
    Ok(Json(json!({ "settings": settings })))
}

pub async fn update_reminder_settings(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i32>,
    Json(request): Json<UpdateReminderSettingsRequest>,
) -> Result<Json<Value>, AppError> {
    state
        .user_core
        .find_by_id(user_id)?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    if !(0..=23).contains(&request.preferred_hour) {
        return Err(AppError::BadRequest(
            "preferred_hour must be between 0 and 23".to_string(),
        ));
    }
    if request.timezone.parse::<Tz>().is_err() {
        return Err(AppError::BadRequest(format!(
            "'{}' is not a valid IANA timezone",
            request.timezone
        )));
    }
    for offset in request.days_before.iter().chain(request.days_after.iter()) {
        if !(1..=MAX_DAY_OFFSET).contains(offset) {
            return Err(AppError::BadRequest(format!(
                "day offsets must be between 1 and {}",
                MAX_DAY_OFFSET
            )));
        }
    }

    let days_before = serde_json::to_string(&request.days_before)
        .map_err(|e| AppError::Internal(format!("Failed to encode days_before: {}", e)))?;
    let days_after = serde_json::to_string(&request.days_after)
        .map_err(|e| AppError::Internal(format!("Failed to encode days_after: {}", e)))?;

    let now = Utc::now().timestamp() as i32;
    let settings = state.user_core.update_reminder_settings(
        user_id,
        &NewReminderSettings {
            user_id,
            auto_remind_enabled: request.auto_remind_enabled,
            days_before,
            remind_on_due_date: request.remind_on_due_date,
            days_after,
            preferred_hour: request.preferred_hour,
            timezone: request.timezone,
            whatsapp_enabled: request.whatsapp_enabled,
            email_enabled: request.email_enabled,
            template_before: request.template_before,
            template_on_due: request.template_on_due,
            template_after: request.template_after,
            updated_at: now,
        },
    )?;

    tracing::info!("Reminder settings updated for user {}", user_id);
    Ok(Json(json!({ "settings": settings })))
}
