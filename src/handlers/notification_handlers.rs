use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct NotificationFilter {
    #[serde(default)]
    pub unread: bool,
}

#[derive(Debug, Deserialize)]
pub struct UserScopedRequest {
    pub user_id: i32,
}

pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i32>,
    Query(filter): Query<NotificationFilter>,
) -> Result<Json<Value>, AppError> {
    let notifications = state
        .notification_repository
        .list_for_user(user_id, filter.unread)?;
    Ok(Json(json!({ "notifications": notifications })))
}

pub async fn mark_notification_read(
    State(state): State<Arc<AppState>>,
    Path(notification_id): Path<i32>,
    Json(request): Json<UserScopedRequest>,
) -> Result<Json<Value>, AppError> {
    let updated = state
        .notification_repository
        .mark_read(notification_id, request.user_id)?;
    if updated == 0 {
        return Err(AppError::NotFound("Notification not found".to_string()));
    }
    Ok(Json(json!({ "message": "Notification marked as read" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::domain_models::NewNotification;
    use crate::test_utils;

    #[tokio::test]
    async fn unread_filter_and_mark_read() {
        let state = test_utils::test_state();
        let user = test_utils::seed_user(&state);
        state
            .notification_repository
            .create(&NewNotification {
                user_id: user.id,
                notification_type: "payment_detected".to_string(),
                title: "Pago detectado".to_string(),
                message: "Posible pago de PEN 50.00.".to_string(),
                read: false,
                created_at: 1_718_000_000,
            })
            .unwrap();

        let unread = list_notifications(
            State(state.clone()),
            Path(user.id),
            Query(NotificationFilter { unread: true }),
        )
        .await
        .unwrap();
        let items = unread.0["notifications"].as_array().unwrap().clone();
        assert_eq!(items.len(), 1);
        let id = items[0]["id"].as_i64().unwrap() as i32;

        mark_notification_read(
            State(state.clone()),
            Path(id),
            Json(UserScopedRequest { user_id: user.id }),
        )
        .await
        .unwrap();

        let unread = list_notifications(
            State(state.clone()),
            Path(user.id),
            Query(NotificationFilter { unread: true }),
        )
        .await
        .unwrap();
        assert!(unread.0["notifications"].as_array().unwrap().is_empty());

        // Another user's notification id is invisible.
        let foreign = mark_notification_read(
            State(state.clone()),
            Path(id),
            Json(UserScopedRequest { user_id: user.id + 1 }),
        )
        .await;
        assert!(matches!(foreign, Err(AppError::NotFound(_))));
    }
}
