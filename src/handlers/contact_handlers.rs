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
pub struct MessageListParams {
    pub limit: Option<i64>,
}

pub async fn list_contacts(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i32>,
) -> Result<Json<Value>, AppError> {
    let contacts = state.contact_repository.list_for_user(user_id)?;
    Ok(Json(json!({ "contacts": contacts })))
}

pub async fn list_contact_messages(
    State(state): State<Arc<AppState>>,
    Path((user_id, contact_id)): Path<(i32, i32)>,
    Query(params): Query<MessageListParams>,
) -> Result<Json<Value>, AppError> {
    state
        .contact_repository
        .find_by_id(user_id, contact_id)?
        .ok_or_else(|| AppError::NotFound("Contact not found".to_string()))?;

    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    let messages = state
        .message_repository
        .list_for_contact(user_id, contact_id, limit)?;
    Ok(Json(json!({ "messages": messages })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;

    #[tokio::test]
    async fn contacts_and_conversation_are_user_scoped() {
        let state = test_utils::test_state();
        let user = test_utils::seed_user(&state);
        let contact = test_utils::seed_contact(&state, user.id, "51911111111");

        let response = list_contacts(State(state.clone()), Path(user.id))
            .await
            .unwrap();
        assert_eq!(response.0["contacts"].as_array().unwrap().len(), 1);

        let other_user = list_contact_messages(
            State(state.clone()),
            Path((user.id + 1, contact.id)),
            Query(MessageListParams { limit: None }),
        )
        .await;
        assert!(matches!(other_user, Err(AppError::NotFound(_))));

        let own = list_contact_messages(
            State(state.clone()),
            Path((user.id, contact.id)),
            Query(MessageListParams { limit: Some(10) }),
        )
        .await
        .unwrap();
        assert!(own.0["messages"].as_array().unwrap().is_empty());
    }
}
