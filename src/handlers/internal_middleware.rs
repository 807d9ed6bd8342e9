use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use serde_json::json;

// Shared-secret gate for the /api/internal routes.
pub async fn require_internal_secret(
    request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, Json<serde_json::Value>)> {
    let expected = std::env::var("INTERNAL_API_SECRET").unwrap_or_default();
    if expected.is_empty() {
        tracing::error!("INTERNAL_API_SECRET is not set, rejecting internal request");
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "Internal API is not configured"})),
        ));
    }

    let provided = request
        .headers()
        .get("x-internal-secret")
        .and_then(|value| value.to_str().ok());
    if provided != Some(expected.as_str()) {
        tracing::warn!("Internal route called with a missing or wrong secret");
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Invalid internal secret"})),
        ));
    }

    Ok(next.run(request).await)
}
