use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::Engine as _;

use crate::state::AppState;

/// Axum middleware that requires a valid `Authorization: Bearer <token>`
/// header, or the Basic fallback with the token as the password (the form
/// tool clients send).
///
/// Returns 401 for missing, malformed, or incorrect credentials. Applied to
/// all routes — no public endpoints. Org scoping comes from the path; this
/// layer only authenticates the caller.
pub async fn require_bearer_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let authorized = match header {
        Some(value) => {
            if let Some(token) = value.strip_prefix("Bearer ") {
                token == state.auth_token.as_str()
            } else if let Some(encoded) = value.strip_prefix("Basic ") {
                basic_password(encoded).is_some_and(|p| p == *state.auth_token)
            } else {
                false
            }
        }
        None => false,
    };

    if authorized {
        next.run(request).await
    } else {
        (StatusCode::UNAUTHORIZED, "Unauthorized\n").into_response()
    }
}

fn basic_password(encoded: &str) -> Option<String> {
    let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    credentials.split_once(':').map(|(_, password)| password.to_string())
}
