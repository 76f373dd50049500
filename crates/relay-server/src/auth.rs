use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use secrecy::ExposeSecret;

use crate::{ApiError, state::AppState};

/// Header carrying the shared admin secret
pub const ADMIN_SECRET_HEADER: &str = "x-admin-secret";

/// Reject requests that do not present the configured admin secret
pub async fn require_admin(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let presented = request
        .headers()
        .get(ADMIN_SECRET_HEADER)
        .and_then(|v| v.to_str().ok());

    let authorized = matches!(
        (&state.admin_secret, presented),
        (Some(expected), Some(presented)) if expected.expose_secret() == presented
    );

    if !authorized {
        tracing::warn!(path = %request.uri().path(), "admin request rejected");
        return ApiError::Unauthorized.into_response();
    }

    next.run(request).await
}
