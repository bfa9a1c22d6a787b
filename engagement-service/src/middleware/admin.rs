use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use axum_extra::extract::CookieJar;
use secrecy::ExposeSecret;
use serde_json::json;
use service_core::utils::signature::constant_time_eq;

use crate::startup::AppState;

pub const ADMIN_SESSION_COOKIE: &str = "admin_session";

/// Admin routes require the `admin_session` cookie to carry the shared
/// admin secret.
pub async fn admin_session_middleware(
    State(state): State<AppState>,
    jar: CookieJar,
    request: Request,
    next: Next,
) -> Response {
    let expected = state.config.security.admin_password.expose_secret();

    let authorised = match jar.get(ADMIN_SESSION_COOKIE) {
        Some(cookie) if !expected.is_empty() => {
            constant_time_eq(cookie.value().as_bytes(), expected.as_bytes())
        }
        _ => false,
    };

    if authorised {
        return next.run(request).await;
    }

    tracing::warn!(path = %request.uri().path(), "Failed admin authentication attempt");
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "Unauthorized" })),
    )
        .into_response()
}
