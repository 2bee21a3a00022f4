//! Login, logout and session status. These routes are public.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::{info, warn};
use utoipa::OpenApi;
use validator::Validate;

use crate::error::ServerError;
use crate::schemas::v1::auth::{AuthStatusResponse, LoginRequest, LoginResponse};
use crate::session::{check_credentials, clear_session_cookie, session_cookie, session_id_from};
use crate::state::AppState;

const INVALID_CREDENTIALS: &str = "Invalid username or password";

#[derive(OpenApi)]
#[openapi(
    paths(login, logout, status),
    components(schemas(LoginRequest, LoginResponse, AuthStatusResponse))
)]
pub struct AuthApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/status", get(status))
}

/// Check credentials and open a session. Rejected credentials still answer
/// 200, with `success: false` and no cookie.
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login attempt evaluated", body = LoginResponse),
        (status = 400, description = "Missing username or password"),
    )
)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Response, ServerError> {
    req.validate()?;

    if !check_credentials(&state.settings, &req.username, &req.password) {
        warn!(username = %req.username, "rejected login");
        return Ok(Json(LoginResponse {
            success: false,
            message: INVALID_CREDENTIALS.to_owned(),
        })
        .into_response());
    }

    let id = state.sessions.create(&req.username);
    let secure = !state.config.environment.is_development();
    let cookie = session_cookie(&id, state.sessions.ttl(), secure);
    info!(username = %req.username, "session opened");

    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(LoginResponse {
            success: true,
            message: "Login successful".to_owned(),
        }),
    )
        .into_response())
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    tag = "auth",
    responses((status = 204, description = "Session closed and cookie cleared"))
)]
pub async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(id) = session_id_from(&headers) {
        state.sessions.remove(&id);
    }
    let secure = !state.config.environment.is_development();
    (
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, clear_session_cookie(secure))],
    )
        .into_response()
}

#[utoipa::path(
    get,
    path = "/api/v1/auth/status",
    tag = "auth",
    responses((status = 200, description = "Whether the caller has a live session", body = AuthStatusResponse))
)]
pub async fn status(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Json<AuthStatusResponse> {
    let session = session_id_from(&headers).and_then(|id| state.sessions.authorize(&id));
    Json(AuthStatusResponse {
        authenticated: session.is_some(),
        username: session.map(|s| s.username),
    })
}
