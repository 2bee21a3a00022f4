use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::error::ServerError;
use crate::session::session_id_from;
use crate::state::AppState;

/// Username of the session that authorized the request.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub String);

/// Reject requests without a live session cookie before they reach a handler.
pub async fn require_session(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let session = session_id_from(req.headers()).and_then(|id| state.sessions.authorize(&id));
    match session {
        Some(session) => {
            req.extensions_mut().insert(CurrentUser(session.username));
            next.run(req).await
        }
        None => {
            debug!(path = %req.uri().path(), "rejected request without a valid session");
            ServerError::Unauthorized("authentication required".to_owned()).into_response()
        }
    }
}
