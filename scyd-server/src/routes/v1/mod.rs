pub mod auth;
pub mod downloads;
pub mod sort;
pub mod tasks;

use crate::middleware::auth::require_session;
use crate::state::AppState;
use utoipa::OpenApi;

use axum::{Router, middleware};
use std::sync::Arc;

/// Routes nested under `/api/v1`. Everything except `/auth/*` needs a
/// session.
pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let protected = Router::new()
        .merge(downloads::router())
        .merge(tasks::router())
        .merge(sort::router())
        .route_layer(middleware::from_fn_with_state(state, require_session));

    Router::new().merge(auth::router()).merge(protected)
}

#[derive(OpenApi)]
#[openapi()]
pub struct V1Api;

pub fn api_docs() -> utoipa::openapi::OpenApi {
    let mut doc = V1Api::openapi();
    doc.merge(auth::AuthApi::openapi());
    doc.merge(downloads::DownloadsApi::openapi());
    doc.merge(tasks::TasksApi::openapi());
    doc.merge(sort::SortApi::openapi());
    doc
}
