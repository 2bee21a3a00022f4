//! Axum router construction.
//!
//! [`build`] assembles the complete application router:
//! - Middleware layers (CORS, per-request trace id)
//! - Health route and the OpenAPI document
//! - `/api/v1` routes, session-protected except for `/auth/*`

pub mod doc;
mod health;
mod v1;

use axum::routing::get;
use axum::{Json, Router, middleware};
use crate::middleware::{cors, trace};
use crate::state::AppState;
use std::sync::Arc;
use tower::ServiceBuilder;

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    let app = Router::new()
        .merge(health::router())
        .route("/api-docs/openapi.json", get(openapi_json))
        .nest("/api/v1", v1::router(state.clone()));

    app
        // Outermost layers execute first on the way in.
        .layer(ServiceBuilder::new().layer(cors::cors_layer(state.clone())))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            trace::trace_middleware,
        ))
        .with_state(state)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(doc::get_docs())
}
