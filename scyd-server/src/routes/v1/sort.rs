use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use scyd_core::DownloadSorter;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::schemas::v1::sort::SortDownloadsResponse;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(sort_downloads), components(schemas(SortDownloadsResponse)))]
pub struct SortApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/sort-downloads", post(sort_downloads))
}

/// Move tagged files from the download directory into the library.
#[utoipa::path(
    post,
    path = "/api/v1/sort-downloads",
    tag = "downloads",
    responses(
        (status = 200, description = "Sort report", body = SortDownloadsResponse),
        (status = 401, description = "No valid session"),
        (status = 500, description = "Download directory unreadable"),
    )
)]
pub async fn sort_downloads(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SortDownloadsResponse>, ServerError> {
    let report = state.sorter.sort().await?;
    Ok(Json(report.into()))
}
