//! Download submission and history.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, post};
use axum::{Extension, Json, Router};
use scyd_core::{DeleteOutcome, DownloadId, STARTED_MESSAGE};
use tracing::info;
use utoipa::OpenApi;
use validator::Validate;

use crate::error::ServerError;
use crate::middleware::auth::CurrentUser;
use crate::schemas::v1::download::{
    CreateDownloadRequest, CreateDownloadResponse, DownloadListResponse, DownloadResponse,
};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(create_download, list_downloads, delete_download),
    components(schemas(
        CreateDownloadRequest,
        CreateDownloadResponse,
        DownloadResponse,
        DownloadListResponse
    ))
)]
pub struct DownloadsApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/downloads", post(create_download).get(list_downloads))
        .route("/downloads/{id}", delete(delete_download))
}

/// Start a download. The response arrives as soon as the record exists;
/// progress is read from `/tasks/{task_id}/events`.
#[utoipa::path(
    post,
    path = "/api/v1/downloads",
    tag = "downloads",
    request_body = CreateDownloadRequest,
    responses(
        (status = 200, description = "Download started", body = CreateDownloadResponse),
        (status = 400, description = "Invalid URL or malformed yt-dlp arguments"),
        (status = 401, description = "No valid session"),
        (status = 500, description = "Store error"),
    )
)]
pub async fn create_download(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(username)): Extension<CurrentUser>,
    Json(req): Json<CreateDownloadRequest>,
) -> Result<Json<CreateDownloadResponse>, ServerError> {
    req.validate()?;

    let submission = state
        .orchestrator
        .submit(&req.url, req.yt_dlp_args.as_deref())
        .await?;
    info!(
        user = %username,
        task_id = %submission.task_id,
        download_id = submission.download.id,
        "download requested"
    );

    Ok(Json(CreateDownloadResponse {
        message: STARTED_MESSAGE.to_owned(),
        task_id: submission.task_id.to_string(),
        download_id: submission.download.id,
    }))
}

/// Every download record, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/downloads",
    tag = "downloads",
    responses(
        (status = 200, description = "Download history", body = DownloadListResponse),
        (status = 401, description = "No valid session"),
    )
)]
pub async fn list_downloads(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DownloadListResponse>, ServerError> {
    let records = state.orchestrator.list_downloads().await?;
    Ok(Json(DownloadListResponse {
        downloads: records.into_iter().map(DownloadResponse::from).collect(),
    }))
}

#[utoipa::path(
    delete,
    path = "/api/v1/downloads/{id}",
    tag = "downloads",
    params(("id" = i64, Path, description = "Download record id")),
    responses(
        (status = 204, description = "Record deleted"),
        (status = 401, description = "No valid session"),
        (status = 404, description = "No such record"),
        (status = 409, description = "A task is still running for this record"),
    )
)]
pub async fn delete_download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<DownloadId>,
) -> Result<StatusCode, ServerError> {
    match state.orchestrator.delete_download(id).await? {
        DeleteOutcome::Deleted => {
            info!(download_id = id, "download record deleted");
            Ok(StatusCode::NO_CONTENT)
        }
        DeleteOutcome::NotFound => Err(ServerError::NotFound(format!("download {id} not found"))),
        DeleteOutcome::Active(task_id) => Err(ServerError::Conflict(format!(
            "download {id} is still running as task {task_id}"
        ))),
    }
}
