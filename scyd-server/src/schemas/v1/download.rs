use scyd_core::DownloadRecord;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct CreateDownloadRequest {
    /// Media page URL handed to yt-dlp.
    #[validate(length(min = 1, message = "url must not be empty"))]
    pub url: String,
    /// Additional yt-dlp flags, shell-quoted.
    #[schema(example = "--arg arg_value --second-arg --third-arg")]
    pub yt_dlp_args: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CreateDownloadResponse {
    pub message: String,
    pub task_id: String,
    pub download_id: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DownloadResponse {
    pub id: i64,
    pub url: String,
    /// One of `pending`, `progress`, `success`, `error`.
    pub state: String,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DownloadListResponse {
    pub downloads: Vec<DownloadResponse>,
}

impl From<DownloadRecord> for DownloadResponse {
    fn from(record: DownloadRecord) -> Self {
        DownloadResponse {
            id: record.id,
            url: record.url,
            state: record.state.to_string(),
            error_message: record.error_message,
            created_at: record.created_at.to_rfc3339(),
            updated_at: record.updated_at.to_rfc3339(),
        }
    }
}
