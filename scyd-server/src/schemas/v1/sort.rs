use scyd_core::SortReport;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SortDownloadsResponse {
    pub moved_files: Vec<String>,
    pub files_with_errors: Vec<String>,
}

impl From<SortReport> for SortDownloadsResponse {
    fn from(report: SortReport) -> Self {
        SortDownloadsResponse {
            moved_files: report.moved_files,
            files_with_errors: report.files_with_errors,
        }
    }
}
