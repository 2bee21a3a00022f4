use scyd_core::ActiveTask;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ActiveTaskResponse {
    pub task_id: String,
    pub download_id: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ActiveTaskListResponse {
    pub tasks: Vec<ActiveTaskResponse>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CancelResponse {
    /// Always `cancelling`; the terminal state arrives on the event stream.
    pub status: String,
}

/// Shape of each `data:` payload on the task event stream.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TaskEventSchema {
    /// `start`, `progress`, `error`, `success`, or `not_found`.
    pub event: String,
    pub task_id: String,
    pub download_id: Option<i64>,
    pub data: String,
    /// `stdout` or `stderr` for captured output lines.
    pub stream: Option<String>,
}

impl From<ActiveTask> for ActiveTaskResponse {
    fn from(task: ActiveTask) -> Self {
        ActiveTaskResponse {
            task_id: task.task_id.to_string(),
            download_id: task.download_id,
        }
    }
}
