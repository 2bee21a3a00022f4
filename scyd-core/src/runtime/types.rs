use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;
use uuid::Uuid;

/// Boxed error used to carry collaborator failures across the core boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Unique identifier for one in-flight task.
///
/// Generated at submission and never reused; a task id stops resolving once
/// the task reaches a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Primary key of a persisted download record.
pub type DownloadId = i64;

/// Persisted lifecycle state of a download record.
///
/// Transitions only move forward: `pending → progress → {success, error}`.
/// A record may also jump from `pending` straight to `error` when its process
/// could not be started (or was cancelled before it was).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DownloadState {
    Pending,
    Progress,
    Success,
    Error,
}

impl DownloadState {
    /// Returns `true` for `success` and `error`; terminal records are never
    /// mutated again.
    pub fn is_terminal(self) -> bool {
        matches!(self, DownloadState::Success | DownloadState::Error)
    }

    /// States a record must currently be in for a move to `self` to be legal.
    pub fn predecessors(self) -> &'static [DownloadState] {
        match self {
            DownloadState::Pending => &[],
            DownloadState::Progress => &[DownloadState::Pending],
            DownloadState::Success => &[DownloadState::Progress],
            DownloadState::Error => &[DownloadState::Pending, DownloadState::Progress],
        }
    }

    pub fn can_transition_to(self, next: DownloadState) -> bool {
        next.predecessors().contains(&self)
    }
}

/// A persisted download record as seen by the core.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadRecord {
    pub id: DownloadId,
    pub url: String,
    pub state: DownloadState,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Kind of a streamed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    Start,
    Progress,
    Error,
    Success,
}

impl EventKind {
    /// `error` and `success` close a task's event sequence.
    pub fn is_terminal(self) -> bool {
        matches!(self, EventKind::Error | EventKind::Success)
    }
}

/// Which output stream of the child process a line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One unit of streamed output or lifecycle notification.
///
/// Events are ephemeral: they are never persisted and never replayed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadEvent {
    pub event: EventKind,
    pub task_id: TaskId,
    pub download_id: DownloadId,
    pub data: String,
    pub stream: Option<OutputStream>,
}

impl DownloadEvent {
    pub fn lifecycle(
        event: EventKind,
        task_id: TaskId,
        download_id: DownloadId,
        data: impl Into<String>,
    ) -> Self {
        Self {
            event,
            task_id,
            download_id,
            data: data.into(),
            stream: None,
        }
    }

    pub fn output(
        task_id: TaskId,
        download_id: DownloadId,
        stream: OutputStream,
        line: String,
    ) -> Self {
        Self {
            event: EventKind::Progress,
            task_id,
            download_id,
            data: line,
            stream: Some(stream),
        }
    }
}

/// Terminal outcome of one process run, as reported by the process runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Failed { message: String },
    Cancelled,
}

/// A task that is currently registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActiveTask {
    pub task_id: TaskId,
    pub download_id: DownloadId,
}

/// Result of sorting the download directory into the output library.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SortReport {
    pub moved_files: Vec<String>,
    pub files_with_errors: Vec<String>,
}

/// Errors surfaced synchronously by the orchestration entry points.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The submitted target is not a parseable URL.
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The extra-arguments string is not a valid shell-style word list.
    #[error("failed to parse additional arguments '{0}'")]
    InvalidArguments(String),

    /// The command builder returned nothing to execute.
    #[error("command builder produced an empty argument vector")]
    EmptyCommand,

    /// A task with this id is already registered.
    #[error("task already registered: {0}")]
    DuplicateTask(TaskId),

    /// The download-record store failed.
    #[error("store error: {0}")]
    Store(#[source] BoxError),
}

impl RuntimeError {
    pub fn store(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        RuntimeError::Store(Box::new(err))
    }

    /// Submission errors are caused by the caller's input.
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            RuntimeError::InvalidUrl { .. } | RuntimeError::InvalidArguments(_)
        )
    }
}
