mod runtime;

pub mod store;

pub use runtime::args::split_args;
pub use runtime::channel::{DEFAULT_EVENT_BUFFER, EventChannel, event_stream};
pub use runtime::hooks::{HookContext, HookKind, Hooks};
pub use runtime::orchestrator::{
    CANCELLED_MESSAGE, COMPLETED_MESSAGE, CommandBuilder, DeleteOutcome, DownloadSorter,
    INTERRUPTED_MESSAGE, Orchestrator, OrchestratorConfig, STARTED_MESSAGE, Submission,
};
pub use runtime::registry::{TaskHandle, TaskRegistry};
pub use runtime::runner::{DEFAULT_DRAIN_TIMEOUT, LineSink, ProcessRunner, RunningProcess, SpawnError, is_error_line};
pub use runtime::types::{
    ActiveTask, BoxError, DownloadEvent, DownloadId, DownloadRecord, DownloadState, EventKind,
    OutputStream, RunOutcome, RuntimeError, SortReport, TaskId,
};
