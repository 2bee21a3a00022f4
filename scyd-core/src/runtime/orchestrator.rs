use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::runtime::args::split_args;
use crate::runtime::channel::{DEFAULT_EVENT_BUFFER, EventChannel};
use crate::runtime::hooks::{HookContext, HookKind, Hooks};
use crate::runtime::registry::{TaskHandle, TaskRegistry};
use crate::runtime::runner::{DEFAULT_DRAIN_TIMEOUT, LineSink, ProcessRunner};
use crate::runtime::types::{
    ActiveTask, DownloadEvent, DownloadId, DownloadRecord, DownloadState, EventKind, OutputStream,
    RunOutcome, RuntimeError, SortReport, TaskId,
};
use crate::store::DownloadStore;

pub const STARTED_MESSAGE: &str = "Download started";
pub const COMPLETED_MESSAGE: &str = "Download completed successfully";
pub const CANCELLED_MESSAGE: &str = "Download cancelled";
pub const INTERRUPTED_MESSAGE: &str = "Interrupted by server restart";

/// Turns a validated target and the user's extra flags into a full argv.
pub trait CommandBuilder: Send + Sync + 'static {
    fn build(&self, url: &str, extra_args: &[String]) -> Vec<String>;
}

/// Post-processing run after every successful download.
#[async_trait]
pub trait DownloadSorter: Send + Sync + 'static {
    async fn sort(&self) -> anyhow::Result<SortReport>;
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Per-observer event buffer.
    pub event_buffer: usize,
    /// Grace period for output readers after the process exits.
    pub drain_timeout: Duration,
    /// Files removed after every task, whatever its outcome.
    pub transient_artifacts: Vec<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            event_buffer: DEFAULT_EVENT_BUFFER,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            transient_artifacts: Vec::new(),
        }
    }
}

/// Returned by [`Orchestrator::submit`] before any work has started.
#[derive(Debug)]
pub struct Submission {
    pub task_id: TaskId,
    pub download: DownloadRecord,
    /// Observer attached before the lifecycle worker starts, so it sees the
    /// full event sequence. Dropping it is fine.
    pub events: broadcast::Receiver<DownloadEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    /// The record is still being driven by this task.
    Active(TaskId),
}

/// Submits downloads, drives each one through its lifecycle and exposes
/// cancellation and live event subscription.
///
/// # Usage
///
/// ```rust,ignore
/// let orchestrator = Orchestrator::new(store, commands, OrchestratorConfig::default());
/// let submission = orchestrator.submit("https://example.com/watch?v=x", None).await?;
/// let events = orchestrator.subscribe(&submission.task_id);
/// ```
pub struct Orchestrator<S> {
    store: Arc<S>,
    registry: Arc<TaskRegistry>,
    commands: Arc<dyn CommandBuilder>,
    hooks: Arc<Hooks>,
    sorter: Option<Arc<dyn DownloadSorter>>,
    config: Arc<OrchestratorConfig>,
}

impl<S> Clone for Orchestrator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            commands: Arc::clone(&self.commands),
            hooks: Arc::clone(&self.hooks),
            sorter: self.sorter.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S> std::fmt::Debug for Orchestrator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("hooks", &self.hooks)
            .field("sorter", &self.sorter.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl<S: DownloadStore> Orchestrator<S> {
    pub fn new(store: Arc<S>, commands: Arc<dyn CommandBuilder>, config: OrchestratorConfig) -> Self {
        Self {
            store,
            registry: Arc::new(TaskRegistry::new()),
            commands,
            hooks: Arc::new(Hooks::default()),
            sorter: None,
            config: Arc::new(config),
        }
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn with_sorter(mut self, sorter: Arc<dyn DownloadSorter>) -> Self {
        self.sorter = Some(sorter);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Validate and start a download.
    ///
    /// * `url`        – target passed through to the command builder.
    /// * `extra_args` – optional shell-style flag string.
    ///
    /// Returns once the record is persisted and the task registered; the
    /// process itself runs on a background worker. Invalid input is rejected
    /// before anything is persisted.
    pub async fn submit(
        &self,
        url: &str,
        extra_args: Option<&str>,
    ) -> Result<Submission, RuntimeError> {
        let url = url.trim();
        Url::parse(url).map_err(|e| RuntimeError::InvalidUrl {
            url: url.to_owned(),
            reason: e.to_string(),
        })?;
        let extra = split_args(extra_args.unwrap_or_default())?;
        let argv = self.commands.build(url, &extra);
        if argv.is_empty() {
            return Err(RuntimeError::EmptyCommand);
        }

        let download = self.store.create_download(url).await.map_err(RuntimeError::store)?;

        let task_id = TaskId::new();
        let (events, receiver) = EventChannel::with_observer(self.config.event_buffer);
        let events = Arc::new(events);
        let handle = TaskHandle {
            download_id: download.id,
            url: download.url.clone(),
            cancel: CancellationToken::new(),
            events,
        };
        self.registry.register(task_id, handle.clone())?;
        info!(%task_id, download_id = download.id, url = %download.url, "download submitted");

        let this = self.clone();
        tokio::spawn(async move { this.drive(task_id, handle, argv).await });

        Ok(Submission { task_id, download, events: receiver })
    }

    /// Request cancellation. `true` only for the first request against a
    /// live task.
    pub fn cancel(&self, task_id: &TaskId) -> bool {
        let accepted = self.registry.cancel(task_id);
        if accepted {
            info!(%task_id, "cancellation requested");
        } else {
            debug!(%task_id, "cancel: no active task");
        }
        accepted
    }

    /// Attach an observer to a live task. `None` for unknown or finished tasks.
    pub fn subscribe(&self, task_id: &TaskId) -> Option<broadcast::Receiver<DownloadEvent>> {
        self.registry.get(task_id)?.events.subscribe()
    }

    pub fn active_tasks(&self) -> Vec<ActiveTask> {
        self.registry.snapshot()
    }

    pub fn active_task_for(&self, download_id: DownloadId) -> Option<TaskId> {
        self.registry.find_by_download(download_id)
    }

    pub async fn list_downloads(&self) -> Result<Vec<DownloadRecord>, RuntimeError> {
        self.store.list_downloads().await.map_err(RuntimeError::store)
    }

    /// Delete a finished download record. Records still driven by a task
    /// are left alone.
    pub async fn delete_download(&self, download_id: DownloadId) -> Result<DeleteOutcome, RuntimeError> {
        if let Some(task_id) = self.registry.find_by_download(download_id) {
            return Ok(DeleteOutcome::Active(task_id));
        }
        let deleted = self.store.delete_download(download_id).await.map_err(RuntimeError::store)?;
        Ok(if deleted { DeleteOutcome::Deleted } else { DeleteOutcome::NotFound })
    }

    /// Mark records left unfinished by a previous run as failed. Call once at
    /// startup before accepting submissions.
    pub async fn recover_interrupted(&self) -> Result<u64, RuntimeError> {
        let count = self
            .store
            .interrupt_unfinished(INTERRUPTED_MESSAGE)
            .await
            .map_err(RuntimeError::store)?;
        if count > 0 {
            warn!(count, "marked interrupted downloads as failed");
        }
        Ok(count)
    }

    /// Cancel every live task and wait up to `timeout` for each to reach its
    /// terminal state. Returns `true` if all of them did. Post-processing
    /// still running at that point is not waited for.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let signalled = self.registry.cancel_all();
        if signalled > 0 {
            info!(tasks = signalled, "cancelling active downloads");
        }
        let drained = tokio::time::timeout(timeout, async {
            while !self.registry.is_empty() {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
        .await
        .is_ok();
        if !drained {
            warn!(remaining = self.registry.len(), "shutdown timed out with tasks still running");
        }
        drained
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    async fn drive(self, task_id: TaskId, handle: TaskHandle, argv: Vec<String>) {
        let mut finalizer = Finalizer {
            registry: Arc::clone(&self.registry),
            task_id,
            events: Arc::clone(&handle.events),
            finished: false,
        };

        let outcome = self.execute(task_id, &handle, &argv).await;
        let follow_up = self.conclude(task_id, &handle, outcome).await;
        // The task is gone for observers and cancel once its terminal event is out.
        finalizer.finish();

        self.follow_up(&handle, follow_up).await;
        self.cleanup_artifacts().await;
    }

    async fn execute(&self, task_id: TaskId, handle: &TaskHandle, argv: &[String]) -> RunOutcome {
        if handle.cancel.is_cancelled() {
            debug!(%task_id, download_id = handle.download_id, "cancelled before the command started");
            self.mark_started(task_id, handle).await;
            return RunOutcome::Cancelled;
        }

        let process = match ProcessRunner::new(self.config.drain_timeout).spawn(argv) {
            Ok(process) => process,
            Err(e) => {
                error!(%task_id, download_id = handle.download_id, error = %e, "failed to start download command");
                return RunOutcome::Failed {
                    message: format!("Failed to start download command: {e}"),
                };
            }
        };

        self.mark_started(task_id, handle).await;
        info!(%task_id, download_id = handle.download_id, pid = ?process.id(), "download started");

        let sink = Arc::new(ChannelSink {
            task_id,
            download_id: handle.download_id,
            events: Arc::clone(&handle.events),
        });
        process.wait(&handle.cancel, sink).await
    }

    async fn mark_started(&self, task_id: TaskId, handle: &TaskHandle) {
        self.persist(handle.download_id, DownloadState::Progress, None).await;
        handle.events.publish(DownloadEvent::lifecycle(
            EventKind::Start,
            task_id,
            handle.download_id,
            STARTED_MESSAGE,
        ));
    }

    /// Persist and publish the terminal state. Hooks and sorting wait for
    /// [`Self::follow_up`], after the task has been finalized.
    async fn conclude(&self, task_id: TaskId, handle: &TaskHandle, outcome: RunOutcome) -> FollowUp {
        let download_id = handle.download_id;
        match outcome {
            RunOutcome::Success => {
                self.persist(download_id, DownloadState::Success, None).await;
                info!(%task_id, download_id, "download completed");
                handle.events.publish(DownloadEvent::lifecycle(
                    EventKind::Success,
                    task_id,
                    download_id,
                    COMPLETED_MESSAGE,
                ));
                FollowUp::Completed
            }
            RunOutcome::Failed { message } => {
                self.persist(download_id, DownloadState::Error, Some(&message)).await;
                warn!(%task_id, download_id, error = %message, "download failed");
                handle.events.publish(DownloadEvent::lifecycle(
                    EventKind::Error,
                    task_id,
                    download_id,
                    message.clone(),
                ));
                FollowUp::Failed(message)
            }
            RunOutcome::Cancelled => {
                self.persist(download_id, DownloadState::Error, Some(CANCELLED_MESSAGE)).await;
                info!(%task_id, download_id, "download cancelled");
                handle.events.publish(DownloadEvent::lifecycle(
                    EventKind::Error,
                    task_id,
                    download_id,
                    CANCELLED_MESSAGE,
                ));
                FollowUp::Nothing
            }
        }
    }

    async fn follow_up(&self, handle: &TaskHandle, follow_up: FollowUp) {
        match follow_up {
            FollowUp::Completed => {
                self.hooks.fire(HookKind::OnDownloadComplete, hook_context(handle, None));
                self.sort_downloads(handle).await;
            }
            FollowUp::Failed(message) => {
                self.hooks.fire(HookKind::OnError, hook_context(handle, Some(message)));
            }
            FollowUp::Nothing => {}
        }
    }

    async fn persist(&self, download_id: DownloadId, state: DownloadState, error_message: Option<&str>) {
        match self.store.update_download_state(download_id, state, error_message).await {
            Ok(true) => {}
            Ok(false) => warn!(download_id, %state, "download record not updated"),
            Err(e) => error!(download_id, %state, error = %e, "failed to persist download state"),
        }
    }

    async fn sort_downloads(&self, handle: &TaskHandle) {
        let Some(sorter) = &self.sorter else {
            return;
        };
        match sorter.sort().await {
            Ok(report) => info!(
                moved = report.moved_files.len(),
                failed = report.files_with_errors.len(),
                "sorted downloads"
            ),
            Err(e) => {
                error!(download_id = handle.download_id, error = %e, "failed to sort downloads");
                self.hooks.fire(
                    HookKind::OnError,
                    hook_context(handle, Some(format!("Sorting failed: {e}"))),
                );
            }
        }
    }

    async fn cleanup_artifacts(&self) {
        for path in &self.config.transient_artifacts {
            match tokio::fs::remove_file(path).await {
                Ok(()) => debug!(path = %path.display(), "removed transient artifact"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove transient artifact"),
            }
        }
    }
}

fn hook_context(handle: &TaskHandle, error_message: Option<String>) -> HookContext {
    HookContext {
        download_id: handle.download_id,
        url: handle.url.clone(),
        error_message,
    }
}

/// Forwards captured output lines as `progress` events.
struct ChannelSink {
    task_id: TaskId,
    download_id: DownloadId,
    events: Arc<EventChannel>,
}

impl LineSink for ChannelSink {
    fn line(&self, stream: OutputStream, line: String) {
        debug!(task_id = %self.task_id, %stream, line = %line, "process output");
        self.events
            .publish(DownloadEvent::output(self.task_id, self.download_id, stream, line));
    }
}

/// Side effects owed after the terminal state is out.
enum FollowUp {
    Completed,
    Failed(String),
    Nothing,
}

/// Unregisters the task and closes its channel, once: either explicitly
/// after the terminal event or when the worker ends, including by panic.
struct Finalizer {
    registry: Arc<TaskRegistry>,
    task_id: TaskId,
    events: Arc<EventChannel>,
    finished: bool,
}

impl Finalizer {
    fn finish(&mut self) {
        if std::mem::replace(&mut self.finished, true) {
            return;
        }
        self.registry.remove(&self.task_id);
        self.events.close();
        debug!(task_id = %self.task_id, "task finalized");
    }
}

impl Drop for Finalizer {
    fn drop(&mut self) {
        self.finish();
    }
}
