//! In-flight task bookkeeping.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::runtime::channel::EventChannel;
use crate::runtime::types::{ActiveTask, DownloadId, RuntimeError, TaskId};

/// Everything the rest of the runtime needs to reach one running task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub download_id: DownloadId,
    pub url: String,
    pub cancel: CancellationToken,
    pub events: Arc<EventChannel>,
}

#[derive(Debug)]
struct TaskEntry {
    handle: TaskHandle,
    cancel_requested: bool,
}

/// Maps live task ids to their cancellation handle and event channel.
///
/// An entry exists from registration until the task's lifecycle worker has
/// finished; the worker is the only party that removes it.
pub struct TaskRegistry {
    tasks: Mutex<HashMap<TaskId, TaskEntry>>,
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TaskRegistry({} tasks)", self.len())
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self { tasks: Mutex::new(HashMap::new()) }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, TaskEntry>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, task_id: TaskId, handle: TaskHandle) -> Result<(), RuntimeError> {
        let mut tasks = self.lock();
        if tasks.contains_key(&task_id) {
            return Err(RuntimeError::DuplicateTask(task_id));
        }
        tasks.insert(task_id, TaskEntry { handle, cancel_requested: false });
        Ok(())
    }

    /// Request cancellation of a task.
    ///
    /// Returns `true` only for the first request against a registered task;
    /// unknown ids and repeated requests return `false`. The entry itself is
    /// left in place until the lifecycle worker finishes.
    pub fn cancel(&self, task_id: &TaskId) -> bool {
        let token = {
            let mut tasks = self.lock();
            match tasks.get_mut(task_id) {
                Some(entry) if !entry.cancel_requested => {
                    entry.cancel_requested = true;
                    entry.handle.cancel.clone()
                }
                _ => return false,
            }
        };
        token.cancel();
        true
    }

    /// Request cancellation of every registered task. Returns how many were
    /// newly signalled.
    pub fn cancel_all(&self) -> usize {
        let tokens: Vec<CancellationToken> = {
            let mut tasks = self.lock();
            tasks
                .values_mut()
                .filter(|entry| !entry.cancel_requested)
                .map(|entry| {
                    entry.cancel_requested = true;
                    entry.handle.cancel.clone()
                })
                .collect()
        };
        for token in &tokens {
            token.cancel();
        }
        tokens.len()
    }

    /// Drop a task's entry. Removing an absent id is a no-op.
    pub fn remove(&self, task_id: &TaskId) -> Option<TaskHandle> {
        self.lock().remove(task_id).map(|entry| entry.handle)
    }

    pub fn get(&self, task_id: &TaskId) -> Option<TaskHandle> {
        self.lock().get(task_id).map(|entry| entry.handle.clone())
    }

    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.lock().contains_key(task_id)
    }

    /// Task currently driving the given download record, if any.
    pub fn find_by_download(&self, download_id: DownloadId) -> Option<TaskId> {
        self.lock()
            .iter()
            .find(|(_, entry)| entry.handle.download_id == download_id)
            .map(|(task_id, _)| *task_id)
    }

    pub fn snapshot(&self) -> Vec<ActiveTask> {
        let mut active: Vec<ActiveTask> = self
            .lock()
            .iter()
            .map(|(task_id, entry)| ActiveTask {
                task_id: *task_id,
                download_id: entry.handle.download_id,
            })
            .collect();
        active.sort_by_key(|task| task.download_id);
        active
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
