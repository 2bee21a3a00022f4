//! Download-record persistence seam.
//!
//! The runtime only talks to storage through [`DownloadStore`]; the server
//! backs it with SQLite, tests use [`MemoryStore`].

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use thiserror::Error;

use crate::runtime::types::{DownloadId, DownloadRecord, DownloadState};

pub trait DownloadStore: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Insert a new record in `pending`.
    fn create_download(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<DownloadRecord, Self::Error>> + Send;

    /// Move a record to `state`, only if that is a legal forward transition
    /// from its current state. Returns `false` when nothing was updated
    /// (missing record, or the record is already past that point).
    fn update_download_state(
        &self,
        id: DownloadId,
        state: DownloadState,
        error_message: Option<&str>,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send;

    fn get_download(
        &self,
        id: DownloadId,
    ) -> impl Future<Output = Result<Option<DownloadRecord>, Self::Error>> + Send;

    /// All records, newest first.
    fn list_downloads(&self) -> impl Future<Output = Result<Vec<DownloadRecord>, Self::Error>> + Send;

    fn delete_download(&self, id: DownloadId) -> impl Future<Output = Result<bool, Self::Error>> + Send;

    /// Mark every `pending` or `progress` record as `error` with `message`.
    /// Returns how many rows changed.
    fn interrupt_unfinished(
        &self,
        message: &str,
    ) -> impl Future<Output = Result<u64, Self::Error>> + Send;
}

#[derive(Debug, Error)]
pub enum MemoryStoreError {
    #[error("download id space exhausted")]
    Exhausted,
}

#[derive(Debug, Default)]
struct MemoryInner {
    next_id: DownloadId,
    records: BTreeMap<DownloadId, DownloadRecord>,
    history: HashMap<DownloadId, Vec<DownloadState>>,
}

/// In-process store that also keeps every state a record passed through.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// States the record has been in, oldest first.
    pub fn history(&self, id: DownloadId) -> Vec<DownloadState> {
        self.lock().history.get(&id).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DownloadStore for MemoryStore {
    type Error = MemoryStoreError;

    async fn create_download(&self, url: &str) -> Result<DownloadRecord, Self::Error> {
        let mut inner = self.lock();
        let id = inner.next_id.checked_add(1).ok_or(MemoryStoreError::Exhausted)?;
        inner.next_id = id;

        let now = Utc::now();
        let record = DownloadRecord {
            id,
            url: url.to_owned(),
            state: DownloadState::Pending,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        inner.records.insert(id, record.clone());
        inner.history.insert(id, vec![DownloadState::Pending]);
        Ok(record)
    }

    async fn update_download_state(
        &self,
        id: DownloadId,
        state: DownloadState,
        error_message: Option<&str>,
    ) -> Result<bool, Self::Error> {
        let mut inner = self.lock();
        let Some(record) = inner.records.get_mut(&id) else {
            return Ok(false);
        };
        if !record.state.can_transition_to(state) {
            return Ok(false);
        }
        record.state = state;
        record.error_message = error_message.map(str::to_owned);
        record.updated_at = Utc::now();
        inner.history.entry(id).or_default().push(state);
        Ok(true)
    }

    async fn get_download(&self, id: DownloadId) -> Result<Option<DownloadRecord>, Self::Error> {
        Ok(self.lock().records.get(&id).cloned())
    }

    async fn list_downloads(&self) -> Result<Vec<DownloadRecord>, Self::Error> {
        Ok(self.lock().records.values().rev().cloned().collect())
    }

    async fn delete_download(&self, id: DownloadId) -> Result<bool, Self::Error> {
        let mut inner = self.lock();
        inner.history.remove(&id);
        Ok(inner.records.remove(&id).is_some())
    }

    async fn interrupt_unfinished(&self, message: &str) -> Result<u64, Self::Error> {
        let mut inner = self.lock();
        let now = Utc::now();
        let mut interrupted = Vec::new();
        for record in inner.records.values_mut().filter(|r| !r.state.is_terminal()) {
            record.state = DownloadState::Error;
            record.error_message = Some(message.to_owned());
            record.updated_at = now;
            interrupted.push(record.id);
        }
        for id in &interrupted {
            inner.history.entry(*id).or_default().push(DownloadState::Error);
        }
        Ok(interrupted.len() as u64)
    }
}
