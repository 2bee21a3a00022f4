//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use scyd_core::Orchestrator;

use crate::config::{Config, UserConfig};
use crate::db::sqlite::SqliteStore;
use crate::session::SessionStore;
use crate::sorter::LibrarySorter;

pub type DownloadOrchestrator = Orchestrator<SqliteStore>;

/// State shared across all HTTP handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// User settings from the TOML file.
    pub settings: Arc<UserConfig>,
    /// Starts, cancels and streams downloads; owns the record store.
    pub orchestrator: DownloadOrchestrator,
    /// Login sessions.
    pub sessions: Arc<SessionStore>,
    /// Download-directory sorter, also used after each download when enabled.
    pub sorter: Arc<LibrarySorter>,
}
