//! Database layer.
//!
//! The orchestrator persists download records through the
//! [`scyd_core::store::DownloadStore`] trait; [`sqlite::SqliteStore`] is the
//! implementation used by the server. To swap databases, implement that
//! trait for a new type and change the concrete type in
//! [`crate::state::AppState`].

pub mod sqlite;
