pub mod auth;
pub mod download;
pub mod sort;
pub mod task;
