pub mod args;
pub mod channel;
pub mod hooks;
pub mod orchestrator;
pub mod registry;
pub mod runner;
pub mod types;
