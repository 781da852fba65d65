//! I/O helpers: configuration, collaborator processes and on-disk artifacts.

pub mod config;
pub mod feedback_store;
pub mod generator;
pub mod init;
pub mod process;
pub mod prompt;
pub mod run_archive;
pub mod session_log;
