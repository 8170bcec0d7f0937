//! Worker pool running the upload pipeline for dispatched tasks.

mod config;
mod runner;

pub use config::WorkerConfig;
pub use runner::{RecoveryReport, UploadWorkers, WorkerStatus, INTERRUPTED_MESSAGE};
