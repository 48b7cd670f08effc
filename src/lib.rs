//! evidencesync - Incremental sync and analysis of personal work evidence
//!
//! This library reconciles merged pull requests and resolved tickets into a
//! local SQLite store, classifies them in batches with an LLM, and reports
//! progress through long-running jobs.

pub mod cli;
pub mod config;
pub mod error;
pub mod evidence;
pub mod jobs;
pub mod llm;
pub mod snapshot;
pub mod sources;
pub mod storage;
pub mod sync;
pub mod tagger;

/// Re-export commonly used types
pub use error::SyncError;
pub use evidence::{AnalysisResult, ComponentTag, DetailRecord, SourceSystem, WorkItemReference};
pub use jobs::{JobOrchestrator, JobStatus, JobView};
pub use storage::Database;
pub use sync::{SyncPipeline, SyncRequest, SyncSummary};

/// Application-wide error type
pub use anyhow::Result;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_NAME: &str = "evidencesync";
