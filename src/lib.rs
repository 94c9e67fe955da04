//! Meridian Library
//!
//! Core modules for the Meridian Look-Up enrichment service.

use sqlx::SqlitePool;
use std::sync::Arc;

pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use services::lookup::{
    AuditLogger, IndexingService, LlmClient, LookupError, LookupExecutor, LookupOrchestrator,
    LookupRepository, ReferenceDataLoader, ResponseCache,
};
pub use services::storage::{FsStorageClient, StorageClient};

/// Application shared state
///
/// Design Philosophy: Keep it simple - Rust's type system IS our DI container.
/// All collaborators are wrapped in Arc for cheap cloning and thread safety;
/// the executor/orchestrator pair is built per request from these parts.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Config,

    pub repository: Arc<LookupRepository>,
    pub storage: Arc<dyn StorageClient>,
    pub loader: Arc<ReferenceDataLoader>,
    pub cache: Arc<ResponseCache>,
    pub llm_client: Arc<LlmClient>,
    pub audit: Arc<AuditLogger>,
    pub indexing: Arc<IndexingService>,
}

#[cfg(test)]
mod tests;
