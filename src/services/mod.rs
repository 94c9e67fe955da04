pub mod lookup;
pub mod storage;

pub use lookup::{
    AuditLogger, EnrichmentMerger, IndexingService, LlmClient, LookupError, LookupExecutor,
    LookupOrchestrator, LookupRepository, ReferenceDataLoader, ResponseCache,
};
pub use storage::{FsStorageClient, StorageClient, StorageError};
