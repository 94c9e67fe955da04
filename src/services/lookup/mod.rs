//! Look-Up Enrichment Engine
//!
//! Enriches structured records with canonical or supplementary fields drawn
//! from user-supplied reference corpora. Each Look-Up binds a prompt
//! template, a versioned reference corpus, and an adapter profile; the
//! orchestrator runs many of them in parallel and merges their outputs.
//!
//! # Architecture
//! ```text
//! caller → Orchestrator → N × Executor → {Loader, Resolver, Cache,
//!                                          LlmClient, AuditLogger}
//!                        → Merger → caller
//! ```

mod audit;
mod cache;
mod error;
mod executor;
mod indexing;
mod llm;
mod merger;
mod orchestrator;
mod reference_loader;
mod repository;
mod resolver;

pub use audit::{AuditLogger, AuditRecord, ProjectAuditStats};
pub use cache::{CacheStats, DEFAULT_KEY_PREFIX, ResponseCache};
pub use error::LookupError;
pub use executor::{
    ExecutionContext, LookupExecutor, LookupFailure, LookupOutcome, LookupSuccess,
    parse_llm_response,
};
pub use indexing::{
    ExtractRequest, HttpIndexerClient, IndexRequest, IndexerClient, IndexingService,
    VectorStoreAdapter,
};
pub use llm::{
    DEFAULT_CONTEXT_WINDOW, LlmAdapter, LlmClient, LlmConfig, OpenAiCompatAdapter,
    RESERVED_OUTPUT_TOKENS, context_window_for, estimate_tokens, validate_llm_config,
};
pub use merger::{EnrichmentDetail, EnrichmentMerger, MergeResult};
pub use orchestrator::{
    ExecuteOptions, LookupMetadata, LookupOrchestrator, OrchestrationResult,
    OrchestratorConfig, filter_changed_fields,
};
pub use reference_loader::{ReferenceData, ReferenceDataLoader, ReferenceFile};
pub use repository::LookupRepository;
pub use resolver::{
    VariableResolver, validate_reserved_keywords, validate_syntax, validate_template,
};

#[cfg(test)]
mod tests;
