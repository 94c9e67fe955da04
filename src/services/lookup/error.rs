//! Look-Up engine errors.
//!
//! One variant per failure kind the executor can surface; `error_type()`
//! is the discriminator carried on failed results and HTTP error bodies.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("Reference data extraction not complete for files: {}", files.join(", "))]
    ExtractionNotComplete { files: Vec<String> },

    #[error("No data sources found for project {0}")]
    NoDataSources(String),

    #[error("Look-Up project not found: {0}")]
    ProjectNotFound(String),

    #[error("Missing prompt template: {0}")]
    TemplateNotFound(String),

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    #[error(
        "Context window exceeded: prompt requires {token_count} tokens but {model} \
         has a limit of {context_limit} tokens. Reduce reference data size or use \
         a model with larger context window."
    )]
    ContextWindowExceeded { token_count: usize, context_limit: usize, model: String },

    #[error("LLM request timed out after {0}s")]
    LlmTimeout(u64),

    #[error("LLM request failed: {0}")]
    Llm(String),

    #[error("Failed to parse LLM response: {0}")]
    Parse(String),

    #[error("No default profile found for project {0}")]
    DefaultProfile(String),

    #[error("RAG retrieval failed: {0}")]
    Retrieval(String),

    #[error("Indexing failed: {0}")]
    Indexing(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] crate::services::storage::StorageError),
}

impl LookupError {
    /// Discriminator used in failed-result payloads and HTTP error bodies.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::ContextWindowExceeded { .. } => "context_window_exceeded",
            Self::ExtractionNotComplete { .. } => "extraction_not_complete",
            Self::TemplateNotFound(_) | Self::InvalidTemplate(_) => "template_missing",
            Self::LlmTimeout(_) => "llm_timeout",
            Self::Llm(_) | Self::Retrieval(_) => "llm_error",
            Self::Parse(_) => "parse_error",
            _ => "unknown",
        }
    }
}
