//! Look-Up Data Models
//!
//! Database row types for Look-Up projects, templates, reference data
//! sources, adapter profiles, vector index bookkeeping, Prompt Studio
//! links, and the execution audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

// ============================================================================
// Status Enums
// ============================================================================

/// Text extraction status of a reference data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ExtractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse_status(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            _ => Self::Failed,
        }
    }
}

/// Supported reference file types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Xlsx,
    Csv,
    Docx,
    Txt,
    Json,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Xlsx => "xlsx",
            Self::Csv => "csv",
            Self::Docx => "docx",
            Self::Txt => "txt",
            Self::Json => "json",
        }
    }

    pub fn parse_type(s: &str) -> Option<Self> {
        match s {
            "pdf" => Some(Self::Pdf),
            "xlsx" => Some(Self::Xlsx),
            "csv" => Some(Self::Csv),
            "docx" => Some(Self::Docx),
            "txt" => Some(Self::Txt),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    /// Text-native formats need no extraction; the raw upload can be read
    /// directly when no extracted content is available.
    pub fn is_text_native(s: &str) -> bool {
        matches!(s, "csv" | "txt" | "json")
    }
}

/// Execution audit status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Partial,
    Failed,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

// ============================================================================
// Look-Up Project
// ============================================================================

/// A Look-Up project: one prompt template + one reference corpus + adapter
/// profiles, owned by an organization.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct LookupProject {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub organization: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Prompt Template
// ============================================================================

/// Prompt template with `{{variable}}` placeholders and LLM configuration.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct LookupPromptTemplate {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub template_text: String,
    /// JSON object; must contain `adapter_id` or both `provider` and `model`
    pub llm_config: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LookupPromptTemplate {
    /// Parse the stored `llm_config` JSON. Unparseable config degrades to an
    /// empty object rather than failing the execution path.
    pub fn llm_config_value(&self) -> serde_json::Value {
        serde_json::from_str(&self.llm_config)
            .unwrap_or_else(|_| serde_json::Value::Object(Default::default()))
    }
}

// ============================================================================
// Data Source
// ============================================================================

/// A versioned reference data upload. Each upload creates a new version;
/// prior rows for the project have `is_latest` cleared in the same
/// transaction that assigns `max(version)+1`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct LookupDataSource {
    pub id: String,
    pub project_id: String,
    pub file_name: String,
    pub file_path: String,
    pub file_size: i64,
    pub file_type: String,
    pub extracted_content_path: Option<String>,
    pub extraction_status: String,
    pub extraction_error: Option<String>,
    pub version_number: i64,
    pub is_latest: bool,
    pub created_at: DateTime<Utc>,
}

impl LookupDataSource {
    pub fn extraction_status_enum(&self) -> ExtractionStatus {
        ExtractionStatus::parse_status(&self.extraction_status)
    }

    pub fn is_extraction_complete(&self) -> bool {
        self.extraction_status_enum() == ExtractionStatus::Completed
    }

    /// Where to read this source's text from: the extracted content if
    /// present, else the raw upload for text-native formats.
    pub fn content_path(&self) -> Option<&str> {
        match &self.extracted_content_path {
            Some(path) if !path.is_empty() => Some(path),
            _ if FileType::is_text_native(&self.file_type) => Some(&self.file_path),
            _ => None,
        }
    }
}

// ============================================================================
// Profile Manager
// ============================================================================

/// The tuple of adapters a project uses for extraction, embedding,
/// retrieval, and generation.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct LookupProfileManager {
    pub id: String,
    pub project_id: String,
    pub profile_name: String,
    pub llm_adapter: String,
    pub embedding_adapter: String,
    pub vector_store_adapter: String,
    pub x2text_adapter: String,
    pub chunk_size: i64,
    pub chunk_overlap: i64,
    pub similarity_top_k: i64,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

impl LookupProfileManager {
    /// `chunk_size == 0` is the no-RAG sentinel: feed the whole reference
    /// text to the LLM instead of retrieving chunks.
    pub fn uses_rag(&self) -> bool {
        self.chunk_size > 0
    }
}

// ============================================================================
// Index Manager
// ============================================================================

/// Vector-index bookkeeping per (data source, profile) pair.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LookupIndexManager {
    pub id: String,
    pub data_source_id: String,
    pub profile_id: String,
    pub raw_index_id: Option<String>,
    /// JSON array of every doc id ever written for this pair
    pub index_ids_history: String,
    /// JSON map from profile-config fingerprint to extraction state
    pub extraction_status: String,
    pub reindex_required: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Extraction state for one profile-config fingerprint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexExtractionState {
    pub extracted: bool,
    #[serde(default)]
    pub highlight_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LookupIndexManager {
    pub fn index_ids(&self) -> Vec<String> {
        serde_json::from_str(&self.index_ids_history).unwrap_or_default()
    }

    pub fn extraction_states(&self) -> std::collections::HashMap<String, IndexExtractionState> {
        serde_json::from_str(&self.extraction_status).unwrap_or_default()
    }
}

// ============================================================================
// Prompt Studio Link
// ============================================================================

/// Weak back-reference from an external Prompt Studio project id to a
/// Look-Up project. Lower `execution_order` wins priority ties.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct PromptStudioLookupLink {
    pub id: String,
    pub prompt_studio_project_id: String,
    pub lookup_project_id: String,
    pub execution_order: i64,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Execution Audit
// ============================================================================

/// Immutable, append-only record of one executor invocation.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct LookupExecutionAudit {
    pub id: String,
    pub lookup_project_id: String,
    pub prompt_studio_project_id: Option<String>,
    pub execution_id: String,
    pub file_execution_id: Option<String>,
    /// JSON snapshot of the input record
    pub input_data: String,
    pub reference_data_version: i64,
    /// JSON enrichment output (required when status is success)
    pub enriched_output: Option<String>,
    pub llm_provider: String,
    pub llm_model: String,
    pub llm_prompt: String,
    pub llm_response: Option<String>,
    pub llm_response_cached: bool,
    pub execution_time_ms: Option<i64>,
    pub llm_call_time_ms: Option<i64>,
    pub status: String,
    pub error_message: Option<String>,
    /// 0.00 to 1.00, two decimals
    pub confidence_score: Option<f64>,
    pub executed_at: DateTime<Utc>,
}

impl LookupExecutionAudit {
    pub fn was_successful(&self) -> bool {
        self.status == "success" || self.status == "partial"
    }
}
