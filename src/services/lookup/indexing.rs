//! Indexer collaborator - drives the external extraction + indexing service.
//!
//! Materializes one vector index per (data source, profile) pair. The heavy
//! lifting happens out of process; this service tracks per-config
//! extraction state on the index manager, dedupes concurrent indexing runs
//! through the cache, and tears indexes down when a pair is removed.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::cache::ResponseCache;
use super::error::LookupError;
use super::repository::LookupRepository;
use crate::models::lookup::{
    ExtractionStatus, IndexExtractionState, LookupDataSource, LookupProfileManager,
};
use crate::services::storage::StorageClient;

const INDEXING_CACHE_PREFIX: &str = "lookup:indexing:";
const INDEXING_STATUS_IN_PROGRESS: &str = "INDEXING";

/// In-flight indexing markers expire after an hour.
fn indexing_marker_ttl() -> chrono::Duration {
    chrono::Duration::hours(1)
}

// ============================================================================
// Indexer Service Adapter
// ============================================================================

/// Extraction request sent to the indexer service.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractRequest {
    pub x2text_instance_id: String,
    pub file_path: String,
    pub output_file_path: String,
    pub enable_highlight: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

/// Indexing request sent to the indexer service.
#[derive(Debug, Clone, Serialize)]
pub struct IndexRequest {
    pub tool_id: String,
    pub embedding_instance_id: String,
    pub vector_db_instance_id: String,
    pub x2text_instance_id: String,
    pub file_path: String,
    pub chunk_size: i64,
    pub chunk_overlap: i64,
    pub reindex: bool,
    pub enable_highlight: bool,
    pub extracted_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

/// Out-of-process extraction + indexing service.
#[async_trait]
pub trait IndexerClient: Send + Sync {
    /// Extract text from an uploaded file.
    async fn extract(&self, request: &ExtractRequest) -> Result<String, LookupError>;

    /// Embed and index extracted text; returns the vector-store doc id.
    async fn index(&self, request: &IndexRequest) -> Result<String, LookupError>;
}

/// Vector store adapter; writes happen via the indexer, only deletes here.
#[async_trait]
pub trait VectorStoreAdapter: Send + Sync {
    async fn delete(&self, ref_doc_id: &str) -> Result<(), LookupError>;
}

/// HTTP client for the indexer service.
pub struct HttpIndexerClient {
    http_client: Client,
    base_url: String,
}

impl HttpIndexerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .expect("Failed to create HTTP client");
        Self { http_client, base_url: base_url.into() }
    }

    async fn post<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        request: &Req,
    ) -> Result<Resp, LookupError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let response = self
            .http_client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| LookupError::Indexing(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LookupError::Indexing(format!("API error {}: {}", status, error_text)));
        }

        response
            .json()
            .await
            .map_err(|e| LookupError::Indexing(format!("Malformed response: {}", e)))
    }
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    extracted_text: String,
}

#[derive(Debug, Deserialize)]
struct IndexResponse {
    doc_id: String,
}

#[async_trait]
impl IndexerClient for HttpIndexerClient {
    async fn extract(&self, request: &ExtractRequest) -> Result<String, LookupError> {
        let response: ExtractResponse = self.post("/extract", request).await?;
        Ok(response.extracted_text)
    }

    async fn index(&self, request: &IndexRequest) -> Result<String, LookupError> {
        let response: IndexResponse = self.post("/index", request).await?;
        Ok(response.doc_id)
    }
}

// ============================================================================
// Indexing Service
// ============================================================================

/// Orchestrates extraction and indexing of reference data per profile.
pub struct IndexingService {
    repository: Arc<LookupRepository>,
    storage: Arc<dyn StorageClient>,
    indexer: Arc<dyn IndexerClient>,
    vector_store: Arc<dyn VectorStoreAdapter>,
    cache: Arc<ResponseCache>,
}

impl IndexingService {
    pub fn new(
        repository: Arc<LookupRepository>,
        storage: Arc<dyn StorageClient>,
        indexer: Arc<dyn IndexerClient>,
        vector_store: Arc<dyn VectorStoreAdapter>,
        cache: Arc<ResponseCache>,
    ) -> Self {
        Self { repository, storage, indexer, vector_store, cache }
    }

    /// Extract text for a data source using the profile's x2text adapter.
    ///
    /// A completed extraction with the same adapter configuration is reused
    /// from storage instead of re-extracting.
    pub async fn extract_text(
        &self,
        data_source: &LookupDataSource,
        profile: &LookupProfileManager,
        run_id: Option<&str>,
    ) -> Result<String, LookupError> {
        let fingerprint = x2text_config_fingerprint(profile, false);
        let extract_path = extract_output_path(&data_source.file_path);

        let already_extracted = self
            .repository
            .get_index_manager(&data_source.id, &profile.id)
            .await?
            .map(|manager| {
                manager
                    .extraction_states()
                    .get(&fingerprint)
                    .map(|state| state.extracted && !state.highlight_enabled)
                    .unwrap_or(false)
            })
            .unwrap_or(false);

        if already_extracted {
            match self.storage.get(&extract_path).await {
                Ok(text) => {
                    tracing::info!(
                        "Extracted text found for {}, reading from storage",
                        data_source.file_name
                    );
                    return Ok(text);
                }
                Err(e) => {
                    tracing::warn!(
                        "Extracted file missing for {}: {}. Re-extracting...",
                        data_source.file_name,
                        e
                    );
                }
            }
        }

        let request = ExtractRequest {
            x2text_instance_id: profile.x2text_adapter.clone(),
            file_path: data_source.file_path.clone(),
            output_file_path: extract_path.clone(),
            enable_highlight: false,
            run_id: run_id.map(str::to_string),
        };

        match self.indexer.extract(&request).await {
            Ok(extracted_text) => {
                self.repository
                    .set_index_extraction_state(
                        &data_source.id,
                        &profile.id,
                        &fingerprint,
                        IndexExtractionState {
                            extracted: true,
                            highlight_enabled: false,
                            error: None,
                        },
                    )
                    .await?;
                self.repository
                    .set_extraction_status(
                        &data_source.id,
                        ExtractionStatus::Completed,
                        None,
                        Some(&extract_path),
                    )
                    .await?;

                tracing::info!("Successfully extracted text from {}", data_source.file_name);
                Ok(extracted_text)
            }
            Err(e) => {
                let message = e.to_string();
                self.repository
                    .set_index_extraction_state(
                        &data_source.id,
                        &profile.id,
                        &fingerprint,
                        IndexExtractionState {
                            extracted: false,
                            highlight_enabled: false,
                            error: Some(message.clone()),
                        },
                    )
                    .await?;
                self.repository
                    .set_extraction_status(
                        &data_source.id,
                        ExtractionStatus::Failed,
                        Some(&message),
                        None,
                    )
                    .await?;

                Err(LookupError::Indexing(format!(
                    "Failed to extract '{}': {}",
                    data_source.file_name, message
                )))
            }
        }
    }

    /// Index extracted text with the profile's adapters; returns the doc id.
    ///
    /// `chunk_size == 0` skips the vector store entirely (full-context mode)
    /// but still records a deterministic doc id on the index manager.
    pub async fn index_data_source(
        &self,
        data_source: &LookupDataSource,
        profile: &LookupProfileManager,
        extracted_text: &str,
        run_id: Option<&str>,
        reindex: bool,
    ) -> Result<String, LookupError> {
        let doc_id_key = index_doc_key(data_source, profile);

        if !profile.uses_rag() {
            self.repository
                .record_index_doc(&data_source.id, &profile.id, &doc_id_key)
                .await?;
            tracing::info!("Skipping vector DB indexing since chunk size is 0");
            return Ok(doc_id_key);
        }

        let indexing_key = format!("{}{}", INDEXING_CACHE_PREFIX, doc_id_key);

        if !reindex {
            if let Some(marker) = self.cache.get(&indexing_key).await {
                if marker == INDEXING_STATUS_IN_PROGRESS {
                    return Err(LookupError::Indexing(format!(
                        "Document {} is currently being indexed",
                        data_source.file_name
                    )));
                }
                tracing::info!("Document {} already indexed: {}", data_source.file_name, marker);
                return Ok(marker);
            }
        }

        self.cache
            .set(
                &indexing_key,
                INDEXING_STATUS_IN_PROGRESS,
                Some(indexing_marker_ttl()),
            )
            .await;

        let request = IndexRequest {
            tool_id: data_source.project_id.clone(),
            embedding_instance_id: profile.embedding_adapter.clone(),
            vector_db_instance_id: profile.vector_store_adapter.clone(),
            x2text_instance_id: profile.x2text_adapter.clone(),
            file_path: extract_output_path(&data_source.file_path),
            chunk_size: profile.chunk_size,
            chunk_overlap: profile.chunk_overlap,
            reindex,
            enable_highlight: false,
            extracted_text: extracted_text.to_string(),
            run_id: run_id.map(str::to_string),
        };

        tracing::info!("Invoking indexing service for: {}", doc_id_key);
        match self.indexer.index(&request).await {
            Ok(doc_id) => {
                self.repository
                    .record_index_doc(&data_source.id, &profile.id, &doc_id)
                    .await?;
                self.cache
                    .set(
                        &indexing_key,
                        &doc_id,
                        Some(indexing_marker_ttl()),
                    )
                    .await;

                tracing::info!(
                    "Successfully indexed {} with doc_id: {}",
                    data_source.file_name,
                    doc_id
                );
                Ok(doc_id)
            }
            Err(e) => {
                self.cache.delete(&indexing_key).await;
                Err(e)
            }
        }
    }

    /// Tear down an index manager: drop the row and purge every doc id it
    /// ever wrote from the vector store. Deletes are best-effort; failures
    /// are logged and do not stop the remaining ids.
    pub async fn teardown_index_manager(
        &self,
        data_source_id: &str,
        profile_id: &str,
    ) -> Result<(), LookupError> {
        let doc_ids = self
            .repository
            .delete_index_manager(data_source_id, profile_id)
            .await?;

        for doc_id in doc_ids {
            if let Err(e) = self.vector_store.delete(&doc_id).await {
                tracing::warn!("Failed to delete doc {} from vector store: {}", doc_id, e);
            }
        }

        Ok(())
    }
}

/// Path where extracted text lands next to the upload:
/// `{dir}/extract/{stem}.txt`.
fn extract_output_path(file_path: &str) -> String {
    let path = Path::new(file_path);
    let directory = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("extracted");
    directory
        .join("extract")
        .join(format!("{}.txt", stem))
        .to_string_lossy()
        .into_owned()
}

/// Fingerprint of the x2text adapter configuration used for extraction.
fn x2text_config_fingerprint(profile: &LookupProfileManager, enable_highlight: bool) -> String {
    let mut hasher = Sha256::new();
    hasher.update(profile.x2text_adapter.as_bytes());
    hasher.update([u8::from(enable_highlight)]);
    format!("{:x}", hasher.finalize())
}

/// Deterministic index key for a (data source, profile) configuration.
fn index_doc_key(data_source: &LookupDataSource, profile: &LookupProfileManager) -> String {
    let mut hasher = Sha256::new();
    for part in [
        profile.vector_store_adapter.as_str(),
        profile.embedding_adapter.as_str(),
        profile.x2text_adapter.as_str(),
        &profile.chunk_size.to_string(),
        &profile.chunk_overlap.to_string(),
        &data_source.file_path,
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    format!("{:x}", hasher.finalize())
}
