//! Reference data loading and concatenation.
//!
//! Loads a project's reference corpus (latest or pinned version) from blob
//! storage and concatenates all files with per-file headers. Loading fails
//! up front if any selected source has not completed extraction; a missing
//! byte stream for one file never poisons the other files' text.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use super::error::LookupError;
use super::repository::LookupRepository;
use crate::models::lookup::LookupDataSource;
use crate::services::storage::StorageClient;

/// Metadata about one file contributing to the reference text.
#[derive(Debug, Clone, Serialize)]
pub struct ReferenceFile {
    pub id: String,
    pub name: String,
    pub size: i64,
    pub file_type: String,
    pub uploaded_at: DateTime<Utc>,
}

/// A loaded reference corpus version.
#[derive(Debug, Clone, Serialize)]
pub struct ReferenceData {
    pub version: i64,
    pub content: String,
    pub files: Vec<ReferenceFile>,
    pub total_size: i64,
}

/// Loads and concatenates reference data from object storage.
pub struct ReferenceDataLoader {
    repository: Arc<LookupRepository>,
    storage: Arc<dyn StorageClient>,
}

impl ReferenceDataLoader {
    pub fn new(repository: Arc<LookupRepository>, storage: Arc<dyn StorageClient>) -> Self {
        Self { repository, storage }
    }

    /// Load the latest, or an explicitly pinned, reference data version.
    pub async fn load(
        &self,
        project_id: &str,
        version: Option<i64>,
    ) -> Result<ReferenceData, LookupError> {
        match version {
            Some(version) => self.load_version(project_id, version).await,
            None => self.load_latest_for_project(project_id).await,
        }
    }

    /// Load the latest reference data version for a project.
    pub async fn load_latest_for_project(
        &self,
        project_id: &str,
    ) -> Result<ReferenceData, LookupError> {
        let sources = self.repository.latest_sources(project_id).await?;
        self.assemble(project_id, sources).await
    }

    /// Load a pinned reference data version for a project. Deterministic in
    /// the set of rows at that version.
    pub async fn load_version(
        &self,
        project_id: &str,
        version: i64,
    ) -> Result<ReferenceData, LookupError> {
        let sources = self.repository.sources_for_version(project_id, version).await?;
        self.assemble(project_id, sources).await
    }

    async fn assemble(
        &self,
        project_id: &str,
        sources: Vec<LookupDataSource>,
    ) -> Result<ReferenceData, LookupError> {
        if sources.is_empty() {
            return Err(LookupError::NoDataSources(project_id.to_string()));
        }

        let (all_complete, failed_files) = Self::validate_extraction_complete(&sources);
        if !all_complete {
            return Err(LookupError::ExtractionNotComplete { files: failed_files });
        }

        let version = sources[0].version_number;
        let content = self.concatenate_sources(&sources).await;

        let mut files = Vec::with_capacity(sources.len());
        let mut total_size = 0;
        for source in &sources {
            files.push(ReferenceFile {
                id: source.id.clone(),
                name: source.file_name.clone(),
                size: source.file_size,
                file_type: source.file_type.clone(),
                uploaded_at: source.created_at,
            });
            total_size += source.file_size;
        }

        Ok(ReferenceData { version, content, files, total_size })
    }

    /// Concatenate extracted content from multiple sources in upload order.
    ///
    /// Content comes from `extracted_content_path` when present, falling
    /// back to the raw upload for text-native formats. Unreadable files are
    /// represented inline rather than failing the whole load.
    pub async fn concatenate_sources(&self, sources: &[LookupDataSource]) -> String {
        let mut content = String::new();

        for source in sources {
            let file_content = match source.content_path() {
                Some(path) => match self.storage.get(path).await {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(
                            "Failed to load reference file {}: {}",
                            source.file_name,
                            e
                        );
                        format!("[Error loading file: {}]", e)
                    }
                },
                None => "[No content path available]".to_string(),
            };

            content.push_str(&format!(
                "=== File: {} ===\n\n{}\n\n",
                source.file_name, file_content
            ));
        }

        content
    }

    /// Check whether every source has completed extraction; returns the
    /// offending file names otherwise.
    pub fn validate_extraction_complete(sources: &[LookupDataSource]) -> (bool, Vec<String>) {
        let failed_files: Vec<String> = sources
            .iter()
            .filter(|s| !s.is_extraction_complete())
            .map(|s| s.file_name.clone())
            .collect();

        (failed_files.is_empty(), failed_files)
    }
}
