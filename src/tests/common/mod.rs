//! Shared fixtures: in-memory database, scripted LLM adapter, in-memory
//! storage, and stub indexer/vector-store collaborators.

use async_trait::async_trait;
use serde_json::json;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::AppState;
use crate::config::Config;
use crate::db;
use crate::models::lookup::{ExtractionStatus, LookupProject};
use crate::services::lookup::{
    AuditLogger, ExtractRequest, IndexRequest, IndexerClient, IndexingService, LlmAdapter,
    LlmClient, LlmConfig, LookupError, LookupExecutor, LookupOrchestrator, LookupRepository,
    OrchestratorConfig, ReferenceDataLoader, ResponseCache, VectorStoreAdapter,
};
use crate::services::storage::{StorageClient, StorageError};

pub async fn setup_test_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create test database");

    db::init_schema(&pool).await.expect("Failed to create schema");
    pool
}

// ============================================================================
// In-memory storage
// ============================================================================

#[derive(Default)]
pub struct MemoryStorage {
    files: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn put(&self, path: &str, content: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_string());
    }
}

#[async_trait]
impl StorageClient for MemoryStorage {
    async fn get(&self, path: &str) -> Result<String, StorageError> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::FileNotFound(path.to_string()))
    }

    async fn exists(&self, path: &str) -> bool {
        self.files.lock().unwrap().contains_key(path)
    }
}

// ============================================================================
// Scripted LLM adapter
// ============================================================================

/// Adapter that answers from (prompt substring → response) rules and counts
/// dispatches; used both as a stub and as a no-dispatch spy.
#[derive(Default)]
pub struct ScriptedLlm {
    rules: Vec<(String, String)>,
    default_response: Option<String>,
    pub calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedLlm {
    pub fn answering(response: &str) -> Self {
        Self { default_response: Some(response.to_string()), ..Default::default() }
    }

    pub fn with_rule(mut self, prompt_contains: &str, response: &str) -> Self {
        self.rules
            .push((prompt_contains.to_string(), response.to_string()));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmAdapter for ScriptedLlm {
    async fn complete(
        &self,
        prompt: &str,
        _config: &LlmConfig,
        _timeout: Duration,
    ) -> Result<String, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        for (needle, response) in &self.rules {
            if prompt.contains(needle) {
                return Ok(response.clone());
            }
        }

        self.default_response
            .clone()
            .ok_or_else(|| LookupError::Llm("No scripted response matched".to_string()))
    }
}

// ============================================================================
// Stub indexer + vector store
// ============================================================================

#[derive(Default)]
pub struct StubIndexer {
    pub extract_calls: AtomicUsize,
    pub index_calls: AtomicUsize,
}

#[async_trait]
impl IndexerClient for StubIndexer {
    async fn extract(&self, request: &ExtractRequest) -> Result<String, LookupError> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("extracted text of {}", request.file_path))
    }

    async fn index(&self, _request: &IndexRequest) -> Result<String, LookupError> {
        let n = self.index_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("doc-{}", n + 1))
    }
}

#[derive(Default)]
pub struct RecordingVectorStore {
    pub deleted: Mutex<Vec<String>>,
}

#[async_trait]
impl VectorStoreAdapter for RecordingVectorStore {
    async fn delete(&self, ref_doc_id: &str) -> Result<(), LookupError> {
        self.deleted.lock().unwrap().push(ref_doc_id.to_string());
        Ok(())
    }
}

// ============================================================================
// Environment builders
// ============================================================================

/// Wired engine parts over one database, storage, and LLM adapter.
pub struct TestEnv {
    pub pool: SqlitePool,
    pub repository: Arc<LookupRepository>,
    pub storage: Arc<MemoryStorage>,
    pub loader: Arc<ReferenceDataLoader>,
    pub cache: Arc<ResponseCache>,
    pub audit: Arc<AuditLogger>,
    pub executor: Arc<LookupExecutor>,
}

impl TestEnv {
    pub async fn new(adapter: Arc<dyn LlmAdapter>, use_cache: bool) -> Self {
        let pool = setup_test_db().await;
        let repository = Arc::new(LookupRepository::new(pool.clone()));
        let storage = Arc::new(MemoryStorage::default());
        let loader = Arc::new(ReferenceDataLoader::new(
            Arc::clone(&repository),
            storage.clone() as Arc<dyn StorageClient>,
        ));
        let cache = Arc::new(ResponseCache::new(pool.clone(), 24, "lookup:llm:"));
        let audit = Arc::new(AuditLogger::new(pool.clone()));
        let llm_client = Arc::new(LlmClient::new(adapter, Duration::from_secs(30)));

        let executor = Arc::new(LookupExecutor::new(
            Arc::clone(&repository),
            Arc::clone(&loader),
            use_cache.then(|| Arc::clone(&cache)),
            llm_client,
            Arc::clone(&audit),
        ));

        Self { pool, repository, storage, loader, cache, audit, executor }
    }

    pub fn orchestrator(&self, config: OrchestratorConfig) -> LookupOrchestrator {
        LookupOrchestrator::new(Arc::clone(&self.executor), config)
    }

    /// Full application state over this environment, for handler tests.
    pub fn app_state(&self, llm_adapter: Arc<dyn LlmAdapter>) -> Arc<AppState> {
        let llm_client = Arc::new(LlmClient::new(llm_adapter, Duration::from_secs(30)));
        let indexing = Arc::new(IndexingService::new(
            Arc::clone(&self.repository),
            self.storage.clone() as Arc<dyn StorageClient>,
            Arc::new(StubIndexer::default()),
            Arc::new(RecordingVectorStore::default()),
            Arc::clone(&self.cache),
        ));

        Arc::new(AppState {
            db: self.pool.clone(),
            config: Config::default(),
            repository: Arc::clone(&self.repository),
            storage: self.storage.clone() as Arc<dyn StorageClient>,
            loader: Arc::clone(&self.loader),
            cache: Arc::clone(&self.cache),
            llm_client,
            audit: Arc::clone(&self.audit),
            indexing,
        })
    }

    /// Create a ready-to-execute Look-Up project: active template, one
    /// completed data source, a default profile, and reference text in
    /// storage. The template embeds the project name so a `ScriptedLlm`
    /// rule can target it.
    pub async fn seed_project(&self, name: &str, reference_content: &str) -> LookupProject {
        let project = self.repository.create_project(name, "org1").await.unwrap();

        let template_text = format!(
            "Look-Up {}: enrich {{{{input_data}}}} using:\n{{{{reference_data}}}}",
            name
        );
        self.repository
            .create_template(
                &project.id,
                "default",
                &template_text,
                &json!({"provider": "openai", "model": "gpt-4"}),
            )
            .await
            .unwrap();

        let content_path = format!("extracted/{}.txt", name);
        self.storage.put(&content_path, reference_content);
        self.repository
            .insert_data_source(
                &project.id,
                &format!("{}.csv", name),
                &format!("uploads/{}.csv", name),
                reference_content.len() as i64,
                "csv",
                Some(&content_path),
                ExtractionStatus::Completed,
            )
            .await
            .unwrap();

        self.repository
            .create_profile(&project.id, "default", ["llm1", "emb1", "vec1", "x2t1"], 0, 0, 3, true)
            .await
            .unwrap();

        project
    }
}
