//! Look-Up Engine Unit Tests
//!
//! Tests for variable resolution, reference loading, response caching,
//! LLM response handling, enrichment merging, and audit logging.

use super::*;
use async_trait::async_trait;
use serde_json::json;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use crate::db;
use crate::models::lookup::{ExtractionStatus, LookupDataSource};
use crate::services::storage::{StorageClient, StorageError};

/// Create an in-memory SQLite database with the full schema
async fn setup_test_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create test database");

    db::init_schema(&pool).await.expect("Failed to create schema");
    pool
}

/// In-memory storage backend for loader tests
#[derive(Default)]
struct MemoryStorage {
    files: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    fn with_file(path: &str, content: &str) -> Self {
        let storage = Self::default();
        storage
            .files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_string());
        storage
    }

    fn put(&self, path: &str, content: &str) {
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

fn make_source(
    project_id: &str,
    file_name: &str,
    file_type: &str,
    extracted_content_path: Option<&str>,
    status: ExtractionStatus,
) -> LookupDataSource {
    LookupDataSource {
        id: uuid::Uuid::new_v4().to_string(),
        project_id: project_id.to_string(),
        file_name: file_name.to_string(),
        file_path: format!("uploads/{}", file_name),
        file_size: 128,
        file_type: file_type.to_string(),
        extracted_content_path: extracted_content_path.map(str::to_string),
        extraction_status: status.as_str().to_string(),
        extraction_error: None,
        version_number: 1,
        is_latest: true,
        created_at: chrono::Utc::now(),
    }
}

// ============================================================================
// Variable Resolver Tests
// ============================================================================

mod resolver_tests {
    use super::*;

    #[test]
    fn test_resolve_simple_variables() {
        let input = json!({"vendor": "Slack Inc"});
        let resolver = VariableResolver::new(&input, "Slack\nMicrosoft\nGoogle");

        let resolved =
            resolver.resolve("Match {{input_data.vendor}} against: {{reference_data}}");
        assert_eq!(resolved, "Match Slack Inc against: Slack\nMicrosoft\nGoogle");
    }

    #[test]
    fn test_resolve_nested_path_and_list_index() {
        let input = json!({"vendor": {"names": ["Slack", "Slack Technologies"]}});
        let resolver = VariableResolver::new(&input, "");

        assert_eq!(resolver.resolve("{{input_data.vendor.names.1}}"), "Slack Technologies");
        assert_eq!(resolver.resolve("{{ input_data.vendor.names.0 }}"), "Slack");
    }

    #[test]
    fn test_missing_variable_resolves_to_empty_string() {
        let input = json!({"vendor": "Slack"});
        let resolver = VariableResolver::new(&input, "");

        assert_eq!(resolver.resolve("[{{input_data.missing}}]"), "[]");
        assert_eq!(resolver.resolve("[{{input_data.vendor.deep}}]"), "[]");
        assert_eq!(resolver.resolve("[{{input_data.vendor.7}}]"), "[]");
    }

    #[test]
    fn test_null_resolves_to_empty_string() {
        let input = json!({"vendor": null});
        let resolver = VariableResolver::new(&input, "");

        assert_eq!(resolver.resolve("[{{input_data.vendor}}]"), "[]");
    }

    #[test]
    fn test_complex_value_renders_as_pretty_json() {
        let input = json!({"vendor": {"name": "Slack", "tier": 1}});
        let resolver = VariableResolver::new(&input, "");

        let resolved = resolver.resolve("{{input_data.vendor}}");
        let parsed: serde_json::Value = serde_json::from_str(&resolved).unwrap();
        assert_eq!(parsed, json!({"name": "Slack", "tier": 1}));
        // Pretty-printed across multiple lines
        assert!(resolved.contains('\n'));
    }

    #[test]
    fn test_scalars_stringify() {
        let input = json!({"count": 42, "active": true});
        let resolver = VariableResolver::new(&input, "");

        assert_eq!(resolver.resolve("{{input_data.count}}/{{input_data.active}}"), "42/true");
    }

    #[test]
    fn test_detect_variables_deduplicates_and_sorts() {
        let template =
            "{{input_data.vendor}} and {{reference_data}} and {{input_data.vendor}}";
        let vars = VariableResolver::detect_variables(template);
        assert_eq!(vars, vec!["input_data.vendor", "reference_data"]);
    }

    #[test]
    fn test_detect_variables_empty_template() {
        assert!(VariableResolver::detect_variables("").is_empty());
        assert!(VariableResolver::detect_variables("no placeholders").is_empty());
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let input = json!({"vendor": "Slack"});
        let resolver = VariableResolver::new(&input, "ref text");
        let template = "Match {{input_data.vendor}} against {{reference_data}}";

        let once = resolver.resolve(template);
        let twice = resolver.resolve(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_missing_variables_reported() {
        let input = json!({"vendor": "Slack"});
        let resolver = VariableResolver::new(&input, "");

        let missing =
            resolver.missing_variables("{{input_data.vendor}} {{input_data.category}}");
        assert_eq!(missing, vec!["input_data.category"]);
    }

    #[test]
    fn test_validate_syntax_rejects_mismatched_braces() {
        assert!(validate_syntax("{{input_data.vendor}").is_err());
        assert!(validate_syntax("{{a}} {{b}}").is_ok());
    }

    #[test]
    fn test_validate_syntax_rejects_nested_placeholders() {
        assert!(validate_syntax("{{outer {{inner}} }}").is_err());
    }

    #[test]
    fn test_validate_reserved_keywords() {
        assert!(validate_reserved_keywords("{{_lookup_meta}}").is_err());
        assert!(validate_reserved_keywords("{{_private}}").is_err());
        assert!(validate_reserved_keywords("{{vendor=value}}").is_err());
        assert!(validate_reserved_keywords("{{vendor_metadata}}").is_err());
        assert!(validate_reserved_keywords("{{input_data.vendor}}").is_ok());
    }

    #[test]
    fn test_validate_template_requires_reference_data_token() {
        assert!(validate_template("Match {{input_data.vendor}}").is_err());
        assert!(validate_template("Match {{input_data.vendor}} in {{reference_data}}").is_ok());
        assert!(validate_template("").is_err());
    }
}

// ============================================================================
// Reference Loader Tests
// ============================================================================

mod loader_tests {
    use super::*;

    #[tokio::test]
    async fn test_load_latest_reads_extracted_content() {
        let pool = setup_test_db().await;
        let repo = Arc::new(LookupRepository::new(pool));
        let storage = Arc::new(MemoryStorage::with_file("extracted/vendors.txt", "Slack\nGoogle"));
        let loader = ReferenceDataLoader::new(Arc::clone(&repo), storage);

        let project = repo.create_project("Vendors", "org1").await.unwrap();
        repo.insert_data_source(
            &project.id,
            "vendors.csv",
            "uploads/vendors.csv",
            1024,
            "csv",
            Some("extracted/vendors.txt"),
            ExtractionStatus::Completed,
        )
        .await
        .unwrap();

        let data = loader.load_latest_for_project(&project.id).await.unwrap();
        assert_eq!(data.version, 1);
        assert_eq!(data.content, "=== File: vendors.csv ===\n\nSlack\nGoogle\n\n");
        assert_eq!(data.files.len(), 1);
        assert_eq!(data.total_size, 1024);
    }

    #[tokio::test]
    async fn test_load_fails_when_extraction_incomplete() {
        let pool = setup_test_db().await;
        let repo = Arc::new(LookupRepository::new(pool));
        let storage = Arc::new(MemoryStorage::default());
        let loader = ReferenceDataLoader::new(Arc::clone(&repo), storage);

        let project = repo.create_project("Vendors", "org1").await.unwrap();
        repo.insert_data_source(
            &project.id,
            "pending.pdf",
            "uploads/pending.pdf",
            1024,
            "pdf",
            None,
            ExtractionStatus::Pending,
        )
        .await
        .unwrap();

        let err = loader.load_latest_for_project(&project.id).await.unwrap_err();
        match err {
            LookupError::ExtractionNotComplete { files } => {
                assert_eq!(files, vec!["pending.pdf"]);
            }
            other => panic!("Expected ExtractionNotComplete, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_load_fails_when_no_sources() {
        let pool = setup_test_db().await;
        let repo = Arc::new(LookupRepository::new(pool));
        let storage = Arc::new(MemoryStorage::default());
        let loader = ReferenceDataLoader::new(Arc::clone(&repo), storage);

        let project = repo.create_project("Empty", "org1").await.unwrap();
        let err = loader.load_latest_for_project(&project.id).await.unwrap_err();
        assert!(matches!(err, LookupError::NoDataSources(_)));
    }

    #[tokio::test]
    async fn test_version_pinning_is_deterministic() {
        let pool = setup_test_db().await;
        let repo = Arc::new(LookupRepository::new(pool));
        let storage = Arc::new(MemoryStorage::default());
        storage.put("extracted/v1.txt", "version one");
        storage.put("extracted/v2.txt", "version two");
        let loader = ReferenceDataLoader::new(Arc::clone(&repo), storage);

        let project = repo.create_project("Vendors", "org1").await.unwrap();
        repo.insert_data_source(
            &project.id,
            "v1.csv",
            "uploads/v1.csv",
            10,
            "csv",
            Some("extracted/v1.txt"),
            ExtractionStatus::Completed,
        )
        .await
        .unwrap();
        repo.insert_data_source(
            &project.id,
            "v2.csv",
            "uploads/v2.csv",
            10,
            "csv",
            Some("extracted/v2.txt"),
            ExtractionStatus::Completed,
        )
        .await
        .unwrap();

        let pinned = loader.load(&project.id, Some(1)).await.unwrap();
        assert_eq!(pinned.version, 1);
        assert!(pinned.content.contains("version one"));

        let latest = loader.load(&project.id, None).await.unwrap();
        assert_eq!(latest.version, 2);
        assert!(latest.content.contains("version two"));
    }

    #[tokio::test]
    async fn test_unreadable_file_yields_inline_error_not_failure() {
        let pool = setup_test_db().await;
        let repo = Arc::new(LookupRepository::new(pool));
        let storage = Arc::new(MemoryStorage::with_file("extracted/good.txt", "good content"));
        let loader = ReferenceDataLoader::new(Arc::clone(&repo), storage);

        let sources = vec![
            make_source(
                "p1",
                "good.txt",
                "txt",
                Some("extracted/good.txt"),
                ExtractionStatus::Completed,
            ),
            make_source(
                "p1",
                "missing.txt",
                "txt",
                Some("extracted/missing.txt"),
                ExtractionStatus::Completed,
            ),
        ];

        let content = loader.concatenate_sources(&sources).await;
        assert!(content.contains("=== File: good.txt ===\n\ngood content"));
        assert!(content.contains("=== File: missing.txt ===\n\n[Error loading file:"));
    }

    #[tokio::test]
    async fn test_text_native_falls_back_to_raw_upload() {
        let pool = setup_test_db().await;
        let repo = Arc::new(LookupRepository::new(pool));
        let storage = Arc::new(MemoryStorage::with_file("uploads/raw.csv", "a,b,c"));
        let loader = ReferenceDataLoader::new(Arc::clone(&repo), storage);

        let sources =
            vec![make_source("p1", "raw.csv", "csv", None, ExtractionStatus::Completed)];
        let content = loader.concatenate_sources(&sources).await;
        assert!(content.contains("a,b,c"));
    }

    #[tokio::test]
    async fn test_binary_without_extraction_has_no_content_path() {
        let pool = setup_test_db().await;
        let repo = Arc::new(LookupRepository::new(pool));
        let storage = Arc::new(MemoryStorage::default());
        let loader = ReferenceDataLoader::new(Arc::clone(&repo), storage);

        let sources =
            vec![make_source("p1", "scan.pdf", "pdf", None, ExtractionStatus::Completed)];
        let content = loader.concatenate_sources(&sources).await;
        assert!(content.contains("[No content path available]"));
    }
}

// ============================================================================
// Data Source Versioning Tests
// ============================================================================

mod versioning_tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_increments_version_and_flips_latest() {
        let pool = setup_test_db().await;
        let repo = LookupRepository::new(pool);

        let project = repo.create_project("Vendors", "org1").await.unwrap();
        let first = repo
            .insert_data_source(
                &project.id,
                "a.csv",
                "uploads/a.csv",
                10,
                "csv",
                None,
                ExtractionStatus::Completed,
            )
            .await
            .unwrap();
        assert_eq!(first.version_number, 1);
        assert!(first.is_latest);

        let second = repo
            .insert_data_source(
                &project.id,
                "b.csv",
                "uploads/b.csv",
                10,
                "csv",
                None,
                ExtractionStatus::Completed,
            )
            .await
            .unwrap();
        assert_eq!(second.version_number, 2);
        assert!(second.is_latest);

        let latest = repo.latest_sources(&project.id).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].file_name, "b.csv");
    }

    #[tokio::test]
    async fn test_link_execution_order_auto_assigned() {
        let pool = setup_test_db().await;
        let repo = LookupRepository::new(pool);

        let p1 = repo.create_project("A", "org1").await.unwrap();
        let p2 = repo.create_project("B", "org1").await.unwrap();

        let first = repo.create_link("ps-1", &p1.id, None).await.unwrap();
        assert_eq!(first.execution_order, 1);

        let second = repo.create_link("ps-1", &p2.id, None).await.unwrap();
        assert_eq!(second.execution_order, 2);

        let links = repo.links_for_ps_project("ps-1").await.unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].lookup_project_id, p1.id);
    }

    #[tokio::test]
    async fn test_template_validation_on_store() {
        let pool = setup_test_db().await;
        let repo = LookupRepository::new(pool);
        let project = repo.create_project("A", "org1").await.unwrap();
        let config = json!({"provider": "openai", "model": "gpt-4"});

        // Valid template
        let template = repo
            .create_template(&project.id, "t", "Match {{input_data.v}} in {{reference_data}}", &config)
            .await
            .unwrap();
        assert!(template.is_active);

        // Reserved prefix rejected
        let err = repo
            .create_template(&project.id, "t2", "{{_lookup_x}} {{reference_data}}", &config)
            .await
            .unwrap_err();
        assert!(matches!(err, LookupError::InvalidTemplate(_)));

        // Missing llm_config keys rejected
        let err = repo
            .create_template(&project.id, "t3", "{{reference_data}}", &json!({"provider": "openai"}))
            .await
            .unwrap_err();
        assert!(matches!(err, LookupError::InvalidTemplate(_)));

        // A second valid template deactivates the first
        let replacement = repo
            .create_template(&project.id, "t4", "New {{reference_data}}", &config)
            .await
            .unwrap();
        let active = repo.active_template(&project.id).await.unwrap().unwrap();
        assert_eq!(active.id, replacement.id);
    }

    #[tokio::test]
    async fn test_default_profile_required() {
        let pool = setup_test_db().await;
        let repo = LookupRepository::new(pool);
        let project = repo.create_project("A", "org1").await.unwrap();

        let err = repo.default_profile(&project.id).await.unwrap_err();
        assert!(matches!(err, LookupError::DefaultProfile(_)));

        repo.create_profile(&project.id, "default", ["llm1", "emb1", "vec1", "x2t1"], 0, 0, 3, true)
            .await
            .unwrap();
        let profile = repo.default_profile(&project.id).await.unwrap();
        assert_eq!(profile.profile_name, "default");
        assert!(!profile.uses_rag());
    }
}

// ============================================================================
// Response Cache Tests
// ============================================================================

mod cache_tests {
    use super::*;

    #[tokio::test]
    async fn test_set_then_get_within_ttl() {
        let pool = setup_test_db().await;
        let cache = ResponseCache::new(pool, 24, DEFAULT_KEY_PREFIX);

        let key = cache.generate_cache_key("prompt", "reference");
        assert!(cache.set(&key, r#"{"vendor":"Slack"}"#, None).await);
        assert_eq!(cache.get(&key).await.as_deref(), Some(r#"{"vendor":"Slack"}"#));
    }

    #[tokio::test]
    async fn test_expired_entry_misses() {
        let pool = setup_test_db().await;
        let cache = ResponseCache::new(pool, 24, DEFAULT_KEY_PREFIX);

        let key = cache.generate_cache_key("prompt", "reference");
        cache
            .set(&key, "value", Some(chrono::Duration::seconds(-1)))
            .await;
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_cache_key_is_deterministic_and_byte_sensitive() {
        let pool = setup_test_db().await;
        let cache = ResponseCache::new(pool, 24, DEFAULT_KEY_PREFIX);

        let a = cache.generate_cache_key("prompt", "ref");
        let b = cache.generate_cache_key("prompt", "ref");
        let c = cache.generate_cache_key("prompt", "reF");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with(DEFAULT_KEY_PREFIX));
    }

    #[tokio::test]
    async fn test_delete_removes_entry() {
        let pool = setup_test_db().await;
        let cache = ResponseCache::new(pool, 24, DEFAULT_KEY_PREFIX);

        let key = cache.generate_cache_key("p", "r");
        cache.set(&key, "v", None).await;
        assert!(cache.delete(&key).await);
        assert!(cache.get(&key).await.is_none());
        assert!(!cache.delete(&key).await);
    }

    #[tokio::test]
    async fn test_clear_pattern() {
        let pool = setup_test_db().await;
        let cache = ResponseCache::new(pool, 24, "lookup:llm:");

        cache.set("lookup:llm:project:abc:1", "v1", None).await;
        cache.set("lookup:llm:project:abc:2", "v2", None).await;
        cache.set("lookup:llm:project:xyz:1", "v3", None).await;

        let cleared = cache.clear_pattern("lookup:llm:project:abc:*").await;
        assert_eq!(cleared, 2);
        assert!(cache.get("lookup:llm:project:abc:1").await.is_none());
        assert!(cache.get("lookup:llm:project:xyz:1").await.is_some());
    }

    #[tokio::test]
    async fn test_warmup_preloads_entries() {
        let pool = setup_test_db().await;
        let cache = ResponseCache::new(pool, 24, DEFAULT_KEY_PREFIX);

        let preload = vec![
            ("prompt one".to_string(), r#"{"a":1}"#.to_string()),
            ("prompt two".to_string(), r#"{"b":2}"#.to_string()),
        ];
        let count = cache.warmup("project-1", &preload).await;
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_cleanup_expired_counts() {
        let pool = setup_test_db().await;
        let cache = ResponseCache::new(pool, 24, DEFAULT_KEY_PREFIX);

        cache
            .set("expired-key", "v", Some(chrono::Duration::seconds(-10)))
            .await;
        cache.set("live-key", "v", None).await;

        let removed = cache.cleanup_expired().await;
        assert_eq!(removed, 1);
        assert!(cache.get("live-key").await.is_some());
    }

    #[tokio::test]
    async fn test_stats_track_hits_and_misses() {
        let pool = setup_test_db().await;
        let cache = ResponseCache::new(pool, 24, DEFAULT_KEY_PREFIX);

        cache.set("k", "v", None).await;
        cache.get("k").await;
        cache.get("absent").await;

        let stats = cache.stats();
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.ttl_hours, 24);
    }
}

// ============================================================================
// LLM Client Tests
// ============================================================================

mod llm_tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Spy adapter with a scripted response and exact token counts
    struct SpyAdapter {
        response: String,
        calls: AtomicUsize,
        token_count: Option<usize>,
    }

    impl SpyAdapter {
        fn new(response: &str) -> Self {
            Self {
                response: response.to_string(),
                calls: AtomicUsize::new(0),
                token_count: None,
            }
        }

        fn with_token_count(mut self, count: usize) -> Self {
            self.token_count = Some(count);
            self
        }
    }

    #[async_trait]
    impl LlmAdapter for SpyAdapter {
        async fn complete(
            &self,
            _prompt: &str,
            _config: &LlmConfig,
            _timeout: Duration,
        ) -> Result<String, LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }

        fn count_tokens(&self, _model: &str, _text: &str) -> Option<usize> {
            self.token_count
        }
    }

    fn gpt4_config() -> LlmConfig {
        LlmConfig::from_value(&json!({"provider": "openai", "model": "gpt-4"}))
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_context_window_lookup() {
        assert_eq!(context_window_for("gpt-4"), 8_192);
        assert_eq!(context_window_for("gpt-4o-mini"), 128_000);
        assert_eq!(context_window_for("entirely-unknown"), DEFAULT_CONTEXT_WINDOW);
    }

    #[test]
    fn test_validate_llm_config_variants() {
        assert!(validate_llm_config(&json!({"adapter_id": "ad-1"})).is_ok());
        assert!(validate_llm_config(&json!({"provider": "openai", "model": "gpt-4"})).is_ok());
        assert!(validate_llm_config(&json!({"provider": "openai"})).is_err());
        assert!(validate_llm_config(&json!({})).is_err());
    }

    #[tokio::test]
    async fn test_overflow_fails_fast_without_dispatch() {
        let adapter = Arc::new(SpyAdapter::new("{}").with_token_count(9_000));
        let client = LlmClient::new(adapter.clone(), Duration::from_secs(30));

        let err = client
            .generate("any prompt", &gpt4_config())
            .await
            .unwrap_err();
        match err {
            LookupError::ContextWindowExceeded { token_count, context_limit, model } => {
                assert_eq!(token_count, 9_000);
                assert_eq!(context_limit, 8_192 - RESERVED_OUTPUT_TOKENS);
                assert_eq!(model, "gpt-4");
            }
            other => panic!("Expected ContextWindowExceeded, got {:?}", other),
        }
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_estimator_fallback_triggers_overflow() {
        // ~300k characters against an 8192-token window
        let adapter = Arc::new(SpyAdapter::new("{}"));
        let client = LlmClient::new(adapter.clone(), Duration::from_secs(30));

        let huge_prompt = "x".repeat(300_000);
        let err = client.generate(&huge_prompt, &gpt4_config()).await.unwrap_err();
        assert!(matches!(err, LookupError::ContextWindowExceeded { .. }));
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_clean_json_object_passes_through() {
        let adapter = Arc::new(SpyAdapter::new(r#"{"vendor": "Slack"}"#));
        let client = LlmClient::new(adapter, Duration::from_secs(30));

        let response = client.generate("prompt", &gpt4_config()).await.unwrap();
        assert_eq!(response, r#"{"vendor": "Slack"}"#);
    }

    #[tokio::test]
    async fn test_embedded_json_is_extracted_from_chat_noise() {
        let adapter = Arc::new(SpyAdapter::new(
            "Sure! Here is the result: {\"vendor\": \"Slack\"} Hope that helps.",
        ));
        let client = LlmClient::new(adapter, Duration::from_secs(30));

        let response = client.generate("prompt", &gpt4_config()).await.unwrap();
        assert_eq!(response, "{\"vendor\": \"Slack\"}");
    }

    #[tokio::test]
    async fn test_unrecoverable_response_becomes_synthetic_object() {
        let adapter = Arc::new(SpyAdapter::new("I could not find anything useful."));
        let client = LlmClient::new(adapter, Duration::from_secs(30));

        let response = client.generate("prompt", &gpt4_config()).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&response).unwrap();
        assert_eq!(parsed["confidence"], json!(0.3));
        assert!(parsed["raw_response"].as_str().unwrap().contains("could not find"));
        assert!(parsed.get("warning").is_some());
    }
}

// ============================================================================
// Response Parsing Tests
// ============================================================================

mod parse_tests {
    use super::*;

    #[test]
    fn test_confidence_extracted_and_removed_from_data() {
        let (data, confidence) =
            parse_llm_response(r#"{"vendor": "Slack", "confidence": 0.92}"#).unwrap();
        assert_eq!(confidence, Some(0.92));
        assert_eq!(data.get("vendor"), Some(&json!("Slack")));
        assert!(!data.contains_key("confidence"));
    }

    #[test]
    fn test_out_of_range_confidence_clamps() {
        let (_, confidence) = parse_llm_response(r#"{"v": 1, "confidence": 1.7}"#).unwrap();
        assert_eq!(confidence, Some(1.0));

        let (_, confidence) = parse_llm_response(r#"{"v": 1, "confidence": -0.2}"#).unwrap();
        assert_eq!(confidence, Some(0.0));
    }

    #[test]
    fn test_non_numeric_confidence_dropped() {
        let (data, confidence) =
            parse_llm_response(r#"{"v": 1, "confidence": "high"}"#).unwrap();
        assert_eq!(confidence, None);
        assert!(!data.contains_key("confidence"));
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let err = parse_llm_response("not json at all").unwrap_err();
        assert!(matches!(err, LookupError::Parse(_)));
        assert_eq!(err.error_type(), "parse_error");
    }

    #[test]
    fn test_non_object_json_is_parse_error() {
        let err = parse_llm_response("[1, 2, 3]").unwrap_err();
        assert!(matches!(err, LookupError::Parse(_)));
    }
}

// ============================================================================
// Enrichment Merger Tests
// ============================================================================

mod merger_tests {
    use super::*;
    use serde_json::Map;

    fn success(project_id: &str, data: serde_json::Value, confidence: Option<f64>) -> LookupSuccess {
        let Value::Object(map) = data else { panic!("data must be an object") };
        LookupSuccess {
            project_id: project_id.to_string(),
            project_name: format!("Project {}", project_id),
            data: map,
            confidence,
            cached: false,
            execution_time_ms: 5,
        }
    }

    use serde_json::Value;

    #[test]
    fn test_disjoint_enrichments_merge_without_conflicts() {
        let result = EnrichmentMerger::merge(&[
            success("a", json!({"vendor": "Slack"}), None),
            success("b", json!({"category": "SaaS"}), None),
        ]);

        assert_eq!(result.conflicts_resolved, 0);
        assert_eq!(result.data.len(), 2);
        assert_eq!(result.data["vendor"], json!("Slack"));
        assert_eq!(result.data["category"], json!("SaaS"));
    }

    #[test]
    fn test_priority_tie_first_complete_wins() {
        // No confidence on either side: the earlier (higher priority) stays
        let result = EnrichmentMerger::merge(&[
            success("x", json!({"vendor": "Slack"}), None),
            success("y", json!({"vendor": "Slack Inc"}), None),
        ]);

        assert_eq!(result.data["vendor"], json!("Slack"));
        assert_eq!(result.conflicts_resolved, 1);
    }

    #[test]
    fn test_higher_confidence_wins_regardless_of_order() {
        let result = EnrichmentMerger::merge(&[
            success("x", json!({"vendor": "Slack"}), Some(0.55)),
            success("y", json!({"vendor": "Slack Technologies, Inc."}), Some(0.93)),
        ]);

        assert_eq!(result.data["vendor"], json!("Slack Technologies, Inc."));
        assert_eq!(result.conflicts_resolved, 1);
    }

    #[test]
    fn test_lower_confidence_loses_but_conflict_is_counted() {
        let result = EnrichmentMerger::merge(&[
            success("x", json!({"vendor": "Slack"}), Some(0.9)),
            success("y", json!({"vendor": "Slack Inc"}), Some(0.6)),
        ]);

        assert_eq!(result.data["vendor"], json!("Slack"));
        assert_eq!(result.conflicts_resolved, 1);
    }

    #[test]
    fn test_equal_confidence_keeps_existing() {
        let result = EnrichmentMerger::merge(&[
            success("x", json!({"vendor": "Slack"}), Some(0.8)),
            success("y", json!({"vendor": "Slack Inc"}), Some(0.8)),
        ]);

        assert_eq!(result.data["vendor"], json!("Slack"));
        assert_eq!(result.conflicts_resolved, 1);
    }

    #[test]
    fn test_only_confidence_bearing_value_wins() {
        let result = EnrichmentMerger::merge(&[
            success("x", json!({"vendor": "Slack"}), None),
            success("y", json!({"vendor": "Slack Inc"}), Some(0.4)),
        ]);
        assert_eq!(result.data["vendor"], json!("Slack Inc"));
        assert_eq!(result.conflicts_resolved, 1);

        let result = EnrichmentMerger::merge(&[
            success("x", json!({"vendor": "Slack"}), Some(0.4)),
            success("y", json!({"vendor": "Slack Inc"}), None),
        ]);
        assert_eq!(result.data["vendor"], json!("Slack"));
        assert_eq!(result.conflicts_resolved, 1);
    }

    #[test]
    fn test_enrichment_details_track_contributions() {
        let result = EnrichmentMerger::merge(&[
            success("x", json!({"vendor": "Slack", "tier": "1"}), Some(0.5)),
            success("y", json!({"vendor": "Slack Inc", "region": "US"}), Some(0.9)),
        ]);

        assert_eq!(result.enrichment_details.len(), 2);
        assert_eq!(result.enrichment_details[0].fields_added, vec!["vendor", "tier"]);
        // y won the vendor conflict and added region
        assert_eq!(result.enrichment_details[1].fields_added, vec!["vendor", "region"]);
    }

    #[test]
    fn test_disjoint_size_is_sum_of_parts() {
        let a = success("a", json!({"f1": 1, "f2": 2}), None);
        let b = success("b", json!({"f3": 3}), None);
        let expected: usize = [&a, &b].iter().map(|e| e.data.len()).sum();

        let result = EnrichmentMerger::merge(&[a, b]);
        assert_eq!(result.data.len(), expected);
    }

    #[test]
    fn test_empty_input_merges_to_empty() {
        let result = EnrichmentMerger::merge(&[]);
        assert_eq!(result.data, Map::new());
        assert_eq!(result.conflicts_resolved, 0);
        assert!(result.enrichment_details.is_empty());
    }
}

// ============================================================================
// Changed-Fields Filter Tests
// ============================================================================

mod filter_tests {
    use super::*;

    #[test]
    fn test_unchanged_fields_are_dropped() {
        let input = json!({"vendor": "Slack", "country": "US"});
        let mut data = serde_json::Map::new();
        data.insert("vendor".to_string(), json!("Slack"));
        data.insert("country".to_string(), json!("United States"));
        data.insert("category".to_string(), json!("SaaS"));

        let filtered = filter_changed_fields(&input, data);
        assert!(!filtered.contains_key("vendor"));
        assert_eq!(filtered["country"], json!("United States"));
        assert_eq!(filtered["category"], json!("SaaS"));
    }

    #[test]
    fn test_non_object_input_passes_everything() {
        let mut data = serde_json::Map::new();
        data.insert("vendor".to_string(), json!("Slack"));

        let filtered = filter_changed_fields(&json!("scalar"), data.clone());
        assert_eq!(filtered, data);
    }
}

// ============================================================================
// Audit Logger Tests
// ============================================================================

mod audit_tests {
    use super::*;
    use crate::models::lookup::AuditStatus;

    fn record(project_id: &str, execution_id: &str, status: AuditStatus) -> AuditRecord {
        AuditRecord {
            execution_id: execution_id.to_string(),
            lookup_project_id: project_id.to_string(),
            prompt_studio_project_id: None,
            file_execution_id: None,
            input_data: json!({"vendor": "Slack"}),
            reference_data_version: 1,
            llm_provider: "openai".to_string(),
            llm_model: "gpt-4".to_string(),
            llm_prompt: "resolved prompt".to_string(),
            llm_response: Some(r#"{"vendor":"Slack"}"#.to_string()),
            enriched_output: matches!(status, AuditStatus::Success)
                .then(|| json!({"vendor": "Slack"})),
            status,
            confidence_score: Some(0.925),
            execution_time_ms: Some(150),
            llm_call_time_ms: Some(120),
            llm_response_cached: false,
            error_message: matches!(status, AuditStatus::Failed)
                .then(|| "boom".to_string()),
        }
    }

    async fn seeded_project(pool: &SqlitePool) -> String {
        let repo = LookupRepository::new(pool.clone());
        repo.create_project("Vendors", "org1").await.unwrap().id
    }

    #[tokio::test]
    async fn test_log_execution_persists_record() {
        let pool = setup_test_db().await;
        let project_id = seeded_project(&pool).await;
        let logger = AuditLogger::new(pool);

        let audit_id = logger
            .log_execution(record(&project_id, "exec-1", AuditStatus::Success))
            .await;
        assert!(audit_id.is_some());

        let history = logger.get_execution_history("exec-1", 100).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, "success");
        // Confidence rounds to two decimals
        assert_eq!(history[0].confidence_score, Some(0.93));
        assert!(history[0].was_successful());
    }

    #[tokio::test]
    async fn test_project_stats_aggregate() {
        let pool = setup_test_db().await;
        let project_id = seeded_project(&pool).await;
        let logger = AuditLogger::new(pool);

        logger
            .log_execution(record(&project_id, "exec-1", AuditStatus::Success))
            .await;
        logger
            .log_execution(record(&project_id, "exec-1", AuditStatus::Failed))
            .await;
        let mut cached = record(&project_id, "exec-2", AuditStatus::Success);
        cached.llm_response_cached = true;
        logger.log_execution(cached).await;

        let stats = logger.get_project_stats(&project_id, 1000).await.unwrap();
        assert_eq!(stats.total_executions, 3);
        assert_eq!(stats.successful, 2);
        assert_eq!(stats.failed, 1);
        assert!((stats.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((stats.cache_hit_rate - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.avg_execution_time_ms, 150);
    }

    #[tokio::test]
    async fn test_empty_project_stats_are_zeroed() {
        let pool = setup_test_db().await;
        let logger = AuditLogger::new(pool);

        let stats = logger.get_project_stats("nonexistent", 1000).await.unwrap();
        assert_eq!(stats.total_executions, 0);
        assert_eq!(stats.success_rate, 0.0);
    }

    #[tokio::test]
    async fn test_workflow_execution_join() {
        let pool = setup_test_db().await;
        let project_id = seeded_project(&pool).await;

        sqlx::query(
            "INSERT INTO workflow_file_executions (id, workflow_execution_id) VALUES (?, ?)",
        )
        .bind("file-exec-1")
        .bind("wf-exec-1")
        .execute(&pool)
        .await
        .unwrap();

        let logger = AuditLogger::new(pool);
        let mut rec = record(&project_id, "exec-1", AuditStatus::Success);
        rec.file_execution_id = Some("file-exec-1".to_string());
        logger.log_execution(rec).await;

        let by_file = logger.get_by_file_execution("file-exec-1").await.unwrap();
        assert_eq!(by_file.len(), 1);

        let by_workflow = logger.get_by_workflow_execution("wf-exec-1").await.unwrap();
        assert_eq!(by_workflow.len(), 1);
        assert_eq!(by_workflow[0].execution_id, "exec-1");
    }
}
