use axum::{
    Router,
    routing::{delete, get, post},
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use lookup_engine::config::Config;
use lookup_engine::services::lookup::{
    AuditLogger, HttpIndexerClient, IndexingService, LlmClient, LookupError, LookupRepository,
    OpenAiCompatAdapter, ReferenceDataLoader, ResponseCache, VectorStoreAdapter,
};
use lookup_engine::services::storage::FsStorageClient;
use lookup_engine::{AppState, db, handlers, models, services};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::lookup::execute_lookup,
        handlers::lookup::enrich_ps_output,
        handlers::lookup::delete_project,
        handlers::lookup::audits_by_execution,
        handlers::lookup::audit_stats,
    ),
    components(
        schemas(
            handlers::lookup::LookupExecutionRequest,
            handlers::lookup::EnrichPsOutputRequest,
            handlers::lookup::CreateLinkRequest,
            handlers::lookup::EnrichPsOutputResponse,
            models::LookupProject,
            models::LookupPromptTemplate,
            models::LookupDataSource,
            models::LookupProfileManager,
            models::PromptStudioLookupLink,
            models::LookupExecutionAudit,
            services::lookup::ProjectAuditStats,
            services::lookup::CacheStats,
        )
    ),
    tags(
        (name = "Look-Up Execution", description = "Execute Look-Ups and enrich records"),
        (name = "Look-Up Projects", description = "Project lifecycle"),
        (name = "Look-Up Audits", description = "Execution audit trail"),
    )
)]
struct ApiDoc;

/// Vector store stub wired in until a concrete adapter is configured; the
/// write path always goes through the out-of-process indexer.
struct LoggingVectorStore;

#[async_trait::async_trait]
impl VectorStoreAdapter for LoggingVectorStore {
    async fn delete(&self, ref_doc_id: &str) -> Result<(), LookupError> {
        tracing::info!("Vector store delete requested for doc {}", ref_doc_id);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let config = Config::load()?;

    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("meridian.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
    tracing::info!("Meridian starting up");
    tracing::info!("Configuration loaded successfully");

    let pool = db::create_pool(&config.database.url).await?;
    db::init_schema(&pool).await?;
    tracing::info!("Database pool created and schema initialized");

    let repository = Arc::new(LookupRepository::new(pool.clone()));
    let storage = Arc::new(FsStorageClient::new(&config.storage.root));
    let loader = Arc::new(ReferenceDataLoader::new(
        Arc::clone(&repository),
        storage.clone() as Arc<dyn lookup_engine::StorageClient>,
    ));
    let cache = Arc::new(ResponseCache::new(
        pool.clone(),
        config.cache.ttl_hours,
        config.cache.key_prefix.clone(),
    ));
    let llm_adapter = Arc::new(OpenAiCompatAdapter::new(
        config.llm.api_base.clone(),
        config.llm.api_key.clone(),
    ));
    let llm_client = Arc::new(LlmClient::new(
        llm_adapter,
        Duration::from_secs(config.llm.request_timeout_seconds),
    ));
    let audit = Arc::new(AuditLogger::new(pool.clone()));
    let indexer = Arc::new(HttpIndexerClient::new(config.indexer.base_url.clone()));
    let indexing = Arc::new(IndexingService::new(
        Arc::clone(&repository),
        storage.clone() as Arc<dyn lookup_engine::StorageClient>,
        indexer,
        Arc::new(LoggingVectorStore),
        Arc::clone(&cache),
    ));
    tracing::info!("Look-Up services initialized");

    let app_state = Arc::new(AppState {
        db: pool.clone(),
        config: config.clone(),
        repository,
        storage,
        loader,
        cache,
        llm_client,
        audit,
        indexing,
    });

    let api_routes = Router::new()
        .route(
            "/api/lookup-projects/:id/execute",
            post(handlers::lookup::execute_lookup),
        )
        .route("/api/lookup-projects/:id", delete(handlers::lookup::delete_project))
        .route(
            "/api/lookup-projects/:id/audits",
            get(handlers::lookup::audits_by_project),
        )
        .route(
            "/api/lookup-projects/:id/audit-stats",
            get(handlers::lookup::audit_stats),
        )
        .route("/api/lookup-links", post(handlers::lookup::create_link))
        .route(
            "/api/lookup-links/:ps_project_id/:lookup_project_id",
            delete(handlers::lookup::delete_link),
        )
        .route(
            "/api/lookup-debug/enrich_ps_output",
            post(handlers::lookup::enrich_ps_output),
        )
        .route(
            "/api/lookup-audits/by-execution/:execution_id",
            get(handlers::lookup::audits_by_execution),
        )
        .route(
            "/api/lookup-audits/by-file-execution/:file_execution_id",
            get(handlers::lookup::audits_by_file_execution),
        )
        .route(
            "/api/lookup-audits/by-workflow-execution/:workflow_execution_id",
            get(handlers::lookup::audits_by_workflow_execution),
        )
        .route("/api/lookup-cache/stats", get(handlers::lookup::cache_stats))
        .route("/api/lookup-cache/cleanup", post(handlers::lookup::cache_cleanup))
        .with_state(Arc::clone(&app_state));

    let health_routes = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check));

    let app = Router::new()
        .merge(SwaggerUi::new("/api-docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_routes)
        .merge(health_routes)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("API documentation available at http://{}/api-docs", addr);
    tracing::info!("Meridian is ready to serve requests");

    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn ready_check() -> &'static str {
    "READY"
}
