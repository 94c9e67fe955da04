//! Database pool creation and schema bootstrap.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

/// Create the SQLite connection pool, creating the database file if needed.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(16)
        .connect_with(options)
        .await
}

/// Create all tables if they do not exist yet.
///
/// Idempotent; runs at startup and in test fixtures.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lookup_projects (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            organization TEXT NOT NULL DEFAULT '',
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lookup_prompt_templates (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            name TEXT NOT NULL,
            template_text TEXT NOT NULL,
            llm_config TEXT NOT NULL DEFAULT '{}',
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (project_id) REFERENCES lookup_projects(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lookup_data_sources (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            file_name TEXT NOT NULL,
            file_path TEXT NOT NULL,
            file_size INTEGER NOT NULL DEFAULT 0,
            file_type TEXT NOT NULL,
            extracted_content_path TEXT,
            extraction_status TEXT NOT NULL DEFAULT 'pending',
            extraction_error TEXT,
            version_number INTEGER NOT NULL DEFAULT 1,
            is_latest BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (project_id, version_number),
            FOREIGN KEY (project_id) REFERENCES lookup_projects(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lookup_profile_managers (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            profile_name TEXT NOT NULL,
            llm_adapter TEXT NOT NULL,
            embedding_adapter TEXT NOT NULL,
            vector_store_adapter TEXT NOT NULL,
            x2text_adapter TEXT NOT NULL,
            chunk_size INTEGER NOT NULL DEFAULT 0,
            chunk_overlap INTEGER NOT NULL DEFAULT 0,
            similarity_top_k INTEGER NOT NULL DEFAULT 3,
            is_default BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (project_id, profile_name),
            FOREIGN KEY (project_id) REFERENCES lookup_projects(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lookup_index_managers (
            id TEXT PRIMARY KEY,
            data_source_id TEXT NOT NULL,
            profile_id TEXT NOT NULL,
            raw_index_id TEXT,
            index_ids_history TEXT NOT NULL DEFAULT '[]',
            extraction_status TEXT NOT NULL DEFAULT '{}',
            reindex_required BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (data_source_id, profile_id),
            FOREIGN KEY (data_source_id) REFERENCES lookup_data_sources(id) ON DELETE CASCADE,
            FOREIGN KEY (profile_id) REFERENCES lookup_profile_managers(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS prompt_studio_lookup_links (
            id TEXT PRIMARY KEY,
            prompt_studio_project_id TEXT NOT NULL,
            lookup_project_id TEXT NOT NULL,
            execution_order INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (prompt_studio_project_id, lookup_project_id),
            FOREIGN KEY (lookup_project_id) REFERENCES lookup_projects(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lookup_execution_audit (
            id TEXT PRIMARY KEY,
            lookup_project_id TEXT NOT NULL,
            prompt_studio_project_id TEXT,
            execution_id TEXT NOT NULL,
            file_execution_id TEXT,
            input_data TEXT NOT NULL,
            reference_data_version INTEGER NOT NULL DEFAULT 1,
            enriched_output TEXT,
            llm_provider TEXT NOT NULL,
            llm_model TEXT NOT NULL,
            llm_prompt TEXT NOT NULL,
            llm_response TEXT,
            llm_response_cached BOOLEAN NOT NULL DEFAULT FALSE,
            execution_time_ms INTEGER,
            llm_call_time_ms INTEGER,
            status TEXT NOT NULL,
            error_message TEXT,
            confidence_score REAL,
            executed_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (lookup_project_id) REFERENCES lookup_projects(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lookup_llm_cache (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            cache_key TEXT NOT NULL UNIQUE,
            response TEXT NOT NULL,
            hit_count INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            expires_at TIMESTAMP NOT NULL,
            last_accessed_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Minimal view of the workflow pipeline's file-execution table; the audit
    // read path joins through it to resolve workflow_execution_id lookups.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workflow_file_executions (
            id TEXT PRIMARY KEY,
            workflow_execution_id TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    for stmt in [
        "CREATE INDEX IF NOT EXISTS idx_data_sources_project ON lookup_data_sources(project_id)",
        "CREATE INDEX IF NOT EXISTS idx_data_sources_latest ON lookup_data_sources(project_id, is_latest)",
        "CREATE INDEX IF NOT EXISTS idx_audit_project ON lookup_execution_audit(lookup_project_id)",
        "CREATE INDEX IF NOT EXISTS idx_audit_execution ON lookup_execution_audit(execution_id)",
        "CREATE INDEX IF NOT EXISTS idx_audit_file_execution ON lookup_execution_audit(file_execution_id)",
        "CREATE INDEX IF NOT EXISTS idx_audit_executed_at ON lookup_execution_audit(executed_at)",
        "CREATE INDEX IF NOT EXISTS idx_links_ps_project ON prompt_studio_lookup_links(prompt_studio_project_id, execution_order)",
        "CREATE INDEX IF NOT EXISTS idx_cache_expires ON lookup_llm_cache(expires_at)",
    ] {
        sqlx::query(stmt).execute(pool).await?;
    }

    Ok(())
}
