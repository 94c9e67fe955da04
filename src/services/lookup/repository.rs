//! Look-Up Repository - Database operations for the Look-Up engine

use sqlx::SqlitePool;
use uuid::Uuid;

use super::error::LookupError;
use super::llm::validate_llm_config;
use super::resolver::validate_template;
use crate::models::lookup::*;

/// Repository for Look-Up database operations.
pub struct LookupRepository {
    pool: SqlitePool,
}

impl LookupRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ========================================================================
    // Projects
    // ========================================================================

    pub async fn get_project(&self, id: &str) -> Result<Option<LookupProject>, LookupError> {
        sqlx::query_as::<_, LookupProject>("SELECT * FROM lookup_projects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(LookupError::from)
    }

    pub async fn create_project(
        &self,
        name: &str,
        organization: &str,
    ) -> Result<LookupProject, LookupError> {
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            r#"INSERT INTO lookup_projects (id, name, organization, is_active)
               VALUES (?, ?, ?, TRUE)"#,
        )
        .bind(&id)
        .bind(name)
        .bind(organization)
        .execute(&self.pool)
        .await?;

        sqlx::query_as::<_, LookupProject>("SELECT * FROM lookup_projects WHERE id = ?")
            .bind(&id)
            .fetch_one(&self.pool)
            .await
            .map_err(LookupError::from)
    }

    /// Delete a project. The caller must have verified no Prompt Studio
    /// links remain; owned rows cascade.
    pub async fn delete_project(&self, id: &str) -> Result<(), LookupError> {
        let result = sqlx::query("DELETE FROM lookup_projects WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LookupError::ProjectNotFound(id.to_string()));
        }
        Ok(())
    }

    // ========================================================================
    // Prompt Templates
    // ========================================================================

    /// Get the active template for a project.
    pub async fn active_template(
        &self,
        project_id: &str,
    ) -> Result<Option<LookupPromptTemplate>, LookupError> {
        sqlx::query_as::<_, LookupPromptTemplate>(
            r#"SELECT * FROM lookup_prompt_templates
               WHERE project_id = ? AND is_active = TRUE
               ORDER BY updated_at DESC
               LIMIT 1"#,
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(LookupError::from)
    }

    /// Store a template after validating syntax, reserved keywords, and the
    /// LLM config. Any previously active template for the project is
    /// deactivated in the same transaction.
    pub async fn create_template(
        &self,
        project_id: &str,
        name: &str,
        template_text: &str,
        llm_config: &serde_json::Value,
    ) -> Result<LookupPromptTemplate, LookupError> {
        validate_template(template_text)?;
        validate_llm_config(llm_config)?;

        let id = Uuid::new_v4().to_string();
        let config_json = serde_json::to_string(llm_config)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE lookup_prompt_templates SET is_active = FALSE WHERE project_id = ?")
            .bind(project_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"INSERT INTO lookup_prompt_templates
               (id, project_id, name, template_text, llm_config, is_active)
               VALUES (?, ?, ?, ?, ?, TRUE)"#,
        )
        .bind(&id)
        .bind(project_id)
        .bind(name)
        .bind(template_text)
        .bind(&config_json)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        sqlx::query_as::<_, LookupPromptTemplate>(
            "SELECT * FROM lookup_prompt_templates WHERE id = ?",
        )
        .bind(&id)
        .fetch_one(&self.pool)
        .await
        .map_err(LookupError::from)
    }

    // ========================================================================
    // Data Sources
    // ========================================================================

    /// Data sources of the latest version, in upload order.
    pub async fn latest_sources(
        &self,
        project_id: &str,
    ) -> Result<Vec<LookupDataSource>, LookupError> {
        sqlx::query_as::<_, LookupDataSource>(
            r#"SELECT * FROM lookup_data_sources
               WHERE project_id = ? AND is_latest = TRUE
               ORDER BY created_at ASC"#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(LookupError::from)
    }

    /// Data sources pinned to an explicit version, in upload order.
    pub async fn sources_for_version(
        &self,
        project_id: &str,
        version: i64,
    ) -> Result<Vec<LookupDataSource>, LookupError> {
        sqlx::query_as::<_, LookupDataSource>(
            r#"SELECT * FROM lookup_data_sources
               WHERE project_id = ? AND version_number = ?
               ORDER BY created_at ASC"#,
        )
        .bind(project_id)
        .bind(version)
        .fetch_all(&self.pool)
        .await
        .map_err(LookupError::from)
    }

    /// Register an upload as a new data-source version.
    ///
    /// The version number is assigned `max(existing)+1` and every prior row
    /// for the project has `is_latest` cleared, all in one transaction.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_data_source(
        &self,
        project_id: &str,
        file_name: &str,
        file_path: &str,
        file_size: i64,
        file_type: &str,
        extracted_content_path: Option<&str>,
        extraction_status: ExtractionStatus,
    ) -> Result<LookupDataSource, LookupError> {
        let id = Uuid::new_v4().to_string();

        let mut tx = self.pool.begin().await?;

        let max_version: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(version_number) FROM lookup_data_sources WHERE project_id = ?",
        )
        .bind(project_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE lookup_data_sources SET is_latest = FALSE WHERE project_id = ? AND is_latest = TRUE",
        )
        .bind(project_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"INSERT INTO lookup_data_sources
               (id, project_id, file_name, file_path, file_size, file_type,
                extracted_content_path, extraction_status, version_number, is_latest)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, TRUE)"#,
        )
        .bind(&id)
        .bind(project_id)
        .bind(file_name)
        .bind(file_path)
        .bind(file_size)
        .bind(file_type)
        .bind(extracted_content_path)
        .bind(extraction_status.as_str())
        .bind(max_version.unwrap_or(0) + 1)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        sqlx::query_as::<_, LookupDataSource>("SELECT * FROM lookup_data_sources WHERE id = ?")
            .bind(&id)
            .fetch_one(&self.pool)
            .await
            .map_err(LookupError::from)
    }

    pub async fn set_extraction_status(
        &self,
        data_source_id: &str,
        status: ExtractionStatus,
        error: Option<&str>,
        extracted_content_path: Option<&str>,
    ) -> Result<(), LookupError> {
        sqlx::query(
            r#"UPDATE lookup_data_sources
               SET extraction_status = ?,
                   extraction_error = ?,
                   extracted_content_path = COALESCE(?, extracted_content_path)
               WHERE id = ?"#,
        )
        .bind(status.as_str())
        .bind(error)
        .bind(extracted_content_path)
        .bind(data_source_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ========================================================================
    // Profiles
    // ========================================================================

    /// The project's default profile; required by indexing and retrieval.
    pub async fn default_profile(
        &self,
        project_id: &str,
    ) -> Result<LookupProfileManager, LookupError> {
        sqlx::query_as::<_, LookupProfileManager>(
            r#"SELECT * FROM lookup_profile_managers
               WHERE project_id = ? AND is_default = TRUE
               LIMIT 1"#,
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| LookupError::DefaultProfile(project_id.to_string()))
    }

    pub async fn any_profile(
        &self,
        project_id: &str,
    ) -> Result<Option<LookupProfileManager>, LookupError> {
        sqlx::query_as::<_, LookupProfileManager>(
            r#"SELECT * FROM lookup_profile_managers
               WHERE project_id = ?
               ORDER BY is_default DESC, created_at ASC
               LIMIT 1"#,
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(LookupError::from)
    }

    /// Create a profile. Setting `is_default` clears the flag on every other
    /// profile of the project in the same transaction.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_profile(
        &self,
        project_id: &str,
        profile_name: &str,
        adapters: [&str; 4],
        chunk_size: i64,
        chunk_overlap: i64,
        similarity_top_k: i64,
        is_default: bool,
    ) -> Result<LookupProfileManager, LookupError> {
        let id = Uuid::new_v4().to_string();
        let [llm, embedding, vector_store, x2text] = adapters;

        let mut tx = self.pool.begin().await?;

        if is_default {
            sqlx::query("UPDATE lookup_profile_managers SET is_default = FALSE WHERE project_id = ?")
                .bind(project_id)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            r#"INSERT INTO lookup_profile_managers
               (id, project_id, profile_name, llm_adapter, embedding_adapter,
                vector_store_adapter, x2text_adapter, chunk_size, chunk_overlap,
                similarity_top_k, is_default)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&id)
        .bind(project_id)
        .bind(profile_name)
        .bind(llm)
        .bind(embedding)
        .bind(vector_store)
        .bind(x2text)
        .bind(chunk_size)
        .bind(chunk_overlap)
        .bind(similarity_top_k)
        .bind(is_default)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        sqlx::query_as::<_, LookupProfileManager>(
            "SELECT * FROM lookup_profile_managers WHERE id = ?",
        )
        .bind(&id)
        .fetch_one(&self.pool)
        .await
        .map_err(LookupError::from)
    }

    // ========================================================================
    // Prompt Studio Links
    // ========================================================================

    /// Links for a Prompt Studio project in execution order.
    pub async fn links_for_ps_project(
        &self,
        ps_project_id: &str,
    ) -> Result<Vec<PromptStudioLookupLink>, LookupError> {
        sqlx::query_as::<_, PromptStudioLookupLink>(
            r#"SELECT * FROM prompt_studio_lookup_links
               WHERE prompt_studio_project_id = ?
               ORDER BY execution_order ASC, created_at ASC"#,
        )
        .bind(ps_project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(LookupError::from)
    }

    /// Look-Up projects linked to a Prompt Studio project, in link order.
    pub async fn lookup_projects_for_ps(
        &self,
        ps_project_id: &str,
    ) -> Result<Vec<LookupProject>, LookupError> {
        let links = self.links_for_ps_project(ps_project_id).await?;

        let mut projects = Vec::with_capacity(links.len());
        for link in links {
            if let Some(project) = self.get_project(&link.lookup_project_id).await? {
                projects.push(project);
            }
        }
        Ok(projects)
    }

    /// Prompt Studio project ids still linked to a Look-Up project.
    pub async fn linked_ps_ids(&self, project_id: &str) -> Result<Vec<String>, LookupError> {
        sqlx::query_scalar(
            r#"SELECT prompt_studio_project_id FROM prompt_studio_lookup_links
               WHERE lookup_project_id = ?
               ORDER BY created_at ASC"#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(LookupError::from)
    }

    /// Link a Look-Up project to a Prompt Studio project. When no execution
    /// order is given it is assigned `max(existing)+1`.
    pub async fn create_link(
        &self,
        ps_project_id: &str,
        lookup_project_id: &str,
        execution_order: Option<i64>,
    ) -> Result<PromptStudioLookupLink, LookupError> {
        let id = Uuid::new_v4().to_string();

        let mut tx = self.pool.begin().await?;

        let order = match execution_order {
            Some(order) => order,
            None => {
                let max_order: Option<i64> = sqlx::query_scalar(
                    r#"SELECT MAX(execution_order) FROM prompt_studio_lookup_links
                       WHERE prompt_studio_project_id = ?"#,
                )
                .bind(ps_project_id)
                .fetch_one(&mut *tx)
                .await?;
                max_order.unwrap_or(0) + 1
            }
        };

        sqlx::query(
            r#"INSERT INTO prompt_studio_lookup_links
               (id, prompt_studio_project_id, lookup_project_id, execution_order)
               VALUES (?, ?, ?, ?)"#,
        )
        .bind(&id)
        .bind(ps_project_id)
        .bind(lookup_project_id)
        .bind(order)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        sqlx::query_as::<_, PromptStudioLookupLink>(
            "SELECT * FROM prompt_studio_lookup_links WHERE id = ?",
        )
        .bind(&id)
        .fetch_one(&self.pool)
        .await
        .map_err(LookupError::from)
    }

    pub async fn delete_link(
        &self,
        ps_project_id: &str,
        lookup_project_id: &str,
    ) -> Result<bool, LookupError> {
        let result = sqlx::query(
            r#"DELETE FROM prompt_studio_lookup_links
               WHERE prompt_studio_project_id = ? AND lookup_project_id = ?"#,
        )
        .bind(ps_project_id)
        .bind(lookup_project_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Index Managers
    // ========================================================================

    pub async fn get_index_manager(
        &self,
        data_source_id: &str,
        profile_id: &str,
    ) -> Result<Option<LookupIndexManager>, LookupError> {
        sqlx::query_as::<_, LookupIndexManager>(
            "SELECT * FROM lookup_index_managers WHERE data_source_id = ? AND profile_id = ?",
        )
        .bind(data_source_id)
        .bind(profile_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(LookupError::from)
    }

    /// Record a freshly written vector-index doc id for a (data source,
    /// profile) pair, appending to the id history. Creates the row on first
    /// use; updates run in a transaction so status and history move together.
    pub async fn record_index_doc(
        &self,
        data_source_id: &str,
        profile_id: &str,
        doc_id: &str,
    ) -> Result<LookupIndexManager, LookupError> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, LookupIndexManager>(
            "SELECT * FROM lookup_index_managers WHERE data_source_id = ? AND profile_id = ?",
        )
        .bind(data_source_id)
        .bind(profile_id)
        .fetch_optional(&mut *tx)
        .await?;

        let id = match existing {
            Some(manager) => {
                let mut history = manager.index_ids();
                if !history.iter().any(|existing_id| existing_id == doc_id) {
                    history.push(doc_id.to_string());
                }
                sqlx::query(
                    r#"UPDATE lookup_index_managers
                       SET raw_index_id = ?, index_ids_history = ?,
                           reindex_required = FALSE, updated_at = CURRENT_TIMESTAMP
                       WHERE id = ?"#,
                )
                .bind(doc_id)
                .bind(serde_json::to_string(&history)?)
                .bind(&manager.id)
                .execute(&mut *tx)
                .await?;
                manager.id
            }
            None => {
                let id = Uuid::new_v4().to_string();
                sqlx::query(
                    r#"INSERT INTO lookup_index_managers
                       (id, data_source_id, profile_id, raw_index_id, index_ids_history)
                       VALUES (?, ?, ?, ?, ?)"#,
                )
                .bind(&id)
                .bind(data_source_id)
                .bind(profile_id)
                .bind(doc_id)
                .bind(serde_json::to_string(&vec![doc_id])?)
                .execute(&mut *tx)
                .await?;
                id
            }
        };

        tx.commit().await?;

        sqlx::query_as::<_, LookupIndexManager>("SELECT * FROM lookup_index_managers WHERE id = ?")
            .bind(&id)
            .fetch_one(&self.pool)
            .await
            .map_err(LookupError::from)
    }

    /// Store the extraction state for one profile-config fingerprint.
    pub async fn set_index_extraction_state(
        &self,
        data_source_id: &str,
        profile_id: &str,
        fingerprint: &str,
        state: IndexExtractionState,
    ) -> Result<(), LookupError> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, LookupIndexManager>(
            "SELECT * FROM lookup_index_managers WHERE data_source_id = ? AND profile_id = ?",
        )
        .bind(data_source_id)
        .bind(profile_id)
        .fetch_optional(&mut *tx)
        .await?;

        match existing {
            Some(manager) => {
                let mut states = manager.extraction_states();
                states.insert(fingerprint.to_string(), state);
                sqlx::query(
                    r#"UPDATE lookup_index_managers
                       SET extraction_status = ?, updated_at = CURRENT_TIMESTAMP
                       WHERE id = ?"#,
                )
                .bind(serde_json::to_string(&states)?)
                .bind(&manager.id)
                .execute(&mut *tx)
                .await?;
            }
            None => {
                let mut states = std::collections::HashMap::new();
                states.insert(fingerprint.to_string(), state);
                sqlx::query(
                    r#"INSERT INTO lookup_index_managers
                       (id, data_source_id, profile_id, extraction_status)
                       VALUES (?, ?, ?, ?)"#,
                )
                .bind(Uuid::new_v4().to_string())
                .bind(data_source_id)
                .bind(profile_id)
                .bind(serde_json::to_string(&states)?)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Remove an index-manager row, returning its doc id history so the
    /// caller can purge the vector store.
    pub async fn delete_index_manager(
        &self,
        data_source_id: &str,
        profile_id: &str,
    ) -> Result<Vec<String>, LookupError> {
        let existing = self.get_index_manager(data_source_id, profile_id).await?;

        let Some(manager) = existing else {
            return Ok(Vec::new());
        };

        let history = manager.index_ids();
        sqlx::query("DELETE FROM lookup_index_managers WHERE id = ?")
            .bind(&manager.id)
            .execute(&self.pool)
            .await?;

        Ok(history)
    }

    // ========================================================================
    // Workflow join table
    // ========================================================================

    /// File-execution ids belonging to a workflow execution.
    pub async fn file_execution_ids_for_workflow(
        &self,
        workflow_execution_id: &str,
    ) -> Result<Vec<String>, LookupError> {
        sqlx::query_scalar(
            "SELECT id FROM workflow_file_executions WHERE workflow_execution_id = ?",
        )
        .bind(workflow_execution_id)
        .fetch_all(&self.pool)
        .await
        .map_err(LookupError::from)
    }
}
