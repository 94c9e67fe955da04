//! Look-Up API Handlers
//!
//! REST endpoints for Look-Up execution, project deletion, Prompt Studio
//! linking, audit reads, and cache maintenance. Thin delegation over the
//! engine; all policy lives in the services layer.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;

use crate::AppState;
use crate::services::lookup::{
    ExecuteOptions, LookupExecutor, LookupOrchestrator, OrchestrationResult, OrchestratorConfig,
};
use crate::utils::{ApiError, ApiResult};

// ============================================================================
// Request/Response Types
// ============================================================================

fn default_use_cache() -> bool {
    true
}

fn default_timeout_seconds() -> u64 {
    30
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LookupExecutionRequest {
    /// Record to enrich
    #[schema(value_type = Object)]
    pub input_data: Value,
    #[serde(default = "default_use_cache")]
    pub use_cache: bool,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct EnrichPsOutputRequest {
    pub prompt_studio_project_id: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub extracted_data: Value,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateLinkRequest {
    pub prompt_studio_project_id: String,
    pub lookup_project_id: String,
    /// Assigned max+1 when omitted; lower values win priority ties
    pub execution_order: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EnrichPsOutputResponse {
    #[schema(value_type = Object)]
    pub original_data: Value,
    #[schema(value_type = Object)]
    pub enriched_data: Value,
    #[schema(value_type = Object)]
    pub lookup_enrichment: Value,
    #[serde(rename = "_lookup_metadata")]
    #[schema(value_type = Object)]
    pub lookup_metadata: Value,
}

// ============================================================================
// Execution APIs
// ============================================================================

/// Execute a Look-Up project with provided input data
/// POST /api/lookup-projects/:id/execute
#[utoipa::path(
    post,
    path = "/api/lookup-projects/{id}/execute",
    request_body = LookupExecutionRequest,
    responses(
        (status = 200, description = "Enrichment result with metadata"),
        (status = 400, description = "Execution failed"),
        (status = 404, description = "Project not found"),
    ),
    tag = "Look-Up Execution"
)]
pub async fn execute_lookup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<LookupExecutionRequest>,
) -> ApiResult<impl IntoResponse> {
    let project = state
        .repository
        .get_project(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Look-Up project not found: {}", id)))?;

    if state.repository.any_profile(&project.id).await?.is_none() {
        return Err(ApiError::bad_request(
            "No LLM profile configured for this Look-Up project",
        ));
    }

    let orchestrator = state.build_orchestrator(req.use_cache);
    let options = ExecuteOptions {
        execution_timeout: Some(Duration::from_secs(req.timeout_seconds)),
        ..Default::default()
    };
    let result = orchestrator
        .execute_lookups(&req.input_data, vec![project], options)
        .await;

    into_execution_response(result)
}

/// Enrich Prompt Studio extracted output with its linked Look-Ups
/// POST /api/lookup-debug/enrich_ps_output
#[utoipa::path(
    post,
    path = "/api/lookup-debug/enrich_ps_output",
    request_body = EnrichPsOutputRequest,
    responses(
        (status = 200, description = "Original and enriched data"),
        (status = 400, description = "Missing parameters"),
    ),
    tag = "Look-Up Execution"
)]
pub async fn enrich_ps_output(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EnrichPsOutputRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.prompt_studio_project_id.is_empty() {
        return Err(ApiError::bad_request("prompt_studio_project_id is required"));
    }
    if !req.extracted_data.is_object() || req.extracted_data.as_object().is_none_or(|m| m.is_empty())
    {
        return Err(ApiError::bad_request("extracted_data is required"));
    }

    let projects = state
        .repository
        .lookup_projects_for_ps(&req.prompt_studio_project_id)
        .await?;

    if projects.is_empty() {
        return Ok(Json(EnrichPsOutputResponse {
            original_data: req.extracted_data.clone(),
            enriched_data: req.extracted_data.clone(),
            lookup_enrichment: json!({}),
            lookup_metadata: json!({
                "lookups_executed": 0,
                "message": "No Look-Ups linked to this Prompt Studio project",
            }),
        }));
    }

    let orchestrator = state.build_orchestrator(true);
    let options = ExecuteOptions {
        prompt_studio_project_id: Some(req.prompt_studio_project_id.clone()),
        ..Default::default()
    };
    let result = orchestrator
        .execute_lookups(&req.extracted_data, projects, options)
        .await;

    // enriched_data = original data overlaid with the merged enrichment
    let mut enriched = req.extracted_data.clone();
    if let Some(target) = enriched.as_object_mut() {
        for (field, value) in &result.lookup_enrichment {
            target.insert(field.clone(), value.clone());
        }
    }

    Ok(Json(EnrichPsOutputResponse {
        original_data: req.extracted_data,
        enriched_data: enriched,
        lookup_enrichment: Value::Object(result.lookup_enrichment.clone()),
        lookup_metadata: serde_json::to_value(&result.lookup_metadata)
            .map_err(|e| ApiError::internal(e.to_string()))?,
    }))
}

/// Map an orchestration result to the HTTP response contract: 200 unless
/// every Look-Up failed, context-overflow failures first with their token
/// accounting, otherwise the first failure's error.
fn into_execution_response(result: OrchestrationResult) -> ApiResult<Json<Value>> {
    let failures = result.failures();

    if !failures.is_empty() && result.lookup_metadata.lookups_successful == 0 {
        let metadata = serde_json::to_value(&result.lookup_metadata)
            .map_err(|e| ApiError::internal(e.to_string()))?;

        if let Some(overflow) = failures
            .iter()
            .find(|f| f.error_type == "context_window_exceeded")
        {
            return Err(ApiError::with_payload(
                StatusCode::BAD_REQUEST,
                json!({
                    "error": overflow.error,
                    "error_type": "context_window_exceeded",
                    "token_count": overflow.token_count,
                    "context_limit": overflow.context_limit,
                    "model": overflow.model,
                    "_lookup_metadata": metadata,
                }),
            ));
        }

        return Err(ApiError::with_payload(
            StatusCode::BAD_REQUEST,
            json!({
                "error": failures[0].error,
                "_lookup_metadata": metadata,
            }),
        ));
    }

    serde_json::to_value(&result)
        .map(Json)
        .map_err(|e| ApiError::internal(e.to_string()))
}

// ============================================================================
// Project APIs
// ============================================================================

/// Delete a Look-Up project
/// DELETE /api/lookup-projects/:id
///
/// Refused while any Prompt Studio link points at the project.
#[utoipa::path(
    delete,
    path = "/api/lookup-projects/{id}",
    responses(
        (status = 204, description = "Deleted"),
        (status = 400, description = "Project is linked to Prompt Studio projects"),
        (status = 404, description = "Project not found"),
    ),
    tag = "Look-Up Projects"
)]
pub async fn delete_project(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let project = state
        .repository
        .get_project(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Look-Up project not found: {}", id)))?;

    let linked_ids = state.repository.linked_ps_ids(&project.id).await?;
    if !linked_ids.is_empty() {
        return Err(ApiError::with_payload(
            StatusCode::BAD_REQUEST,
            json!({
                "error": "Cannot delete Look-Up project that is linked to Prompt Studio projects",
                "detail": format!(
                    "This Look-Up project is linked to {} Prompt Studio project(s). \
                     Please unlink it from all Prompt Studio projects before deleting.",
                    linked_ids.len()
                ),
                "linked_prompt_studio_projects": linked_ids,
            }),
        ));
    }

    state.repository.delete_project(&project.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Link APIs
// ============================================================================

/// Link a Look-Up project to a Prompt Studio project
/// POST /api/lookup-links
pub async fn create_link(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateLinkRequest>,
) -> ApiResult<impl IntoResponse> {
    state
        .repository
        .get_project(&req.lookup_project_id)
        .await?
        .ok_or_else(|| {
            ApiError::not_found(format!("Look-Up project not found: {}", req.lookup_project_id))
        })?;

    let link = state
        .repository
        .create_link(&req.prompt_studio_project_id, &req.lookup_project_id, req.execution_order)
        .await?;

    Ok((StatusCode::CREATED, Json(link)))
}

/// Unlink a Look-Up project from a Prompt Studio project
/// DELETE /api/lookup-links/:ps_project_id/:lookup_project_id
pub async fn delete_link(
    State(state): State<Arc<AppState>>,
    Path((ps_project_id, lookup_project_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let deleted = state
        .repository
        .delete_link(&ps_project_id, &lookup_project_id)
        .await?;

    if !deleted {
        return Err(ApiError::not_found("Link not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Audit APIs
// ============================================================================

/// Audit records for one orchestrator execution
/// GET /api/lookup-audits/by-execution/:execution_id
#[utoipa::path(
    get,
    path = "/api/lookup-audits/by-execution/{execution_id}",
    responses((status = 200, description = "Audit records for the execution")),
    tag = "Look-Up Audits"
)]
pub async fn audits_by_execution(
    State(state): State<Arc<AppState>>,
    Path(execution_id): Path<String>,
    Query(query): Query<AuditQuery>,
) -> ApiResult<impl IntoResponse> {
    let audits = state
        .audit
        .get_execution_history(&execution_id, query.limit.unwrap_or(100))
        .await?;
    Ok(Json(audits))
}

/// Recent audit records for a project
/// GET /api/lookup-projects/:id/audits
pub async fn audits_by_project(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<AuditQuery>,
) -> ApiResult<impl IntoResponse> {
    let audits = state
        .audit
        .get_project_audits(&id, query.limit.unwrap_or(100))
        .await?;
    Ok(Json(audits))
}

/// Execution statistics for a project
/// GET /api/lookup-projects/:id/audit-stats
#[utoipa::path(
    get,
    path = "/api/lookup-projects/{id}/audit-stats",
    responses((status = 200, description = "Summary execution statistics")),
    tag = "Look-Up Audits"
)]
pub async fn audit_stats(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let stats = state.audit.get_project_stats(&id, 1000).await?;
    Ok(Json(stats))
}

/// Audit records for a workflow file execution
/// GET /api/lookup-audits/by-file-execution/:file_execution_id
pub async fn audits_by_file_execution(
    State(state): State<Arc<AppState>>,
    Path(file_execution_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let audits = state.audit.get_by_file_execution(&file_execution_id).await?;
    Ok(Json(audits))
}

/// Audit records for a workflow execution, joined through its file executions
/// GET /api/lookup-audits/by-workflow-execution/:workflow_execution_id
pub async fn audits_by_workflow_execution(
    State(state): State<Arc<AppState>>,
    Path(workflow_execution_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let audits = state
        .audit
        .get_by_workflow_execution(&workflow_execution_id)
        .await?;
    Ok(Json(audits))
}

// ============================================================================
// Cache APIs
// ============================================================================

/// Response cache statistics
/// GET /api/lookup-cache/stats
pub async fn cache_stats(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.cache.stats()))
}

/// Drop expired cache entries
/// POST /api/lookup-cache/cleanup
pub async fn cache_cleanup(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let removed = state.cache.cleanup_expired().await;
    Ok(Json(json!({ "removed": removed })))
}

// ============================================================================
// Orchestrator construction
// ============================================================================

impl AppState {
    /// Build a per-request orchestrator; `use_cache = false` wires the
    /// executor without a response cache.
    pub fn build_orchestrator(&self, use_cache: bool) -> LookupOrchestrator {
        let executor = LookupExecutor::new(
            Arc::clone(&self.repository),
            Arc::clone(&self.loader),
            use_cache.then(|| Arc::clone(&self.cache)),
            Arc::clone(&self.llm_client),
            Arc::clone(&self.audit),
        );
        LookupOrchestrator::new(
            Arc::new(executor),
            OrchestratorConfig::from(&self.config.lookup),
        )
    }
}
