//! Execution audit logging and read paths.
//!
//! One append-only record per executor invocation, successful or not.
//! Writes are fire-and-forget: a failed audit insert is logged locally and
//! never converts a successful execution into a failed one.

use serde::Serialize;
use sqlx::SqlitePool;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::lookup::{AuditStatus, LookupExecutionAudit};

/// Everything an audit row captures about one executor invocation.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub execution_id: String,
    pub lookup_project_id: String,
    pub prompt_studio_project_id: Option<String>,
    pub file_execution_id: Option<String>,
    pub input_data: serde_json::Value,
    pub reference_data_version: i64,
    pub llm_provider: String,
    pub llm_model: String,
    pub llm_prompt: String,
    pub llm_response: Option<String>,
    pub enriched_output: Option<serde_json::Value>,
    pub status: AuditStatus,
    pub confidence_score: Option<f64>,
    pub execution_time_ms: Option<i64>,
    pub llm_call_time_ms: Option<i64>,
    pub llm_response_cached: bool,
    pub error_message: Option<String>,
}

/// Summary statistics for a project's execution history.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct ProjectAuditStats {
    pub total_executions: i64,
    pub success_rate: f64,
    pub avg_execution_time_ms: i64,
    pub cache_hit_rate: f64,
    pub avg_confidence: f64,
    pub successful: i64,
    pub failed: i64,
    pub partial: i64,
}

/// Logs Look-Up execution details to the audit table.
pub struct AuditLogger {
    pool: SqlitePool,
}

impl AuditLogger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist one audit record. Returns the audit id, or None when the
    /// write failed (the failure is logged, never propagated).
    pub async fn log_execution(&self, record: AuditRecord) -> Option<String> {
        let id = Uuid::new_v4().to_string();

        // Two digits of confidence precision, matching the column contract.
        let confidence = record
            .confidence_score
            .map(|c| (c * 100.0).round() / 100.0);

        let input_json = record.input_data.to_string();
        let output_json = record.enriched_output.as_ref().map(|v| v.to_string());

        let result = sqlx::query(
            r#"INSERT INTO lookup_execution_audit
               (id, lookup_project_id, prompt_studio_project_id, execution_id,
                file_execution_id, input_data, reference_data_version, enriched_output,
                llm_provider, llm_model, llm_prompt, llm_response, llm_response_cached,
                execution_time_ms, llm_call_time_ms, status, error_message,
                confidence_score, executed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&id)
        .bind(&record.lookup_project_id)
        .bind(&record.prompt_studio_project_id)
        .bind(&record.execution_id)
        .bind(&record.file_execution_id)
        .bind(&input_json)
        .bind(record.reference_data_version)
        .bind(&output_json)
        .bind(&record.llm_provider)
        .bind(&record.llm_model)
        .bind(&record.llm_prompt)
        .bind(&record.llm_response)
        .bind(record.llm_response_cached)
        .bind(record.execution_time_ms)
        .bind(record.llm_call_time_ms)
        .bind(record.status.as_str())
        .bind(&record.error_message)
        .bind(confidence)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                tracing::debug!(
                    "Logged execution audit {} for Look-Up {} (execution {}, status {})",
                    id,
                    record.lookup_project_id,
                    record.execution_id,
                    record.status.as_str()
                );
                Some(id)
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to log execution audit for {}: {}",
                    record.lookup_project_id,
                    e
                );
                None
            }
        }
    }

    /// Audit records for one orchestrator execution, oldest first.
    pub async fn get_execution_history(
        &self,
        execution_id: &str,
        limit: i64,
    ) -> Result<Vec<LookupExecutionAudit>, sqlx::Error> {
        sqlx::query_as::<_, LookupExecutionAudit>(
            r#"SELECT * FROM lookup_execution_audit
               WHERE execution_id = ?
               ORDER BY executed_at ASC
               LIMIT ?"#,
        )
        .bind(execution_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    /// Recent audit records for one project, newest first.
    pub async fn get_project_audits(
        &self,
        project_id: &str,
        limit: i64,
    ) -> Result<Vec<LookupExecutionAudit>, sqlx::Error> {
        sqlx::query_as::<_, LookupExecutionAudit>(
            r#"SELECT * FROM lookup_execution_audit
               WHERE lookup_project_id = ?
               ORDER BY executed_at DESC
               LIMIT ?"#,
        )
        .bind(project_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    /// Execution statistics over a project's recent history.
    pub async fn get_project_stats(
        &self,
        project_id: &str,
        limit: i64,
    ) -> Result<ProjectAuditStats, sqlx::Error> {
        let audits = self.get_project_audits(project_id, limit).await?;

        let total = audits.len() as i64;
        if total == 0 {
            return Ok(ProjectAuditStats::default());
        }

        let successful = audits.iter().filter(|a| a.status == "success").count() as i64;
        let failed = audits.iter().filter(|a| a.status == "failed").count() as i64;
        let partial = audits.iter().filter(|a| a.status == "partial").count() as i64;
        let cached = audits.iter().filter(|a| a.llm_response_cached).count() as i64;

        let exec_times: Vec<i64> = audits.iter().filter_map(|a| a.execution_time_ms).collect();
        let avg_execution_time_ms = if exec_times.is_empty() {
            0
        } else {
            exec_times.iter().sum::<i64>() / exec_times.len() as i64
        };

        let confidences: Vec<f64> = audits.iter().filter_map(|a| a.confidence_score).collect();
        let avg_confidence = if confidences.is_empty() {
            0.0
        } else {
            confidences.iter().sum::<f64>() / confidences.len() as f64
        };

        Ok(ProjectAuditStats {
            total_executions: total,
            success_rate: successful as f64 / total as f64,
            avg_execution_time_ms,
            cache_hit_rate: cached as f64 / total as f64,
            avg_confidence,
            successful,
            failed,
            partial,
        })
    }

    /// Audit records tied to one workflow file execution.
    pub async fn get_by_file_execution(
        &self,
        file_execution_id: &str,
    ) -> Result<Vec<LookupExecutionAudit>, sqlx::Error> {
        sqlx::query_as::<_, LookupExecutionAudit>(
            r#"SELECT * FROM lookup_execution_audit
               WHERE file_execution_id = ?
               ORDER BY executed_at ASC"#,
        )
        .bind(file_execution_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Audit records for all file executions of a workflow execution,
    /// joined through the workflow file-execution table.
    pub async fn get_by_workflow_execution(
        &self,
        workflow_execution_id: &str,
    ) -> Result<Vec<LookupExecutionAudit>, sqlx::Error> {
        sqlx::query_as::<_, LookupExecutionAudit>(
            r#"SELECT a.* FROM lookup_execution_audit a
               JOIN workflow_file_executions w ON a.file_execution_id = w.id
               WHERE w.workflow_execution_id = ?
               ORDER BY a.executed_at ASC"#,
        )
        .bind(workflow_execution_id)
        .fetch_all(&self.pool)
        .await
    }
}
