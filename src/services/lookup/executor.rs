//! Look-Up Executor - runs a single Look-Up end to end.
//!
//! Load reference data → load template → resolve variables → probe cache →
//! call LLM → parse. Every terminal transition, success or failure, writes
//! exactly one audit record with as much state as the execution reached.

use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;

use super::audit::{AuditLogger, AuditRecord};
use super::cache::ResponseCache;
use super::error::LookupError;
use super::llm::{LlmClient, LlmConfig};
use super::reference_loader::ReferenceDataLoader;
use super::repository::LookupRepository;
use super::resolver::VariableResolver;
use crate::models::lookup::{AuditStatus, LookupProject};

/// Audit correlation for one executor invocation.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    /// Groups all Look-Ups of one orchestrator call
    pub execution_id: String,
    pub prompt_studio_project_id: Option<String>,
    /// Workflow file execution, when invoked from an API/ETL pipeline
    pub file_execution_id: Option<String>,
}

/// Successful Look-Up result. `data` holds enrichment fields only;
/// `confidence` has been extracted out of the payload.
#[derive(Debug, Clone, Serialize)]
pub struct LookupSuccess {
    pub project_id: String,
    pub project_name: String,
    pub data: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub cached: bool,
    pub execution_time_ms: i64,
}

/// Failed Look-Up result with an `error_type` discriminator. Context
/// overflow failures additionally carry the token accounting.
#[derive(Debug, Clone, Serialize)]
pub struct LookupFailure {
    pub project_id: String,
    pub project_name: String,
    pub error: String,
    pub error_type: String,
    pub execution_time_ms: i64,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Terminal result of one Look-Up execution.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum LookupOutcome {
    Success(LookupSuccess),
    Failed(LookupFailure),
}

impl LookupOutcome {
    pub fn project_id(&self) -> &str {
        match self {
            Self::Success(s) => &s.project_id,
            Self::Failed(f) => &f.project_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Audit state accumulated while the state machine advances.
#[derive(Debug, Default)]
struct AuditState {
    reference_data_version: i64,
    llm_provider: String,
    llm_model: String,
    resolved_prompt: Option<String>,
    llm_response: Option<String>,
    llm_call_time_ms: Option<i64>,
}

/// Executes a single Look-Up project against input data.
pub struct LookupExecutor {
    repository: Arc<LookupRepository>,
    loader: Arc<ReferenceDataLoader>,
    cache: Option<Arc<ResponseCache>>,
    llm_client: Arc<LlmClient>,
    audit: Arc<AuditLogger>,
}

impl LookupExecutor {
    pub fn new(
        repository: Arc<LookupRepository>,
        loader: Arc<ReferenceDataLoader>,
        cache: Option<Arc<ResponseCache>>,
        llm_client: Arc<LlmClient>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self { repository, loader, cache, llm_client, audit }
    }

    /// Execute one Look-Up. Never returns an error: every failure becomes a
    /// failed outcome, and every terminal path has written one audit record.
    pub async fn execute(
        &self,
        project: &LookupProject,
        input_data: &Value,
        ctx: &ExecutionContext,
    ) -> LookupOutcome {
        let start = Instant::now();
        let mut state = AuditState {
            reference_data_version: 1,
            llm_provider: "unknown".to_string(),
            llm_model: "unknown".to_string(),
            ..Default::default()
        };

        // Step 1: Load reference data
        let reference = match self.loader.load_latest_for_project(&project.id).await {
            Ok(reference) => reference,
            Err(e) => {
                return self.fail(project, input_data, ctx, &state, &e, start).await;
            }
        };
        state.reference_data_version = reference.version;

        // Step 2: Load prompt template
        let template = match self.repository.active_template(&project.id).await {
            Ok(Some(template)) => template,
            Ok(None) => {
                let e = LookupError::TemplateNotFound(format!(
                    "No template configured for project {}",
                    project.id
                ));
                return self.fail(project, input_data, ctx, &state, &e, start).await;
            }
            Err(e) => {
                return self.fail(project, input_data, ctx, &state, &e, start).await;
            }
        };
        let llm_config = LlmConfig::from_value(&template.llm_config_value());
        state.llm_provider = llm_config.provider_name().to_string();
        state.llm_model = llm_config.model_name().to_string();

        // Step 3: Resolve variables (never fails; missing paths resolve to "")
        let resolver = VariableResolver::new(input_data, &reference.content);
        let resolved_prompt = resolver.resolve(&template.template_text);
        state.resolved_prompt = Some(resolved_prompt.clone());

        // Step 4: Check cache
        let cache_key = self
            .cache
            .as_ref()
            .map(|cache| cache.generate_cache_key(&resolved_prompt, &reference.content));

        if let (Some(cache), Some(key)) = (&self.cache, &cache_key)
            && let Some(cached_response) = cache.get(key).await
        {
            state.llm_response = Some(cached_response.clone());
            return match parse_llm_response(&cached_response) {
                Ok((data, confidence)) => {
                    // Cache hit costs no execution time
                    self.succeed(project, input_data, ctx, &state, data, confidence, true, 0)
                        .await
                }
                Err(e) => self.fail(project, input_data, ctx, &state, &e, start).await,
            };
        }

        // Step 5: Call LLM (cache miss or caching disabled)
        let llm_start = Instant::now();
        let llm_response = match self.llm_client.generate(&resolved_prompt, &llm_config).await {
            Ok(response) => response,
            Err(e) => {
                return self.fail(project, input_data, ctx, &state, &e, start).await;
            }
        };
        let llm_time_ms = llm_start.elapsed().as_millis() as i64;
        state.llm_response = Some(llm_response.clone());
        state.llm_call_time_ms = Some(llm_time_ms);

        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            cache.set(key, &llm_response, None).await;
        }

        // Step 6: Parse response
        match parse_llm_response(&llm_response) {
            Ok((data, confidence)) => {
                self.succeed(project, input_data, ctx, &state, data, confidence, false, llm_time_ms)
                    .await
            }
            Err(e) => self.fail(project, input_data, ctx, &state, &e, start).await,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn succeed(
        &self,
        project: &LookupProject,
        input_data: &Value,
        ctx: &ExecutionContext,
        state: &AuditState,
        data: Map<String, Value>,
        confidence: Option<f64>,
        cached: bool,
        execution_time_ms: i64,
    ) -> LookupOutcome {
        self.log_audit(
            project,
            input_data,
            ctx,
            state,
            AuditStatus::Success,
            Some(Value::Object(data.clone())),
            confidence,
            execution_time_ms,
            cached,
            None,
        )
        .await;

        LookupOutcome::Success(LookupSuccess {
            project_id: project.id.clone(),
            project_name: project.name.clone(),
            data,
            confidence,
            cached,
            execution_time_ms,
        })
    }

    async fn fail(
        &self,
        project: &LookupProject,
        input_data: &Value,
        ctx: &ExecutionContext,
        state: &AuditState,
        error: &LookupError,
        start: Instant,
    ) -> LookupOutcome {
        let execution_time_ms = start.elapsed().as_millis() as i64;
        tracing::warn!("Look-Up {} failed: {}", project.name, error);

        self.log_audit(
            project,
            input_data,
            ctx,
            state,
            AuditStatus::Failed,
            None,
            None,
            execution_time_ms,
            false,
            Some(error.to_string()),
        )
        .await;

        let (token_count, context_limit, model) = match error {
            LookupError::ContextWindowExceeded { token_count, context_limit, model } => {
                (Some(*token_count), Some(*context_limit), Some(model.clone()))
            }
            _ => (None, None, None),
        };

        LookupOutcome::Failed(LookupFailure {
            project_id: project.id.clone(),
            project_name: project.name.clone(),
            error: error.to_string(),
            error_type: error.error_type().to_string(),
            execution_time_ms,
            cached: false,
            token_count,
            context_limit,
            model,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn log_audit(
        &self,
        project: &LookupProject,
        input_data: &Value,
        ctx: &ExecutionContext,
        state: &AuditState,
        status: AuditStatus,
        enriched_output: Option<Value>,
        confidence: Option<f64>,
        execution_time_ms: i64,
        cached: bool,
        error_message: Option<String>,
    ) {
        let audit_id = self
            .audit
            .log_execution(AuditRecord {
                execution_id: ctx.execution_id.clone(),
                lookup_project_id: project.id.clone(),
                prompt_studio_project_id: ctx.prompt_studio_project_id.clone(),
                file_execution_id: ctx.file_execution_id.clone(),
                input_data: input_data.clone(),
                reference_data_version: state.reference_data_version,
                llm_provider: state.llm_provider.clone(),
                llm_model: state.llm_model.clone(),
                llm_prompt: state.resolved_prompt.clone().unwrap_or_default(),
                llm_response: state.llm_response.clone(),
                enriched_output,
                status,
                confidence_score: confidence,
                execution_time_ms: Some(execution_time_ms),
                llm_call_time_ms: if cached { None } else { state.llm_call_time_ms },
                llm_response_cached: cached,
                error_message,
            })
            .await;

        if audit_id.is_none() {
            tracing::warn!(
                "Audit record for Look-Up {} (execution {}) was not persisted",
                project.name,
                ctx.execution_id
            );
        }
    }
}

/// Parse an LLM response into enrichment fields and an optional confidence.
///
/// The response must be a JSON object. A `confidence` key is extracted out
/// of the payload; out-of-range values clamp to the nearest endpoint with a
/// warning, non-numeric values are dropped.
pub fn parse_llm_response(
    response_text: &str,
) -> Result<(Map<String, Value>, Option<f64>), LookupError> {
    let parsed: Value = serde_json::from_str(response_text)
        .map_err(|e| LookupError::Parse(format!("Invalid JSON response: {}", e)))?;

    let Value::Object(mut data) = parsed else {
        return Err(LookupError::Parse(format!(
            "Expected JSON object, got {}",
            json_type_name(&parsed)
        )));
    };

    let confidence = match data.remove("confidence") {
        Some(value) => match value.as_f64() {
            Some(c) if (0.0..=1.0).contains(&c) => Some(c),
            Some(c) => {
                tracing::warn!("Confidence {} outside valid range [0.0, 1.0]", c);
                Some(c.clamp(0.0, 1.0))
            }
            None => {
                tracing::warn!("Invalid confidence type: {}", json_type_name(&value));
                None
            }
        },
        None => None,
    };

    Ok((data, confidence))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
