//! Look-Up Orchestrator - parallel execution of multiple Look-Ups.
//!
//! Submits every Look-Up as its own task under a bounded worker cap,
//! enforces a per-task and a queue-wide timeout, re-sorts successful
//! results into priority order, filters each result down to the fields it
//! actually changed, and merges the survivors.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use utoipa::ToSchema;
use uuid::Uuid;

use super::executor::{ExecutionContext, LookupExecutor, LookupFailure, LookupOutcome};
use super::merger::EnrichmentMerger;
use crate::models::lookup::LookupProject;

/// Orchestrator limits; see `LookupConfig` for the configurable defaults.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_concurrent: usize,
    pub execution_timeout: Duration,
    pub queue_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            execution_timeout: Duration::from_secs(30),
            queue_timeout: Duration::from_secs(120),
        }
    }
}

impl From<&crate::config::LookupConfig> for OrchestratorConfig {
    fn from(config: &crate::config::LookupConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent_executions,
            execution_timeout: Duration::from_secs(config.execution_timeout_seconds),
            queue_timeout: Duration::from_secs(config.queue_timeout_seconds),
        }
    }
}

/// Optional correlation inputs for one orchestrator call.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub execution_id: Option<String>,
    pub prompt_studio_project_id: Option<String>,
    pub file_execution_id: Option<String>,
    /// Per-call override of the per-task timeout
    pub execution_timeout: Option<Duration>,
}

/// Execution metadata returned alongside the merged enrichment.
#[derive(Debug, Serialize, ToSchema)]
pub struct LookupMetadata {
    pub execution_id: String,
    pub executed_at: DateTime<Utc>,
    pub total_execution_time_ms: i64,
    pub lookups_executed: usize,
    pub lookups_successful: usize,
    pub lookups_failed: usize,
    pub conflicts_resolved: u32,
    #[schema(value_type = Vec<Object>)]
    pub enrichments: Vec<LookupOutcome>,
}

/// Result of one orchestrator call.
#[derive(Debug, Serialize, ToSchema)]
pub struct OrchestrationResult {
    #[schema(value_type = Object)]
    pub lookup_enrichment: Map<String, Value>,
    #[serde(rename = "_lookup_metadata")]
    pub lookup_metadata: LookupMetadata,
}

impl OrchestrationResult {
    /// Failed enrichments, in priority order.
    pub fn failures(&self) -> Vec<&LookupFailure> {
        self.lookup_metadata
            .enrichments
            .iter()
            .filter_map(|outcome| match outcome {
                LookupOutcome::Failed(failure) => Some(failure),
                LookupOutcome::Success(_) => None,
            })
            .collect()
    }
}

/// Orchestrates parallel execution of multiple Look-Up projects.
pub struct LookupOrchestrator {
    executor: Arc<LookupExecutor>,
    config: OrchestratorConfig,
}

impl LookupOrchestrator {
    pub fn new(executor: Arc<LookupExecutor>, config: OrchestratorConfig) -> Self {
        tracing::info!(
            "Orchestrator initialized with max_concurrent={}, queue_timeout={}s, execution_timeout={}s",
            config.max_concurrent,
            config.queue_timeout.as_secs(),
            config.execution_timeout.as_secs()
        );
        Self { executor, config }
    }

    /// Execute all Look-Ups in parallel and merge their results.
    ///
    /// Projects are given in priority order (lower index = higher priority).
    /// Individual failures never fail the call; they are reported in the
    /// metadata while successful enrichments still merge.
    pub async fn execute_lookups(
        &self,
        input_data: &Value,
        projects: Vec<LookupProject>,
        options: ExecuteOptions,
    ) -> OrchestrationResult {
        let execution_id = options
            .execution_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let executed_at = Utc::now();
        let start = Instant::now();
        let execution_timeout = options.execution_timeout.unwrap_or(self.config.execution_timeout);

        tracing::info!(
            "Starting orchestrated execution {} for {} Look-Up projects",
            execution_id,
            projects.len()
        );

        if projects.is_empty() {
            return Self::empty_result(execution_id, executed_at, start);
        }

        let ctx = ExecutionContext {
            execution_id: execution_id.clone(),
            prompt_studio_project_id: options.prompt_studio_project_id.clone(),
            file_execution_id: options.file_execution_id.clone(),
        };

        let lookups_executed = projects.len();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent));

        // Submit every Look-Up; the semaphore bounds actual concurrency.
        // Each task raises its `started` flag once it holds a permit and the
        // executor is running: from that point on it must not be aborted (the
        // executor is not cancellable mid-LLM-call and still owes its audit
        // record), only left to finish in the background.
        let handles: Vec<(usize, String, String, Arc<AtomicBool>, JoinHandle<LookupOutcome>)> =
            projects
                .into_iter()
                .enumerate()
                .map(|(idx, project)| {
                    let executor = Arc::clone(&self.executor);
                    let semaphore = Arc::clone(&semaphore);
                    let input = input_data.clone();
                    let ctx = ctx.clone();
                    let project_id = project.id.clone();
                    let project_name = project.name.clone();
                    let started = Arc::new(AtomicBool::new(false));
                    let started_flag = Arc::clone(&started);
                    let handle = tokio::spawn(async move {
                        let _permit = semaphore.acquire_owned().await.ok();
                        started_flag.store(true, Ordering::SeqCst);
                        executor.execute(&project, &input, &ctx).await
                    });
                    (idx, project_id, project_name, started, handle)
                })
                .collect();

        let queue_deadline = start + self.config.queue_timeout;
        let mut collected: Vec<(usize, LookupOutcome)> = Vec::with_capacity(lookups_executed);
        let mut handles = handles.into_iter();

        loop {
            let Some((idx, project_id, project_name, started, mut handle)) = handles.next() else {
                break;
            };

            let queue_remaining = queue_deadline.saturating_duration_since(Instant::now());
            if queue_remaining.is_zero() {
                Self::discard_undone(&started, handle);
                collected.push((idx, self.queue_timeout_failure(&project_id, &project_name)));
                for (idx, project_id, project_name, started, handle) in handles.by_ref() {
                    Self::discard_undone(&started, handle);
                    collected.push((idx, self.queue_timeout_failure(&project_id, &project_name)));
                }
                tracing::error!(
                    "Queue timeout after {}s, some Look-Ups may not have completed",
                    self.config.queue_timeout.as_secs()
                );
                break;
            }

            let wait = execution_timeout.min(queue_remaining);
            match tokio::time::timeout(wait, &mut handle).await {
                Ok(Ok(outcome)) => collected.push((idx, outcome)),
                Ok(Err(e)) => {
                    tracing::error!("Look-Up task for {} panicked: {}", project_name, e);
                    collected.push((
                        idx,
                        LookupOutcome::Failed(LookupFailure {
                            project_id,
                            project_name,
                            error: format!("Execution error: {}", e),
                            error_type: "unknown".to_string(),
                            execution_time_ms: 0,
                            cached: false,
                            token_count: None,
                            context_limit: None,
                            model: None,
                        }),
                    ));
                }
                Err(_) if wait < execution_timeout => {
                    // The queue deadline cut this wait short
                    Self::discard_undone(&started, handle);
                    collected.push((idx, self.queue_timeout_failure(&project_id, &project_name)));
                    for (idx, project_id, project_name, started, handle) in handles.by_ref() {
                        Self::discard_undone(&started, handle);
                        collected
                            .push((idx, self.queue_timeout_failure(&project_id, &project_name)));
                    }
                    tracing::error!(
                        "Queue timeout after {}s, some Look-Ups may not have completed",
                        self.config.queue_timeout.as_secs()
                    );
                    break;
                }
                Err(_) => {
                    // Per-task timeout. The task is left running so its audit
                    // record still lands; its eventual result is discarded.
                    tracing::error!(
                        "Look-Up {} timed out after {}s",
                        project_name,
                        execution_timeout.as_secs()
                    );
                    collected.push((
                        idx,
                        LookupOutcome::Failed(LookupFailure {
                            project_id,
                            project_name,
                            error: format!("Execution timeout ({}s)", execution_timeout.as_secs()),
                            error_type: "unknown".to_string(),
                            execution_time_ms: execution_timeout.as_secs() as i64 * 1000,
                            cached: false,
                            token_count: None,
                            context_limit: None,
                            model: None,
                        }),
                    ));
                }
            }
        }

        // Re-sort into the caller's priority order before filtering and merge
        collected.sort_by_key(|(idx, _)| *idx);

        let mut successes = Vec::new();
        let mut failures = Vec::new();
        for (_, outcome) in collected {
            match outcome {
                LookupOutcome::Success(mut success) => {
                    success.data = filter_changed_fields(input_data, success.data);
                    successes.push(success);
                }
                LookupOutcome::Failed(failure) => failures.push(failure),
            }
        }

        let merge_result = EnrichmentMerger::merge(&successes);
        let total_execution_time_ms = start.elapsed().as_millis() as i64;

        tracing::info!(
            "Orchestration {} completed: {} successful, {} failed, {} conflicts resolved, total time {}ms",
            execution_id,
            successes.len(),
            failures.len(),
            merge_result.conflicts_resolved,
            total_execution_time_ms
        );

        let lookups_successful = successes.len();
        let lookups_failed = failures.len();
        let enrichments: Vec<LookupOutcome> = successes
            .into_iter()
            .map(LookupOutcome::Success)
            .chain(failures.into_iter().map(LookupOutcome::Failed))
            .collect();

        OrchestrationResult {
            lookup_enrichment: merge_result.data,
            lookup_metadata: LookupMetadata {
                execution_id,
                executed_at,
                total_execution_time_ms,
                lookups_executed,
                lookups_successful,
                lookups_failed,
                conflicts_resolved: merge_result.conflicts_resolved,
                enrichments,
            },
        }
    }

    /// Best-effort cancellation on queue expiry. A task that already holds a
    /// permit is mid-execution and is not cancellable mid-LLM-call: dropping
    /// its handle detaches it so it runs to completion and writes its audit
    /// record, with the eventual result discarded. Only tasks still waiting
    /// for a permit are aborted.
    fn discard_undone(started: &AtomicBool, handle: JoinHandle<LookupOutcome>) {
        if started.load(Ordering::SeqCst) {
            drop(handle);
        } else {
            handle.abort();
        }
    }

    fn queue_timeout_failure(&self, project_id: &str, project_name: &str) -> LookupOutcome {
        LookupOutcome::Failed(LookupFailure {
            project_id: project_id.to_string(),
            project_name: project_name.to_string(),
            error: format!("Queue timeout ({}s)", self.config.queue_timeout.as_secs()),
            error_type: "unknown".to_string(),
            execution_time_ms: 0,
            cached: false,
            token_count: None,
            context_limit: None,
            model: None,
        })
    }

    fn empty_result(
        execution_id: String,
        executed_at: DateTime<Utc>,
        start: Instant,
    ) -> OrchestrationResult {
        OrchestrationResult {
            lookup_enrichment: Map::new(),
            lookup_metadata: LookupMetadata {
                execution_id,
                executed_at,
                total_execution_time_ms: start.elapsed().as_millis() as i64,
                lookups_executed: 0,
                lookups_successful: 0,
                lookups_failed: 0,
                conflicts_resolved: 0,
                enrichments: Vec::new(),
            },
        }
    }
}

/// Restrict an enrichment to fields that differ from the input record.
///
/// A Look-Up must not overwrite a field it did not modify; a value equal to
/// the input's is dropped, so a Look-Up that merely confirms an input value
/// contributes nothing to the merge.
pub fn filter_changed_fields(
    input_data: &Value,
    enrichment_data: Map<String, Value>,
) -> Map<String, Value> {
    let Some(input) = input_data.as_object() else {
        return enrichment_data;
    };

    enrichment_data
        .into_iter()
        .filter(|(field, value)| input.get(field) != Some(value))
        .collect()
}
