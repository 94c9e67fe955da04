//! Enrichment Merger - combines results from multiple Look-Ups.
//!
//! When several Look-Ups enrich the same record they may produce
//! overlapping fields. Conflicts resolve by confidence first, then by
//! first-complete-wins; the orchestrator pre-sorts inputs by priority so
//! ties favor higher-priority Look-Ups.

use serde::Serialize;
use serde_json::{Map, Value};

use super::executor::LookupSuccess;

/// Which fields each Look-Up contributed to the merged output.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentDetail {
    pub lookup_project_id: String,
    pub lookup_project_name: String,
    pub confidence: Option<f64>,
    pub cached: bool,
    pub execution_time_ms: i64,
    pub fields_added: Vec<String>,
}

/// Merged enrichment output.
#[derive(Debug, Clone, Serialize)]
pub struct MergeResult {
    pub data: Map<String, Value>,
    pub conflicts_resolved: u32,
    pub enrichment_details: Vec<EnrichmentDetail>,
}

/// Tracks the current winner for one field.
struct FieldSource {
    project_id: String,
    confidence: Option<f64>,
    value: Value,
}

/// Merges enrichments with confidence-based conflict resolution.
pub struct EnrichmentMerger;

impl EnrichmentMerger {
    /// Merge enrichments in input order.
    ///
    /// `conflicts_resolved` counts every collision on an already-assigned
    /// field, whether or not the resolution changed the winner; disjoint
    /// enrichments therefore merge with a zero count.
    pub fn merge(enrichments: &[LookupSuccess]) -> MergeResult {
        let mut merged_data: Map<String, Value> = Map::new();
        let mut field_sources: std::collections::HashMap<String, FieldSource> =
            std::collections::HashMap::new();
        let mut conflicts_resolved = 0u32;
        let mut enrichment_details = Vec::with_capacity(enrichments.len());

        for enrichment in enrichments {
            let mut fields_added = Vec::new();

            for (field_name, field_value) in &enrichment.data {
                let candidate = FieldSource {
                    project_id: enrichment.project_id.clone(),
                    confidence: enrichment.confidence,
                    value: field_value.clone(),
                };

                match field_sources.get(field_name) {
                    None => {
                        merged_data.insert(field_name.clone(), candidate.value.clone());
                        field_sources.insert(field_name.clone(), candidate);
                        fields_added.push(field_name.clone());
                    }
                    Some(existing) => {
                        conflicts_resolved += 1;
                        if Self::new_wins(existing, &candidate) {
                            merged_data.insert(field_name.clone(), candidate.value.clone());
                            field_sources.insert(field_name.clone(), candidate);
                            fields_added.push(field_name.clone());
                        }
                    }
                }
            }

            enrichment_details.push(EnrichmentDetail {
                lookup_project_id: enrichment.project_id.clone(),
                lookup_project_name: enrichment.project_name.clone(),
                confidence: enrichment.confidence,
                cached: enrichment.cached,
                execution_time_ms: enrichment.execution_time_ms,
                fields_added,
            });
        }

        MergeResult { data: merged_data, conflicts_resolved, enrichment_details }
    }

    /// Conflict resolution, in order:
    /// 1. Both have confidence: strictly higher new confidence wins.
    /// 2. Only one has confidence: the confidence-bearing one wins.
    /// 3. Neither (or equal): first-complete wins, the existing entry stays.
    fn new_wins(existing: &FieldSource, new: &FieldSource) -> bool {
        match (existing.confidence, new.confidence) {
            (Some(old), Some(fresh)) => fresh > old,
            (None, Some(_)) => true,
            _ => false,
        }
    }
}
