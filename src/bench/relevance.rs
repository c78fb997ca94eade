use std::collections::BTreeSet;
use std::sync::Arc;

use super::types::{BackendResult, Query, RelevanceSet, RelevanceSource};

/// Ground truth for one query, resolved once and shared by every backend.
#[derive(Debug, Clone)]
pub enum RelevanceOutcome {
    Resolved(Arc<RelevanceSet>),
    Unresolved { query_id: String, reason: String },
}

impl RelevanceOutcome {
    pub fn relevance_set(&self) -> Option<&Arc<RelevanceSet>> {
        match self {
            Self::Resolved(set) => Some(set),
            Self::Unresolved { .. } => None,
        }
    }
}

/// Where the baseline stands for a query when relevance is resolved.
pub enum BaselineEvidence<'a> {
    /// The baseline's representative successful result.
    Succeeded(&'a BackendResult),
    /// The baseline ran but never succeeded; carries its last failure if any.
    Failed(Option<&'a BackendResult>),
    /// The baseline never ran this query (unavailable or cancelled).
    Missing,
}

pub fn resolve_relevance(
    query: &Query,
    baseline_id: &str,
    baseline: BaselineEvidence<'_>,
    k_relevance: usize,
) -> RelevanceOutcome {
    if let Some(relevant_ids) = &query.explicit_relevant_ids {
        return RelevanceOutcome::Resolved(Arc::new(RelevanceSet {
            query_id: query.id.clone(),
            relevant_ids: relevant_ids.clone(),
            source: RelevanceSource::Explicit,
        }));
    }

    match baseline {
        BaselineEvidence::Succeeded(result) => RelevanceOutcome::Resolved(Arc::new(RelevanceSet {
            query_id: query.id.clone(),
            relevant_ids: top_ranked_ids(result, k_relevance),
            source: RelevanceSource::Pseudo,
        })),
        BaselineEvidence::Failed(last_failure) => {
            let reason = match last_failure {
                Some(result) => format!(
                    "baseline '{}' returned no successful result (last status {}: {})",
                    baseline_id,
                    result.status().as_str(),
                    result.message().unwrap_or("no message")
                ),
                None => format!("baseline '{baseline_id}' returned no successful result"),
            };
            RelevanceOutcome::Unresolved {
                query_id: query.id.clone(),
                reason,
            }
        }
        BaselineEvidence::Missing => RelevanceOutcome::Unresolved {
            query_id: query.id.clone(),
            reason: format!("baseline '{baseline_id}' did not run this query"),
        },
    }
}

/// The first `k_relevance` distinct ids in rank order.
fn top_ranked_ids(result: &BackendResult, k_relevance: usize) -> BTreeSet<String> {
    let mut ranked = result.items().iter().collect::<Vec<_>>();
    ranked.sort_by_key(|item| item.rank);

    let mut relevant_ids = BTreeSet::<String>::new();
    for item in ranked {
        if relevant_ids.len() >= k_relevance {
            break;
        }
        relevant_ids.insert(item.entity_id.clone());
    }
    relevant_ids
}
