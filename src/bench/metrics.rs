use std::collections::BTreeSet;

use super::types::{BackendResult, MetricScore, RelevanceSet};

/// Set-overlap precision, recall and F1 of one result against its relevant set.
///
/// Order and duplicates in the result are ignored. Empty sets follow the
/// vacuous-truth policy: nothing relevant and nothing retrieved scores 1.0.
pub fn score_result(result: &BackendResult, relevance: &RelevanceSet) -> MetricScore {
    let retrieved = result.retrieved_ids();
    let relevant = relevance
        .relevant_ids
        .iter()
        .map(String::as_str)
        .collect::<BTreeSet<&str>>();
    let (precision, recall, f1) = score_sets(&retrieved, &relevant);

    MetricScore {
        backend_id: result.backend_id().to_string(),
        query_id: result.query_id().to_string(),
        precision,
        recall,
        f1,
    }
}

pub fn score_sets(retrieved: &BTreeSet<&str>, relevant: &BTreeSet<&str>) -> (f64, f64, f64) {
    let overlap = retrieved.intersection(relevant).count() as f64;

    let precision = if !retrieved.is_empty() {
        overlap / retrieved.len() as f64
    } else if relevant.is_empty() {
        1.0
    } else {
        0.0
    };

    let recall = if !relevant.is_empty() {
        overlap / relevant.len() as f64
    } else if retrieved.is_empty() {
        1.0
    } else {
        0.0
    };

    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    (precision, recall, f1)
}
