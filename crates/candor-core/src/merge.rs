//! Merging of vector and keyword retrieval results.
//!
//! # Ranking Policy
//!
//! 1. Insert every keyword match into an id-keyed map.
//! 2. Insert every vector match into the same map, overwriting keyword
//!    entries with the same id. The vector entry carries a real similarity.
//! 3. Sort by similarity (desc). Missing similarity sorts below any number.
//!    Equal scores fall back to id (asc) so the order is deterministic.
//! 4. Truncate to `match_count`.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::models::DocumentMatch;

/// Merge, deduplicate, rank, and truncate two independently retrieved lists.
pub fn merge_matches(
    vector: Vec<DocumentMatch>,
    keyword: Vec<DocumentMatch>,
    match_count: usize,
) -> Vec<DocumentMatch> {
    let mut by_id: HashMap<String, DocumentMatch> =
        HashMap::with_capacity(vector.len() + keyword.len());

    for m in keyword {
        by_id.insert(m.id.clone(), m);
    }
    for m in vector {
        by_id.insert(m.id.clone(), m);
    }

    let mut merged: Vec<DocumentMatch> = by_id.into_values().collect();
    merged.sort_by(compare_ranked);
    merged.truncate(match_count);
    merged
}

/// Ordering used by [`merge_matches`]: similarity desc, `None` last, id asc.
pub fn compare_ranked(a: &DocumentMatch, b: &DocumentMatch) -> Ordering {
    match (a.similarity, b.similarity) {
        (Some(sa), Some(sb)) => sb.total_cmp(&sa),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.id.cmp(&b.id))
}
