//! Query normalization.

use crate::error::{PipelineError, Result};
use crate::models::Query;

/// Trim `raw` and pair it with a match count.
///
/// Fails with [`PipelineError::InvalidInput`] when the trimmed text is empty
/// or `match_count` is zero. Length is not bounded here.
pub fn normalize_query(raw: &str, match_count: usize) -> Result<Query> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(PipelineError::invalid("query must not be empty"));
    }
    if match_count == 0 {
        return Err(PipelineError::invalid("matchCount must be >= 1"));
    }
    Ok(Query {
        text: text.to_string(),
        match_count,
    })
}
