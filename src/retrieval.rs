//! Retrieval: embedding, vector match, keyword boost, merge, classify.
//!
//! The two strategies run concurrently. Either one may fail or time out;
//! the failure is logged at `warn` and that strategy contributes nothing.
//! Retrieval itself therefore never fails once the query is valid.

use std::sync::Arc;
use std::time::Duration;

use candor_core::boost::KeywordBoost;
use candor_core::confidence::Thresholds;
use candor_core::embedding::EmbeddingProvider;
use candor_core::error::{PipelineError, Result};
use candor_core::merge::merge_matches;
use candor_core::models::{DocumentMatch, Query, Retrieval};
use candor_core::query::normalize_query;
use candor_core::store::Corpus;

/// Owns the retrieval collaborators. Cheap to share behind an `Arc`.
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    corpus: Arc<dyn Corpus>,
    boost: KeywordBoost,
    thresholds: Thresholds,
    default_match_count: usize,
    similarity_threshold: Option<f64>,
    timeout: Duration,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        corpus: Arc<dyn Corpus>,
        boost: KeywordBoost,
        thresholds: Thresholds,
    ) -> Self {
        Self {
            embedder,
            corpus,
            boost,
            thresholds,
            default_match_count: 8,
            similarity_threshold: None,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_default_match_count(mut self, n: usize) -> Self {
        self.default_match_count = n;
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: Option<f64>) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    /// Bound applied to each embedding and corpus call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Normalize `raw` and retrieve. `match_count` falls back to the
    /// configured default.
    pub async fn query(&self, raw: &str, match_count: Option<usize>) -> Result<Retrieval> {
        let query = normalize_query(raw, match_count.unwrap_or(self.default_match_count))?;
        Ok(self.retrieve(&query).await)
    }

    /// Run both strategies, merge, and classify.
    pub async fn retrieve(&self, query: &Query) -> Retrieval {
        let (vector, keyword) =
            tokio::join!(self.vector_strategy(query), self.keyword_strategy(query));

        let vector = vector.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "vector retrieval degraded; continuing without it");
            Vec::new()
        });
        let keyword = keyword.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "keyword retrieval degraded; continuing without it");
            Vec::new()
        });

        let (vector_hits, keyword_hits) = (vector.len(), keyword.len());
        let matches = merge_matches(vector, keyword, query.match_count);
        let confidence = self.thresholds.classify(&matches);

        tracing::info!(
            vector_hits,
            keyword_hits,
            matches = matches.len(),
            confidence = %confidence,
            "retrieval complete"
        );

        Retrieval {
            matches,
            confidence,
        }
    }

    async fn vector_strategy(&self, query: &Query) -> Result<Vec<DocumentMatch>> {
        let embedding = tokio::time::timeout(self.timeout, self.embedder.embed(&query.text))
            .await
            .map_err(|_| PipelineError::degraded("embedding", timed_out(self.timeout)))?
            .map_err(|e| PipelineError::degraded("embedding", e))?;

        tokio::time::timeout(
            self.timeout,
            self.corpus
                .vector_match(&embedding, query.match_count, self.similarity_threshold),
        )
        .await
        .map_err(|_| PipelineError::degraded("vector match", timed_out(self.timeout)))?
        .map_err(|e| PipelineError::degraded("vector match", e))
    }

    async fn keyword_strategy(&self, query: &Query) -> Result<Vec<DocumentMatch>> {
        if !self.boost.is_triggered(&query.text) {
            return Ok(Vec::new());
        }
        tracing::debug!(terms = ?self.boost.terms(), "keyword boost triggered");

        let limit = self.boost.candidate_limit(query.match_count);
        let hits = tokio::time::timeout(
            self.timeout,
            self.corpus.keyword_search(self.boost.terms(), limit),
        )
        .await
        .map_err(|_| PipelineError::degraded("keyword search", timed_out(self.timeout)))?
        .map_err(|e| PipelineError::degraded("keyword search", e))?;

        Ok(self.boost.score(hits))
    }
}

fn timed_out(after: Duration) -> anyhow::Error {
    anyhow::anyhow!("timed out after {:?}", after)
}
