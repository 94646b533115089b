//! Remote corpus behind a PostgREST-style HTTP API (e.g. Supabase).
//!
//! - Vector match: `POST {url}/rest/v1/rpc/{function}` with
//!   `{ query_embedding, match_count, similarity_threshold }`.
//! - Keyword search: `GET {url}/rest/v1/{table}` with an `or=(content.ilike.*term*,…)`
//!   filter.
//!
//! Rows may carry numeric ids; they are stringified. A row without a
//! top-level `title` falls back to `metadata.title`.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use candor_core::models::DocumentMatch;
use candor_core::store::Corpus;

use crate::config::RpcConfig;

pub struct RpcCorpus {
    client: reqwest::Client,
    base_url: String,
    function: String,
    table: String,
    api_key: String,
}

impl RpcCorpus {
    /// Build a client, reading the service key from `config.api_key_env`.
    pub fn new(config: &RpcConfig, timeout_secs: u64) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow!("{} environment variable not set", config.api_key_env))?;
        Self::with_api_key(config, timeout_secs, api_key)
    }

    pub fn with_api_key(
        config: &RpcConfig,
        timeout_secs: u64,
        api_key: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build RPC HTTP client")?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            function: config.function.clone(),
            table: config.table.clone(),
            api_key: api_key.into(),
        })
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("apikey", &self.api_key).bearer_auth(&self.api_key)
    }

    async fn rows(response: reqwest::Response, what: &str) -> Result<Vec<Value>> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("{} failed with {}: {}", what, status, body);
        }
        let json: Value = response.json().await?;
        match json {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            other => bail!("{} returned a non-array body: {}", what, other),
        }
    }
}

/// Build the PostgREST `or` filter for a case-insensitive substring match on
/// any of `terms`. Values containing reserved characters are double-quoted.
pub fn ilike_filter(terms: &[String]) -> String {
    let clauses: Vec<String> = terms
        .iter()
        .map(|term| {
            let value = format!("*{}*", term);
            if value.contains([',', '(', ')', '"', '\\']) {
                let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
                format!("content.ilike.\"{}\"", escaped)
            } else {
                format!("content.ilike.{}", value)
            }
        })
        .collect();
    format!("({})", clauses.join(","))
}

fn row_id(row: &Value) -> Option<String> {
    match row.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn row_title(row: &Value) -> Option<String> {
    row.get("title")
        .and_then(Value::as_str)
        .or_else(|| {
            row.get("metadata")
                .and_then(|m| m.get("title"))
                .and_then(Value::as_str)
        })
        .map(str::to_string)
}

/// Parse one row into a match. Rows without an id or content are dropped.
fn parse_row(row: &Value, vector: bool) -> Option<DocumentMatch> {
    let id = row_id(row)?;
    let content = row.get("content")?.as_str()?.to_string();
    let m = if vector {
        let mut m = DocumentMatch::vector(id, content, 0.0);
        m.similarity = row.get("similarity").and_then(Value::as_f64);
        m
    } else {
        DocumentMatch::keyword(id, content)
    };
    Some(match row_title(row) {
        Some(t) => m.with_title(t),
        None => m,
    })
}

#[async_trait]
impl Corpus for RpcCorpus {
    async fn vector_match(
        &self,
        embedding: &[f32],
        k: usize,
        threshold: Option<f64>,
    ) -> Result<Vec<DocumentMatch>> {
        let url = format!("{}/rest/v1/rpc/{}", self.base_url, self.function);
        let body = serde_json::json!({
            "query_embedding": embedding,
            "match_count": k,
            "similarity_threshold": threshold.unwrap_or(0.0),
        });

        let response = self.authed(self.client.post(&url)).json(&body).send().await?;
        let rows = Self::rows(response, &format!("rpc {}", self.function)).await?;

        let mut matches: Vec<DocumentMatch> =
            rows.iter().filter_map(|r| parse_row(r, true)).collect();
        matches.truncate(k);
        Ok(matches)
    }

    async fn keyword_search(&self, terms: &[String], limit: usize) -> Result<Vec<DocumentMatch>> {
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let url = format!("{}/rest/v1/{}", self.base_url, self.table);
        let response = self
            .authed(self.client.get(&url))
            .query(&[
                ("select", "id,title,content,metadata".to_string()),
                ("or", ilike_filter(terms)),
                ("limit", limit.to_string()),
            ])
            .send()
            .await?;
        let rows = Self::rows(response, &format!("keyword search on {}", self.table)).await?;

        Ok(rows.iter().filter_map(|r| parse_row(r, false)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candor_core::models::MatchOrigin;

    #[test]
    fn test_ilike_filter() {
        let terms = vec!["PPL".to_string(), "People Powered Ledger".to_string()];
        assert_eq!(
            ilike_filter(&terms),
            "(content.ilike.*PPL*,content.ilike.*People Powered Ledger*)"
        );
    }

    #[test]
    fn test_ilike_filter_quotes_reserved() {
        let terms = vec!["a,b".to_string()];
        assert_eq!(ilike_filter(&terms), "(content.ilike.\"*a,b*\")");
    }

    #[test]
    fn test_parse_row_numeric_id_and_metadata_title() {
        let row = serde_json::json!({
            "id": 42,
            "content": "The ledger.",
            "similarity": 0.77,
            "metadata": { "title": "Ledger" }
        });
        let m = parse_row(&row, true).unwrap();
        assert_eq!(m.id, "42");
        assert_eq!(m.similarity, Some(0.77));
        assert_eq!(m.title.as_deref(), Some("Ledger"));
        assert_eq!(m.origin, MatchOrigin::Vector);
    }

    #[test]
    fn test_parse_row_missing_similarity() {
        let row = serde_json::json!({ "id": "x", "content": "c", "title": "T" });
        let m = parse_row(&row, true).unwrap();
        assert_eq!(m.similarity, None);
        assert_eq!(m.title.as_deref(), Some("T"));

        let k = parse_row(&row, false).unwrap();
        assert_eq!(k.origin, MatchOrigin::Keyword);
    }

    #[test]
    fn test_parse_row_drops_incomplete() {
        assert!(parse_row(&serde_json::json!({ "content": "c" }), true).is_none());
        assert!(parse_row(&serde_json::json!({ "id": 1 }), false).is_none());
    }
}
