//! SQLite-backed [`Corpus`] and [`ConversationStore`].
//!
//! Vector matching is a brute-force cosine scan over the `documents.embedding`
//! BLOBs, which is adequate for corpora of a few tens of thousands of rows.
//! Larger deployments point `retrieval.backend` at the RPC corpus instead.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use candor_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use candor_core::merge::compare_ranked;
use candor_core::models::{Conversation, DocumentMatch, Role, Turn};
use candor_core::store::{ConversationStore, Corpus, NewTurn};

/// SQLite implementation of both storage traits.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or replace a corpus document and its embedding.
    pub async fn upsert_document(
        &self,
        id: &str,
        title: Option<&str>,
        content: &str,
        embedding: Option<(&[f32], &str)>,
    ) -> Result<()> {
        let (blob, model, dims) = match embedding {
            Some((vector, model)) => (
                Some(vec_to_blob(vector)),
                Some(model.to_string()),
                Some(vector.len() as i64),
            ),
            None => (None, None, None),
        };

        sqlx::query(
            r#"
            INSERT INTO documents (id, title, content, embedding, embedding_model,
                                   embedding_dims, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                content = excluded.content,
                embedding = excluded.embedding,
                embedding_model = excluded.embedding_model,
                embedding_dims = excluded.embedding_dims,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(id)
        .bind(title)
        .bind(content)
        .bind(blob)
        .bind(model)
        .bind(dims)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Escape `%`, `_` and `\` for use inside a `LIKE ... ESCAPE '\'` pattern.
///
/// SQLite's `lower()` only folds ASCII, so the term is folded the same way.
/// Non-ASCII letters match only in the case they are stored in.
fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.to_ascii_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid timestamp in database: {}", raw))?
        .with_timezone(&Utc))
}

fn parse_role(raw: &str) -> Result<Role> {
    match raw {
        "user" => Ok(Role::User),
        "assistant" => Ok(Role::Assistant),
        "system" => Ok(Role::System),
        other => Err(anyhow!("invalid role in database: {}", other)),
    }
}

fn with_title(m: DocumentMatch, title: Option<String>) -> DocumentMatch {
    match title {
        Some(t) => m.with_title(t),
        None => m,
    }
}

#[async_trait]
impl Corpus for SqliteStore {
    async fn vector_match(
        &self,
        embedding: &[f32],
        k: usize,
        threshold: Option<f64>,
    ) -> Result<Vec<DocumentMatch>> {
        let rows = sqlx::query(
            "SELECT id, title, content, embedding FROM documents WHERE embedding IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut matches = Vec::new();
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let stored = blob_to_vec(&blob);
            let sim = (cosine_similarity(embedding, &stored) as f64).clamp(0.0, 1.0);
            if !sim.is_finite() || threshold.is_some_and(|t| sim < t) {
                continue;
            }
            let id: String = row.get("id");
            let content: String = row.get("content");
            let title: Option<String> = row.get("title");
            matches.push(with_title(DocumentMatch::vector(id, content, sim), title));
        }

        matches.sort_by(compare_ranked);
        matches.truncate(k);
        Ok(matches)
    }

    async fn keyword_search(&self, terms: &[String], limit: usize) -> Result<Vec<DocumentMatch>> {
        let terms: Vec<&String> = terms.iter().filter(|t| !t.trim().is_empty()).collect();
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let clauses = vec!["lower(content) LIKE ? ESCAPE '\\'"; terms.len()].join(" OR ");
        let sql = format!(
            "SELECT id, title, content FROM documents WHERE {} ORDER BY id LIMIT ?",
            clauses
        );

        let mut query = sqlx::query(&sql);
        for term in &terms {
            query = query.bind(like_pattern(term));
        }
        let rows = query.bind(limit as i64).fetch_all(&self.pool).await?;

        Ok(rows
            .iter()
            .map(|row| {
                let id: String = row.get("id");
                let content: String = row.get("content");
                let title: Option<String> = row.get("title");
                with_title(DocumentMatch::keyword(id, content), title)
            })
            .collect())
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn create_conversation(&self, owner_id: &str) -> Result<Conversation> {
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            title: None,
            owner_id: owner_id.to_string(),
            created_at: Utc::now(),
        };

        sqlx::query("INSERT INTO conversations (id, title, owner_id, created_at) VALUES (?, NULL, ?, ?)")
            .bind(&conversation.id)
            .bind(&conversation.owner_id)
            .bind(conversation.created_at.to_rfc3339())
            .execute(&self.pool)
            .await?;

        Ok(conversation)
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query("SELECT id, title, owner_id, created_at FROM conversations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| {
            let created_at: String = r.get("created_at");
            Ok(Conversation {
                id: r.get("id"),
                title: r.get("title"),
                owner_id: r.get("owner_id"),
                created_at: parse_ts(&created_at)?,
            })
        })
        .transpose()
    }

    async fn has_turns(&self, conversation_id: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM turns WHERE conversation_id = ?)")
                .bind(conversation_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn set_title(&self, conversation_id: &str, title: &str) -> Result<()> {
        let result = sqlx::query("UPDATE conversations SET title = ? WHERE id = ?")
            .bind(title)
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(anyhow!("conversation not found: {}", conversation_id));
        }
        Ok(())
    }

    async fn append_turns(
        &self,
        conversation_id: &str,
        owner_id: &str,
        turns: &[NewTurn],
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        for turn in turns {
            sqlx::query(
                "INSERT INTO turns (conversation_id, role, content, owner_id, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(conversation_id)
            .bind(turn.role.as_str())
            .bind(&turn.content)
            .bind(owner_id)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_turns(&self, conversation_id: &str) -> Result<Vec<Turn>> {
        let rows = sqlx::query(
            "SELECT conversation_id, role, content, owner_id, created_at FROM turns WHERE conversation_id = ? ORDER BY id",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                let role: String = r.get("role");
                let created_at: String = r.get("created_at");
                Ok(Turn {
                    conversation_id: r.get("conversation_id"),
                    role: parse_role(&role)?,
                    content: r.get("content"),
                    owner_id: r.get("owner_id"),
                    created_at: parse_ts(&created_at)?,
                })
            })
            .collect()
    }
}
