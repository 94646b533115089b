//! In-memory [`Corpus`] and [`ConversationStore`] implementation for testing.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Vector matching is brute-force cosine similarity over all stored vectors.
//! Keyword search is a lowercase substring scan.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::embedding::cosine_similarity;
use crate::merge::compare_ranked;
use crate::models::{Conversation, DocumentMatch, Turn};

use super::{ConversationStore, Corpus, NewTurn};

struct StoredDoc {
    id: String,
    title: Option<String>,
    content: String,
    vector: Vec<f32>,
}

/// In-memory store for tests and offline use.
pub struct InMemoryStore {
    docs: RwLock<Vec<StoredDoc>>,
    conversations: RwLock<HashMap<String, Conversation>>,
    turns: RwLock<Vec<Turn>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(Vec::new()),
            conversations: RwLock::new(HashMap::new()),
            turns: RwLock::new(Vec::new()),
        }
    }

    /// Insert or replace a corpus document.
    pub fn insert_document(
        &self,
        id: &str,
        title: Option<&str>,
        content: &str,
        vector: Vec<f32>,
    ) -> Result<()> {
        let mut docs = write(&self.docs)?;
        docs.retain(|d| d.id != id);
        docs.push(StoredDoc {
            id: id.to_string(),
            title: title.map(str::to_string),
            content: content.to_string(),
            vector,
        });
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn to_match(doc: &StoredDoc, m: DocumentMatch) -> DocumentMatch {
    match &doc.title {
        Some(t) => m.with_title(t.clone()),
        None => m,
    }
}

#[async_trait]
impl Corpus for InMemoryStore {
    async fn vector_match(
        &self,
        embedding: &[f32],
        k: usize,
        threshold: Option<f64>,
    ) -> Result<Vec<DocumentMatch>> {
        let docs = read(&self.docs)?;
        let mut matches: Vec<DocumentMatch> = docs
            .iter()
            .filter_map(|d| {
                let sim = (cosine_similarity(embedding, &d.vector) as f64).clamp(0.0, 1.0);
                if !sim.is_finite() || threshold.is_some_and(|t| sim < t) {
                    return None;
                }
                Some(to_match(d, DocumentMatch::vector(&d.id, &d.content, sim)))
            })
            .collect();
        matches.sort_by(compare_ranked);
        matches.truncate(k);
        Ok(matches)
    }

    async fn keyword_search(&self, terms: &[String], limit: usize) -> Result<Vec<DocumentMatch>> {
        let needles: Vec<String> = terms
            .iter()
            .map(|t| t.to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        if needles.is_empty() {
            return Ok(Vec::new());
        }

        let docs = read(&self.docs)?;
        Ok(docs
            .iter()
            .filter(|d| {
                let haystack = d.content.to_lowercase();
                needles.iter().any(|n| haystack.contains(n))
            })
            .take(limit)
            .map(|d| to_match(d, DocumentMatch::keyword(&d.id, &d.content)))
            .collect())
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn create_conversation(&self, owner_id: &str) -> Result<Conversation> {
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            title: None,
            owner_id: owner_id.to_string(),
            created_at: Utc::now(),
        };
        write(&self.conversations)?.insert(conversation.id.clone(), conversation.clone());
        Ok(conversation)
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        Ok(read(&self.conversations)?.get(id).cloned())
    }

    async fn has_turns(&self, conversation_id: &str) -> Result<bool> {
        Ok(read(&self.turns)?
            .iter()
            .any(|t| t.conversation_id == conversation_id))
    }

    async fn set_title(&self, conversation_id: &str, title: &str) -> Result<()> {
        let mut conversations = write(&self.conversations)?;
        let conversation = conversations
            .get_mut(conversation_id)
            .ok_or_else(|| anyhow!("conversation not found: {}", conversation_id))?;
        conversation.title = Some(title.to_string());
        Ok(())
    }

    async fn append_turns(
        &self,
        conversation_id: &str,
        owner_id: &str,
        turns: &[NewTurn],
    ) -> Result<()> {
        let now = Utc::now();
        let mut stored = write(&self.turns)?;
        stored.extend(turns.iter().map(|t| Turn {
            conversation_id: conversation_id.to_string(),
            role: t.role,
            content: t.content.clone(),
            owner_id: owner_id.to_string(),
            created_at: now,
        }));
        Ok(())
    }

    async fn list_turns(&self, conversation_id: &str) -> Result<Vec<Turn>> {
        Ok(read(&self.turns)?
            .iter()
            .filter(|t| t.conversation_id == conversation_id)
            .cloned()
            .collect())
    }
}
