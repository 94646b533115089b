//! Core data models shared by the retrieval, prompt, and persistence layers.
//!
//! These types flow through the answer pipeline: a [`Query`] produces a list
//! of [`DocumentMatch`]es, which are classified into a [`ConfidenceTier`] and
//! rendered into [`ChatMessage`]s for the generation provider. [`Conversation`]
//! and [`Turn`] describe what the persistence layer records afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A normalized retrieval request.
///
/// Built by [`crate::query::normalize_query`]; `text` is never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub text: String,
    pub match_count: usize,
}

/// Which retrieval strategy produced a [`DocumentMatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchOrigin {
    /// Nearest-neighbor search over embeddings. Carries a genuine similarity.
    Vector,
    /// Substring search over the raw corpus. Any similarity is a pseudo-score.
    Keyword,
}

/// A candidate reference document returned by either retrieval strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMatch {
    /// Document identity. Used as the deduplication key when merging.
    pub id: String,
    /// Raw document text.
    pub content: String,
    /// Similarity in `[0, 1]`, or `None` for unscored lexical hits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    /// Human-readable title, when the corpus has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub origin: MatchOrigin,
}

impl DocumentMatch {
    pub fn vector(id: impl Into<String>, content: impl Into<String>, similarity: f64) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            similarity: Some(similarity),
            title: None,
            origin: MatchOrigin::Vector,
        }
    }

    pub fn keyword(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            similarity: None,
            title: None,
            origin: MatchOrigin::Keyword,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_similarity(mut self, similarity: f64) -> Self {
        self.similarity = Some(similarity);
        self
    }

    /// Similarity that counts as evidence for confidence purposes.
    ///
    /// Keyword pseudo-scores only affect ranking, so they return `None` here.
    pub fn genuine_similarity(&self) -> Option<f64> {
        match self.origin {
            MatchOrigin::Vector => self.similarity,
            MatchOrigin::Keyword => None,
        }
    }
}

/// Coarse trust bucket for retrieved context.
///
/// Variants are declared in ascending order so the derived `Ord` gives
/// `None < Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    None,
    Low,
    Medium,
    High,
}

impl ConfidenceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceTier::None => "none",
            ConfidenceTier::Low => "low",
            ConfidenceTier::Medium => "medium",
            ConfidenceTier::High => "high",
        }
    }

    /// Uppercase label used inside prompts (`"HIGH"`, `"NONE"`, ...).
    pub fn label(&self) -> &'static str {
        match self {
            ConfidenceTier::None => "NONE",
            ConfidenceTier::Low => "LOW",
            ConfidenceTier::Medium => "MEDIUM",
            ConfidenceTier::High => "HIGH",
        }
    }
}

impl fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of one retrieval pass: ranked matches plus their overall tier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Retrieval {
    pub matches: Vec<DocumentMatch>,
    pub confidence: ConfidenceTier,
}

impl Retrieval {
    pub fn empty() -> Self {
        Self {
            matches: Vec::new(),
            confidence: ConfidenceTier::None,
        }
    }
}

/// Speaker of a [`ChatMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One role/content pair in a conversation or composed instruction sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A conversation record owned by the storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conversation {
    pub id: String,
    pub title: Option<String>,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
}

/// A persisted message within a conversation. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
}

/// Single-shot answer payload: `{ role, content }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssistantMessage {
    pub role: Role,
    pub content: String,
}

impl AssistantMessage {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}
