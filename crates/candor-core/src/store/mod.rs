//! Storage abstraction for Candor.
//!
//! Two traits cover everything the answer pipeline reads or writes:
//!
//! - [`Corpus`]: the reference material. Vector and keyword lookups.
//! - [`ConversationStore`]: conversation records and their turns.
//!
//! Implementations must be `Send + Sync` so they can be shared behind an
//! `Arc` across request tasks. [`memory::InMemoryStore`] implements both for
//! tests; the app crate provides SQLite and remote RPC backends.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Conversation, DocumentMatch, Role, Turn};

/// Read-only access to the reference corpus.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`vector_match`](Corpus::vector_match) | Nearest neighbours of an embedding |
/// | [`keyword_search`](Corpus::keyword_search) | Case-insensitive substring search |
#[async_trait]
pub trait Corpus: Send + Sync {
    /// Up to `k` documents nearest to `embedding`, best first.
    ///
    /// Every returned match has origin `vector` and a similarity in
    /// `[0, 1]`. Documents below `threshold` are omitted when one is given.
    async fn vector_match(
        &self,
        embedding: &[f32],
        k: usize,
        threshold: Option<f64>,
    ) -> Result<Vec<DocumentMatch>>;

    /// Up to `limit` documents whose content contains any of `terms`,
    /// ignoring case. Hits are unscored and have origin `keyword`.
    async fn keyword_search(&self, terms: &[String], limit: usize) -> Result<Vec<DocumentMatch>>;
}

/// A user or assistant message about to be appended to a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTurn {
    pub role: Role,
    pub content: String,
}

impl NewTurn {
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

/// Persistence for conversations and their turns.
///
/// The pipeline itself only calls [`has_turns`](ConversationStore::has_turns),
/// [`set_title`](ConversationStore::set_title) and
/// [`append_turns`](ConversationStore::append_turns). The remaining methods
/// back the CLI and tests.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create a conversation owned by `owner_id` and return it.
    async fn create_conversation(&self, owner_id: &str) -> Result<Conversation>;

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>>;

    /// Whether any turn has been recorded for `conversation_id`.
    async fn has_turns(&self, conversation_id: &str) -> Result<bool>;

    async fn set_title(&self, conversation_id: &str, title: &str) -> Result<()>;

    /// Append `turns` in order. Either all of them are recorded or none.
    async fn append_turns(
        &self,
        conversation_id: &str,
        owner_id: &str,
        turns: &[NewTurn],
    ) -> Result<()>;

    /// All turns of a conversation, oldest first.
    async fn list_turns(&self, conversation_id: &str) -> Result<Vec<Turn>>;
}
