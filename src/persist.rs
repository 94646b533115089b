//! Turn persistence, run off the response path.
//!
//! The answer pipeline calls [`TurnPersister::persist`] from its forwarding
//! task after the caller's stream has already ended. It then:
//!
//! 1. Titles the conversation when the caller marked this as the first
//!    message **and** the store has no turns for it yet.
//! 2. Appends the latest user message and the assistant reply, in that
//!    order, as one batch.
//!
//! Nothing here is retried and nothing is surfaced to the caller: every
//! failure is logged and dropped.

use std::sync::Arc;

use candor_core::error::{PipelineError, Result};
use candor_core::models::ChatMessage;
use candor_core::prompt::{clean_title, latest_user_message, title_input, TITLE_SYSTEM_PROMPT};
use candor_core::store::{ConversationStore, NewTurn};

use crate::config::TitleConfig;
use crate::generation::Generator;

/// Everything needed to record one finished exchange.
#[derive(Debug, Clone)]
pub struct CompletedExchange {
    pub conversation_id: String,
    pub owner_id: String,
    pub is_first_message: bool,
    /// Client history as received, ending with the latest user turn.
    pub history: Vec<ChatMessage>,
    /// The full accumulated assistant reply.
    pub reply: String,
}

pub struct TurnPersister {
    store: Arc<dyn ConversationStore>,
    titler: Arc<dyn Generator>,
    title: TitleConfig,
}

impl TurnPersister {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        titler: Arc<dyn Generator>,
        title: TitleConfig,
    ) -> Self {
        Self {
            store,
            titler,
            title,
        }
    }

    /// Title (when due) and append the exchange.
    pub async fn persist(&self, exchange: CompletedExchange) -> Result<()> {
        if exchange.is_first_message && self.title.enabled {
            self.maybe_title(&exchange).await;
        }

        let mut turns = Vec::with_capacity(2);
        if let Some(user) = latest_user_message(&exchange.history) {
            turns.push(NewTurn::user(user.content.clone()));
        }
        turns.push(NewTurn::assistant(exchange.reply.clone()));

        self.store
            .append_turns(&exchange.conversation_id, &exchange.owner_id, &turns)
            .await
            .map_err(PipelineError::PersistenceFailure)?;

        tracing::debug!(
            conversation_id = %exchange.conversation_id,
            turns = turns.len(),
            "turns persisted"
        );
        Ok(())
    }

    async fn maybe_title(&self, exchange: &CompletedExchange) {
        match self.store.has_turns(&exchange.conversation_id).await {
            Ok(false) => {}
            Ok(true) => return,
            Err(e) => {
                tracing::warn!(
                    conversation_id = %exchange.conversation_id,
                    error = %e,
                    "could not check prior turns; skipping title"
                );
                return;
            }
        }

        let input = title_input(&exchange.history, self.title.max_input_chars);
        if input.is_empty() {
            return;
        }

        let prompt = vec![
            ChatMessage::system(TITLE_SYSTEM_PROMPT),
            ChatMessage::user(input),
        ];
        let raw = match self.titler.complete(&prompt, self.title.max_tokens).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(
                    conversation_id = %exchange.conversation_id,
                    error = %e,
                    "title generation failed"
                );
                return;
            }
        };

        let title = clean_title(&raw, self.title.max_chars);
        if title.is_empty() {
            return;
        }

        if let Err(e) = self.store.set_title(&exchange.conversation_id, &title).await {
            tracing::warn!(
                conversation_id = %exchange.conversation_id,
                error = %e,
                "failed to store title"
            );
        } else {
            tracing::info!(conversation_id = %exchange.conversation_id, title = %title, "conversation titled");
        }
    }
}
