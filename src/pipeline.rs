//! Answer orchestration.
//!
//! [`AnswerService::answer_stream`] is the primary entry point:
//!
//! 1. Take the latest user message as the retrieval query.
//! 2. Retrieve, classify, render context, compose the prompt.
//! 3. Start the provider stream and wait for its first increment. Failing
//!    here is a [`PipelineError::GenerationFailure`] returned before any
//!    output exists.
//! 4. Spawn a forwarding task that pushes increments into a bounded channel
//!    while appending them to the accumulation buffer.
//! 5. When the provider finishes cleanly, close the channel and only then
//!    hand the accumulated reply to the [`TurnPersister`]. The caller never
//!    waits on storage.
//!
//! A mid-stream failure yields one error item and ends the stream. Dropping
//! the [`AnswerStream`] (client disconnect) or cancelling its token stops the
//! forwarder and drops the upstream stream. In both cases the partial reply
//! is discarded and nothing is persisted.
//!
//! [`AnswerService::answer`] is a thin adapter that drains the stream.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use anyhow::{anyhow, Context, Result as AnyResult};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tokio_util::task::TaskTracker;

use candor_core::context::render_context;
use candor_core::error::{PipelineError, Result};
use candor_core::models::{AssistantMessage, ChatMessage, ConfidenceTier, Retrieval};
use candor_core::prompt::{compose_prompt, latest_user_message, Persona};
use candor_core::store::{ConversationStore, Corpus};

use crate::config::{Backend, Config, PersonaConfig};
use crate::embedding::create_provider;
use crate::generation::{create_generator, Generator, TextStream};
use crate::persist::{CompletedExchange, TurnPersister};
use crate::retrieval::Retriever;
use crate::rpc_corpus::RpcCorpus;
use crate::sqlite_store::SqliteStore;
use crate::{db, migrate};

/// Owner recorded when the caller supplies none.
pub const ANONYMOUS_OWNER: &str = "anonymous";

/// One chat request.
#[derive(Debug, Clone)]
pub struct AnswerRequest {
    /// Conversation history, oldest first, ending with the latest user turn.
    pub messages: Vec<ChatMessage>,
    /// When set, the exchange is persisted to this conversation.
    pub conversation_id: Option<String>,
    pub owner_id: String,
    pub is_first_message: bool,
}

impl AnswerRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            conversation_id: None,
            owner_id: ANONYMOUS_OWNER.to_string(),
            is_first_message: false,
        }
    }

    pub fn in_conversation(mut self, conversation_id: impl Into<String>, owner_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self.owner_id = owner_id.into();
        self
    }

    pub fn first_message(mut self, is_first: bool) -> Self {
        self.is_first_message = is_first;
        self
    }
}

/// Text increments of one answer.
///
/// Dropping the stream cancels generation.
pub struct AnswerStream {
    rx: mpsc::Receiver<Result<String>>,
    cancel: CancellationToken,
    confidence: ConfidenceTier,
    _guard: DropGuard,
}

impl AnswerStream {
    /// Confidence tier of the context this answer is grounded in.
    pub fn confidence(&self) -> ConfidenceTier {
        self.confidence
    }

    /// Token that stops generation when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Stream for AnswerStream {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

pub struct AnswerService {
    retriever: Arc<Retriever>,
    generator: Arc<dyn Generator>,
    persister: Option<Arc<TurnPersister>>,
    persona: Persona,
    channel_capacity: usize,
    idle_timeout: Duration,
    tasks: TaskTracker,
}

impl AnswerService {
    pub fn new(
        retriever: Arc<Retriever>,
        generator: Arc<dyn Generator>,
        persister: Option<Arc<TurnPersister>>,
        persona: Persona,
    ) -> Self {
        Self {
            retriever,
            generator,
            persister,
            persona,
            channel_capacity: 64,
            idle_timeout: Duration::from_secs(30),
            tasks: TaskTracker::new(),
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Maximum wait for the next increment, including the first.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn retriever(&self) -> &Arc<Retriever> {
        &self.retriever
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    /// Retrieve and compose the full instruction sequence for `messages`.
    pub async fn prepare(&self, messages: &[ChatMessage]) -> Result<(Retrieval, Vec<ChatMessage>)> {
        let question = latest_user_message(messages)
            .ok_or_else(|| PipelineError::invalid("messages must contain a user message"))?;

        // A blank question still gets an answer, just without context.
        let retrieval = if question.content.trim().is_empty() {
            tracing::info!("blank question, skipping retrieval");
            Retrieval::empty()
        } else {
            self.retriever.query(&question.content, None).await?
        };
        let context = render_context(&retrieval.matches, self.retriever.thresholds());
        let prompt = compose_prompt(&self.persona, retrieval.confidence, &context, messages);

        tracing::info!(
            persona_version = %self.persona.version,
            matches = retrieval.matches.len(),
            confidence = %retrieval.confidence,
            history = messages.len(),
            "prompt composed"
        );

        Ok((retrieval, prompt))
    }

    /// Stream an answer. See the module docs for the lifecycle.
    pub async fn answer_stream(&self, request: AnswerRequest) -> Result<AnswerStream> {
        let (retrieval, prompt) = self.prepare(&request.messages).await?;

        let mut upstream = self
            .generator
            .stream(&prompt)
            .await
            .map_err(PipelineError::GenerationFailure)?;

        let first = match tokio::time::timeout(self.idle_timeout, upstream.next()).await {
            Err(_) => {
                return Err(PipelineError::GenerationFailure(anyhow!(
                    "no output from {} within {:?}",
                    self.generator.name(),
                    self.idle_timeout
                )))
            }
            Ok(None) => {
                return Err(PipelineError::GenerationFailure(anyhow!(
                    "{} returned an empty completion",
                    self.generator.name()
                )))
            }
            Ok(Some(Err(e))) => return Err(PipelineError::GenerationFailure(e)),
            Ok(Some(Ok(text))) => text,
        };

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let cancel = CancellationToken::new();

        let forwarder = Forwarder {
            tx,
            cancel: cancel.clone(),
            idle_timeout: self.idle_timeout,
            persister: self.persister.clone(),
            request,
        };
        self.tasks.spawn(forwarder.run(first, upstream));

        Ok(AnswerStream {
            rx,
            _guard: cancel.clone().drop_guard(),
            cancel,
            confidence: retrieval.confidence,
        })
    }

    /// Wait for every in-flight forwarding task, persistence included.
    pub async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Single-shot answer: drain the stream into one message.
    pub async fn answer(&self, request: AnswerRequest) -> Result<AssistantMessage> {
        let mut stream = self.answer_stream(request).await?;
        let mut content = String::new();
        while let Some(item) = stream.next().await {
            content.push_str(&item?);
        }
        Ok(AssistantMessage::new(content))
    }
}

/// Per-request task moving increments from the provider to the caller.
struct Forwarder {
    tx: mpsc::Sender<Result<String>>,
    cancel: CancellationToken,
    idle_timeout: Duration,
    persister: Option<Arc<TurnPersister>>,
    request: AnswerRequest,
}

enum Outcome {
    Completed(String),
    Failed,
    Cancelled,
}

impl Forwarder {
    async fn run(self, first: String, upstream: TextStream) {
        let outcome = self.forward(first, upstream).await;
        let Forwarder {
            tx,
            persister,
            request,
            ..
        } = self;
        // Close the channel before persisting so the caller sees the end
        // of the stream without waiting on storage.
        drop(tx);

        match outcome {
            Outcome::Completed(reply) => {
                tracing::debug!(chars = reply.len(), "generation complete");
                if let (Some(persister), Some(conversation_id)) =
                    (persister, request.conversation_id)
                {
                    let exchange = CompletedExchange {
                        conversation_id: conversation_id.clone(),
                        owner_id: request.owner_id,
                        is_first_message: request.is_first_message,
                        history: request.messages,
                        reply,
                    };
                    if let Err(e) = persister.persist(exchange).await {
                        tracing::error!(conversation_id = %conversation_id, error = %e, "failed to persist turns");
                    }
                }
            }
            Outcome::Failed => tracing::warn!("generation failed mid-stream; reply discarded"),
            Outcome::Cancelled => tracing::info!("generation cancelled; reply discarded"),
        }
    }

    async fn forward(&self, first: String, mut upstream: TextStream) -> Outcome {
        let mut reply = String::new();

        reply.push_str(&first);
        if !self.send(Ok(first)).await {
            return Outcome::Cancelled;
        }

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Outcome::Cancelled,
                next = tokio::time::timeout(self.idle_timeout, upstream.next()) => next,
            };

            match next {
                Ok(None) => return Outcome::Completed(reply),
                Ok(Some(Ok(text))) => {
                    reply.push_str(&text);
                    if !self.send(Ok(text)).await {
                        return Outcome::Cancelled;
                    }
                }
                Ok(Some(Err(e))) => {
                    tracing::warn!(error = %e, "generation stream error");
                    self.send(Err(PipelineError::GenerationFailure(e))).await;
                    return Outcome::Failed;
                }
                Err(_) => {
                    let e = anyhow!("no increment within {:?}", self.idle_timeout);
                    tracing::warn!(error = %e, "generation stalled");
                    self.send(Err(PipelineError::GenerationFailure(e))).await;
                    return Outcome::Failed;
                }
            }
        }
    }

    /// Deliver one item. `false` when the caller is gone or cancelled.
    async fn send(&self, item: Result<String>) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(item) => sent.is_ok(),
        }
    }
}

/// Long-lived service handles built once at startup.
#[derive(Clone)]
pub struct AppServices {
    pub answers: Arc<AnswerService>,
    pub conversations: Arc<dyn ConversationStore>,
}

impl AppServices {
    /// Connect storage, build providers, and wire the answer service.
    pub async fn from_config(config: &Config) -> AnyResult<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate(&pool).await?;
        let sqlite = Arc::new(SqliteStore::new(pool));

        let corpus: Arc<dyn Corpus> = match config.retrieval.backend {
            Backend::Sqlite => sqlite.clone(),
            Backend::Rpc => {
                let rpc = config
                    .retrieval
                    .rpc
                    .as_ref()
                    .ok_or_else(|| anyhow!("retrieval.backend = \"rpc\" requires [retrieval.rpc]"))?;
                Arc::new(RpcCorpus::new(rpc, config.retrieval.timeout_secs)?)
            }
        };
        let conversations: Arc<dyn ConversationStore> = sqlite;

        let embedding_budget = config.embedding.worst_case_secs();
        if config.embedding.is_enabled() && embedding_budget > config.retrieval.timeout_secs {
            tracing::warn!(
                retrieval_timeout_secs = config.retrieval.timeout_secs,
                embedding_worst_case_secs = embedding_budget,
                "retrieval.timeout_secs cuts embedding retries short"
            );
        }

        let embedder = create_provider(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        let persona = load_persona(&config.persona)?;

        tracing::info!(
            backend = ?config.retrieval.backend,
            embedding_model = embedder.model_name(),
            embedding_dims = embedder.dims(),
            generator = generator.name(),
            persona_version = %persona.version,
            "services initialised"
        );

        let retriever = Retriever::new(
            embedder,
            corpus,
            config.retrieval.boost.compile()?,
            config.confidence,
        )
        .with_default_match_count(config.retrieval.match_count)
        .with_similarity_threshold(config.retrieval.similarity_threshold)
        .with_timeout(Duration::from_secs(config.retrieval.timeout_secs));

        let persister = TurnPersister::new(
            conversations.clone(),
            generator.clone(),
            config.title.clone(),
        );

        let answers = AnswerService::new(
            Arc::new(retriever),
            generator,
            Some(Arc::new(persister)),
            persona,
        )
        .with_channel_capacity(config.generation.channel_capacity)
        .with_idle_timeout(Duration::from_secs(config.generation.idle_timeout_secs));

        Ok(Self {
            answers: Arc::new(answers),
            conversations,
        })
    }
}

/// The built-in persona, or the file at `persona.path` when configured.
pub fn load_persona(config: &PersonaConfig) -> AnyResult<Persona> {
    let persona = match &config.path {
        None => Persona::builtin(),
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read persona file: {}", path.display()))?;
            if text.trim().is_empty() {
                anyhow::bail!("persona file is empty: {}", path.display());
            }
            Persona::new("custom", text)
        }
    };

    Ok(match &config.version {
        Some(version) => Persona::new(version.clone(), persona.text),
        None => persona,
    })
}
