//! Scripted fakes shared by the integration tests.

#![allow(dead_code)]

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use candor::generation::{Generator, TextStream};
use candor::persist::TurnPersister;
use candor::pipeline::{AnswerService, AppServices};
use candor::retrieval::Retriever;
use candor::config::TitleConfig;
use candor_core::boost::KeywordBoost;
use candor_core::confidence::Thresholds;
use candor_core::embedding::EmbeddingProvider;
use candor_core::models::ChatMessage;
use candor_core::prompt::Persona;
use candor_core::store::memory::InMemoryStore;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ─── Embedding ──────────────────────────────────────────────────────

/// Returns the same vector for every text, or always fails.
pub struct FixedEmbedder {
    vector: Option<Vec<f32>>,
}

impl FixedEmbedder {
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            vector: Some(vector),
        }
    }

    pub fn failing() -> Self {
        Self { vector: None }
    }
}

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
    fn model_name(&self) -> &str {
        "fixed"
    }
    fn dims(&self) -> usize {
        2
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        self.vector
            .clone()
            .ok_or_else(|| anyhow!("embedding service unavailable"))
    }
}

// ─── Generation ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Step {
    Text(&'static str),
    Fail(&'static str),
    /// Never yields again.
    Hang,
}

/// Sets its flag when dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Replays a fixed script and records what it was asked.
pub struct ScriptedGenerator {
    steps: Vec<Step>,
    fail_to_start: bool,
    title: Option<String>,
    pub prompts: Mutex<Vec<Vec<ChatMessage>>>,
    pub title_requests: Mutex<Vec<Vec<ChatMessage>>>,
    pub upstream_dropped: Arc<AtomicBool>,
    pub streams_started: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            fail_to_start: false,
            title: Some("\"Money and Debt\"".to_string()),
            prompts: Mutex::new(Vec::new()),
            title_requests: Mutex::new(Vec::new()),
            upstream_dropped: Arc::new(AtomicBool::new(false)),
            streams_started: AtomicUsize::new(0),
        }
    }

    pub fn hello_world() -> Self {
        Self::new(vec![Step::Text("Hello"), Step::Text(" world")])
    }

    pub fn failing_to_start() -> Self {
        let mut g = Self::new(Vec::new());
        g.fail_to_start = true;
        g
    }

    pub fn with_failing_title(mut self) -> Self {
        self.title = None;
        self
    }

    pub fn last_prompt(&self) -> Vec<ChatMessage> {
        self.prompts
            .lock()
            .unwrap()
            .last()
            .cloned()
            .unwrap_or_default()
    }

    pub fn title_request_count(&self) -> usize {
        self.title_requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, messages: &[ChatMessage]) -> Result<TextStream> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        if self.fail_to_start {
            bail!("provider refused the request");
        }
        self.streams_started.fetch_add(1, Ordering::SeqCst);

        let mut items: Vec<Result<String>> = Vec::new();
        let mut hang = false;
        for step in &self.steps {
            match step {
                Step::Text(t) => items.push(Ok(t.to_string())),
                Step::Fail(msg) => items.push(Err(anyhow!(*msg))),
                Step::Hang => {
                    hang = true;
                    break;
                }
            }
        }

        let flag = DropFlag(self.upstream_dropped.clone());
        let base = if hang {
            stream::iter(items).chain(stream::pending()).boxed()
        } else {
            stream::iter(items).boxed()
        };
        Ok(base
            .map(move |item| {
                let _keep = &flag;
                item
            })
            .boxed())
    }

    async fn complete(&self, messages: &[ChatMessage], _max_tokens: u32) -> Result<String> {
        self.title_requests.lock().unwrap().push(messages.to_vec());
        self.title
            .clone()
            .ok_or_else(|| anyhow!("title model unavailable"))
    }
}

// ─── Wiring ─────────────────────────────────────────────────────────

/// The pieces a test may want to inspect after running the pipeline.
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub generator: Arc<ScriptedGenerator>,
    pub answers: Arc<AnswerService>,
}

impl Harness {
    pub fn services(&self) -> AppServices {
        AppServices {
            answers: self.answers.clone(),
            conversations: self.store.clone(),
        }
    }
}

/// Build a pipeline over an in-memory store, the given embedder and generator.
pub fn harness(
    store: Arc<InMemoryStore>,
    embedder: FixedEmbedder,
    generator: ScriptedGenerator,
    similarity_threshold: Option<f64>,
) -> Harness {
    let generator = Arc::new(generator);
    let retriever = Retriever::new(
        Arc::new(embedder),
        store.clone(),
        KeywordBoost::default(),
        Thresholds::default(),
    )
    .with_similarity_threshold(similarity_threshold)
    .with_timeout(Duration::from_secs(5));

    let persister = TurnPersister::new(store.clone(), generator.clone(), TitleConfig::default());
    let answers = AnswerService::new(
        Arc::new(retriever),
        generator.clone(),
        Some(Arc::new(persister)),
        Persona::new("test-1", "You are a careful assistant."),
    )
    .with_channel_capacity(4)
    .with_idle_timeout(Duration::from_secs(5));

    Harness {
        store,
        generator,
        answers: Arc::new(answers),
    }
}

/// A small corpus: two PPL documents far from the query vector `[1, 0]`,
/// one loosely related document, and one strongly related document.
pub fn seeded_store() -> Arc<InMemoryStore> {
    let store = InMemoryStore::new();
    store
        .insert_document(
            "ppl-1",
            Some("Ledger overview"),
            "The PPL records unpaid care work.",
            vec![0.0, 1.0],
        )
        .unwrap();
    store
        .insert_document(
            "ppl-2",
            None,
            "People Powered Ledger entries are public.",
            vec![0.0, 1.0],
        )
        .unwrap();
    store
        .insert_document("loose", None, "Notes on accounting.", vec![1.0, 2.0])
        .unwrap();
    Arc::new(store)
}
