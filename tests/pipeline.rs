//! End-to-end tests for the answer pipeline over in-memory stores and
//! scripted providers.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;

use candor::pipeline::AnswerRequest;
use candor_core::error::PipelineError;
use candor_core::models::{ChatMessage, ConfidenceTier, MatchOrigin, Role};
use candor_core::store::memory::InMemoryStore;
use candor_core::store::ConversationStore;

use common::{harness, seeded_store, FixedEmbedder, ScriptedGenerator, Step};

async fn collect(stream: candor::pipeline::AnswerStream) -> Vec<Result<String, PipelineError>> {
    stream.collect().await
}

#[tokio::test]
async fn test_increments_arrive_in_order_and_persist_once() {
    let h = harness(
        seeded_store(),
        FixedEmbedder::new(vec![1.0, 0.0]),
        ScriptedGenerator::hello_world(),
        None,
    );
    let conv = h.store.create_conversation("user-1").await.unwrap();

    let request = AnswerRequest::new(vec![ChatMessage::user("Tell me about debt")])
        .in_conversation(&conv.id, "user-1")
        .first_message(true);
    let stream = h.answers.answer_stream(request).await.unwrap();
    let items: Vec<String> = collect(stream)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(items, vec!["Hello", " world"]);

    h.answers.drain().await;

    let turns = h.store.list_turns(&conv.id).await.unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, Role::User);
    assert_eq!(turns[0].content, "Tell me about debt");
    assert_eq!(turns[1].role, Role::Assistant);
    assert_eq!(turns[1].content, "Hello world");
    assert!(turns.iter().all(|t| t.owner_id == "user-1"));

    let conv = h.store.get_conversation(&conv.id).await.unwrap().unwrap();
    assert_eq!(conv.title.as_deref(), Some("Money and Debt"));
}

#[tokio::test]
async fn test_mid_stream_failure_persists_nothing() {
    let h = harness(
        seeded_store(),
        FixedEmbedder::new(vec![1.0, 0.0]),
        ScriptedGenerator::new(vec![Step::Text("Hello"), Step::Fail("connection reset")]),
        None,
    );
    let conv = h.store.create_conversation("user-1").await.unwrap();

    let request = AnswerRequest::new(vec![ChatMessage::user("Tell me about debt")])
        .in_conversation(&conv.id, "user-1");
    let stream = h.answers.answer_stream(request).await.unwrap();
    let items = collect(stream).await;

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_deref().unwrap(), "Hello");
    assert!(matches!(items[1], Err(PipelineError::GenerationFailure(_))));

    h.answers.drain().await;
    assert!(h.store.list_turns(&conv.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_start_failure_returns_error_before_output() {
    let h = harness(
        seeded_store(),
        FixedEmbedder::new(vec![1.0, 0.0]),
        ScriptedGenerator::failing_to_start(),
        None,
    );
    let conv = h.store.create_conversation("user-1").await.unwrap();

    let request = AnswerRequest::new(vec![ChatMessage::user("Tell me about debt")])
        .in_conversation(&conv.id, "user-1")
        .first_message(true);
    let err = h.answers.answer_stream(request).await.err().unwrap();
    assert!(matches!(err, PipelineError::GenerationFailure(_)));
    assert_eq!(err.code(), "generation_failed");

    h.answers.drain().await;
    assert!(h.store.list_turns(&conv.id).await.unwrap().is_empty());
    assert_eq!(h.generator.title_request_count(), 0);
}

#[tokio::test]
async fn test_empty_completion_is_generation_failure() {
    let h = harness(
        seeded_store(),
        FixedEmbedder::new(vec![1.0, 0.0]),
        ScriptedGenerator::new(Vec::new()),
        None,
    );
    let err = h
        .answers
        .answer_stream(AnswerRequest::new(vec![ChatMessage::user("hi")]))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, PipelineError::GenerationFailure(_)));
}

#[tokio::test]
async fn test_title_only_for_first_message() {
    let h = harness(
        seeded_store(),
        FixedEmbedder::new(vec![1.0, 0.0]),
        ScriptedGenerator::hello_world(),
        None,
    );
    let conv = h.store.create_conversation("user-1").await.unwrap();

    // Not flagged as first: no title even though the conversation is empty.
    let request = AnswerRequest::new(vec![ChatMessage::user("first question")])
        .in_conversation(&conv.id, "user-1");
    h.answers.answer(request).await.unwrap();
    h.answers.drain().await;
    assert_eq!(h.generator.title_request_count(), 0);

    // Flagged as first, but turns already exist: still no title.
    let request = AnswerRequest::new(vec![
        ChatMessage::user("first question"),
        ChatMessage::assistant("Hello world"),
        ChatMessage::user("second question"),
    ])
    .in_conversation(&conv.id, "user-1")
    .first_message(true);
    h.answers.answer(request).await.unwrap();
    h.answers.drain().await;

    assert_eq!(h.generator.title_request_count(), 0);
    let conv = h.store.get_conversation(&conv.id).await.unwrap().unwrap();
    assert!(conv.title.is_none());
    assert_eq!(h.store.list_turns(&conv.id).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_title_uses_only_truncated_user_text() {
    let h = harness(
        seeded_store(),
        FixedEmbedder::new(vec![1.0, 0.0]),
        ScriptedGenerator::hello_world(),
        None,
    );
    let conv = h.store.create_conversation("user-1").await.unwrap();
    let long_question = "x".repeat(1000);

    let request = AnswerRequest::new(vec![ChatMessage::user(long_question)])
        .in_conversation(&conv.id, "user-1")
        .first_message(true);
    h.answers.answer(request).await.unwrap();
    h.answers.drain().await;

    let requests = h.generator.title_requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    let title_prompt = &requests[0];
    assert_eq!(title_prompt.len(), 2);
    assert_eq!(title_prompt[0].role, Role::System);
    assert_eq!(title_prompt[1].role, Role::User);
    assert_eq!(title_prompt[1].content.chars().count(), 400);
    assert!(!title_prompt.iter().any(|m| m.content.contains("Hello world")));
}

#[tokio::test]
async fn test_title_failure_does_not_block_persistence() {
    let h = harness(
        seeded_store(),
        FixedEmbedder::new(vec![1.0, 0.0]),
        ScriptedGenerator::hello_world().with_failing_title(),
        None,
    );
    let conv = h.store.create_conversation("user-1").await.unwrap();

    let request = AnswerRequest::new(vec![ChatMessage::user("Tell me about debt")])
        .in_conversation(&conv.id, "user-1")
        .first_message(true);
    h.answers.answer(request).await.unwrap();
    h.answers.drain().await;

    assert_eq!(h.generator.title_request_count(), 1);
    assert_eq!(h.store.list_turns(&conv.id).await.unwrap().len(), 2);
    let conv = h.store.get_conversation(&conv.id).await.unwrap().unwrap();
    assert!(conv.title.is_none());
}

#[tokio::test]
async fn test_boosted_keyword_hits_lead_context() {
    // Both PPL documents sit orthogonal to the query vector, below the
    // threshold; only the loose document is a vector hit.
    let h = harness(
        seeded_store(),
        FixedEmbedder::new(vec![1.0, 0.0]),
        ScriptedGenerator::hello_world(),
        Some(0.2),
    );

    let retrieval = h
        .answers
        .retriever()
        .query("What is the PPL?", None)
        .await
        .unwrap();
    let ids: Vec<&str> = retrieval.matches.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["ppl-1", "ppl-2", "loose"]);
    assert_eq!(retrieval.matches[0].origin, MatchOrigin::Keyword);
    assert_eq!(retrieval.matches[2].origin, MatchOrigin::Vector);
    assert_eq!(retrieval.confidence, ConfidenceTier::Medium);

    h.answers
        .answer(AnswerRequest::new(vec![ChatMessage::user("What is the PPL?")]))
        .await
        .unwrap();
    let prompt = h.generator.last_prompt();
    assert!(prompt[1].content.contains("MEDIUM"));
    let context = &prompt[2].content;
    assert!(context.contains("[[DOC 1 | CONFIDENCE:MEDIUM | SCORE:n/a | TITLE:Ledger overview]]"));
    assert!(context.contains("[[DOC 2 | CONFIDENCE:MEDIUM | SCORE:n/a | TITLE:unknown]]"));
    assert!(context.contains("[[DOC 3 | CONFIDENCE:LOW | SCORE:0.45 | TITLE:unknown]]"));
}

#[tokio::test]
async fn test_prompt_order_and_history() {
    let h = harness(
        seeded_store(),
        FixedEmbedder::new(vec![1.0, 0.0]),
        ScriptedGenerator::hello_world(),
        None,
    );
    let history = vec![
        ChatMessage::system("client-supplied system text"),
        ChatMessage::user("first"),
        ChatMessage::assistant("reply"),
        ChatMessage::user("second"),
    ];
    h.answers.answer(AnswerRequest::new(history)).await.unwrap();

    let prompt = h.generator.last_prompt();
    assert_eq!(prompt.len(), 6);
    assert_eq!(prompt[0].content, "You are a careful assistant.");
    assert!(prompt[..3].iter().all(|m| m.role == Role::System));
    assert_eq!(prompt[3].content, "first");
    assert_eq!(prompt[4].content, "reply");
    assert_eq!(prompt[5].content, "second");
    assert!(!prompt.iter().any(|m| m.content == "client-supplied system text"));
}

#[tokio::test]
async fn test_empty_query_is_invalid_input() {
    let h = harness(
        seeded_store(),
        FixedEmbedder::new(vec![1.0, 0.0]),
        ScriptedGenerator::hello_world(),
        None,
    );

    let err = h.answers.retriever().query("   ", None).await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidInput(_)));

    let err = h
        .answers
        .answer_stream(AnswerRequest::new(vec![ChatMessage::assistant("no user turn")]))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, PipelineError::InvalidInput(_)));
    assert_eq!(h.generator.prompts.lock().unwrap().len(), 0);
}

#[tokio::test]
async fn test_blank_question_answers_without_context() {
    let h = harness(
        seeded_store(),
        FixedEmbedder::new(vec![1.0, 0.0]),
        ScriptedGenerator::hello_world(),
        None,
    );

    let stream = h
        .answers
        .answer_stream(AnswerRequest::new(vec![ChatMessage::user("  \n ")]))
        .await
        .unwrap();
    assert_eq!(stream.confidence(), ConfidenceTier::None);
    let text: String = collect(stream)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(text, "Hello world");

    let prompt = h.generator.last_prompt();
    assert!(prompt
        .iter()
        .any(|m| m.content.contains("No explicit context was confidently retrieved")));
}

#[tokio::test]
async fn test_dropping_stream_cancels_and_persists_nothing() {
    let h = harness(
        seeded_store(),
        FixedEmbedder::new(vec![1.0, 0.0]),
        ScriptedGenerator::new(vec![Step::Text("Hello"), Step::Hang]),
        None,
    );
    let conv = h.store.create_conversation("user-1").await.unwrap();

    let request = AnswerRequest::new(vec![ChatMessage::user("Tell me about debt")])
        .in_conversation(&conv.id, "user-1")
        .first_message(true);
    let mut stream = h.answers.answer_stream(request).await.unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap(), "Hello");
    drop(stream);

    tokio::time::timeout(Duration::from_secs(2), h.answers.drain())
        .await
        .expect("forwarder should stop after the stream is dropped");

    assert!(h.generator.upstream_dropped.load(Ordering::SeqCst));
    assert!(h.store.list_turns(&conv.id).await.unwrap().is_empty());
    assert_eq!(h.generator.title_request_count(), 0);
}

#[tokio::test]
async fn test_cancel_token_stops_generation() {
    let h = harness(
        seeded_store(),
        FixedEmbedder::new(vec![1.0, 0.0]),
        ScriptedGenerator::new(vec![Step::Text("Hello"), Step::Hang]),
        None,
    );
    let mut stream = h
        .answers
        .answer_stream(AnswerRequest::new(vec![ChatMessage::user("hi")]))
        .await
        .unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap(), "Hello");

    stream.cancel_token().cancel();
    let rest = tokio::time::timeout(Duration::from_secs(2), collect(stream))
        .await
        .expect("stream should end after cancellation");
    assert!(rest.is_empty());
    assert!(h.generator.upstream_dropped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_degraded_embedding_still_answers() {
    let h = harness(
        seeded_store(),
        FixedEmbedder::failing(),
        ScriptedGenerator::hello_world(),
        None,
    );

    let retrieval = h
        .answers
        .retriever()
        .query("What is money?", None)
        .await
        .unwrap();
    assert!(retrieval.matches.is_empty());
    assert_eq!(retrieval.confidence, ConfidenceTier::None);

    // Keyword boosting keeps working without embeddings.
    let retrieval = h.answers.retriever().query("ppl", None).await.unwrap();
    assert_eq!(retrieval.matches.len(), 2);
    assert_eq!(retrieval.confidence, ConfidenceTier::Medium);

    let reply = h
        .answers
        .answer(AnswerRequest::new(vec![ChatMessage::user("What is money?")]))
        .await
        .unwrap();
    assert_eq!(reply.content, "Hello world");
    assert!(h.generator.last_prompt()[2]
        .content
        .contains("No explicit context was confidently retrieved"));
}

#[tokio::test]
async fn test_unpersisted_request_writes_nothing() {
    let store = Arc::new(InMemoryStore::new());
    let h = harness(
        store,
        FixedEmbedder::new(vec![1.0, 0.0]),
        ScriptedGenerator::hello_world(),
        None,
    );
    let reply = h
        .answers
        .answer(AnswerRequest::new(vec![ChatMessage::user("hi")]).first_message(true))
        .await
        .unwrap();
    assert_eq!(reply.content, "Hello world");
    h.answers.drain().await;
    assert_eq!(h.generator.title_request_count(), 0);
}
