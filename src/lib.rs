//! # Candor
//!
//! A retrieval-augmented answer service that is honest about how much it
//! knows.
//!
//! Each question is answered from reference documents gathered by two
//! independent strategies, ranked, and tagged with a confidence tier that
//! is carried into the prompt, so the model can say "I don't know" when the
//! knowledge base has nothing relevant.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────┐
//!   question ──▶  │  Retriever   │──▶ vector match ─┐
//!                 │              │──▶ keyword boost ┴─▶ merge ─▶ confidence
//!                 └──────────────┘                                   │
//!                                                                     ▼
//!   ┌──────────┐   increments   ┌──────────────┐   prompt   ┌──────────────┐
//!   │  caller  │ ◀───────────── │  Forwarder   │ ◀───────── │  Generator   │
//!   └──────────┘                └──────┬───────┘            └──────────────┘
//!                                      │ after the stream ends
//!                                      ▼
//!                               ┌──────────────┐
//!                               │ TurnPersister│──▶ SQLite
//!                               └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! candor init
//! candor retrieve "what is the PPL?"
//! candor ask "who creates money?"
//! candor serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite corpus and conversation store |
//! | [`rpc_corpus`] | Remote PostgREST corpus |
//! | [`embedding`] | Embedding providers |
//! | [`generation`] | Generation providers and SSE decoding |
//! | [`retrieval`] | Concurrent retrieval with graceful degradation |
//! | [`persist`] | Titles and turn persistence |
//! | [`pipeline`] | Answer orchestration and service wiring |
//! | [`server`] | HTTP API |
//!
//! Pure pipeline logic (merging, confidence, context and prompt assembly)
//! lives in the `candor-core` crate.

pub mod config;
pub mod db;
pub mod embedding;
pub mod generation;
pub mod logging;
pub mod migrate;
pub mod persist;
pub mod pipeline;
pub mod retrieval;
pub mod rpc_corpus;
pub mod server;
pub mod sqlite_store;
