//! # Candor Core
//!
//! Pure logic of the Candor answer pipeline: data models, query
//! normalization, keyword boosting, match merging, confidence
//! classification, context and prompt assembly, and the storage and
//! embedding traits the app crate implements.
//!
//! This crate contains no tokio runtime, sqlx, HTTP client, or filesystem
//! I/O. Everything here is deterministic and unit-tested in place.
//!
//! # Pipeline
//!
//! ```text
//! query ─▶ normalize ─▶ ┬─ embed ─▶ Corpus::vector_match ─┐
//!                       └─ boost? ─▶ Corpus::keyword_search ┴─▶ merge ─▶ classify
//!                                                                   │
//!                            compose_prompt ◀── render_context ◀────┘
//! ```

pub mod boost;
pub mod confidence;
pub mod context;
pub mod embedding;
pub mod error;
pub mod merge;
pub mod models;
pub mod prompt;
pub mod query;
pub mod store;
