//! # Meridian
//!
//! A retrieval-augmented conversational platform: a filesystem catalog of
//! ingested content, a SQLite-backed hybrid search index over its chunks,
//! scheduled ingestion from web/git/ticket sources, fixed pipelines and
//! tool-using agents that answer questions against the index, and a
//! chat/trace store recording every turn for replay and feedback.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`catalog`] | Content-addressed filesystem catalog (resource bytes + YAML indexes) |
//! | [`index`] | SQLite-backed chunk/vector index and hybrid search store |
//! | [`loader`] | Extension-based text extraction for ingested content |
//! | [`embedding_provider`] | Embedding backends: OpenAI, Ollama, a dependency-free local fallback |
//! | [`collectors`] | Per-source ingestion collectors: web, git, tickets, uploads |
//! | [`ingest`] | Orchestrates one collector run through the catalog and index |
//! | [`schedule`] | Cron-driven scheduler running collectors on their configured cadence |
//! | [`llm`] | Chat-completion provider interface |
//! | [`agent`] | React-style tool-use loop |
//! | [`tools`] | Tools exposed to the agentic pipeline |
//! | [`safety`] | Pre-response safety checks |
//! | [`pipeline`] | Fixed Q&A/grading/image pipelines, including paired A/B execution |
//! | [`chat_store`] | Conversation, trace, feedback, and A/B comparison persistence |
//! | [`server`] | Axum HTTP/SSE server exposing the chat and admin surface |
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Idempotent schema migrations for the chunk index and chat store |
//! | [`error`] | `AppError`, the HTTP-facing error type |

pub mod agent;
pub mod catalog;
pub mod chat_store;
pub mod collectors;
pub mod config;
pub mod db;
pub mod embedding_provider;
pub mod error;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod loader;
pub mod migrate;
pub mod pipeline;
pub mod safety;
pub mod schedule;
pub mod server;
pub mod tools;
