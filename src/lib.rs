//! # Lexbase
//!
//! A self-learning legal knowledge-base core: deduplication, chunking,
//! embedding, and an atomically-merged vector index, plus the feedback loop
//! that turns poorly-served queries into a ranked backlog of coverage gaps.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────┐   ┌─────────┐   ┌────────────┐
//! │ Crawler  │──▶│ Dedup │──▶│ Chunker │──▶│ Embedding  │
//! │  feed    │   └───────┘   └─────────┘   │  gateway   │
//! └──────────┘                             └─────┬──────┘
//!                                                ▼
//!                                         ┌────────────┐
//!                   search ◀──────────────│ Index store │
//!                     │                   │  (merge)    │
//!                     ▼                   └────────────┘
//!               ┌────────────┐   ┌──────────────┐
//!               │  Feedback  │──▶│ Gap detector │──▶ targeted re-crawl
//!               │   logger   │   │   (batch)    │
//!               └────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! lexbase init                          # create database
//! lexbase ingest crawl-feed.jsonl       # dedup, chunk, embed, merge
//! lexbase search "vat advance deadline" # search + log the query
//! lexbase feedback 42 thumbs_down       # record user feedback
//! lexbase gaps detect                   # cluster low-quality queries
//! lexbase stats                         # health overview
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`dedup`] | Content fingerprinting and duplicate classification |
//! | [`chunk`] | Section- and paragraph-aware chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Persisted vector index with atomic merge and backups |
//! | [`quality`] | Source quality scoring and crawl prioritization |
//! | [`feedback`] | Query and feedback logging |
//! | [`gaps`] | Coverage gap detection |
//! | [`ingest`] | Ingestion pipeline |
//! | [`search`] | Serving path |
//! | [`stats`] | Health overview |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod db;
pub mod dedup;
pub mod embedding;
pub mod feedback;
pub mod gaps;
pub mod index;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod quality;
pub mod search;
pub mod stats;
