//! # Deep Research
//!
//! A multi-wave research orchestration engine. Given a topic it plans search
//! queries, runs them against a web search/answer provider, deduplicates the
//! hits into a numbered source index, summarizes each new source, decides
//! whether another wave of searching is warranted, drafts a cited report,
//! and scores how well each section is supported by its sources.
//!
//! ## Architecture
//!
//! ```text
//!              ┌──────────────┐
//!              │ Orchestrator │── plan / summarize / decide / draft ──▶ ResearchModel
//!              └──────┬───────┘
//!                     │ per query
//!          ┌──────────▼──────────┐        miss        ┌────────────────┐
//!          │ Cache (L1 + SQLite) │──────────────────▶ │ Retry ─▶ Search │
//!          └─────────────────────┘ ◀── fill on hit ── └────────────────┘
//!                     │
//!              ┌──────▼───────┐     ┌──────────┐     ┌──────────┐
//!              │ Source Index │────▶│ Verifier │────▶│  Report  │
//!              └──────────────┘     └──────────┘     └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! research init                                   # create the cache database
//! research plan --topic "AI in Healthcare"        # review generated queries
//! research run --topic "AI in Healthcare" --max-waves 2 --output report.md
//! research cache stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | Cache schema |
//! | [`cache`] | Two-level search cache with TTL, LRU and time-sensitive bypass |
//! | [`retry`] | Transient and rate-limit backoff |
//! | [`error`] | Run errors and terminal failure classification |
//! | [`search_http`] | HTTP search provider |
//! | [`llm`] | OpenAI-compatible research model |
//! | [`orchestrator`] | The wave loop, synthesis and citation cleanup |
//! | [`verifier`] | Per-section review and confidence blending |
//! | [`progress`] | Progress events and reporters |
//! | [`report`] | Markdown and JSON output |
//!
//! The pure data model, URL canonicalization, source index and scoring live
//! in the `deep_research_core` crate.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod migrate;
pub mod orchestrator;
pub mod progress;
pub mod report;
pub mod retry;
pub mod search_http;
pub mod verifier;
