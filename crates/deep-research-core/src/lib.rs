//! # Deep Research Core
//!
//! Shared, I/O-free logic for Deep Research: data models, URL
//! canonicalization, the deduplicating source index, citation handling,
//! cache-key normalization, and the deterministic confidence scorer.
//!
//! This crate contains no tokio, sqlx, reqwest, or filesystem I/O. The
//! external capabilities (web search, language model) are expressed as the
//! [`provider::SearchProvider`] and [`provider::ResearchModel`] traits and
//! implemented by the application crate or by test fakes.

pub mod canonical;
pub mod citations;
pub mod error;
pub mod index;
pub mod models;
pub mod parse;
pub mod provider;
pub mod query;
pub mod scoring;
