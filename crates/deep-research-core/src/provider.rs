//! Capability traits for the external collaborators of a research run.
//!
//! The orchestrator receives implementations of these traits through its
//! constructor. The application crate provides HTTP-backed versions; tests
//! substitute in-memory fakes.
//!
//! Errors are returned as `anyhow::Error`. Implementations that talk to a
//! network service should wrap an [`UpstreamError`](crate::error::UpstreamError)
//! so the retry controller can classify the failure.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    FindingsDigest, FollowUpDecision, ReportDraft, SearchOutcome, SearchResult, Section,
    SectionAssessment, SourceItem,
};

/// Turns a natural-language query into a short summary and a list of hits.
///
/// # Example
///
/// ```rust
/// use anyhow::Result;
/// use async_trait::async_trait;
/// use deep_research_core::models::{RawHit, SearchOutcome};
/// use deep_research_core::provider::SearchProvider;
///
/// struct StaticSearch;
///
/// #[async_trait]
/// impl SearchProvider for StaticSearch {
///     fn name(&self) -> &str { "static" }
///
///     async fn search(&self, query: &str) -> Result<SearchOutcome> {
///         let hit = RawHit::validated(Some(query), "https://example.org/a", None, None);
///         Ok(SearchOutcome::new(None, hit.into_iter().collect()))
///     }
/// }
/// ```
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Short identifier used in logs and progress output.
    fn name(&self) -> &str;

    /// Run one search. Zero hits is `Ok` with
    /// [`SearchStatus::NoResults`](crate::models::SearchStatus::NoResults).
    async fn search(&self, query: &str) -> Result<SearchOutcome>;
}

/// The language-model capability used for planning, summarizing, deciding,
/// drafting, and reviewing.
#[async_trait]
pub trait ResearchModel: Send + Sync {
    fn name(&self) -> &str;

    /// Propose up to `count` search queries for `topic`.
    async fn generate_queries(&self, topic: &str, count: usize) -> Result<Vec<String>>;

    /// Summarize one source in the context of `topic`.
    async fn summarize_source(&self, topic: &str, source: &SourceItem) -> Result<String>;

    /// Decide whether another wave of searching is warranted.
    async fn decide_follow_up(&self, digest: &FindingsDigest) -> Result<FollowUpDecision>;

    /// Draft a report whose sections cite sources with `[id]` markers.
    async fn draft_report(
        &self,
        topic: &str,
        summaries: &[SearchResult],
        sources: &[SourceItem],
    ) -> Result<ReportDraft>;

    /// Judge how well `section` is supported by the sources it cites.
    async fn review_section(
        &self,
        topic: &str,
        section: &Section,
        cited: &[SourceItem],
    ) -> Result<SectionAssessment>;
}
