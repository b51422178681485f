//! Core data models used throughout Deep Research.
//!
//! These types represent the raw hits, indexed sources, summaries, report
//! sections, and verification results that flow through a research run.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A single hit returned by the search provider, validated at the provider
/// boundary before it can enter the [`SourceIndex`](crate::index::SourceIndex).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
}

impl RawHit {
    /// Build a hit from untrusted provider fields.
    ///
    /// Returns `None` when the URL is not an absolute `http`/`https` URL.
    /// An empty title falls back to the URL; whitespace is trimmed and an
    /// empty `published` value is dropped.
    pub fn validated(
        title: Option<&str>,
        url: &str,
        snippet: Option<&str>,
        published: Option<&str>,
    ) -> Option<RawHit> {
        let url = url.trim();
        let parsed = url::Url::parse(url).ok()?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return None;
        }

        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(url)
            .to_string();
        let snippet = snippet.map(str::trim).unwrap_or_default().to_string();
        let published = published
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);

        Some(RawHit {
            title,
            url: url.to_string(),
            snippet,
            published,
        })
    }
}

/// Whether a search produced hits. Zero hits is an expected outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    Ok,
    NoResults,
}

/// Result of one call to the search provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub summary: Option<String>,
    pub hits: Vec<RawHit>,
    pub status: SearchStatus,
}

impl SearchOutcome {
    pub fn new(summary: Option<String>, hits: Vec<RawHit>) -> Self {
        let status = if hits.is_empty() {
            SearchStatus::NoResults
        } else {
            SearchStatus::Ok
        };
        Self {
            summary,
            hits,
            status,
        }
    }

    pub fn empty() -> Self {
        Self::new(None, Vec::new())
    }
}

/// A deduplicated source owned by the source index.
///
/// `id` is assigned once and never reused within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceItem {
    pub id: u32,
    pub title: String,
    /// Original URL as returned by the provider (not canonicalized).
    pub url: String,
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

/// Per-source summary produced during the wave that discovered the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: u32,
    pub title: String,
    pub url: String,
    pub summary: String,
}

/// A report section with inline `[n]` citations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    pub text: String,
    /// Ascending, duplicate-free list of cited source IDs.
    pub citations: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// The synthesized research report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchReport {
    pub topic: String,
    pub outline: Vec<String>,
    pub sections: Vec<Section>,
    pub sources: Vec<SourceItem>,
    pub notes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_confidence: Option<f64>,
}

impl ResearchReport {
    /// Every source ID cited by at least one section, ascending.
    pub fn cited_ids(&self) -> BTreeSet<u32> {
        self.sections
            .iter()
            .flat_map(|s| s.citations.iter().copied())
            .collect()
    }

    pub fn source(&self, id: u32) -> Option<&SourceItem> {
        self.sources.iter().find(|s| s.id == id)
    }

    /// Sources cited by `section`, in citation order. Unknown IDs are skipped.
    pub fn cited_sources(&self, section: &Section) -> Vec<&SourceItem> {
        section
            .citations
            .iter()
            .filter_map(|id| self.source(*id))
            .collect()
    }

    /// Whether the verifier has already stamped confidences on this report.
    pub fn is_verified(&self) -> bool {
        self.overall_confidence.is_some()
    }
}

/// A section as drafted by the language model, before citation cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionDraft {
    pub title: String,
    pub text: String,
}

/// A report as drafted by the language model.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReportDraft {
    #[serde(default)]
    pub outline: Vec<String>,
    #[serde(default)]
    pub sections: Vec<SectionDraft>,
    #[serde(default)]
    pub notes: Vec<String>,
}

/// Input to the follow-up decision: what has been found so far and what
/// categories of evidence might still be missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FindingsDigest {
    pub topic: String,
    /// Number of waves completed so far.
    pub wave: u32,
    pub summaries: Vec<SearchResult>,
    pub checklist: Vec<String>,
    pub queries_run: Vec<String>,
}

impl FindingsDigest {
    /// Plain-text rendering suitable for embedding in a prompt.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Topic: {}\n", self.topic));
        out.push_str(&format!("Waves completed: {}\n\n", self.wave));

        out.push_str("Queries already run:\n");
        for q in &self.queries_run {
            out.push_str(&format!("- {}\n", q));
        }

        out.push_str("\nFindings so far:\n");
        if self.summaries.is_empty() {
            out.push_str("(none)\n");
        }
        for s in &self.summaries {
            out.push_str(&format!("[{}] {}: {}\n", s.id, s.title, s.summary));
        }

        out.push_str("\nCheck whether any of these are still missing:\n");
        for item in &self.checklist {
            out.push_str(&format!("- {}\n", item));
        }
        out
    }
}

/// Answer of the follow-up decision function.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FollowUpDecision {
    pub needs_more: bool,
    #[serde(default)]
    pub queries: Vec<String>,
    #[serde(default)]
    pub rationale: Option<String>,
}

impl FollowUpDecision {
    pub fn stop() -> Self {
        Self::default()
    }
}

/// LLM-derived judgement of one section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionAssessment {
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub issues: Vec<String>,
}

/// Sub-scores and blended confidence for one section. All values in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SectionMetrics {
    pub llm_conf: f64,
    pub coverage: f64,
    pub quality: f64,
    pub recency: f64,
    /// Derived by the scorer, never set by the language model.
    #[serde(rename = "final")]
    pub final_confidence: f64,
}

/// Verification result for one section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionReview {
    pub section_title: String,
    pub confidence: f64,
    pub reasoning: String,
    pub issues: Vec<String>,
    pub cited_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<SectionMetrics>,
}

/// Output of the verifier for a whole report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationOutput {
    pub sections: Vec<SectionReview>,
    pub overall_confidence: f64,
}
