//! The multi-wave research loop.
//!
//! ```text
//! Planning ─▶ Wave(n): search ─▶ merge ─▶ summarize ─▶ follow-up decision
//!                 ▲                                          │
//!                 └──────────── new queries ◀────────────────┘
//!                                                            │ done / cap
//!                                                            ▼
//!                                            Synthesis ─▶ Verification
//! ```
//!
//! # Planning
//!
//! Approved queries are used as given (trimmed, deduplicated, capped).
//! Otherwise the model proposes them; if that fails or returns nothing the
//! topic itself becomes the only query. No search happens during planning.
//!
//! # Waves
//!
//! Each query is looked up in the cache first. On a miss the search
//! provider is called through the retry controller while holding a permit
//! from the search semaphore, and a successful non-empty answer is cached.
//! Hits are merged into the [`SourceIndex`] in query order, so source IDs
//! do not depend on which search finished first. Sources above the
//! pre-merge high-water mark are new and get summarized under the
//! summarization semaphore; a failed summary falls back to the snippet.
//!
//! A failed search or summary only affects that item. The loop ends when
//! the follow-up decision says no (or fails), when every proposed query has
//! already been run, when the wave cap is reached, or when the index is
//! full.
//!
//! # Synthesis and verification
//!
//! The drafted report has every citation checked against the index:
//! unknown numbers are removed from the text and from the citation list.
//! Drafting and verification failures end the run with an error.
//!
//! # Cancellation
//!
//! Before each wave and before synthesis the reporter is asked whether the
//! consumer is still listening. If not, the run returns
//! [`ResearchError::Cancelled`]; searches already in flight finish first.

use anyhow::{Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use uuid::Uuid;

use deep_research_core::citations::clean_citations;
use deep_research_core::index::SourceIndex;
use deep_research_core::models::{
    FindingsDigest, FollowUpDecision, RawHit, ReportDraft, ResearchReport, SearchOutcome,
    SearchResult, Section, SourceItem, VerificationOutput,
};
use deep_research_core::provider::{ResearchModel, SearchProvider};
use deep_research_core::query::{dedupe_queries, normalize_query};

use crate::cache::{CacheManager, Clock, SystemClock};
use crate::config::ResearchConfig;
use crate::error::ResearchError;
use crate::progress::{ChannelProgress, ResearchEvent, ResearchProgressReporter};
use crate::retry::{with_retry, RetryPolicy};
use crate::verifier::Verifier;

/// What to research. `None` fields fall back to `[research]` config.
#[derive(Debug, Clone, Default)]
pub struct ResearchRequest {
    pub topic: String,
    /// Pre-approved wave-1 queries. Skips query generation when non-empty.
    pub approved_queries: Option<Vec<String>>,
    pub query_count: Option<usize>,
    pub max_sources: Option<usize>,
    pub max_waves: Option<u32>,
}

impl ResearchRequest {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResearchOutcome {
    pub run_id: Uuid,
    pub report: ResearchReport,
    pub verification: VerificationOutput,
    /// Per-source summaries, ascending by source ID.
    pub results: Vec<SearchResult>,
    pub waves_run: u32,
    pub queries_run: Vec<String>,
}

/// A run started with [`Orchestrator::start`]: the progress stream plus the
/// task producing the outcome. Dropping `events` cancels the run after the
/// current wave.
pub struct ResearchRun {
    pub events: mpsc::UnboundedReceiver<ResearchEvent>,
    pub handle: JoinHandle<Result<ResearchOutcome>>,
}

pub struct Orchestrator {
    search: Arc<dyn SearchProvider>,
    model: Arc<dyn ResearchModel>,
    cache: Option<Arc<CacheManager>>,
    retry: RetryPolicy,
    settings: ResearchConfig,
    clock: Arc<dyn Clock>,
    search_permits: Semaphore,
    summarize_permits: Semaphore,
}

struct WaveSearch {
    hits: Vec<RawHit>,
    succeeded: usize,
}

struct RunState {
    index: SourceIndex,
    results: Vec<SearchResult>,
    queries_run: Vec<String>,
    already_run: HashSet<String>,
    waves_run: u32,
}

impl Orchestrator {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        model: Arc<dyn ResearchModel>,
        settings: ResearchConfig,
    ) -> Self {
        let search_permits = Semaphore::new(settings.search_concurrency.max(1));
        let summarize_permits = Semaphore::new(settings.summarize_concurrency.max(1));
        Self {
            search,
            model,
            cache: None,
            retry: RetryPolicy::default(),
            settings,
            clock: Arc::new(SystemClock),
            search_permits,
            summarize_permits,
        }
    }

    pub fn with_cache(mut self, cache: Arc<CacheManager>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Clock used for the verifier's recency reference date.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Spawn a run on the tokio runtime and return its progress stream.
    pub fn start(self: Arc<Self>, request: ResearchRequest) -> ResearchRun {
        let (reporter, events) = ChannelProgress::new();
        let handle = tokio::spawn(async move { self.run(request, &reporter).await });
        ResearchRun { events, handle }
    }

    /// The wave-1 query list and whether it was model-generated.
    pub async fn plan(
        &self,
        topic: &str,
        approved: Option<&[String]>,
        count: usize,
    ) -> (Vec<String>, bool) {
        plan_queries(self.model.as_ref(), &self.retry, topic, approved, count).await
    }

    pub async fn run(
        &self,
        request: ResearchRequest,
        reporter: &dyn ResearchProgressReporter,
    ) -> Result<ResearchOutcome> {
        let topic = request.topic.trim().to_string();
        if topic.is_empty() {
            anyhow::bail!("research topic must not be empty");
        }
        let query_count = request
            .query_count
            .unwrap_or(self.settings.queries_per_wave)
            .max(1);
        let capacity = self.settings.source_capacity(request.max_sources);
        let max_waves = request.max_waves.unwrap_or(self.settings.max_waves).max(1);
        let run_id = Uuid::new_v4();

        tracing::info!(%run_id, topic = %topic, capacity, max_waves, "research run started");

        let (mut pending, generated) = self
            .plan(&topic, request.approved_queries.as_deref(), query_count)
            .await;
        reporter.report(ResearchEvent::Planned {
            queries: pending.clone(),
            generated,
        });

        let mut state = RunState {
            index: SourceIndex::new(),
            results: Vec::new(),
            queries_run: Vec::new(),
            already_run: HashSet::new(),
            waves_run: 0,
        };

        loop {
            if reporter.is_cancelled() {
                tracing::info!(%run_id, waves = state.waves_run, "research run cancelled");
                return Err(ResearchError::Cancelled.into());
            }

            let wave = state.waves_run + 1;
            state.waves_run = wave;
            self.run_wave(wave, &topic, &pending, capacity, &mut state, reporter)
                .await?;

            if wave >= max_waves {
                tracing::info!(wave, "wave cap reached");
                break;
            }
            if state.index.len() >= capacity {
                tracing::info!(wave, capacity, "source capacity reached");
                break;
            }

            let decision = self.decide_follow_up(&topic, wave, &state).await;
            let next = if decision.needs_more {
                dedupe_queries(decision.queries.clone(), &state.already_run, query_count)
            } else {
                Vec::new()
            };
            reporter.report(ResearchEvent::FollowUpDecided {
                wave,
                needs_more: decision.needs_more,
                queries: next.clone(),
            });
            if next.is_empty() {
                break;
            }
            pending = next;
        }

        if reporter.is_cancelled() {
            return Err(ResearchError::Cancelled.into());
        }

        reporter.report(ResearchEvent::Synthesizing {
            sources: state.index.len(),
            summaries: state.results.len(),
        });
        let mut report = self.synthesize(&topic, &state).await?;

        let today = self.clock.now().date_naive();
        let verification = Verifier::new(self.model.clone(), self.retry.clone())
            .with_concurrency(self.settings.summarize_concurrency)
            .verify(&mut report, today)
            .await
            .context(ResearchError::Verification(format!(
                "{} sections",
                report.sections.len()
            )))?;

        reporter.report(ResearchEvent::Verified {
            sections: verification.sections.len(),
            overall_confidence: verification.overall_confidence,
        });
        tracing::info!(
            %run_id,
            waves = state.waves_run,
            sources = state.index.len(),
            "research run finished"
        );

        Ok(ResearchOutcome {
            run_id,
            report,
            verification,
            results: state.results,
            waves_run: state.waves_run,
            queries_run: state.queries_run,
        })
    }

    async fn run_wave(
        &self,
        wave: u32,
        topic: &str,
        queries: &[String],
        capacity: usize,
        state: &mut RunState,
        reporter: &dyn ResearchProgressReporter,
    ) -> Result<()> {
        reporter.report(ResearchEvent::WaveStarted {
            wave,
            queries: queries.len(),
        });
        for q in queries {
            state.already_run.insert(normalize_query(q, usize::MAX));
            state.queries_run.push(q.clone());
        }

        let searched = self.search_wave(wave, queries, reporter).await;

        let mark = state.index.high_water_mark();
        let merged = state.index.merge(searched.hits, capacity);
        reporter.report(ResearchEvent::SourcesMerged {
            wave,
            added: merged.added.len(),
            duplicates: merged.duplicates,
            total: state.index.len(),
        });

        let new_items = state.index.items_after(mark).to_vec();
        let summaries = self.summarize_wave(wave, topic, &new_items, reporter).await?;
        state.results.extend(summaries);

        tracing::info!(
            wave,
            queries = queries.len(),
            searched_ok = searched.succeeded,
            added = merged.added.len(),
            duplicates = merged.duplicates,
            skipped_at_capacity = merged.skipped_at_capacity,
            total_sources = state.index.len(),
            "wave complete"
        );
        Ok(())
    }

    /// Search one query: cache first, then the provider under a permit.
    async fn search_one(&self, query: &str) -> Result<(SearchOutcome, bool)> {
        if let Some(cache) = &self.cache {
            match cache.get(query).await {
                Ok(Some(cached)) => {
                    return Ok((SearchOutcome::new(cached.summary, cached.results), true));
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(query, error = %e, "cache lookup failed"),
            }
        }

        let outcome = {
            let _permit = self.search_permits.acquire().await?;
            with_retry(&self.retry, "search", || self.search.search(query)).await?
        };

        if let Some(cache) = &self.cache {
            if !outcome.hits.is_empty() {
                if let Err(e) = cache
                    .set(query, &outcome.hits, outcome.summary.as_deref())
                    .await
                {
                    tracing::warn!(query, error = %e, "cache write failed");
                }
            }
        }
        Ok((outcome, false))
    }

    async fn search_wave(
        &self,
        wave: u32,
        queries: &[String],
        reporter: &dyn ResearchProgressReporter,
    ) -> WaveSearch {
        let mut in_flight: FuturesUnordered<_> = queries
            .iter()
            .enumerate()
            .map(|(i, q)| async move { (i, q, self.search_one(q).await) })
            .collect();

        let mut by_query: Vec<Vec<RawHit>> = vec![Vec::new(); queries.len()];
        let mut succeeded = 0;
        while let Some((i, query, result)) = in_flight.next().await {
            match result {
                Ok((outcome, cache_hit)) => {
                    succeeded += 1;
                    reporter.report(ResearchEvent::QuerySearched {
                        wave,
                        query: query.clone(),
                        hits: outcome.hits.len(),
                        cache_hit,
                    });
                    by_query[i] = outcome.hits;
                }
                Err(e) => {
                    tracing::warn!(wave, query = %query, error = %e, "search failed, skipping query");
                    reporter.report(ResearchEvent::QueryFailed {
                        wave,
                        query: query.clone(),
                        error: format!("{:#}", e),
                    });
                }
            }
        }

        WaveSearch {
            hits: by_query.into_iter().flatten().collect(),
            succeeded,
        }
    }

    async fn summarize_one(&self, topic: &str, item: &SourceItem) -> (String, bool) {
        let summary = async {
            let _permit = self.summarize_permits.acquire().await?;
            with_retry(&self.retry, "summarize", || {
                self.model.summarize_source(topic, item)
            })
            .await
        }
        .await;

        match summary {
            Ok(s) if !s.trim().is_empty() => (s.trim().to_string(), false),
            Ok(_) => (fallback_summary(item), true),
            Err(e) => {
                tracing::warn!(id = item.id, url = %item.url, error = %e, "summary failed, using snippet");
                (fallback_summary(item), true)
            }
        }
    }

    async fn summarize_wave(
        &self,
        wave: u32,
        topic: &str,
        items: &[SourceItem],
        reporter: &dyn ResearchProgressReporter,
    ) -> Result<Vec<SearchResult>> {
        let mut in_flight: FuturesUnordered<_> = items
            .iter()
            .map(|item| async move { (item, self.summarize_one(topic, item).await) })
            .collect();

        let mut results = Vec::with_capacity(items.len());
        while let Some((item, (summary, fallback))) = in_flight.next().await {
            reporter.report(ResearchEvent::SourceSummarized {
                wave,
                id: item.id,
                fallback,
            });
            results.push(SearchResult {
                id: item.id,
                title: item.title.clone(),
                url: item.url.clone(),
                summary,
            });
        }
        results.sort_by_key(|r| r.id);
        Ok(results)
    }

    async fn decide_follow_up(&self, topic: &str, wave: u32, state: &RunState) -> FollowUpDecision {
        let digest = FindingsDigest {
            topic: topic.to_string(),
            wave,
            summaries: state
                .results
                .iter()
                .take(self.settings.digest_top_n)
                .cloned()
                .collect(),
            checklist: self.settings.follow_up_checklist.clone(),
            queries_run: state.queries_run.clone(),
        };

        match with_retry(&self.retry, "decide_follow_up", || {
            self.model.decide_follow_up(&digest)
        })
        .await
        {
            Ok(decision) => {
                if let Some(rationale) = &decision.rationale {
                    tracing::debug!(wave, needs_more = decision.needs_more, rationale = %rationale, "follow-up decided");
                }
                decision
            }
            Err(e) => {
                tracing::warn!(wave, error = %e, "follow-up decision failed, stopping");
                FollowUpDecision::stop()
            }
        }
    }

    async fn synthesize(&self, topic: &str, state: &RunState) -> Result<ResearchReport> {
        let draft = with_retry(&self.retry, "draft_report", || {
            self.model
                .draft_report(topic, &state.results, state.index.items())
        })
        .await
        .context(ResearchError::Synthesis(format!(
            "drafting from {} sources",
            state.index.len()
        )))?;

        if draft.sections.is_empty() {
            tracing::warn!(topic, "draft report has no sections");
        }
        Ok(build_report(topic, draft, &state.index))
    }
}

/// Choose the wave-1 queries: approved ones if any survive deduplication,
/// else model-generated ones, else the topic itself. Returns whether the
/// list came from the model.
pub async fn plan_queries(
    model: &dyn ResearchModel,
    retry: &RetryPolicy,
    topic: &str,
    approved: Option<&[String]>,
    count: usize,
) -> (Vec<String>, bool) {
    let none_run = HashSet::new();

    if let Some(approved) = approved {
        let queries = dedupe_queries(approved.iter().cloned(), &none_run, count);
        if !queries.is_empty() {
            return (queries, false);
        }
    }

    let generated = with_retry(retry, "generate_queries", || {
        model.generate_queries(topic, count)
    })
    .await;

    match generated {
        Ok(queries) => {
            let queries = dedupe_queries(queries, &none_run, count);
            if !queries.is_empty() {
                return (queries, true);
            }
            tracing::warn!(topic, "query generation returned nothing, searching the topic");
        }
        Err(e) => {
            tracing::warn!(topic, error = %e, "query generation failed, searching the topic");
        }
    }
    (vec![topic.to_string()], false)
}

fn fallback_summary(item: &SourceItem) -> String {
    if item.snippet.trim().is_empty() {
        item.title.clone()
    } else {
        item.snippet.clone()
    }
}

/// Turn a model draft into a report whose citations all resolve in `index`.
pub fn build_report(topic: &str, draft: ReportDraft, index: &SourceIndex) -> ResearchReport {
    let known = index.known_ids();
    let sections: Vec<Section> = draft
        .sections
        .into_iter()
        .map(|s| {
            let (text, citations) = clean_citations(&s.text, &known);
            Section {
                title: s.title,
                text,
                citations,
                confidence: None,
            }
        })
        .collect();

    let outline = if draft.outline.is_empty() {
        sections.iter().map(|s| s.title.clone()).collect()
    } else {
        draft.outline
    };

    ResearchReport {
        topic: topic.to_string(),
        outline,
        sections,
        sources: index.items().to_vec(),
        notes: draft.notes,
        overall_confidence: None,
    }
}
