//! In-memory search provider and research model used by the integration
//! tests. Both are injected through the orchestrator's constructor.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use deep_research::config::ResearchConfig;
use deep_research::progress::{ResearchEvent, ResearchProgressReporter};
use deep_research::retry::RetryPolicy;
use deep_research_core::error::UpstreamError;
use deep_research_core::models::{
    FindingsDigest, FollowUpDecision, RawHit, ReportDraft, SearchOutcome, SearchResult, Section,
    SectionAssessment, SectionDraft, SourceItem,
};
use deep_research_core::provider::{ResearchModel, SearchProvider};

pub fn hit(title: &str, url: &str, snippet: &str, date: Option<&str>) -> RawHit {
    RawHit::validated(Some(title), url, Some(snippet), date).expect("valid test hit")
}

/// Millisecond backoff so retry paths run quickly.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        transient_attempts: 4,
        transient_backoff: vec![Duration::from_millis(1); 4],
        rate_limit_retries: 2,
        rate_limit_backoff: vec![Duration::from_millis(2); 2],
        max_retry_after: Duration::from_millis(5),
        jitter: Duration::ZERO,
    }
}

pub fn settings() -> ResearchConfig {
    ResearchConfig {
        search_concurrency: 2,
        summarize_concurrency: 2,
        ..ResearchConfig::default()
    }
}

/// Counts overlapping calls and remembers the highest overlap seen.
#[derive(Default)]
pub struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    /// Hold a slot for `delay`, so overlapping callers are visible.
    pub async fn occupy(&self, delay: Duration) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(delay).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

// ─── Search ─────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeSearch {
    responses: HashMap<String, Vec<RawHit>>,
    failing: HashSet<String>,
    flaky: Mutex<HashMap<String, u32>>,
    calls: Mutex<Vec<String>>,
    delay: Duration,
    pub in_flight: InFlight,
}

impl FakeSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, query: &str, hits: Vec<RawHit>) -> Self {
        self.responses.insert(query.to_string(), hits);
        self
    }

    /// Every call for `query` fails with a non-retryable API error.
    pub fn failing(mut self, query: &str) -> Self {
        self.failing.insert(query.to_string());
        self
    }

    /// The first `n` calls for `query` fail with a transient error.
    pub fn flaky(self, query: &str, n: u32) -> Self {
        self.flaky.lock().unwrap().insert(query.to_string(), n);
        self
    }

    /// Every call takes `ms` milliseconds.
    pub fn slow(mut self, ms: u64) -> Self {
        self.delay = Duration::from_millis(ms);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, query: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|q| q.as_str() == query)
            .count()
    }
}

#[async_trait]
impl SearchProvider for FakeSearch {
    fn name(&self) -> &str {
        "fake"
    }

    async fn search(&self, query: &str) -> Result<SearchOutcome> {
        self.calls.lock().unwrap().push(query.to_string());
        self.in_flight.occupy(self.delay).await;

        if let Some(remaining) = self.flaky.lock().unwrap().get_mut(query) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(UpstreamError::Transient("connection reset by peer".into()).into());
            }
        }
        if self.failing.contains(query) {
            return Err(UpstreamError::Api {
                status: 400,
                message: "query rejected".into(),
            }
            .into());
        }

        let hits = self.responses.get(query).cloned().unwrap_or_default();
        Ok(SearchOutcome::new(Some(format!("summary of {}", query)), hits))
    }
}

// ─── Model ──────────────────────────────────────────────────────────

pub struct FakeModel {
    queries: Option<Vec<String>>,
    fail_summary_ids: HashSet<u32>,
    decisions: Mutex<VecDeque<FollowUpDecision>>,
    fail_draft: bool,
    fail_review: bool,
    review_confidence: f64,
    summary_delay: Duration,
    pub summaries_in_flight: InFlight,
    pub generate_calls: Mutex<usize>,
    pub summarize_calls: Mutex<Vec<u32>>,
    pub decide_calls: Mutex<usize>,
}

impl FakeModel {
    /// A model that proposes `queries` and stops after the first wave.
    pub fn new(queries: &[&str]) -> Self {
        Self {
            queries: Some(queries.iter().map(|q| q.to_string()).collect()),
            fail_summary_ids: HashSet::new(),
            decisions: Mutex::new(VecDeque::new()),
            fail_draft: false,
            fail_review: false,
            review_confidence: 0.8,
            summary_delay: Duration::ZERO,
            summaries_in_flight: InFlight::default(),
            generate_calls: Mutex::new(0),
            summarize_calls: Mutex::new(Vec::new()),
            decide_calls: Mutex::new(0),
        }
    }

    /// Query generation always fails.
    pub fn without_planner() -> Self {
        Self {
            queries: None,
            ..Self::new(&[])
        }
    }

    /// Decisions returned in order; once exhausted the model says stop.
    pub fn deciding(self, decisions: Vec<FollowUpDecision>) -> Self {
        *self.decisions.lock().unwrap() = decisions.into();
        self
    }

    pub fn failing_summaries(mut self, ids: &[u32]) -> Self {
        self.fail_summary_ids = ids.iter().copied().collect();
        self
    }

    /// Every summary takes `ms` milliseconds.
    pub fn slow_summaries(mut self, ms: u64) -> Self {
        self.summary_delay = Duration::from_millis(ms);
        self
    }

    pub fn failing_draft(mut self) -> Self {
        self.fail_draft = true;
        self
    }

    pub fn failing_review(mut self) -> Self {
        self.fail_review = true;
        self
    }

    pub fn summarized_ids(&self) -> Vec<u32> {
        let mut ids = self.summarize_calls.lock().unwrap().clone();
        ids.sort_unstable();
        ids
    }
}

pub fn more(queries: &[&str]) -> FollowUpDecision {
    FollowUpDecision {
        needs_more: true,
        queries: queries.iter().map(|q| q.to_string()).collect(),
        rationale: Some("gaps remain".into()),
    }
}

#[async_trait]
impl ResearchModel for FakeModel {
    fn name(&self) -> &str {
        "fake-model"
    }

    async fn generate_queries(&self, _topic: &str, count: usize) -> Result<Vec<String>> {
        *self.generate_calls.lock().unwrap() += 1;
        match &self.queries {
            Some(q) => Ok(q.iter().take(count).cloned().collect()),
            None => Err(anyhow!("planner unavailable")),
        }
    }

    async fn summarize_source(&self, topic: &str, source: &SourceItem) -> Result<String> {
        self.summarize_calls.lock().unwrap().push(source.id);
        self.summaries_in_flight.occupy(self.summary_delay).await;
        if self.fail_summary_ids.contains(&source.id) {
            return Err(UpstreamError::Parse("summary was not JSON".into()).into());
        }
        Ok(format!("{} is relevant to {}", source.title, topic))
    }

    async fn decide_follow_up(&self, digest: &FindingsDigest) -> Result<FollowUpDecision> {
        *self.decide_calls.lock().unwrap() += 1;
        assert!(!digest.checklist.is_empty());
        Ok(self
            .decisions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(FollowUpDecision::stop))
    }

    /// Three sections splitting the sources between them. The second one
    /// also cites a number that does not exist.
    async fn draft_report(
        &self,
        topic: &str,
        summaries: &[SearchResult],
        sources: &[SourceItem],
    ) -> Result<ReportDraft> {
        if self.fail_draft {
            return Err(UpstreamError::Transient("upstream closed connection".into()).into());
        }
        assert_eq!(summaries.len(), sources.len());

        let ids: Vec<u32> = sources.iter().map(|s| s.id).collect();
        let chunk = ids.len().div_ceil(3).max(1);
        let groups: Vec<&[u32]> = ids.chunks(chunk).collect();
        let cite = |i: usize| -> String {
            groups
                .get(i)
                .map(|g| {
                    let list: Vec<String> = g.iter().map(|n| n.to_string()).collect();
                    format!(" [{}]", list.join(", "))
                })
                .unwrap_or_default()
        };

        let sections = vec![
            SectionDraft {
                title: "Background".into(),
                text: format!("Researchers describe how {} is evolving quickly{}.", topic, cite(0)),
            },
            SectionDraft {
                title: "Evidence".into(),
                text: format!(
                    "Several studies report measurable gains in accuracy{}. One claim lacks a source [99].",
                    cite(1)
                ),
            },
            SectionDraft {
                title: "Outlook".into(),
                text: format!("Adoption depends on regulation and cost{}.", cite(2)),
            },
        ];

        Ok(ReportDraft {
            outline: sections.iter().map(|s| s.title.clone()).collect(),
            sections,
            notes: vec!["Generated by a test model.".into()],
        })
    }

    async fn review_section(
        &self,
        _topic: &str,
        _section: &Section,
        _cited: &[SourceItem],
    ) -> Result<SectionAssessment> {
        if self.fail_review {
            return Err(UpstreamError::Auth("invalid api key".into()).into());
        }
        Ok(SectionAssessment {
            confidence: self.review_confidence,
            reasoning: "supported".into(),
            issues: vec![],
        })
    }
}

// ─── Progress ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ResearchEvent>>,
}

impl RecordingProgress {
    pub fn events(&self) -> Vec<ResearchEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ResearchProgressReporter for RecordingProgress {
    fn report(&self, event: ResearchEvent) {
        self.events.lock().unwrap().push(event);
    }
}
