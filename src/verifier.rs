//! Report verification and confidence stamping.
//!
//! For each section the language model gives a supportedness judgement
//! ([`ResearchModel::review_section`]). That confidence is then blended with
//! the rule-based quality, coverage and recency scores from
//! [`deep_research_core::scoring`], so the final numbers depend only on the
//! model's answer, the report, and the reference date.
//!
//! A failed review is fatal for the run. The verifier writes to a report
//! exactly once: a report that already carries an overall confidence is
//! rejected.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;

use deep_research_core::citations::clean_citations;
use deep_research_core::models::{
    ResearchReport, Section, SectionReview, SourceItem, VerificationOutput,
};
use deep_research_core::provider::ResearchModel;
use deep_research_core::scoring::{clamp_unit, overall_confidence, score_section};

use crate::retry::{with_retry, RetryPolicy};

/// Section reviews in flight when no limit is given.
const DEFAULT_REVIEW_CONCURRENCY: usize = 5;

pub struct Verifier {
    model: Arc<dyn ResearchModel>,
    retry: RetryPolicy,
    concurrency: usize,
}

impl Verifier {
    pub fn new(model: Arc<dyn ResearchModel>, retry: RetryPolicy) -> Self {
        Self {
            model,
            retry,
            concurrency: DEFAULT_REVIEW_CONCURRENCY,
        }
    }

    /// At most `n` section reviews run at once.
    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    /// Review every section, stamp `confidence` on each section and
    /// `overall_confidence` on the report, and return the detailed output.
    pub async fn verify(
        &self,
        report: &mut ResearchReport,
        today: NaiveDate,
    ) -> Result<VerificationOutput> {
        if report.is_verified() {
            anyhow::bail!("report for \"{}\" has already been verified", report.topic);
        }

        let known = report.sources.iter().map(|s| s.id).collect();
        for section in &mut report.sections {
            let (text, citations) = clean_citations(&section.text, &known);
            section.text = text;
            section.citations = citations;
        }

        // `buffered` keeps reviews in section order.
        let pending: Vec<_> = report
            .sections
            .iter()
            .map(|section| {
                let cited: Vec<SourceItem> =
                    report.cited_sources(section).into_iter().cloned().collect();
                self.review(&report.topic, section, cited, today)
            })
            .collect();
        let reviews: Vec<SectionReview> = stream::iter(pending)
        .buffered(self.concurrency)
        .try_collect()
        .await?;

        let metrics: Vec<_> = reviews.iter().filter_map(|r| r.metrics).collect();
        let overall = overall_confidence(&metrics);

        for (section, review) in report.sections.iter_mut().zip(&reviews) {
            section.confidence = Some(review.confidence);
        }
        report.overall_confidence = Some(overall);

        tracing::info!(
            sections = reviews.len(),
            overall_confidence = overall,
            "report verified"
        );

        Ok(VerificationOutput {
            sections: reviews,
            overall_confidence: overall,
        })
    }

    async fn review(
        &self,
        topic: &str,
        section: &Section,
        cited: Vec<SourceItem>,
        today: NaiveDate,
    ) -> Result<SectionReview> {
        let assessment = with_retry(&self.retry, "review_section", || {
            self.model.review_section(topic, section, &cited)
        })
        .await
        .with_context(|| format!("Failed to review section \"{}\"", section.title))?;

        let llm_conf = clamp_unit(assessment.confidence);
        let cited_refs: Vec<&SourceItem> = cited.iter().collect();
        let metrics = score_section(section, &cited_refs, llm_conf, today);

        tracing::debug!(
            section = %section.title,
            llm_conf,
            coverage = metrics.coverage,
            quality = metrics.quality,
            recency = metrics.recency,
            final_confidence = metrics.final_confidence,
            "section scored"
        );

        Ok(SectionReview {
            section_title: section.title.clone(),
            confidence: metrics.final_confidence,
            reasoning: assessment.reasoning,
            issues: assessment.issues,
            cited_urls: cited.iter().map(|s| s.url.clone()).collect(),
            metrics: Some(metrics),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use deep_research_core::error::UpstreamError;
    use deep_research_core::models::{
        FindingsDigest, FollowUpDecision, ReportDraft, SearchResult, SectionAssessment,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct ReviewOnly {
        confidence: f64,
        fail: bool,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ReviewOnly {
        fn new(confidence: f64, fail: bool) -> Self {
            Self {
                confidence,
                fail,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ResearchModel for ReviewOnly {
        fn name(&self) -> &str {
            "review-only"
        }
        async fn generate_queries(&self, _: &str, _: usize) -> Result<Vec<String>> {
            Err(anyhow!("unused"))
        }
        async fn summarize_source(&self, _: &str, _: &SourceItem) -> Result<String> {
            Err(anyhow!("unused"))
        }
        async fn decide_follow_up(&self, _: &FindingsDigest) -> Result<FollowUpDecision> {
            Err(anyhow!("unused"))
        }
        async fn draft_report(
            &self,
            _: &str,
            _: &[SearchResult],
            _: &[SourceItem],
        ) -> Result<ReportDraft> {
            Err(anyhow!("unused"))
        }
        async fn review_section(
            &self,
            _: &str,
            _: &Section,
            _: &[SourceItem],
        ) -> Result<SectionAssessment> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail {
                return Err(UpstreamError::Api {
                    status: 400,
                    message: "context length exceeded".into(),
                }
                .into());
            }
            Ok(SectionAssessment {
                confidence: self.confidence,
                reasoning: "checked".into(),
                issues: vec![],
            })
        }
    }

    fn source(id: u32, url: &str, date: &str) -> SourceItem {
        SourceItem {
            id,
            title: format!("Source {}", id),
            url: url.into(),
            snippet: "Hospitals use machine learning models for radiology triage".into(),
            date: Some(date.into()),
            domain: None,
        }
    }

    fn report() -> ResearchReport {
        ResearchReport {
            topic: "AI in Healthcare".into(),
            outline: vec!["Imaging".into(), "Open questions".into()],
            sections: vec![
                Section {
                    title: "Imaging".into(),
                    text: "Hospitals use machine learning models for radiology triage [1, 2]. \
                           Unknown claim [9]."
                        .into(),
                    citations: vec![1, 2, 9],
                    confidence: None,
                },
                Section {
                    title: "Open questions".into(),
                    text: "Little is known.".into(),
                    citations: vec![],
                    confidence: None,
                },
            ],
            sources: vec![
                source(1, "https://www.nih.gov/a", "2026-08-01"),
                source(2, "https://reuters.com/b", "2025-01-10"),
            ],
            notes: vec![],
            overall_confidence: None,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    #[tokio::test]
    async fn test_verify_stamps_confidences() {
        let verifier = Verifier::new(
            Arc::new(ReviewOnly::new(1.7, false)),
            RetryPolicy::none(),
        );
        let mut report = report();
        let out = verifier.verify(&mut report, today()).await.unwrap();

        assert_eq!(out.sections.len(), 2);
        assert_eq!(report.sections[0].citations, vec![1, 2]);
        assert!(!report.sections[0].text.contains("[9]"));

        let m = out.sections[0].metrics.unwrap();
        assert_eq!(m.llm_conf, 1.0);
        assert!((m.quality - 0.9).abs() < 1e-9);
        assert_eq!(m.recency, 1.0);
        assert_eq!(out.sections[0].cited_urls.len(), 2);

        for (section, review) in report.sections.iter().zip(&out.sections) {
            assert_eq!(section.confidence, Some(review.confidence));
            assert!((0.0..=1.0).contains(&review.confidence));
        }
        assert_eq!(report.overall_confidence, Some(out.overall_confidence));
        assert!((0.0..=1.0).contains(&out.overall_confidence));
    }

    #[tokio::test]
    async fn test_verify_only_once() {
        let verifier = Verifier::new(
            Arc::new(ReviewOnly::new(0.5, false)),
            RetryPolicy::none(),
        );
        let mut report = report();
        verifier.verify(&mut report, today()).await.unwrap();
        assert!(verifier.verify(&mut report, today()).await.is_err());
    }

    #[tokio::test]
    async fn test_review_failure_is_fatal() {
        let verifier = Verifier::new(
            Arc::new(ReviewOnly::new(0.5, true)),
            RetryPolicy::none(),
        );
        let mut report = report();
        let err = verifier.verify(&mut report, today()).await.unwrap_err();
        assert!(format!("{:#}", err).contains("context length exceeded"));
        assert!(!report.is_verified());
    }

    #[tokio::test]
    async fn test_empty_report_scores_zero() {
        let verifier = Verifier::new(
            Arc::new(ReviewOnly::new(0.9, false)),
            RetryPolicy::none(),
        );
        let mut report = report();
        report.sections.clear();
        let out = verifier.verify(&mut report, today()).await.unwrap();
        assert_eq!(out.overall_confidence, 0.0);
        assert_eq!(report.overall_confidence, Some(0.0));
    }

    #[tokio::test]
    async fn test_reviews_respect_concurrency_limit() {
        let model = Arc::new(ReviewOnly::new(0.6, false));
        let verifier = Verifier::new(model.clone(), RetryPolicy::none()).with_concurrency(2);

        let mut report = report();
        let template = report.sections[0].clone();
        report.sections = (0..7)
            .map(|i| Section {
                title: format!("Part {}", i),
                ..template.clone()
            })
            .collect();

        let out = verifier.verify(&mut report, today()).await.unwrap();

        assert_eq!(model.peak.load(Ordering::SeqCst), 2);
        let titles: Vec<&str> = out.sections.iter().map(|r| r.section_title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["Part 0", "Part 1", "Part 2", "Part 3", "Part 4", "Part 5", "Part 6"]
        );
    }
}
