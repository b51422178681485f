//! Deterministic confidence blending for verified report sections.
//!
//! # Algorithm
//!
//! For each section three rule-based sub-scores are computed from the
//! section text and the sources it cites:
//!
//! - **quality**: mean domain weight of the cited URLs (academic and
//!   government 1.0, major wire/news 0.8, other `.com` 0.4, anything else
//!   0.3). No citations scores 0.3.
//! - **recency**: age of the newest parseable publication date. ≤180 days
//!   1.0, ≤365 0.8, ≤720 0.6, older 0.4. No parseable date scores 0.6.
//! - **coverage**: share of up to five short claims supported by at least
//!   one cited source (≥2 shared non-stopword tokens with its title or
//!   snippet). No claims scores 0.6.
//!
//! They are blended with the model confidence:
//!
//! `final = clamp(0.5·llm + 0.25·coverage + 0.15·quality + 0.10·recency)`
//!
//! then a diversity bonus is added (+0.02 for two distinct cited domains,
//! +0.03 for three or more) and the result is clamped again. The overall
//! confidence is the arithmetic mean of the section scores.
//!
//! Every function here is pure: the same inputs (including the reference
//! date) always give the same scores.

use std::collections::HashSet;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate};
use regex::Regex;

use crate::canonical::domain_of;
use crate::citations::strip_citations;
use crate::models::{Section, SectionMetrics, SourceItem};

pub const WEIGHT_LLM: f64 = 0.5;
pub const WEIGHT_COVERAGE: f64 = 0.25;
pub const WEIGHT_QUALITY: f64 = 0.15;
pub const WEIGHT_RECENCY: f64 = 0.10;

/// Score used for neutral sub-scores (no dates, no claims).
pub const NEUTRAL_SCORE: f64 = 0.6;
/// Quality of a section that cites nothing.
pub const UNCITED_QUALITY: f64 = 0.3;
pub const MAX_CLAIMS: usize = 5;
pub const MIN_CLAIM_WORDS: usize = 4;
pub const MIN_SHARED_TOKENS: usize = 2;

const ACADEMIC_DOMAINS: &[&str] = &[
    "arxiv.org",
    "nature.com",
    "science.org",
    "sciencedirect.com",
    "springer.com",
    "thelancet.com",
    "nejm.org",
    "bmj.com",
    "jamanetwork.com",
    "cell.com",
    "plos.org",
    "ieee.org",
    "acm.org",
    "who.int",
    "oecd.org",
    "worldbank.org",
    "imf.org",
    "un.org",
    "europa.eu",
    "ncbi.nlm.nih.gov",
];

const NEWS_DOMAINS: &[&str] = &[
    "reuters.com",
    "apnews.com",
    "bbc.com",
    "bbc.co.uk",
    "nytimes.com",
    "washingtonpost.com",
    "wsj.com",
    "ft.com",
    "bloomberg.com",
    "theguardian.com",
    "economist.com",
    "npr.org",
    "cnn.com",
    "aljazeera.com",
    "axios.com",
    "politico.com",
    "cnbc.com",
];

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "was",
    "one", "our", "out", "has", "have", "his", "how", "its", "may", "new", "now", "who", "did",
    "get", "him", "she", "use", "that", "with", "this", "from", "they", "will", "would", "there",
    "their", "what", "about", "which", "when", "were", "been", "also", "into", "more", "than",
    "then", "them", "these", "those", "such", "some", "over", "only", "most", "many", "much",
    "very", "just", "like", "each", "other", "could", "should", "while", "where", "after",
    "before", "being", "between", "both", "does", "through", "under", "within", "without",
];

/// Clamp to `[0, 1]`; non-finite values become 0.
pub fn clamp_unit(x: f64) -> f64 {
    if x.is_finite() {
        x.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn matches_domain(domain: &str, candidate: &str) -> bool {
    domain == candidate || domain.ends_with(&format!(".{}", candidate))
}

fn is_institutional(domain: &str) -> bool {
    let labels: Vec<&str> = domain.split('.').collect();
    let Some(tld) = labels.last() else {
        return false;
    };
    if matches!(*tld, "gov" | "edu" | "mil" | "int") {
        return true;
    }
    // Country-code second level: gov.uk, ac.uk, edu.au, ...
    labels.len() >= 3
        && tld.len() == 2
        && matches!(labels[labels.len() - 2], "gov" | "ac" | "edu" | "mil")
}

/// Weight of a single (already `www.`-stripped, lower-cased) domain.
pub fn domain_weight(domain: &str) -> f64 {
    if is_institutional(domain) || ACADEMIC_DOMAINS.iter().any(|d| matches_domain(domain, d)) {
        1.0
    } else if NEWS_DOMAINS.iter().any(|d| matches_domain(domain, d)) {
        0.8
    } else if domain.ends_with(".com") {
        0.4
    } else {
        0.3
    }
}

/// Mean domain weight over `urls`; [`UNCITED_QUALITY`] when empty.
pub fn quality_score(urls: &[&str]) -> f64 {
    if urls.is_empty() {
        return UNCITED_QUALITY;
    }
    let total: f64 = urls
        .iter()
        .map(|u| domain_of(u).map(|d| domain_weight(&d)).unwrap_or(0.3))
        .sum();
    clamp_unit(total / urls.len() as f64)
}

/// Parse a publication date in any of the formats providers commonly use.
pub fn parse_published_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.date_naive());
    }
    for fmt in ["%Y-%m-%d", "%Y/%m/%d", "%d %b %Y", "%d %B %Y", "%b %d, %Y", "%B %d, %Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    // Naive timestamps such as `2024-03-05T10:00:00` or `2024-03-05 10:00`.
    if s.len() > 10 && s.is_char_boundary(10) {
        if let Ok(d) = NaiveDate::parse_from_str(&s[..10], "%Y-%m-%d") {
            return Some(d);
        }
    }
    if s.len() == 7 {
        if let Ok(d) = NaiveDate::parse_from_str(&format!("{}-01", s), "%Y-%m-%d") {
            return Some(d);
        }
    }
    if s.len() == 4 && s.chars().all(|c| c.is_ascii_digit()) {
        let year: i32 = s.parse().ok()?;
        return NaiveDate::from_ymd_opt(year, 1, 1);
    }
    None
}

/// Recency of the newest parseable date relative to `today`.
pub fn recency_score<'a, I>(dates: I, today: NaiveDate) -> f64
where
    I: IntoIterator<Item = &'a str>,
{
    let newest = dates.into_iter().filter_map(parse_published_date).max();
    let Some(newest) = newest else {
        return NEUTRAL_SCORE;
    };
    let age_days = (today - newest).num_days().max(0);
    match age_days {
        0..=180 => 1.0,
        181..=365 => 0.8,
        366..=720 => 0.6,
        _ => 0.4,
    }
}

fn sentence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]+(?:\s+|$)").expect("sentence pattern is valid"))
}

/// Up to [`MAX_CLAIMS`] sentences of at least [`MIN_CLAIM_WORDS`] words,
/// with citation markers removed.
pub fn extract_claims(text: &str) -> Vec<String> {
    let plain = strip_citations(text);
    sentence_re()
        .split(&plain)
        .map(str::trim)
        .filter(|s| s.split_whitespace().count() >= MIN_CLAIM_WORDS)
        .take(MAX_CLAIMS)
        .map(str::to_string)
        .collect()
}

/// Lower-cased alphanumeric tokens of length ≥ 3 that are not stopwords.
pub fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// Share of `claims` supported by at least one of `sources`.
pub fn coverage_score(claims: &[String], sources: &[&SourceItem]) -> f64 {
    if claims.is_empty() {
        return NEUTRAL_SCORE;
    }
    let source_tokens: Vec<HashSet<String>> = sources
        .iter()
        .map(|s| tokenize(&format!("{} {}", s.title, s.snippet)))
        .collect();

    let supported = claims
        .iter()
        .filter(|claim| {
            let claim_tokens = tokenize(claim);
            source_tokens
                .iter()
                .any(|st| claim_tokens.intersection(st).count() >= MIN_SHARED_TOKENS)
        })
        .count();

    clamp_unit(supported as f64 / claims.len() as f64)
}

/// Corroboration bonus for citing several distinct domains.
pub fn diversity_bonus(distinct_domains: usize) -> f64 {
    match distinct_domains {
        0 | 1 => 0.0,
        2 => 0.02,
        _ => 0.03,
    }
}

/// Blend the model confidence with the rule-based sub-scores.
pub fn blend(
    llm_conf: f64,
    coverage: f64,
    quality: f64,
    recency: f64,
    distinct_domains: usize,
) -> SectionMetrics {
    let llm_conf = clamp_unit(llm_conf);
    let coverage = clamp_unit(coverage);
    let quality = clamp_unit(quality);
    let recency = clamp_unit(recency);

    let base = clamp_unit(
        WEIGHT_LLM * llm_conf
            + WEIGHT_COVERAGE * coverage
            + WEIGHT_QUALITY * quality
            + WEIGHT_RECENCY * recency,
    );
    let final_confidence = clamp_unit(base + diversity_bonus(distinct_domains));

    SectionMetrics {
        llm_conf,
        coverage,
        quality,
        recency,
        final_confidence,
    }
}

/// Score one section against the sources it cites.
pub fn score_section(
    section: &Section,
    cited: &[&SourceItem],
    llm_conf: f64,
    today: NaiveDate,
) -> SectionMetrics {
    let urls: Vec<&str> = cited.iter().map(|s| s.url.as_str()).collect();
    let quality = quality_score(&urls);
    let recency = recency_score(cited.iter().filter_map(|s| s.date.as_deref()), today);
    let claims = extract_claims(&section.text);
    let coverage = coverage_score(&claims, cited);

    let domains: HashSet<String> = cited
        .iter()
        .filter_map(|s| s.domain.clone().or_else(|| domain_of(&s.url)))
        .collect();

    blend(llm_conf, coverage, quality, recency, domains.len())
}

/// Mean of the section scores; 0.0 for a report without sections.
pub fn overall_confidence(metrics: &[SectionMetrics]) -> f64 {
    if metrics.is_empty() {
        return 0.0;
    }
    let sum: f64 = metrics.iter().map(|m| m.final_confidence).sum();
    clamp_unit(sum / metrics.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    fn source(id: u32, url: &str, title: &str, snippet: &str, date: Option<&str>) -> SourceItem {
        SourceItem {
            id,
            title: title.to_string(),
            url: url.to_string(),
            snippet: snippet.to_string(),
            date: date.map(str::to_string),
            domain: domain_of(url),
        }
    }

    #[test]
    fn test_domain_weights() {
        assert_eq!(domain_weight("cdc.gov"), 1.0);
        assert_eq!(domain_weight("stanford.edu"), 1.0);
        assert_eq!(domain_weight("ox.ac.uk"), 1.0);
        assert_eq!(domain_weight("service.gov.uk"), 1.0);
        assert_eq!(domain_weight("arxiv.org"), 1.0);
        assert_eq!(domain_weight("pubmed.ncbi.nlm.nih.gov"), 1.0);
        assert_eq!(domain_weight("reuters.com"), 0.8);
        assert_eq!(domain_weight("bbc.co.uk"), 0.8);
        assert_eq!(domain_weight("acme-widgets.com"), 0.4);
        assert_eq!(domain_weight("someblog.net"), 0.3);
        // Suffix match must be on a label boundary.
        assert_eq!(domain_weight("notreuters.com"), 0.4);
    }

    #[test]
    fn test_quality_empty_and_mean() {
        assert_eq!(quality_score(&[]), UNCITED_QUALITY);
        let q = quality_score(&["https://www.nih.gov/a", "https://www.reuters.com/b"]);
        assert!((q - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_parse_dates() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(parse_published_date("2024-03-05"), Some(d));
        assert_eq!(parse_published_date("2024/03/05"), Some(d));
        assert_eq!(parse_published_date("2024-03-05T10:00:00Z"), Some(d));
        assert_eq!(parse_published_date("2024-03-05T10:00:00"), Some(d));
        assert_eq!(parse_published_date("5 Mar 2024"), Some(d));
        assert_eq!(parse_published_date("March 5, 2024"), Some(d));
        assert_eq!(parse_published_date("Tue, 5 Mar 2024 10:00:00 +0000"), Some(d));
        assert_eq!(
            parse_published_date("2024-03"),
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );
        assert_eq!(
            parse_published_date("2024"),
            NaiveDate::from_ymd_opt(2024, 1, 1)
        );
        assert_eq!(parse_published_date("last tuesday"), None);
        assert_eq!(parse_published_date(""), None);
    }

    #[test]
    fn test_recency_buckets() {
        let t = today();
        assert_eq!(recency_score(["2026-09-01"], t), 1.0);
        assert_eq!(recency_score(["2026-01-01"], t), 0.8);
        assert_eq!(recency_score(["2025-03-01"], t), 0.6);
        assert_eq!(recency_score(["2019-01-01"], t), 0.4);
        // Newest date wins.
        assert_eq!(recency_score(["2019-01-01", "2026-09-01"], t), 1.0);
        // Future dates count as fresh.
        assert_eq!(recency_score(["2027-01-01"], t), 1.0);
    }

    #[test]
    fn test_recency_without_dates_is_neutral() {
        assert_eq!(recency_score(Vec::<&str>::new(), today()), NEUTRAL_SCORE);
        assert_eq!(recency_score(["unknown"], today()), NEUTRAL_SCORE);
    }

    #[test]
    fn test_extract_claims() {
        let text = "AI models now read chest X-rays [1]. Short one. \
                    Hospitals report faster triage times overall [2]! Is adoption uneven across regions? \
                    Version 3.5 improved recall considerably. Costs remain high for rural clinics. \
                    A sixth claim that should be dropped.";
        let claims = extract_claims(text);
        assert_eq!(claims.len(), MAX_CLAIMS);
        assert_eq!(claims[0], "AI models now read chest X-rays");
        assert!(claims.iter().all(|c| !c.contains('[')));
        assert!(claims.iter().any(|c| c.contains("3.5")));
    }

    #[test]
    fn test_coverage() {
        let s = source(
            1,
            "https://a.org",
            "Radiology AI reads chest X-rays",
            "Deep learning models interpret chest radiographs",
            None,
        );
        let claims = vec![
            "AI models interpret chest radiographs accurately".to_string(),
            "Reimbursement policy lags behind deployment".to_string(),
        ];
        assert!((coverage_score(&claims, &[&s]) - 0.5).abs() < 1e-9);
        assert_eq!(coverage_score(&claims, &[]), 0.0);
        assert_eq!(coverage_score(&[], &[&s]), NEUTRAL_SCORE);
    }

    #[test]
    fn test_blend_weights_and_bonus() {
        let m = blend(0.8, 1.0, 1.0, 1.0, 3);
        assert!((m.final_confidence - 0.93).abs() < 1e-9);
        let m = blend(0.8, 1.0, 1.0, 1.0, 2);
        assert!((m.final_confidence - 0.92).abs() < 1e-9);
        let m = blend(0.8, 1.0, 1.0, 1.0, 1);
        assert!((m.final_confidence - 0.9).abs() < 1e-9);
        let m = blend(1.0, 1.0, 1.0, 1.0, 5);
        assert_eq!(m.final_confidence, 1.0);
    }

    #[test]
    fn test_blend_clamps_bad_inputs() {
        let m = blend(f64::NAN, 2.0, -1.0, f64::INFINITY, 0);
        assert_eq!(m.llm_conf, 0.0);
        assert_eq!(m.coverage, 1.0);
        assert_eq!(m.quality, 0.0);
        assert_eq!(m.recency, 0.0);
        assert!((m.final_confidence - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_score_section_end_to_end() {
        let sources = [
            source(
                1,
                "https://www.nih.gov/news/ai-imaging",
                "AI imaging study",
                "Deep learning improves radiology imaging accuracy",
                Some("2026-08-01"),
            ),
            source(
                2,
                "https://www.reuters.com/health/ai",
                "Hospitals adopt AI triage",
                "Emergency departments adopt triage software widely",
                Some("2025-01-01"),
            ),
        ];
        let section = Section {
            title: "Diagnostics".into(),
            text: "Deep learning improves imaging accuracy in radiology [1]. \
                   Emergency departments adopt triage software [2]."
                .into(),
            citations: vec![1, 2],
            confidence: None,
        };
        let cited: Vec<&SourceItem> = sources.iter().collect();
        let m = score_section(&section, &cited, 0.7, today());
        assert!((m.quality - 0.9).abs() < 1e-9);
        assert_eq!(m.recency, 1.0);
        assert_eq!(m.coverage, 1.0);
        // 0.35 + 0.25 + 0.135 + 0.1 + 0.02
        assert!((m.final_confidence - 0.855).abs() < 1e-9);
    }

    #[test]
    fn test_overall_mean() {
        assert_eq!(overall_confidence(&[]), 0.0);
        let a = blend(1.0, 1.0, 1.0, 1.0, 0);
        let b = blend(0.0, 0.0, 0.0, 0.0, 0);
        assert!((overall_confidence(&[a, b]) - 0.5).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn test_prop_confidence_bounds(
            llm in prop::num::f64::ANY,
            coverage in -2.0f64..3.0,
            quality in -2.0f64..3.0,
            recency in -2.0f64..3.0,
            domains in 0usize..10,
        ) {
            let m = blend(llm, coverage, quality, recency, domains);
            for v in [m.llm_conf, m.coverage, m.quality, m.recency, m.final_confidence] {
                prop_assert!((0.0..=1.0).contains(&v));
            }
            let overall = overall_confidence(&[m, m]);
            prop_assert!((0.0..=1.0).contains(&overall));
        }
    }
}
