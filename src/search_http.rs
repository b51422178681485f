//! HTTP JSON search provider.
//!
//! Posts `{ "query", "max_results", "include_answer": true }` with a bearer
//! token to `[search].endpoint` and accepts the common answer-engine
//! response shape:
//!
//! ```json
//! {
//!   "answer": "short synthesized answer",
//!   "results": [
//!     { "title": "...", "url": "https://...", "content": "...", "published_date": "2024-05-01" }
//!   ]
//! }
//! ```
//!
//! `summary`, `snippet`, and `published` are accepted as aliases. Each hit
//! is validated into a [`RawHit`] here, so nothing past this module ever
//! sees a non-HTTP URL or a missing title.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use deep_research_core::error::UpstreamError;
use deep_research_core::models::{RawHit, SearchOutcome};
use deep_research_core::provider::SearchProvider;

use crate::config::SearchConfig;
use crate::error::{upstream_from_reqwest, upstream_from_status, ResearchError};

pub struct HttpSearchProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    max_results: usize,
}

impl HttpSearchProvider {
    /// Build a provider from config, reading the API key from the
    /// environment variable named by `api_key_env`.
    pub fn new(config: &SearchConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ResearchError::MissingCredential(config.api_key_env.clone()))?;
        Self::with_key(config, api_key)
    }

    pub fn with_key(config: &SearchConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
            max_results: config.max_results,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default, alias = "summary")]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<ResponseHit>,
}

#[derive(Debug, Deserialize)]
struct ResponseHit {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default, alias = "snippet")]
    content: Option<String>,
    #[serde(default, alias = "published")]
    published_date: Option<String>,
}

/// Parse a response body into a [`SearchOutcome`], dropping invalid hits.
pub fn parse_search_response(body: &str) -> Result<SearchOutcome, UpstreamError> {
    let resp: SearchResponse = serde_json::from_str(body)
        .map_err(|e| UpstreamError::Parse(format!("search response: {}", e)))?;

    let total = resp.results.len();
    let hits: Vec<RawHit> = resp
        .results
        .into_iter()
        .filter_map(|h| {
            RawHit::validated(
                h.title.as_deref(),
                h.url.as_deref()?,
                h.content.as_deref(),
                h.published_date.as_deref(),
            )
        })
        .collect();

    if hits.len() < total {
        tracing::debug!(dropped = total - hits.len(), "dropped invalid search hits");
    }

    let summary = resp
        .answer
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty());
    Ok(SearchOutcome::new(summary, hits))
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn search(&self, query: &str) -> Result<SearchOutcome> {
        let body = serde_json::json!({
            "query": query,
            "max_results": self.max_results,
            "include_answer": true,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(upstream_from_reqwest)?;

        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await.map_err(upstream_from_reqwest)?;

        if !status.is_success() {
            return Err(upstream_from_status(status, Some(&headers), &text).into());
        }

        Ok(parse_search_response(&text)?)
    }
}
