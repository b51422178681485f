//! OpenAI-compatible chat model implementing [`ResearchModel`].
//!
//! Every call goes to `POST {base_url}/chat/completions` with
//! `response_format = {"type": "json_object"}` and is parsed into a typed
//! struct. A response that does not match is an
//! [`UpstreamError::Parse`]: model output is data, never code.
//!
//! Retrying is left to the caller (the orchestrator wraps each call in
//! [`crate::retry::with_retry`]).

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use deep_research_core::error::UpstreamError;
use deep_research_core::models::{
    FindingsDigest, FollowUpDecision, ReportDraft, SearchResult, Section, SectionAssessment,
    SectionDraft, SourceItem,
};
use deep_research_core::parse::{parse_index_list, parse_string_list, strip_code_fences};
use deep_research_core::provider::ResearchModel;

use crate::config::LlmConfig;
use crate::error::{truncate, upstream_from_reqwest, upstream_from_status, ResearchError};

const PLAN_PROMPT: &str = "You plan web research. Given a topic, propose distinct, specific \
search engine queries that together cover the topic from different angles. \
Respond with JSON: {\"queries\": [\"...\"]}.";

const SUMMARIZE_PROMPT: &str = "You summarize a single web source for a research report. \
Write 2-4 factual sentences about what the source says that is relevant to the topic. \
Do not speculate beyond the provided text. Respond with JSON: {\"summary\": \"...\"}.";

const FOLLOW_UP_PROMPT: &str = "You review research progress and decide whether another round \
of web searching is needed. Only ask for more when an important gap remains. \
Respond with JSON: {\"needs_more\": true|false, \"queries\": [\"...\"], \"rationale\": \"...\"}.";

const DRAFT_PROMPT: &str = "You write a well-structured research report from numbered source \
summaries. Cite sources inline with their numbers in square brackets, e.g. [3] or [1, 4]. \
Only cite numbers that appear in the source list. \
Respond with JSON: {\"outline\": [\"...\"], \"sections\": [{\"title\": \"...\", \"text\": \"...\"}], \
\"notes\": [\"...\"]}.";

const REVIEW_PROMPT: &str = "You fact-check one section of a research report against the \
sources it cites. Rate how well the text is supported from 0.0 to 1.0, explain briefly, \
list concrete issues, and list the numbers of any cited sources that do not support the text. \
Respond with JSON: {\"confidence\": 0.0, \"reasoning\": \"...\", \"issues\": [\"...\"], \
\"weak_citations\": [1]}.";

/// Longest source snippet sent to the model.
const MAX_SNIPPET_CHARS: usize = 2000;

pub struct ChatModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    temperature: f64,
}

impl ChatModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ResearchError::MissingCredential(config.api_key_env.clone()))?;
        Self::with_key(config, api_key)
    }

    pub fn with_key(config: &LlmConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
        })
    }

    /// Send one system + user exchange and return the message content.
    async fn complete_json(&self, system: &str, user: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
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

        Ok(parse_chat_content(&text)?)
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

fn parse_error(what: &str, e: impl std::fmt::Display) -> UpstreamError {
    UpstreamError::Parse(format!("{}: {}", what, e))
}

/// Extract `choices[0].message.content` from a chat completion body.
pub fn parse_chat_content(body: &str) -> Result<String, UpstreamError> {
    let resp: ChatResponse =
        serde_json::from_str(body).map_err(|e| parse_error("chat completion", e))?;
    resp.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| UpstreamError::Parse("chat completion has no content".into()))
}

#[derive(Deserialize)]
struct QueriesPayload {
    queries: Vec<String>,
}

/// Accepts `{"queries": [...]}` or a bare JSON array of strings.
pub fn parse_queries(content: &str, count: usize) -> Result<Vec<String>, UpstreamError> {
    let body = strip_code_fences(content);
    let queries = match serde_json::from_str::<QueriesPayload>(body) {
        Ok(p) => p.queries,
        Err(_) => parse_string_list(body)?,
    };
    Ok(queries
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .take(count)
        .collect())
}

#[derive(Deserialize)]
struct SummaryPayload {
    summary: String,
}

pub fn parse_summary(content: &str) -> Result<String, UpstreamError> {
    let p: SummaryPayload = serde_json::from_str(strip_code_fences(content))
        .map_err(|e| parse_error("summary", e))?;
    let summary = p.summary.trim().to_string();
    if summary.is_empty() {
        return Err(UpstreamError::Parse("empty summary".into()));
    }
    Ok(summary)
}

pub fn parse_decision(content: &str) -> Result<FollowUpDecision, UpstreamError> {
    let mut d: FollowUpDecision = serde_json::from_str(strip_code_fences(content))
        .map_err(|e| parse_error("follow-up decision", e))?;
    d.queries = d
        .queries
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .collect();
    Ok(d)
}

pub fn parse_draft(content: &str) -> Result<ReportDraft, UpstreamError> {
    let mut draft: ReportDraft = serde_json::from_str(strip_code_fences(content))
        .map_err(|e| parse_error("report draft", e))?;
    draft.sections = draft
        .sections
        .into_iter()
        .filter(|s| !s.title.trim().is_empty() || !s.text.trim().is_empty())
        .map(|s| SectionDraft {
            title: s.title.trim().to_string(),
            text: s.text.trim().to_string(),
        })
        .collect();
    Ok(draft)
}

#[derive(Deserialize)]
struct ReviewPayload {
    confidence: f64,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    issues: Vec<String>,
    #[serde(default)]
    weak_citations: Option<serde_json::Value>,
}

pub fn parse_assessment(content: &str) -> Result<SectionAssessment, UpstreamError> {
    let p: ReviewPayload = serde_json::from_str(strip_code_fences(content))
        .map_err(|e| parse_error("section review", e))?;

    let mut issues: Vec<String> = p
        .issues
        .into_iter()
        .map(|i| i.trim().to_string())
        .filter(|i| !i.is_empty())
        .collect();

    // Side field only: a bad list is noted, the assessment stands.
    if let Some(raw) = p.weak_citations {
        match parse_index_list(&raw.to_string()) {
            Ok(ids) => {
                for id in ids {
                    issues.push(format!("citation [{}] does not support the text", id));
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unparseable weak_citations");
                issues.push("unparseable weak_citations".to_string());
            }
        }
    }

    Ok(SectionAssessment {
        confidence: p.confidence,
        reasoning: p.reasoning.trim().to_string(),
        issues,
    })
}

fn render_sources(sources: &[SourceItem]) -> String {
    let mut out = String::new();
    for s in sources {
        out.push_str(&format!("[{}] {} <{}>", s.id, s.title, s.url));
        if let Some(date) = &s.date {
            out.push_str(&format!(" ({})", date));
        }
        out.push('\n');
        if !s.snippet.is_empty() {
            out.push_str(truncate(&s.snippet, MAX_SNIPPET_CHARS));
            out.push('\n');
        }
    }
    out
}

#[async_trait]
impl ResearchModel for ChatModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate_queries(&self, topic: &str, count: usize) -> Result<Vec<String>> {
        let user = format!("Topic: {}\nNumber of queries: {}", topic, count);
        let content = self.complete_json(PLAN_PROMPT, &user).await?;
        Ok(parse_queries(&content, count)?)
    }

    async fn summarize_source(&self, topic: &str, source: &SourceItem) -> Result<String> {
        let user = format!(
            "Topic: {}\n\nSource:\n{}",
            topic,
            render_sources(std::slice::from_ref(source))
        );
        let content = self.complete_json(SUMMARIZE_PROMPT, &user).await?;
        Ok(parse_summary(&content)?)
    }

    async fn decide_follow_up(&self, digest: &FindingsDigest) -> Result<FollowUpDecision> {
        let content = self
            .complete_json(FOLLOW_UP_PROMPT, &digest.render())
            .await?;
        Ok(parse_decision(&content)?)
    }

    async fn draft_report(
        &self,
        topic: &str,
        summaries: &[SearchResult],
        sources: &[SourceItem],
    ) -> Result<ReportDraft> {
        let mut user = format!("Topic: {}\n\nSource summaries:\n", topic);
        for s in summaries {
            user.push_str(&format!("[{}] {} <{}>\n{}\n\n", s.id, s.title, s.url, s.summary));
        }
        let summarized: std::collections::HashSet<u32> = summaries.iter().map(|s| s.id).collect();
        let rest: Vec<SourceItem> = sources
            .iter()
            .filter(|s| !summarized.contains(&s.id))
            .cloned()
            .collect();
        if !rest.is_empty() {
            user.push_str("Other sources:\n");
            user.push_str(&render_sources(&rest));
        }
        let content = self.complete_json(DRAFT_PROMPT, &user).await?;
        Ok(parse_draft(&content)?)
    }

    async fn review_section(
        &self,
        topic: &str,
        section: &Section,
        cited: &[SourceItem],
    ) -> Result<SectionAssessment> {
        let user = format!(
            "Topic: {}\n\nSection: {}\n{}\n\nCited sources:\n{}",
            topic,
            section.title,
            section.text,
            if cited.is_empty() {
                "(none)\n".to_string()
            } else {
                render_sources(cited)
            }
        );
        let content = self.complete_json(REVIEW_PROMPT, &user).await?;
        Ok(parse_assessment(&content)?)
    }
}
