//! Research run progress reporting.
//!
//! The orchestrator emits a [`ResearchEvent`] at each step of a run
//! (planning, every search, merges, summaries, the follow-up decision,
//! synthesis and verification). Progress is written to **stderr** so stdout
//! stays reserved for the report.
//!
//! [`ChannelProgress`] forwards events to a tokio channel instead; a caller
//! that drops the receiving end cancels the run after the current wave.

use serde::Serialize;
use std::io::Write;
use tokio::sync::mpsc;

/// A single progress event for a research run.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ResearchEvent {
    Planned {
        queries: Vec<String>,
        generated: bool,
    },
    WaveStarted {
        wave: u32,
        queries: usize,
    },
    QuerySearched {
        wave: u32,
        query: String,
        hits: usize,
        cache_hit: bool,
    },
    QueryFailed {
        wave: u32,
        query: String,
        error: String,
    },
    SourcesMerged {
        wave: u32,
        added: usize,
        duplicates: usize,
        total: usize,
    },
    SourceSummarized {
        wave: u32,
        id: u32,
        fallback: bool,
    },
    FollowUpDecided {
        wave: u32,
        needs_more: bool,
        queries: Vec<String>,
    },
    Synthesizing {
        sources: usize,
        summaries: usize,
    },
    Verified {
        sections: usize,
        overall_confidence: f64,
    },
}

/// Receives progress from the orchestrator.
pub trait ResearchProgressReporter: Send + Sync {
    fn report(&self, event: ResearchEvent);

    /// Whether the consumer has gone away. Checked between waves.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Human-friendly progress on stderr: "wave 1  searching  3 queries".
pub struct StderrProgress;

impl StderrProgress {
    fn line(event: &ResearchEvent) -> String {
        match event {
            ResearchEvent::Planned { queries, generated } => {
                let origin = if *generated { "generated" } else { "approved" };
                let mut s = format!("plan  {} {} queries\n", queries.len(), origin);
                for q in queries {
                    s.push_str(&format!("  - {}\n", q));
                }
                s
            }
            ResearchEvent::WaveStarted { wave, queries } => {
                format!("wave {}  searching  {} queries\n", wave, queries)
            }
            ResearchEvent::QuerySearched {
                wave,
                query,
                hits,
                cache_hit,
            } => format!(
                "wave {}  {}  {} hits  \"{}\"\n",
                wave,
                if *cache_hit { "cached" } else { "searched" },
                hits,
                query
            ),
            ResearchEvent::QueryFailed { wave, query, error } => {
                format!("wave {}  failed  \"{}\": {}\n", wave, query, error)
            }
            ResearchEvent::SourcesMerged {
                wave,
                added,
                duplicates,
                total,
            } => format!(
                "wave {}  sources  +{} new, {} duplicate, {} total\n",
                wave, added, duplicates, total
            ),
            ResearchEvent::SourceSummarized { wave, id, fallback } => {
                if *fallback {
                    format!("wave {}  summarized  [{}] (snippet fallback)\n", wave, id)
                } else {
                    format!("wave {}  summarized  [{}]\n", wave, id)
                }
            }
            ResearchEvent::FollowUpDecided {
                wave,
                needs_more,
                queries,
            } => {
                if *needs_more && !queries.is_empty() {
                    format!("wave {}  follow-up  {} new queries\n", wave, queries.len())
                } else {
                    format!("wave {}  follow-up  done\n", wave)
                }
            }
            ResearchEvent::Synthesizing { sources, summaries } => format!(
                "synthesize  {} sources, {} summaries\n",
                sources, summaries
            ),
            ResearchEvent::Verified {
                sections,
                overall_confidence,
            } => format!(
                "verify  {} sections  overall confidence {:.2}\n",
                sections, overall_confidence
            ),
        }
    }
}

impl ResearchProgressReporter for StderrProgress {
    fn report(&self, event: ResearchEvent) {
        let line = Self::line(&event);
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ResearchProgressReporter for JsonProgress {
    fn report(&self, event: ResearchEvent) {
        if let Ok(line) = serde_json::to_string(&event) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ResearchProgressReporter for NoProgress {
    fn report(&self, _event: ResearchEvent) {}
}

/// Forwards events into an unbounded channel.
pub struct ChannelProgress {
    tx: mpsc::UnboundedSender<ResearchEvent>,
}

impl ChannelProgress {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ResearchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ResearchProgressReporter for ChannelProgress {
    fn report(&self, event: ResearchEvent) {
        let _ = self.tx.send(event);
    }

    fn is_cancelled(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ResearchProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
