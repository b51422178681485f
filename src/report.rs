//! Markdown and JSON rendering of a finished research run.
//!
//! The References list is built only from the run's source index: it holds
//! exactly the IDs cited by at least one section, in ascending order.

use anyhow::Result;
use std::fmt::Write as _;
use std::path::Path;

use deep_research_core::models::ResearchReport;

use crate::orchestrator::ResearchOutcome;

/// Output format for `research run`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum OutputFormat {
    Md,
    Json,
}

pub fn render_markdown(report: &ResearchReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {}\n", report.topic);

    if let Some(overall) = report.overall_confidence {
        let _ = writeln!(out, "_Overall confidence: {:.2}_\n", overall);
    }

    if !report.outline.is_empty() {
        out.push_str("## Outline\n\n");
        for item in &report.outline {
            let _ = writeln!(out, "- {}", item);
        }
        out.push('\n');
    }

    for (i, section) in report.sections.iter().enumerate() {
        let _ = writeln!(out, "## {}. {}\n", i + 1, section.title);
        let _ = writeln!(out, "{}\n", section.text.trim());
        if let Some(conf) = section.confidence {
            let _ = writeln!(out, "_Confidence: {:.2}_\n", conf);
        }
    }

    if !report.notes.is_empty() {
        out.push_str("## Notes\n\n");
        for note in &report.notes {
            let _ = writeln!(out, "- {}", note);
        }
        out.push('\n');
    }

    let cited = report.cited_ids();
    if !cited.is_empty() {
        out.push_str("## References\n\n");
        for id in cited {
            if let Some(source) = report.source(id) {
                let _ = writeln!(out, "[{}] {} — <{}>", id, source.title, source.url);
            }
        }
    }

    out
}

pub fn render_json(outcome: &ResearchOutcome) -> Result<String> {
    Ok(serde_json::to_string_pretty(outcome)?)
}

pub fn render(outcome: &ResearchOutcome, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Md => Ok(render_markdown(&outcome.report)),
        OutputFormat::Json => render_json(outcome),
    }
}

/// Write to `path` (creating parent directories) or to stdout.
pub fn write_output(content: &str, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(path, content)?;
            eprintln!("Report written to {}", path.display());
        }
        None => print!("{}", content),
    }
    Ok(())
}
