//! # Deep Research CLI (`research`)
//!
//! ## Usage
//!
//! ```bash
//! research --config ./config/research.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `research init` | Create the cache database and schema |
//! | `research run --topic "<T>"` | Run a full multi-wave research job |
//! | `research plan --topic "<T>"` | Print the queries wave 1 would run |
//! | `research cache stats\|cleanup\|clear` | Inspect or maintain the search cache |
//!
//! ## Examples
//!
//! ```bash
//! # Review the generated plan, then run with the approved queries
//! research plan --topic "AI in Healthcare" --queries 4
//! research run --topic "AI in Healthcare" \
//!     --query "AI radiology triage accuracy" --query "FDA AI medical device approvals"
//!
//! # JSON output to a file, no cache, machine-readable progress
//! research run --topic "Grid-scale storage" --format json --output out/storage.json \
//!     --no-cache --progress json
//! ```
//!
//! ## Exit codes
//!
//! `0` on success, `2` for configuration or credential problems, `1` for any
//! other failure.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use deep_research::cache::{self, CacheManager};
use deep_research::config::{self, Config};
use deep_research::error::FailureKind;
use deep_research::llm::ChatModel;
use deep_research::migrate;
use deep_research::orchestrator::{plan_queries, Orchestrator, ResearchRequest};
use deep_research::progress::ProgressMode;
use deep_research::report::{self, OutputFormat};
use deep_research::retry::RetryPolicy;
use deep_research::search_http::HttpSearchProvider;
use deep_research_core::provider::{ResearchModel, SearchProvider};

/// Deep Research: multi-wave web research with cited, confidence-scored reports.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/research.example.toml` for every option.
#[derive(Parser)]
#[command(
    name = "research",
    about = "Deep Research: plan, search, deduplicate, summarize, synthesize, and verify cited reports",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/research.toml`. When the file does not exist
    /// the built-in defaults are used.
    #[arg(long, global = true, default_value = "./config/research.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the cache database. Safe to run repeatedly.
    Init,

    /// Run a research job and print or save the report.
    Run {
        /// Research topic.
        #[arg(long)]
        topic: String,

        /// Number of search queries per wave.
        #[arg(long)]
        queries: Option<usize>,

        /// Maximum number of distinct sources (capped by `research.hard_source_cap`).
        #[arg(long)]
        max_sources: Option<usize>,

        /// Maximum number of search waves, including the first.
        #[arg(long)]
        max_waves: Option<u32>,

        /// Pre-approved wave-1 query. Repeat for several; skips query generation.
        #[arg(long = "query")]
        approved: Vec<String>,

        /// Write the report here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "md")]
        format: OutputFormat,

        /// Skip the search cache for this run.
        #[arg(long)]
        no_cache: bool,

        /// Progress on stderr. Defaults to `human` on a terminal, `off` otherwise.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Print the wave-1 queries for a topic without searching.
    ///
    /// Edit the list and pass it back to `research run` with `--query`.
    Plan {
        #[arg(long)]
        topic: String,

        #[arg(long)]
        queries: Option<usize>,
    },

    /// Inspect or maintain the search cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show entry counts and settings.
    Stats,
    /// Delete expired and long-unused entries.
    Cleanup,
    /// Delete every entry.
    Clear,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let cfg = match config::load_or_default(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return ExitCode::from(2);
        }
    };

    match dispatch(cli.command, &cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let kind = FailureKind::classify(&e);
            eprintln!("{}", kind.headline());
            eprintln!("Error: {:#}", e);
            ExitCode::from(kind.exit_code() as u8)
        }
    }
}

async fn dispatch(command: Commands, cfg: &Config) -> anyhow::Result<()> {
    match command {
        Commands::Init => {
            migrate::run_migrations(&cfg.cache.path).await?;
            println!("Cache database initialized at {}.", cfg.cache.path.display());
        }
        Commands::Run {
            topic,
            queries,
            max_sources,
            max_waves,
            approved,
            output,
            format,
            no_cache,
            progress,
        } => {
            let search: Arc<dyn SearchProvider> = Arc::new(HttpSearchProvider::new(&cfg.search)?);
            let model: Arc<dyn ResearchModel> = Arc::new(ChatModel::new(&cfg.llm)?);

            let mut orchestrator = Orchestrator::new(search, model, cfg.research.clone())
                .with_retry(RetryPolicy::from_config(&cfg.retry));
            if cfg.cache.enabled && !no_cache {
                orchestrator = orchestrator.with_cache(Arc::new(CacheManager::open(&cfg.cache).await?));
            }

            let request = ResearchRequest {
                topic,
                approved_queries: (!approved.is_empty()).then_some(approved),
                query_count: queries,
                max_sources,
                max_waves,
            };
            let reporter = progress
                .unwrap_or_else(ProgressMode::default_for_tty)
                .reporter();

            let outcome = orchestrator.run(request, reporter.as_ref()).await?;
            let rendered = report::render(&outcome, format)?;
            report::write_output(&rendered, output.as_deref())?;
        }
        Commands::Plan { topic, queries } => {
            let model = ChatModel::new(&cfg.llm)?;
            let count = queries.unwrap_or(cfg.research.queries_per_wave).max(1);
            let retry = RetryPolicy::from_config(&cfg.retry);
            let (planned, generated) = plan_queries(&model, &retry, topic.trim(), None, count).await;
            if !generated {
                eprintln!("Query generation failed; falling back to the topic.");
            }
            for q in planned {
                println!("{}", q);
            }
        }
        Commands::Cache { action } => {
            let action = match action {
                CacheAction::Stats => "stats",
                CacheAction::Cleanup => "cleanup",
                CacheAction::Clear => "clear",
            };
            cache::run_cache_command(&cfg.cache, action).await?;
        }
    }
    Ok(())
}
