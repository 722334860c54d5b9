//! # SOTAforge CLI (`sota`)
//!
//! Runs the state-of-the-art pipeline from the terminal or serves it over
//! HTTP.
//!
//! ## Usage
//!
//! ```bash
//! sota --config ./config/sota.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sota run <topic...>` | Run the pipeline and print the report as JSON |
//! | `sota serve` | Start the HTTP API |
//! | `sota init` | Create the SQLite database schema |
//! | `sota tools` | List the tools exposed to the model |
//!
//! ## Examples
//!
//! ```bash
//! # Print only the Markdown report, progress as JSON lines on stderr
//! sota run "edge computing" --text --progress json
//!
//! # Debug logs for one run
//! RUST_LOG=sotaforge=debug sota run retrieval augmented generation
//! ```
//!
//! `OPENAI_API_KEY` and `SERPER_API_KEY` are read from the environment,
//! after loading `.env.secrets` and `.env` if present.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use clap::{Parser, Subcommand, ValueEnum};

use sotaforge::config::{self, Config, DEFAULT_CONFIG_PATH};
use sotaforge::llm::OpenAiChat;
use sotaforge::pipeline::{Orchestrator, RunContext};
use sotaforge::progress::{drain_to_reporter, ProgressMode, ProgressSink};
use sotaforge::sqlite_store::SqliteDocumentStore;
use sotaforge::tools::ToolRegistry;
use sotaforge::{db, migrate, server};

/// SOTAforge: search, filter, parse, analyze and synthesize a
/// state-of-the-art report on any research topic.
#[derive(Parser)]
#[command(
    name = "sota",
    version,
    about = "SOTAforge: LLM-driven state-of-the-art report generator",
    long_about = None
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// A missing file at the default path means built-in defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Where run progress goes. `auto` picks human output on a TTY and JSON
/// lines otherwise. Progress always goes to stderr.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProgressArg {
    Auto,
    Human,
    Json,
    Off,
}

impl ProgressArg {
    fn mode(self) -> ProgressMode {
        match self {
            ProgressArg::Auto => ProgressMode::default_for_tty(),
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
            ProgressArg::Off => ProgressMode::Off,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline for a topic.
    ///
    /// Documents are kept in a fresh namespace of the SQLite database. The
    /// result `{topic, status, text}` is printed to stdout as JSON.
    Run {
        /// Research topic; multiple words are joined with spaces.
        #[arg(required = true)]
        topic: Vec<String>,

        /// Print only the report text.
        #[arg(long)]
        text: bool,

        #[arg(long, value_enum, default_value = "auto")]
        progress: ProgressArg,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// List the tools exposed to the model, with their parameter schemas.
    Tools,
}

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = match cli.verbose {
        0 => "sotaforge=info",
        1 => "sotaforge=debug",
        _ => "sotaforge=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

async fn run_pipeline(
    cfg: Config,
    topic: &str,
    text_only: bool,
    progress: ProgressMode,
) -> anyhow::Result<()> {
    let missing = Config::missing_api_keys();
    if !missing.is_empty() {
        bail!("Missing required API keys: {}", missing.join(", "));
    }

    let llm = Arc::new(OpenAiChat::from_env(&cfg.llm)?);
    let pool = db::connect(&cfg).await?;
    migrate::migrate_pool(&pool).await?;

    let run_id = uuid::Uuid::new_v4().to_string();
    let store = Arc::new(SqliteDocumentStore::new(pool, run_id.clone()));
    let (sink, events) = ProgressSink::channel(cfg.pipeline.progress_capacity);
    let reporter = tokio::spawn(drain_to_reporter(events, progress.reporter()));

    let run = RunContext::new(run_id, store, sink);
    let cancel = run.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current stage");
            cancel.cancel();
        }
    });

    let orchestrator = Orchestrator::new(
        llm,
        Arc::new(ToolRegistry::with_pipeline_tools()),
        Arc::new(cfg),
    );
    let outcome = orchestrator.run(topic, &run).await;

    // Closing the last sender lets the reporter finish.
    drop(run);
    let _ = reporter.await;

    let report = outcome?;
    if text_only {
        println!("{}", report.text);
    } else {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::from_filename(".env.secrets");
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(&cli);

    let cfg = config::load_config_or_default(&cli.config)?;

    match cli.command {
        Commands::Run {
            topic,
            text,
            progress,
        } => {
            run_pipeline(cfg, &topic.join(" "), text, progress.mode()).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Tools => {
            let registry = ToolRegistry::with_pipeline_tools();
            println!("{}", serde_json::to_string_pretty(&registry.infos())?);
        }
    }

    Ok(())
}
