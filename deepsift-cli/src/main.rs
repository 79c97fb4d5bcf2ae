//! Deepsift CLI: run expanded retrieval over a local corpus.
//!
//! Streams rewrite tokens and backend responses to stderr while the pipeline
//! runs, then prints the final result as JSON on stdout.

mod commands;
mod corpus;

use clap::Parser;
use deepsift_core::SubQuestionId;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Deepsift: rewrite, retrieve, verify and rerank
#[derive(Parser, Debug)]
#[command(name = "deepsift", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (looked up for `.deepsift/config.toml`)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run expanded retrieval for a question against a corpus file
    Ask(AskArgs),
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug)]
struct AskArgs {
    /// Question to expand and retrieve for
    question: String,

    /// Corpus file: a JSON array (or JSON lines) of sections or chunks
    #[arg(short, long)]
    corpus: PathBuf,

    /// Original search request, when `question` is a generated sub-question
    #[arg(long)]
    search_request: Option<String>,

    /// Sub-question identity as `level_nr` (e.g. `1_2`); defaults to `0_0`
    #[arg(long)]
    sub_question: Option<SubQuestionId>,

    /// LLM model to use
    #[arg(short, long)]
    model: Option<String>,

    /// Compute retrieval and rerank fit statistics
    #[arg(long)]
    stats: bool,

    /// Do not stream progress events to stderr
    #[arg(long)]
    no_events: bool,
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create default configuration file
    Init,
    /// Show current configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "deepsift", "deepsift")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "deepsift.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace, cli.quiet).await
}
