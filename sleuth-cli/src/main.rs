//! Sleuth CLI: run web research from the terminal, serve the research API,
//! and diagnose connectivity to the Gemini API.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Sleuth: iterative, cited web research powered by Gemini
#[derive(Parser, Debug)]
#[command(name = "sleuth", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (where `.sleuth/config.toml` and `.env` live)
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Model to use for every research step
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// LLM provider: gemini or mock
    #[arg(long, global = true)]
    provider: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Research a question and print a cited answer
    Research {
        /// The question to research
        question: String,
        /// Number of search queries on the first pass
        #[arg(long)]
        initial_queries: Option<usize>,
        /// Maximum reflection passes
        #[arg(long)]
        max_loops: Option<usize>,
        /// Model for reflection and the final answer
        #[arg(long)]
        reasoning_model: Option<String>,
        /// Print the final state as JSON
        #[arg(long)]
        json: bool,
        /// Also write the final state as JSON to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Stream a single answer from the model
    Ask {
        /// Prompt to send
        prompt: String,
        /// Let the model use Google Search
        #[arg(long)]
        grounded: bool,
    },
    /// Serve the thread/run HTTP API
    Serve {
        /// Address to bind (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Check API key, proxy, DNS and connectivity to the Gemini API
    Doctor {
        /// Skip the live generation request
        #[arg(long)]
        offline: bool,
    },
    /// Write a `.env` file with the API key variable
    InitEnv {
        /// API key to store
        #[arg(long)]
        api_key: Option<String>,
        /// Overwrite an existing `.env`
        #[arg(long)]
        force: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create a default configuration file in the workspace
    Init,
    /// Show the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Resolve workspace
    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    // Load .env file if present: workspace first, then the usual lookup
    let _ = dotenvy::from_path(workspace.join(".env")).or_else(|_| dotenvy::dotenv().map(|_| ()));

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn,sleuth_core=info",
        1 => "debug",
        _ => "trace",
    };

    // Human-readable layer for stderr (always active)
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "sleuth", "sleuth")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "sleuth.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let overrides = commands::Overrides {
        model: cli.model,
        provider: cli.provider,
        quiet: cli.quiet,
    };
    commands::handle_command(cli.command, &workspace, &overrides).await
}
