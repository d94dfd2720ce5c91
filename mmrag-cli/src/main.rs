//! mmrag CLI: run multimodal RAG over a question set and score the answers.
//!
//! `run` retrieves, optionally poisons, generates and writes a results file;
//! `eval` prints the exact-match summary of a results file.

mod commands;

use clap::Parser;
use mmrag_core::PoolStrategy;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// mmrag: robustness of multimodal RAG to poisoned captions
#[derive(Parser, Debug)]
#[command(name = "mmrag", version, about, long_about = None)]
struct Cli {
    /// Workspace directory; relative dataset and output paths resolve against it
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path (defaults to <workspace>/mmrag.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Answer every question and write the results file
    Run(RunArgs),
    /// Print exact-match accuracy for a results file
    Eval {
        /// Results JSON written by `mmrag run`
        results: PathBuf,

        /// Require exact normalized equality (no singular/plural tolerance)
        #[arg(long)]
        no_plural: bool,

        /// Score records with an empty model answer instead of skipping them
        #[arg(long)]
        lenient: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Overrides applied on top of the loaded configuration.
#[derive(clap::Args, Debug, Default)]
struct RunArgs {
    /// Text pool strategy: clean, poisoned or corpus
    #[arg(short, long)]
    strategy: Option<PoolStrategy>,

    /// Results file path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Images passed to the generator per question
    #[arg(long)]
    top_k_images: Option<usize>,

    /// Texts placed in the prompt per question
    #[arg(long)]
    top_k_texts: Option<usize>,

    /// Only process the first N questions
    #[arg(short = 'n', long)]
    limit: Option<usize>,
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

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "mmrag", "mmrag")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "mmrag.log");
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

    commands::handle_command(cli.command, &workspace, cli.config.as_deref()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eval_requires_results_path() {
        let err = Cli::try_parse_from(["mmrag", "eval"]).unwrap_err();
        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::MissingRequiredArgument
        );
    }

    #[test]
    fn test_parse_run_overrides() {
        let cli = Cli::try_parse_from([
            "mmrag",
            "-vv",
            "-w",
            "/data",
            "run",
            "--strategy",
            "clean",
            "--top-k-texts",
            "5",
            "-n",
            "10",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.workspace, PathBuf::from("/data"));
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.strategy, Some(PoolStrategy::CleanCaptions));
        assert_eq!(args.top_k_texts, Some(5));
        assert_eq!(args.top_k_images, None);
        assert_eq!(args.limit, Some(10));
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        assert!(Cli::try_parse_from(["mmrag", "run", "--strategy", "mystery"]).is_err());
    }

    #[test]
    fn test_eval_flags() {
        let cli =
            Cli::try_parse_from(["mmrag", "eval", "out.json", "--no-plural", "--lenient"]).unwrap();
        match cli.command {
            Commands::Eval {
                results,
                no_plural,
                lenient,
            } => {
                assert_eq!(results, PathBuf::from("out.json"));
                assert!(no_plural);
                assert!(lenient);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
