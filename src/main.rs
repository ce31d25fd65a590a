use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use symgraph::cli::{self, OutputFormat};
use symgraph::config::Config;

#[derive(Parser)]
#[command(name = "symgraph")]
#[command(version)]
#[command(about = "Incremental symbol graph with dependency and change-impact analysis", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project directory
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a project
    Index {
        /// Re-parse every file, ignoring stored hashes
        #[arg(short, long)]
        rebuild: bool,

        /// Parser workers (default from config)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Keep watching for changes after indexing
        #[arg(long)]
        watch: bool,
    },

    /// Watch an indexed project and re-index changed files
    Watch,

    /// Query the index
    Query {
        /// Query type: callers, callees, references, dependencies, search
        query_type: String,

        /// Target symbol, or search text
        target: String,

        /// Restrict search results to one symbol kind
        #[arg(short, long)]
        kind: Option<String>,

        /// Maximum search results
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show the dependency graph of a symbol
    Deps {
        symbol: String,

        /// Traversal depth (default from config)
        #[arg(long)]
        depth: Option<usize>,
    },

    /// Analyze the impact of a change
    Impact {
        /// Change type: rename, delete, modify
        change_type: String,

        /// Target symbol
        target: String,

        /// New name (rename) or new signature (modify)
        #[arg(short, long)]
        to: Option<String>,
    },

    /// Run semantic checks over the whole project
    Analyze,

    /// Show index statistics
    Stats {
        /// Break counts down by kind, language and relationship type
        #[arg(long)]
        detailed: bool,
    },

    /// List supported languages
    Languages,
}

fn init_logging(debug: bool, verbose: bool, config: &Config) {
    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        config.logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if config.logging.format == "compact" {
        builder.compact().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::from_project_dir(&cli.project);
    init_logging(cli.debug, cli.verbose, &config);

    debug!("symgraph {} on {}", env!("CARGO_PKG_VERSION"), cli.project.display());

    let project = cli.project;
    let format = cli.format;

    match cli.command {
        Commands::Index { rebuild, workers, watch } => {
            cli::index::index_project(project, rebuild, workers, watch, format).await?;
        }

        Commands::Watch => {
            cli::index::watch_project(project).await?;
        }

        Commands::Query {
            query_type,
            target,
            kind,
            limit,
        } => {
            cli::query::query_index(query_type, target, project, kind, limit, format).await?;
        }

        Commands::Deps { symbol, depth } => {
            cli::query::show_deps(symbol, depth, project, format).await?;
        }

        Commands::Impact { change_type, target, to } => {
            cli::impact::analyze_impact(change_type, target, to, project, format).await?;
        }

        Commands::Analyze => {
            cli::analyze::analyze_project(project, format).await?;
        }

        Commands::Stats { detailed } => {
            cli::stats::show_stats(project, detailed, format).await?;
        }

        Commands::Languages => {
            cli::languages::list_languages();
        }
    }

    Ok(())
}
