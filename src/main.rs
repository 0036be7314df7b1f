use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use conductor::config::{CliOverrides, Config};

mod cmd;

#[derive(Parser)]
#[command(name = "conductor")]
#[command(version, about = "Requirements, code generation and validation driven by AI agents")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding artifacts and logs (default: current directory)
    #[arg(long, global = true)]
    pub work_dir: Option<PathBuf>,

    /// Path to the config file (default: <work-dir>/conductor.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// AI project endpoint. Overrides AZURE_AI_PROJECT_ENDPOINT.
    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the whole pipeline in the terminal
    Run {
        /// What to build. Prompted for if omitted.
        #[arg(short, long)]
        request: Option<String>,
        /// Keep artifacts of a previous run
        #[arg(long)]
        no_clean: bool,
        /// Pre-recorded answer to a requirements question (repeatable)
        #[arg(long = "answer")]
        answers: Vec<String>,
        /// Never prompt; questions beyond the recorded answers get the default reply
        #[arg(long)]
        unattended: bool,
    },
    /// Serve the pipeline over HTTP, one step per request
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
        /// Bind on all interfaces and allow cross-origin requests
        #[arg(long)]
        dev: bool,
    },
    /// Show artifact status and the latest log file
    Status,
    /// Delete artifacts of a previous run
    Clean,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let work_dir = match cli.work_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    // A .env next to the artifacts never overrides the real environment
    if let Err(e) = dotenvy::from_path(work_dir.join(".env"))
        && !e.not_found()
    {
        return Err(e).context("Failed to load .env");
    }

    init_tracing(cli.verbose);

    let port = match &cli.command {
        Commands::Serve { port, .. } => *port,
        _ => None,
    };
    let config = Config::load(CliOverrides {
        work_dir: Some(work_dir),
        config_file: cli.config.clone(),
        endpoint: cli.endpoint.clone(),
        port,
        verbose: cli.verbose,
    })?;

    match cli.command {
        Commands::Run {
            request,
            no_clean,
            answers,
            unattended,
        } => {
            let success = cmd::cmd_run(
                config,
                cmd::RunArgs {
                    request,
                    no_clean,
                    answers,
                    unattended,
                },
            )
            .await?;
            if !success {
                std::process::exit(1);
            }
        }
        Commands::Serve { dev, .. } => cmd::cmd_serve(config, dev).await?,
        Commands::Status => cmd::cmd_status(&config)?,
        Commands::Clean => cmd::cmd_clean(&config)?,
    }

    Ok(())
}
