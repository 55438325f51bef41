use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{log, rollback, serve, show, status, undo};

#[derive(Parser)]
#[command(name = "entrev")]
#[command(
    version,
    about = "Change history, undo and rollback for site entities",
    long_about = None
)]
struct Cli {
    /// Config file (defaults to <root>/.entrev/config.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Site root that relative paths resolve against
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Port for the API server
        #[arg(short, long, default_value = "3030")]
        port: u16,
    },

    /// Show commit history, newest first
    Log {
        /// Page to show, starting at 0
        #[arg(long, default_value = "0")]
        page: usize,

        /// Commits per page
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show the field changes of a commit
    Show {
        /// Commit hash
        hash: String,
    },

    /// Show tracked entities and undoable commits
    Status,

    /// Undo one or more commits
    Undo {
        /// Commit hashes to undo together
        #[arg(required = true)]
        hashes: Vec<String>,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Roll back to a specific commit
    Rollback {
        /// Commit hash to roll back to
        hash: String,

        /// Actually perform the rollback (without this, just shows preview)
        #[arg(long)]
        execute: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = commands::load_config(cli.config, cli.root)?;

    match cli.command {
        Commands::Serve { port } => {
            serve::run(config, port).await?;
        }
        Commands::Log { page, limit } => {
            log::run(config, page, limit).await?;
        }
        Commands::Show { hash } => {
            show::run(config, hash).await?;
        }
        Commands::Status => {
            status::run(config).await?;
        }
        Commands::Undo { hashes, yes } => {
            undo::run(config, hashes, yes).await?;
        }
        Commands::Rollback { hash, execute } => {
            rollback::run(config, hash, execute).await?;
        }
    }

    Ok(())
}
