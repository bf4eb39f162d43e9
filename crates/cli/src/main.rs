//! Vellum CLI - the vellum command

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use vellum_store::Store;

mod cmd;

/// Vellum - versioned key-value store on a git object database
#[derive(Parser)]
#[command(name = "vellum")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Repository path
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Branch to read and write
    #[arg(long, default_value = "main")]
    branch: String,

    /// Treat the repository path as a bare git directory
    #[arg(long)]
    bare: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show snapshot history
    Log {
        /// Number of commits to show (default: 20)
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Print the value stored at a path
    Get {
        /// Store path, e.g. config/app.yml
        path: String,
    },
    /// Set a value at a path and commit
    Set {
        /// Store path, e.g. config/app.yml
        path: String,
        /// Value; parsed as YAML for .yml paths, stored verbatim otherwise
        value: String,
        /// Commit message
        #[arg(short, long, default_value = "update")]
        message: String,
    },
    /// Delete the value at a path and commit
    Rm {
        /// Store path to remove
        path: String,
        /// Commit message
        #[arg(short, long, default_value = "delete")]
        message: String,
    },
    /// List every stored path
    Ls,
    /// Show a raw object by id or unique id prefix
    Show {
        /// Object id (40 hex chars) or commit id prefix
        id: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut store = Store::open(&cli.repo, &cli.branch, cli.bare)?;

    match cli.command {
        Commands::Log { limit } => cmd::log::run(&store, limit),
        Commands::Get { path } => cmd::get::run(&store, &path),
        Commands::Set { path, value, message } => cmd::set::run(&mut store, &path, &value, &message),
        Commands::Rm { path, message } => cmd::rm::run(&mut store, &path, &message),
        Commands::Ls => cmd::ls::run(&store),
        Commands::Show { id } => cmd::show::run(&store, &id),
    }
}
