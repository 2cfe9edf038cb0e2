mod commands;

use std::path::PathBuf;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "sysunit")]
#[command(about = "Declarative systemd unit file deployment")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write unit files, reload systemd and start services from a manifest
    Apply {
        /// Path to the JSON manifest
        #[arg(long, short = 'm')]
        manifest: PathBuf,

        /// Show what would be done without changing anything
        #[arg(long, short = 'n')]
        dry_run: bool,

        /// Leave file owner and group alone (for unprivileged runs)
        #[arg(long)]
        no_ownership: bool,
    },

    /// Validate every unit of a manifest
    Check {
        /// Path to the JSON manifest
        #[arg(long, short = 'm')]
        manifest: PathBuf,
    },

    /// Print the .service file for one unit
    Render {
        /// Unit name (without ".service")
        name: String,

        /// Parameters as a JSON object
        #[arg(long)]
        params: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    ).init();

    let args = Args::parse();

    match args.command {
        Command::Apply { manifest, dry_run, no_ownership } => {
            commands::apply(&manifest, dry_run, no_ownership).await?;
        }
        Command::Check { manifest } => {
            commands::check(&manifest).await?;
        }
        Command::Render { name, params } => {
            commands::render(&name, params.as_deref()).await?;
        }
    }

    Ok(())
}
