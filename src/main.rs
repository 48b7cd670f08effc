//! evidencesync - Incremental sync and analysis of work evidence
//!
//! Pulls merged pull requests and resolved tickets into a local store,
//! classifies them with an LLM, and reports on them month by month.

use anyhow::Result;
use evidencesync::cli::{
    criteria, handle_config, init, list_jobs, show_job, show_snapshot, sync, watch, Cli, Commands,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let home = cli.home_dir();
    let format = cli.format;

    // Execute command
    match cli.command {
        Commands::Init(args) => {
            init(&home, args.force)?;
        }

        Commands::Sync(args) => {
            sync(&home, args.source.into(), &args, format).await?;
        }

        Commands::Job(args) => {
            show_job(&home, &args.id, format)?;
        }

        Commands::Jobs(args) => {
            list_jobs(&home, args.limit, format)?;
        }

        Commands::Watch(args) => {
            watch(&home, &args.id, args.interval_ms, args.max_attempts, format).await?;
        }

        Commands::Criteria(command) => {
            criteria(&home, &command, format)?;
        }

        Commands::Snapshot(args) => {
            show_snapshot(&home, &args.month, args.force, format)?;
        }

        Commands::Config(args) => {
            handle_config(&home, args.show, args.reset)?;
        }
    }

    Ok(())
}
