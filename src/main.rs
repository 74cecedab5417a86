mod cli;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docmigrate=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let database = cli.database.as_deref();

    match cli.command {
        Commands::Batch {
            source,
            destination,
            batch_size,
            page_size,
        } => {
            cli::run_batch(database, source, destination, batch_size, page_size).await?;
        }
        Commands::Status { collection } => {
            cli::show_status(database, &collection)?;
        }
        Commands::Versions => {
            cli::list_versions();
        }
    }

    Ok(())
}
