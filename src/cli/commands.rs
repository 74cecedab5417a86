use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use docmigrate::config::parse_positive;
use docmigrate::{
    run_batch_job, BatchConfig, DocumentStore, Filter, MigrateError, MigrationRegistry,
    SqliteDatabase,
};

#[derive(Parser)]
#[command(name = "docmigrate")]
#[command(about = "Upgrade stored documents to the latest schema version")]
#[command(version)]
#[command(after_long_help = r#"
EXAMPLES:
    # Migrate every user document into a fresh collection, 100 per write
    docmigrate --database app.db batch --source users --destination users_v1 --batch-size 100

    # Same, configured from the environment
    DOCMIGRATE_DATABASE=app.db SOURCE_COLLECTION=users \
    DESTINATION_COLLECTION=users BATCH_SIZE=100 docmigrate batch

    # How many documents are still behind each version
    docmigrate --database app.db status --collection users

    # List the built-in migrations
    docmigrate versions
"#)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the SQLite database holding the collections
    #[arg(long, env = "DOCMIGRATE_DATABASE", global = true)]
    pub database: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Migrate every stale document from one collection into another
    Batch {
        /// Collection to read documents from
        #[arg(long, env = "SOURCE_COLLECTION")]
        source: String,

        /// Collection to upsert migrated documents into (may equal the source)
        #[arg(long, env = "DESTINATION_COLLECTION")]
        destination: String,

        /// Documents per bulk write
        #[arg(long, env = "BATCH_SIZE", default_value = "1", value_parser = parse_positive)]
        batch_size: usize,

        /// Documents fetched per scan page
        #[arg(long, env = "PAGE_SIZE", default_value = "500", value_parser = parse_positive)]
        page_size: usize,
    },

    /// Show how many documents are behind each schema version
    Status {
        /// Collection to inspect
        #[arg(long, env = "SOURCE_COLLECTION")]
        collection: String,
    },

    /// List the built-in migrations
    Versions,
}

fn require_database(database: Option<&Path>) -> Result<&Path, MigrateError> {
    database.ok_or_else(|| {
        MigrateError::Config("DOCMIGRATE_DATABASE (or --database) is required".into())
    })
}

pub async fn run_batch(
    database: Option<&Path>,
    source: String,
    destination: String,
    batch_size: usize,
    page_size: usize,
) -> anyhow::Result<()> {
    let config = BatchConfig::new(source, destination)
        .with_batch_size(batch_size)
        .with_page_size(page_size);
    config.validate()?;
    let path = require_database(database)?;

    let db = SqliteDatabase::open(path)?;
    db.ping()?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the pending batch is written");
            on_signal.cancel();
        }
    });

    let registry = Arc::new(MigrationRegistry::builtin());
    let result = run_batch_job(&db, &config, registry, cancel).await;
    db.close();

    let report = result.inspect_err(|e| tracing::error!("An error occurred: {}", e))?;

    println!("Batch migration {}", if report.interrupted { "interrupted" } else { "complete" });
    println!("  Scanned:  {}", report.scanned);
    println!("  Migrated: {}", report.migrated);
    println!("  Failed:   {}", report.failed);
    println!("  Written:  {} in {} batches", report.written, report.batches);

    Ok(())
}

pub fn show_status(database: Option<&Path>, collection: &str) -> anyhow::Result<()> {
    let path = require_database(database)?;
    let db = SqliteDatabase::open(path)?;
    let store = db.collection(collection)?;
    let registry = MigrationRegistry::builtin();

    let total = store.count(&Filter::All)?;
    println!("Collection: {}", store.name());
    println!("  Documents: {}", total);
    match registry.latest_version() {
        Some(latest) => println!("  Latest version: {}", latest),
        None => println!("  Latest version: none (no migrations registered)"),
    }

    for step in registry.steps() {
        let behind = store.count(&Filter::below_version(step.version()))?;
        println!("  v{:<4} {:<24} {} behind", step.version(), step.name(), behind);
    }

    db.close();
    Ok(())
}

pub fn list_versions() {
    let registry = MigrationRegistry::builtin();
    if registry.is_empty() {
        println!("No migrations registered");
        return;
    }
    for step in registry.steps() {
        println!("v{:<4} {}", step.version(), step.name());
    }
}
