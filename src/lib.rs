pub mod batch;
pub mod config;
pub mod document;
pub mod error;
pub mod interceptor;
pub mod migrations;
pub mod store;

pub use batch::{run_batch_job, BatchMigrator, BatchReport};
pub use config::BatchConfig;
pub use document::{Document, Patch, UNVERSIONED};
pub use error::{MigrateError, Result};
pub use interceptor::{Cardinality, Lookup, MigratingStore, Operation, Outcome};
pub use migrations::{DocumentMigrator, MigrationOutcome, MigrationRegistry, MigrationStep};
pub use store::{
    DocumentStore, Filter, MemoryStore, ScanCursor, SqliteDatabase, SqliteStore, WriteQueueHandle,
};
