pub mod migrator;
pub mod registry;
pub mod versions;

pub use migrator::{DocumentMigrator, MigrationOutcome};
pub use registry::{MigrationFn, MigrationRegistry, MigrationStep};
