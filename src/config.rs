//! Parameters of the offline batch job.
//!
//! Every value can come from the command line or the environment (see the
//! `batch` subcommand); validation happens before any storage is opened.

use crate::error::{MigrateError, Result};
use crate::store::sqlite::validate_collection_name;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    pub source_collection: String,
    pub destination_collection: String,
    /// Documents per bulk write.
    pub batch_size: usize,
    /// Documents fetched per scan page.
    pub page_size: usize,
}

impl BatchConfig {
    pub const DEFAULT_BATCH_SIZE: usize = 1;
    pub const DEFAULT_PAGE_SIZE: usize = 500;

    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source_collection: source.into(),
            destination_collection: destination.into(),
            batch_size: Self::DEFAULT_BATCH_SIZE,
            page_size: Self::DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_collection_name(&self.source_collection)
            .map_err(|e| MigrateError::Config(format!("SOURCE_COLLECTION: {e}")))?;
        validate_collection_name(&self.destination_collection)
            .map_err(|e| MigrateError::Config(format!("DESTINATION_COLLECTION: {e}")))?;
        if self.batch_size == 0 {
            return Err(MigrateError::Config(
                "BATCH_SIZE must be a non-zero integer".into(),
            ));
        }
        if self.page_size == 0 {
            return Err(MigrateError::Config(
                "PAGE_SIZE must be a non-zero integer".into(),
            ));
        }
        Ok(())
    }
}

/// clap value parser for sizes: a positive integer.
pub fn parse_positive(raw: &str) -> std::result::Result<usize, String> {
    let value: usize = raw
        .trim()
        .parse()
        .map_err(|_| format!("'{raw}' is not an integer"))?;
    if value == 0 {
        return Err("must be a non-zero integer".to_string());
    }
    Ok(value)
}
