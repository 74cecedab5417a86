//! Streaming scan over a store, one keyset page at a time.

use std::collections::VecDeque;

use crate::document::Document;
use crate::error::Result;
use crate::store::{DocumentStore, Filter};

/// Iterates every document matching a filter without loading the whole
/// collection.
///
/// Pages are fetched by id, so documents rewritten behind the cursor (for
/// example by a migration writing back into the scanned collection) are not
/// yielded twice.
pub struct ScanCursor<'a, S: DocumentStore + ?Sized> {
    store: &'a S,
    filter: Filter,
    page_size: usize,
    last_id: Option<String>,
    buffer: VecDeque<Document>,
    exhausted: bool,
}

impl<'a, S: DocumentStore + ?Sized> ScanCursor<'a, S> {
    /// Default number of documents fetched per page.
    pub const DEFAULT_PAGE_SIZE: usize = 500;

    pub fn new(store: &'a S, filter: Filter) -> Self {
        Self::with_page_size(store, filter, Self::DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(store: &'a S, filter: Filter, page_size: usize) -> Self {
        Self {
            store,
            filter,
            page_size: page_size.max(1),
            last_id: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    fn fetch_page(&mut self) -> Result<()> {
        let page = self
            .store
            .scan(&self.filter, self.last_id.as_deref(), self.page_size)?;
        if page.len() < self.page_size {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.last_id = Some(last.id().to_string());
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl<S: DocumentStore + ?Sized> Iterator for ScanCursor<'_, S> {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch_page() {
                // A failed page ends the scan
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
