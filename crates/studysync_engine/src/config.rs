//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};

/// Configuration for sync runs.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Events requested per page.
    pub page_size: u32,
    /// Pages fetched in parallel during a full sync.
    pub max_concurrent_requests: usize,
    /// Upper bound on pages per run; reaching it ends the run as partial.
    pub max_pages: u64,
}

impl SyncConfig {
    /// Creates a configuration with the default limits.
    pub fn new() -> Self {
        Self {
            page_size: 1000,
            max_concurrent_requests: 3,
            max_pages: 10_000,
        }
    }

    /// Sets the page size.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Sets the number of parallel page requests.
    pub fn with_max_concurrent_requests(mut self, requests: usize) -> Self {
        self.max_concurrent_requests = requests;
        self
    }

    /// Sets the page bound.
    pub fn with_max_pages(mut self, max_pages: u64) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// Checks that the limits are usable.
    pub fn validate(&self) -> SyncResult<()> {
        if self.page_size == 0 {
            return Err(SyncError::Config("page_size must be positive".into()));
        }
        if self.max_concurrent_requests == 0 {
            return Err(SyncError::Config(
                "max_concurrent_requests must be positive".into(),
            ));
        }
        if self.max_pages == 0 {
            return Err(SyncError::Config("max_pages must be positive".into()));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}
