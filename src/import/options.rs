//! Tuning knobs of an import run

use serde::{Deserialize, Serialize};

use crate::adapters::DEFAULT_PARAMETER_CEILING;
use crate::error::{SyncError, SyncResult};

/// Rows fetched and written per copy page
pub const DEFAULT_PAGE_SIZE: usize = 300_000;

/// Identity tuples compared per consistency page
pub const DEFAULT_CONSISTENCY_PAGE_SIZE: usize = 1_000_000;

/// Passes of the count-gap loop before giving up
pub const DEFAULT_GAP_ITERATIONS: usize = 10;

/// Options of a [`DataImporter`](super::DataImporter) run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImporterOptions {
    pub page_size: usize,
    pub consistency_page_size: usize,
    /// Parameters per command when batching updates
    pub parameter_ceiling: usize,
    /// Drop (schema mode) or clear (copy mode) the target first
    pub force: bool,
    pub gap_iterations: usize,
}

impl Default for ImporterOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            consistency_page_size: DEFAULT_CONSISTENCY_PAGE_SIZE,
            parameter_ceiling: DEFAULT_PARAMETER_CEILING,
            force: false,
            gap_iterations: DEFAULT_GAP_ITERATIONS,
        }
    }
}

impl ImporterOptions {
    pub fn builder() -> ImporterOptionsBuilder {
        ImporterOptionsBuilder::default()
    }

    /// Reject page sizes below one
    pub fn validate(&self) -> SyncResult<()> {
        if self.page_size < 1 {
            return Err(SyncError::config("Pagesize should be greater than zero"));
        }
        if self.consistency_page_size < 1 {
            return Err(SyncError::config("Consistency pagesize should be greater than zero"));
        }
        if self.parameter_ceiling < 1 {
            return Err(SyncError::config("Parameter ceiling should be greater than zero"));
        }
        Ok(())
    }
}

/// Builder for [`ImporterOptions`]
#[derive(Debug, Default)]
pub struct ImporterOptionsBuilder {
    page_size: Option<usize>,
    consistency_page_size: Option<usize>,
    parameter_ceiling: Option<usize>,
    force: bool,
    gap_iterations: Option<usize>,
}

impl ImporterOptionsBuilder {
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn consistency_page_size(mut self, page_size: usize) -> Self {
        self.consistency_page_size = Some(page_size);
        self
    }

    pub fn parameter_ceiling(mut self, ceiling: usize) -> Self {
        self.parameter_ceiling = Some(ceiling);
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn gap_iterations(mut self, iterations: usize) -> Self {
        self.gap_iterations = Some(iterations);
        self
    }

    /// Build and validate the options
    pub fn build(self) -> SyncResult<ImporterOptions> {
        let defaults = ImporterOptions::default();
        let options = ImporterOptions {
            page_size: self.page_size.unwrap_or(defaults.page_size),
            consistency_page_size: self
                .consistency_page_size
                .unwrap_or(defaults.consistency_page_size),
            parameter_ceiling: self.parameter_ceiling.unwrap_or(defaults.parameter_ceiling),
            force: self.force,
            gap_iterations: self.gap_iterations.unwrap_or(defaults.gap_iterations),
        };
        options.validate()?;
        Ok(options)
    }
}
