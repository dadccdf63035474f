//! Tree configuration
//!
//! All structural parameters are fixed at tree creation time and persisted
//! in the store header; a tree reopened from existing bytes reconstructs its
//! configuration from the header alone.

use crate::{Result, TreeError};

/// Default entries per node.
pub const DEFAULT_MAX_ENTRIES: usize = 16;

/// Default Hilbert curve order (grid resolution, bits per axis).
pub const DEFAULT_HILBERT_ORDER: u32 = 16;

/// Default node cache capacity (decoded nodes held in memory).
pub const DEFAULT_CACHE_SIZE: usize = 256;

/// Configuration for a Hilbert R-tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeConfig {
    /// Coordinate dimensionality (2 or 3 in typical use).
    pub dimensions: usize,

    /// Maximum entries per node ("N"); node byte size derives from this.
    pub max_entries: usize,

    /// Hilbert curve order; `dimensions * hilbert_order` must fit 128 bits.
    pub hilbert_order: u32,

    /// Opaque CRS tag carried in the header, never interpreted. 0 = unset.
    pub crs_tag: u32,

    /// Node cache capacity. Runtime tuning only, not persisted.
    pub cache_size: usize,
}

impl TreeConfig {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            max_entries: DEFAULT_MAX_ENTRIES,
            hilbert_order: DEFAULT_HILBERT_ORDER,
            crs_tag: 0,
            cache_size: DEFAULT_CACHE_SIZE,
        }
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_hilbert_order(mut self, order: u32) -> Self {
        self.hilbert_order = order;
        self
    }

    pub fn with_crs_tag(mut self, tag: u32) -> Self {
        self.crs_tag = tag;
        self
    }

    pub fn with_cache_size(mut self, size: usize) -> Self {
        self.cache_size = size;
        self
    }

    /// Minimum occupancy enforced on non-root nodes (50% target).
    pub fn min_entries(&self) -> usize {
        self.max_entries / 2
    }

    pub fn validate(&self) -> Result<()> {
        if self.dimensions < 1 || self.dimensions > 8 {
            return Err(TreeError::InvalidArgument(format!(
                "dimensions must be in 1..=8, got {}",
                self.dimensions
            )));
        }
        if self.max_entries < 4 || self.max_entries > 1024 {
            return Err(TreeError::InvalidArgument(format!(
                "max_entries must be in 4..=1024, got {}",
                self.max_entries
            )));
        }
        if self.hilbert_order < 1 || self.hilbert_order > 64 {
            return Err(TreeError::InvalidArgument(format!(
                "hilbert_order must be in 1..=64, got {}",
                self.hilbert_order
            )));
        }
        if self.dimensions as u32 * self.hilbert_order > 128 {
            return Err(TreeError::InvalidArgument(format!(
                "hilbert index would need {} bits, limit is 128",
                self.dimensions as u32 * self.hilbert_order
            )));
        }
        if self.cache_size == 0 {
            return Err(TreeError::InvalidArgument(
                "cache_size must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
