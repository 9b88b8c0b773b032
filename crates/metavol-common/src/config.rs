//! Configuration for the metadata-volume layer
//!
//! One struct, serde-loadable, with the production values as defaults.
//! Tests build small volumes through the same struct.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Tunables shared by every volume of one array.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetaVolConfig {
    /// Size of one logical page in bytes
    pub page_size: usize,
    /// Usable data bytes per page (the rest is page metadata owned by the
    /// page-storage layer)
    pub data_chunk_size: u64,
    /// Allocation granularity in pages; every allocation is rounded up to a
    /// multiple of this
    pub extent_granularity: u64,
    /// Capacity of one inode's owning-extent list
    pub extent_slots_per_inode: usize,
    /// Capacity of the allocated-extents snapshot kept in the inode header
    pub snapshot_extent_capacity: usize,
    /// Number of inode slots per volume
    pub max_file_count: u32,
}

impl Default for MetaVolConfig {
    fn default() -> Self {
        Self {
            page_size: 4096,
            data_chunk_size: 4032,
            extent_granularity: 8,
            extent_slots_per_inode: 32,
            snapshot_extent_capacity: 256,
            max_file_count: 1024,
        }
    }
}

impl MetaVolConfig {
    /// Validate configuration consistency
    pub fn validate(&self) -> Result<()> {
        if self.page_size < 512 {
            return Err(Error::invalid_parameter("page_size below 512 bytes"));
        }
        if self.data_chunk_size == 0 || self.data_chunk_size > self.page_size as u64 {
            return Err(Error::invalid_parameter(
                "data_chunk_size must be in 1..=page_size",
            ));
        }
        if self.extent_granularity == 0 {
            return Err(Error::invalid_parameter("extent_granularity must be > 0"));
        }
        if self.extent_slots_per_inode == 0 {
            return Err(Error::invalid_parameter(
                "extent_slots_per_inode must be > 0",
            ));
        }
        if self.max_file_count == 0 {
            return Err(Error::invalid_parameter("max_file_count must be > 0"));
        }
        Ok(())
    }

    /// Pages needed to hold `byte_size` bytes of file data.
    #[must_use]
    pub fn pages_for_bytes(&self, byte_size: u64) -> u64 {
        byte_size.div_ceil(self.data_chunk_size)
    }

    /// Round a page count up to the allocation granularity.
    #[must_use]
    pub fn round_up_to_granularity(&self, pages: u64) -> u64 {
        pages.div_ceil(self.extent_granularity) * self.extent_granularity
    }
}
