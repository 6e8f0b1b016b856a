//! Static partitioning of chunk uploads across cooperating instances.
//!
//! Instance `shard_id` of `shard_count` owns every chunk whose ordinal is
//! congruent to its id. No coordination is needed beyond agreeing on the
//! count and using distinct ids.

use crate::error::Error;

/// Marker preceding the ordinal in names the router understands.
pub const TAR_CHUNK_MARKER: &str = ".tar._";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Owned,
    NotOwned,
    /// The name does not carry a parseable chunk ordinal.
    NotAChunk,
}

#[derive(Debug, Clone, Copy)]
pub struct ShardRouter {
    shard_id: u32,
    shard_count: u32,
}

impl ShardRouter {
    pub fn new(shard_id: u32, shard_count: u32) -> Result<Self, Error> {
        if shard_count > 0 && shard_id >= shard_count {
            return Err(Error::InvalidConfig(format!(
                "shard_id {} is out of range for shard_count {}",
                shard_id, shard_count
            )));
        }
        Ok(Self {
            shard_id,
            shard_count,
        })
    }

    /// Router that owns everything.
    pub fn single() -> Self {
        Self {
            shard_id: 0,
            shard_count: 0,
        }
    }

    pub fn is_partitioned(&self) -> bool {
        self.shard_count > 0
    }

    pub fn owns(&self, file_name: &str) -> Ownership {
        if !self.is_partitioned() {
            return Ownership::Owned;
        }
        match tar_chunk_ordinal(file_name) {
            None => Ownership::NotAChunk,
            Some(ordinal) if self.owns_ordinal(ordinal) => Ownership::Owned,
            Some(_) => Ownership::NotOwned,
        }
    }

    pub fn owns_ordinal(&self, ordinal: u64) -> bool {
        !self.is_partitioned() || ordinal % u64::from(self.shard_count) == u64::from(self.shard_id)
    }
}

/// Ordinal following the first `.tar._` in `file_name`; everything after
/// the marker must be digits.
pub fn tar_chunk_ordinal(file_name: &str) -> Option<u64> {
    let idx = file_name.find(TAR_CHUNK_MARKER)?;
    let digits = &file_name[idx + TAR_CHUNK_MARKER.len()..];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
