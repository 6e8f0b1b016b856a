//! Chunk naming and the split/reassemble operations.
//!
//! A chunk of `backup.tar` is named `backup.tar._<ordinal>` with ordinals
//! starting at 1. Files are written under `<final name>.temp` and renamed into
//! place once complete, so a partially written chunk is never visible under
//! its final name.

mod split;

pub use split::{reassemble, split, Reassembly, Split};

use std::path::PathBuf;

/// Separator between the original file name and the chunk ordinal.
pub const CHUNK_SEPARATOR: &str = "._";
/// Suffix of files still being written.
pub const TEMP_SUFFIX: &str = ".temp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFile {
    pub original_name: String,
    pub ordinal: u64,
    pub size_bytes: u64,
    pub path: PathBuf,
}

pub fn chunk_name(original_name: &str, ordinal: u64) -> String {
    format!("{}{}{}", original_name, CHUNK_SEPARATOR, ordinal)
}

/// Splits `name._N` into (`name`, N). Uses the last separator so names that
/// contain `._` themselves still resolve to their final ordinal.
pub fn parse_chunk_name(file_name: &str) -> Option<(&str, u64)> {
    let idx = file_name.rfind(CHUNK_SEPARATOR)?;
    let (original, rest) = file_name.split_at(idx);
    let digits = &rest[CHUNK_SEPARATOR.len()..];
    if original.is_empty() || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().map(|n| (original, n))
}

pub fn is_temp(file_name: &str) -> bool {
    file_name.ends_with(TEMP_SUFFIX)
}

pub(crate) fn temp_name(final_name: &str) -> String {
    format!("{}{}", final_name, TEMP_SUFFIX)
}
