//! Names and fixed-width record codecs for the on-disk artifacts.
//!
//! All records are little-endian and the files carry no header of their own;
//! record counts are derived from file sizes.

use std::path::{Path, PathBuf};

/// Packed `(u32 start, u16 last)` records, one per header field.
pub const HEADER_INDEX_FILE: &str = "header_string_lookup_offsets.bin";

/// Packed `u64` absolute byte offsets, one per validated data row.
pub const ROW_OFFSETS_FILE: &str = "row_offsets.bin";

/// Packed `(u32 ncols, u32 max_global_id)` records, one per column group.
pub const COLUMN_CHUNK_META_FILE: &str = "column_chunk_meta.bin";

/// Stride of one header index record in bytes.
pub const HEADER_RECORD_LEN: u64 = 6;

/// Stride of one row offset in bytes.
pub const ROW_OFFSET_LEN: u64 = 8;

/// Stride of one column chunk metadata record in bytes.
pub const CHUNK_META_LEN: u64 = 8;

/// Transient per-worker shard written during row indexing.
#[must_use]
pub fn shard_file_name(worker: usize) -> String {
    format!("row_offsets.part-{worker}.bin")
}

#[must_use]
pub fn header_index_path(output_dir: &Path) -> PathBuf {
    output_dir.join(HEADER_INDEX_FILE)
}

#[must_use]
pub fn row_offsets_path(output_dir: &Path) -> PathBuf {
    output_dir.join(ROW_OFFSETS_FILE)
}

#[must_use]
pub fn column_chunk_meta_path(output_dir: &Path) -> PathBuf {
    output_dir.join(COLUMN_CHUNK_META_FILE)
}

#[must_use]
pub fn shard_path(output_dir: &Path, worker: usize) -> PathBuf {
    output_dir.join(shard_file_name(worker))
}

#[must_use]
pub fn encode_header_record(start: u32, last: u16) -> [u8; 6] {
    let mut raw = [0u8; 6];
    raw[..4].copy_from_slice(&start.to_le_bytes());
    raw[4..].copy_from_slice(&last.to_le_bytes());
    raw
}

#[must_use]
pub fn decode_header_record(raw: [u8; 6]) -> (u32, u16) {
    let start = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
    let last = u16::from_le_bytes([raw[4], raw[5]]);
    (start, last)
}

#[must_use]
pub fn encode_chunk_meta(ncols: u32, max_global_id: u32) -> [u8; 8] {
    let mut raw = [0u8; 8];
    raw[..4].copy_from_slice(&ncols.to_le_bytes());
    raw[4..].copy_from_slice(&max_global_id.to_le_bytes());
    raw
}

#[must_use]
pub fn decode_chunk_meta(raw: [u8; 8]) -> (u32, u32) {
    let ncols = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
    let max_global_id = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
    (ncols, max_global_id)
}
