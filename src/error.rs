use std::borrow::Cow;
use std::fmt;
use std::io;

/// Result type used across the indexing pipeline.
pub type Result<T> = std::result::Result<T, Error>;

/// High-level error type surfaced by the indexer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O failure while reading the CSV or touching an output artifact.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// An operation requires an artifact that an earlier step has not produced.
    #[error("{artifact} not found: {details}")]
    NotIndexed {
        artifact: Artifact,
        details: Cow<'static, str>,
    },

    /// An on-disk artifact has an invalid size or invalid contents.
    #[error("corrupt {artifact}: {details}")]
    CorruptIndex {
        artifact: Artifact,
        details: Cow<'static, str>,
    },

    /// A requested column or row index exceeds what the artifacts hold.
    #[error("index {index} out of range: {details}")]
    OutOfRange {
        index: u64,
        details: Cow<'static, str>,
    },

    /// A data row's field count does not match the header.
    #[error("row at byte {offset} has {found} fields; expected {expected}")]
    WidthMismatch {
        offset: u64,
        found: u64,
        expected: u32,
    },

    /// The indexer was constructed with unusable settings.
    #[error("invalid configuration: {details}")]
    InvalidConfig { details: Cow<'static, str> },
}

/// On-disk artifact referenced by index errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    HeaderIndex,
    RowOffsets,
    RowOffsetShard { worker: usize },
    ColumnChunkMeta,
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HeaderIndex => write!(f, "header index (header_string_lookup_offsets.bin)"),
            Self::RowOffsets => write!(f, "row offset file (row_offsets.bin)"),
            Self::RowOffsetShard { worker } => {
                write!(f, "row offset shard (row_offsets.part-{worker}.bin)")
            }
            Self::ColumnChunkMeta => {
                write!(f, "column chunk metadata (column_chunk_meta.bin)")
            }
        }
    }
}
