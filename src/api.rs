use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::scan;
use crate::transpose::{self, DiscardGroups, GroupSink};

/// Configures parsing and parallelism for an index run.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub(crate) delimiter: u8,
    pub(crate) quote: u8,
    pub(crate) skip_faulty_rows: bool,
    pub(crate) num_workers: usize,
    pub(crate) chunk_bytes: usize,
    pub(crate) columns_per_group: usize,
}

const DEFAULT_CHUNK_BYTES: usize = 1 << 20;
const DEFAULT_COLUMNS_PER_GROUP: usize = 100_000;

impl Default for IndexOptions {
    fn default() -> Self {
        let workers = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
        Self {
            delimiter: b',',
            quote: b'"',
            skip_faulty_rows: false,
            num_workers: workers,
            chunk_bytes: DEFAULT_CHUNK_BYTES,
            columns_per_group: DEFAULT_COLUMNS_PER_GROUP,
        }
    }
}

impl IndexOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    #[must_use]
    pub const fn with_quote(mut self, quote: u8) -> Self {
        self.quote = quote;
        self
    }

    #[must_use]
    pub const fn with_skip_faulty_rows(mut self, skip: bool) -> Self {
        self.skip_faulty_rows = skip;
        self
    }

    #[must_use]
    pub const fn with_num_workers(mut self, workers: usize) -> Self {
        self.num_workers = workers;
        self
    }

    #[must_use]
    pub const fn with_chunk_bytes(mut self, bytes: usize) -> Self {
        self.chunk_bytes = bytes;
        self
    }

    #[must_use]
    pub const fn with_columns_per_group(mut self, columns: usize) -> Self {
        self.columns_per_group = columns;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.num_workers == 0 {
            return Err(invalid("num_workers must be positive"));
        }
        if self.chunk_bytes == 0 {
            return Err(invalid("chunk_bytes must be positive"));
        }
        if self.columns_per_group == 0 {
            return Err(invalid("columns_per_group must be positive"));
        }
        if self.delimiter == self.quote {
            return Err(invalid("delimiter and quote must differ"));
        }
        if matches!(self.delimiter, b'\r' | b'\n') || matches!(self.quote, b'\r' | b'\n') {
            return Err(invalid("delimiter and quote must not be line terminators"));
        }
        Ok(())
    }
}

fn invalid(details: &'static str) -> Error {
    Error::InvalidConfig {
        details: details.into(),
    }
}

/// Indexes a delimited tabular file into the binary artifacts that allow
/// random field access and dictionary-encoded analytics.
///
/// Operations build on each other: `parse_header_row` must run before
/// `find_row_offsets`, which must run before `map_int_transpose`. Counts are
/// recoverable from the artifact files, so a fresh handle over an existing
/// output directory can serve reads without re-indexing.
pub struct CsvIndex {
    csv_path: PathBuf,
    output_dir: PathBuf,
    options: IndexOptions,
    column_count: Option<u32>,
    data_start: Option<u64>,
    row_count: Option<u64>,
}

impl CsvIndex {
    /// Creates an indexer for `csv_path`, creating `output_dir` if missing.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for an empty path and `Io` when the output
    /// directory cannot be created.
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(csv_path: P, output_dir: Q) -> Result<Self> {
        Self::with_options(csv_path, output_dir, IndexOptions::default())
    }

    /// Creates an indexer with explicit options.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for an empty path or unusable options, and
    /// `Io` when the output directory cannot be created.
    pub fn with_options<P: Into<PathBuf>, Q: Into<PathBuf>>(
        csv_path: P,
        output_dir: Q,
        options: IndexOptions,
    ) -> Result<Self> {
        let csv_path = csv_path.into();
        let output_dir = output_dir.into();
        if csv_path.as_os_str().is_empty() {
            return Err(invalid("csv path is empty"));
        }
        options.validate()?;
        fs::create_dir_all(&output_dir)?;
        Ok(Self {
            csv_path,
            output_dir,
            options,
            column_count: None,
            data_start: None,
            row_count: None,
        })
    }

    pub fn set_skip_faulty_rows(&mut self, skip: bool) {
        self.options.skip_faulty_rows = skip;
    }

    #[must_use]
    pub const fn options(&self) -> &IndexOptions {
        &self.options
    }

    #[must_use]
    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }

    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Scans the first logical row and writes the header index file.
    ///
    /// # Errors
    ///
    /// Returns `Io` on read/write failures and `CorruptIndex` when a header
    /// field cannot be represented in the fixed-width record format.
    pub fn parse_header_row(&mut self) -> Result<()> {
        let scan = scan::index_header(&self.csv_path, &self.output_dir, &self.options)?;
        self.column_count = Some(scan.column_count);
        self.data_start = Some(scan.data_start);
        Ok(())
    }

    /// Number of header fields, from memory or the header index file size.
    ///
    /// # Errors
    ///
    /// Returns `NotIndexed` when the header index does not exist and
    /// `CorruptIndex` when its size is not a whole number of records.
    pub fn get_column_count(&self) -> Result<u32> {
        if let Some(count) = self.column_count {
            return Ok(count);
        }
        scan::column_count_from_index(&self.output_dir)
    }

    /// Random access to one header string: the raw slice is re-read from the
    /// CSV, doubled quotes are unescaped, and ASCII whitespace is trimmed.
    ///
    /// # Errors
    ///
    /// Returns `NotIndexed`, `CorruptIndex`, `OutOfRange`, or `Io` per the
    /// header index state.
    pub fn get_header(&self, index: u32) -> Result<String> {
        scan::read_header(&self.csv_path, &self.output_dir, index, self.options.quote)
    }

    /// Index of the first header equal to `name` after unescaping and
    /// trimming, or `None`.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`get_header`](Self::get_header).
    pub fn find_column(&self, name: &str) -> Result<Option<u32>> {
        let headers = scan::read_all_headers(&self.csv_path, &self.output_dir, self.options.quote)?;
        Ok(headers
            .iter()
            .position(|header| header == name)
            .map(|index| index as u32))
    }

    /// Runs the two-phase parallel scan producing `row_offsets.bin`.
    ///
    /// # Errors
    ///
    /// Returns `NotIndexed` when the header was never indexed, `Io` on file
    /// failures, and `WidthMismatch` for the first wrong-width row when
    /// `skip_faulty_rows` is off.
    pub fn find_row_offsets(&mut self) -> Result<()> {
        let column_count = self.get_column_count()?;
        let data_start = match self.data_start {
            Some(start) => start,
            None => scan::data_region_start(&self.csv_path, &self.options)?,
        };
        let rows = scan::index_rows(
            &self.csv_path,
            &self.output_dir,
            data_start,
            column_count,
            &self.options,
        )?;
        self.data_start = Some(data_start);
        self.row_count = Some(rows);
        Ok(())
    }

    /// Number of validated data rows, from memory or the offset file size.
    ///
    /// # Errors
    ///
    /// Returns `NotIndexed` when the offset file does not exist,
    /// `CorruptIndex` when its size is not a whole number of offsets, and
    /// `OutOfRange` when the count exceeds `u32`.
    pub fn get_row_count(&self) -> Result<u32> {
        let count = match self.row_count {
            Some(count) => count,
            None => scan::row_count_from_index(&self.output_dir)?,
        };
        u32::try_from(count).map_err(|_| Error::OutOfRange {
            index: count,
            details: "row count exceeds u32 range".into(),
        })
    }

    /// Raw bytes of data row `index`, spanning from its offset up to the
    /// next row's offset (or EOF for the last row).
    ///
    /// # Errors
    ///
    /// Returns `NotIndexed`, `CorruptIndex`, `OutOfRange`, or `Io` per the
    /// offset file state.
    pub fn read_row_raw(&self, index: u32) -> Result<Vec<u8>> {
        scan::read_row_raw(&self.csv_path, &self.output_dir, u64::from(index))
    }

    /// Dictionary-encodes the table group by group, writing the chunk
    /// metadata file and discarding the relabeled matrices.
    ///
    /// # Errors
    ///
    /// See [`map_int_transpose_into`](Self::map_int_transpose_into).
    pub fn map_int_transpose(&mut self) -> Result<()> {
        self.map_int_transpose_into(&mut DiscardGroups)
    }

    /// Dictionary-encodes the table group by group, handing each relabeled
    /// group to `sink`.
    ///
    /// # Errors
    ///
    /// Returns `NotIndexed` when header or row offsets are missing,
    /// `CorruptIndex` when an offset does not point at a full-width row, and
    /// `Io` on file failures. Sink errors abort the run.
    pub fn map_int_transpose_into<S: GroupSink>(&mut self, sink: &mut S) -> Result<()> {
        let column_count = self.get_column_count()?;
        let offsets = scan::load_row_offsets(&self.output_dir)?;
        self.row_count = Some(offsets.len() as u64);
        transpose::run(
            &self.csv_path,
            &self.output_dir,
            column_count,
            offsets,
            &self.options,
            sink,
        )
    }
}
