use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use rayon::prelude::*;

use crate::api::IndexOptions;
use crate::error::{Artifact, Error, Result};
use crate::layout;
use crate::logger;

use super::header::artifact_len;
use super::machine::{ByteFeed, ScanMachine, Step};

const CR: u8 = b'\r';
const LF: u8 = b'\n';

/// Two-phase parallel scan of the data region producing `row_offsets.bin`.
///
/// Phase 1 resynchronizes the nominal partition points to true row starts;
/// phase 2 parses each shard independently and validates row widths; the
/// shards are then concatenated in worker order.
///
/// Returns the number of validated rows.
///
/// # Errors
///
/// Propagates I/O failures and, when `skip_faulty_rows` is off, the first
/// `WidthMismatch` encountered by any worker.
pub(crate) fn index_rows(
    csv_path: &Path,
    output_dir: &Path,
    data_start: u64,
    column_count: u32,
    options: &IndexOptions,
) -> Result<u64> {
    let file_size = fs::metadata(csv_path)?.len();
    let out_path = layout::row_offsets_path(output_dir);

    if data_start >= file_size {
        // Header-only file: an empty offset file, no workers.
        File::create(&out_path)?;
        return Ok(0);
    }

    let handoffs = discover_handoffs(csv_path, data_start, file_size, options)?;
    let workers = handoffs.len() - 1;

    let counts: Vec<u64> = (0..workers)
        .into_par_iter()
        .map(|t| {
            parse_shard(
                csv_path,
                &layout::shard_path(output_dir, t),
                handoffs[t],
                handoffs[t + 1],
                column_count,
                options,
            )
        })
        .collect::<Result<Vec<u64>>>()?;

    merge_shards(output_dir, &out_path, workers)?;
    Ok(counts.iter().sum())
}

/// Phase 1: nominal near-equal byte ranges, each resynchronized to a true
/// row start. The returned vector has `workers + 1` entries bracketing each
/// worker's range; entries are monotonically non-decreasing.
fn discover_handoffs(
    csv_path: &Path,
    data_start: u64,
    file_size: u64,
    options: &IndexOptions,
) -> Result<Vec<u64>> {
    let workers = options.num_workers as u64;
    let region = file_size - data_start;

    let nominal: Vec<u64> = (1..workers).map(|t| data_start + region * t / workers).collect();
    let resynced: Vec<u64> = nominal
        .par_iter()
        .map(|&start| resync(csv_path, start, file_size, options))
        .collect::<Result<Vec<u64>>>()?;

    let mut handoffs = Vec::with_capacity(options.num_workers + 1);
    handoffs.push(data_start);
    let mut floor = data_start;
    for start in resynced {
        floor = floor.max(start);
        handoffs.push(floor);
    }
    handoffs.push(file_size);
    Ok(handoffs)
}

/// Maps a nominal partition point to a true row start (or the file size).
///
/// The adversarial case is a partition point landing on the closing quote of
/// a quoted field; at most two bytes of lookahead decide whether the scan
/// continues in quoted or unquoted context, and longer quote runs resolve by
/// feeding the remaining bytes through the machine.
pub(super) fn resync(
    csv_path: &Path,
    start: u64,
    file_size: u64,
    options: &IndexOptions,
) -> Result<u64> {
    if start >= file_size {
        return Ok(file_size);
    }
    let mut reader = BufReader::with_capacity(options.chunk_bytes, File::open(csv_path)?);
    reader.seek(SeekFrom::Start(start))?;
    let mut feed = ByteFeed::new(reader, start, None);

    let Some(first) = feed.next()? else {
        return Ok(file_size);
    };

    let mut machine;
    if first != options.quote {
        machine = ScanMachine::new(options.delimiter, options.quote);
        feed.push_back(first);
    } else {
        let Some(second) = feed.next()? else {
            return Ok(file_size);
        };
        if second == options.delimiter {
            // The partition point was a closing quote; the delimiter starts
            // a fresh unquoted field.
            machine = ScanMachine::new(options.delimiter, options.quote);
        } else if second == LF {
            return Ok(feed.pos());
        } else if second == CR {
            return after_cr(&mut feed, file_size);
        } else if second == options.quote {
            let Some(third) = feed.next()? else {
                return Ok(file_size);
            };
            if third == options.delimiter {
                // `""` was an empty quoted field.
                machine = ScanMachine::new(options.delimiter, options.quote);
            } else if third == LF {
                return Ok(feed.pos());
            } else if third == CR {
                return after_cr(&mut feed, file_size);
            } else {
                // `""` was an escaped quote inside a quoted field.
                machine = ScanMachine::new_in_quotes(options.delimiter, options.quote);
                feed.push_back(third);
            }
        } else {
            // The partition point was an opening quote.
            machine = ScanMachine::new_in_quotes(options.delimiter, options.quote);
            feed.push_back(second);
        }
    }

    scan_past_row_end(&mut feed, &mut machine, file_size)
}

/// A CR terminator was just consumed; swallow the LF of a CRLF if present.
fn after_cr<R: io::BufRead>(feed: &mut ByteFeed<R>, file_size: u64) -> Result<u64> {
    match feed.next()? {
        Some(LF) => Ok(feed.pos()),
        Some(_) => Ok(feed.pos() - 1),
        None => Ok(file_size),
    }
}

fn scan_past_row_end<R: io::BufRead>(
    feed: &mut ByteFeed<R>,
    machine: &mut ScanMachine,
    file_size: u64,
) -> Result<u64> {
    loop {
        let Some(byte) = feed.next()? else {
            machine.finish();
            return Ok(file_size);
        };
        match machine.step(byte) {
            Step::RowEnd => return Ok(feed.pos()),
            Step::RowEndReplay => return Ok(feed.pos() - 1),
            Step::Replay => feed.push_back(byte),
            _ => {}
        }
    }
}

/// Row bookkeeping for one shard: delimiter counting, blank detection, and
/// the write-on-validation rule.
struct ShardRows<W: Write> {
    out: W,
    expected: u64,
    expected_u32: u32,
    skip_faulty: bool,
    row_start: u64,
    delim_count: u64,
    /// Only spaces/tabs seen so far: no quotes, no delimiters, no other
    /// content. Such rows are skipped without validation.
    blank: bool,
    /// Any byte at all since the last row start; decides whether EOF owes a
    /// final row.
    any: bool,
    rows: u64,
}

impl<W: Write> ShardRows<W> {
    fn new(out: W, expected: u32, skip_faulty: bool, row_start: u64) -> Self {
        Self {
            out,
            expected: u64::from(expected),
            expected_u32: expected,
            skip_faulty,
            row_start,
            delim_count: 0,
            blank: true,
            any: false,
            rows: 0,
        }
    }

    fn content(&mut self, byte: u8) {
        self.any = true;
        if byte != b' ' && byte != b'\t' {
            self.blank = false;
        }
    }

    fn mark(&mut self) {
        self.any = true;
        self.blank = false;
    }

    fn field_end(&mut self) {
        self.mark();
        self.delim_count += 1;
    }

    fn row_end(&mut self, next_start: u64) -> Result<()> {
        if !self.blank {
            let fields = self.delim_count + 1;
            if fields == self.expected {
                self.out.write_all(&self.row_start.to_le_bytes())?;
                self.rows += 1;
            } else if !self.skip_faulty {
                return Err(Error::WidthMismatch {
                    offset: self.row_start,
                    found: fields,
                    expected: self.expected_u32,
                });
            }
        }
        self.row_start = next_start;
        self.delim_count = 0;
        self.blank = true;
        self.any = false;
        Ok(())
    }
}

/// Phase 2: parses `[start, end)` with a fresh machine and writes the start
/// offset of every validated row to the worker's shard file.
fn parse_shard(
    csv_path: &Path,
    shard_path: &Path,
    start: u64,
    end: u64,
    column_count: u32,
    options: &IndexOptions,
) -> Result<u64> {
    let mut reader = BufReader::with_capacity(options.chunk_bytes, File::open(csv_path)?);
    reader.seek(SeekFrom::Start(start))?;
    let mut feed = ByteFeed::new(reader, start, Some(end));
    let mut machine = ScanMachine::new(options.delimiter, options.quote);

    let out = BufWriter::new(File::create(shard_path)?);
    let mut state = ShardRows::new(out, column_count, options.skip_faulty_rows, start);

    loop {
        let Some(byte) = feed.next()? else {
            break;
        };
        match machine.step(byte) {
            Step::Content => state.content(byte),
            Step::EscapedQuote | Step::QuoteOpen | Step::QuotePending => state.mark(),
            Step::CrPending => {}
            Step::FieldEnd => state.field_end(),
            Step::RowEnd => state.row_end(feed.pos())?,
            Step::RowEndReplay => {
                feed.push_back(byte);
                state.row_end(feed.pos())?;
            }
            Step::Replay => feed.push_back(byte),
        }
    }

    // End of range: a pending CR is a terminator; remaining bytes are a
    // final, unterminated row.
    if machine.finish() || state.any {
        state.row_end(feed.pos())?;
    }
    state.out.flush()?;
    Ok(state.rows)
}

/// Concatenates the shards in worker order, then removes them best-effort.
fn merge_shards(output_dir: &Path, out_path: &Path, workers: usize) -> Result<()> {
    let mut out = BufWriter::new(File::create(out_path)?);
    for t in 0..workers {
        let shard = layout::shard_path(output_dir, t);
        let mut reader = File::open(&shard).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => Error::NotIndexed {
                artifact: Artifact::RowOffsetShard { worker: t },
                details: "shard missing before merge".into(),
            },
            _ => Error::Io(err),
        })?;
        io::copy(&mut reader, &mut out)?;
    }
    out.flush()?;
    for t in 0..workers {
        let shard = layout::shard_path(output_dir, t);
        if let Err(err) = fs::remove_file(&shard) {
            logger::log_warn(&format!(
                "could not remove {}: {err}",
                shard.display()
            ));
        }
    }
    Ok(())
}

/// Row count derived from the offset file size (one `u64` per row).
pub(crate) fn row_count_from_index(output_dir: &Path) -> Result<u64> {
    let len = artifact_len(
        &layout::row_offsets_path(output_dir),
        Artifact::RowOffsets,
        "run find_row_offsets first",
    )?;
    if len % layout::ROW_OFFSET_LEN != 0 {
        return Err(Error::CorruptIndex {
            artifact: Artifact::RowOffsets,
            details: format!("size {len} is not a multiple of {}", layout::ROW_OFFSET_LEN).into(),
        });
    }
    Ok(len / layout::ROW_OFFSET_LEN)
}

/// Loads the full offset sequence for the transpose.
pub(crate) fn load_row_offsets(output_dir: &Path) -> Result<Vec<u64>> {
    let count = row_count_from_index(output_dir)?;
    let mut reader = BufReader::new(File::open(layout::row_offsets_path(output_dir))?);
    let mut offsets = Vec::with_capacity(count as usize);
    let mut raw = [0u8; 8];
    for _ in 0..count {
        reader.read_exact(&mut raw)?;
        offsets.push(u64::from_le_bytes(raw));
    }
    Ok(offsets)
}

/// Raw bytes of data row `index`: from its offset up to the next row's
/// offset, or to EOF for the last row.
pub(crate) fn read_row_raw(csv_path: &Path, output_dir: &Path, index: u64) -> Result<Vec<u8>> {
    let count = row_count_from_index(output_dir)?;
    if index >= count {
        return Err(Error::OutOfRange {
            index,
            details: format!("row offset file holds {count} rows").into(),
        });
    }
    let mut offsets = File::open(layout::row_offsets_path(output_dir))?;
    offsets.seek(SeekFrom::Start(index * layout::ROW_OFFSET_LEN))?;
    let mut raw = [0u8; 8];
    offsets.read_exact(&mut raw)?;
    let start = u64::from_le_bytes(raw);
    let end = if index + 1 < count {
        offsets.read_exact(&mut raw)?;
        u64::from_le_bytes(raw)
    } else {
        fs::metadata(csv_path)?.len()
    };
    if end < start {
        return Err(Error::CorruptIndex {
            artifact: Artifact::RowOffsets,
            details: format!("offsets are not increasing at row {index}").into(),
        });
    }

    let mut csv = File::open(csv_path)?;
    csv.seek(SeekFrom::Start(start))?;
    let mut row = vec![0u8; (end - start) as usize];
    csv.read_exact(&mut row)?;
    Ok(row)
}
