//! Dictionary-encoding transpose: per column group, every worker tokenizes a
//! row-range subset into per-column local dictionaries; after join the local
//! ids are reconciled into per-column global dictionaries and the matrix is
//! relabeled in place.

mod dict;
mod tokens;

use std::fs::File;
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use rayon::prelude::*;

use crate::api::IndexOptions;
use crate::error::{Artifact, Error, Result};
use crate::layout;

use dict::{merge_column, LocalDict, MergedColumn};
use tokens::read_row_tokens;

/// Dataset-level information handed to a sink before the first group.
pub struct GroupContext<'a> {
    pub csv_path: &'a Path,
    pub column_count: u32,
    pub row_count: u64,
}

/// One relabeled column group.
pub struct ColumnGroup {
    /// First column covered by this group.
    pub col_start: u32,
    /// Column-major integer matrix: `columns[c][r]` holds the global id of
    /// row `r`'s token in column `col_start + c`.
    pub columns: Vec<Vec<i32>>,
    /// Per column: global id → token, densely enumerated from 0.
    pub dictionaries: Vec<Vec<String>>,
    /// Greatest global id assigned across the group's columns.
    pub max_global_id: u32,
}

/// Trait implemented by consumers of relabeled column groups.
///
/// The chunk metadata file is written by the group loop itself; a sink only
/// decides what happens to the matrix and the dictionaries.
pub trait GroupSink {
    /// Called before any group is processed.
    ///
    /// # Errors
    ///
    /// A sink error aborts the run.
    fn begin(&mut self, context: &GroupContext<'_>) -> Result<()>;

    /// Invoked once per column group, in column order.
    ///
    /// # Errors
    ///
    /// A sink error aborts the run.
    fn write_group(&mut self, group: &ColumnGroup) -> Result<()>;

    /// Called once after the last group.
    ///
    /// # Errors
    ///
    /// A sink error fails the run after all groups were processed.
    fn finish(&mut self) -> Result<()>;
}

/// Sink that drops every group, leaving only the metadata artifact.
pub struct DiscardGroups;

impl GroupSink for DiscardGroups {
    fn begin(&mut self, _context: &GroupContext<'_>) -> Result<()> {
        Ok(())
    }

    fn write_group(&mut self, _group: &ColumnGroup) -> Result<()> {
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Runs the group loop over all columns, appending one `(ncols,
/// max_global_id)` record per group to the chunk metadata file and handing
/// each relabeled group to `sink`.
pub(crate) fn run<S: GroupSink>(
    csv_path: &Path,
    output_dir: &Path,
    column_count: u32,
    row_offsets: Vec<u64>,
    options: &IndexOptions,
    sink: &mut S,
) -> Result<()> {
    let row_count = row_offsets.len() as u64;
    sink.begin(&GroupContext {
        csv_path,
        column_count,
        row_count,
    })?;

    let mut meta = BufWriter::new(File::create(layout::column_chunk_meta_path(output_dir))?);

    // Tokenization positions, advanced across groups so group `g + 1`
    // resumes each row where group `g` stopped.
    let mut cursors = row_offsets;

    let group_width = u32::try_from(options.columns_per_group).unwrap_or(u32::MAX);
    let mut col_start = 0u32;
    while col_start < column_count {
        let ncols = group_width.min(column_count - col_start);
        let group = encode_group(csv_path, &mut cursors, col_start, ncols, options)?;
        meta.write_all(&layout::encode_chunk_meta(ncols, group.max_global_id))?;
        sink.write_group(&group)?;
        col_start += ncols;
    }

    meta.flush()?;
    sink.finish()
}

/// Per-worker slice of the group state: its row-range segment of every
/// column plus the matching cursor segment.
struct WorkerSlice<'a> {
    worker: usize,
    cursors: &'a mut [u64],
    columns: Vec<&'a mut [i32]>,
}

fn encode_group(
    csv_path: &Path,
    cursors: &mut [u64],
    col_start: u32,
    ncols: u32,
    options: &IndexOptions,
) -> Result<ColumnGroup> {
    let rows = cursors.len();
    let lens = segment_lengths(rows, options.num_workers);
    let mut columns: Vec<Vec<i32>> = (0..ncols).map(|_| vec![0i32; rows]).collect();

    let locals: Vec<Vec<LocalDict>> = {
        let slices = carve(&mut columns, Some(cursors), &lens);
        slices
            .into_par_iter()
            .map(|slice| encode_rows(csv_path, ncols, options, slice))
            .collect::<Result<Vec<_>>>()?
    };

    // Regroup the dictionaries by column and reconcile.
    let workers = lens.len();
    let mut per_column: Vec<Vec<LocalDict>> =
        (0..ncols).map(|_| Vec::with_capacity(workers)).collect();
    for worker_dicts in locals {
        for (c, dict) in worker_dicts.into_iter().enumerate() {
            per_column[c].push(dict);
        }
    }
    let merged: Vec<MergedColumn> = per_column
        .into_iter()
        .map(merge_column)
        .collect::<Result<Vec<_>>>()?;

    // Relabel local ids to global ids in place, same row partition.
    {
        let slices = carve(&mut columns, None, &lens);
        slices.into_par_iter().for_each(|slice| {
            for (c, segment) in slice.columns.into_iter().enumerate() {
                let lut = &merged[c].luts[slice.worker];
                for value in segment {
                    *value = lut[*value as usize];
                }
            }
        });
    }

    let max_global_id = merged
        .iter()
        .map(|column| column.values.len())
        .max()
        .unwrap_or(0)
        .saturating_sub(1) as u32;

    Ok(ColumnGroup {
        col_start,
        columns,
        dictionaries: merged.into_iter().map(|column| column.values).collect(),
        max_global_id,
    })
}

/// Near-equal row ranges, the last worker absorbing the remainder.
fn segment_lengths(rows: usize, workers: usize) -> Vec<usize> {
    let base = rows / workers;
    let mut lens = vec![base; workers];
    lens[workers - 1] += rows % workers;
    lens
}

/// Splits every column (and optionally the cursor array) into per-worker
/// row-range segments. Workers never alias a cell.
fn carve<'a>(
    columns: &'a mut [Vec<i32>],
    cursors: Option<&'a mut [u64]>,
    lens: &[usize],
) -> Vec<WorkerSlice<'a>> {
    let mut slices: Vec<WorkerSlice<'a>> = Vec::with_capacity(lens.len());

    let mut cursor_rest: &mut [u64] = cursors.unwrap_or(&mut []);
    for (worker, &len) in lens.iter().enumerate() {
        // The relabel pass passes no cursors; every worker gets an empty
        // segment there.
        let take = len.min(cursor_rest.len());
        let (segment, rest) = cursor_rest.split_at_mut(take);
        cursor_rest = rest;
        slices.push(WorkerSlice {
            worker,
            cursors: segment,
            columns: Vec::with_capacity(columns.len()),
        });
    }

    for column in columns.iter_mut() {
        let mut rest: &mut [i32] = column;
        for (worker, &len) in lens.iter().enumerate() {
            let (segment, tail) = rest.split_at_mut(len);
            rest = tail;
            slices[worker].columns.push(segment);
        }
    }

    slices
}

/// Tokenizes the worker's rows for the current group, writing local ids into
/// the matrix segments and advancing the cursors.
fn encode_rows(
    csv_path: &Path,
    ncols: u32,
    options: &IndexOptions,
    slice: WorkerSlice<'_>,
) -> Result<Vec<LocalDict>> {
    let needed = ncols as usize;
    let mut dicts: Vec<LocalDict> = (0..needed).map(|_| LocalDict::new()).collect();
    if slice.cursors.is_empty() {
        return Ok(dicts);
    }

    let mut reader = BufReader::with_capacity(options.chunk_bytes, File::open(csv_path)?);
    let mut stream_pos: Option<u64> = None;
    let mut columns = slice.columns;

    for (r, cursor) in slice.cursors.iter_mut().enumerate() {
        let start = *cursor;
        match stream_pos {
            // Relative seeks keep the read buffer when the gap is small.
            Some(pos) => reader.seek_relative(start as i64 - pos as i64)?,
            None => {
                reader.seek(SeekFrom::Start(start))?;
            }
        }

        let row = read_row_tokens(&mut reader, start, needed, options.delimiter, options.quote)?;
        if row.tokens.len() < needed {
            return Err(Error::CorruptIndex {
                artifact: Artifact::RowOffsets,
                details: format!(
                    "row at byte {start} ended after {} of {needed} fields",
                    row.tokens.len()
                )
                .into(),
            });
        }
        for (c, token) in row.tokens.into_iter().enumerate() {
            columns[c][r] = dicts[c].intern(token)?;
        }
        *cursor = row.cursor;
        stream_pos = Some(row.consumed_through);
    }

    Ok(dicts)
}
