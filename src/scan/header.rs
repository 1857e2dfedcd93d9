use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::api::IndexOptions;
use crate::error::{Artifact, Error, Result};
use crate::layout;

use super::machine::{ByteFeed, ScanMachine, Step};

/// Result of scanning the header row.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HeaderScan {
    pub(crate) column_count: u32,
    /// First byte of the data region: one past the header terminator, or the
    /// file size when the header is the whole file.
    pub(crate) data_start: u64,
}

/// One header field located in the raw CSV. `last` is `None` for an empty
/// field; otherwise it is the offset of the last content byte.
struct RawField {
    start: u64,
    last: Option<u64>,
}

/// Scans the first logical row and writes the header index file.
///
/// # Errors
///
/// Fails with `CorruptIndex` when a field position cannot be represented in
/// the fixed-width record format, or with `Io` on read/write failures.
pub(crate) fn index_header(
    csv_path: &Path,
    output_dir: &Path,
    options: &IndexOptions,
) -> Result<HeaderScan> {
    let (fields, data_start) = scan_header_row(csv_path, options)?;
    let column_count = u32::try_from(fields.len()).map_err(|_| Error::CorruptIndex {
        artifact: Artifact::HeaderIndex,
        details: "header column count exceeds u32 range".into(),
    })?;

    let mut out = BufWriter::new(File::create(layout::header_index_path(output_dir))?);
    for field in &fields {
        let (start, last) = encode_field(field)?;
        out.write_all(&layout::encode_header_record(start, last))?;
    }
    out.flush()?;

    Ok(HeaderScan {
        column_count,
        data_start,
    })
}

/// Locates the data region without touching the header index file. Used when
/// a fresh handle resumes work against an already-indexed output directory.
pub(crate) fn data_region_start(csv_path: &Path, options: &IndexOptions) -> Result<u64> {
    let (_, data_start) = scan_header_row(csv_path, options)?;
    Ok(data_start)
}

fn scan_header_row(csv_path: &Path, options: &IndexOptions) -> Result<(Vec<RawField>, u64)> {
    let file = File::open(csv_path)?;
    let reader = BufReader::with_capacity(options.chunk_bytes, file);
    let mut feed = ByteFeed::new(reader, 0, None);
    let mut machine = ScanMachine::new(options.delimiter, options.quote);

    let mut fields: Vec<RawField> = Vec::new();
    // Offset where the current field's content would begin if it has any.
    let mut field_pos: u64 = 0;
    let mut first: Option<u64> = None;
    let mut last: u64 = 0;
    // Any field activity in the row at all; an empty header row has none and
    // produces zero columns.
    let mut saw_field_bytes = false;

    let data_start;
    loop {
        let Some(byte) = feed.next()? else {
            machine.finish();
            if saw_field_bytes {
                fields.push(RawField {
                    start: first.unwrap_or(field_pos),
                    last: first.map(|_| last),
                });
            }
            data_start = feed.pos();
            break;
        };
        let pos = feed.pos() - 1;
        match machine.step(byte) {
            Step::Content => {
                saw_field_bytes = true;
                first.get_or_insert(pos);
                last = pos;
            }
            Step::EscapedQuote => {
                // The raw span covers both quote bytes.
                saw_field_bytes = true;
                first.get_or_insert(pos - 1);
                last = pos;
            }
            Step::QuoteOpen => {
                saw_field_bytes = true;
                field_pos = pos + 1;
            }
            Step::QuotePending => saw_field_bytes = true,
            Step::CrPending => {}
            Step::FieldEnd => {
                saw_field_bytes = true;
                fields.push(RawField {
                    start: first.unwrap_or(field_pos),
                    last: first.map(|_| last),
                });
                field_pos = pos + 1;
                first = None;
            }
            Step::RowEnd => {
                if saw_field_bytes {
                    fields.push(RawField {
                        start: first.unwrap_or(field_pos),
                        last: first.map(|_| last),
                    });
                }
                data_start = feed.pos();
                break;
            }
            Step::RowEndReplay => {
                feed.push_back(byte);
                if saw_field_bytes {
                    fields.push(RawField {
                        start: first.unwrap_or(field_pos),
                        last: first.map(|_| last),
                    });
                }
                data_start = feed.pos();
                break;
            }
            Step::Replay => feed.push_back(byte),
        }
    }

    Ok((fields, data_start))
}

fn encode_field(field: &RawField) -> Result<(u32, u16)> {
    let start = u32::try_from(field.start).map_err(|_| offset_overflow(field.start))?;
    let last = match field.last {
        Some(last) => {
            let last = u16::try_from(last).map_err(|_| offset_overflow(last))?;
            // `(0, 0xFFFF)` is reserved for the empty-at-offset-0 sentinel;
            // a real span ending exactly at 65535 cannot be represented.
            if start == 0 && last == u16::MAX {
                return Err(Error::CorruptIndex {
                    artifact: Artifact::HeaderIndex,
                    details: "header field span 0..=65535 collides with the empty-field sentinel"
                        .into(),
                });
            }
            last
        }
        // Empty field: `last = start - 1`. A first field that is empty at
        // offset 0 wraps to the reserved 0xFFFF sentinel.
        None => {
            if start == 0 {
                u16::MAX
            } else {
                u16::try_from(start - 1).map_err(|_| offset_overflow(field.start))?
            }
        }
    };
    Ok((start, last))
}

fn offset_overflow(offset: u64) -> Error {
    Error::CorruptIndex {
        artifact: Artifact::HeaderIndex,
        details: format!("header field offset {offset} exceeds the record range").into(),
    }
}

/// Column count derived from the header index file size (one 6-byte record
/// per column).
pub(crate) fn column_count_from_index(output_dir: &Path) -> Result<u32> {
    let len = artifact_len(
        &layout::header_index_path(output_dir),
        Artifact::HeaderIndex,
        "run parse_header_row first",
    )?;
    if len % layout::HEADER_RECORD_LEN != 0 {
        return Err(Error::CorruptIndex {
            artifact: Artifact::HeaderIndex,
            details: format!("size {len} is not a multiple of {}", layout::HEADER_RECORD_LEN)
                .into(),
        });
    }
    u32::try_from(len / layout::HEADER_RECORD_LEN).map_err(|_| Error::CorruptIndex {
        artifact: Artifact::HeaderIndex,
        details: "column count exceeds u32 range".into(),
    })
}

/// Random access to one header string: look up the record, read the raw
/// slice back from the CSV, unescape doubled quotes, trim.
pub(crate) fn read_header(
    csv_path: &Path,
    output_dir: &Path,
    index: u32,
    quote: u8,
) -> Result<String> {
    let count = column_count_from_index(output_dir)?;
    if index >= count {
        return Err(Error::OutOfRange {
            index: u64::from(index),
            details: format!("header index holds {count} columns").into(),
        });
    }
    let mut file = File::open(layout::header_index_path(output_dir))?;
    file.seek(SeekFrom::Start(
        u64::from(index) * layout::HEADER_RECORD_LEN,
    ))?;
    let mut raw = [0u8; 6];
    file.read_exact(&mut raw)?;
    let (start, last) = layout::decode_header_record(raw);

    let mut csv = File::open(csv_path)?;
    header_from_record(&mut csv, start, last, quote)
}

/// Reads every header string with a single pass over both files.
pub(crate) fn read_all_headers(
    csv_path: &Path,
    output_dir: &Path,
    quote: u8,
) -> Result<Vec<String>> {
    let count = column_count_from_index(output_dir)?;
    let mut index = BufReader::new(File::open(layout::header_index_path(output_dir))?);
    let mut csv = File::open(csv_path)?;

    let mut headers = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let mut raw = [0u8; 6];
        index.read_exact(&mut raw)?;
        let (start, last) = layout::decode_header_record(raw);
        headers.push(header_from_record(&mut csv, start, last, quote)?);
    }
    Ok(headers)
}

fn header_from_record(csv: &mut File, start: u32, last: u16, quote: u8) -> Result<String> {
    if record_is_empty(start, last) {
        return Ok(String::new());
    }
    let len = u64::from(last) - u64::from(start) + 1;
    csv.seek(SeekFrom::Start(u64::from(start)))?;
    let mut raw = vec![0u8; len as usize];
    csv.read_exact(&mut raw)?;
    Ok(unescape_and_trim(&raw, quote))
}

fn record_is_empty(start: u32, last: u16) -> bool {
    // The empty sentinel is `last = start - 1`, wrapping to 0xFFFF when the
    // empty field sits at offset 0. The writer never emits `(0, 0xFFFF)`
    // for a real span, so the pair is unambiguous here.
    (start == 0 && last == u16::MAX) || u32::from(last) < start
}

fn unescape_and_trim(raw: &[u8], quote: u8) -> String {
    let mut bytes = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let byte = raw[i];
        bytes.push(byte);
        if byte == quote && raw.get(i + 1) == Some(&quote) {
            i += 2;
        } else {
            i += 1;
        }
    }
    String::from_utf8_lossy(bytes.trim_ascii()).into_owned()
}

pub(crate) fn artifact_len(path: &Path, artifact: Artifact, hint: &'static str) -> Result<u64> {
    match fs::metadata(path) {
        Ok(meta) => Ok(meta.len()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(Error::NotIndexed {
            artifact,
            details: hint.into(),
        }),
        Err(err) => Err(err.into()),
    }
}
