use std::fs;
use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use tempfile::TempDir;

use rowdex::{layout, ColumnGroup, CsvIndex, Error, GroupContext, GroupSink, IndexOptions};

fn write_fixture(dir: &Path, contents: &[u8]) -> PathBuf {
    let path = dir.join("input.csv");
    fs::write(&path, contents).expect("write fixture");
    path
}

fn read_offsets(out_dir: &Path) -> Vec<u64> {
    let raw = fs::read(out_dir.join(layout::ROW_OFFSETS_FILE)).expect("read offsets");
    assert_eq!(raw.len() % 8, 0, "offset file must hold whole records");
    raw.chunks_exact(8)
        .map(|c| u64::from_le_bytes(c.try_into().expect("record")))
        .collect()
}

fn indexed(contents: &[u8], options: IndexOptions) -> (TempDir, PathBuf, PathBuf, CsvIndex) {
    let tmp = TempDir::new().expect("tempdir");
    let csv = write_fixture(tmp.path(), contents);
    let out = tmp.path().join("out");
    let mut index = CsvIndex::with_options(&csv, &out, options).expect("construct");
    index.parse_header_row().expect("parse header");
    index.find_row_offsets().expect("find offsets");
    (tmp, csv, out, index)
}

#[test]
fn header_with_quotes_and_spaces() {
    let data = b"Index,\"Girth (in)\",\"Height (ft)\",Volume(ft^3)\n1,8.3,70,10.3\n";
    let (_tmp, _csv, _out, index) = indexed(data, IndexOptions::new());

    assert_eq!(index.get_column_count().expect("count"), 4);
    assert_eq!(index.get_header(0).expect("h0"), "Index");
    assert_eq!(index.get_header(1).expect("h1"), "Girth (in)");
    assert_eq!(index.get_header(2).expect("h2"), "Height (ft)");
    assert_eq!(index.get_header(3).expect("h3"), "Volume(ft^3)");
    assert_eq!(
        index.find_column("Height (ft)").expect("find"),
        Some(2)
    );
    assert_eq!(index.find_column("missing").expect("find"), None);
}

#[test]
fn doubled_quote_escape_in_header() {
    let data = b"a,\"b\"\"c\",d\nx,y,z\n";
    let (_tmp, _csv, _out, index) = indexed(data, IndexOptions::new());
    assert_eq!(index.get_header(1).expect("h1"), "b\"c");
}

#[test]
fn crlf_data_rows() {
    let data = b"h1,h2\r\n1,2\r\n3,4\r\n";
    let (_tmp, _csv, out, index) = indexed(data, IndexOptions::new());

    assert_eq!(index.get_row_count().expect("rows"), 2);
    let offsets = read_offsets(&out);
    assert_eq!(offsets, vec![7, 12]);
    assert_eq!(data[7], b'1');
    assert_eq!(data[12], b'3');
    assert_eq!(index.read_row_raw(0).expect("row 0"), b"1,2\r\n");
    assert_eq!(index.read_row_raw(1).expect("row 1"), b"3,4\r\n");
}

#[test]
fn width_mismatch_aborts_or_skips() {
    let data = b"c1,c2,c3\na,b\nq,w,e\n";
    let tmp = TempDir::new().expect("tempdir");
    let csv = write_fixture(tmp.path(), data);
    let out = tmp.path().join("out");

    let mut index =
        CsvIndex::with_options(&csv, &out, IndexOptions::new().with_num_workers(1))
            .expect("construct");
    index.parse_header_row().expect("parse header");
    let err = index.find_row_offsets().expect_err("must abort");
    assert!(matches!(
        err,
        Error::WidthMismatch {
            offset: 9,
            found: 2,
            expected: 3
        }
    ));

    index.set_skip_faulty_rows(true);
    index.find_row_offsets().expect("skip run");
    assert_eq!(index.get_row_count().expect("rows"), 1);
    assert_eq!(read_offsets(&out), vec![13]);
}

#[test]
fn quoted_newline_is_one_row() {
    let data = b"h1,h2\n\"line1\nline2\",x\n";
    let (_tmp, _csv, out, index) = indexed(data, IndexOptions::new().with_num_workers(1));

    assert_eq!(index.get_row_count().expect("rows"), 1);
    let offsets = read_offsets(&out);
    assert_eq!(offsets, vec![6]);
    assert_eq!(data[6], b'"');
    assert_eq!(index.read_row_raw(0).expect("row"), &data[6..]);
}

#[test]
fn worker_boundary_on_closing_quote_matches_single_worker() {
    // Sweep paddings so the two-worker nominal midpoint crosses every byte
    // of the first row, including its closing quote.
    let mut hit_closing_quote = false;
    for pad in 0..40usize {
        let mut data = Vec::from(&b"h1,h2\n"[..]);
        let row1_quote_open = data.len();
        data.push(b'"');
        data.extend(std::iter::repeat_n(b'A', pad));
        data.extend_from_slice(b"\",x\n\"BBBB\",y\n");
        let closing_quote = row1_quote_open + 1 + pad;
        assert_eq!(data[closing_quote], b'"');

        let data_start = 6u64;
        let midpoint = data_start + (data.len() as u64 - data_start) / 2;
        if midpoint == closing_quote as u64 {
            hit_closing_quote = true;
        }

        let (_tmp, _csv, out_single, index_single) =
            indexed(&data, IndexOptions::new().with_num_workers(1));
        let (_tmp2, _csv2, out_multi, index_multi) =
            indexed(&data, IndexOptions::new().with_num_workers(2));

        assert_eq!(
            read_offsets(&out_single),
            read_offsets(&out_multi),
            "pad {pad}"
        );
        assert_eq!(
            index_single.get_row_count().expect("rows"),
            index_multi.get_row_count().expect("rows"),
        );
    }
    assert!(hit_closing_quote, "sweep never landed on the closing quote");
}

#[test]
fn headers_match_independent_parser() {
    let data = b"Index,\"Girth (in)\",\"Height (ft)\",\"Volume(ft^3)\"\n1,8.3,70,10.3\n2,8.6,65,10.3\n";
    let (_tmp, _csv, _out, index) = indexed(data, IndexOptions::new());

    let mut reader = ReaderBuilder::new().from_reader(&data[..]);
    let expected: Vec<String> = reader
        .headers()
        .expect("csv headers")
        .iter()
        .map(str::to_owned)
        .collect();

    let count = index.get_column_count().expect("count");
    assert_eq!(count as usize, expected.len());
    for (i, expected_header) in expected.iter().enumerate() {
        assert_eq!(&index.get_header(i as u32).expect("header"), expected_header);
    }
}

#[test]
fn row_offsets_reconstruct_data_region() {
    let data =
        b"name,note,city\nana,\"line1\nline2\",oslo\nbo,\"say \"\"hi\"\"\",rome\ncy,plain,lima\n";
    let (_tmp, _csv, _out, index) = indexed(data, IndexOptions::new().with_num_workers(1));

    let rows = index.get_row_count().expect("rows");
    let mut reconstructed = Vec::new();
    for i in 0..rows {
        reconstructed.extend_from_slice(&index.read_row_raw(i).expect("row"));
    }
    let data_start = 15;
    assert_eq!(data[data_start - 1], b'\n');
    assert_eq!(reconstructed, &data[data_start..]);
}

struct CaptureGroups {
    groups: Vec<(u32, Vec<Vec<i32>>, Vec<Vec<String>>, u32)>,
}

impl GroupSink for CaptureGroups {
    fn begin(&mut self, _context: &GroupContext<'_>) -> rowdex::Result<()> {
        Ok(())
    }

    fn write_group(&mut self, group: &ColumnGroup) -> rowdex::Result<()> {
        self.groups.push((
            group.col_start,
            group.columns.clone(),
            group.dictionaries.clone(),
            group.max_global_id,
        ));
        Ok(())
    }

    fn finish(&mut self) -> rowdex::Result<()> {
        Ok(())
    }
}

/// Decodes the captured groups back into a row-major token table.
fn decode_tokens(groups: &[(u32, Vec<Vec<i32>>, Vec<Vec<String>>, u32)], rows: usize) -> Vec<Vec<String>> {
    let mut table = vec![Vec::new(); rows];
    for (_, columns, dictionaries, _) in groups {
        for (c, column) in columns.iter().enumerate() {
            for (r, &id) in column.iter().enumerate() {
                table[r].push(dictionaries[c][id as usize].clone());
            }
        }
    }
    table
}

#[test]
fn transpose_matches_independent_parser() {
    let data = b"Index,Girth,Height,Volume\n1,8.3,70,10.3\n2,8.6,65,10.3\n3,\"8,8\",63,\"10.2\"\n4,\"a\"\"b\",70,\n";
    for workers in [1usize, 3] {
        let (_tmp, _csv, out, mut index) = indexed(
            data,
            IndexOptions::new()
                .with_num_workers(workers)
                .with_columns_per_group(3),
        );
        let mut sink = CaptureGroups { groups: Vec::new() };
        index.map_int_transpose_into(&mut sink).expect("transpose");

        let rows = index.get_row_count().expect("rows") as usize;
        assert_eq!(rows, 4);
        let decoded = decode_tokens(&sink.groups, rows);

        let mut reader = ReaderBuilder::new().from_reader(&data[..]);
        let expected: Vec<Vec<String>> = reader
            .records()
            .map(|record| {
                record
                    .expect("csv record")
                    .iter()
                    .map(str::to_owned)
                    .collect()
            })
            .collect();
        assert_eq!(decoded, expected, "workers {workers}");

        // Two groups of widths 3 and 1 were processed.
        let meta_raw = fs::read(out.join(layout::COLUMN_CHUNK_META_FILE)).expect("meta");
        let meta: Vec<(u32, u32)> = meta_raw
            .chunks_exact(8)
            .map(|c| layout::decode_chunk_meta(c.try_into().expect("record")))
            .collect();
        assert_eq!(meta.len(), 2);
        assert_eq!(meta[0].0, 3);
        assert_eq!(meta[1].0, 1);
        for (_, _, dictionaries, max_global_id) in &sink.groups {
            let expected_max = dictionaries
                .iter()
                .map(Vec::len)
                .max()
                .unwrap_or(0)
                .saturating_sub(1) as u32;
            assert_eq!(*max_global_id, expected_max);
        }
    }
}

#[test]
fn header_only_file_produces_empty_offsets() {
    let data = b"a,b,c\n";
    let (_tmp, _csv, out, mut index) = indexed(data, IndexOptions::new());

    assert_eq!(index.get_row_count().expect("rows"), 0);
    assert_eq!(
        fs::metadata(out.join(layout::ROW_OFFSETS_FILE)).expect("meta").len(),
        0
    );

    // The transpose still records one metadata record per group.
    index.map_int_transpose().expect("transpose");
    let meta_raw = fs::read(out.join(layout::COLUMN_CHUNK_META_FILE)).expect("meta");
    let meta: Vec<(u32, u32)> = meta_raw
        .chunks_exact(8)
        .map(|c| layout::decode_chunk_meta(c.try_into().expect("record")))
        .collect();
    assert_eq!(meta, vec![(3, 0)]);
}

#[test]
fn operations_require_their_artifacts() {
    let tmp = TempDir::new().expect("tempdir");
    let csv = write_fixture(tmp.path(), b"a,b\n1,2\n");
    let out = tmp.path().join("out");
    let mut index = CsvIndex::new(&csv, &out).expect("construct");

    assert!(matches!(
        index.get_column_count(),
        Err(Error::NotIndexed { .. })
    ));
    assert!(matches!(index.get_header(0), Err(Error::NotIndexed { .. })));
    assert!(matches!(
        index.find_row_offsets(),
        Err(Error::NotIndexed { .. })
    ));

    index.parse_header_row().expect("parse header");
    assert!(matches!(
        index.map_int_transpose(),
        Err(Error::NotIndexed { .. })
    ));
    assert!(matches!(index.get_row_count(), Err(Error::NotIndexed { .. })));
}

#[test]
fn fresh_handle_reads_existing_artifacts() {
    let data = b"k,v\nalpha,1\nbeta,2\n";
    let (_tmp, csv, out, _index) = indexed(data, IndexOptions::new());

    let mut fresh = CsvIndex::new(&csv, &out).expect("construct");
    assert_eq!(fresh.get_column_count().expect("count"), 2);
    assert_eq!(fresh.get_header(0).expect("header"), "k");
    assert_eq!(fresh.get_row_count().expect("rows"), 2);
    assert_eq!(fresh.read_row_raw(1).expect("row"), b"beta,2\n");
    fresh.map_int_transpose().expect("transpose");
}

#[test]
fn invalid_configurations_are_rejected() {
    let tmp = TempDir::new().expect("tempdir");
    let out = tmp.path().join("out");

    assert!(matches!(
        CsvIndex::new("", &out),
        Err(Error::InvalidConfig { .. })
    ));
    assert!(matches!(
        CsvIndex::with_options(
            tmp.path().join("x.csv"),
            &out,
            IndexOptions::new().with_num_workers(0)
        ),
        Err(Error::InvalidConfig { .. })
    ));
    assert!(matches!(
        CsvIndex::with_options(
            tmp.path().join("x.csv"),
            &out,
            IndexOptions::new().with_delimiter(b'"')
        ),
        Err(Error::InvalidConfig { .. })
    ));
}
