mod header;
pub(crate) mod machine;
mod offsets;

pub(crate) use header::{
    column_count_from_index, data_region_start, index_header, read_all_headers, read_header,
};
pub(crate) use offsets::{index_rows, load_row_offsets, read_row_raw, row_count_from_index};
