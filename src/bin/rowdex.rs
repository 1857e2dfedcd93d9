use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use rayon::prelude::*;
use walkdir::WalkDir;

use rowdex::{logger, CsvIndex, IndexOptions};

#[derive(Parser)]
#[command(
    name = "rowdex",
    version,
    about = "Index large CSV files into random-access binary artifacts"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index one or more inputs: header index, row offsets, optional
    /// dictionary-encoding transpose.
    Index(Box<IndexArgs>),
    /// Print the indexed headers of one input.
    Headers(HeadersArgs),
}

#[derive(Parser, Clone)]
struct IndexArgs {
    /// Input files or directories (recurses directories for *.csv).
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output directory root; each input gets a subdirectory named after its
    /// file stem.
    #[arg(long, conflicts_with = "out")]
    out_dir: Option<PathBuf>,

    /// Output directory for the artifacts (only valid with a single input).
    #[arg(long, conflicts_with = "out_dir")]
    out: Option<PathBuf>,

    /// Field delimiter.
    #[arg(long)]
    delimiter: Option<char>,

    /// Quote character.
    #[arg(long)]
    quote: Option<char>,

    /// Drop rows whose field count does not match the header instead of
    /// aborting.
    #[arg(long)]
    skip_faulty_rows: bool,

    /// Also run the dictionary-encoding transpose.
    #[arg(long)]
    transpose: bool,

    /// Number of worker threads.
    #[arg(long)]
    jobs: Option<usize>,

    /// Per-worker read buffer size in bytes.
    #[arg(long)]
    chunk_bytes: Option<usize>,

    /// Column group width for the transpose.
    #[arg(long)]
    columns_per_group: Option<usize>,

    /// Stop on first error.
    #[arg(long)]
    fail_fast: bool,

    /// Append warnings and errors to this file.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[derive(Parser, Clone)]
struct HeadersArgs {
    input: PathBuf,

    /// Directory holding (or receiving) the header index.
    #[arg(long)]
    out_dir: PathBuf,

    /// Field delimiter.
    #[arg(long)]
    delimiter: Option<char>,

    /// Quote character.
    #[arg(long)]
    quote: Option<char>,

    /// Emit JSON instead of human readable output.
    #[arg(long)]
    json: bool,
}

type AnyError = Box<dyn std::error::Error + Send + Sync>;

fn main() -> Result<(), AnyError> {
    let cli = Cli::parse();

    match cli.command {
        Command::Index(args) => run_index(&args),
        Command::Headers(args) => run_headers(&args),
    }
}

fn run_index(args: &IndexArgs) -> Result<(), AnyError> {
    if let Some(path) = &args.log_file {
        logger::set_log_file(path)?;
    }
    if let Some(jobs) = args.jobs {
        // Best-effort: configure global rayon pool once. Ignore error if already set.
        let _ = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build_global();
    }

    let files = discover_inputs(&args.inputs);
    if files.is_empty() {
        return Err("no csv inputs found".into());
    }
    if args.out.is_some() && files.len() != 1 {
        return Err("--out requires a single input".into());
    }

    let mut tasks: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(files.len());
    if let Some(out) = &args.out {
        tasks.push((files[0].clone(), out.clone()));
    } else {
        let root = args
            .out_dir
            .clone()
            .ok_or("either --out or --out-dir is required")?;
        for input in files {
            let stem = input
                .file_stem()
                .map_or_else(|| "output".into(), |s| s.to_string_lossy().into_owned());
            let output = root.join(stem);
            tasks.push((input, output));
        }
    }

    let process = |(input, output): (PathBuf, PathBuf)| -> Result<(), AnyError> {
        let _scope = logger::scoped(input.display().to_string());
        index_one(&input, &output, args)
    };

    if args.fail_fast {
        tasks
            .into_par_iter()
            .map(process)
            .collect::<Result<Vec<_>, _>>()?;
    } else {
        let results = tasks
            .into_par_iter()
            .map(|task| {
                let res = process(task);
                if let Err(ref err) = res {
                    logger::log_error(&err.to_string());
                }
                res
            })
            .collect::<Vec<_>>();
        let failures = results.iter().filter(|r| r.is_err()).count();
        if failures > 0 {
            return Err(format!("completed with {failures} failures").into());
        }
    }

    Ok(())
}

fn index_one(input: &Path, output: &Path, args: &IndexArgs) -> Result<(), AnyError> {
    let mut index = CsvIndex::with_options(input, output, build_options(args)?)?;
    index.parse_header_row()?;
    index.find_row_offsets()?;
    if args.transpose {
        index.map_int_transpose()?;
    }
    println!(
        "{} -> {}  columns={} rows={}",
        input.display(),
        output.display(),
        index.get_column_count()?,
        index.get_row_count()?
    );
    Ok(())
}

fn build_options(args: &IndexArgs) -> Result<IndexOptions, AnyError> {
    let mut options = IndexOptions::new().with_skip_faulty_rows(args.skip_faulty_rows);
    if let Some(delimiter) = args.delimiter {
        options = options.with_delimiter(ascii_byte(delimiter, "delimiter")?);
    }
    if let Some(quote) = args.quote {
        options = options.with_quote(ascii_byte(quote, "quote")?);
    }
    if let Some(jobs) = args.jobs {
        options = options.with_num_workers(jobs);
    }
    if let Some(bytes) = args.chunk_bytes {
        options = options.with_chunk_bytes(bytes);
    }
    if let Some(columns) = args.columns_per_group {
        options = options.with_columns_per_group(columns);
    }
    Ok(options)
}

fn ascii_byte(ch: char, what: &str) -> Result<u8, AnyError> {
    if ch.is_ascii() {
        Ok(ch as u8)
    } else {
        Err(format!("{what} must be a single ASCII character").into())
    }
}

fn run_headers(args: &HeadersArgs) -> Result<(), AnyError> {
    let mut options = IndexOptions::new();
    if let Some(delimiter) = args.delimiter {
        options = options.with_delimiter(ascii_byte(delimiter, "delimiter")?);
    }
    if let Some(quote) = args.quote {
        options = options.with_quote(ascii_byte(quote, "quote")?);
    }
    let mut index = CsvIndex::with_options(&args.input, &args.out_dir, options)?;
    if index.get_column_count().is_err() {
        index.parse_header_row()?;
    }

    let count = index.get_column_count()?;
    if args.json {
        #[derive(serde::Serialize)]
        struct HeadersJson {
            column_count: u32,
            headers: Vec<String>,
        }
        let mut headers = Vec::with_capacity(count as usize);
        for i in 0..count {
            headers.push(index.get_header(i)?);
        }
        let payload = HeadersJson {
            column_count: count,
            headers,
        };
        serde_json::to_writer_pretty(std::io::stdout(), &payload)?;
        println!();
    } else {
        println!("Columns: {count}  File: {}", args.input.display());
        for i in 0..count {
            println!("[{i:>3}] {}", index.get_header(i)?);
        }
    }
    Ok(())
}

fn discover_inputs(inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            for entry in WalkDir::new(input)
                .follow_links(false)
                .into_iter()
                .filter_map(Result::ok)
            {
                let path = entry.path();
                if path.is_file() && is_csv(path) {
                    files.push(path.to_path_buf());
                }
            }
        } else if input.is_file() {
            files.push(input.clone());
        }
        // Non-existent paths are ignored; shell globbing typically expands patterns.
    }
    files.sort();
    files.dedup();
    files
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}
