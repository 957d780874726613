//! Command-line entry point.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use decouch::source::collect_sources;
use decouch::{ExtractConfig, Pipeline};

/// Extract documents from CouchDB database files as newline-delimited
/// JSON.
#[derive(Parser)]
#[command(name = "decouch", version, about)]
struct Cli {
    /// A `.couch` file, or a directory scanned for `.couch` files.
    source: PathBuf,

    /// Directory that receives the output.
    dest: PathBuf,

    /// Worker threads parsing inputs.
    #[arg(long)]
    workers: Option<usize>,

    /// Writer threads appending output chunks.
    #[arg(long, default_value_t = decouch::config::DEFAULT_WRITERS)]
    writers: usize,

    /// Gzip output chunks (adds a .gz suffix).
    #[arg(long)]
    compress: bool,

    /// Size threshold in bytes at which output chunks roll over.
    #[arg(long, default_value_t = decouch::config::DEFAULT_CHUNK_SIZE)]
    chunk_size: u64,

    /// Escape quotes, backslashes, and control bytes in JSON strings.
    #[arg(long)]
    escape_json: bool,

    /// Dump raw tree-node payloads instead of extracting documents.
    #[arg(long)]
    dump_headers: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = ExtractConfig {
        dest_dir: cli.dest,
        workers: cli.workers.unwrap_or_else(decouch::config::default_workers),
        writers: cli.writers,
        compress: cli.compress,
        chunk_size: cli.chunk_size,
        escape_strings: cli.escape_json,
        dump_headers: cli.dump_headers,
        ..ExtractConfig::default()
    };

    let sources = match collect_sources(&cli.source) {
        Ok(sources) => sources,
        Err(err) => {
            error!(source = %cli.source.display(), error = %err, "failed to enumerate sources");
            return ExitCode::FAILURE;
        }
    };
    if sources.is_empty() {
        info!(source = %cli.source.display(), "nothing to extract");
        return ExitCode::SUCCESS;
    }

    let report = Pipeline::new(Arc::new(config)).run(sources);
    info!(
        processed = report.processed.len(),
        written = report.written.len(),
        failed = report.errors.len(),
        "extraction finished"
    );
    for failure in &report.errors {
        error!(input = %failure.input, error = %failure.error, "input failed");
    }

    if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
