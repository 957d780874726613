//! Extraction configuration.
//!
//! One immutable [`ExtractConfig`] is built at startup and handed to
//! the pipeline constructors behind an `Arc`. Nothing in the crate
//! reads mutable global state.

use std::path::PathBuf;

/// Default number of writer threads.
pub const DEFAULT_WRITERS: usize = 4;

/// Default rolling threshold for output chunks (1 GiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024 * 1024;

/// Default cap on idle buffers kept by each pool.
pub const DEFAULT_POOL_IDLE: usize = 64;

/// Immutable settings for one extraction run.
#[derive(Debug, Clone)]
pub struct ExtractConfig {
    /// Directory that receives output chunks (and node dumps in
    /// dump-headers mode).
    pub dest_dir: PathBuf,

    /// Worker threads parsing input files.
    pub workers: usize,

    /// Writer threads appending projections to output chunks.
    pub writers: usize,

    /// Gzip each output chunk and suffix it `.gz`.
    pub compress: bool,

    /// Size threshold at which an output chunk rolls to the next index.
    ///
    /// The check runs once per append: a chunk below the threshold
    /// receives the whole projection even if that pushes it past the
    /// threshold.
    pub chunk_size: u64,

    /// Escape `"`, `\`, and control bytes inside emitted JSON strings.
    ///
    /// Off by default: CouchDB stored the bytes it was given, and the
    /// byte-faithful output reproduces them verbatim.
    pub escape_strings: bool,

    /// Write raw tree-node payloads to `.bin` files instead of
    /// projecting documents.
    pub dump_headers: bool,

    /// Idle buffers each pool retains before discarding returns.
    pub pool_idle: usize,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            dest_dir: PathBuf::from("."),
            workers: default_workers(),
            writers: DEFAULT_WRITERS,
            compress: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            escape_strings: false,
            dump_headers: false,
            pool_idle: DEFAULT_POOL_IDLE,
        }
    }
}

/// One worker per available core, falling back to 4 when the platform
/// will not say.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(4)
}
