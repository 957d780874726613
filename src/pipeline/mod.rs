//! Two-stage extraction pipeline.
//!
//! ```text
//! source ──files channel──▶ [worker pool] ──writes channel──▶ [writer pool] ──▶ chunks
//! ```
//!
//! **Workers** open each input (mapped from disk or handed over in
//! memory), locate and decode its db header eagerly, and forward an
//! opened [`CouchFile`] with its derived output name. **Writers**
//! project the by-seq documents into a pooled builder and append it to
//! the picked rolling chunk.
//!
//! ## Concurrency model
//!
//! - Bounded channels connect the stages; worker and writer counts are
//!   configured independently.
//! - Two inputs mapping to the same output name serialize through a
//!   per-output-filename mutex registry: `filename → {mutex, refcount}`
//!   under one registry lock, so entries disappear when the last
//!   holder releases and the registry lock is never held during I/O.
//!   Streams for the same output therefore interleave only at whole-
//!   append boundaries — never inside a JSON line.
//! - Input order is not preserved across workers; document order
//!   within one input is by-seq key order.
//!
//! ## Shutdown and failure
//!
//! The supervisor closes the files channel after feeding it; workers
//! drain and are joined; the writes channel closes; writers drain and
//! are joined. No cancellation, no retries. A failure on one input is
//! recorded in the mutex-guarded [`Report`] and the pipeline keeps
//! going; write-side failures likewise never tear the pool down.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Submodules
// ------------------------------------------------------------------------------------------------

pub mod output;

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use thiserror::Error;
use tracing::{error, info};

use crate::config::ExtractConfig;
use crate::couchfile::{CouchError, CouchFile, TreeKind};
use crate::etf::json::Projector;
use crate::pool::BufferPool;
use crate::source::SourceFile;

// ------------------------------------------------------------------------------------------------
// Error type and report
// ------------------------------------------------------------------------------------------------

/// Errors surfaced by pipeline stages.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Output-side I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Input parsing failure.
    #[error(transparent)]
    Couch(#[from] CouchError),
}

/// One input that failed, with the error that stopped it.
#[derive(Debug)]
pub struct FailedFile {
    /// Input path as given.
    pub input: String,
    /// What went wrong.
    pub error: PipelineError,
}

/// Outcome of one pipeline run.
#[derive(Debug, Default)]
pub struct Report {
    /// Inputs successfully opened and handed to the writers.
    pub processed: Vec<String>,
    /// Output files written or appended to.
    pub written: Vec<String>,
    /// Inputs that failed, in no particular order.
    pub errors: Vec<FailedFile>,
}

impl Report {
    /// True when every input made it through.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Run-wide collection vectors, each behind its own mutex.
#[derive(Debug, Default)]
struct SharedReport {
    processed: Mutex<Vec<String>>,
    written: Mutex<Vec<String>>,
    errors: Mutex<Vec<FailedFile>>,
}

impl SharedReport {
    fn push_processed(&self, input: String) {
        lock(&self.processed).push(input);
    }

    fn extend_written(&self, paths: Vec<String>) {
        lock(&self.written).extend(paths);
    }

    fn push_error(&self, input: String, error: PipelineError) {
        lock(&self.errors).push(FailedFile { input, error });
    }

    fn into_report(self) -> Report {
        Report {
            processed: self.processed.into_inner().unwrap_or_else(|p| p.into_inner()),
            written: self.written.into_inner().unwrap_or_else(|p| p.into_inner()),
            errors: self.errors.into_inner().unwrap_or_else(|p| p.into_inner()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ------------------------------------------------------------------------------------------------
// Per-output-filename lock registry
// ------------------------------------------------------------------------------------------------

struct LockEntry {
    mutex: Arc<Mutex<()>>,
    refs: usize,
}

/// Registry mapping output names to refcounted mutexes.
///
/// Entries exist only while some writer holds an [`OutputLock`] for
/// the name, which bounds the map when many unique outputs stream
/// through.
struct OutputLocks {
    inner: Mutex<HashMap<PathBuf, LockEntry>>,
}

impl OutputLocks {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(HashMap::new()),
        })
    }

    /// Insert-or-increment the entry for `key` and hand back its mutex
    /// wrapped in a release-on-drop guard.
    fn acquire(self: &Arc<Self>, key: &Path) -> OutputLock {
        let mutex = {
            let mut inner = lock(&self.inner);
            let entry = inner.entry(key.to_path_buf()).or_insert_with(|| LockEntry {
                mutex: Arc::new(Mutex::new(())),
                refs: 0,
            });
            entry.refs += 1;
            Arc::clone(&entry.mutex)
        };
        OutputLock {
            mutex,
            registry: Arc::clone(self),
            key: key.to_path_buf(),
        }
    }

    fn release(&self, key: &Path) {
        let mut inner = lock(&self.inner);
        if let Some(entry) = inner.get_mut(key) {
            entry.refs -= 1;
            if entry.refs == 0 {
                inner.remove(key);
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        lock(&self.inner).len()
    }
}

/// Refcounted hold on one output name's mutex.
struct OutputLock {
    mutex: Arc<Mutex<()>>,
    registry: Arc<OutputLocks>,
    key: PathBuf,
}

impl OutputLock {
    fn lock(&self) -> MutexGuard<'_, ()> {
        self.mutex.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Drop for OutputLock {
    fn drop(&mut self) {
        self.registry.release(&self.key);
    }
}

// ------------------------------------------------------------------------------------------------
// Pipeline
// ------------------------------------------------------------------------------------------------

/// One job handed from a worker to a writer.
struct WriteJob {
    couch: CouchFile,
    output: PathBuf,
    input: String,
}

/// The worker/writer pipeline for one extraction run.
pub struct Pipeline {
    config: Arc<ExtractConfig>,
    records: Arc<BufferPool>,
    builders: Arc<BufferPool>,
}

impl Pipeline {
    /// Build a pipeline around an immutable configuration.
    pub fn new(config: Arc<ExtractConfig>) -> Self {
        let records = BufferPool::new(config.pool_idle);
        let builders = BufferPool::new(config.pool_idle);
        Self {
            config,
            records,
            builders,
        }
    }

    /// Process every source to completion and return the run report.
    pub fn run(&self, sources: Vec<SourceFile>) -> Report {
        let workers = self.config.workers.max(1);
        let writers = self.config.writers.max(1);
        let (files_tx, files_rx) = flume::bounded::<SourceFile>(workers * 2);
        let (writes_tx, writes_rx) = flume::bounded::<WriteJob>(writers * 2);
        let shared = Arc::new(SharedReport::default());
        let locks = OutputLocks::new();

        let writer_handles: Vec<_> = (0..writers)
            .map(|i| {
                let rx = writes_rx.clone();
                let locks = Arc::clone(&locks);
                let config = Arc::clone(&self.config);
                let builders = Arc::clone(&self.builders);
                let shared = Arc::clone(&shared);
                thread::spawn(move || writer_loop(i, rx, locks, config, builders, shared))
            })
            .collect();
        drop(writes_rx);

        let worker_handles: Vec<_> = (0..workers)
            .map(|i| {
                let rx = files_rx.clone();
                let tx = writes_tx.clone();
                let config = Arc::clone(&self.config);
                let records = Arc::clone(&self.records);
                let shared = Arc::clone(&shared);
                thread::spawn(move || worker_loop(i, rx, tx, config, records, shared))
            })
            .collect();
        drop(files_rx);
        drop(writes_tx);

        for source in sources {
            if files_tx.send(source).is_err() {
                break;
            }
        }
        drop(files_tx);

        for handle in worker_handles {
            let _ = handle.join();
        }
        // Workers are done; their writes senders dropped with them, so
        // the writers drain and stop.
        for handle in writer_handles {
            let _ = handle.join();
        }

        match Arc::try_unwrap(shared) {
            Ok(inner) => inner.into_report(),
            Err(_) => Report::default(),
        }
    }

    /// Record-buffer pool, exposed for leak assertions in tests.
    pub fn record_pool(&self) -> &Arc<BufferPool> {
        &self.records
    }

    /// Builder pool, exposed for leak assertions in tests.
    pub fn builder_pool(&self) -> &Arc<BufferPool> {
        &self.builders
    }
}

// ------------------------------------------------------------------------------------------------
// Worker stage
// ------------------------------------------------------------------------------------------------

fn worker_loop(
    index: usize,
    rx: flume::Receiver<SourceFile>,
    tx: flume::Sender<WriteJob>,
    config: Arc<ExtractConfig>,
    records: Arc<BufferPool>,
    shared: Arc<SharedReport>,
) {
    info!(worker = index, "starting worker");
    for source in rx.iter() {
        let input = source.path.display().to_string();
        let opened = match source.data {
            Some(bytes) => CouchFile::from_bytes(bytes, Arc::clone(&records)),
            None => CouchFile::open(&source.path, Arc::clone(&records)),
        };
        match opened {
            Ok(couch) => {
                let output = output::output_base(&config.dest_dir, &source.path);
                shared.push_processed(input.clone());
                let job = WriteJob {
                    couch,
                    output,
                    input,
                };
                if tx.send(job).is_err() {
                    break;
                }
            }
            Err(err) => {
                error!(input = %input, error = %err, "failed to open input");
                shared.push_error(input, err.into());
            }
        }
    }
    info!(worker = index, "worker finished");
}

// ------------------------------------------------------------------------------------------------
// Writer stage
// ------------------------------------------------------------------------------------------------

fn writer_loop(
    index: usize,
    rx: flume::Receiver<WriteJob>,
    locks: Arc<OutputLocks>,
    config: Arc<ExtractConfig>,
    builders: Arc<BufferPool>,
    shared: Arc<SharedReport>,
) {
    info!(writer = index, "starting writer");
    for job in rx.iter() {
        let outcome = if config.dump_headers {
            output::dump_nodes(&job.couch, &config.dest_dir)
        } else {
            write_documents(&job, &locks, &config, &builders)
        };
        match outcome {
            Ok(paths) => shared.extend_written(paths),
            Err(err) => {
                error!(input = %job.input, error = %err, "failed to write output");
                shared.push_error(job.input, err);
            }
        }
    }
    info!(writer = index, "writer finished");
}

/// Project one input's by-seq documents and append them to its rolling
/// chunk under the per-output lock.
fn write_documents(
    job: &WriteJob,
    locks: &Arc<OutputLocks>,
    config: &ExtractConfig,
    builders: &Arc<BufferPool>,
) -> Result<Vec<String>, PipelineError> {
    let projector = if config.escape_strings {
        Projector::escaped()
    } else {
        Projector::new()
    };
    let mut builder = builders.get();
    job.couch.walk(TreeKind::BySeq, &mut |doc| {
        job.couch.project_document(doc, projector, &mut builder)
    })?;

    // The projection is complete before the lock is taken; one hold
    // appends one input's whole document stream.
    let output_lock = locks.acquire(&job.output);
    let appended = {
        let _guard = output_lock.lock();
        append_chunk(&job.output, &builder, config)
    };
    drop(output_lock);
    Ok(vec![appended?])
}

fn append_chunk(
    base: &Path,
    bytes: &[u8],
    config: &ExtractConfig,
) -> Result<String, PipelineError> {
    let path = output::pick_chunk(base, config.chunk_size, config.compress)?;
    let mut writer = output::ChunkWriter::create(&path, config.compress)?;
    writer.write_all(bytes)?;
    writer.close()?;
    Ok(path.display().to_string())
}
