//! Output layer: rolling chunk files, optional gzip, node dumps.
//!
//! Output for one input file is appended to a *chunk*: the lowest-
//! indexed file `<base>.<i>[.gz]` still below the configured size
//! threshold. The size check runs once per append — a chunk under the
//! threshold takes the whole projection, then rolls on a later pick.
//!
//! Appending to an existing `.gz` produces a multi-member gzip stream,
//! which every conforming decoder concatenates transparently.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::trace;

use super::PipelineError;
use crate::couchfile::{CouchFile, TreeKind};

/// Derive the output base name for an input path: its stem with a
/// `.json` extension, placed in the destination directory.
pub fn output_base(dest: &Path, input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    dest.join(format!("{stem}.json"))
}

/// Name of chunk `index` for an output base.
pub fn chunk_path(base: &Path, index: u32, compress: bool) -> PathBuf {
    let suffix = if compress { ".gz" } else { "" };
    PathBuf::from(format!("{}.{index}{suffix}", base.display()))
}

/// Pick the chunk an append should go to: the smallest index whose
/// file is absent or still below the threshold.
pub fn pick_chunk(base: &Path, chunk_size: u64, compress: bool) -> io::Result<PathBuf> {
    for index in 0..=u32::MAX {
        let path = chunk_path(base, index, compress);
        match fs::metadata(&path) {
            Ok(meta) if meta.len() >= chunk_size => continue,
            Ok(_) => return Ok(path),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(path),
            Err(err) => return Err(err),
        }
    }
    Err(io::Error::other("chunk index space exhausted"))
}

// ------------------------------------------------------------------------------------------------
// Chunk writer
// ------------------------------------------------------------------------------------------------

enum Sink {
    Plain(File),
    Gzip(BufWriter<GzEncoder<File>>),
}

/// Append-mode writer over one chunk file, optionally gzipped.
pub struct ChunkWriter {
    sink: Sink,
}

impl ChunkWriter {
    /// Open (or create) the chunk for appending.
    pub fn create(path: &Path, compress: bool) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let sink = if compress {
            Sink::Gzip(BufWriter::new(GzEncoder::new(file, Compression::default())))
        } else {
            Sink::Plain(file)
        };
        trace!(path = %path.display(), compress, "opened output chunk");
        Ok(Self { sink })
    }

    /// Append bytes.
    pub fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        match &mut self.sink {
            Sink::Plain(file) => file.write_all(bytes),
            Sink::Gzip(writer) => writer.write_all(bytes),
        }
    }

    /// Flush the buffer, finish the gzip member, and sync the file.
    ///
    /// The first error is reported, but every remaining step still
    /// runs so the file is left as closed as it can be.
    pub fn close(self) -> io::Result<()> {
        match self.sink {
            Sink::Plain(mut file) => {
                let flushed = file.flush();
                let synced = file.sync_all();
                flushed.and(synced)
            }
            Sink::Gzip(mut writer) => {
                let mut first: Option<io::Error> = None;
                if let Err(err) = writer.flush() {
                    first.get_or_insert(err);
                }
                let (encoder, residue) = writer.into_parts();
                if let Err(err) = residue {
                    first.get_or_insert(io::Error::other(err));
                }
                match encoder.finish() {
                    Ok(file) => {
                        if let Err(err) = file.sync_all() {
                            first.get_or_insert(err);
                        }
                    }
                    Err(err) => {
                        first.get_or_insert(err);
                    }
                }
                match first {
                    None => Ok(()),
                    Some(err) => Err(err),
                }
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Node dumps
// ------------------------------------------------------------------------------------------------

/// Dump every tree node's raw payload to
/// `<dest>/{id,seq}-{kp,kv}-<offset>.bin`, both trees.
pub fn dump_nodes(couch: &CouchFile, dest: &Path) -> Result<Vec<String>, PipelineError> {
    let mut written = Vec::new();
    for tree in [TreeKind::ById, TreeKind::BySeq] {
        couch.walk_nodes(tree, &mut |offset, class, payload| {
            let path = dest.join(format!("{}-{}-{offset}.bin", tree.label(), class.label()));
            fs::write(&path, payload)?;
            written.push(path.display().to_string());
            Ok(())
        })?;
    }
    Ok(written)
}
