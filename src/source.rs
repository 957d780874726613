//! Input file contract and discovery.
//!
//! Inputs may arrive two ways: as paths on disk, or as in-memory bytes
//! handed over by an upstream tar-stream collaborator. [`SourceFile`]
//! is the contract both speak — when `data` is `None` the worker opens
//! the path itself.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

/// One input file queued for extraction.
#[derive(Debug)]
pub struct SourceFile {
    /// Path of the input; used to derive the output name even when the
    /// bytes arrived in memory.
    pub path: PathBuf,
    /// File bytes when a tar stream already extracted them; `None`
    /// means "open `path` from disk".
    pub data: Option<Vec<u8>>,
    /// Size in bytes.
    pub size: u64,
}

impl SourceFile {
    /// A source read from disk at extraction time.
    pub fn on_disk(path: PathBuf, size: u64) -> Self {
        Self {
            path,
            data: None,
            size,
        }
    }

    /// A source delivered in memory.
    pub fn in_memory(path: PathBuf, data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        Self {
            path,
            data: Some(data),
            size,
        }
    }
}

/// Enumerate inputs under `path`: the file itself, or every `.couch`
/// file below a directory, in sorted order.
pub fn collect_sources(path: &Path) -> io::Result<Vec<SourceFile>> {
    let mut sources = Vec::new();
    let meta = fs::metadata(path)?;
    if meta.is_file() {
        sources.push(SourceFile::on_disk(path.to_path_buf(), meta.len()));
    } else {
        collect_dir(path, &mut sources)?;
        sources.sort_by(|a, b| a.path.cmp(&b.path));
    }
    debug!(count = sources.len(), root = %path.display(), "collected sources");
    Ok(sources)
}

fn collect_dir(dir: &Path, sources: &mut Vec<SourceFile>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_dir(&path, sources)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some("couch") {
            let size = entry.metadata()?.len();
            sources.push(SourceFile::on_disk(path, size));
        }
    }
    Ok(())
}
