//! On-disk CouchDB database file reader.
//!
//! A `.couch` file is an append-only sequence of 4 KiB blocks. Byte 0
//! of every block is a *block-kind* byte — `0` for body blocks, `1`
//! for header blocks — interleaved with record data and invisible to
//! the logical byte stream. Records are framed by a 32-bit big-endian
//! length whose top bit flags an "inline" payload; when the bit is
//! clear a 16-byte MD5 of the payload follows the length.
//!
//! The latest database state is rooted in the highest-addressed header
//! block whose payload decodes as a db-header term. The header points
//! at the roots of two copy-on-write trees (*by-id* and *by-seq*);
//! because the file is append-only, every child pointer addresses an
//! offset strictly below its parent, and the newest roots sit nearest
//! the end of the file.
//!
//! # On-disk layout
//!
//! ```text
//! block 0          block 1          block 2            block N
//! ┌─┬────────────┐ ┌─┬────────────┐ ┌─┬────────────┐   ┌─┬──────────┐
//! │1│ header rec │ │0│ records …  │ │0│ … records  │ … │1│ db header│
//! └─┴────────────┘ └─┴────────────┘ └─┴────────────┘   └─┴──────────┘
//!  ▲ block-kind byte, skipped by the cursor at every 4096 boundary
//!
//! record: [u32 len BE, top bit = inline][16-byte MD5 unless inline][len bytes]
//! ```
//!
//! # Concurrency model
//!
//! A [`CouchFile`] owns its mapped (or in-memory) bytes and is read
//! exclusively by the worker or writer currently holding it. Record
//! reads borrow scratch buffers from a shared [`BufferPool`] and
//! return them on every exit path.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests;

// ------------------------------------------------------------------------------------------------
// Submodules
// ------------------------------------------------------------------------------------------------

mod node;

pub use node::{DocBody, DocumentRef, NodeClass, TreeKind};

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;

use md5::{Digest, Md5};
use memmap2::Mmap;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::etf::{EtfError, Scanner, Term};
use crate::etf::json::JsonError;
use crate::pool::{BufferPool, PooledBuf};

/// Size of one file block; the first byte of every block is the
/// block-kind byte.
pub const BLOCK_SIZE: u64 = 4096;

/// Record-length top bit: set means the payload is inline (no MD5).
const INLINE_FLAG: u32 = 0x8000_0000;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors raised while reading a CouchDB file.
#[derive(Debug, Error)]
pub enum CouchError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A read ran past the end of the file.
    #[error("short read at offset {offset} ({needed} bytes missing)")]
    ShortRead {
        /// Physical offset where the read stalled.
        offset: u64,
        /// Bytes still required.
        needed: usize,
    },

    /// A record length field exceeds the file.
    #[error("record length {len} at offset {offset} exceeds file size {size}")]
    LenTooLarge {
        /// Declared payload length.
        len: u32,
        /// Record offset.
        offset: u64,
        /// Total file size.
        size: u64,
    },

    /// A dereferenced offset lies outside the file.
    #[error("offset {offset} outside file of {size} bytes")]
    OffsetOutOfRange {
        /// The offending offset.
        offset: u64,
        /// Total file size.
        size: u64,
    },

    /// A block began with something other than 0 or 1.
    #[error("unknown block kind byte {kind} at offset {offset}")]
    UnknownBlockKind {
        /// The byte found.
        kind: u8,
        /// Physical offset of the block-kind byte.
        offset: u64,
    },

    /// A tree pointer dereferenced into a header block.
    #[error("offset {offset} dereferences into a non-body block")]
    NotBodyBlock {
        /// The offending offset.
        offset: u64,
    },

    /// A record's MD5 did not match its payload.
    #[error("record MD5 mismatch at offset {offset}")]
    ChecksumMismatch {
        /// Record offset.
        offset: u64,
    },

    /// The backward header scan reached block 0 without a clean decode.
    #[error("no db header block found")]
    HeaderNotFound,

    /// The header term decoded but did not have the db-header shape.
    #[error("malformed db header: {0}")]
    BadHeader(&'static str),

    /// A disk version this reader does not understand.
    #[error("unsupported disk version {0}")]
    UnsupportedVersion(u8),

    /// A tree node term did not have the `{kind, body}` shape.
    #[error("malformed tree node at offset {offset}: {reason}")]
    BadNode {
        /// Node record offset.
        offset: u64,
        /// What was wrong.
        reason: &'static str,
    },

    /// A child pointer violated the copy-on-write ordering.
    #[error("child pointer {child} not below parent node at {parent}")]
    PointerOrder {
        /// The child offset found.
        child: u64,
        /// The parent node's offset.
        parent: u64,
    },

    /// Malformed ETF bytes inside a record payload.
    #[error(transparent)]
    Etf(#[from] EtfError),

    /// A document body that does not follow the JSON convention.
    #[error(transparent)]
    Json(#[from] JsonError),
}

// ------------------------------------------------------------------------------------------------
// Block framing cursor
// ------------------------------------------------------------------------------------------------

/// Sequential reader presenting the logical byte stream over the
/// physical block-interleaved bytes.
///
/// Positioned at any physical offset; every time the position crosses
/// a [`BLOCK_SIZE`] boundary the block-kind byte there is validated
/// and skipped, so callers see record bytes only.
pub(crate) struct BlockCursor<'a> {
    data: &'a [u8],
    pos: u64,
}

impl<'a> BlockCursor<'a> {
    pub(crate) fn new(data: &'a [u8], pos: u64) -> Self {
        Self { data, pos }
    }

    /// Fill `out` with logical bytes, stitching across block
    /// boundaries.
    pub(crate) fn read_exact(&mut self, out: &mut [u8]) -> Result<(), CouchError> {
        let mut filled = 0;
        while filled < out.len() {
            let pos = self.pos as usize;
            if pos >= self.data.len() {
                return Err(CouchError::ShortRead {
                    offset: self.pos,
                    needed: out.len() - filled,
                });
            }
            if self.pos % BLOCK_SIZE == 0 {
                let kind = self.data[pos];
                if kind > 1 {
                    return Err(CouchError::UnknownBlockKind {
                        kind,
                        offset: self.pos,
                    });
                }
                self.pos += 1;
                continue;
            }
            let in_block = (BLOCK_SIZE - self.pos % BLOCK_SIZE) as usize;
            let available = self.data.len() - pos;
            let take = (out.len() - filled).min(in_block).min(available);
            out[filled..filled + take].copy_from_slice(&self.data[pos..pos + take]);
            self.pos += take as u64;
            filled += take;
        }
        Ok(())
    }
}

/// Block-kind byte of the block containing `offset`.
fn block_kind_at(data: &[u8], offset: u64) -> Option<u8> {
    let base = (offset - offset % BLOCK_SIZE) as usize;
    data.get(base).copied()
}

// ------------------------------------------------------------------------------------------------
// Record envelope
// ------------------------------------------------------------------------------------------------

/// Read the framed record at `offset` into a pooled buffer.
///
/// Verifies the envelope MD5 when one is present (header records carry
/// one; body records are written inline).
fn read_record(data: &[u8], offset: u64, pool: &Arc<BufferPool>) -> Result<PooledBuf, CouchError> {
    let size = data.len() as u64;
    if offset >= size {
        return Err(CouchError::OffsetOutOfRange { offset, size });
    }
    let mut cursor = BlockCursor::new(data, offset);

    let mut word = [0u8; 4];
    cursor.read_exact(&mut word)?;
    let raw = u32::from_be_bytes(word);
    let len = raw & !INLINE_FLAG;
    let digest = if raw & INLINE_FLAG == 0 {
        let mut md5 = [0u8; 16];
        cursor.read_exact(&mut md5)?;
        Some(md5)
    } else {
        None
    };

    if offset + u64::from(len) > size {
        return Err(CouchError::LenTooLarge { len, offset, size });
    }

    let mut buf = pool.get();
    buf.resize(len as usize, 0);
    cursor.read_exact(&mut buf)?;

    if let Some(expected) = digest {
        let actual: [u8; 16] = Md5::digest(&buf[..]).into();
        if actual != expected {
            return Err(CouchError::ChecksumMismatch { offset });
        }
    }
    Ok(buf)
}

// ------------------------------------------------------------------------------------------------
// DB header
// ------------------------------------------------------------------------------------------------

/// Root pointer of one copy-on-write tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeState {
    /// File offset of the root node record.
    pub offset: u64,
    /// Size of the root node record.
    pub size: u32,
}

/// The subset of the db header this reader consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbHeader {
    /// On-disk format version.
    pub disk_version: u8,
    /// Highest update sequence at the time the header was written.
    pub update_seq: i64,
    /// By-id tree root; `None` when the tree holds no data.
    pub id_tree: Option<TreeState>,
    /// By-seq tree root; `None` when the tree holds no data.
    pub seq_tree: Option<TreeState>,
}

impl DbHeader {
    /// Decode the header out of its materialized term.
    fn from_term(term: &Term) -> Result<Self, CouchError> {
        let children = term
            .as_tuple()
            .ok_or(CouchError::BadHeader("header term is not a tuple"))?;
        if children.len() < 6 {
            return Err(CouchError::BadHeader("header tuple too short"));
        }
        if children[0].as_atom() != Some(&b"db_header"[..]) {
            return Err(CouchError::BadHeader("missing db_header atom"));
        }
        let disk_version = children[1]
            .as_int()
            .and_then(|v| u8::try_from(v).ok())
            .ok_or(CouchError::BadHeader("disk_version is not a small integer"))?;
        if !(6..=8).contains(&disk_version) {
            return Err(CouchError::UnsupportedVersion(disk_version));
        }
        let update_seq = children[2]
            .as_int()
            .ok_or(CouchError::BadHeader("update_seq is not an integer"))?;
        Ok(Self {
            disk_version,
            update_seq,
            id_tree: Self::tree_state(&children[4])?,
            seq_tree: Self::tree_state(&children[5])?,
        })
    }

    /// Decode one tree-state field. Anything but a well-formed pointer
    /// tuple means "no data".
    fn tree_state(term: &Term) -> Result<Option<TreeState>, CouchError> {
        let Some(children) = term.as_tuple() else {
            return Ok(None);
        };
        if children.len() < 3 {
            return Ok(None);
        }
        let offset = children[0]
            .as_int()
            .ok_or(CouchError::BadHeader("tree offset is not an integer"))?;
        let size = children[2]
            .as_int()
            .ok_or(CouchError::BadHeader("tree size is not an integer"))?;
        if offset == 0 && size == 0 {
            return Ok(None);
        }
        let offset =
            u64::try_from(offset).map_err(|_| CouchError::BadHeader("negative tree offset"))?;
        let size =
            u32::try_from(size).map_err(|_| CouchError::BadHeader("tree size out of range"))?;
        Ok(Some(TreeState { offset, size }))
    }
}

// ------------------------------------------------------------------------------------------------
// Header locator
// ------------------------------------------------------------------------------------------------

/// Scan header blocks from the end of the file downward and decode the
/// first (therefore latest) valid db header.
fn locate_header(data: &[u8], pool: &Arc<BufferPool>) -> Result<(u64, DbHeader), CouchError> {
    let size = data.len() as u64;
    let mut block = size / BLOCK_SIZE;
    loop {
        let base = block * BLOCK_SIZE;
        if base < size {
            match data[base as usize] {
                1 => match decode_header_at(data, base + 1, pool) {
                    Ok(header) => {
                        debug!(offset = base + 1, update_seq = header.update_seq, "located db header");
                        return Ok((base + 1, header));
                    }
                    Err(err) => {
                        warn!(offset = base, error = %err, "rejected db header candidate");
                    }
                },
                0 => {}
                kind => {
                    warn!(kind, offset = base, "unknown block kind during header scan");
                }
            }
        }
        if block == 0 {
            return Err(CouchError::HeaderNotFound);
        }
        block -= 1;
    }
}

fn decode_header_at(
    data: &[u8],
    offset: u64,
    pool: &Arc<BufferPool>,
) -> Result<DbHeader, CouchError> {
    let payload = read_record(data, offset, pool)?;
    let mut scanner = Scanner::new(&payload)?;
    let term = Term::build(&mut scanner)?;
    DbHeader::from_term(&term)
}

// ------------------------------------------------------------------------------------------------
// File handle
// ------------------------------------------------------------------------------------------------

/// The file's bytes, mapped from disk or handed over in memory.
#[derive(Debug)]
enum FileData {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl FileData {
    fn bytes(&self) -> &[u8] {
        match self {
            FileData::Mapped(map) => map,
            FileData::Owned(vec) => vec,
        }
    }
}

/// One opened CouchDB database file with its header decoded.
#[derive(Debug)]
pub struct CouchFile {
    data: FileData,
    pool: Arc<BufferPool>,
    /// The latest valid db header.
    pub header: DbHeader,
    /// Offset of the header record (just past its block-kind byte).
    pub header_offset: u64,
}

impl CouchFile {
    /// Map a file from disk and decode its header eagerly.
    ///
    /// Uses `unsafe { Mmap::map(..) }` but is memory-safe for the same
    /// reasons as every read-only mapping here: the mapping is never
    /// written through, and the extraction contract assumes inputs are
    /// not mutated underneath the run.
    pub fn open(path: impl AsRef<Path>, pool: Arc<BufferPool>) -> Result<Self, CouchError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let map = unsafe { Mmap::map(&file)? };
        let this = Self::from_data(FileData::Mapped(map), pool)?;
        info!(
            path = %path.display(),
            size = this.size(),
            update_seq = this.header.update_seq,
            "opened couch file"
        );
        Ok(this)
    }

    /// Build over in-memory bytes (a file delivered by a tar stream).
    pub fn from_bytes(bytes: Vec<u8>, pool: Arc<BufferPool>) -> Result<Self, CouchError> {
        Self::from_data(FileData::Owned(bytes), pool)
    }

    fn from_data(data: FileData, pool: Arc<BufferPool>) -> Result<Self, CouchError> {
        let (header_offset, header) = locate_header(data.bytes(), &pool)?;
        Ok(Self {
            data,
            pool,
            header,
            header_offset,
        })
    }

    /// Total physical file size in bytes.
    pub fn size(&self) -> u64 {
        self.data.bytes().len() as u64
    }

    /// Read the record at `offset` into a pooled buffer.
    pub fn read_node(&self, offset: u64) -> Result<PooledBuf, CouchError> {
        read_record(self.data.bytes(), offset, &self.pool)
    }

    /// Check that `offset` dereferences into a body block inside the
    /// file.
    pub(crate) fn check_body_offset(&self, offset: u64) -> Result<(), CouchError> {
        let size = self.size();
        if offset >= size {
            return Err(CouchError::OffsetOutOfRange { offset, size });
        }
        match block_kind_at(self.data.bytes(), offset) {
            Some(0) => Ok(()),
            Some(1) => Err(CouchError::NotBodyBlock { offset }),
            Some(kind) => Err(CouchError::UnknownBlockKind {
                kind,
                offset: offset - offset % BLOCK_SIZE,
            }),
            None => Err(CouchError::OffsetOutOfRange { offset, size }),
        }
    }
}
