//! Fixture builder synthesizing block-correct CouchDB file images.
//!
//! Writes the real thing, scaled down: 4 KiB blocks with kind bytes,
//! framed records (inline or MD5), kv/kp tree nodes, and a db-header
//! block at the end. Shared by the couchfile and pipeline suites.

use md5::{Digest, Md5};

use crate::etf::tests::helpers as etf;

pub(crate) const BLOCK: usize = 4096;

/// Incrementally built file image.
pub(crate) struct CouchImage {
    data: Vec<u8>,
}

impl CouchImage {
    pub(crate) fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.data
    }

    /// Append one logical byte, interleaving a body block-kind byte at
    /// every block boundary.
    fn push_byte(&mut self, b: u8) {
        if self.data.len() % BLOCK == 0 {
            self.data.push(0);
        }
        self.data.push(b);
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.push_byte(b);
        }
    }

    /// Append an inline record (length top bit set, no MD5). Returns
    /// the record's offset.
    pub(crate) fn append_record(&mut self, payload: &[u8]) -> u64 {
        let offset = self.data.len() as u64;
        let word = (payload.len() as u32) | 0x8000_0000;
        self.push_bytes(&word.to_be_bytes());
        self.push_bytes(payload);
        offset
    }

    /// Append an MD5-framed record (length top bit clear). Returns the
    /// record's offset.
    pub(crate) fn append_md5_record(&mut self, payload: &[u8]) -> u64 {
        let offset = self.data.len() as u64;
        let word = payload.len() as u32;
        self.push_bytes(&word.to_be_bytes());
        let digest: [u8; 16] = Md5::digest(payload).into();
        self.push_bytes(&digest);
        self.push_bytes(payload);
        offset
    }

    /// Pad to the next block boundary, mark it a header block, and
    /// append an MD5-framed record there. Returns the record's offset
    /// (just past the block-kind byte).
    pub(crate) fn append_header_record(&mut self, payload: &[u8]) -> u64 {
        while self.data.len() % BLOCK != 0 {
            self.data.push(0);
        }
        self.data.push(1);
        let offset = self.data.len() as u64;
        let word = payload.len() as u32;
        self.push_bytes(&word.to_be_bytes());
        let digest: [u8; 16] = Md5::digest(payload).into();
        self.push_bytes(&digest);
        self.push_bytes(payload);
        offset
    }

    /// Flip one physical byte, for corruption tests.
    pub(crate) fn corrupt(&mut self, offset: usize) {
        self.data[offset] ^= 0xff;
    }
}

// ------------------------------------------------------------------------------------------------
// Database fixtures
// ------------------------------------------------------------------------------------------------

/// One document to place in a fixture database.
pub(crate) struct DocSpec {
    pub(crate) id: Vec<u8>,
    pub(crate) seq: i64,
    /// Bare document term (no magic), in the JSON convention.
    pub(crate) body: Vec<u8>,
    pub(crate) deleted: bool,
    /// Inline the body in the leaf entry instead of writing a record.
    pub(crate) inline: bool,
}

impl DocSpec {
    pub(crate) fn new(id: &[u8], seq: i64, body: Vec<u8>) -> Self {
        Self {
            id: id.to_vec(),
            seq,
            body,
            deleted: false,
            inline: false,
        }
    }

    pub(crate) fn inline(mut self) -> Self {
        self.inline = true;
        self
    }

    pub(crate) fn deleted(mut self) -> Self {
        self.deleted = true;
        self
    }
}

/// Shorthand for a `{"<key>":<int>}` document term.
pub(crate) fn int_doc(key: &[u8], value: u8) -> Vec<u8> {
    etf::json_obj(&[(key, etf::small_int(value))])
}

/// Write document records plus one kv node per tree; returns
/// `(seq_root, id_root)` offsets.
pub(crate) fn write_tree(image: &mut CouchImage, docs: &[DocSpec]) -> (u64, u64) {
    let pointers: Vec<Vec<u8>> = docs
        .iter()
        .map(|doc| {
            if doc.inline {
                doc.body.clone()
            } else {
                let offset = image.append_record(&etf::with_magic(doc.body.clone()));
                etf::erl_int(offset as i64)
            }
        })
        .collect();

    let seq_entries: Vec<Vec<u8>> = docs
        .iter()
        .zip(&pointers)
        .map(|(doc, ptr)| {
            etf::tuple(&[
                etf::erl_int(doc.seq),
                etf::tuple(&[
                    etf::binary(&doc.id),
                    etf::nil(),
                    ptr.clone(),
                    etf::small_int(u8::from(doc.deleted)),
                ]),
            ])
        })
        .collect();
    let seq_node = etf::tuple(&[etf::atom(b"kv_node"), etf::list(&seq_entries)]);
    let seq_root = image.append_record(&etf::with_magic(seq_node));

    let id_entries: Vec<Vec<u8>> = docs
        .iter()
        .zip(&pointers)
        .map(|(doc, ptr)| {
            etf::tuple(&[
                etf::binary(&doc.id),
                etf::tuple(&[
                    etf::erl_int(doc.seq),
                    etf::nil(),
                    ptr.clone(),
                    etf::small_int(u8::from(doc.deleted)),
                ]),
            ])
        })
        .collect();
    let id_node = etf::tuple(&[etf::atom(b"kv_node"), etf::list(&id_entries)]);
    let id_root = image.append_record(&etf::with_magic(id_node));

    (seq_root, id_root)
}

/// Write a kp node pointing at `children`, in order. Returns its
/// offset.
pub(crate) fn write_kp_node(image: &mut CouchImage, children: &[u64]) -> u64 {
    let entries: Vec<Vec<u8>> = children
        .iter()
        .map(|&child| {
            etf::tuple(&[
                etf::nil(),
                etf::tuple(&[etf::erl_int(child as i64), etf::erl_int(1), etf::nil()]),
            ])
        })
        .collect();
    let node = etf::tuple(&[etf::atom(b"kp_node"), etf::list(&entries)]);
    image.append_record(&etf::with_magic(node))
}

/// Append a db-header block referencing the given tree roots.
pub(crate) fn write_header(
    image: &mut CouchImage,
    update_seq: i64,
    id_root: Option<u64>,
    seq_root: Option<u64>,
) -> u64 {
    let state = |root: Option<u64>| match root {
        Some(offset) => etf::tuple(&[
            etf::erl_int(offset as i64),
            etf::nil(),
            etf::erl_int(1),
        ]),
        None => etf::nil(),
    };
    let header = etf::tuple(&[
        etf::atom(b"db_header"),
        etf::small_int(7),
        etf::erl_int(update_seq),
        etf::nil(),
        state(id_root),
        state(seq_root),
    ]);
    image.append_header_record(&etf::with_magic(header))
}

/// A complete single-kv-node database image.
pub(crate) fn build_db(docs: &[DocSpec]) -> Vec<u8> {
    let mut image = CouchImage::new();
    let (seq_root, id_root) = write_tree(&mut image, docs);
    write_header(&mut image, docs.len() as i64, Some(id_root), Some(seq_root));
    image.finish()
}

/// A database whose header reports both trees empty.
pub(crate) fn build_empty_db() -> Vec<u8> {
    let mut image = CouchImage::new();
    write_header(&mut image, 0, None, None);
    image.finish()
}
