//! Fixture support for the integration suite: a minimal ETF encoder
//! and a block-correct CouchDB file image builder, driven through the
//! public crate surface only.

use md5::{Digest, Md5};

const BLOCK: usize = 4096;

// ------------------------------------------------------------------------------------------------
// ETF encoding
// ------------------------------------------------------------------------------------------------

pub fn with_magic(term: Vec<u8>) -> Vec<u8> {
    let mut out = vec![131];
    out.extend_from_slice(&term);
    out
}

pub fn small_int(v: u8) -> Vec<u8> {
    vec![97, v]
}

pub fn int(v: i32) -> Vec<u8> {
    let mut out = vec![98];
    out.extend_from_slice(&v.to_be_bytes());
    out
}

pub fn erl_int(v: i64) -> Vec<u8> {
    if (0..=255).contains(&v) {
        small_int(v as u8)
    } else {
        int(v as i32)
    }
}

pub fn atom(name: &[u8]) -> Vec<u8> {
    let mut out = vec![100];
    out.extend_from_slice(&(name.len() as u16).to_be_bytes());
    out.extend_from_slice(name);
    out
}

pub fn binary(bytes: &[u8]) -> Vec<u8> {
    let mut out = vec![109];
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
    out
}

pub fn nil() -> Vec<u8> {
    vec![106]
}

pub fn tuple(items: &[Vec<u8>]) -> Vec<u8> {
    let mut out = vec![104, items.len() as u8];
    for item in items {
        out.extend_from_slice(item);
    }
    out
}

pub fn list(items: &[Vec<u8>]) -> Vec<u8> {
    let mut out = vec![108];
    out.extend_from_slice(&(items.len() as u32).to_be_bytes());
    for item in items {
        out.extend_from_slice(item);
    }
    out.push(106);
    out
}

/// `{"<key>":<value>}` in the CouchDB object convention.
pub fn json_obj(members: &[(&[u8], Vec<u8>)]) -> Vec<u8> {
    let pairs: Vec<Vec<u8>> = members
        .iter()
        .map(|(key, value)| tuple(&[binary(key), value.clone()]))
        .collect();
    tuple(&[list(&pairs)])
}

// ------------------------------------------------------------------------------------------------
// File image building
// ------------------------------------------------------------------------------------------------

pub struct CouchImage {
    data: Vec<u8>,
}

impl CouchImage {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn finish(self) -> Vec<u8> {
        self.data
    }

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

    pub fn append_record(&mut self, payload: &[u8]) -> u64 {
        let offset = self.data.len() as u64;
        let word = (payload.len() as u32) | 0x8000_0000;
        self.push_bytes(&word.to_be_bytes());
        self.push_bytes(payload);
        offset
    }

    pub fn append_header_record(&mut self, payload: &[u8]) -> u64 {
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
}

/// A complete database image holding `(id, seq, doc-term)` documents
/// in one kv node per tree.
pub fn build_db(docs: &[(&[u8], i64, Vec<u8>)]) -> Vec<u8> {
    let mut image = CouchImage::new();

    let pointers: Vec<Vec<u8>> = docs
        .iter()
        .map(|(_, _, body)| {
            let offset = image.append_record(&with_magic(body.clone()));
            erl_int(offset as i64)
        })
        .collect();

    let seq_entries: Vec<Vec<u8>> = docs
        .iter()
        .zip(&pointers)
        .map(|((id, seq, _), ptr)| {
            tuple(&[
                erl_int(*seq),
                tuple(&[binary(id), nil(), ptr.clone(), small_int(0)]),
            ])
        })
        .collect();
    let seq_root = image.append_record(&with_magic(tuple(&[
        atom(b"kv_node"),
        list(&seq_entries),
    ])));

    let id_entries: Vec<Vec<u8>> = docs
        .iter()
        .zip(&pointers)
        .map(|((id, seq, _), ptr)| {
            tuple(&[
                binary(id),
                tuple(&[erl_int(*seq), nil(), ptr.clone(), small_int(0)]),
            ])
        })
        .collect();
    let id_root = image.append_record(&with_magic(tuple(&[
        atom(b"kv_node"),
        list(&id_entries),
    ])));

    let state = |offset: u64| tuple(&[erl_int(offset as i64), nil(), erl_int(1)]);
    let header = tuple(&[
        atom(b"db_header"),
        small_int(7),
        erl_int(docs.len() as i64),
        nil(),
        state(id_root),
        state(seq_root),
    ]);
    image.append_header_record(&with_magic(header));
    image.finish()
}
