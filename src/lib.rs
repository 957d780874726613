//! # decouch
//!
//! Extracts documents from on-disk CouchDB database files (`.couch`)
//! and emits their contents as newline-delimited JSON, processing many
//! input files concurrently.
//!
//! A CouchDB file is an append-only log of 4 KiB blocks whose latest
//! state is rooted in a trailing db-header record. The header points at
//! two copy-on-write B+-tree-like indexes (*by-id* and *by-seq*) whose
//! leaves embed document bodies serialized in Erlang External Term
//! Format (ETF). This crate locates the header, walks the by-seq tree,
//! and rewrites each document's ETF body as one JSON line.
//!
//! ## Data flow
//!
//! ```text
//!                ┌───────────────────────────────────────────┐
//!  .couch file ─▶│ couchfile: locate header ─▶ walk seq tree │
//!                │      │                          │         │
//!                │  block-strip cursor        leaf entries   │
//!                └──────┼──────────────────────────┼─────────┘
//!                       ▼                          ▼
//!                  etf::Scanner ──────▶ etf::json projector
//!                                              │
//!                     pipeline: workers ─▶ writers ─▶ rolling
//!                     (bounded channels)       chunks [.gz]
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`couchfile`] | Block framing, record envelopes, header location, tree walking |
//! | [`etf`] | Streaming ETF scanner, owned term tree, ETF→JSON projection |
//! | [`pipeline`] | Worker/writer pools, per-output locking, rolling chunk output |
//! | [`pool`] | Reusable byte-buffer pools |
//! | [`source`] | Input file contract and `.couch` discovery |
//! | [`config`] | Immutable extraction configuration |
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use decouch::{ExtractConfig, Pipeline};
//! use std::sync::Arc;
//!
//! let config = ExtractConfig {
//!     dest_dir: "/tmp/out".into(),
//!     ..ExtractConfig::default()
//! };
//! let sources = decouch::source::collect_sources("/data/shards".as_ref()).unwrap();
//! let report = Pipeline::new(Arc::new(config)).run(sources);
//! assert!(report.errors.is_empty());
//! ```

pub mod config;
pub mod couchfile;
pub mod etf;
pub mod pipeline;
pub mod pool;
pub mod source;

pub use config::ExtractConfig;
pub use couchfile::CouchFile;
pub use pipeline::{Pipeline, Report};
pub use source::SourceFile;
