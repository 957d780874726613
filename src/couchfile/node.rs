//! Tree-node decoding and recursive tree walking.
//!
//! Every node record payload is one ETF term shaped `{kind, body}`:
//! `kind` is the atom `kp_node` (pointer node) or `kv_node` (leaf),
//! `body` an ordered entry list. Pointer entries are
//! `{key, {child_offset, child_size, reduce}}`; only the child offset
//! is consumed. Leaf entries differ per tree:
//!
//! - by-seq: `{seq, {doc_id, rev, body_ptr, deleted, ...}}`
//! - by-id:  `{doc_id, {seq, rev, body_ptr, ...}}`
//!
//! `body_ptr` is either an integer file offset of the document record
//! or the document term inlined in place; the parser captures the
//! inlined span without materializing it.
//!
//! Walks are depth-first and left-to-right, which preserves the tree's
//! key order. The copy-on-write invariant — every child offset lies
//! strictly below its parent — is enforced on descent.

use tracing::trace;

use super::{CouchError, CouchFile, TreeState};
use crate::etf::json::Projector;
use crate::etf::{Scanner, TermTag};

/// Which of the two header-rooted trees to walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeKind {
    /// Documents ordered by id.
    ById,
    /// Documents ordered by update sequence.
    BySeq,
}

impl TreeKind {
    /// Short label used in dump filenames and logs.
    pub fn label(self) -> &'static str {
        match self {
            TreeKind::ById => "id",
            TreeKind::BySeq => "seq",
        }
    }
}

/// Node class, as named by the kind atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeClass {
    /// Interior `kp_node`.
    Pointer,
    /// Leaf `kv_node`.
    Leaf,
}

impl NodeClass {
    /// Short label used in dump filenames.
    pub fn label(self) -> &'static str {
        match self {
            NodeClass::Pointer => "kp",
            NodeClass::Leaf => "kv",
        }
    }
}

/// Where a document body lives.
#[derive(Debug, Clone, Copy)]
pub enum DocBody<'a> {
    /// The document term inlined in the leaf entry.
    Inline(&'a [u8]),
    /// Offset of the framed document record.
    Offset(u64),
}

/// One leaf entry, borrowed from its node buffer.
#[derive(Debug, Clone, Copy)]
pub struct DocumentRef<'a> {
    /// Document id bytes.
    pub id: &'a [u8],
    /// Update sequence number.
    pub seq: i64,
    /// Body location.
    pub body: DocBody<'a>,
    /// Deletion flag, when the entry carries one.
    pub deleted: bool,
}

impl CouchFile {
    /// Walk a tree from its header root, invoking `visit` for every
    /// leaf entry in key order. A missing tree visits nothing.
    pub fn walk<F>(&self, tree: TreeKind, visit: &mut F) -> Result<(), CouchError>
    where
        F: FnMut(&DocumentRef<'_>) -> Result<(), CouchError>,
    {
        match self.tree_root(tree) {
            Some(state) => {
                self.check_body_offset(state.offset)?;
                self.walk_at(tree, state.offset, visit)
            }
            None => Ok(()),
        }
    }

    /// Walk a tree node-by-node, handing `visit` each node's offset,
    /// class, and raw record payload. Used by dump-headers mode.
    pub fn walk_nodes<F>(&self, tree: TreeKind, visit: &mut F) -> Result<(), CouchError>
    where
        F: FnMut(u64, NodeClass, &[u8]) -> Result<(), CouchError>,
    {
        match self.tree_root(tree) {
            Some(state) => {
                self.check_body_offset(state.offset)?;
                self.walk_nodes_at(tree, state.offset, visit)
            }
            None => Ok(()),
        }
    }

    /// Project one document into JSON bytes appended to `out`.
    pub fn project_document(
        &self,
        doc: &DocumentRef<'_>,
        projector: Projector,
        out: &mut Vec<u8>,
    ) -> Result<(), CouchError> {
        match doc.body {
            DocBody::Inline(span) => {
                let mut scanner = Scanner::embedded(span);
                projector.write_document(&mut scanner, out)?;
            }
            DocBody::Offset(offset) => {
                self.check_body_offset(offset)?;
                let buf = self.read_node(offset)?;
                let mut scanner = Scanner::new(&buf)?;
                projector.write_document(&mut scanner, out)?;
            }
        }
        Ok(())
    }

    fn tree_root(&self, tree: TreeKind) -> Option<TreeState> {
        match tree {
            TreeKind::ById => self.header.id_tree,
            TreeKind::BySeq => self.header.seq_tree,
        }
    }

    fn walk_at<F>(&self, tree: TreeKind, offset: u64, visit: &mut F) -> Result<(), CouchError>
    where
        F: FnMut(&DocumentRef<'_>) -> Result<(), CouchError>,
    {
        let buf = self.read_node(offset)?;
        let mut scanner = Scanner::new(&buf)?;
        match read_node_class(&mut scanner, offset)? {
            NodeClass::Pointer => {
                let children = parse_pointers(&mut scanner, offset)?;
                trace!(offset, children = children.len(), "descending kp node");
                // Release the node buffer before descending so the pool
                // holds one buffer per level at most.
                drop(buf);
                for child in children {
                    self.descend_check(child, offset)?;
                    self.walk_at(tree, child, visit)?;
                }
            }
            NodeClass::Leaf => {
                let entries = read_entry_count(&mut scanner, offset)?;
                trace!(offset, entries, "visiting kv node");
                for _ in 0..entries {
                    let doc = parse_leaf_entry(&mut scanner, tree, offset)?;
                    visit(&doc)?;
                }
                if entries > 0 {
                    expect_list_tail(&mut scanner, offset)?;
                }
            }
        }
        Ok(())
    }

    fn walk_nodes_at<F>(&self, tree: TreeKind, offset: u64, visit: &mut F) -> Result<(), CouchError>
    where
        F: FnMut(u64, NodeClass, &[u8]) -> Result<(), CouchError>,
    {
        let buf = self.read_node(offset)?;
        let mut scanner = Scanner::new(&buf)?;
        match read_node_class(&mut scanner, offset)? {
            NodeClass::Pointer => {
                let children = parse_pointers(&mut scanner, offset)?;
                visit(offset, NodeClass::Pointer, &buf)?;
                drop(buf);
                for child in children {
                    self.descend_check(child, offset)?;
                    self.walk_nodes_at(tree, child, visit)?;
                }
            }
            NodeClass::Leaf => visit(offset, NodeClass::Leaf, &buf)?,
        }
        Ok(())
    }

    fn descend_check(&self, child: u64, parent: u64) -> Result<(), CouchError> {
        if child >= parent {
            return Err(CouchError::PointerOrder { child, parent });
        }
        self.check_body_offset(child)
    }
}

// ------------------------------------------------------------------------------------------------
// Node grammar
// ------------------------------------------------------------------------------------------------

/// Consume the outer `{kind, ...}` tuple header and the kind atom.
fn read_node_class(scanner: &mut Scanner<'_>, offset: u64) -> Result<NodeClass, CouchError> {
    let outer = scanner.scan()?;
    if outer.tag != TermTag::SmallTuple || outer.arity != 2 {
        return Err(CouchError::BadNode {
            offset,
            reason: "node is not a 2-tuple",
        });
    }
    let kind = scanner.scan()?;
    if !kind.tag.is_atom() {
        return Err(CouchError::BadNode {
            offset,
            reason: "node kind is not an atom",
        });
    }
    match kind.bytes {
        b"kp_node" => Ok(NodeClass::Pointer),
        b"kv_node" => Ok(NodeClass::Leaf),
        _ => Err(CouchError::BadNode {
            offset,
            reason: "unknown node kind atom",
        }),
    }
}

/// Consume the body-list header; Nil stands for the empty list.
fn read_entry_count(scanner: &mut Scanner<'_>, offset: u64) -> Result<u32, CouchError> {
    let body = scanner.scan()?;
    match body.tag {
        TermTag::List => Ok(body.arity),
        TermTag::Nil => Ok(0),
        _ => Err(CouchError::BadNode {
            offset,
            reason: "node body is not a list",
        }),
    }
}

fn expect_list_tail(scanner: &mut Scanner<'_>, offset: u64) -> Result<(), CouchError> {
    let tail = scanner.scan()?;
    if tail.tag != TermTag::Nil {
        return Err(CouchError::BadNode {
            offset,
            reason: "node entry list has a non-nil tail",
        });
    }
    Ok(())
}

/// Parse a kp-node body into child offsets, in list order.
fn parse_pointers(scanner: &mut Scanner<'_>, offset: u64) -> Result<Vec<u64>, CouchError> {
    let entries = read_entry_count(scanner, offset)?;
    let mut children = Vec::with_capacity(entries as usize);
    for _ in 0..entries {
        let entry = scanner.scan()?;
        if entry.tag != TermTag::SmallTuple || entry.arity != 2 {
            return Err(CouchError::BadNode {
                offset,
                reason: "pointer entry is not a 2-tuple",
            });
        }
        scanner.skip_term()?; // key
        let pointer = scanner.scan()?;
        if pointer.tag != TermTag::SmallTuple || pointer.arity < 1 {
            return Err(CouchError::BadNode {
                offset,
                reason: "pointer value is not a tuple",
            });
        }
        let child = scanner.scan()?;
        if !child.tag.is_integer() || child.integer < 0 {
            return Err(CouchError::BadNode {
                offset,
                reason: "child offset is not a non-negative integer",
            });
        }
        children.push(child.integer as u64);
        for _ in 1..pointer.arity {
            scanner.skip_term()?;
        }
    }
    if entries > 0 {
        expect_list_tail(scanner, offset)?;
    }
    Ok(children)
}

/// Parse one kv-node leaf entry for the given tree.
fn parse_leaf_entry<'b>(
    scanner: &mut Scanner<'b>,
    tree: TreeKind,
    offset: u64,
) -> Result<DocumentRef<'b>, CouchError> {
    let entry = scanner.scan()?;
    if entry.tag != TermTag::SmallTuple || entry.arity != 2 {
        return Err(CouchError::BadNode {
            offset,
            reason: "leaf entry is not a 2-tuple",
        });
    }

    // Key: seq for the by-seq tree, doc id for the by-id tree.
    let mut id: &'b [u8] = &[];
    let mut seq: i64 = 0;
    match tree {
        TreeKind::BySeq => {
            let key = scanner.scan()?;
            if !key.tag.is_integer() {
                return Err(CouchError::BadNode {
                    offset,
                    reason: "seq key is not an integer",
                });
            }
            seq = key.integer;
        }
        TreeKind::ById => {
            let key = scanner.scan()?;
            if key.tag != TermTag::Binary {
                return Err(CouchError::BadNode {
                    offset,
                    reason: "id key is not a binary",
                });
            }
            id = key.bytes;
        }
    }

    let info = scanner.scan()?;
    if info.tag != TermTag::SmallTuple || info.arity < 3 {
        return Err(CouchError::BadNode {
            offset,
            reason: "leaf value is not a tuple of at least 3",
        });
    }

    // First value element: the counterpart of the key.
    match tree {
        TreeKind::BySeq => {
            let first = scanner.scan()?;
            if first.tag != TermTag::Binary {
                return Err(CouchError::BadNode {
                    offset,
                    reason: "document id is not a binary",
                });
            }
            id = first.bytes;
        }
        TreeKind::ById => {
            let first = scanner.scan()?;
            if !first.tag.is_integer() {
                return Err(CouchError::BadNode {
                    offset,
                    reason: "document seq is not an integer",
                });
            }
            seq = first.integer;
        }
    }

    scanner.skip_term()?; // revision info

    let body = parse_body_ptr(scanner, offset)?;

    let deleted = if info.arity >= 4 {
        parse_flag(scanner)?
    } else {
        false
    };
    for _ in 4..info.arity {
        scanner.skip_term()?;
    }

    Ok(DocumentRef {
        id,
        seq,
        body,
        deleted,
    })
}

/// Body pointer: an integer is a record offset, anything else is the
/// document inlined in place.
fn parse_body_ptr<'b>(scanner: &mut Scanner<'b>, offset: u64) -> Result<DocBody<'b>, CouchError> {
    let mark = scanner.pos();
    let token = scanner.scan()?;
    if token.tag.is_integer() {
        if token.integer < 0 {
            return Err(CouchError::BadNode {
                offset,
                reason: "negative document body offset",
            });
        }
        Ok(DocBody::Offset(token.integer as u64))
    } else {
        scanner.seek(mark);
        Ok(DocBody::Inline(scanner.term_span()?))
    }
}

/// Deletion flag: an integer 0/1 or the atoms true/false; anything
/// else is skipped and reads as not deleted.
fn parse_flag(scanner: &mut Scanner<'_>) -> Result<bool, CouchError> {
    let mark = scanner.pos();
    let token = scanner.scan()?;
    if token.tag.is_integer() {
        Ok(token.integer != 0)
    } else if token.tag.is_atom() {
        Ok(token.bytes == b"true")
    } else {
        scanner.seek(mark);
        scanner.skip_term()?;
        Ok(false)
    }
}
