//! Erlang External Term Format (ETF) decoding.
//!
//! CouchDB persists every record payload — db headers, tree nodes, and
//! document bodies — as a single ETF term: a magic byte `131` followed
//! by tagged values. This module decodes the subset of tags CouchDB
//! actually writes.
//!
//! ## Design Overview
//!
//! The centrepiece is [`Scanner`], a **pull-based**, **single-pass**,
//! **zero-copy** decoder. Each [`Scanner::scan`] call consumes one term
//! header from the input slice and returns a [`Token`] by value;
//! binaries, atoms, and strings are returned as borrowed views into the
//! input, so scanning allocates nothing.
//!
//! Aggregate tags (tuples and lists) yield only their header token
//! carrying `arity`; the caller scans the elements itself. A proper
//! list is followed by one extra term that must be `Nil` — the scanner
//! does not consume it, because the document projector and the node
//! parser each handle the tail according to their own grammar.
//!
//! Two consumers sit on top:
//!
//! - [`Term`](term::Term) materializes a whole term as an owned tree,
//!   used only where random access across siblings is required (the db
//!   header).
//! - [`json`] streams a document term straight into JSON bytes without
//!   materializing anything.
//!
//! # Supported tags
//!
//! | Tag byte | Name | Token fields |
//! |----------|------|--------------|
//! | 70  | `NewFloat` | `float` |
//! | 97  | `SmallInteger` | `integer` |
//! | 98  | `Integer` | `integer` |
//! | 100 | `Atom` | `bytes` |
//! | 104 | `SmallTuple` | `arity` |
//! | 105 | `LargeTuple` | `arity` |
//! | 106 | `Nil` | — |
//! | 107 | `String` | `bytes` (a list of small ints in compact form) |
//! | 108 | `List` | `arity` (excludes the tail) |
//! | 109 | `Binary` | `bytes` |
//! | 110 | `SmallBig` | `integer` |
//! | 111 | `LargeBig` | `integer` |
//! | 119 | `SmallAtomUtf8` | `bytes` |
//!
//! Big integers wider than 64 bits fail with
//! [`EtfError::BigIntOverflow`]; CouchDB never writes sequence numbers
//! or revision positions that wide.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests;

// ------------------------------------------------------------------------------------------------
// Submodules
// ------------------------------------------------------------------------------------------------

pub mod json;
pub mod term;

pub use term::Term;

use thiserror::Error;

/// Leading magic byte of every serialized ETF term.
pub const ETF_MAGIC: u8 = 131;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors produced while decoding ETF bytes.
#[derive(Debug, Error)]
pub enum EtfError {
    /// The stream did not open with the magic byte `131`.
    #[error("bad ETF magic byte {0} (expected 131)")]
    BadMagic(u8),

    /// A term tag outside the supported set.
    #[error("unknown ETF term tag {0}")]
    UnknownTag(u8),

    /// The input ended inside a term.
    #[error("truncated ETF term (need {needed} bytes, have {available})")]
    Truncated {
        /// Bytes required to continue decoding.
        needed: usize,
        /// Bytes actually remaining.
        available: usize,
    },

    /// A `SmallBig`/`LargeBig` value does not fit in an `i64`.
    #[error("big integer exceeds 64-bit capacity")]
    BigIntOverflow,

    /// A list terminated with something other than `Nil`.
    #[error("improper list tail (tag {0})")]
    ImproperList(u8),
}

// ------------------------------------------------------------------------------------------------
// Tags and tokens
// ------------------------------------------------------------------------------------------------

/// The closed set of ETF term tags this decoder understands.
///
/// Discriminants are the on-wire tag bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TermTag {
    NewFloat = 70,
    SmallInteger = 97,
    Integer = 98,
    Atom = 100,
    SmallTuple = 104,
    LargeTuple = 105,
    Nil = 106,
    String = 107,
    List = 108,
    Binary = 109,
    SmallBig = 110,
    LargeBig = 111,
    SmallAtomUtf8 = 119,
}

impl TermTag {
    fn from_byte(b: u8) -> Result<Self, EtfError> {
        Ok(match b {
            70 => Self::NewFloat,
            97 => Self::SmallInteger,
            98 => Self::Integer,
            100 => Self::Atom,
            104 => Self::SmallTuple,
            105 => Self::LargeTuple,
            106 => Self::Nil,
            107 => Self::String,
            108 => Self::List,
            109 => Self::Binary,
            110 => Self::SmallBig,
            111 => Self::LargeBig,
            119 => Self::SmallAtomUtf8,
            other => return Err(EtfError::UnknownTag(other)),
        })
    }

    /// True for the integer-carrying tags.
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Self::SmallInteger | Self::Integer | Self::SmallBig | Self::LargeBig
        )
    }

    /// True for either atom encoding.
    pub fn is_atom(self) -> bool {
        matches!(self, Self::Atom | Self::SmallAtomUtf8)
    }
}

/// One scanned term header.
///
/// Only the fields relevant to `tag` are meaningful; the rest hold
/// their zero values. `bytes` borrows from the scanner's input, so a
/// token is a cheap `Copy` view, not an allocation.
#[derive(Debug, Clone, Copy)]
pub struct Token<'a> {
    /// Which term this is.
    pub tag: TermTag,
    /// Integer value for the integer tags.
    pub integer: i64,
    /// Float value for `NewFloat`.
    pub float: f64,
    /// Payload view for `Atom`, `SmallAtomUtf8`, `String`, `Binary`.
    pub bytes: &'a [u8],
    /// Element count for `SmallTuple`, `LargeTuple`, `List`.
    pub arity: u32,
}

impl<'a> Token<'a> {
    fn new(tag: TermTag) -> Self {
        Self {
            tag,
            integer: 0,
            float: 0.0,
            bytes: &[],
            arity: 0,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Scanner
// ------------------------------------------------------------------------------------------------

/// Streaming pull decoder over one ETF-encoded byte slice.
pub struct Scanner<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    /// Open a scanner over a full serialized term, consuming the
    /// leading magic byte.
    pub fn new(data: &'a [u8]) -> Result<Self, EtfError> {
        match data.first() {
            Some(&ETF_MAGIC) => Ok(Self { data, pos: 1 }),
            Some(&other) => Err(EtfError::BadMagic(other)),
            None => Err(EtfError::Truncated {
                needed: 1,
                available: 0,
            }),
        }
    }

    /// Open a scanner mid-stream, over bytes that start directly at a
    /// term tag (an inlined document body inside a tree node).
    pub fn embedded(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current byte position within the input.
    pub fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], EtfError> {
        let available = self.data.len() - self.pos;
        if available < n {
            return Err(EtfError::Truncated {
                needed: n,
                available,
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8, EtfError> {
        Ok(self.take(1)?[0])
    }

    fn take_u16(&mut self) -> Result<u16, EtfError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn take_u32(&mut self) -> Result<u32, EtfError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Decode the next term header.
    pub fn scan(&mut self) -> Result<Token<'a>, EtfError> {
        let tag = TermTag::from_byte(self.take_u8()?)?;
        let mut token = Token::new(tag);
        match tag {
            TermTag::NewFloat => {
                let b = self.take(8)?;
                let bits = u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
                token.float = f64::from_bits(bits);
            }
            TermTag::SmallInteger => {
                token.integer = i64::from(self.take_u8()?);
            }
            TermTag::Integer => {
                let b = self.take(4)?;
                token.integer = i64::from(i32::from_be_bytes([b[0], b[1], b[2], b[3]]));
            }
            TermTag::Atom => {
                let len = usize::from(self.take_u16()?);
                token.bytes = self.take(len)?;
            }
            TermTag::SmallAtomUtf8 => {
                let len = usize::from(self.take_u8()?);
                token.bytes = self.take(len)?;
            }
            TermTag::SmallTuple => {
                token.arity = u32::from(self.take_u8()?);
            }
            TermTag::LargeTuple => {
                token.arity = self.take_u32()?;
            }
            TermTag::Nil => {}
            TermTag::String => {
                let len = usize::from(self.take_u16()?);
                token.bytes = self.take(len)?;
            }
            TermTag::List => {
                token.arity = self.take_u32()?;
            }
            TermTag::Binary => {
                let len = self.take_u32()? as usize;
                token.bytes = self.take(len)?;
            }
            TermTag::SmallBig => {
                let digits = usize::from(self.take_u8()?);
                token.integer = self.take_big(digits)?;
            }
            TermTag::LargeBig => {
                let digits = self.take_u32()? as usize;
                token.integer = self.take_big(digits)?;
            }
        }
        Ok(token)
    }

    /// Decode a big integer of `digits` little-endian bytes following a
    /// sign byte, rejecting anything that does not fit `i64`.
    fn take_big(&mut self, digits: usize) -> Result<i64, EtfError> {
        let sign = self.take_u8()?;
        let bytes = self.take(digits)?;
        let mut magnitude: u64 = 0;
        for (i, &b) in bytes.iter().enumerate() {
            if i >= 8 {
                if b != 0 {
                    return Err(EtfError::BigIntOverflow);
                }
                continue;
            }
            magnitude |= u64::from(b) << (8 * i);
        }
        if sign == 0 {
            i64::try_from(magnitude).map_err(|_| EtfError::BigIntOverflow)
        } else if magnitude <= i64::MAX as u64 + 1 {
            // Two's complement lets the magnitude reach i64::MIN.
            Ok((magnitude as i64).wrapping_neg())
        } else {
            Err(EtfError::BigIntOverflow)
        }
    }

    /// Consume one complete term, including all nested elements and
    /// list tails.
    pub fn skip_term(&mut self) -> Result<(), EtfError> {
        let mut pending: u64 = 1;
        while pending > 0 {
            let token = self.scan()?;
            pending -= 1;
            match token.tag {
                TermTag::SmallTuple | TermTag::LargeTuple => {
                    pending += u64::from(token.arity);
                }
                // A list is followed by its elements plus the tail term.
                TermTag::List => pending += u64::from(token.arity) + 1,
                _ => {}
            }
        }
        Ok(())
    }

    /// Consume one complete term and return the bytes it occupied.
    pub fn term_span(&mut self) -> Result<&'a [u8], EtfError> {
        let start = self.pos;
        self.skip_term()?;
        Ok(&self.data[start..self.pos])
    }
}
