//! One-pass projection of ETF document terms into JSON bytes.
//!
//! CouchDB encodes JSON into Erlang terms with one convention worth
//! spelling out: an object is a 1-tuple wrapping a list of `{key,
//! value}` 2-tuples, so `{"a":1}` is stored as `{[{<<"a">>,1}]}`. The
//! projector walks a document term through the [`Scanner`] once and
//! appends JSON to a caller-supplied byte builder; nothing is
//! materialized.
//!
//! String values are emitted byte-for-byte between ASCII quotes. By
//! default no escaping is applied — output reproduces exactly what
//! CouchDB stored. [`Projector::escaped`] switches on real JSON
//! escaping of quotes, backslashes, and control bytes.

use std::io::Write;

use thiserror::Error;

use super::{EtfError, Scanner, TermTag};

/// Errors raised when a term does not follow the JSON convention.
#[derive(Debug, Error)]
pub enum JsonError {
    /// The underlying ETF stream was malformed.
    #[error(transparent)]
    Etf(#[from] EtfError),

    /// An object key position held something other than a binary.
    #[error("object key must be a binary, got tag {0:?}")]
    KeyNotBinary(TermTag),

    /// A tuple in value position wrapped something other than a
    /// key-value list.
    #[error("object body must be a key-value list, got tag {0:?}")]
    ObjectShape(TermTag),

    /// An object member was not a 2-tuple.
    #[error("object member must be a 2-tuple, got tag {0:?}")]
    PairShape(TermTag),

    /// A term tag with no JSON counterpart in value position.
    #[error("cannot project term tag {0:?} into JSON")]
    Unprojectable(TermTag),
}

/// Streaming ETF→JSON writer.
#[derive(Debug, Clone, Copy)]
pub struct Projector {
    escape: bool,
}

impl Projector {
    /// Byte-faithful projector: string bytes pass through unmodified.
    pub fn new() -> Self {
        Self { escape: false }
    }

    /// Projector that escapes `"`, `\`, and control bytes in strings.
    pub fn escaped() -> Self {
        Self { escape: true }
    }

    /// Project one document: exactly one JSON value plus a trailing
    /// newline.
    pub fn write_document(
        &self,
        scanner: &mut Scanner<'_>,
        out: &mut Vec<u8>,
    ) -> Result<(), JsonError> {
        self.write_value(scanner, out)?;
        out.push(b'\n');
        Ok(())
    }

    /// Project one JSON value from the scanner.
    pub fn write_value(
        &self,
        scanner: &mut Scanner<'_>,
        out: &mut Vec<u8>,
    ) -> Result<(), JsonError> {
        let token = scanner.scan()?;
        match token.tag {
            TermTag::NewFloat => {
                // Vec<u8> writes are infallible.
                let _ = write!(out, "{}", token.float);
            }
            TermTag::SmallInteger | TermTag::Integer | TermTag::SmallBig | TermTag::LargeBig => {
                let _ = write!(out, "{}", token.integer);
            }
            // Atoms carry the literals true/false/null, unquoted.
            TermTag::Atom | TermTag::SmallAtomUtf8 => out.extend_from_slice(token.bytes),
            TermTag::Nil => out.extend_from_slice(b"null"),
            TermTag::Binary => self.write_string(token.bytes, out),
            TermTag::String => {
                // A character list: project as an array of byte values.
                out.push(b'[');
                for (i, b) in token.bytes.iter().enumerate() {
                    if i > 0 {
                        out.push(b',');
                    }
                    let _ = write!(out, "{b}");
                }
                out.push(b']');
            }
            TermTag::List => {
                out.push(b'[');
                for i in 0..token.arity {
                    if i > 0 {
                        out.push(b',');
                    }
                    self.write_value(scanner, out)?;
                }
                self.expect_list_tail(scanner)?;
                out.push(b']');
            }
            TermTag::SmallTuple => self.write_object(scanner, out)?,
            other => return Err(JsonError::Unprojectable(other)),
        }
        Ok(())
    }

    /// Project the object convention: the enclosing tuple was already
    /// consumed; the next term must be the member list (or Nil for the
    /// empty object, since ETF has no zero-length list tag).
    fn write_object(&self, scanner: &mut Scanner<'_>, out: &mut Vec<u8>) -> Result<(), JsonError> {
        let body = scanner.scan()?;
        match body.tag {
            TermTag::List => {
                out.push(b'{');
                for i in 0..body.arity {
                    if i > 0 {
                        out.push(b',');
                    }
                    self.write_member(scanner, out)?;
                }
                self.expect_list_tail(scanner)?;
                out.push(b'}');
                Ok(())
            }
            TermTag::Nil => {
                out.extend_from_slice(b"{}");
                Ok(())
            }
            other => Err(JsonError::ObjectShape(other)),
        }
    }

    /// Project one `"key":value` member from a `{key, value}` 2-tuple.
    fn write_member(&self, scanner: &mut Scanner<'_>, out: &mut Vec<u8>) -> Result<(), JsonError> {
        let pair = scanner.scan()?;
        if pair.tag != TermTag::SmallTuple || pair.arity != 2 {
            return Err(JsonError::PairShape(pair.tag));
        }
        let key = scanner.scan()?;
        if key.tag != TermTag::Binary {
            return Err(JsonError::KeyNotBinary(key.tag));
        }
        self.write_string(key.bytes, out);
        out.push(b':');
        self.write_value(scanner, out)
    }

    fn expect_list_tail(&self, scanner: &mut Scanner<'_>) -> Result<(), JsonError> {
        let tail = scanner.scan()?;
        if tail.tag != TermTag::Nil {
            return Err(EtfError::ImproperList(tail.tag as u8).into());
        }
        Ok(())
    }

    /// Emit string bytes between ASCII quotes.
    fn write_string(&self, bytes: &[u8], out: &mut Vec<u8>) {
        out.push(b'"');
        if self.escape {
            for &b in bytes {
                match b {
                    b'"' => out.extend_from_slice(b"\\\""),
                    b'\\' => out.extend_from_slice(b"\\\\"),
                    b'\n' => out.extend_from_slice(b"\\n"),
                    b'\r' => out.extend_from_slice(b"\\r"),
                    b'\t' => out.extend_from_slice(b"\\t"),
                    0x00..=0x1f => {
                        let _ = write!(out, "\\u{b:04x}");
                    }
                    _ => out.push(b),
                }
            }
        } else {
            out.extend_from_slice(bytes);
        }
        out.push(b'"');
    }
}

impl Default for Projector {
    fn default() -> Self {
        Self::new()
    }
}
