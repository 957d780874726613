//! Eager, owned materialization of an ETF term.
//!
//! The streaming [`Scanner`](super::Scanner) is enough for everything
//! that reads front-to-back, but decoding the db header needs random
//! access across siblings (tree states sit at fixed tuple positions).
//! [`Term`] builds the whole term as a tree for that one consumer.
//! Document projection never goes through here.

use super::{EtfError, Scanner, TermTag};

/// An owned ETF term.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    /// Any of the four integer encodings.
    Int(i64),
    /// IEEE-754 double.
    Float(f64),
    /// Atom name bytes (either atom encoding).
    Atom(Vec<u8>),
    /// Binary payload.
    Binary(Vec<u8>),
    /// `String` tag: a character list in compact byte form.
    CharList(Vec<u8>),
    /// Tuple of owned children.
    Tuple(Vec<Term>),
    /// Proper list of owned children (tail consumed, not stored).
    List(Vec<Term>),
    /// The empty list.
    Nil,
}

impl Term {
    /// Build one complete term from the scanner.
    pub fn build(scanner: &mut Scanner<'_>) -> Result<Term, EtfError> {
        let token = scanner.scan()?;
        Ok(match token.tag {
            TermTag::SmallInteger
            | TermTag::Integer
            | TermTag::SmallBig
            | TermTag::LargeBig => Term::Int(token.integer),
            TermTag::NewFloat => Term::Float(token.float),
            TermTag::Atom | TermTag::SmallAtomUtf8 => Term::Atom(token.bytes.to_vec()),
            TermTag::Binary => Term::Binary(token.bytes.to_vec()),
            TermTag::String => Term::CharList(token.bytes.to_vec()),
            TermTag::Nil => Term::Nil,
            TermTag::SmallTuple | TermTag::LargeTuple => {
                let mut children = Vec::with_capacity(token.arity as usize);
                for _ in 0..token.arity {
                    children.push(Term::build(scanner)?);
                }
                Term::Tuple(children)
            }
            TermTag::List => {
                let mut children = Vec::with_capacity(token.arity as usize);
                for _ in 0..token.arity {
                    children.push(Term::build(scanner)?);
                }
                match Term::build(scanner)? {
                    Term::Nil => {}
                    other => return Err(EtfError::ImproperList(other.tag_byte())),
                }
                Term::List(children)
            }
        })
    }

    /// Integer value, if this is an integer term.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Term::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Atom name bytes, if this is an atom.
    pub fn as_atom(&self) -> Option<&[u8]> {
        match self {
            Term::Atom(name) => Some(name),
            _ => None,
        }
    }

    /// Tuple children, if this is a tuple.
    pub fn as_tuple(&self) -> Option<&[Term]> {
        match self {
            Term::Tuple(children) => Some(children),
            _ => None,
        }
    }

    /// Representative wire tag byte for diagnostics.
    fn tag_byte(&self) -> u8 {
        let tag = match self {
            Term::Int(_) => TermTag::Integer,
            Term::Float(_) => TermTag::NewFloat,
            Term::Atom(_) => TermTag::Atom,
            Term::Binary(_) => TermTag::Binary,
            Term::CharList(_) => TermTag::String,
            Term::Tuple(_) => TermTag::SmallTuple,
            Term::List(_) => TermTag::List,
            Term::Nil => TermTag::Nil,
        };
        tag as u8
    }
}
