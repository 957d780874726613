//! Hand encoders producing the ETF byte sequences the decoder is
//! tested against. Shared with the couchfile fixture builder.

/// Prefix a bare term with the ETF magic byte.
pub(crate) fn with_magic(term: Vec<u8>) -> Vec<u8> {
    let mut out = vec![131];
    out.extend_from_slice(&term);
    out
}

pub(crate) fn small_int(v: u8) -> Vec<u8> {
    vec![97, v]
}

pub(crate) fn int(v: i32) -> Vec<u8> {
    let mut out = vec![98];
    out.extend_from_slice(&v.to_be_bytes());
    out
}

/// Encode an integer the way Erlang picks its representation: small
/// integer, 32-bit integer, or small big.
pub(crate) fn erl_int(v: i64) -> Vec<u8> {
    if (0..=255).contains(&v) {
        small_int(v as u8)
    } else if i64::from(i32::MIN) <= v && v <= i64::from(i32::MAX) {
        int(v as i32)
    } else {
        let (sign, magnitude) = if v < 0 {
            (1, v.unsigned_abs())
        } else {
            (0, v as u64)
        };
        small_big(sign, &magnitude.to_le_bytes())
    }
}

pub(crate) fn float(v: f64) -> Vec<u8> {
    let mut out = vec![70];
    out.extend_from_slice(&v.to_bits().to_be_bytes());
    out
}

pub(crate) fn atom(name: &[u8]) -> Vec<u8> {
    let mut out = vec![100];
    out.extend_from_slice(&(name.len() as u16).to_be_bytes());
    out.extend_from_slice(name);
    out
}

pub(crate) fn small_atom_utf8(name: &[u8]) -> Vec<u8> {
    let mut out = vec![119, name.len() as u8];
    out.extend_from_slice(name);
    out
}

pub(crate) fn binary(bytes: &[u8]) -> Vec<u8> {
    let mut out = vec![109];
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
    out
}

pub(crate) fn string(bytes: &[u8]) -> Vec<u8> {
    let mut out = vec![107];
    out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    out.extend_from_slice(bytes);
    out
}

pub(crate) fn nil() -> Vec<u8> {
    vec![106]
}

pub(crate) fn small_big(sign: u8, digits: &[u8]) -> Vec<u8> {
    let mut out = vec![110, digits.len() as u8, sign];
    out.extend_from_slice(digits);
    out
}

pub(crate) fn large_big(sign: u8, digits: &[u8]) -> Vec<u8> {
    let mut out = vec![111];
    out.extend_from_slice(&(digits.len() as u32).to_be_bytes());
    out.push(sign);
    out.extend_from_slice(digits);
    out
}

pub(crate) fn tuple(items: &[Vec<u8>]) -> Vec<u8> {
    let mut out = vec![104, items.len() as u8];
    for item in items {
        out.extend_from_slice(item);
    }
    out
}

pub(crate) fn large_tuple(items: &[Vec<u8>]) -> Vec<u8> {
    let mut out = vec![105];
    out.extend_from_slice(&(items.len() as u32).to_be_bytes());
    for item in items {
        out.extend_from_slice(item);
    }
    out
}

/// A proper list: count header, elements, nil tail.
pub(crate) fn list(items: &[Vec<u8>]) -> Vec<u8> {
    let mut out = vec![108];
    out.extend_from_slice(&(items.len() as u32).to_be_bytes());
    for item in items {
        out.extend_from_slice(item);
    }
    out.push(106);
    out
}

/// A list whose tail is something other than nil.
pub(crate) fn improper_list(items: &[Vec<u8>], tail: Vec<u8>) -> Vec<u8> {
    let mut out = vec![108];
    out.extend_from_slice(&(items.len() as u32).to_be_bytes());
    for item in items {
        out.extend_from_slice(item);
    }
    out.extend_from_slice(&tail);
    out
}

/// A JSON object in the CouchDB convention: a 1-tuple wrapping a list
/// of `{key, value}` 2-tuples.
pub(crate) fn json_obj(members: &[(&[u8], Vec<u8>)]) -> Vec<u8> {
    let pairs: Vec<Vec<u8>> = members
        .iter()
        .map(|(key, value)| tuple(&[binary(key), value.clone()]))
        .collect();
    tuple(&[list(&pairs)])
}
