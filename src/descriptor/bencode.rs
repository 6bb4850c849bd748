//! Minimal bencode decoder for `.torrent` metainfo

use thiserror::Error;

/// Deepest list/dict nesting accepted; metainfo never comes close
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Dict(Vec<(Vec<u8>, Value)>),
}

impl Value {
    pub fn as_dict(&self) -> Option<&[(Vec<u8>, Value)]> {
        match self {
            Value::Dict(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Look up a key in a dictionary value
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.as_dict()?
            .iter()
            .find(|(k, _)| k.as_slice() == key)
            .map(|(_, v)| v)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BencodeError {
    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("invalid prefix byte: 0x{0:02x}")]
    InvalidPrefix(u8),

    #[error("invalid integer")]
    InvalidInt,

    #[error("invalid byte string length")]
    InvalidLen,

    #[error("trailing data")]
    TrailingData,

    #[error("invalid dict key")]
    InvalidDictKey,

    #[error("nesting deeper than {MAX_DEPTH} levels")]
    TooDeep,
}

/// Parse a complete bencoded document
pub fn parse(data: &[u8]) -> Result<Value, BencodeError> {
    let (value, pos) = parse_value(data, 0, 0)?;
    if pos != data.len() {
        return Err(BencodeError::TrailingData);
    }
    Ok(value)
}

/// Parse a top-level dictionary, also returning the byte span of `span_key`'s value.
///
/// The info hash is computed over the exact bytes of the `info` entry, so the
/// raw span is needed rather than a re-encoding.
pub fn parse_dict_with_span(
    data: &[u8],
    span_key: &[u8],
) -> Result<(Value, Option<(usize, usize)>), BencodeError> {
    match data.first() {
        Some(b'd') => {}
        Some(other) => return Err(BencodeError::InvalidPrefix(*other)),
        None => return Err(BencodeError::UnexpectedEof),
    }

    let mut items = Vec::new();
    let mut span = None;
    let mut pos = 1;
    loop {
        match data.get(pos) {
            None => return Err(BencodeError::UnexpectedEof),
            Some(b'e') => {
                pos += 1;
                break;
            }
            Some(_) => {}
        }
        let (key, next) = match parse_value(data, pos, 1)? {
            (Value::Bytes(key), next) => (key, next),
            _ => return Err(BencodeError::InvalidDictKey),
        };
        let (value, end) = parse_value(data, next, 1)?;
        if key == span_key {
            span = Some((next, end));
        }
        items.push((key, value));
        pos = end;
    }

    if pos != data.len() {
        return Err(BencodeError::TrailingData);
    }
    Ok((Value::Dict(items), span))
}

/// `depth` counts the containers enclosing `pos`
fn parse_value(data: &[u8], pos: usize, depth: usize) -> Result<(Value, usize), BencodeError> {
    let prefix = *data.get(pos).ok_or(BencodeError::UnexpectedEof)?;
    if matches!(prefix, b'l' | b'd') && depth >= MAX_DEPTH {
        return Err(BencodeError::TooDeep);
    }
    match prefix {
        b'i' => {
            let end = find(data, pos + 1, b'e')?;
            let text =
                std::str::from_utf8(&data[pos + 1..end]).map_err(|_| BencodeError::InvalidInt)?;
            // Reject "-0", "i03e" and friends
            if text.is_empty()
                || text == "-0"
                || (text.starts_with('0') && text.len() > 1)
                || text.starts_with("-0")
            {
                return Err(BencodeError::InvalidInt);
            }
            let n = text.parse::<i64>().map_err(|_| BencodeError::InvalidInt)?;
            Ok((Value::Int(n), end + 1))
        }
        b'l' => {
            let mut items = Vec::new();
            let mut i = pos + 1;
            while *data.get(i).ok_or(BencodeError::UnexpectedEof)? != b'e' {
                let (value, next) = parse_value(data, i, depth + 1)?;
                items.push(value);
                i = next;
            }
            Ok((Value::List(items), i + 1))
        }
        b'd' => {
            let mut items = Vec::new();
            let mut i = pos + 1;
            while *data.get(i).ok_or(BencodeError::UnexpectedEof)? != b'e' {
                let (key, next) = match parse_value(data, i, depth + 1)? {
                    (Value::Bytes(key), next) => (key, next),
                    _ => return Err(BencodeError::InvalidDictKey),
                };
                let (value, next) = parse_value(data, next, depth + 1)?;
                items.push((key, value));
                i = next;
            }
            Ok((Value::Dict(items), i + 1))
        }
        b'0'..=b'9' => {
            let colon = find(data, pos, b':')?;
            let len: usize = std::str::from_utf8(&data[pos..colon])
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or(BencodeError::InvalidLen)?;
            let start = colon + 1;
            let end = start.checked_add(len).ok_or(BencodeError::InvalidLen)?;
            if end > data.len() {
                return Err(BencodeError::UnexpectedEof);
            }
            Ok((Value::Bytes(data[start..end].to_vec()), end))
        }
        other => Err(BencodeError::InvalidPrefix(other)),
    }
}

fn find(data: &[u8], from: usize, byte: u8) -> Result<usize, BencodeError> {
    data[from.min(data.len())..]
        .iter()
        .position(|b| *b == byte)
        .map(|offset| from + offset)
        .ok_or(BencodeError::UnexpectedEof)
}
