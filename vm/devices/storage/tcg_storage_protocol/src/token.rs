// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! TCG Core binary token stream (Core Specification 3.2.2).
//!
//! Two layers are provided. [`Token`] is the flat wire unit, one atom or
//! control token at a time. [`Value`] is the structured form used by the
//! method layer, where lists and named values own their children and the
//! nesting rules are checked while building the tree.

use thiserror::Error;

/// Tiny atom: `0 S dddddd`.
const TINY_SIGN: u8 = 0x40;
/// Short atom: `10 B S llll`.
const SHORT_ATOM: u8 = 0x80;
const SHORT_BYTES: u8 = 0x20;
const SHORT_SIGN: u8 = 0x10;
const SHORT_MAX_LEN: usize = 0x0f;
/// Medium atom: `110 B S lll` followed by one length byte.
const MEDIUM_ATOM: u8 = 0xc0;
const MEDIUM_BYTES: u8 = 0x10;
const MEDIUM_SIGN: u8 = 0x08;
const MEDIUM_MAX_LEN: usize = 0x7ff;
/// Long atom: `111000 B S` followed by three length bytes.
const LONG_ATOM: u8 = 0xe0;
const LONG_BYTES: u8 = 0x02;
const LONG_SIGN: u8 = 0x01;
const LONG_MAX_LEN: usize = 0xff_ffff;

/// Control token values.
pub mod control {
    #![expect(missing_docs)] // names match the TCG token table

    pub const START_LIST: u8 = 0xf0;
    pub const END_LIST: u8 = 0xf1;
    pub const START_NAME: u8 = 0xf2;
    pub const END_NAME: u8 = 0xf3;
    pub const CALL: u8 = 0xf8;
    pub const END_OF_DATA: u8 = 0xf9;
    pub const END_OF_SESSION: u8 = 0xfa;
    pub const START_TRANSACTION: u8 = 0xfb;
    pub const END_TRANSACTION: u8 = 0xfc;
    pub const EMPTY: u8 = 0xff;
}

/// Why a single token could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MalformedReason {
    /// The atom header or payload runs past the end of the buffer.
    #[error("atom is truncated")]
    Truncated,
    /// The header byte is reserved by the Core specification.
    #[error("reserved token {0:#04x}")]
    Reserved(u8),
    /// An integer atom wider than 64 bits.
    #[error("integer atom of {0} bytes is wider than 64 bits")]
    IntegerTooWide(usize),
    /// Byte-string continuation atoms are not supported.
    #[error("continued byte string")]
    Continued,
}

/// Token codec failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// The input is not a valid token.
    #[error("malformed token at offset {offset}")]
    MalformedToken {
        /// Offset of the offending token header.
        offset: usize,
        /// What was wrong with it.
        #[source]
        reason: MalformedReason,
    },
    /// A list or name was closed without being opened, left open, or a name
    /// did not hold exactly two values.
    #[error("unbalanced token structure at offset {offset}")]
    UnbalancedStructure {
        /// Offset of the token where the imbalance was detected.
        offset: usize,
    },
    /// A byte string too long for a long atom.
    #[error("atom of {0} bytes exceeds the long atom limit")]
    TooLarge(usize),
}

/// A single wire token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Unsigned integer atom.
    Uint(u64),
    /// Signed integer atom.
    Int(i64),
    /// Byte-string atom.
    Bytes(Vec<u8>),
    /// Opens a list.
    StartList,
    /// Closes a list.
    EndList,
    /// Opens a named value.
    StartName,
    /// Closes a named value.
    EndName,
    /// Method invocation marker.
    Call,
    /// End of method parameters or results.
    EndOfData,
    /// Terminates the session.
    EndOfSession,
    /// Opens a transaction.
    StartTransaction,
    /// Closes a transaction.
    EndTransaction,
    /// Empty atom, ignored by receivers.
    Empty,
}

impl Token {
    /// Appends the encoding of this token to `out`, using the smallest atom
    /// form that can represent the value.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), TokenError> {
        match self {
            Token::Uint(v) => encode_uint(*v, out),
            Token::Int(v) => encode_int(*v, out),
            Token::Bytes(b) => encode_bytes(b, out)?,
            Token::StartList => out.push(control::START_LIST),
            Token::EndList => out.push(control::END_LIST),
            Token::StartName => out.push(control::START_NAME),
            Token::EndName => out.push(control::END_NAME),
            Token::Call => out.push(control::CALL),
            Token::EndOfData => out.push(control::END_OF_DATA),
            Token::EndOfSession => out.push(control::END_OF_SESSION),
            Token::StartTransaction => out.push(control::START_TRANSACTION),
            Token::EndTransaction => out.push(control::END_TRANSACTION),
            Token::Empty => out.push(control::EMPTY),
        }
        Ok(())
    }

    /// Decodes one token from the front of `buf`, returning it together with
    /// the number of bytes consumed. Never reads past the end of `buf`.
    pub fn decode(buf: &[u8]) -> Result<(Token, usize), TokenError> {
        decode_at(buf, 0)
    }
}

fn encode_uint(v: u64, out: &mut Vec<u8>) {
    if v < 0x40 {
        out.push(v as u8);
        return;
    }
    let bytes = v.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    let data = &bytes[skip..];
    out.push(SHORT_ATOM | data.len() as u8);
    out.extend_from_slice(data);
}

fn encode_int(v: i64, out: &mut Vec<u8>) {
    if (-32..32).contains(&v) {
        out.push(TINY_SIGN | (v as u8 & 0x3f));
        return;
    }
    let bytes = v.to_be_bytes();
    // Drop redundant sign-extension bytes while keeping the sign bit intact.
    let mut skip = 0;
    while skip < 7 {
        let (b, next) = (bytes[skip], bytes[skip + 1]);
        if (b == 0x00 && next & 0x80 == 0) || (b == 0xff && next & 0x80 != 0) {
            skip += 1;
        } else {
            break;
        }
    }
    let data = &bytes[skip..];
    out.push(SHORT_ATOM | SHORT_SIGN | data.len() as u8);
    out.extend_from_slice(data);
}

fn encode_bytes(b: &[u8], out: &mut Vec<u8>) -> Result<(), TokenError> {
    let len = b.len();
    if len <= SHORT_MAX_LEN {
        out.push(SHORT_ATOM | SHORT_BYTES | len as u8);
    } else if len <= MEDIUM_MAX_LEN {
        out.push(MEDIUM_ATOM | MEDIUM_BYTES | (len >> 8) as u8);
        out.push(len as u8);
    } else if len <= LONG_MAX_LEN {
        out.push(LONG_ATOM | LONG_BYTES);
        out.extend_from_slice(&(len as u32).to_be_bytes()[1..]);
    } else {
        return Err(TokenError::TooLarge(len));
    }
    out.extend_from_slice(b);
    Ok(())
}

fn malformed(offset: usize, reason: MalformedReason) -> TokenError {
    TokenError::MalformedToken { offset, reason }
}

/// Decodes the token starting at `buf[offset]`. Offsets in errors are
/// relative to the start of `buf`.
fn decode_at(buf: &[u8], offset: usize) -> Result<(Token, usize), TokenError> {
    let rest = &buf[offset..];
    let Some(&header) = rest.first() else {
        return Err(malformed(offset, MalformedReason::Truncated));
    };

    let (header_len, len, bytes, signed) = match header {
        0x00..=0x7f => {
            let token = if header & TINY_SIGN != 0 {
                // Sign-extend the six data bits.
                Token::Int((((header & 0x3f) << 2) as i8 >> 2) as i64)
            } else {
                Token::Uint((header & 0x3f) as u64)
            };
            return Ok((token, 1));
        }
        0x80..=0xbf => (
            1,
            (header as usize) & SHORT_MAX_LEN,
            header & SHORT_BYTES != 0,
            header & SHORT_SIGN != 0,
        ),
        0xc0..=0xdf => {
            let &[_, lo, ..] = rest else {
                return Err(malformed(offset, MalformedReason::Truncated));
            };
            (
                2,
                (((header & 0x07) as usize) << 8) | lo as usize,
                header & MEDIUM_BYTES != 0,
                header & MEDIUM_SIGN != 0,
            )
        }
        0xe0..=0xe3 => {
            let &[_, b0, b1, b2, ..] = rest else {
                return Err(malformed(offset, MalformedReason::Truncated));
            };
            (
                4,
                u32::from_be_bytes([0, b0, b1, b2]) as usize,
                header & LONG_BYTES != 0,
                header & LONG_SIGN != 0,
            )
        }
        control::START_LIST => return Ok((Token::StartList, 1)),
        control::END_LIST => return Ok((Token::EndList, 1)),
        control::START_NAME => return Ok((Token::StartName, 1)),
        control::END_NAME => return Ok((Token::EndName, 1)),
        control::CALL => return Ok((Token::Call, 1)),
        control::END_OF_DATA => return Ok((Token::EndOfData, 1)),
        control::END_OF_SESSION => return Ok((Token::EndOfSession, 1)),
        control::START_TRANSACTION => return Ok((Token::StartTransaction, 1)),
        control::END_TRANSACTION => return Ok((Token::EndTransaction, 1)),
        control::EMPTY => return Ok((Token::Empty, 1)),
        _ => return Err(malformed(offset, MalformedReason::Reserved(header))),
    };

    let Some(data) = rest.get(header_len..header_len + len) else {
        return Err(malformed(offset, MalformedReason::Truncated));
    };

    let token = if bytes {
        if signed {
            return Err(malformed(offset, MalformedReason::Continued));
        }
        Token::Bytes(data.to_vec())
    } else {
        if len > 8 {
            return Err(malformed(offset, MalformedReason::IntegerTooWide(len)));
        }
        let raw = data.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64);
        if signed {
            if len == 0 {
                Token::Int(0)
            } else {
                let shift = 64 - 8 * len as u32;
                Token::Int(((raw << shift) as i64) >> shift)
            }
        } else {
            Token::Uint(raw)
        }
    };
    Ok((token, header_len + len))
}

/// Decodes every token in `buf`, checking list/name nesting.
///
/// Fails with [`TokenError::UnbalancedStructure`] if a list or name is
/// closed without being opened, or if the stream ends inside one.
pub fn decode_stream(buf: &[u8]) -> Result<Vec<Token>, TokenError> {
    let mut tokens = Vec::new();
    let mut open = Vec::new();
    let mut offset = 0;
    while offset < buf.len() {
        let (token, consumed) = decode_at(buf, offset)?;
        match token {
            Token::StartList | Token::StartName => open.push(token.clone()),
            Token::EndList => {
                if open.pop() != Some(Token::StartList) {
                    return Err(TokenError::UnbalancedStructure { offset });
                }
            }
            Token::EndName => {
                if open.pop() != Some(Token::StartName) {
                    return Err(TokenError::UnbalancedStructure { offset });
                }
            }
            _ => {}
        }
        tokens.push(token);
        offset += consumed;
    }
    if !open.is_empty() {
        return Err(TokenError::UnbalancedStructure { offset });
    }
    Ok(tokens)
}

/// A structured token value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Unsigned integer.
    Uint(u64),
    /// Signed integer.
    Int(i64),
    /// Byte string.
    Bytes(Vec<u8>),
    /// `StartList .. EndList`.
    List(Vec<Value>),
    /// `StartName name value EndName`.
    Named(Box<Value>, Box<Value>),
    /// Method invocation marker.
    Call,
    /// End of method parameters or results.
    EndOfData,
    /// Terminates the session.
    EndOfSession,
    /// Opens a transaction.
    StartTransaction,
    /// Closes a transaction.
    EndTransaction,
}

impl Value {
    /// A named value.
    pub fn named(name: impl Into<Value>, value: impl Into<Value>) -> Self {
        Value::Named(Box::new(name.into()), Box::new(value.into()))
    }

    /// A list built from anything convertible to values.
    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    /// Returns the integer, if this is an unsigned integer or a
    /// non-negative signed one.
    pub fn as_uint(&self) -> Option<u64> {
        match *self {
            Value::Uint(v) => Some(v),
            Value::Int(v) => u64::try_from(v).ok(),
            _ => None,
        }
    }

    /// Interprets an integer as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        self.as_uint().map(|v| v != 0)
    }

    /// Returns the byte string, if this is one.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the list items, if this is a list.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns `(name, value)`, if this is a named value.
    pub fn as_named(&self) -> Option<(&Value, &Value)> {
        match self {
            Value::Named(name, value) => Some((name, value)),
            _ => None,
        }
    }

    /// Appends the encoding of this value to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), TokenError> {
        match self {
            Value::Uint(v) => encode_uint(*v, out),
            Value::Int(v) => encode_int(*v, out),
            Value::Bytes(b) => encode_bytes(b, out)?,
            Value::List(items) => {
                out.push(control::START_LIST);
                for item in items {
                    item.encode(out)?;
                }
                out.push(control::END_LIST);
            }
            Value::Named(name, value) => {
                out.push(control::START_NAME);
                name.encode(out)?;
                value.encode(out)?;
                out.push(control::END_NAME);
            }
            Value::Call => out.push(control::CALL),
            Value::EndOfData => out.push(control::END_OF_DATA),
            Value::EndOfSession => out.push(control::END_OF_SESSION),
            Value::StartTransaction => out.push(control::START_TRANSACTION),
            Value::EndTransaction => out.push(control::END_TRANSACTION),
        }
        Ok(())
    }

    /// Encodes a sequence of top-level values.
    pub fn encode_all(values: &[Value]) -> Result<Vec<u8>, TokenError> {
        let mut out = Vec::new();
        for value in values {
            value.encode(&mut out)?;
        }
        Ok(out)
    }

    /// Parses a full token stream into top-level values.
    ///
    /// Control tokens are only accepted outside of lists and names, and each
    /// name must hold exactly two values. Empty atoms are dropped.
    pub fn decode_all(buf: &[u8]) -> Result<Vec<Value>, TokenError> {
        enum Frame {
            List(Vec<Value>),
            Name(Vec<Value>),
        }

        let mut top = Vec::new();
        let mut stack: Vec<Frame> = Vec::new();
        let mut offset = 0;
        while offset < buf.len() {
            let (token, consumed) = decode_at(buf, offset)?;
            let unbalanced = TokenError::UnbalancedStructure { offset };
            let value = match token {
                Token::Uint(v) => Some(Value::Uint(v)),
                Token::Int(v) => Some(Value::Int(v)),
                Token::Bytes(b) => Some(Value::Bytes(b)),
                Token::StartList => {
                    stack.push(Frame::List(Vec::new()));
                    None
                }
                Token::StartName => {
                    stack.push(Frame::Name(Vec::new()));
                    None
                }
                Token::EndList => match stack.pop() {
                    Some(Frame::List(items)) => Some(Value::List(items)),
                    _ => return Err(unbalanced),
                },
                Token::EndName => match stack.pop() {
                    Some(Frame::Name(items)) => {
                        let Ok([name, value]) = <[Value; 2]>::try_from(items) else {
                            return Err(unbalanced);
                        };
                        Some(Value::named(name, value))
                    }
                    _ => return Err(unbalanced),
                },
                Token::Empty => None,
                control => {
                    if !stack.is_empty() {
                        return Err(unbalanced);
                    }
                    Some(match control {
                        Token::Call => Value::Call,
                        Token::EndOfData => Value::EndOfData,
                        Token::EndOfSession => Value::EndOfSession,
                        Token::StartTransaction => Value::StartTransaction,
                        _ => Value::EndTransaction,
                    })
                }
            };

            if let Some(value) = value {
                match stack.last_mut() {
                    Some(Frame::List(items)) => items.push(value),
                    Some(Frame::Name(items)) => {
                        if items.len() == 2 {
                            return Err(unbalanced);
                        }
                        items.push(value);
                    }
                    None => top.push(value),
                }
            }
            offset += consumed;
        }
        if !stack.is_empty() {
            return Err(TokenError::UnbalancedStructure { offset });
        }
        Ok(top)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Uint(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Uint(v.into())
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::Uint(v.into())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Uint(v.into())
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Bytes(v.as_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(token: Token) {
        let mut buf = Vec::new();
        token.encode(&mut buf).unwrap();
        let (decoded, consumed) = Token::decode(&buf).unwrap();
        assert_eq!(decoded, token);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn integer_boundaries_round_trip() {
        for v in [0, 15, 16, 63, 64, 2047, 2048, (1 << 24) - 1, 1 << 24, u64::MAX] {
            round_trip(Token::Uint(v));
        }
        for v in [0, -1, -32, 31, 32, -33, 127, 128, -128, -129, i64::MIN, i64::MAX] {
            round_trip(Token::Int(v));
        }
    }

    #[test]
    fn byte_string_boundaries_round_trip() {
        for len in [0, 15, 16, 2047, 2048, (1 << 24) - 1] {
            round_trip(Token::Bytes(vec![0x5a; len]));
        }
    }

    #[test]
    fn byte_string_past_long_atom_is_rejected() {
        let mut buf = Vec::new();
        let err = Token::Bytes(vec![0; 1 << 24]).encode(&mut buf).unwrap_err();
        assert_eq!(err, TokenError::TooLarge(1 << 24));
    }

    #[test]
    fn smallest_atom_is_chosen() {
        let encode = |t: Token| {
            let mut buf = Vec::new();
            t.encode(&mut buf).unwrap();
            buf
        };
        assert_eq!(encode(Token::Uint(63)), [0x3f]);
        assert_eq!(encode(Token::Uint(64)), [0x81, 0x40]);
        assert_eq!(encode(Token::Uint(0x1_0000)), [0x83, 0x01, 0x00, 0x00]);
        assert_eq!(encode(Token::Int(-1)), [0x7f]);
        assert_eq!(encode(Token::Int(128)), [0x92, 0x00, 0x80]);
        assert_eq!(encode(Token::Bytes(vec![1; 15]))[0], 0xaf);
        assert_eq!(encode(Token::Bytes(vec![1; 16]))[..2], [0xd0, 0x10]);
        assert_eq!(encode(Token::Bytes(vec![1; 2048]))[..4], [0xe2, 0x00, 0x08, 0x00]);
    }

    #[test]
    fn truncated_atoms_are_malformed() {
        let values = [
            Token::Uint(0x1234),
            Token::Int(-5000),
            Token::Bytes(vec![7; 15]),
            Token::Bytes(vec![7; 16]),
            Token::Bytes(vec![7; 2048]),
        ];
        for token in values {
            let mut buf = Vec::new();
            token.encode(&mut buf).unwrap();
            let err = Token::decode(&buf[..buf.len() - 1]).unwrap_err();
            assert!(
                matches!(
                    err,
                    TokenError::MalformedToken {
                        reason: MalformedReason::Truncated,
                        ..
                    }
                ),
                "{token:?}: {err:?}"
            );
        }
        assert!(Token::decode(&[]).is_err());
    }

    #[test]
    fn truncating_a_stream_never_decodes() {
        let stream = Value::encode_all(&[Value::list([
            Value::named(3u64, 1_000_000u64),
            Value::named(4u64, &b"0123456789abcdef"[..]),
        ])])
        .unwrap();
        let err = Value::decode_all(&stream[..stream.len() - 1]).unwrap_err();
        assert!(matches!(err, TokenError::UnbalancedStructure { .. }));
        let err = Value::decode_all(&stream[..stream.len() - 4]).unwrap_err();
        assert!(matches!(err, TokenError::MalformedToken { .. }));
    }

    #[test]
    fn reserved_headers_are_rejected() {
        for header in [0xe4, 0xef, 0xf4, 0xf7, 0xfd, 0xfe] {
            let err = Token::decode(&[header]).unwrap_err();
            assert_eq!(
                err,
                TokenError::MalformedToken {
                    offset: 0,
                    reason: MalformedReason::Reserved(header)
                }
            );
        }
    }

    #[test]
    fn wide_integers_are_rejected() {
        let mut buf = vec![0x89];
        buf.extend_from_slice(&[1; 9]);
        let err = Token::decode(&buf).unwrap_err();
        assert!(matches!(
            err,
            TokenError::MalformedToken {
                reason: MalformedReason::IntegerTooWide(9),
                ..
            }
        ));
    }

    #[test]
    fn unbalanced_streams_are_rejected() {
        use control::*;
        for stream in [
            &[START_LIST, 0x01][..],
            &[START_NAME, 0x01, 0x02],
            &[END_LIST],
            &[START_LIST, END_NAME],
            &[START_NAME, 0x01, END_LIST],
        ] {
            let err = decode_stream(stream).unwrap_err();
            assert!(matches!(err, TokenError::UnbalancedStructure { .. }), "{stream:x?}");
            let err = Value::decode_all(stream).unwrap_err();
            assert!(matches!(err, TokenError::UnbalancedStructure { .. }), "{stream:x?}");
        }
    }

    #[test]
    fn names_hold_exactly_two_values() {
        use control::*;
        let one = [START_NAME, 0x01, END_NAME];
        let three = [START_NAME, 0x01, 0x02, 0x03, END_NAME];
        assert!(Value::decode_all(&one).is_err());
        assert!(Value::decode_all(&three).is_err());

        let nested = [START_NAME, 0x01, START_LIST, 0x02, 0x03, END_LIST, END_NAME];
        let values = Value::decode_all(&nested).unwrap();
        assert_eq!(values, [Value::named(1u64, Value::list([2u64, 3u64]))]);
    }

    #[test]
    fn control_tokens_inside_lists_are_rejected() {
        use control::*;
        let err = Value::decode_all(&[START_LIST, END_OF_DATA, END_LIST]).unwrap_err();
        assert_eq!(err, TokenError::UnbalancedStructure { offset: 1 });
    }

    #[test]
    fn method_status_trailer_decodes() {
        let buf = hex::decode("f9f0000000f1").unwrap();
        let values = Value::decode_all(&buf).unwrap();
        assert_eq!(
            values,
            [Value::EndOfData, Value::list([0u64, 0u64, 0u64])]
        );
    }

    #[test]
    fn empty_atoms_are_ignored() {
        let values = Value::decode_all(&[0xf0, 0xff, 0x01, 0xf1, 0xff]).unwrap();
        assert_eq!(values, [Value::list([1u64])]);
    }
}
