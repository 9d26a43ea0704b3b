//! Fixed-offset binary record decoding
//!
//! CEOS leader files are sequences of variable-length records whose fields
//! sit at fixed byte offsets, encoded either as fixed-width ASCII numbers,
//! trimmed ASCII text, or big-endian binary integers. Each record layout is
//! a declarative table of fields evaluated against a byte buffer, which
//! keeps the offset arithmetic out of the handlers and lets every layout be
//! unit-tested against fixture blobs.

use crate::types::{SarError, SarResult};
use std::collections::HashMap;

/// How a byte slice turns into a value
#[derive(Debug, Clone, Copy)]
pub enum Decode {
    /// trimmed ASCII text
    Text,
    /// fixed-width ASCII integer
    Int,
    /// fixed-width ASCII float
    Float,
    /// 4-byte big-endian signed integer
    BeI32,
}

/// One field of a record layout
#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub offset: usize,
    pub len: usize,
    pub decode: Decode,
}

/// Convenience constructor used by the layout tables.
pub const fn field(name: &'static str, offset: usize, len: usize, decode: Decode) -> Field {
    Field {
        name,
        offset,
        len,
        decode,
    }
}

/// A decoded field value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Int(i64),
    Float(f64),
}

impl Value {
    pub fn as_text(&self) -> SarResult<&str> {
        match self {
            Value::Text(s) => Ok(s),
            other => Err(SarError::Malformed(format!("expected text, got {other:?}"))),
        }
    }

    pub fn as_i64(&self) -> SarResult<i64> {
        match self {
            Value::Int(v) => Ok(*v),
            other => Err(SarError::Malformed(format!(
                "expected integer, got {other:?}"
            ))),
        }
    }

    pub fn as_f64(&self) -> SarResult<f64> {
        match self {
            Value::Float(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f64),
            other => Err(SarError::Malformed(format!("expected float, got {other:?}"))),
        }
    }
}

/// A named record layout: a table of fields over one byte buffer
#[derive(Debug, Clone, Copy)]
pub struct RecordLayout {
    pub name: &'static str,
    pub fields: &'static [Field],
}

impl RecordLayout {
    /// Decode every field of the layout against a buffer.
    pub fn read(&self, buf: &[u8]) -> SarResult<HashMap<&'static str, Value>> {
        let mut values = HashMap::with_capacity(self.fields.len());
        for f in self.fields {
            values.insert(f.name, decode_field(self.name, f, buf)?);
        }
        Ok(values)
    }
}

fn decode_field(record: &str, f: &Field, buf: &[u8]) -> SarResult<Value> {
    let slice = slice_at(record, f.name, buf, f.offset, f.len)?;
    match f.decode {
        Decode::Text => Ok(Value::Text(ascii_text(slice))),
        Decode::Int => {
            let text = ascii_text(slice);
            text.parse::<i64>().map(Value::Int).map_err(|_| {
                SarError::Malformed(format!("{record}.{}: invalid integer {text:?}", f.name))
            })
        }
        Decode::Float => {
            let text = ascii_text(slice);
            text.parse::<f64>().map(Value::Float).map_err(|_| {
                SarError::Malformed(format!("{record}.{}: invalid float {text:?}", f.name))
            })
        }
        Decode::BeI32 => {
            let bytes: [u8; 4] = slice
                .try_into()
                .map_err(|_| SarError::Malformed(format!("{record}.{}: not 4 bytes", f.name)))?;
            Ok(Value::Int(i64::from(i32::from_be_bytes(bytes))))
        }
    }
}

fn slice_at<'a>(
    record: &str,
    name: &str,
    buf: &'a [u8],
    offset: usize,
    len: usize,
) -> SarResult<&'a [u8]> {
    buf.get(offset..offset + len).ok_or_else(|| {
        SarError::Malformed(format!(
            "{record}.{name}: byte range {offset}..{} exceeds record of {} bytes",
            offset + len,
            buf.len()
        ))
    })
}

fn ascii_text(slice: &[u8]) -> String {
    String::from_utf8_lossy(slice).trim().to_string()
}

/// Decode a lone fixed-width ASCII float without a layout table.
pub fn ascii_f64(buf: &[u8], offset: usize, len: usize) -> SarResult<f64> {
    match decode_field(
        "field",
        &Field {
            name: "float",
            offset,
            len,
            decode: Decode::Float,
        },
        buf,
    )? {
        Value::Float(v) => Ok(v),
        _ => unreachable!(),
    }
}

/// Decode a lone fixed-width ASCII integer.
pub fn ascii_i64(buf: &[u8], offset: usize, len: usize) -> SarResult<i64> {
    match decode_field(
        "field",
        &Field {
            name: "int",
            offset,
            len,
            decode: Decode::Int,
        },
        buf,
    )? {
        Value::Int(v) => Ok(v),
        _ => unreachable!(),
    }
}

/// Decode a lone trimmed ASCII text field.
pub fn ascii_str(buf: &[u8], offset: usize, len: usize) -> SarResult<String> {
    Ok(ascii_text(slice_at("field", "text", buf, offset, len)?))
}

/// Decode a 4-byte big-endian signed integer.
pub fn be_i32(buf: &[u8], offset: usize) -> SarResult<i32> {
    let slice = slice_at("field", "be_i32", buf, offset, 4)?;
    let bytes: [u8; 4] = slice.try_into().expect("length checked");
    Ok(i32::from_be_bytes(bytes))
}

/// Walk the trailing facility-related record sequence of a CEOS leader.
///
/// The total count is unknown; each record declares its own length as a
/// big-endian integer at sub-offset 8, and the walk advances until
/// end-of-file. A length pointing past the end of the buffer is a
/// malformed record, never a silent truncation.
pub fn facility_records(buf: &[u8], start: usize) -> SarResult<Vec<&[u8]>> {
    let mut records = Vec::new();
    let mut p0 = start;
    while p0 < buf.len() {
        let length = be_i32(buf, p0 + 8)? as usize;
        if length == 0 {
            return Err(SarError::Malformed(format!(
                "facility record at byte {p0} declares zero length"
            )));
        }
        let p1 = p0 + length;
        let record = buf.get(p0..p1).ok_or_else(|| {
            SarError::Malformed(format!(
                "facility record at byte {p0} declares {length} bytes but only {} remain",
                buf.len() - p0
            ))
        })?;
        records.push(record);
        p0 = p1;
    }
    Ok(records)
}
