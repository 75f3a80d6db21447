//! Byte-order independent encoding of every value that crosses a session.
//!
//! Integers and doubles are big-endian at full width, strings carry a `u32`
//! length prefix, and every message travels in a `u32` length-prefixed
//! frame. Decoding never pads: short input is always a protocol error.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use dbrpc_core::cursor::{AccessMode, FetchDirection, PositionMode};
use dbrpc_core::error::RpcError;
use dbrpc_core::token::Token;
use dbrpc_core::types::{
    Column, ColumnType, DatabaseHandle, IndexInfo, Row, RowDescriptor, TableDefinition, Value,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Version 2 adds the outer frame length to every message.
pub const PROTOCOL_VERSION: i32 = 2;
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const NULL_MARKER: u8 = 1;
const VALUE_MARKER: u8 = 0;

pub trait Wire: Sized {
    fn encode(&self, buf: &mut BytesMut);
    fn decode(buf: &mut Bytes) -> Result<Self, RpcError>;
}

fn need(buf: &Bytes, len: usize, what: &str) -> Result<(), RpcError> {
    if buf.remaining() < len {
        return Err(RpcError::protocol(format!(
            "truncated {what}: need {len} bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(())
}

/// Reject bytes a decoder left behind; a well-formed message is consumed
/// exactly.
pub fn finish(buf: &Bytes) -> Result<(), RpcError> {
    if buf.has_remaining() {
        return Err(RpcError::protocol(format!(
            "{} trailing bytes after message",
            buf.remaining()
        )));
    }
    Ok(())
}

impl Wire for i32 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32(*self);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, RpcError> {
        need(buf, 4, "i32")?;
        Ok(buf.get_i32())
    }
}

impl Wire for i64 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i64(*self);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, RpcError> {
        need(buf, 8, "i64")?;
        Ok(buf.get_i64())
    }
}

impl Wire for f64 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.to_bits());
    }

    fn decode(buf: &mut Bytes) -> Result<Self, RpcError> {
        need(buf, 8, "f64")?;
        Ok(f64::from_bits(buf.get_u64()))
    }
}

impl Wire for bool {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(u8::from(*self));
    }

    fn decode(buf: &mut Bytes) -> Result<Self, RpcError> {
        need(buf, 1, "bool")?;
        match buf.get_u8() {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(RpcError::protocol(format!("invalid bool byte {other}"))),
        }
    }
}

impl Wire for String {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.len() as u32);
        buf.extend_from_slice(self.as_bytes());
    }

    fn decode(buf: &mut Bytes) -> Result<Self, RpcError> {
        need(buf, 4, "string length")?;
        let len = buf.get_u32() as usize;
        need(buf, len, "string")?;
        let raw = buf.split_to(len);
        String::from_utf8(raw.to_vec())
            .map_err(|_| RpcError::protocol("string is not valid utf-8"))
    }
}

impl<T: Wire> Wire for Vec<T> {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.len() as u32);
        for item in self {
            item.encode(buf);
        }
    }

    fn decode(buf: &mut Bytes) -> Result<Self, RpcError> {
        need(buf, 4, "list length")?;
        let count = buf.get_u32() as usize;
        // Every element takes at least one byte.
        need(buf, count, "list")?;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(T::decode(buf)?);
        }
        Ok(items)
    }
}

impl Wire for Token {
    fn encode(&self, buf: &mut BytesMut) {
        self.raw().encode(buf);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, RpcError> {
        let raw = i32::decode(buf)?;
        if raw < 0 {
            return Err(RpcError::protocol(format!("negative token {raw}")));
        }
        Ok(Token::from_raw(raw))
    }
}

impl Wire for ColumnType {
    fn encode(&self, buf: &mut BytesMut) {
        self.wire_id().encode(buf);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, RpcError> {
        let id = i32::decode(buf)?;
        ColumnType::from_wire_id(id)
            .ok_or_else(|| RpcError::protocol(format!("unknown column type {id}")))
    }
}

impl Wire for AccessMode {
    fn encode(&self, buf: &mut BytesMut) {
        self.wire_id().encode(buf);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, RpcError> {
        let id = i32::decode(buf)?;
        AccessMode::from_wire_id(id)
            .ok_or_else(|| RpcError::protocol(format!("unknown access mode {id}")))
    }
}

impl Wire for PositionMode {
    fn encode(&self, buf: &mut BytesMut) {
        self.wire_id().encode(buf);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, RpcError> {
        let id = i32::decode(buf)?;
        PositionMode::from_wire_id(id)
            .ok_or_else(|| RpcError::protocol(format!("unknown position mode {id}")))
    }
}

impl Wire for FetchDirection {
    fn encode(&self, buf: &mut BytesMut) {
        let (id, offset) = match *self {
            FetchDirection::Next => (0, 0),
            FetchDirection::Prior => (1, 0),
            FetchDirection::First => (2, 0),
            FetchDirection::Last => (3, 0),
            FetchDirection::Current => (4, 0),
            FetchDirection::Relative(offset) => (5, offset),
        };
        buf.put_i32(id);
        buf.put_i64(offset);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, RpcError> {
        let id = i32::decode(buf)?;
        let offset = i64::decode(buf)?;
        Ok(match id {
            0 => FetchDirection::Next,
            1 => FetchDirection::Prior,
            2 => FetchDirection::First,
            3 => FetchDirection::Last,
            4 => FetchDirection::Current,
            5 => FetchDirection::Relative(offset),
            other => return Err(RpcError::protocol(format!("unknown fetch direction {other}"))),
        })
    }
}

impl Wire for Column {
    fn encode(&self, buf: &mut BytesMut) {
        self.name.encode(buf);
        self.column_type.encode(buf);
        self.nullable.encode(buf);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, RpcError> {
        Ok(Column {
            name: String::decode(buf)?,
            column_type: ColumnType::decode(buf)?,
            nullable: bool::decode(buf)?,
        })
    }
}

impl Wire for RowDescriptor {
    fn encode(&self, buf: &mut BytesMut) {
        self.columns.encode(buf);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, RpcError> {
        Ok(RowDescriptor::new(Vec::<Column>::decode(buf)?))
    }
}

/// Self-describing form, one tag byte per value. Rows fetched through a
/// cursor use [`encode_row`] instead.
impl Wire for Value {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Value::Null => buf.put_u8(0),
            Value::Integer(v) => {
                buf.put_u8(ColumnType::Integer.wire_id() as u8);
                v.encode(buf);
            }
            Value::Double(v) => {
                buf.put_u8(ColumnType::Double.wire_id() as u8);
                v.encode(buf);
            }
            Value::Text(v) => {
                buf.put_u8(ColumnType::Text.wire_id() as u8);
                v.encode(buf);
            }
        }
    }

    fn decode(buf: &mut Bytes) -> Result<Self, RpcError> {
        need(buf, 1, "value tag")?;
        let tag = buf.get_u8();
        if tag == 0 {
            return Ok(Value::Null);
        }
        let ty = ColumnType::from_wire_id(i32::from(tag))
            .ok_or_else(|| RpcError::protocol(format!("unknown value tag {tag}")))?;
        decode_typed(buf, ty)
    }
}

fn decode_typed(buf: &mut Bytes, ty: ColumnType) -> Result<Value, RpcError> {
    Ok(match ty {
        ColumnType::Integer => Value::Integer(i64::decode(buf)?),
        ColumnType::Double => Value::Double(f64::decode(buf)?),
        ColumnType::Text => Value::Text(String::decode(buf)?),
    })
}

impl Wire for IndexInfo {
    fn encode(&self, buf: &mut BytesMut) {
        self.name.encode(buf);
        self.table.encode(buf);
        self.unique.encode(buf);
        self.columns.encode(buf);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, RpcError> {
        Ok(IndexInfo {
            name: String::decode(buf)?,
            table: String::decode(buf)?,
            unique: bool::decode(buf)?,
            columns: Vec::<String>::decode(buf)?,
        })
    }
}

impl Wire for DatabaseHandle {
    fn encode(&self, buf: &mut BytesMut) {
        self.name.encode(buf);
        self.location.encode(buf);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, RpcError> {
        Ok(DatabaseHandle {
            name: String::decode(buf)?,
            location: String::decode(buf)?,
        })
    }
}

impl Wire for TableDefinition {
    fn encode(&self, buf: &mut BytesMut) {
        self.name.encode(buf);
        self.descriptor.encode(buf);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, RpcError> {
        Ok(TableDefinition {
            name: String::decode(buf)?,
            descriptor: RowDescriptor::decode(buf)?,
        })
    }
}

/// Encode `row` as the untagged field sequence `descriptor` describes.
pub fn encode_row(row: &Row, descriptor: &RowDescriptor, buf: &mut BytesMut) -> Result<(), RpcError> {
    descriptor.check_row(row)?;
    for value in &row.values {
        match value {
            Value::Null => buf.put_u8(NULL_MARKER),
            Value::Integer(v) => {
                buf.put_u8(VALUE_MARKER);
                v.encode(buf);
            }
            Value::Double(v) => {
                buf.put_u8(VALUE_MARKER);
                v.encode(buf);
            }
            Value::Text(v) => {
                buf.put_u8(VALUE_MARKER);
                v.encode(buf);
            }
        }
    }
    Ok(())
}

pub fn decode_row(buf: &mut Bytes, descriptor: &RowDescriptor) -> Result<Row, RpcError> {
    let mut values = Vec::with_capacity(descriptor.len());
    for column in &descriptor.columns {
        need(buf, 1, "null marker")?;
        match buf.get_u8() {
            NULL_MARKER if column.nullable => values.push(Value::Null),
            NULL_MARKER => {
                return Err(RpcError::protocol(format!(
                    "null in non-nullable column {}",
                    column.name
                )))
            }
            VALUE_MARKER => values.push(decode_typed(buf, column.column_type)?),
            other => return Err(RpcError::protocol(format!("invalid null marker {other}"))),
        }
    }
    Ok(Row::new(values))
}

pub async fn write_frame<S: AsyncWrite + Unpin>(stream: &mut S, body: &[u8]) -> Result<(), RpcError> {
    if body.len() > MAX_FRAME_LEN {
        return Err(RpcError::protocol(format!(
            "frame of {} bytes exceeds limit",
            body.len()
        )));
    }
    stream.write_u32(body.len() as u32).await?;
    stream.write_all(body).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one frame. `Ok(None)` means the peer closed the stream cleanly
/// between frames; closing mid-frame is a protocol error.
pub async fn read_frame<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Option<Bytes>, RpcError> {
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        let n = stream.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(RpcError::protocol("stream ended inside frame header"));
        }
        filled += n;
    }
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(RpcError::protocol(format!("frame of {len} bytes exceeds limit")));
    }
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await.map_err(|err| {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            RpcError::protocol("stream ended inside frame body")
        } else {
            RpcError::Io(err)
        }
    })?;
    Ok(Some(Bytes::from(body)))
}
