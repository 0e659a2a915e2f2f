//! Wire protocol: frame layouts and the opcode set.
//!
//! Every exchange is a single ZMQ message with packed little-endian fields:
//!
//! - request:  `opcode:i32 | length:u64 | payload`, where `length` counts
//!   the whole frame including this header;
//! - reply:    `length:u64 | result:i32 | payload`;
//! - forward:  `topic NUL | value-on-wire`. The topic (full name) leads the
//!   message so XPUB/SUB prefix matching works; the transport delimits the
//!   frame, so no length word travels with it.
//!
//! Handles are opaque broker-minted tokens, 8 bytes on the wire. They are
//! never addresses; the broker looks them up in its own store.

use crate::error::{DsvError, Result};
use crate::value::{DsvType, Value};

/// Size of the request header (`opcode:i32 | length:u64`).
pub const REQUEST_HEADER: usize = 12;
/// Size of the reply header (`length:u64 | result:i32`).
pub const REPLY_HEADER: usize = 12;

/// An opaque reference to a broker-side entry, stable for the broker's
/// lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

impl Handle {
    pub fn new(raw: u64) -> Handle {
        Handle(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Request opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Opcode {
    Create = 1,
    GetHandle = 2,
    GetType = 3,
    GetLen = 4,
    Set = 5,
    Get = 6,
    GetNext = 7,
    AddItem = 8,
    DelItem = 9,
    InsItem = 10,
    SetItem = 11,
    GetItem = 12,
    Save = 13,
    Restore = 14,
    Track = 15,
}

impl Opcode {
    pub fn from_wire(raw: i32) -> Result<Opcode> {
        use Opcode::*;
        Ok(match raw {
            1 => Create,
            2 => GetHandle,
            3 => GetType,
            4 => GetLen,
            5 => Set,
            6 => Get,
            7 => GetNext,
            8 => AddItem,
            9 => DelItem,
            10 => InsItem,
            11 => SetItem,
            12 => GetItem,
            13 => Save,
            14 => Restore,
            15 => Track,
            other => return Err(DsvError::Invalid(format!("unknown opcode {other}"))),
        })
    }
}

/// The fixed block leading a `create` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryDescriptor {
    pub ty: DsvType,
    pub flags: u32,
    pub instance_id: u32,
    /// Byte length of the initial value; for int-array this sizes the raw
    /// element bytes that follow the tags field.
    pub len: u64,
    /// Timestamp placeholder; the broker stamps entries itself.
    pub timestamp: u64,
}

/// A parsed `create` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateRequest {
    pub desc: EntryDescriptor,
    pub name: String,
    pub description: String,
    pub tags: String,
    pub value: Value,
}

// ============================================================================
// Frame cursors
// ============================================================================

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Reader<'a> {
        Reader { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() - self.pos < n {
            return Err(DsvError::Invalid(format!(
                "truncated frame: want {n} bytes at offset {}, have {}",
                self.pos,
                self.buf.len() - self.pos
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn cstr(&mut self) -> Result<&'a str> {
        let rest = &self.buf[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| DsvError::Invalid("unterminated string in frame".into()))?;
        let s = std::str::from_utf8(&rest[..nul])
            .map_err(|e| DsvError::Invalid(format!("non-UTF-8 string in frame: {e}")))?;
        self.pos += nul + 1;
        Ok(s)
    }

    fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}

fn push_cstr(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}

fn finish_request(opcode: Opcode, mut payload: Vec<u8>) -> Vec<u8> {
    let total = REQUEST_HEADER + payload.len();
    let mut frame = Vec::with_capacity(total);
    frame.extend_from_slice(&(opcode as i32).to_le_bytes());
    frame.extend_from_slice(&(total as u64).to_le_bytes());
    frame.append(&mut payload);
    frame
}

// ============================================================================
// Requests
// ============================================================================

/// A request frame split into its opcode and payload bytes.
#[derive(Debug)]
pub struct Request<'a> {
    pub opcode: Opcode,
    pub payload: &'a [u8],
}

/// Validate the request header and hand back the payload view.
pub fn parse_request(frame: &[u8]) -> Result<Request<'_>> {
    let mut r = Reader::new(frame);
    let opcode = Opcode::from_wire(r.i32()?)?;
    let length = r.u64()? as usize;
    if length != frame.len() {
        return Err(DsvError::Invalid(format!(
            "frame length mismatch: header says {length}, frame is {}",
            frame.len()
        )));
    }
    Ok(Request {
        opcode,
        payload: r.rest(),
    })
}

/// Encode a `create` request. For int-array the initial elements ride as raw
/// bytes after the tags field; for every other type the value travels as its
/// stringified form in the fourth NUL-terminated field (empty means "use the
/// type's zero value").
pub fn encode_create(
    instance_id: u32,
    flags: u32,
    name: &str,
    description: &str,
    tags: &str,
    value: &Value,
) -> Vec<u8> {
    let ty = value.dsv_type();
    let mut payload = Vec::new();
    payload.extend_from_slice(&(ty as i32).to_le_bytes());
    payload.extend_from_slice(&flags.to_le_bytes());
    payload.extend_from_slice(&instance_id.to_le_bytes());
    payload.extend_from_slice(&(value.byte_len() as u64).to_le_bytes());
    payload.extend_from_slice(&0u64.to_le_bytes()); // timestamp placeholder
    push_cstr(&mut payload, name);
    push_cstr(&mut payload, description);
    push_cstr(&mut payload, tags);
    match value {
        Value::IntArray(items) => {
            push_cstr(&mut payload, "");
            for v in items {
                payload.extend_from_slice(&v.to_le_bytes());
            }
        }
        other => push_cstr(&mut payload, &other.to_string()),
    }
    finish_request(Opcode::Create, payload)
}

pub fn parse_create(payload: &[u8]) -> Result<CreateRequest> {
    let mut r = Reader::new(payload);
    let ty = DsvType::from_wire(r.i32()?)?;
    let flags = r.u32()?;
    let instance_id = r.u32()?;
    let len = r.u64()?;
    let timestamp = r.u64()?;
    let name = r.cstr()?.to_string();
    let description = r.cstr()?.to_string();
    let tags = r.cstr()?.to_string();
    let value_str = r.cstr()?;
    let value = if ty == DsvType::IntArray {
        let raw = r.take(len as usize)?;
        if len % 4 != 0 {
            return Err(DsvError::Invalid(format!("array byte length {len} not a multiple of 4")));
        }
        Value::IntArray(
            raw.chunks_exact(4)
                .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
                .collect(),
        )
    } else if value_str.is_empty() && ty != DsvType::Str {
        Value::default_for(ty)?
    } else {
        Value::parse(ty, value_str)?
    };
    Ok(CreateRequest {
        desc: EntryDescriptor {
            ty,
            flags,
            instance_id,
            len,
            timestamp,
        },
        name,
        description,
        tags,
        value,
    })
}

pub fn encode_get_handle(name: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    push_cstr(&mut payload, name);
    finish_request(Opcode::GetHandle, payload)
}

pub fn parse_name(payload: &[u8]) -> Result<&str> {
    Reader::new(payload).cstr()
}

/// `get-type`, `get-len` and `get` carry only the handle token.
pub fn encode_handle_request(opcode: Opcode, handle: Handle) -> Vec<u8> {
    finish_request(opcode, handle.raw().to_le_bytes().to_vec())
}

pub fn parse_handle(payload: &[u8]) -> Result<Handle> {
    Ok(Handle::new(Reader::new(payload).u64()?))
}

pub fn encode_set(handle: Handle, value: &Value) -> Vec<u8> {
    let mut payload = handle.raw().to_le_bytes().to_vec();
    payload.extend_from_slice(&value.to_wire());
    finish_request(Opcode::Set, payload)
}

/// A `set` payload: the handle plus the type-implicit value bytes. The
/// caller must have used the encoder matching the entry's type.
pub fn parse_set(payload: &[u8]) -> Result<(Handle, &[u8])> {
    let mut r = Reader::new(payload);
    let handle = Handle::new(r.u64()?);
    Ok((handle, r.rest()))
}

pub fn encode_get_next(last_index: i32, search: &str) -> Vec<u8> {
    let mut payload = last_index.to_le_bytes().to_vec();
    push_cstr(&mut payload, search);
    finish_request(Opcode::GetNext, payload)
}

pub fn parse_get_next(payload: &[u8]) -> Result<(i32, &str)> {
    let mut r = Reader::new(payload);
    let last_index = r.i32()?;
    let search = r.cstr()?;
    Ok((last_index, search))
}

pub fn encode_add_item(handle: Handle, value: i32) -> Vec<u8> {
    let mut payload = handle.raw().to_le_bytes().to_vec();
    payload.extend_from_slice(&value.to_le_bytes());
    finish_request(Opcode::AddItem, payload)
}

pub fn parse_add_item(payload: &[u8]) -> Result<(Handle, i32)> {
    let mut r = Reader::new(payload);
    Ok((Handle::new(r.u64()?), r.i32()?))
}

/// `ins-item` and `set-item` carry `handle | index | value`.
pub fn encode_indexed_item(opcode: Opcode, handle: Handle, index: i32, value: i32) -> Vec<u8> {
    let mut payload = handle.raw().to_le_bytes().to_vec();
    payload.extend_from_slice(&index.to_le_bytes());
    payload.extend_from_slice(&value.to_le_bytes());
    finish_request(opcode, payload)
}

pub fn parse_indexed_item(payload: &[u8]) -> Result<(Handle, i32, i32)> {
    let mut r = Reader::new(payload);
    Ok((Handle::new(r.u64()?), r.i32()?, r.i32()?))
}

/// `del-item` and `get-item` carry `handle | index`.
pub fn encode_item_index(opcode: Opcode, handle: Handle, index: i32) -> Vec<u8> {
    let mut payload = handle.raw().to_le_bytes().to_vec();
    payload.extend_from_slice(&index.to_le_bytes());
    finish_request(opcode, payload)
}

pub fn parse_item_index(payload: &[u8]) -> Result<(Handle, i32)> {
    let mut r = Reader::new(payload);
    Ok((Handle::new(r.u64()?), r.i32()?))
}

/// `save` and `restore` are header-only.
pub fn encode_bare(opcode: Opcode) -> Vec<u8> {
    finish_request(opcode, Vec::new())
}

pub fn encode_track(handle: Handle, enable: bool) -> Vec<u8> {
    let mut payload = handle.raw().to_le_bytes().to_vec();
    payload.extend_from_slice(&(enable as u32).to_le_bytes());
    finish_request(Opcode::Track, payload)
}

pub fn parse_track(payload: &[u8]) -> Result<(Handle, bool)> {
    let mut r = Reader::new(payload);
    Ok((Handle::new(r.u64()?), r.u32()? != 0))
}

// ============================================================================
// Replies
// ============================================================================

pub fn encode_reply(result: i32, payload: &[u8]) -> Vec<u8> {
    let total = REPLY_HEADER + payload.len();
    let mut frame = Vec::with_capacity(total);
    frame.extend_from_slice(&(total as u64).to_le_bytes());
    frame.extend_from_slice(&result.to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Split a reply into its result code and payload bytes.
pub fn parse_reply(frame: &[u8]) -> Result<(i32, &[u8])> {
    let mut r = Reader::new(frame);
    let length = r.u64()? as usize;
    let result = r.i32()?;
    if length != frame.len() {
        return Err(DsvError::Invalid(format!(
            "reply length mismatch: header says {length}, frame is {}",
            frame.len()
        )));
    }
    Ok((result, r.rest()))
}

pub fn reply_handle(handle: Handle) -> Vec<u8> {
    handle.raw().to_le_bytes().to_vec()
}

pub fn parse_reply_handle(payload: &[u8]) -> Result<Handle> {
    Ok(Handle::new(Reader::new(payload).u64()?))
}

pub fn reply_type(ty: DsvType) -> Vec<u8> {
    (ty as i32).to_le_bytes().to_vec()
}

pub fn parse_reply_type(payload: &[u8]) -> Result<DsvType> {
    DsvType::from_wire(Reader::new(payload).i32()?)
}

pub fn reply_len(len: u64) -> Vec<u8> {
    len.to_le_bytes().to_vec()
}

pub fn parse_reply_len(payload: &[u8]) -> Result<u64> {
    Reader::new(payload).u64()
}

pub fn reply_item(value: i32) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

pub fn parse_reply_item(payload: &[u8]) -> Result<i32> {
    Reader::new(payload).i32()
}

/// `get-next` replies carry `index:i32 | name NUL | stringified value NUL`.
pub fn reply_get_next(index: i32, name: &str, value_str: &str) -> Vec<u8> {
    let mut payload = index.to_le_bytes().to_vec();
    push_cstr(&mut payload, name);
    push_cstr(&mut payload, value_str);
    payload
}

pub fn parse_reply_get_next(payload: &[u8]) -> Result<(i32, String, String)> {
    let mut r = Reader::new(payload);
    let index = r.i32()?;
    let name = r.cstr()?.to_string();
    let value = r.cstr()?.to_string();
    Ok((index, name, value))
}

// ============================================================================
// Forward frames
// ============================================================================

/// Build the forward message body: the full name with its NUL, then the
/// value's wire encoding. Subscribers match on the leading bytes, so the
/// NUL keeps `/A/B` from colliding with `/A/BC`.
pub fn encode_forward(name: &str, value_wire: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(name.len() + 1 + value_wire.len());
    push_cstr(&mut frame, name);
    frame.extend_from_slice(value_wire);
    frame
}

/// Split a forward frame into its topic and value bytes.
pub fn parse_forward(frame: &[u8]) -> Result<(&str, &[u8])> {
    let mut r = Reader::new(frame);
    let name = r.cstr()?;
    Ok((name, r.rest()))
}

/// The subscription bytes for a name: the name plus its trailing NUL.
pub fn subscription_topic(name: &str) -> Vec<u8> {
    let mut topic = name.as_bytes().to_vec();
    topic.push(0);
    topic
}
