//! LEVEE - Byte-Payload Adapter
//! Copies bytes across the boundary in both directions. Host buffers are
//! `Rc`-owned and may be collected once the call that supplied them returns,
//! so keys and values are copied into engine-owned `Bytes` before an
//! operation is built. Results are copied again into fresh host payloads in
//! the conv phase; no memory is ever shared across the boundary.

use bytes::Bytes;

use crate::error::{Error, Result};

use super::{HostBuffer, HostValue};

/// A key or value as delivered to host code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(HostBuffer),
}

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(s) => s.as_bytes(),
            Payload::Binary(b) => b.as_slice(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s),
            Payload::Binary(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

/// Copy a host string or buffer into an engine-owned buffer.
pub fn to_engine_bytes(value: &HostValue) -> Result<Bytes> {
    match value {
        HostValue::Str(s) => Ok(Bytes::copy_from_slice(s.as_bytes())),
        HostValue::Buffer(b) => Ok(Bytes::copy_from_slice(b.as_slice())),
        other => Err(Error::invalid(format!(
            "expected a string or buffer, got {}",
            other.type_name()
        ))),
    }
}

/// Copy engine bytes into a new host payload. Text is decoded lossily.
pub fn to_host(bytes: &[u8], as_buffer: bool) -> Payload {
    if as_buffer {
        Payload::Binary(HostBuffer::new(bytes))
    } else {
        Payload::Text(String::from_utf8_lossy(bytes).into_owned())
    }
}
