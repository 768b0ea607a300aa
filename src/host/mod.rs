//! LEVEE - Host Value Model
//! What application code on the event-loop thread hands in and gets back.
//! Host values are reference counted with `Rc` and never cross to a worker
//! thread; anything the exec phase needs is copied out first (see
//! [`payload`]).

pub mod options;
pub mod payload;

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use crate::snapshot::Snapshot;

pub use self::payload::Payload;

/// A host-owned byte buffer.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct HostBuffer(Rc<[u8]>);

impl HostBuffer {
    pub fn new(bytes: &[u8]) -> Self {
        Self(Rc::from(bytes))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl Deref for HostBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for HostBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostBuffer({} bytes)", self.0.len())
    }
}

impl From<&[u8]> for HostBuffer {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes)
    }
}

impl From<Vec<u8>> for HostBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Rc::from(bytes))
    }
}

/// A plain host object: named properties.
#[derive(Debug, Clone, Default)]
pub struct HostObject {
    properties: BTreeMap<String, HostValue>,
}

impl HostObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style property setter.
    pub fn with(mut self, name: &str, value: impl Into<HostValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<HostValue>) {
        self.properties.insert(name.to_string(), value.into());
    }

    /// Missing properties read as `Undefined`, like the host does.
    pub fn get(&self, name: &str) -> &HostValue {
        self.properties.get(name).unwrap_or(&HostValue::Undefined)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

/// A host-visible value.
#[derive(Debug, Clone, Default)]
pub enum HostValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Buffer(HostBuffer),
    Array(Vec<HostValue>),
    Object(HostObject),
    /// A snapshot proxy.
    Snapshot(Snapshot),
}

impl HostValue {
    /// Name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            HostValue::Undefined => "undefined",
            HostValue::Null => "null",
            HostValue::Bool(_) => "boolean",
            HostValue::Number(_) => "number",
            HostValue::Str(_) => "string",
            HostValue::Buffer(_) => "buffer",
            HostValue::Array(_) => "array",
            HostValue::Object(_) => "object",
            HostValue::Snapshot(_) => "snapshot",
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, HostValue::Undefined | HostValue::Null)
    }

    /// Extract the snapshot behind a proxy value.
    pub fn as_snapshot(&self) -> Option<&Snapshot> {
        match self {
            HostValue::Snapshot(snapshot) => Some(snapshot),
            _ => None,
        }
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::Str(s.to_string())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        HostValue::Str(s)
    }
}

impl From<&[u8]> for HostValue {
    fn from(bytes: &[u8]) -> Self {
        HostValue::Buffer(HostBuffer::new(bytes))
    }
}

impl<const N: usize> From<&[u8; N]> for HostValue {
    fn from(bytes: &[u8; N]) -> Self {
        HostValue::Buffer(HostBuffer::new(bytes))
    }
}

impl From<Vec<u8>> for HostValue {
    fn from(bytes: Vec<u8>) -> Self {
        HostValue::Buffer(bytes.into())
    }
}

impl From<HostBuffer> for HostValue {
    fn from(buffer: HostBuffer) -> Self {
        HostValue::Buffer(buffer)
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        HostValue::Bool(b)
    }
}

impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        HostValue::Number(n)
    }
}

impl From<Vec<HostValue>> for HostValue {
    fn from(items: Vec<HostValue>) -> Self {
        HostValue::Array(items)
    }
}

impl From<HostObject> for HostValue {
    fn from(object: HostObject) -> Self {
        HostValue::Object(object)
    }
}

impl From<Snapshot> for HostValue {
    fn from(snapshot: Snapshot) -> Self {
        HostValue::Snapshot(snapshot)
    }
}

impl From<&Snapshot> for HostValue {
    fn from(snapshot: &Snapshot) -> Self {
        HostValue::Snapshot(snapshot.clone())
    }
}

impl From<Payload> for HostValue {
    fn from(payload: Payload) -> Self {
        match payload {
            Payload::Text(s) => HostValue::Str(s),
            Payload::Binary(b) => HostValue::Buffer(b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_property_is_undefined() {
        let object = HostObject::new().with("sync", true);
        assert!(matches!(object.get("sync"), HostValue::Bool(true)));
        assert!(object.get("missing").is_nullish());
        assert_eq!(object.len(), 1);
    }

    #[test]
    fn test_conversions() {
        assert_eq!(HostValue::from("k").type_name(), "string");
        assert_eq!(HostValue::from(&b"k"[..]).type_name(), "buffer");
        assert_eq!(HostValue::from(b"raw").type_name(), "buffer");
        assert_eq!(HostValue::from(1.5).type_name(), "number");
        assert_eq!(HostValue::default().type_name(), "undefined");
    }

    #[test]
    fn test_buffer_derefs_to_bytes() {
        let buffer = HostBuffer::from(vec![1u8, 2, 3]);
        assert_eq!(&*buffer, &[1, 2, 3]);
        assert_eq!(buffer.as_slice().len(), 3);
    }
}
