//! Reference-counted values stored in the keyspace and passed between the
//! parser, the command table and the reply queue.
//!
//! A value is created with a single owner (`Rc::new`, strong count 1). Every
//! container that keeps it clones the `Rc`, and removing it from the container
//! drops that clone. The payload itself is never copied.

use bytes::Bytes;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// Shared handle to an [`Object`].
pub type Robj = Rc<Object>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjType {
    Str,
    Int,
}

#[derive(Clone, PartialEq, Eq)]
enum Payload {
    Str(Bytes),
    Int(i64),
}

pub struct Object {
    payload: Payload,
}

impl Object {
    /// New string object
    pub fn string(data: impl Into<Bytes>) -> Robj {
        Rc::new(Self {
            payload: Payload::Str(data.into()),
        })
    }

    /// New integer object
    pub fn int(value: i64) -> Robj {
        Rc::new(Self {
            payload: Payload::Int(value),
        })
    }

    pub fn obj_type(&self) -> ObjType {
        match self.payload {
            Payload::Str(_) => ObjType::Str,
            Payload::Int(_) => ObjType::Int,
        }
    }

    /// Raw bytes of a string object, `None` for other kinds
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.payload {
            Payload::Str(b) => Some(b),
            Payload::Int(_) => None,
        }
    }

    /// Integer payload; string objects are parsed as base-10
    pub fn int_value(&self) -> Option<i64> {
        match &self.payload {
            Payload::Int(n) => Some(*n),
            Payload::Str(b) => std::str::from_utf8(b).ok()?.parse().ok(),
        }
    }

    /// Encoded bytes of the value, formatting integers in base 10
    pub fn to_bytes(&self) -> Bytes {
        match &self.payload {
            Payload::Str(b) => b.clone(),
            Payload::Int(n) => {
                let mut buf = itoa::Buffer::new();
                Bytes::copy_from_slice(buf.format(*n).as_bytes())
            }
        }
    }

    pub fn len(&self) -> usize {
        match &self.payload {
            Payload::Str(b) => b.len(),
            Payload::Int(n) => itoa::Buffer::new().format(*n).len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// Objects of different kinds never compare equal.
impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.payload == other.payload
    }
}

impl Eq for Object {}

impl Hash for Object {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.payload {
            Payload::Str(b) => {
                state.write_u8(0);
                b.hash(state);
            }
            Payload::Int(n) => {
                state.write_u8(1);
                n.hash(state);
            }
        }
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Payload::Str(b) => write!(f, "Str({:?})", String::from_utf8_lossy(b)),
            Payload::Int(n) => write!(f, "Int({})", n),
        }
    }
}
