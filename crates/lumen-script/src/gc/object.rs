//! Heap object representation.

use super::GcRef;
use crate::runtime::Value;

/// A value that lives on the heap.
#[derive(Debug, Clone, PartialEq)]
pub enum HeapObject {
    /// An immutable string
    Str(String),
    /// A fixed-length array
    Array(Vec<Value>),
    /// A struct instance
    Struct {
        /// Chunk whose static pool holds the layout
        chunk: u32,
        /// Static id of the aggregate descriptor
        descriptor: u32,
        /// Field values in slot order
        fields: Vec<Value>,
    },
    /// A script function value
    Closure {
        /// Chunk the function lives in
        chunk: u32,
        /// Static id of the function descriptor
        function: u32,
    },
}

impl HeapObject {
    /// Short name of the object kind, for messages.
    pub fn kind(&self) -> &'static str {
        match self {
            HeapObject::Str(_) => "string",
            HeapObject::Array(_) => "array",
            HeapObject::Struct { .. } => "struct",
            HeapObject::Closure { .. } => "function",
        }
    }

    /// Calls `visit` for every reference this object holds.
    pub fn trace(&self, mut visit: impl FnMut(GcRef)) {
        let values = match self {
            HeapObject::Array(values) => values.as_slice(),
            HeapObject::Struct { fields, .. } => fields.as_slice(),
            HeapObject::Str(_) | HeapObject::Closure { .. } => return,
        };
        for value in values {
            if let Some(r) = value.as_ref() {
                visit(r);
            }
        }
    }

    /// The string contents, for strings.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeapObject::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The element or field values, for arrays and structs.
    pub fn values(&self) -> Option<&[Value]> {
        match self {
            HeapObject::Array(values) => Some(values),
            HeapObject::Struct { fields, .. } => Some(fields),
            _ => None,
        }
    }

    /// Mutable element or field values, for arrays and structs.
    pub fn values_mut(&mut self) -> Option<&mut [Value]> {
        match self {
            HeapObject::Array(values) => Some(values),
            HeapObject::Struct { fields, .. } => Some(fields),
            _ => None,
        }
    }
}
