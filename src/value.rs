use std::any::{Any, TypeId};
use std::sync::Arc;

use crate::error::Result;
use crate::pack::Packer;

/// The in-memory value graph the packer walks and the unpacker produces.
///
/// `Map` is an insertion-ordered list of pairs rather than a hash map so
/// that encoding is always faithful to construction order (see the
/// byte-for-byte determinism and map-ordering scenarios in the testable
/// properties).
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    UInt(u64),
    F32(f32),
    F64(f64),
    /// A byte-string interpreted as text.
    Str(String),
    /// An interned-name leaf, encoded identically to `Str` of the same
    /// name but distinguishable on the Rust side (e.g. for
    /// `symbolize_keys`).
    Symbol(String),
    Bin(Vec<u8>),
    Array(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Ext(ExtValue),
    /// An opaque host value that is neither a primitive nor an explicit
    /// extension literal; resolved through the packer's registry by its
    /// `TypeId`.
    Other(OtherValue),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::UInt(a), Value::UInt(b)) => a == b,
            (Value::F32(a), Value::F32(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Bin(a), Value::Bin(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Ext(a), Value::Ext(b)) => a == b,
            _ => false,
        }
    }
}

/// A MessagePack extension value: a signed 8-bit typecode (the format
/// reserves `0..=127` for application use) paired with an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtValue {
    pub typecode: i8,
    pub payload: Vec<u8>,
}

impl ExtValue {
    pub fn new(typecode: i8, payload: Vec<u8>) -> Self {
        Self { typecode, payload }
    }
}

/// Compatibility aliases for prior naming schemes, kept as thin `pub type`
/// aliases of the canonical [`ExtValue`] rather than separate types.
pub type Extended = ExtValue;
pub type ExtendedValue = ExtValue;
pub type ExtensionValue = ExtValue;

/// What an extension-type handler produced.
#[derive(Debug)]
pub enum HandlerOutcome {
    /// The high-level form: the packer frames these bytes with an
    /// extension header itself.
    Payload(Vec<u8>),
    /// The low-level form: the handler already wrote the complete
    /// representation (header and body) into the packer.
    WroteDirectly,
}

type ToMsgpack = Arc<dyn Fn(&(dyn Any + Send + Sync), &mut Packer) -> Result<()> + Send + Sync>;

/// An opaque host value carried through the value graph for types that have
/// no dedicated `Value` variant. Every instance carries its own fallback
/// serializer (its `to_msgpack` equivalent), consulted only when the
/// packer's registry has no entry at all for this value's `TypeId`.
#[derive(Clone)]
pub struct OtherValue {
    value: Arc<dyn Any + Send + Sync>,
    to_msgpack: ToMsgpack,
}

impl std::fmt::Debug for OtherValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtherValue")
            .field("type_id", &self.type_id())
            .finish_non_exhaustive()
    }
}

impl OtherValue {
    pub fn new<T: Any + Send + Sync + 'static>(
        value: T,
        to_msgpack: impl Fn(&T, &mut Packer) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            value: Arc::new(value),
            to_msgpack: Arc::new(move |any, packer| {
                let concrete = any
                    .downcast_ref::<T>()
                    .expect("OtherValue always stores the type it was constructed with");
                to_msgpack(concrete, packer)
            }),
        }
    }

    pub fn type_id(&self) -> TypeId {
        (*self.value).type_id()
    }

    pub fn as_any(&self) -> &(dyn Any + Send + Sync) {
        &*self.value
    }

    pub fn write_fallback(&self, packer: &mut Packer) -> Result<()> {
        (self.to_msgpack)(&*self.value, packer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_and_str_compare_distinct() {
        assert_ne!(Value::Str("a".into()), Value::Symbol("a".into()));
    }

    #[test]
    fn ext_value_round_trips_fields() {
        let e = ExtValue::new(7, vec![1, 2, 3]);
        assert_eq!(e.typecode, 7);
        assert_eq!(e.payload, vec![1, 2, 3]);
    }
}
