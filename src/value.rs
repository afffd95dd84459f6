//! The tagged runtime value type that the codec marshals and unmarshals.

use std::collections::BTreeMap;

use crate::error::{Error, ErrorKind};
use crate::object_path::ObjectPathBuf;
use crate::signature::{self, Basic, Type};

/// A single D-Bus value, tagged by its runtime type.
///
/// Containers recurse into further [`Value`]s; a [`Value::Variant`] carries
/// its own signature alongside the inner value so it remains self
/// describing once detached from its container.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Byte(u8),
    Boolean(bool),
    Int16(i16),
    Uint16(u16),
    Int32(i32),
    Uint32(u32),
    Int64(i64),
    Uint64(u64),
    Double(f64),
    String(String),
    ObjectPath(ObjectPathBuf),
    Signature(String),
    UnixFd(u32),
    Array(Vec<Value>, Type),
    Struct(Vec<Value>),
    DictEntry(Box<Value>, Box<Value>),
    Variant(Box<Value>),
}

impl Value {
    /// Construct a validated [`Value::String`], rejecting embedded NUL
    /// bytes (D-Bus strings are NUL-terminated on the wire and may not
    /// contain one in their body).
    pub fn string(value: impl Into<String>) -> Result<Value, Error> {
        let value = value.into();
        if value.as_bytes().contains(&0) {
            return Err(ErrorKind::InvalidData("string contains NUL byte".into()).into());
        }
        Ok(Value::String(value))
    }

    /// Construct a validated [`Value::ObjectPath`].
    pub fn object_path(value: impl Into<String>) -> Result<Value, Error> {
        Ok(Value::ObjectPath(ObjectPathBuf::new(value.into())?))
    }

    /// Construct a validated [`Value::Signature`].
    pub fn signature(value: impl Into<String>) -> Result<Value, Error> {
        let value = value.into();
        signature::parse_signature(&value)?;
        Ok(Value::Signature(value))
    }

    /// Construct a [`Value::Variant`] wrapping `inner`.
    pub fn variant(inner: Value) -> Value {
        Value::Variant(Box::new(inner))
    }

    /// Construct a `a{sv}` style dictionary value from an ordered map of
    /// string keys to already-boxed variant values.
    pub fn dict_sv(entries: BTreeMap<String, Value>) -> Value {
        let elements = entries
            .into_iter()
            .map(|(key, value)| {
                Value::DictEntry(
                    Box::new(Value::String(key)),
                    Box::new(Value::Variant(Box::new(value))),
                )
            })
            .collect();

        Value::Array(
            elements,
            Type::DictEntry(
                Box::new(Type::Basic(Basic::String)),
                Box::new(Type::Variant),
            ),
        )
    }

    /// Compute the [`Type`] that describes this value's shape.
    pub fn value_type(&self) -> Type {
        match self {
            Value::Byte(_) => Type::Basic(Basic::Byte),
            Value::Boolean(_) => Type::Basic(Basic::Boolean),
            Value::Int16(_) => Type::Basic(Basic::Int16),
            Value::Uint16(_) => Type::Basic(Basic::Uint16),
            Value::Int32(_) => Type::Basic(Basic::Int32),
            Value::Uint32(_) => Type::Basic(Basic::Uint32),
            Value::Int64(_) => Type::Basic(Basic::Int64),
            Value::Uint64(_) => Type::Basic(Basic::Uint64),
            Value::Double(_) => Type::Basic(Basic::Double),
            Value::String(_) => Type::Basic(Basic::String),
            Value::ObjectPath(_) => Type::Basic(Basic::ObjectPath),
            Value::Signature(_) => Type::Basic(Basic::Signature),
            Value::UnixFd(_) => Type::Basic(Basic::UnixFd),
            Value::Array(_, element) => Type::Array(Box::new(element.clone())),
            Value::Struct(fields) => {
                Type::Struct(fields.iter().map(Value::value_type).collect())
            }
            Value::DictEntry(key, value) => {
                Type::DictEntry(Box::new(key.value_type()), Box::new(value.value_type()))
            }
            Value::Variant(_) => Type::Variant,
        }
    }

    /// Access this value as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value) => Some(value),
            Value::ObjectPath(value) => Some(value.as_str()),
            Value::Signature(value) => Some(value),
            _ => None,
        }
    }

    /// Access this value as a `u32`, if it is one.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::Uint32(value) => Some(*value),
            _ => None,
        }
    }

    /// Unwrap a single layer of [`Value::Variant`], if present.
    pub fn into_inner(self) -> Value {
        match self {
            Value::Variant(inner) => *inner,
            other => other,
        }
    }
}

/// Compute the types of a slice of top-level body values, for use as a
/// message's `SIGNATURE` header field.
pub fn body_types(values: &[Value]) -> Vec<Type> {
    values.iter().map(Value::value_type).collect()
}
