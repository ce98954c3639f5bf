//! Value cells and the type tags that classify them (DATA MODEL).
//!
//! NWScript has no heap-allocated compound types that need reference
//! counting — an array/map on the teacher's Neo VM corresponds to nothing
//! here, so unlike `stack_item::StackItem` this enum is `Copy`-free but
//! self-contained: no `ReferenceCounter`, no interior mutability.

use nwscript_io::TypeTag;
use std::fmt;

/// A 3-component float vector, used by the movement/geometry action group.
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vector {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector {
    pub const ZERO: Vector = Vector {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };
}

/// An opaque game-object reference. `OBJECT_INVALID` is the sentinel the
/// engine uses throughout the original action-service surface.
pub const OBJECT_INVALID: i32 = 0x7F00_0000;

/// One value on the operand stack or in a local/global slot.
///
/// Strings are `Vec<u8>`, not `String` — NWScript string operations work on
/// bytes, not Unicode scalar values (GLOSSARY "Strings are bytes").
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Float(f32),
    String(Vec<u8>),
    Object(i32),
    Vector(Vector),
    /// `slot` selects which of the ten engine-structure registries (C8)
    /// `handle` is looked up in; `None` is the engine structure's "invalid"
    /// value (distinct from a handle of zero, which is a real registration).
    EngineStruct { slot: u8, handle: Option<u32> },
}

impl Value {
    pub fn type_tag(&self) -> Type {
        match self {
            Value::Int(_) => Type::Int,
            Value::Float(_) => Type::Float,
            Value::String(_) => Type::String,
            Value::Object(_) => Type::Object,
            Value::Vector(_) => Type::Vector,
            Value::EngineStruct { slot, .. } => Type::EngineStruct(*slot),
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&[u8]> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<i32> {
        match self {
            Value::Object(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<Vector> {
        match self {
            Value::Vector(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{}", String::from_utf8_lossy(v)),
            Value::Object(v) => write!(f, "object#{v}"),
            Value::Vector(v) => write!(f, "[{}, {}, {}]", v.x, v.y, v.z),
            Value::EngineStruct { slot, handle } => match handle {
                Some(h) => write!(f, "engine_struct[{slot}]#{h}"),
                None => write!(f, "engine_struct[{slot}]#invalid"),
            },
        }
    }
}

/// The static type of a value, as carried by declared parameters, return
/// types and IR variables (C3). A superset of `nwscript_io::TypeTag` — the
/// reader's tag has no knowledge of the VM's own slot semantics, so this
/// type simply re-exposes it one-to-one today and is the seam where any
/// future VM-only type would be added.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Int,
    Float,
    String,
    Object,
    Vector,
    Void,
    Action,
    EngineStruct(u8),
}

impl From<TypeTag> for Type {
    fn from(tag: TypeTag) -> Self {
        match tag {
            TypeTag::Int => Type::Int,
            TypeTag::Float => Type::Float,
            TypeTag::String => Type::String,
            TypeTag::Object => Type::Object,
            TypeTag::Vector => Type::Vector,
            TypeTag::EngineStruct(slot) => Type::EngineStruct(slot),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Float => write!(f, "float"),
            Type::String => write!(f, "string"),
            Type::Object => write!(f, "object"),
            Type::Vector => write!(f, "vector"),
            Type::Void => write!(f, "void"),
            Type::Action => write!(f, "action"),
            Type::EngineStruct(slot) => write!(f, "engine_struct[{slot}]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_tag_round_trips_through_io_tag() {
        assert_eq!(Value::Int(1).type_tag(), Type::Int);
        assert_eq!(
            Value::EngineStruct {
                slot: 3,
                handle: Some(7)
            }
            .type_tag(),
            Type::EngineStruct(3)
        );
    }

    #[test]
    fn display_renders_strings_as_lossy_utf8() {
        let v = Value::String(b"hello".to_vec());
        assert_eq!(v.to_string(), "hello");
    }
}
