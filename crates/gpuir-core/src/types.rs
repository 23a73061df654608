//! The IR type system.
//!
//! Provides the complete set of type nodes used in kernel programs: void,
//! string, primitives ([`BasicValueType`]), padding, pointers and views in an
//! [`AddressSpace`], multi-dimensional arrays, and structures.
//!
//! Type nodes reference other types by [`TypeId`](crate::universe::TypeId)
//! and are interned by the [`TypeUniverse`](crate::universe::TypeUniverse),
//! so structural equality coincides with identity.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::universe::TypeId;

/// Primitive value types with a fixed bit width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BasicValueType {
    /// 1-bit predicate.
    Int1,
    Int8,
    Int16,
    Int32,
    Int64,
    /// 8-bit float, 4 exponent / 3 mantissa bits.
    Float8E4M3,
    /// 8-bit float, 5 exponent / 2 mantissa bits.
    Float8E5M2,
    BFloat16,
    Float16,
    Float32,
    Float64,
}

impl BasicValueType {
    /// All primitive types in canonical registration order.
    pub const ALL: [BasicValueType; 11] = [
        BasicValueType::Int1,
        BasicValueType::Int8,
        BasicValueType::Int16,
        BasicValueType::Int32,
        BasicValueType::Int64,
        BasicValueType::Float8E4M3,
        BasicValueType::Float8E5M2,
        BasicValueType::BFloat16,
        BasicValueType::Float16,
        BasicValueType::Float32,
        BasicValueType::Float64,
    ];

    /// Storage size in bytes. `Int1` occupies one byte.
    pub fn size_in_bytes(self) -> u64 {
        match self {
            BasicValueType::Int1
            | BasicValueType::Int8
            | BasicValueType::Float8E4M3
            | BasicValueType::Float8E5M2 => 1,
            BasicValueType::Int16 | BasicValueType::BFloat16 | BasicValueType::Float16 => 2,
            BasicValueType::Int32 | BasicValueType::Float32 => 4,
            BasicValueType::Int64 | BasicValueType::Float64 => 8,
        }
    }

    /// Natural alignment, derived from the size.
    pub fn alignment(self) -> u64 {
        self.size_in_bytes()
    }

    /// Bit width of the value representation.
    pub fn bit_width(self) -> u32 {
        match self {
            BasicValueType::Int1 => 1,
            _ => self.size_in_bytes() as u32 * 8,
        }
    }

    pub fn is_int(self) -> bool {
        matches!(
            self,
            BasicValueType::Int1
                | BasicValueType::Int8
                | BasicValueType::Int16
                | BasicValueType::Int32
                | BasicValueType::Int64
        )
    }

    pub fn is_float(self) -> bool {
        !self.is_int()
    }
}

impl fmt::Display for BasicValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BasicValueType::Int1 => "Int1",
            BasicValueType::Int8 => "Int8",
            BasicValueType::Int16 => "Int16",
            BasicValueType::Int32 => "Int32",
            BasicValueType::Int64 => "Int64",
            BasicValueType::Float8E4M3 => "Float8E4M3",
            BasicValueType::Float8E5M2 => "Float8E5M2",
            BasicValueType::BFloat16 => "BFloat16",
            BasicValueType::Float16 => "Float16",
            BasicValueType::Float32 => "Float32",
            BasicValueType::Float64 => "Float64",
        };
        f.write_str(name)
    }
}

/// Static memory-region tag on pointer and view types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AddressSpace {
    Generic = 0,
    Global = 1,
    Shared = 2,
    Local = 3,
}

impl AddressSpace {
    pub fn from_raw(raw: u8) -> Option<AddressSpace> {
        match raw {
            0 => Some(AddressSpace::Generic),
            1 => Some(AddressSpace::Global),
            2 => Some(AddressSpace::Shared),
            3 => Some(AddressSpace::Local),
            _ => None,
        }
    }
}

impl fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AddressSpace::Generic => "generic",
            AddressSpace::Global => "global",
            AddressSpace::Shared => "shared",
            AddressSpace::Local => "local",
        };
        f.write_str(name)
    }
}

/// A single node in the type universe. Each variant represents a distinct
/// class of type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeNode {
    /// The empty type of value-less operations.
    Void,
    /// An opaque string handle.
    String,
    /// A primitive value type.
    Primitive(BasicValueType),
    /// Padding bytes with the storage footprint of a primitive.
    Padding(BasicValueType),
    /// A raw pointer to `element` in `space`.
    Pointer {
        element: TypeId,
        space: AddressSpace,
    },
    /// A (base pointer, length) pair over `element` in `space`.
    View {
        element: TypeId,
        space: AddressSpace,
    },
    /// A multi-dimensional array over `element`.
    Array {
        element: TypeId,
        dimensions: u32,
    },
    /// A structure with ordered fields.
    Structure {
        fields: Vec<TypeId>,
    },
}

impl TypeNode {
    pub fn is_primitive(&self) -> bool {
        matches!(self, TypeNode::Primitive(_))
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, TypeNode::Pointer { .. })
    }

    pub fn is_view(&self) -> bool {
        matches!(self, TypeNode::View { .. })
    }

    pub fn is_structure(&self) -> bool {
        matches!(self, TypeNode::Structure { .. })
    }

    /// For pointers and views, the element type and address space.
    pub fn address_payload(&self) -> Option<(TypeId, AddressSpace)> {
        match *self {
            TypeNode::Pointer { element, space } | TypeNode::View { element, space } => {
                Some((element, space))
            }
            _ => None,
        }
    }

    /// The type ids this node directly references.
    pub fn children(&self) -> &[TypeId] {
        match self {
            TypeNode::Pointer { element, .. }
            | TypeNode::View { element, .. }
            | TypeNode::Array { element, .. } => std::slice::from_ref(element),
            TypeNode::Structure { fields } => fields,
            _ => &[],
        }
    }
}
