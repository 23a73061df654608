//! TypeId and the hash-consed type universe.
//!
//! Every type has a unique [`TypeId`] providing O(1) identity comparison.
//! The [`TypeUniverse`] interns type nodes so that two structurally equal
//! types share the same id, and pre-registers the intrinsic types (void,
//! string, and the 11 primitives) on construction. Types are immutable once
//! interned.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{AddressSpace, BasicValueType, TypeNode};

/// Unique identifier for a type in the universe.
///
/// The inner value is an index into the universe's type vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeId(pub u32);

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeId({})", self.0)
    }
}

/// Pre-registered ids for the intrinsic types.
impl TypeId {
    pub const VOID: TypeId = TypeId(0);
    pub const STRING: TypeId = TypeId(1);
    pub const INT1: TypeId = TypeId(2);
    pub const INT8: TypeId = TypeId(3);
    pub const INT16: TypeId = TypeId(4);
    pub const INT32: TypeId = TypeId(5);
    pub const INT64: TypeId = TypeId(6);
    pub const FLOAT8_E4M3: TypeId = TypeId(7);
    pub const FLOAT8_E5M2: TypeId = TypeId(8);
    pub const BFLOAT16: TypeId = TypeId(9);
    pub const FLOAT16: TypeId = TypeId(10);
    pub const FLOAT32: TypeId = TypeId(11);
    pub const FLOAT64: TypeId = TypeId(12);
}

/// Byte layout of a structure type: per-field offsets plus total size and
/// alignment. Sequential layout; each field sits at the next offset aligned
/// to its own alignment, and the total size is padded to the structure
/// alignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructureLayout {
    /// Byte offset of each field, in declaration order.
    pub offsets: Vec<u64>,
    /// Total size in bytes, padded to `alignment`.
    pub size: u64,
    /// Max alignment over all fields (1 for empty structures).
    pub alignment: u64,
}

impl StructureLayout {
    /// The largest power of two dividing field `index`'s offset.
    ///
    /// A field at offset 0 contributes the structure's own alignment.
    pub fn field_offset_alignment(&self, index: usize) -> u64 {
        let offset = self.offsets[index];
        if offset == 0 {
            self.alignment
        } else {
            1 << offset.trailing_zeros()
        }
    }
}

/// The hash-consed set of all types in a context.
///
/// On construction, the universe pre-registers the 13 intrinsic types:
/// `TypeId(0)` = Void, `TypeId(1)` = String, then the 11 primitives in
/// [`BasicValueType::ALL`] order. All other types are interned on demand
/// through the `pointer`/`view`/`array`/`structure` constructors, which
/// return the canonical instance for structurally equal requests.
///
/// Only the type vector is serialized; the interning table is rebuilt on
/// deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "TypeUniverseRepr", into = "TypeUniverseRepr")]
pub struct TypeUniverse {
    /// Type nodes indexed by `TypeId.0`.
    types: Vec<TypeNode>,
    /// Structural interning table.
    interned: HashMap<TypeNode, TypeId>,
}

/// Serialized form of [`TypeUniverse`]: the type vector alone.
#[derive(Serialize, Deserialize)]
struct TypeUniverseRepr {
    types: Vec<TypeNode>,
}

impl From<TypeUniverse> for TypeUniverseRepr {
    fn from(universe: TypeUniverse) -> Self {
        TypeUniverseRepr {
            types: universe.types,
        }
    }
}

impl From<TypeUniverseRepr> for TypeUniverse {
    fn from(repr: TypeUniverseRepr) -> Self {
        let interned = repr
            .types
            .iter()
            .enumerate()
            .map(|(i, node)| (node.clone(), TypeId(i as u32)))
            .collect();
        TypeUniverse {
            types: repr.types,
            interned,
        }
    }
}

impl TypeUniverse {
    /// Number of intrinsic types pre-registered on construction.
    pub const INTRINSIC_COUNT: u32 = 13;

    pub fn new() -> Self {
        let mut universe = TypeUniverse {
            types: Vec::with_capacity(Self::INTRINSIC_COUNT as usize),
            interned: HashMap::new(),
        };
        universe.intern(TypeNode::Void);
        universe.intern(TypeNode::String);
        for basic in BasicValueType::ALL {
            universe.intern(TypeNode::Primitive(basic));
        }
        universe
    }

    /// Returns the canonical id for `node`, interning it if new.
    pub(crate) fn intern(&mut self, node: TypeNode) -> TypeId {
        if let Some(&id) = self.interned.get(&node) {
            return id;
        }
        let id = TypeId(self.types.len() as u32);
        self.types.push(node.clone());
        self.interned.insert(node, id);
        id
    }

    /// The canonical void type.
    pub fn void(&self) -> TypeId {
        TypeId::VOID
    }

    /// The canonical string type.
    pub fn string(&self) -> TypeId {
        TypeId::STRING
    }

    /// The canonical type of a primitive.
    pub fn primitive(&self, basic: BasicValueType) -> TypeId {
        match basic {
            BasicValueType::Int1 => TypeId::INT1,
            BasicValueType::Int8 => TypeId::INT8,
            BasicValueType::Int16 => TypeId::INT16,
            BasicValueType::Int32 => TypeId::INT32,
            BasicValueType::Int64 => TypeId::INT64,
            BasicValueType::Float8E4M3 => TypeId::FLOAT8_E4M3,
            BasicValueType::Float8E5M2 => TypeId::FLOAT8_E5M2,
            BasicValueType::BFloat16 => TypeId::BFLOAT16,
            BasicValueType::Float16 => TypeId::FLOAT16,
            BasicValueType::Float32 => TypeId::FLOAT32,
            BasicValueType::Float64 => TypeId::FLOAT64,
        }
    }

    /// A padding type with the footprint of `basic`.
    pub fn padding(&mut self, basic: BasicValueType) -> TypeId {
        self.intern(TypeNode::Padding(basic))
    }

    /// A pointer to `element` in `space`.
    pub fn pointer(&mut self, element: TypeId, space: AddressSpace) -> TypeId {
        debug_assert!(self.get(element).is_some());
        self.intern(TypeNode::Pointer { element, space })
    }

    /// A view (base pointer + length) over `element` in `space`.
    pub fn view(&mut self, element: TypeId, space: AddressSpace) -> TypeId {
        debug_assert!(self.get(element).is_some());
        self.intern(TypeNode::View { element, space })
    }

    /// A `dimensions`-dimensional array over `element`.
    pub fn array(&mut self, element: TypeId, dimensions: u32) -> TypeId {
        debug_assert!(self.get(element).is_some());
        self.intern(TypeNode::Array {
            element,
            dimensions,
        })
    }

    /// Opens a builder for a structure type. Fields are appended in order;
    /// [`StructureBuilder::seal`] canonicalizes by the field-identity tuple.
    pub fn structure(&mut self) -> StructureBuilder<'_> {
        StructureBuilder {
            universe: self,
            fields: Vec::new(),
        }
    }

    /// Looks up a type node by id.
    pub fn get(&self, id: TypeId) -> Option<&TypeNode> {
        self.types.get(id.0 as usize)
    }

    /// Looks up a type node by id, panicking on a stale id.
    pub fn node(&self, id: TypeId) -> &TypeNode {
        &self.types[id.0 as usize]
    }

    /// Number of registered types, intrinsics included.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Iterates all `(id, node)` pairs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (TypeId, &TypeNode)> {
        self.types
            .iter()
            .enumerate()
            .map(|(i, node)| (TypeId(i as u32), node))
    }

    /// Alignment in bytes of a value of type `id`.
    ///
    /// Primitives align to their size; structures to the max alignment over
    /// their fields; pointers, views, and arrays to their element's
    /// alignment; string values to the 8-byte machine word; padding and
    /// void to 1.
    pub fn alignment(&self, id: TypeId) -> u64 {
        match self.node(id) {
            TypeNode::Void | TypeNode::Padding(_) => 1,
            TypeNode::String => 8,
            TypeNode::Primitive(basic) => basic.alignment(),
            TypeNode::Pointer { element, .. }
            | TypeNode::View { element, .. }
            | TypeNode::Array { element, .. } => self.alignment(*element),
            TypeNode::Structure { fields } => fields
                .iter()
                .map(|&f| self.alignment(f))
                .max()
                .unwrap_or(1),
        }
    }

    /// Storage size in bytes of a value of type `id`.
    ///
    /// Pointers are one machine word; views are (pointer, length); arrays
    /// are a descriptor of one pointer plus one extent per dimension.
    pub fn size_in_bytes(&self, id: TypeId) -> u64 {
        match self.node(id) {
            TypeNode::Void => 0,
            TypeNode::String | TypeNode::Pointer { .. } => 8,
            TypeNode::View { .. } => 16,
            TypeNode::Primitive(basic) | TypeNode::Padding(basic) => basic.size_in_bytes(),
            TypeNode::Array { dimensions, .. } => 8 * (1 + u64::from(*dimensions)),
            TypeNode::Structure { .. } => {
                self.structure_layout(id).expect("structure type").size
            }
        }
    }

    /// Computes the byte layout of a structure type. Returns `None` for
    /// non-structure ids.
    pub fn structure_layout(&self, id: TypeId) -> Option<StructureLayout> {
        let TypeNode::Structure { fields } = self.node(id) else {
            return None;
        };
        let mut offsets = Vec::with_capacity(fields.len());
        let mut offset = 0u64;
        let mut alignment = 1u64;
        for &field in fields {
            let field_align = self.alignment(field);
            alignment = alignment.max(field_align);
            offset = offset.next_multiple_of(field_align);
            offsets.push(offset);
            offset += self.size_in_bytes(field);
        }
        Some(StructureLayout {
            offsets,
            size: offset.next_multiple_of(alignment),
            alignment,
        })
    }
}

impl Default for TypeUniverse {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for structure types. Obtained from [`TypeUniverse::structure`].
#[derive(Debug)]
pub struct StructureBuilder<'a> {
    universe: &'a mut TypeUniverse,
    fields: Vec<TypeId>,
}

impl StructureBuilder<'_> {
    /// Appends a field of type `ty`.
    pub fn add_field(&mut self, ty: TypeId) -> &mut Self {
        debug_assert!(self.universe.get(ty).is_some());
        self.fields.push(ty);
        self
    }

    /// Number of fields appended so far.
    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    /// Canonicalizes and returns the structure type id.
    pub fn seal(self) -> TypeId {
        self.universe.intern(TypeNode::Structure {
            fields: self.fields,
        })
    }
}
