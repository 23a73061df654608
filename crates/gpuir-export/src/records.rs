//! The flat, id-keyed export object model.
//!
//! A [`Container`] is the triple `(methods, values, types)` of flat
//! records. All cross-references are by id: node ids for methods, blocks,
//! and values; type ids for types. The void type is implicit: values of
//! void type carry `type_id = -1` and no `Void` record is emitted, so a
//! container holds exactly the types a consumer must materialize.
//!
//! `data` packs kind-specific payloads: where a record carries both an
//! operation kind and a flags word, the kind sits in the high 32 bits and
//! the flags in the low 32.

use serde::{Deserialize, Serialize};

use gpuir_core::BasicValueType;

/// `type_id` of values with void type; no type record backs it.
pub const VOID_TYPE_ID: i64 = -1;

/// `block_id` of method parameters, which no block owns.
pub const NO_BLOCK_ID: i64 = -1;

/// Type record classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeClass {
    Void,
    String,
    Primitive,
    Padding,
    Pointer,
    View,
    Array,
    Structure,
}

/// One flattened type.
///
/// `nodes` holds the element or field type ids; `data` carries the address
/// space (pointer, view) or dimension count (array).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrTypeRecord {
    pub id: i64,
    pub class: TypeClass,
    pub nodes: Vec<i64>,
    pub basic_value_type: Option<BasicValueType>,
    pub data: i64,
}

/// Value record kinds, mirroring the core value kinds one-to-one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordValueKind {
    Parameter,
    Phi,
    UnaryArithmetic,
    BinaryArithmetic,
    TernaryArithmetic,
    Compare,
    Convert,
    PointerCast,
    AddressSpaceCast,
    Alloca,
    Load,
    Store,
    LoadElementAddress,
    LoadFieldAddress,
    NewView,
    SubView,
    GetViewLength,
    NewArray,
    GetArrayLength,
    GetField,
    SetField,
    StructureValue,
    PrimitiveValue,
    StringValue,
    NullValue,
    UndefinedValue,
    DeviceConstant,
    Barrier,
    PredicateBarrier,
    Broadcast,
    WarpShuffle,
    SubWarpShuffle,
    Atomic,
    AtomicCas,
    MethodCall,
    DebugAssert,
    WriteToOutput,
    HandleValue,
    LanguageEmit,
    Return,
    UnconditionalBranch,
    IfBranch,
    SwitchBranch,
}

/// One flattened value.
///
/// `nodes` holds the operand value ids; terminators append their target
/// block ids after the operands, and phis interleave
/// `[source block, incoming value, ...]` pairs. Arity is recovered from
/// `value_kind` on import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrValueRecord {
    pub id: i64,
    pub value_kind: RecordValueKind,
    pub type_id: i64,
    pub method_id: i64,
    pub block_id: i64,
    pub nodes: Vec<i64>,
    pub data: i64,
    pub tag: Option<String>,
}

/// One flattened method: identity, name, signature, and block ids in body
/// order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrMethodRecord {
    pub id: i64,
    pub name: String,
    pub return_type_id: i64,
    pub blocks: Vec<i64>,
}

/// The full export triple.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub methods: Vec<IrMethodRecord>,
    pub values: Vec<IrValueRecord>,
    pub types: Vec<IrTypeRecord>,
}

/// Packs an operation kind and a flags word into one `data` field.
pub fn pack_kind_and_flags(kind: u32, flags: u32) -> i64 {
    ((i64::from(kind)) << 32) | i64::from(flags)
}

/// The inverse of [`pack_kind_and_flags`].
pub fn unpack_kind_and_flags(data: i64) -> (u32, u32) {
    ((data >> 32) as u32, data as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_roundtrip() {
        for (kind, flags) in [(0u32, 0u32), (3, 1), (11, u32::MAX), (u32::MAX, 7)] {
            let data = pack_kind_and_flags(kind, flags);
            assert_eq!(unpack_kind_and_flags(data), (kind, flags));
        }
    }

    #[test]
    fn serde_roundtrip_container() {
        let container = Container {
            methods: vec![IrMethodRecord {
                id: 10,
                name: "kernel".into(),
                return_type_id: 5,
                blocks: vec![11],
            }],
            values: vec![IrValueRecord {
                id: 12,
                value_kind: RecordValueKind::Parameter,
                type_id: 5,
                method_id: 10,
                block_id: NO_BLOCK_ID,
                nodes: vec![],
                data: 0,
                tag: Some("x".into()),
            }],
            types: vec![IrTypeRecord {
                id: 5,
                class: TypeClass::Primitive,
                nodes: vec![],
                basic_value_type: Some(BasicValueType::Int32),
                data: 0,
            }],
        };
        let json = serde_json::to_string(&container).unwrap();
        let back: Container = serde_json::from_str(&json).unwrap();
        assert_eq!(container, back);
    }
}
