//! Operation kind enums and flag words for IR values.
//!
//! Value kinds that come in families (arithmetic, compare, atomic, shuffle,
//! device constants) carry a kind sub-enum here plus a flags word. Flag
//! words use `bitflags` so they pack into the low 32 bits of the exporter's
//! `data` field.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::types::BasicValueType;

/// Unary arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum UnaryArithKind {
    /// Arithmetic negation.
    Neg,
    /// Bitwise complement (logical not on `Int1`).
    Not,
    Abs,
    /// Square root; floats only.
    Sqrt,
}

/// Binary arithmetic operators.
///
/// Signedness of `Div`, `Rem`, `Shr`, `Min`, and `Max` is determined by
/// [`ArithFlags::UNSIGNED`], not by the operand type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum BinaryArithKind {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Min,
    Max,
}

/// Ternary arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum TernaryArithKind {
    /// `a * b + c`.
    MultiplyAdd,
}

/// Comparison operators. The result type is always `Int1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum CompareKind {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

bitflags! {
    /// Modifier flags on arithmetic values.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ArithFlags: u32 {
        /// Treat integer operands as unsigned.
        const UNSIGNED = 1 << 0;
    }
}

bitflags! {
    /// Modifier flags on compare values.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct CompareFlags: u32 {
        /// Treat integer operands as unsigned.
        const UNSIGNED = 1 << 0;
        /// Float comparison also succeeds on unordered operands.
        const UNORDERED = 1 << 1;
    }
}

bitflags! {
    /// Modifier flags on convert values.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ConvertFlags: u32 {
        /// The source integer is reinterpreted as unsigned.
        const SOURCE_UNSIGNED = 1 << 0;
        /// The target integer is produced as unsigned.
        const TARGET_UNSIGNED = 1 << 1;
    }
}

/// Atomic read-modify-write operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum AtomicKind {
    Exchange,
    Add,
    And,
    Or,
    Xor,
    Min,
    Max,
}

/// Predicate barrier reductions across a thread group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum PredicateBarrierKind {
    /// True iff the predicate holds on all lanes; result `Int1`.
    And,
    /// True iff the predicate holds on any lane; result `Int1`.
    Or,
    /// Number of lanes on which the predicate holds; result `Int32`.
    PopCount,
}

/// Scope of a broadcast value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum BroadcastKind {
    Group,
    Warp,
}

/// Warp shuffle addressing modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ShuffleKind {
    /// Read from the absolute lane given by the origin operand.
    Generic,
    /// Read from the lane `origin` below the current one.
    Up,
    /// Read from the lane `origin` above the current one.
    Down,
    /// Read from the lane `current xor origin`.
    Xor,
}

/// Device (grid/group) constant selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum DeviceConstantKind {
    GridIndex,
    GroupIndex,
    GridDimension,
    GroupDimension,
    WarpSize,
    LaneIndex,
}

/// Dimension selector for indexed device constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum Dimension {
    X,
    Y,
    Z,
}

/// Hint flags on conditional branches. Never change execution semantics;
/// consumed by downstream passes only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u32)]
pub enum BranchFlags {
    #[default]
    None,
    /// The branch closes a loop.
    BackwardEdge,
    /// The branch leaves a loop body early.
    LoopBreakEdge,
}

/// A typed primitive constant, stored as its raw bit pattern.
///
/// Integers are sign-extended to 64 bits; floats store their IEEE bits
/// widened to `u64`. Storing bits rather than native floats keeps the type
/// `Eq + Hash` (usable as a folding cache key) and makes the exporter's
/// `data` packing trivial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrimitiveConstant {
    pub basic: BasicValueType,
    pub raw: u64,
}

impl PrimitiveConstant {
    pub fn bool(value: bool) -> Self {
        PrimitiveConstant {
            basic: BasicValueType::Int1,
            raw: u64::from(value),
        }
    }

    pub fn i8(value: i8) -> Self {
        PrimitiveConstant {
            basic: BasicValueType::Int8,
            raw: value as i64 as u64,
        }
    }

    pub fn i16(value: i16) -> Self {
        PrimitiveConstant {
            basic: BasicValueType::Int16,
            raw: value as i64 as u64,
        }
    }

    pub fn i32(value: i32) -> Self {
        PrimitiveConstant {
            basic: BasicValueType::Int32,
            raw: value as i64 as u64,
        }
    }

    pub fn i64(value: i64) -> Self {
        PrimitiveConstant {
            basic: BasicValueType::Int64,
            raw: value as u64,
        }
    }

    pub fn f32(value: f32) -> Self {
        PrimitiveConstant {
            basic: BasicValueType::Float32,
            raw: u64::from(value.to_bits()),
        }
    }

    pub fn f64(value: f64) -> Self {
        PrimitiveConstant {
            basic: BasicValueType::Float64,
            raw: value.to_bits(),
        }
    }

    /// Reconstructs a constant from a basic type and raw bits, normalizing
    /// integer bit patterns to the sign-extended form.
    pub fn from_raw(basic: BasicValueType, raw: u64) -> Self {
        let raw = match basic {
            BasicValueType::Int1 => u64::from(raw & 1 != 0),
            BasicValueType::Int8 => raw as u8 as i8 as i64 as u64,
            BasicValueType::Int16 => raw as u16 as i16 as i64 as u64,
            BasicValueType::Int32 => raw as u32 as i32 as i64 as u64,
            _ => raw,
        };
        PrimitiveConstant { basic, raw }
    }

    /// The signed integer value, for integer constants.
    pub fn as_i64(&self) -> Option<i64> {
        self.basic.is_int().then_some(self.raw as i64)
    }

    /// The unsigned integer value (raw bits masked to the type width).
    pub fn as_u64(&self) -> Option<u64> {
        if !self.basic.is_int() {
            return None;
        }
        let width = self.basic.bit_width();
        Some(if width >= 64 {
            self.raw
        } else {
            self.raw & ((1u64 << width) - 1)
        })
    }

    pub fn is_zero(&self) -> bool {
        self.raw == 0
    }
}

impl fmt::Display for PrimitiveConstant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.basic {
            BasicValueType::Int1 => write!(f, "{}", self.raw != 0),
            b if b.is_int() => write!(f, "{}", self.raw as i64),
            BasicValueType::Float32 => write!(f, "{}", f32::from_bits(self.raw as u32)),
            BasicValueType::Float64 => write!(f, "{}", f64::from_bits(self.raw)),
            _ => write!(f, "0x{:x}", self.raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_constants_sign_extend() {
        let c = PrimitiveConstant::i8(-1);
        assert_eq!(c.raw, u64::MAX);
        assert_eq!(c.as_i64(), Some(-1));
        assert_eq!(c.as_u64(), Some(0xFF));

        let c = PrimitiveConstant::i32(-2);
        assert_eq!(c.as_i64(), Some(-2));
        assert_eq!(c.as_u64(), Some(0xFFFF_FFFE));
    }

    #[test]
    fn from_raw_normalizes() {
        // A zero-extended negative i16 pattern normalizes to sign-extended.
        let c = PrimitiveConstant::from_raw(BasicValueType::Int16, 0xFFFF);
        assert_eq!(c, PrimitiveConstant::i16(-1));

        let c = PrimitiveConstant::from_raw(BasicValueType::Int1, 3);
        assert_eq!(c, PrimitiveConstant::bool(true));
    }

    #[test]
    fn float_constants_store_bits() {
        let c = PrimitiveConstant::f32(1.5);
        assert_eq!(c.raw, u64::from(1.5f32.to_bits()));
        assert_eq!(c.as_i64(), None);

        let c = PrimitiveConstant::f64(-0.25);
        assert_eq!(f64::from_bits(c.raw), -0.25);
    }

    #[test]
    fn display_forms() {
        assert_eq!(PrimitiveConstant::bool(true).to_string(), "true");
        assert_eq!(PrimitiveConstant::i32(-7).to_string(), "-7");
        assert_eq!(PrimitiveConstant::f64(0.5).to_string(), "0.5");
    }

    #[test]
    fn flag_words_pack_into_u32() {
        let flags = ArithFlags::UNSIGNED;
        assert_eq!(flags.bits(), 1);
        let flags = CompareFlags::UNSIGNED | CompareFlags::UNORDERED;
        assert_eq!(flags.bits(), 3);
        assert_eq!(ConvertFlags::empty().bits(), 0);
    }

    #[test]
    fn serde_roundtrip() {
        let c = PrimitiveConstant::i64(i64::MIN);
        let json = serde_json::to_string(&c).unwrap();
        let back: PrimitiveConstant = serde_json::from_str(&json).unwrap();
        assert_eq!(c, back);

        let kind = BinaryArithKind::Shr;
        let json = serde_json::to_string(&kind).unwrap();
        let back: BinaryArithKind = serde_json::from_str(&json).unwrap();
        assert_eq!(kind, back);
    }
}
