//! SSA value nodes.
//!
//! A [`Value`] is one node of a method body: a [`ValueKind`] tag with
//! kind-specific payload, a resolved type, an ordered operand list, an
//! optional owning block (method parameters have none), and a source
//! location. Cross-references use arena handles ([`ValueId`], [`BlockId`]);
//! operand reads go through the owning method so that replacement forwarding
//! stays transparent.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::id::{BlockId, MethodId, NodeId, ValueId};
use crate::location::Location;
use crate::ops::{
    ArithFlags, AtomicKind, BinaryArithKind, BranchFlags, BroadcastKind, CompareFlags,
    CompareKind, ConvertFlags, DeviceConstantKind, Dimension, PredicateBarrierKind,
    PrimitiveConstant, ShuffleKind, TernaryArithKind, UnaryArithKind,
};
use crate::types::AddressSpace;
use crate::universe::TypeId;

/// The tag-plus-payload union over all value kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValueKind {
    /// A method parameter. Owned by the method, not by a block.
    Parameter { index: u32, name: Option<String> },
    /// Merge of incoming values at a control-flow join. Incoming values live
    /// in the operand list; their source blocks in the block-operand list.
    Phi,

    UnaryArithmetic {
        kind: UnaryArithKind,
        flags: ArithFlags,
    },
    BinaryArithmetic {
        kind: BinaryArithKind,
        flags: ArithFlags,
    },
    TernaryArithmetic {
        kind: TernaryArithKind,
        flags: ArithFlags,
    },
    Compare {
        kind: CompareKind,
        flags: CompareFlags,
    },
    /// Primitive-to-primitive conversion; the target type is the value type.
    Convert { flags: ConvertFlags },
    /// Reinterprets a pointer as a pointer to a different element type.
    PointerCast,
    /// Moves a pointer or view into another address space.
    AddressSpaceCast { space: AddressSpace },

    /// Stack or shared-memory allocation; yields a pointer to the element.
    Alloca { space: AddressSpace },
    Load,
    Store,
    /// Address of element `index` of a pointer or view base.
    LoadElementAddress,
    /// Address of structure field `field` of a pointer base.
    LoadFieldAddress { field: u32 },

    /// Builds a view from a base pointer and a length.
    NewView,
    /// A sub-range of a view: (view, offset, length).
    SubView,
    GetViewLength,
    /// Allocates a multi-dimensional array from per-dimension extents.
    NewArray { dimensions: u32 },
    GetArrayLength,

    /// Reads field `field` from a structure value.
    GetField { field: u32 },
    /// Functional update of field `field` of a structure value.
    SetField { field: u32 },
    /// Assembles a structure value from per-field operands.
    StructureValue,

    PrimitiveValue { value: PrimitiveConstant },
    StringValue { value: String },
    NullValue,
    UndefinedValue,
    DeviceConstant {
        kind: DeviceConstantKind,
        dimension: Dimension,
    },

    Barrier,
    PredicateBarrier { kind: PredicateBarrierKind },
    Broadcast { kind: BroadcastKind },
    WarpShuffle { kind: ShuffleKind },
    /// Shuffle within a sub-warp of the width given by the third operand.
    SubWarpShuffle { kind: ShuffleKind },

    /// Atomic read-modify-write on the pointer operand.
    Atomic {
        kind: AtomicKind,
        flags: ArithFlags,
    },
    /// Atomic compare-and-exchange: (pointer, compare, value).
    AtomicCas,

    MethodCall { target: MethodId },
    /// Runtime assertion: condition operand, message in the tag.
    DebugAssert { message: String },
    /// Formatted device-side output: format string tag plus arguments.
    WriteToOutput { format: String },
    /// An opaque runtime handle identified by its tag.
    HandleValue { tag: String },
    /// Verbatim target-language expression with value arguments.
    LanguageEmit { expression: String },

    Return,
    UnconditionalBranch,
    IfBranch { flags: BranchFlags },
    /// Selector operand; the default target is block-operand 0.
    SwitchBranch,
}

impl ValueKind {
    /// Returns `true` for kinds that terminate a basic block.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            ValueKind::Return
                | ValueKind::UnconditionalBranch
                | ValueKind::IfBranch { .. }
                | ValueKind::SwitchBranch
        )
    }

    /// Returns `true` for kinds whose result is a compile-time constant.
    pub fn is_constant(&self) -> bool {
        matches!(
            self,
            ValueKind::PrimitiveValue { .. }
                | ValueKind::StringValue { .. }
                | ValueKind::NullValue
        )
    }

    /// Returns `true` for kinds with memory or cross-lane side effects,
    /// which removal and code motion must preserve.
    pub fn has_side_effects(&self) -> bool {
        matches!(
            self,
            ValueKind::Store
                | ValueKind::Barrier
                | ValueKind::PredicateBarrier { .. }
                | ValueKind::Atomic { .. }
                | ValueKind::AtomicCas
                | ValueKind::MethodCall { .. }
                | ValueKind::DebugAssert { .. }
                | ValueKind::WriteToOutput { .. }
                | ValueKind::LanguageEmit { .. }
        )
    }

    /// A stable name for dumps and export records.
    pub fn name(&self) -> &'static str {
        match self {
            ValueKind::Parameter { .. } => "parameter",
            ValueKind::Phi => "phi",
            ValueKind::UnaryArithmetic { .. } => "unary",
            ValueKind::BinaryArithmetic { .. } => "binary",
            ValueKind::TernaryArithmetic { .. } => "ternary",
            ValueKind::Compare { .. } => "compare",
            ValueKind::Convert { .. } => "convert",
            ValueKind::PointerCast => "ptrcast",
            ValueKind::AddressSpaceCast { .. } => "addrspacecast",
            ValueKind::Alloca { .. } => "alloca",
            ValueKind::Load => "load",
            ValueKind::Store => "store",
            ValueKind::LoadElementAddress => "lea",
            ValueKind::LoadFieldAddress { .. } => "lfa",
            ValueKind::NewView => "newview",
            ValueKind::SubView => "subview",
            ValueKind::GetViewLength => "viewlen",
            ValueKind::NewArray { .. } => "newarray",
            ValueKind::GetArrayLength => "arraylen",
            ValueKind::GetField { .. } => "getfield",
            ValueKind::SetField { .. } => "setfield",
            ValueKind::StructureValue => "structure",
            ValueKind::PrimitiveValue { .. } => "const",
            ValueKind::StringValue { .. } => "string",
            ValueKind::NullValue => "null",
            ValueKind::UndefinedValue => "undef",
            ValueKind::DeviceConstant { .. } => "devconst",
            ValueKind::Barrier => "barrier",
            ValueKind::PredicateBarrier { .. } => "predbarrier",
            ValueKind::Broadcast { .. } => "broadcast",
            ValueKind::WarpShuffle { .. } => "shuffle",
            ValueKind::SubWarpShuffle { .. } => "subshuffle",
            ValueKind::Atomic { .. } => "atomic",
            ValueKind::AtomicCas => "atomiccas",
            ValueKind::MethodCall { .. } => "call",
            ValueKind::DebugAssert { .. } => "assert",
            ValueKind::WriteToOutput { .. } => "output",
            ValueKind::HandleValue { .. } => "handle",
            ValueKind::LanguageEmit { .. } => "emit",
            ValueKind::Return => "return",
            ValueKind::UnconditionalBranch => "branch",
            ValueKind::IfBranch { .. } => "ifbranch",
            ValueKind::SwitchBranch => "switch",
        }
    }
}

/// One SSA node of a method body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Value {
    /// Global node identity.
    pub id: NodeId,
    pub kind: ValueKind,
    /// Resolved type; an element of the owning context's type universe.
    pub ty: TypeId,
    /// Ordered value operands. Read through
    /// [`Method::operands`](crate::method::Method::operands) to follow
    /// replacement forwarding.
    pub operands: SmallVec<[ValueId; 2]>,
    /// Ordered block references: branch targets for terminators, incoming
    /// source blocks for phis. Empty otherwise.
    pub block_operands: SmallVec<[BlockId; 2]>,
    /// Owning block; `None` for method parameters.
    pub block: Option<BlockId>,
    pub location: Location,
}

impl Value {
    pub fn is_terminator(&self) -> bool {
        self.kind.is_terminator()
    }

    /// Branch targets of a terminator, in operand order.
    pub fn targets(&self) -> &[BlockId] {
        debug_assert!(self.is_terminator() || matches!(self.kind, ValueKind::Phi));
        &self.block_operands
    }

    /// Incoming `(source block, value)` pairs of a phi.
    pub fn phi_incoming(&self) -> impl Iterator<Item = (BlockId, ValueId)> + '_ {
        debug_assert!(matches!(self.kind, ValueKind::Phi));
        self.block_operands
            .iter()
            .copied()
            .zip(self.operands.iter().copied())
    }
}
