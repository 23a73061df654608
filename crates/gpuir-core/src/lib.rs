//! Core intermediate representation of the gpuir kernel compiler.
//!
//! A typed, block-structured SSA IR: methods composed of basic blocks,
//! which hold ordered values and terminate in control-flow values; a
//! hash-consed type universe with address spaces; builders for constructing
//! and mutating the IR under explicit single-writer discipline; and
//! generation-based compaction.

pub mod block;
pub mod builder;
pub mod context;
pub mod dump;
pub mod error;
pub mod id;
pub mod location;
pub mod method;
pub mod ops;
pub mod rewriter;
pub mod types;
pub mod universe;
pub mod value;
pub mod verify;

// Re-export commonly used types
pub use block::BasicBlock;
pub use builder::{BlockBuilder, MethodBuilder};
pub use context::{ContextFlags, IrContext};
pub use dump::{format_type, MethodDump};
pub use error::{IrError, VerificationFailure};
pub use id::{BlockId, MethodId, NodeId, NodeMarker, ValueId};
pub use location::{FileLocation, Location};
pub use method::{Method, MethodDeclaration, MethodFlags, TransformationFlags};
pub use ops::{
    ArithFlags, AtomicKind, BinaryArithKind, BranchFlags, BroadcastKind, CompareFlags,
    CompareKind, ConvertFlags, DeviceConstantKind, Dimension, PredicateBarrierKind,
    PrimitiveConstant, ShuffleKind, TernaryArithKind, UnaryArithKind,
};
pub use rewriter::{Rewrite, Rewriter};
pub use types::{AddressSpace, BasicValueType, TypeNode};
pub use universe::{StructureBuilder, StructureLayout, TypeId, TypeUniverse};
pub use value::{Value, ValueKind};
pub use verify::verify_method;
