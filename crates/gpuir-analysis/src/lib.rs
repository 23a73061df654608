//! Control-flow and dataflow analyses over the gpuir core IR.
//!
//! Everything here is a pure read over a method whose latest control-flow
//! update has run: traversal orders, dominator trees, dense block
//! collections, the monotone fix-point framework, the pointer-alignment
//! analysis, and the dominance-aware verifier.

pub mod alignment;
pub mod collections;
pub mod dataflow;
pub mod dominators;
pub mod traversal;
pub mod verifier;

// Re-export commonly used types
pub use alignment::{AlignmentLattice, PointerAlignments, DEFAULT_GLOBAL_ALIGNMENT};
pub use collections::{BlockMap, BlockSet, BlockSetList};
pub use dataflow::{AnalysisLattice, GlobalAnalysis, ValueTable};
pub use dominators::Dominators;
pub use traversal::{post_order, reverse_post_order, traverse, Direction, TraversalOrder};
pub use verifier::verify_with_dominance;
