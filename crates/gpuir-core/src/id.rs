//! Stable ID newtypes for IR entities.
//!
//! All IDs are distinct newtype wrappers, providing type safety so that a
//! `ValueId` cannot be accidentally used where a `BlockId` is expected.
//! [`NodeId`] is the global node identity: a monotonically increasing 64-bit
//! integer allocated by the context and never reused within a context's
//! lifetime. [`ValueId`] and [`BlockId`] are arena slot handles local to one
//! method; [`MethodId`] is the method handle within one context.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Global node identity, allocated by a single atomic counter in the context.
///
/// Two nodes are identical iff their `NodeId`s are equal. Ordering by
/// identity is stable within a context and is used to derive deterministic
/// comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

/// Method handle within one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodId(pub u32);

/// Arena slot handle for a basic block, local to one method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId(pub u32);

/// Arena slot handle for a value, local to one method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueId(pub u32);

/// Token for single-pass visitation, allocated by the context.
///
/// Markers are monotonic and never recycled, so marking a node with a fresh
/// marker never requires clearing per-node marker fields from earlier passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeMarker(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "^{}", self.0)
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}
