//! Basic blocks.
//!
//! A [`BasicBlock`] is a container owned by a method: an ordered sequence of
//! non-terminator values, exactly one terminator once sealed, bidirectional
//! predecessor/successor links, and a dense [`BasicBlock::index`] assigned
//! during each control-flow update.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::id::{BlockId, NodeId, ValueId};
use crate::location::Location;

/// Sentinel index of a block that has not been reached by the latest
/// control-flow update.
pub const INVALID_BLOCK_INDEX: i32 = -1;

/// One basic block of a method body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicBlock {
    /// Global node identity.
    pub(crate) id: NodeId,
    /// Position in forward reverse-post-order, dense in `[0, |blocks|)`.
    /// [`INVALID_BLOCK_INDEX`] between control-flow updates or when the
    /// block is unreachable.
    pub(crate) index: i32,
    pub(crate) location: Location,
    /// Ordered non-terminator values. Logically removed values stay in the
    /// sequence until the next compaction.
    pub(crate) values: Vec<ValueId>,
    /// The terminator, once set.
    pub(crate) terminator: Option<ValueId>,
    /// Rebuilt by each control-flow update.
    pub(crate) predecessors: SmallVec<[BlockId; 2]>,
    /// Rebuilt by each control-flow update; equals the terminator's targets.
    pub(crate) successors: SmallVec<[BlockId; 2]>,
}

impl BasicBlock {
    pub(crate) fn new(id: NodeId, location: Location) -> Self {
        BasicBlock {
            id,
            index: INVALID_BLOCK_INDEX,
            location,
            values: Vec::new(),
            terminator: None,
            predecessors: SmallVec::new(),
            successors: SmallVec::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The dense block index assigned by the latest control-flow update.
    ///
    /// Panics if the block has not been indexed (no update ran, or the block
    /// is unreachable); dense side tables must not be built across stale
    /// indices.
    pub fn index(&self) -> usize {
        assert!(
            self.index != INVALID_BLOCK_INDEX,
            "block index is stale; run a control-flow update first"
        );
        self.index as usize
    }

    pub fn has_valid_index(&self) -> bool {
        self.index != INVALID_BLOCK_INDEX
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// The ordered non-terminator values, removed slots included.
    pub fn values(&self) -> &[ValueId] {
        &self.values
    }

    pub fn terminator(&self) -> Option<ValueId> {
        self.terminator
    }

    pub fn predecessors(&self) -> &[BlockId] {
        &self.predecessors
    }

    pub fn successors(&self) -> &[BlockId] {
        &self.successors
    }

    pub fn num_predecessors(&self) -> usize {
        self.predecessors.len()
    }

    pub fn num_successors(&self) -> usize {
        self.successors.len()
    }

    /// Returns `true` once a terminator has been set.
    pub fn is_sealed(&self) -> bool {
        self.terminator.is_some()
    }
}
