//! Methods: declarations, value/block arenas, and control-flow structure.
//!
//! A [`Method`] owns its parameters, entry block, and the full set of blocks
//! and values, stored as two arenas with typed index handles. All
//! cross-references between values and blocks go through those handles; a
//! replaced value slot carries a forwarding pointer that operand reads
//! resolve transparently (with path compression during mutation).
//!
//! Block order is recomputed by [`Method::control_flow_update`]: it resets
//! predecessor/successor links, re-derives them from the terminators
//! reachable from the entry, and assigns each reachable block its position
//! in forward reverse-post-order as the dense block index.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::block::{BasicBlock, INVALID_BLOCK_INDEX};
use crate::id::{BlockId, MethodId, NodeId, NodeMarker, ValueId};
use crate::location::Location;
use crate::universe::TypeId;
use crate::value::{Value, ValueKind};

bitflags! {
    /// Declaration-level method properties.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct MethodFlags: u32 {
        const INLINE = 1 << 0;
        const EXTERNAL = 1 << 1;
        const INTRINSIC = 1 << 2;
        const ENTRY_POINT = 1 << 3;
    }
}

bitflags! {
    /// Transformation state, monotone within a generation and cleared by GC.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct TransformationFlags: u32 {
        /// The body has been mutated since the last compaction.
        const DIRTY = 1 << 0;
        /// A transformation pass has rewritten the body.
        const TRANSFORMED = 1 << 1;
    }
}

/// A method declaration: the handle-visible part of a method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDeclaration {
    /// Unique method name, used for idempotent re-declaration.
    pub name: String,
    pub return_type: TypeId,
    pub flags: MethodFlags,
    /// Optional reference back to the frontend source entity.
    pub source: Option<String>,
}

impl MethodDeclaration {
    pub fn new(name: impl Into<String>, return_type: TypeId) -> Self {
        MethodDeclaration {
            name: name.into(),
            return_type,
            flags: MethodFlags::empty(),
            source: None,
        }
    }

    pub fn with_flags(mut self, flags: MethodFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// One value arena slot: the node plus its replacement state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ValueSlot {
    pub(crate) value: Value,
    /// Forwarding pointer set by replacement; reads resolve through it.
    pub(crate) forwarded: Option<ValueId>,
    /// Logical removal; physical removal happens at compaction.
    pub(crate) removed: bool,
    /// Last visitation marker applied to this slot.
    pub(crate) marker: u64,
}

/// A method: declaration, parameters, and the block/value arenas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Method {
    pub(crate) id: NodeId,
    pub(crate) handle: MethodId,
    pub(crate) declaration: MethodDeclaration,
    pub(crate) location: Location,
    /// Parameter values in declaration order; owned by the method itself.
    pub(crate) parameters: Vec<ValueId>,
    pub(crate) entry: Option<BlockId>,
    pub(crate) blocks: Vec<BasicBlock>,
    pub(crate) values: Vec<ValueSlot>,
    /// Forward reverse-post-order, valid after the latest control-flow
    /// update.
    pub(crate) rpo: Vec<BlockId>,
    pub(crate) transformation_flags: TransformationFlags,
    /// Generation this method belongs to; bumped by GC.
    pub(crate) generation: u64,
}

impl Method {
    pub(crate) fn new(
        id: NodeId,
        handle: MethodId,
        declaration: MethodDeclaration,
        location: Location,
        generation: u64,
    ) -> Self {
        Method {
            id,
            handle,
            declaration,
            location,
            parameters: Vec::new(),
            entry: None,
            blocks: Vec::new(),
            values: Vec::new(),
            rpo: Vec::new(),
            transformation_flags: TransformationFlags::empty(),
            generation,
        }
    }

    // -----------------------------------------------------------------------
    // Read-only accessors
    // -----------------------------------------------------------------------

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn handle(&self) -> MethodId {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.declaration.name
    }

    pub fn declaration(&self) -> &MethodDeclaration {
        &self.declaration
    }

    pub fn return_type(&self) -> TypeId {
        self.declaration.return_type
    }

    pub fn flags(&self) -> MethodFlags {
        self.declaration.flags
    }

    pub fn transformation_flags(&self) -> TransformationFlags {
        self.transformation_flags
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Parameter values in declaration order.
    pub fn parameters(&self) -> &[ValueId] {
        &self.parameters
    }

    pub fn num_parameters(&self) -> usize {
        self.parameters.len()
    }

    /// The entry block; `None` until the body is seeded by a builder.
    pub fn entry_block(&self) -> Option<BlockId> {
        self.entry
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn block(&self, block: BlockId) -> &BasicBlock {
        &self.blocks[block.index()]
    }

    pub(crate) fn block_mut(&mut self, block: BlockId) -> &mut BasicBlock {
        &mut self.blocks[block.index()]
    }

    /// All block handles in arena order.
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        (0..self.blocks.len() as u32).map(BlockId)
    }

    /// Reachable blocks in forward reverse-post-order, as assigned by the
    /// latest control-flow update.
    pub fn rpo(&self) -> &[BlockId] {
        &self.rpo
    }

    /// The raw node stored in a slot, without following forwarding.
    pub fn value(&self, value: ValueId) -> &Value {
        &self.values[value.index()].value
    }

    pub(crate) fn value_mut(&mut self, value: ValueId) -> &mut Value {
        &mut self.values[value.index()].value
    }

    pub fn num_value_slots(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the slot was logically removed.
    pub fn is_removed(&self, value: ValueId) -> bool {
        self.values[value.index()].removed
    }

    /// Returns `true` if the slot was replaced by another value.
    pub fn is_replaced(&self, value: ValueId) -> bool {
        self.values[value.index()].forwarded.is_some()
    }

    /// Follows the replacement chain to the direct target.
    ///
    /// Chains are bounded because replacement is monotone within a
    /// generation.
    pub fn resolve(&self, value: ValueId) -> ValueId {
        let mut current = value;
        while let Some(next) = self.values[current.index()].forwarded {
            current = next;
        }
        current
    }

    /// Resolved operand list of a value.
    pub fn operands(&self, value: ValueId) -> SmallVec<[ValueId; 2]> {
        self.value(value)
            .operands
            .iter()
            .map(|&op| self.resolve(op))
            .collect()
    }

    /// Resolved `(source block, incoming value)` pairs of a phi.
    pub fn phi_incoming(&self, phi: ValueId) -> SmallVec<[(BlockId, ValueId); 2]> {
        let value = self.value(phi);
        debug_assert!(matches!(value.kind, ValueKind::Phi));
        value
            .block_operands
            .iter()
            .zip(value.operands.iter())
            .map(|(&block, &op)| (block, self.resolve(op)))
            .collect()
    }

    /// Live values of a block in order, terminator last.
    pub fn block_values(&self, block: BlockId) -> impl Iterator<Item = ValueId> + '_ {
        let data = self.block(block);
        data.values
            .iter()
            .copied()
            .chain(data.terminator)
            .filter(move |&v| !self.is_removed(v) && !self.is_replaced(v))
    }

    /// The unique reachable block with zero successors.
    ///
    /// Returns `None` when the body diverges (no exit). Multiple exits
    /// violate the single-exit invariant and fail a debug assertion.
    pub fn exit_block(&self) -> Option<BlockId> {
        let mut exit = None;
        for &block in &self.rpo {
            if self.block(block).successors().is_empty() {
                debug_assert!(
                    exit.is_none(),
                    "method {} has multiple exit blocks",
                    self.declaration.name
                );
                if exit.is_none() {
                    exit = Some(block);
                }
            }
        }
        exit
    }

    // -----------------------------------------------------------------------
    // Mutation (crate-internal; reached through builders)
    // -----------------------------------------------------------------------

    pub(crate) fn mark_dirty(&mut self) {
        self.transformation_flags |= TransformationFlags::DIRTY;
    }

    pub(crate) fn alloc_value(&mut self, value: Value) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueSlot {
            value,
            forwarded: None,
            removed: false,
            marker: 0,
        });
        id
    }

    pub(crate) fn alloc_block(&mut self, id: NodeId, location: Location) -> BlockId {
        let block = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock::new(id, location));
        if self.entry.is_none() {
            self.entry = Some(block);
        }
        block
    }

    /// Directs `old`'s forwarding pointer at `new`. Any chain hanging off
    /// `old` is compressed onto the resolved target.
    pub(crate) fn forward(&mut self, old: ValueId, new: ValueId) {
        let target = self.resolve(new);
        debug_assert_ne!(target, old, "replacement would form a cycle");
        let mut current = old;
        while let Some(next) = self.values[current.index()].forwarded.replace(target) {
            if next == target {
                break;
            }
            current = next;
        }
        self.mark_dirty();
    }

    /// Logical removal; the slot stays in its block sequence until the next
    /// compaction.
    pub(crate) fn remove_value(&mut self, value: ValueId) {
        self.values[value.index()].removed = true;
        self.mark_dirty();
    }

    /// Marks a slot with `marker`; returns `false` if it was already marked
    /// by the same token.
    pub fn try_mark(&mut self, value: ValueId, marker: NodeMarker) -> bool {
        let slot = &mut self.values[value.index()];
        if slot.marker == marker.0 {
            return false;
        }
        slot.marker = marker.0;
        true
    }

    // -----------------------------------------------------------------------
    // Control-flow update
    // -----------------------------------------------------------------------

    /// Rebuilds predecessor/successor links and dense block indices.
    ///
    /// Successors are re-derived from the terminators; predecessor edges are
    /// propagated only from blocks reachable from the entry; reachable
    /// blocks receive their forward reverse-post-order position as the
    /// block index, unreachable blocks keep [`INVALID_BLOCK_INDEX`].
    pub(crate) fn control_flow_update(&mut self) {
        for block in &mut self.blocks {
            block.predecessors.clear();
            block.successors.clear();
            block.index = INVALID_BLOCK_INDEX;
        }
        self.rpo.clear();

        let Some(entry) = self.entry else {
            return;
        };

        // Successor lists from the terminators.
        for b in 0..self.blocks.len() {
            let Some(terminator) = self.blocks[b].terminator else {
                continue;
            };
            let targets: SmallVec<[BlockId; 2]> =
                SmallVec::from_slice(&self.value(self.resolve(terminator)).block_operands);
            self.blocks[b].successors = targets;
        }

        // Iterative postorder walk from the entry.
        let mut postorder = Vec::with_capacity(self.blocks.len());
        let mut visited = vec![false; self.blocks.len()];
        let mut stack: Vec<(BlockId, usize)> = vec![(entry, 0)];
        visited[entry.index()] = true;
        while let Some(&(block, next)) = stack.last() {
            let successors = &self.blocks[block.index()].successors;
            if next < successors.len() {
                let succ = successors[next];
                stack.last_mut().unwrap().1 = next + 1;
                if !visited[succ.index()] {
                    visited[succ.index()] = true;
                    stack.push((succ, 0));
                }
            } else {
                stack.pop();
                postorder.push(block);
            }
        }

        self.rpo = postorder;
        self.rpo.reverse();
        for (position, &block) in self.rpo.iter().enumerate() {
            self.blocks[block.index()].index = position as i32;
        }

        // Predecessor edges, from reachable blocks only.
        for i in 0..self.rpo.len() {
            let block = self.rpo[i];
            let successors: SmallVec<[BlockId; 2]> =
                SmallVec::from_slice(&self.blocks[block.index()].successors);
            for succ in successors {
                self.blocks[succ.index()].predecessors.push(block);
            }
        }

        tracing::trace!(
            method = %self.declaration.name,
            reachable = self.rpo.len(),
            total = self.blocks.len(),
            "control-flow update"
        );
    }

    // -----------------------------------------------------------------------
    // Compaction
    // -----------------------------------------------------------------------

    /// Rebuilds the arenas, dropping removed and replaced slots and
    /// unreachable blocks. Surviving values keep their [`NodeId`]s; operand
    /// references are resolved through forwarding before remapping. Blocks
    /// are emitted in reverse-post-order, so afterwards arena order, RPO,
    /// and block indices coincide.
    pub(crate) fn compact(&mut self) {
        self.control_flow_update();

        let mut value_map: Vec<Option<ValueId>> = vec![None; self.values.len()];
        let mut block_map: Vec<Option<BlockId>> = vec![None; self.blocks.len()];
        let mut next_value = 0u32;

        let mut claim = |slot: ValueId, map: &mut Vec<Option<ValueId>>, next: &mut u32| {
            let id = ValueId(*next);
            *next += 1;
            map[slot.index()] = Some(id);
            id
        };

        // Pass 1: assign new handles. Parameters first, then block bodies in
        // RPO. Phi operands may point forward, so operand rewriting waits
        // for pass 2.
        for &param in &self.parameters {
            claim(param, &mut value_map, &mut next_value);
        }
        for (position, &block) in self.rpo.iter().enumerate() {
            block_map[block.index()] = Some(BlockId(position as u32));
            let data = &self.blocks[block.index()];
            for candidate in data.values.iter().copied().chain(data.terminator) {
                let slot = &self.values[candidate.index()];
                if slot.removed || slot.forwarded.is_some() {
                    continue;
                }
                claim(candidate, &mut value_map, &mut next_value);
            }
        }

        // Pass 2: emit the new arenas with remapped references.
        let remap_value = |this: &Method, old: ValueId| -> ValueId {
            let resolved = this.resolve(old);
            value_map[resolved.index()].expect("compaction dropped a referenced value")
        };

        let mut new_values: Vec<ValueSlot> = Vec::with_capacity(next_value as usize);
        let mut emit = |this: &Method, old: ValueId| {
            let mut value = this.value(old).clone();
            let operands: SmallVec<[ValueId; 2]> = value
                .operands
                .iter()
                .map(|&op| remap_value(this, op))
                .collect();
            let block_operands: SmallVec<[BlockId; 2]> = value
                .block_operands
                .iter()
                .map(|&b| block_map[b.index()].expect("compaction dropped a referenced block"))
                .collect();
            value.operands = operands;
            value.block_operands = block_operands;
            value.block = value.block.map(|b| block_map[b.index()].expect("owned block dropped"));
            new_values.push(ValueSlot {
                value,
                forwarded: None,
                removed: false,
                marker: 0,
            });
        };

        for &param in &self.parameters.clone() {
            emit(self, param);
        }
        let mut new_blocks: Vec<BasicBlock> = Vec::with_capacity(self.rpo.len());
        for &block in &self.rpo.clone() {
            let data = &self.blocks[block.index()];
            let mut rebuilt = BasicBlock::new(data.id, data.location.clone());
            for &candidate in &data.values {
                let slot = &self.values[candidate.index()];
                if slot.removed || slot.forwarded.is_some() {
                    continue;
                }
                rebuilt.values.push(value_map[candidate.index()].unwrap());
                emit(self, candidate);
            }
            if let Some(terminator) = data.terminator {
                let slot = &self.values[terminator.index()];
                if !slot.removed && slot.forwarded.is_none() {
                    rebuilt.terminator = Some(value_map[terminator.index()].unwrap());
                    emit(self, terminator);
                }
            }
            new_blocks.push(rebuilt);
        }

        self.parameters = self
            .parameters
            .iter()
            .map(|&p| value_map[p.index()].unwrap())
            .collect();
        self.entry = self.entry.and_then(|e| block_map[e.index()]);
        self.values = new_values;
        self.blocks = new_blocks;
        self.control_flow_update();
    }

    /// Applies a type remapping to the signature and every value.
    pub(crate) fn remap_types(&mut self, mut remap: impl FnMut(TypeId) -> TypeId) {
        self.declaration.return_type = remap(self.declaration.return_type);
        for slot in &mut self.values {
            slot.value.ty = remap(slot.value.ty);
        }
    }

    /// Method handles of all direct callees, in body order.
    pub fn callees(&self) -> Vec<MethodId> {
        let mut out = Vec::new();
        for slot in &self.values {
            if slot.removed || slot.forwarded.is_some() {
                continue;
            }
            if let ValueKind::MethodCall { target } = slot.value.kind {
                if !out.contains(&target) {
                    out.push(target);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_method() -> Method {
        Method::new(
            NodeId(0),
            MethodId(0),
            MethodDeclaration::new("m", TypeId::VOID),
            Location::Unknown,
            0,
        )
    }

    #[test]
    fn declaration_defaults() {
        let decl = MethodDeclaration::new("kernel", TypeId::INT32);
        assert_eq!(decl.name, "kernel");
        assert_eq!(decl.return_type, TypeId::INT32);
        assert_eq!(decl.flags, MethodFlags::empty());
        assert!(decl.source.is_none());

        let decl = decl.with_flags(MethodFlags::ENTRY_POINT | MethodFlags::INLINE);
        assert!(decl.flags.contains(MethodFlags::ENTRY_POINT));
    }

    #[test]
    fn first_block_becomes_entry() {
        let mut method = test_method();
        let b0 = method.alloc_block(NodeId(1), Location::Unknown);
        let b1 = method.alloc_block(NodeId(2), Location::Unknown);
        assert_eq!(method.entry_block(), Some(b0));
        assert_ne!(b0, b1);
        assert_eq!(method.num_blocks(), 2);
    }

    #[test]
    fn forwarding_resolves_through_chains() {
        let mut method = test_method();
        let mk = |id: u64| Value {
            id: NodeId(id),
            kind: ValueKind::UndefinedValue,
            ty: TypeId::INT32,
            operands: SmallVec::new(),
            block_operands: SmallVec::new(),
            block: None,
            location: Location::Unknown,
        };
        let a = method.alloc_value(mk(1));
        let b = method.alloc_value(mk(2));
        let c = method.alloc_value(mk(3));

        method.forward(a, b);
        method.forward(b, c);
        assert_eq!(method.resolve(a), c);
        assert_eq!(method.resolve(b), c);
        assert_eq!(method.resolve(c), c);
        assert!(method.is_replaced(a));
        assert!(!method.is_replaced(c));
    }

    #[test]
    fn forwarding_a_forwarded_slot_compresses_its_chain() {
        let mut method = test_method();
        let mk = |id: u64| Value {
            id: NodeId(id),
            kind: ValueKind::UndefinedValue,
            ty: TypeId::INT32,
            operands: SmallVec::new(),
            block_operands: SmallVec::new(),
            block: None,
            location: Location::Unknown,
        };
        let a = method.alloc_value(mk(1));
        let b = method.alloc_value(mk(2));
        let c = method.alloc_value(mk(3));

        method.forward(a, b);
        // Re-pointing the head of the chain lands both slots on the target.
        method.forward(a, c);
        assert_eq!(method.values[a.index()].forwarded, Some(c));
        assert_eq!(method.values[b.index()].forwarded, Some(c));
        assert_eq!(method.resolve(a), c);
    }

    #[test]
    fn markers_fire_once_per_token() {
        let mut method = test_method();
        let v = method.alloc_value(Value {
            id: NodeId(1),
            kind: ValueKind::UndefinedValue,
            ty: TypeId::VOID,
            operands: SmallVec::new(),
            block_operands: SmallVec::new(),
            block: None,
            location: Location::Unknown,
        });
        let marker = NodeMarker(1);
        assert!(method.try_mark(v, marker));
        assert!(!method.try_mark(v, marker));
        assert!(method.try_mark(v, NodeMarker(2)));
    }

    #[test]
    fn dirty_flag_is_monotone_until_cleared() {
        let mut method = test_method();
        assert!(method.transformation_flags().is_empty());
        method.mark_dirty();
        assert!(method
            .transformation_flags()
            .contains(TransformationFlags::DIRTY));
        method.mark_dirty();
        assert!(method
            .transformation_flags()
            .contains(TransformationFlags::DIRTY));
    }
}
