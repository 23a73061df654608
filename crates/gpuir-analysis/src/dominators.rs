//! Dominator trees via the Cooper–Harvey–Kennedy iterative algorithm.
//!
//! Blocks are numbered by reverse-post-order position; the `idom` array is
//! iterated to a fixpoint with the two-finger intersection walking toward
//! lower RPO numbers. Computing with [`Direction::Backward`] yields the
//! post-dominator tree.

use std::collections::HashMap;

use gpuir_core::{BlockId, Method};

use crate::traversal::{reverse_post_order, Direction};

const UNDEFINED: u32 = u32::MAX;

/// The dominator tree of one method.
#[derive(Debug, Clone)]
pub struct Dominators {
    /// Blocks in RPO of the chosen direction.
    order: Vec<BlockId>,
    /// RPO position per block.
    position: HashMap<BlockId, u32>,
    /// Immediate dominator per RPO position; the root points at itself.
    idom: Vec<u32>,
}

impl Dominators {
    /// Forward dominators from the entry block.
    pub fn compute(method: &Method) -> Dominators {
        Self::compute_with_direction(method, Direction::Forward)
    }

    /// Dominators over the chosen direction; backward yields
    /// post-dominators from the exit block.
    pub fn compute_with_direction(method: &Method, direction: Direction) -> Dominators {
        let order = reverse_post_order(method, direction);
        let position: HashMap<BlockId, u32> = order
            .iter()
            .enumerate()
            .map(|(i, &b)| (b, i as u32))
            .collect();
        let mut idom = vec![UNDEFINED; order.len()];
        if order.is_empty() {
            return Dominators {
                order,
                position,
                idom,
            };
        }
        idom[0] = 0;

        let mut changed = true;
        while changed {
            changed = false;
            for index in 1..order.len() {
                let block = order[index];
                let mut new_idom = UNDEFINED;
                for &pred in incoming(method, direction, block) {
                    let Some(&p) = position.get(&pred) else {
                        continue;
                    };
                    if idom[p as usize] == UNDEFINED {
                        continue;
                    }
                    new_idom = if new_idom == UNDEFINED {
                        p
                    } else {
                        intersect(&idom, p, new_idom)
                    };
                }
                if new_idom != UNDEFINED && idom[index] != new_idom {
                    idom[index] = new_idom;
                    changed = true;
                }
            }
        }

        Dominators {
            order,
            position,
            idom,
        }
    }

    /// The immediate dominator of `block`; the root dominates itself.
    /// `None` for blocks outside the traversal.
    pub fn immediate_dominator(&self, block: BlockId) -> Option<BlockId> {
        let position = *self.position.get(&block)?;
        let idom = self.idom[position as usize];
        (idom != UNDEFINED).then(|| self.order[idom as usize])
    }

    /// Returns `true` iff `a` dominates `b` (reflexively).
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let (Some(&pa), Some(&pb)) = (self.position.get(&a), self.position.get(&b)) else {
            return false;
        };
        let mut current = pb;
        while current > pa {
            let next = self.idom[current as usize];
            if next == UNDEFINED || next == current {
                return false;
            }
            current = next;
        }
        current == pa
    }

    /// Returns `true` iff `a` strictly dominates `b`.
    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// The closest block dominating both `a` and `b`.
    pub fn immediate_common_dominator(&self, a: BlockId, b: BlockId) -> Option<BlockId> {
        let (&pa, &pb) = (self.position.get(&a)?, self.position.get(&b)?);
        if self.idom[pa as usize] == UNDEFINED || self.idom[pb as usize] == UNDEFINED {
            return None;
        }
        Some(self.order[intersect(&self.idom, pa, pb) as usize])
    }

    /// Blocks in the RPO used for numbering.
    pub fn order(&self) -> &[BlockId] {
        &self.order
    }
}

/// The edges entering `block` under the chosen direction.
fn incoming<'m>(method: &'m Method, direction: Direction, block: BlockId) -> &'m [BlockId] {
    match direction {
        Direction::Forward => method.block(block).predecessors(),
        Direction::Backward => method.block(block).successors(),
    }
}

/// Two-finger intersection: walk both positions toward lower RPO numbers
/// until they meet.
fn intersect(idom: &[u32], mut x: u32, mut y: u32) -> u32 {
    while x != y {
        while x > y {
            x = idom[x as usize];
        }
        while y > x {
            y = idom[y as usize];
        }
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpuir_core::{
        BranchFlags, ContextFlags, IrContext, Location, MethodDeclaration, MethodId,
        PrimitiveConstant, TypeId,
    };
    use proptest::prelude::*;

    fn diamond(ctx: &mut IrContext) -> (MethodId, [BlockId; 4]) {
        let m = ctx
            .declare(MethodDeclaration::new("diamond", TypeId::INT32))
            .unwrap();
        let mut mb = ctx.create_builder(m).unwrap();
        let entry = mb.create_basic_block(Location::Unknown);
        let a = mb.create_basic_block(Location::Unknown);
        let b = mb.create_basic_block(Location::Unknown);
        let join = mb.create_basic_block(Location::Unknown);
        let p = mb.add_parameter(TypeId::INT1, None).unwrap();
        mb.block(entry)
            .create_if_branch(Location::Unknown, p, a, b, BranchFlags::None)
            .unwrap();
        let va = mb
            .block(a)
            .create_primitive(Location::Unknown, PrimitiveConstant::i32(1));
        mb.block(a).create_branch(Location::Unknown, join).unwrap();
        let vb = mb
            .block(b)
            .create_primitive(Location::Unknown, PrimitiveConstant::i32(2));
        mb.block(b).create_branch(Location::Unknown, join).unwrap();
        let phi = mb
            .block(join)
            .create_phi(Location::Unknown, TypeId::INT32)
            .unwrap();
        mb.add_phi_incoming(phi, a, va).unwrap();
        mb.add_phi_incoming(phi, b, vb).unwrap();
        mb.block(join)
            .create_return(Location::Unknown, Some(phi))
            .unwrap();
        mb.complete().unwrap();
        (m, [entry, a, b, join])
    }

    // S2 dominator facts on the diamond.
    #[test]
    fn diamond_dominators() {
        let mut ctx = IrContext::new(ContextFlags::empty());
        let (m, [entry, a, b, join]) = diamond(&mut ctx);
        let dom = Dominators::compute(ctx.method(m));

        assert_eq!(dom.immediate_dominator(entry), Some(entry));
        assert_eq!(dom.immediate_dominator(a), Some(entry));
        assert_eq!(dom.immediate_dominator(b), Some(entry));
        assert_eq!(dom.immediate_dominator(join), Some(entry));

        assert!(dom.dominates(entry, join));
        assert!(dom.dominates(entry, a));
        assert!(dom.dominates(a, a));
        assert!(!dom.dominates(a, join));
        assert!(!dom.dominates(b, join));
        assert!(dom.strictly_dominates(entry, join));
        assert!(!dom.strictly_dominates(join, join));

        assert_eq!(dom.immediate_common_dominator(a, b), Some(entry));
        assert_eq!(dom.immediate_common_dominator(a, join), Some(entry));
        assert_eq!(dom.immediate_common_dominator(join, join), Some(join));
    }

    #[test]
    fn loop_header_dominates_body() {
        let mut ctx = IrContext::new(ContextFlags::empty());
        let m = ctx
            .declare(MethodDeclaration::new("looped", TypeId::VOID))
            .unwrap();
        let mut mb = ctx.create_builder(m).unwrap();
        let entry = mb.create_basic_block(Location::Unknown);
        let header = mb.create_basic_block(Location::Unknown);
        let body = mb.create_basic_block(Location::Unknown);
        let exit = mb.create_basic_block(Location::Unknown);
        let p = mb.add_parameter(TypeId::INT1, None).unwrap();

        mb.block(entry)
            .create_branch(Location::Unknown, header)
            .unwrap();
        mb.block(header)
            .create_if_branch(Location::Unknown, p, body, exit, BranchFlags::None)
            .unwrap();
        mb.block(body)
            .create_branch(Location::Unknown, header)
            .unwrap();
        mb.block(exit)
            .create_return(Location::Unknown, None)
            .unwrap();
        mb.complete().unwrap();

        let dom = Dominators::compute(ctx.method(m));
        assert_eq!(dom.immediate_dominator(header), Some(entry));
        assert_eq!(dom.immediate_dominator(body), Some(header));
        assert_eq!(dom.immediate_dominator(exit), Some(header));
        assert!(dom.dominates(header, body));
        assert!(!dom.dominates(body, exit));
        assert_eq!(dom.immediate_common_dominator(body, exit), Some(header));
    }

    #[test]
    fn post_dominators_on_the_diamond() {
        let mut ctx = IrContext::new(ContextFlags::empty());
        let (m, [entry, a, b, join]) = diamond(&mut ctx);
        let post = Dominators::compute_with_direction(ctx.method(m), Direction::Backward);

        assert_eq!(post.immediate_dominator(a), Some(join));
        assert_eq!(post.immediate_dominator(b), Some(join));
        assert_eq!(post.immediate_dominator(entry), Some(join));
        assert!(post.dominates(join, entry));
    }

    fn build_random_cfg(edges: &[(u32, u32)], blocks: u32) -> (IrContext, MethodId) {
        let mut ctx = IrContext::new(ContextFlags::empty());
        let m = ctx
            .declare(MethodDeclaration::new("random", TypeId::VOID))
            .unwrap();
        let mut mb = ctx.create_builder(m).unwrap();
        let ids: Vec<BlockId> = (0..blocks)
            .map(|_| mb.create_basic_block(Location::Unknown))
            .collect();
        for (i, &block) in ids.iter().enumerate() {
            let targets: Vec<BlockId> = edges
                .iter()
                .filter(|&&(from, _)| from as usize == i)
                .map(|&(_, to)| ids[to as usize % ids.len()])
                .collect();
            let mut bb = mb.block(block);
            match targets.as_slice() {
                [] => {
                    bb.create_return(Location::Unknown, None).unwrap();
                }
                [one] => {
                    bb.create_branch(Location::Unknown, *one).unwrap();
                }
                [first, rest @ ..] => {
                    let selector =
                        bb.create_primitive(Location::Unknown, PrimitiveConstant::i32(0));
                    bb.create_switch_branch(Location::Unknown, selector, *first, rest)
                        .unwrap();
                }
            }
        }
        mb.complete().unwrap();
        (ctx, m)
    }

    proptest! {
        // Invariant 7: RPO is deterministic, and every block's immediate
        // dominator appears no later than the block itself.
        #[test]
        fn idom_precedes_block_in_rpo(
            blocks in 2u32..10,
            edges in proptest::collection::vec((0u32..10, 0u32..10), 1..25),
        ) {
            let edges: Vec<(u32, u32)> = edges
                .into_iter()
                .map(|(a, b)| (a % blocks, b % blocks))
                .collect();
            let (ctx, m) = build_random_cfg(&edges, blocks);
            let method = ctx.method(m);

            let first = reverse_post_order(method, Direction::Forward);
            let second = reverse_post_order(method, Direction::Forward);
            prop_assert_eq!(&first, &second);

            let dom = Dominators::compute(method);
            for (index, &block) in dom.order().iter().enumerate() {
                let idom = dom.immediate_dominator(block).unwrap();
                let idom_position = dom
                    .order()
                    .iter()
                    .position(|&b| b == idom)
                    .unwrap();
                prop_assert!(idom_position <= index);
                prop_assert!(dom.dominates(idom, block));
            }
        }
    }
}
