//! Block traversal orders.
//!
//! Traversals are parameterized by [`Direction`]: forward walks successor
//! edges from the entry block, backward walks predecessor edges from the
//! exit block. Both require an up-to-date control-flow structure (the
//! method's latest control-flow update).
//!
//! The walk is deterministic: neighbors are visited in their stored edge
//! order, so two runs over the same method produce identical sequences.

use gpuir_core::{BlockId, Method};

/// Edge direction of a traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Successor edges from the entry block.
    Forward,
    /// Predecessor edges from the exit block.
    Backward,
}

/// Order in which a traversal yields blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraversalOrder {
    PostOrder,
    ReversePostOrder,
}

impl Direction {
    /// The traversal root: entry for forward, exit for backward.
    pub fn root(self, method: &Method) -> Option<BlockId> {
        match self {
            Direction::Forward => method.entry_block(),
            Direction::Backward => method.exit_block(),
        }
    }

    /// The outgoing edges of `block` under this direction.
    pub fn links(self, method: &Method, block: BlockId) -> &[BlockId] {
        match self {
            Direction::Forward => method.block(block).successors(),
            Direction::Backward => method.block(block).predecessors(),
        }
    }
}

/// Depth-first postorder over the blocks reachable from the direction's
/// root.
pub fn post_order(method: &Method, direction: Direction) -> Vec<BlockId> {
    let Some(root) = direction.root(method) else {
        return Vec::new();
    };
    let mut order = Vec::with_capacity(method.num_blocks());
    let mut visited = vec![false; method.num_blocks()];
    let mut stack: Vec<(BlockId, usize)> = vec![(root, 0)];
    visited[root.index()] = true;
    while let Some(&(block, next)) = stack.last() {
        let links = direction.links(method, block);
        if next < links.len() {
            let neighbor = links[next];
            stack.last_mut().unwrap().1 = next + 1;
            if !visited[neighbor.index()] {
                visited[neighbor.index()] = true;
                stack.push((neighbor, 0));
            }
        } else {
            stack.pop();
            order.push(block);
        }
    }
    order
}

/// Reverse postorder: each block appears before everything it reaches
/// through non-back edges.
pub fn reverse_post_order(method: &Method, direction: Direction) -> Vec<BlockId> {
    let mut order = post_order(method, direction);
    order.reverse();
    order
}

/// A traversal in the requested `(order, direction)`.
pub fn traverse(method: &Method, order: TraversalOrder, direction: Direction) -> Vec<BlockId> {
    match order {
        TraversalOrder::PostOrder => post_order(method, direction),
        TraversalOrder::ReversePostOrder => reverse_post_order(method, direction),
    }
}
