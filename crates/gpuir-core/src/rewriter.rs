//! Pass-style rewriting over an open builder session.
//!
//! A [`Rewriter`] wraps a [`MethodBuilder`] with replace/remove primitives
//! that track converted nodes, so a pattern that fires on its own output
//! cannot loop. [`Rewriter::run`] drives one pass over a worklist of all
//! live values in block order; converted nodes are not re-visited within
//! the same pass.

use std::collections::HashSet;

use crate::builder::MethodBuilder;
use crate::error::IrError;
use crate::id::ValueId;
use crate::method::Method;

/// The action a pattern requests for a matched value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rewrite {
    /// Redirect all uses to the given value.
    Replace(ValueId),
    /// Redirect all uses and logically remove the matched value.
    ReplaceAndRemove(ValueId),
    /// Logically remove the matched value.
    Remove,
}

/// Replace/remove primitives with converted-node tracking.
pub struct Rewriter<'b, 'ctx> {
    builder: &'b mut MethodBuilder<'ctx>,
    converted: HashSet<ValueId>,
}

impl<'b, 'ctx> Rewriter<'b, 'ctx> {
    pub(crate) fn new(builder: &'b mut MethodBuilder<'ctx>) -> Self {
        Rewriter {
            builder,
            converted: HashSet::new(),
        }
    }

    /// The underlying builder, for creating replacement values.
    pub fn builder(&mut self) -> &mut MethodBuilder<'ctx> {
        self.builder
    }

    pub fn method(&self) -> &Method {
        self.builder.method()
    }

    /// Returns `true` if the value (after resolution) was produced or
    /// touched by this rewriter.
    pub fn is_converted(&self, value: ValueId) -> bool {
        let resolved = self.method().resolve(value);
        self.converted.contains(&resolved)
    }

    fn mark_converted(&mut self, value: ValueId) {
        let resolved = self.method().resolve(value);
        self.converted.insert(resolved);
    }

    /// Replaces `old` by `new`, marking both converted.
    pub fn replace(&mut self, old: ValueId, new: ValueId) -> Result<(), IrError> {
        self.builder.replace(old, new)?;
        self.converted.insert(old);
        self.mark_converted(new);
        Ok(())
    }

    /// Replaces `old` by `new` and removes the old slot.
    pub fn replace_and_remove(&mut self, old: ValueId, new: ValueId) -> Result<(), IrError> {
        self.builder.replace_and_remove(old, new)?;
        self.converted.insert(old);
        self.mark_converted(new);
        Ok(())
    }

    /// Removes `value`, marking it converted.
    pub fn remove(&mut self, value: ValueId) -> Result<(), IrError> {
        self.builder.remove(value)?;
        self.converted.insert(value);
        Ok(())
    }

    /// Drives one pass: every live value in block order is offered to
    /// `pattern`; a returned [`Rewrite`] is applied. Returns the number of
    /// rewrites applied.
    pub fn run(
        &mut self,
        mut pattern: impl FnMut(&Method, ValueId) -> Option<Rewrite>,
    ) -> Result<usize, IrError> {
        let worklist: Vec<ValueId> = {
            let method = self.method();
            let blocks: Vec<_> = if method.rpo().is_empty() {
                method.block_ids().collect()
            } else {
                method.rpo().to_vec()
            };
            blocks
                .iter()
                .flat_map(|&b| method.block_values(b).collect::<Vec<_>>())
                .collect()
        };

        let mut applied = 0;
        for value in worklist {
            let method = self.method();
            if method.is_removed(value) || method.is_replaced(value) {
                continue;
            }
            if self.converted.contains(&value) {
                continue;
            }
            let Some(rewrite) = pattern(self.method(), value) else {
                continue;
            };
            match rewrite {
                Rewrite::Replace(new) => self.replace(value, new)?,
                Rewrite::ReplaceAndRemove(new) => self.replace_and_remove(value, new)?,
                Rewrite::Remove => self.remove(value)?,
            }
            applied += 1;
        }
        tracing::trace!(applied, "rewriter pass");
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextFlags, IrContext};
    use crate::id::BlockId;
    use crate::location::Location;
    use crate::method::MethodDeclaration;
    use crate::ops::{ArithFlags, BinaryArithKind};
    use crate::universe::TypeId;
    use crate::value::ValueKind;

    // S5: a commutativity rewriter canonicalizes Add(b, a) onto Add(a, b).
    #[test]
    fn commutativity_rewrite_leaves_one_add() {
        let mut ctx = IrContext::new(ContextFlags::empty());
        let m = ctx
            .declare(MethodDeclaration::new("canon", TypeId::INT32))
            .unwrap();
        let mut mb = ctx.create_builder(m).unwrap();
        let entry = mb.create_basic_block(Location::Unknown);
        let a = mb.add_parameter(TypeId::INT32, Some("a")).unwrap();
        let b = mb.add_parameter(TypeId::INT32, Some("b")).unwrap();
        let mut bb = mb.block(entry);
        let x = bb
            .create_binary_arithmetic(
                Location::Unknown,
                BinaryArithKind::Add,
                a,
                b,
                ArithFlags::empty(),
            )
            .unwrap();
        let y = bb
            .create_binary_arithmetic(
                Location::Unknown,
                BinaryArithKind::Add,
                b,
                a,
                ArithFlags::empty(),
            )
            .unwrap();
        let ret = bb.create_return(Location::Unknown, Some(y)).unwrap();

        let mut rewriter = mb.rewriter();
        let applied = rewriter
            .run(|method, value| {
                // Canonical form: operands ordered by node id.
                let node = method.value(value);
                if !matches!(
                    node.kind,
                    ValueKind::BinaryArithmetic {
                        kind: BinaryArithKind::Add,
                        ..
                    }
                ) {
                    return None;
                }
                let operands = method.operands(value);
                if operands.as_slice() == [b, a] {
                    Some(Rewrite::ReplaceAndRemove(x))
                } else {
                    None
                }
            })
            .unwrap();
        assert_eq!(applied, 1);
        assert!(rewriter.is_converted(y));
        drop(rewriter);
        mb.complete().unwrap();

        let method = ctx.method(m);
        // Uses of the removed add read through to the canonical one.
        assert_eq!(method.resolve(y), x);
        assert_eq!(method.operands(ret).as_slice(), &[x]);
        // Exactly one live add remains in the block.
        let live_adds = method
            .block_values(entry)
            .filter(|&v| {
                matches!(
                    method.value(v).kind,
                    ValueKind::BinaryArithmetic {
                        kind: BinaryArithKind::Add,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(live_adds, 1);
    }

    #[test]
    fn converted_values_are_not_revisited() {
        let mut ctx = IrContext::new(ContextFlags::empty());
        let m = ctx
            .declare(MethodDeclaration::new("once", TypeId::INT32))
            .unwrap();
        let mut mb = ctx.create_builder(m).unwrap();
        let entry = mb.create_basic_block(Location::Unknown);
        let a = mb.add_parameter(TypeId::INT32, None).unwrap();
        let mut bb = mb.block(entry);
        let x = bb
            .create_binary_arithmetic(
                Location::Unknown,
                BinaryArithKind::Add,
                a,
                a,
                ArithFlags::empty(),
            )
            .unwrap();
        bb.create_return(Location::Unknown, Some(x)).unwrap();

        let mut rewriter = mb.rewriter();
        // Mark the add converted, then run a pattern that would otherwise
        // fire on every add.
        rewriter.replace(x, a).unwrap();
        let applied = rewriter
            .run(|method, value| {
                matches!(
                    method.value(value).kind,
                    ValueKind::BinaryArithmetic { .. }
                )
                .then_some(Rewrite::Remove)
            })
            .unwrap();
        assert_eq!(applied, 0);
    }

    #[test]
    fn run_visits_blocks_without_control_flow_info() {
        let mut ctx = IrContext::new(ContextFlags::empty());
        let m = ctx
            .declare(MethodDeclaration::new("fresh", TypeId::VOID))
            .unwrap();
        let mut mb = ctx.create_builder(m).unwrap();
        let entry: BlockId = mb.create_basic_block(Location::Unknown);
        mb.block(entry)
            .create_barrier(Location::Unknown);

        // No control-flow update has run yet; the worklist falls back to
        // arena order.
        let mut rewriter = mb.rewriter();
        let applied = rewriter
            .run(|method, value| {
                matches!(method.value(value).kind, ValueKind::Barrier)
                    .then_some(Rewrite::Remove)
            })
            .unwrap();
        assert_eq!(applied, 1);
    }
}
