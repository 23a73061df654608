//! Full method verification, dominance checks included.
//!
//! Extends the structural verifier of the core crate with the checks that
//! need a dominator tree: every operand of a non-phi value must be defined
//! in a block dominating the use, and every phi incoming value must be
//! defined in a block dominating its source edge. All findings are
//! collected into one `VerificationFailed` result.

use gpuir_core::{verify_method, IrContext, IrError, MethodId, ValueKind, VerificationFailure};

use crate::dominators::Dominators;

/// Verifies `method` structurally and under dominance.
pub fn verify_with_dominance(ctx: &IrContext, method: MethodId) -> Result<(), IrError> {
    let m = ctx.method(method);
    verify_method(m)?;

    let dominators = Dominators::compute(m);
    let mut failures = Vec::new();

    for &block in m.rpo() {
        for value_id in m.block_values(block) {
            let value = m.value(value_id);
            match value.kind {
                ValueKind::Phi => {
                    for (source, incoming) in m.phi_incoming(value_id) {
                        let incoming = m.value(incoming);
                        let Some(def_block) = incoming.block else {
                            continue; // parameters dominate everything
                        };
                        if !dominators.dominates(def_block, source) {
                            failures.push(VerificationFailure::new(
                                value.id,
                                value.location.clone(),
                                format!(
                                    "phi incoming value from {def_block} is not defined on the \
                                     path through {source}"
                                ),
                            ));
                        }
                    }
                }
                _ => {
                    for &operand in m.operands(value_id).iter() {
                        let operand = m.value(operand);
                        let Some(def_block) = operand.block else {
                            continue;
                        };
                        if !dominators.dominates(def_block, block) {
                            failures.push(VerificationFailure::new(
                                value.id,
                                value.location.clone(),
                                format!(
                                    "operand defined in {def_block} does not dominate the use \
                                     in {block}"
                                ),
                            ));
                        }
                    }
                }
            }
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(IrError::VerificationFailed { failures })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpuir_core::{
        BranchFlags, ContextFlags, Location, MethodDeclaration, PrimitiveConstant, TypeId,
    };

    #[test]
    fn dominance_respecting_method_verifies() {
        let mut ctx = IrContext::new(ContextFlags::empty());
        let m = ctx
            .declare(MethodDeclaration::new("fine", TypeId::INT32))
            .unwrap();
        let mut mb = ctx.create_builder(m).unwrap();
        let entry = mb.create_basic_block(Location::Unknown);
        let next = mb.create_basic_block(Location::Unknown);
        let p = mb.add_parameter(TypeId::INT32, None).unwrap();
        let v = mb
            .block(entry)
            .create_primitive(Location::Unknown, PrimitiveConstant::i32(2));
        mb.block(entry)
            .create_branch(Location::Unknown, next)
            .unwrap();
        let mut bb = mb.block(next);
        let sum = bb
            .create_binary_arithmetic(
                Location::Unknown,
                gpuir_core::BinaryArithKind::Add,
                p,
                v,
                gpuir_core::ArithFlags::empty(),
            )
            .unwrap();
        bb.create_return(Location::Unknown, Some(sum)).unwrap();
        mb.complete().unwrap();

        verify_with_dominance(&ctx, m).unwrap();
    }

    #[test]
    fn use_before_def_across_branches_is_reported() {
        let mut ctx = IrContext::new(ContextFlags::empty());
        let m = ctx
            .declare(MethodDeclaration::new("broken", TypeId::INT32))
            .unwrap();
        let mut mb = ctx.create_builder(m).unwrap();
        let entry = mb.create_basic_block(Location::Unknown);
        let left = mb.create_basic_block(Location::Unknown);
        let right = mb.create_basic_block(Location::Unknown);
        let join = mb.create_basic_block(Location::Unknown);
        let p = mb.add_parameter(TypeId::INT1, None).unwrap();

        mb.block(entry)
            .create_if_branch(Location::Unknown, p, left, right, BranchFlags::None)
            .unwrap();
        let defined_left = mb
            .block(left)
            .create_primitive(Location::Unknown, PrimitiveConstant::i32(1));
        mb.block(left)
            .create_branch(Location::Unknown, join)
            .unwrap();
        mb.block(right)
            .create_branch(Location::Unknown, join)
            .unwrap();
        // Using the left-defined value directly in the join violates
        // dominance (the right path never defines it).
        let mut bb = mb.block(join);
        let doubled = bb
            .create_binary_arithmetic(
                Location::Unknown,
                gpuir_core::BinaryArithKind::Add,
                defined_left,
                defined_left,
                gpuir_core::ArithFlags::empty(),
            )
            .unwrap();
        bb.create_return(Location::Unknown, Some(doubled)).unwrap();
        mb.complete().unwrap();

        let err = verify_with_dominance(&ctx, m).unwrap_err();
        let IrError::VerificationFailed { failures } = err else {
            panic!("expected verification failure");
        };
        assert!(failures
            .iter()
            .any(|f| f.message.contains("does not dominate")));
    }

    #[test]
    fn phi_incoming_must_dominate_its_source_edge() {
        let mut ctx = IrContext::new(ContextFlags::empty());
        let m = ctx
            .declare(MethodDeclaration::new("badedge", TypeId::INT32))
            .unwrap();
        let mut mb = ctx.create_builder(m).unwrap();
        let entry = mb.create_basic_block(Location::Unknown);
        let left = mb.create_basic_block(Location::Unknown);
        let right = mb.create_basic_block(Location::Unknown);
        let join = mb.create_basic_block(Location::Unknown);
        let p = mb.add_parameter(TypeId::INT1, None).unwrap();

        mb.block(entry)
            .create_if_branch(Location::Unknown, p, left, right, BranchFlags::None)
            .unwrap();
        let left_value = mb
            .block(left)
            .create_primitive(Location::Unknown, PrimitiveConstant::i32(1));
        mb.block(left)
            .create_branch(Location::Unknown, join)
            .unwrap();
        mb.block(right)
            .create_branch(Location::Unknown, join)
            .unwrap();
        let phi = mb
            .block(join)
            .create_phi(Location::Unknown, TypeId::INT32)
            .unwrap();
        mb.add_phi_incoming(phi, left, left_value).unwrap();
        // Wrong edge: the left-defined value cannot arrive through `right`.
        mb.add_phi_incoming(phi, right, left_value).unwrap();
        mb.block(join)
            .create_return(Location::Unknown, Some(phi))
            .unwrap();
        mb.complete().unwrap();

        let err = verify_with_dominance(&ctx, m).unwrap_err();
        let IrError::VerificationFailed { failures } = err else {
            panic!("expected verification failure");
        };
        assert!(failures
            .iter()
            .any(|f| f.message.contains("not defined on the path")));
    }
}
