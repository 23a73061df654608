//! Structural verification of a built method.
//!
//! Runs at [`MethodBuilder::complete`](crate::builder::MethodBuilder) and
//! collects all findings into one [`IrError::VerificationFailed`] bag with
//! per-node diagnostics, rather than stopping at the first violation.
//!
//! The checks here are purely structural: node identity, block sealing,
//! terminator shape, bidirectional CFG consistency, phi arity, and operand
//! resolution. Dominance-sensitive checks live with the control-flow
//! analyses.

use std::collections::HashSet;

use crate::error::{IrError, VerificationFailure};
use crate::id::NodeId;
use crate::method::Method;
use crate::universe::TypeId;
use crate::value::ValueKind;

/// Verifies the structural invariants of `method`. Requires a preceding
/// control-flow update.
pub fn verify_method(method: &Method) -> Result<(), IrError> {
    let mut failures = Vec::new();
    let mut seen_ids: HashSet<NodeId> = HashSet::new();

    let mut check_unique = |id: NodeId, failures: &mut Vec<VerificationFailure>| {
        if !seen_ids.insert(id) {
            failures.push(VerificationFailure::new(
                id,
                crate::location::Location::Unknown,
                "duplicate node id",
            ));
        }
    };

    // Parameters: positional indices, no owning block.
    for (position, &parameter) in method.parameters().iter().enumerate() {
        let value = method.value(parameter);
        check_unique(value.id, &mut failures);
        match value.kind {
            ValueKind::Parameter { index, .. } if index as usize == position => {}
            ValueKind::Parameter { index, .. } => failures.push(VerificationFailure::new(
                value.id,
                value.location.clone(),
                format!("parameter index {index} does not match position {position}"),
            )),
            _ => failures.push(VerificationFailure::new(
                value.id,
                value.location.clone(),
                "parameter list entry is not a parameter",
            )),
        }
        if value.block.is_some() {
            failures.push(VerificationFailure::new(
                value.id,
                value.location.clone(),
                "parameter must not be owned by a block",
            ));
        }
    }

    for block_id in method.block_ids() {
        let block = method.block(block_id);
        check_unique(block.id(), &mut failures);

        // Exactly one terminator per sealed block; none among the body.
        let Some(terminator) = block.terminator() else {
            failures.push(VerificationFailure::new(
                block.id(),
                block.location().clone(),
                "block has no terminator",
            ));
            continue;
        };
        for &value in block.values() {
            if method.is_removed(value) || method.is_replaced(value) {
                continue;
            }
            if method.value(value).is_terminator() {
                failures.push(VerificationFailure::new(
                    method.value(value).id,
                    method.value(value).location.clone(),
                    "terminator in the middle of a block",
                ));
            }
        }

        for value_id in method.block_values(block_id) {
            let value = method.value(value_id);
            check_unique(value.id, &mut failures);
            if value.block != Some(block_id) {
                failures.push(VerificationFailure::new(
                    value.id,
                    value.location.clone(),
                    "value is recorded in a block it does not name as owner",
                ));
            }
            // Operands must resolve to live slots.
            for &operand in &value.operands {
                if operand.index() >= method.num_value_slots() {
                    failures.push(VerificationFailure::new(
                        value.id,
                        value.location.clone(),
                        format!("operand {operand} does not resolve"),
                    ));
                    continue;
                }
                let resolved = method.resolve(operand);
                if method.is_removed(resolved) {
                    failures.push(VerificationFailure::new(
                        value.id,
                        value.location.clone(),
                        format!("operand {operand} resolves to a removed value"),
                    ));
                }
            }
        }

        // Terminator shape.
        let terminator = method.resolve(terminator);
        let value = method.value(terminator);
        let (operands, targets) = (value.operands.len(), value.block_operands.len());
        let shape_failure = match value.kind {
            ValueKind::Return => {
                let want = usize::from(method.return_type() != TypeId::VOID);
                (operands != want || targets != 0)
                    .then(|| "return shape does not match the method signature")
            }
            ValueKind::UnconditionalBranch => {
                (operands != 0 || targets != 1).then(|| "branch must have exactly one target")
            }
            ValueKind::IfBranch { .. } => (operands != 1 || targets != 2)
                .then(|| "conditional branch must have a condition and two targets"),
            ValueKind::SwitchBranch => (operands != 1 || targets == 0)
                .then(|| "switch must have a selector and at least a default target"),
            _ => Some("block terminator has a non-terminator kind"),
        };
        if let Some(message) = shape_failure {
            failures.push(VerificationFailure::new(
                value.id,
                value.location.clone(),
                message,
            ));
        }

        // The CFG update mirrors terminator targets into successor lists;
        // both directions must agree.
        if block.has_valid_index() {
            if block.successors() != value.block_operands.as_slice() {
                failures.push(VerificationFailure::new(
                    block.id(),
                    block.location().clone(),
                    "successor list differs from the terminator targets",
                ));
            }
            for &successor in block.successors() {
                if !method.block(successor).predecessors().contains(&block_id) {
                    failures.push(VerificationFailure::new(
                        block.id(),
                        block.location().clone(),
                        format!("missing back edge from successor {successor}"),
                    ));
                }
            }
            for &predecessor in block.predecessors() {
                if !method.block(predecessor).successors().contains(&block_id) {
                    failures.push(VerificationFailure::new(
                        block.id(),
                        block.location().clone(),
                        format!("predecessor {predecessor} does not list this block"),
                    ));
                }
            }

            // Phi arity and source blocks.
            for value_id in method.block_values(block_id) {
                let value = method.value(value_id);
                if !matches!(value.kind, ValueKind::Phi) {
                    continue;
                }
                let incoming = method.phi_incoming(value_id);
                if incoming.len() != block.num_predecessors() {
                    failures.push(VerificationFailure::new(
                        value.id,
                        value.location.clone(),
                        format!(
                            "phi incoming edge count {} differs from predecessor count {}",
                            incoming.len(),
                            block.num_predecessors()
                        ),
                    ));
                }
                let mut sources = HashSet::new();
                for (source, _) in incoming {
                    if !sources.insert(source) {
                        failures.push(VerificationFailure::new(
                            value.id,
                            value.location.clone(),
                            format!("duplicate phi source block {source}"),
                        ));
                    }
                    if !block.predecessors().contains(&source) {
                        failures.push(VerificationFailure::new(
                            value.id,
                            value.location.clone(),
                            format!("phi source {source} is not a predecessor"),
                        ));
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
