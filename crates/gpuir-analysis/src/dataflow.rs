//! Monotone fix-point dataflow over methods and across call edges.
//!
//! An [`AnalysisLattice`] describes a meet-semilattice: an initial value
//! per node kind, a meet, and optional per-kind transfer functions. The
//! per-method driver iterates blocks in reverse-post-order until the value
//! table stops changing; the [`GlobalAnalysis`] driver additionally
//! propagates call-argument values into callee parameters and re-runs
//! affected methods until the whole context is stable.
//!
//! Termination follows from monotonicity: every table update moves a value
//! strictly down the lattice, and all lattice values observed are drawn
//! from a finite set.

use std::collections::HashMap;

use gpuir_core::{IrContext, Method, MethodId, ValueId, ValueKind};

/// A meet-semilattice with per-node-kind seeds and transfers.
pub trait AnalysisLattice {
    type Value: Clone + PartialEq + std::fmt::Debug;

    /// The top element, used where no information exists yet.
    fn default_value(&self) -> Self::Value;

    /// Initial lattice value for a node, by kind.
    fn create_value(&self, ctx: &IrContext, method: &Method, value: ValueId) -> Self::Value;

    /// The meet of two values.
    fn merge(&self, a: &Self::Value, b: &Self::Value) -> Self::Value;

    /// Refined value for select node kinds; `None` falls back to merging
    /// the operand values.
    fn transfer(
        &self,
        ctx: &IrContext,
        method: &Method,
        value: ValueId,
        table: &ValueTable<Self::Value>,
    ) -> Option<Self::Value>;
}

/// Per-method table of lattice values.
#[derive(Debug, Clone)]
pub struct ValueTable<V> {
    values: HashMap<ValueId, V>,
}

impl<V: Clone> ValueTable<V> {
    fn new() -> Self {
        ValueTable {
            values: HashMap::new(),
        }
    }

    pub fn get(&self, value: ValueId) -> Option<&V> {
        self.values.get(&value)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Context-wide fix-point analysis result.
pub struct GlobalAnalysis<L: AnalysisLattice> {
    lattice: L,
    tables: HashMap<MethodId, ValueTable<L::Value>>,
}

impl<L: AnalysisLattice> GlobalAnalysis<L> {
    /// Runs the analysis over every method of `ctx` to a global fixpoint.
    pub fn run(lattice: L, ctx: &IrContext) -> Self {
        let mut tables: HashMap<MethodId, ValueTable<L::Value>> = HashMap::new();

        // Seed every live value of every method.
        for method in ctx.methods() {
            let mut table = ValueTable::new();
            for &parameter in method.parameters() {
                table
                    .values
                    .insert(parameter, lattice.create_value(ctx, method, parameter));
            }
            for block in method.block_ids() {
                for value in method.block_values(block) {
                    table
                        .values
                        .insert(value, lattice.create_value(ctx, method, value));
                }
            }
            tables.insert(method.handle(), table);
        }

        // Global driver: local fixpoints plus cross-call propagation.
        let mut worklist: Vec<MethodId> = ctx.methods().map(|m| m.handle()).collect();
        let mut rounds = 0usize;
        while let Some(handle) = worklist.pop() {
            rounds += 1;
            let method = ctx.method(handle);
            let table = tables.get_mut(&handle).expect("seeded table");
            local_fixpoint(&lattice, ctx, method, table);

            // Push argument values into callee parameters.
            for block in method.block_ids() {
                for value in method.block_values(block) {
                    let ValueKind::MethodCall { target } = method.value(value).kind else {
                        continue;
                    };
                    let arguments = method.operands(value);
                    let argument_values: Vec<L::Value> = {
                        let table = &tables[&handle];
                        arguments
                            .iter()
                            .map(|&a| {
                                table
                                    .get(a)
                                    .cloned()
                                    .unwrap_or_else(|| lattice.default_value())
                            })
                            .collect()
                    };
                    let Some(callee) = ctx.get_method(target) else {
                        continue;
                    };
                    let callee_params: Vec<ValueId> = callee.parameters().to_vec();
                    let callee_table = tables.get_mut(&target).expect("seeded table");
                    let mut changed = false;
                    for (&parameter, argument) in
                        callee_params.iter().zip(argument_values.iter())
                    {
                        let current = callee_table
                            .get(parameter)
                            .cloned()
                            .unwrap_or_else(|| lattice.default_value());
                        let merged = lattice.merge(&current, argument);
                        if merged != current {
                            callee_table.values.insert(parameter, merged);
                            changed = true;
                        }
                    }
                    if changed && !worklist.contains(&target) {
                        worklist.push(target);
                    }
                }
            }
        }
        tracing::debug!(rounds, methods = tables.len(), "global dataflow fixpoint");

        GlobalAnalysis { lattice, tables }
    }

    /// The lattice value of `value` in `method`, if analyzed.
    pub fn value(&self, method: MethodId, value: ValueId) -> Option<&L::Value> {
        self.tables.get(&method)?.get(value)
    }

    pub fn table(&self, method: MethodId) -> Option<&ValueTable<L::Value>> {
        self.tables.get(&method)
    }

    pub fn lattice(&self) -> &L {
        &self.lattice
    }
}

/// Iterates one method's table to a local fixpoint.
fn local_fixpoint<L: AnalysisLattice>(
    lattice: &L,
    ctx: &IrContext,
    method: &Method,
    table: &mut ValueTable<L::Value>,
) {
    let blocks: Vec<_> = if method.rpo().is_empty() {
        method.block_ids().collect()
    } else {
        method.rpo().to_vec()
    };
    loop {
        let mut changed = false;
        for &block in &blocks {
            for value in method.block_values(block) {
                let computed = match lattice.transfer(ctx, method, value, table) {
                    Some(refined) => refined,
                    None => {
                        // Default transfer: meet over the operand values.
                        let operands = method.operands(value);
                        let mut merged: Option<L::Value> = None;
                        for &operand in &operands {
                            let incoming = table
                                .get(operand)
                                .cloned()
                                .unwrap_or_else(|| lattice.default_value());
                            merged = Some(match merged {
                                None => incoming,
                                Some(current) => lattice.merge(&current, &incoming),
                            });
                        }
                        match merged {
                            Some(merged) => merged,
                            None => continue,
                        }
                    }
                };
                let current = table
                    .get(value)
                    .cloned()
                    .unwrap_or_else(|| lattice.default_value());
                let next = lattice.merge(&current, &computed);
                if next != current {
                    table.values.insert(value, next);
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }
}
