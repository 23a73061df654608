//! Pointer-alignment analysis.
//!
//! A concrete instantiation of the dataflow framework over the natural
//! numbers with meet = min: top is `u64::MAX` ("unconstrained"), bottom is
//! byte alignment 1. Address-producing kinds start unconstrained and are
//! refined by transfer functions; allocations start at their element type's
//! alignment; parameters are seeded from a caller-provided global
//! alignment and tightened further by call-site arguments.
//!
//! Transfers:
//! - `LoadFieldAddress`: `min(align(source), offset_alignment(field))`.
//! - `LoadElementAddress`: `max(align(source), element alignment)`; the
//!   resulting accesses are aligned to the element, independent of the
//!   base.

use gpuir_core::{IrContext, Method, MethodId, TypeNode, ValueId, ValueKind};

use crate::dataflow::{AnalysisLattice, GlobalAnalysis, ValueTable};

/// Default entry alignment for parameters: the machine word.
pub const DEFAULT_GLOBAL_ALIGNMENT: u64 = 8;

/// Default cap on reportable alignments.
pub const DEFAULT_PLATFORM_MAX_ALIGNMENT: u64 = 128;

/// The alignment lattice: min-merge over `u64`, top = `u64::MAX`.
#[derive(Debug, Clone, Copy)]
pub struct AlignmentLattice {
    global_alignment: u64,
}

impl AnalysisLattice for AlignmentLattice {
    type Value = u64;

    fn default_value(&self) -> u64 {
        u64::MAX
    }

    fn create_value(&self, ctx: &IrContext, method: &Method, value: ValueId) -> u64 {
        match method.value(value).kind {
            ValueKind::Alloca { .. } => {
                // The pointer is aligned to the allocated element type.
                match *ctx.types().node(method.value(value).ty) {
                    TypeNode::Pointer { element, .. } => ctx.types().alignment(element),
                    _ => 1,
                }
            }
            ValueKind::Parameter { .. } => self.global_alignment,
            ValueKind::NewView
            | ValueKind::SubView
            | ValueKind::AddressSpaceCast { .. }
            | ValueKind::LoadElementAddress
            | ValueKind::LoadFieldAddress { .. }
            | ValueKind::GetField { .. }
            | ValueKind::SetField { .. }
            | ValueKind::StructureValue
            | ValueKind::Load
            | ValueKind::Store
            | ValueKind::Phi
            | ValueKind::PrimitiveValue { .. }
            | ValueKind::NullValue => u64::MAX,
            _ => 1,
        }
    }

    fn merge(&self, a: &u64, b: &u64) -> u64 {
        *a.min(b)
    }

    fn transfer(
        &self,
        ctx: &IrContext,
        method: &Method,
        value: ValueId,
        table: &ValueTable<u64>,
    ) -> Option<u64> {
        let node = method.value(value);
        let source_alignment = |index: usize| -> u64 {
            let operands = method.operands(value);
            operands
                .get(index)
                .and_then(|&source| table.get(source))
                .copied()
                .unwrap_or(u64::MAX)
        };
        match node.kind {
            ValueKind::LoadFieldAddress { field } => {
                let operands = method.operands(value);
                let source = *operands.first()?;
                let TypeNode::Pointer { element, .. } =
                    *ctx.types().node(method.value(source).ty)
                else {
                    return None;
                };
                let layout = ctx.types().structure_layout(element)?;
                if field as usize >= layout.offsets.len() {
                    return None;
                }
                let offset_alignment = layout.field_offset_alignment(field as usize);
                Some(source_alignment(0).min(offset_alignment))
            }
            ValueKind::LoadElementAddress => {
                let TypeNode::Pointer { element, .. } = *ctx.types().node(node.ty) else {
                    return None;
                };
                let element_alignment = ctx.types().alignment(element);
                Some(source_alignment(0).max(element_alignment))
            }
            _ => None,
        }
    }
}

/// Computed pointer alignments for a whole context.
pub struct PointerAlignments {
    analysis: GlobalAnalysis<AlignmentLattice>,
    platform_max: u64,
}

impl PointerAlignments {
    /// Runs the analysis with the default word alignment for method entry
    /// parameters.
    pub fn compute(ctx: &IrContext) -> Self {
        Self::compute_with(ctx, DEFAULT_GLOBAL_ALIGNMENT, DEFAULT_PLATFORM_MAX_ALIGNMENT)
    }

    /// Runs the analysis with an explicit entry alignment and platform cap.
    pub fn compute_with(ctx: &IrContext, global_alignment: u64, platform_max: u64) -> Self {
        let analysis = GlobalAnalysis::run(AlignmentLattice { global_alignment }, ctx);
        PointerAlignments {
            analysis,
            platform_max,
        }
    }

    /// The provable alignment of `value`, at least `safe_minimum`.
    ///
    /// Unconstrained values report the platform maximum; the result is
    /// never smaller than `safe_minimum` or 1.
    pub fn alignment_of(&self, method: MethodId, value: ValueId, safe_minimum: u64) -> u64 {
        let raw = self
            .analysis
            .value(method, value)
            .copied()
            .unwrap_or(1)
            .min(self.platform_max);
        raw.max(safe_minimum).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpuir_core::{
        AddressSpace, BranchFlags, ContextFlags, Location, MethodDeclaration,
        PrimitiveConstant, TypeId,
    };

    // S3: aligned strided load from a global view.
    #[test]
    fn element_address_is_aligned_to_the_element_type() {
        let mut ctx = IrContext::new(ContextFlags::empty());
        let view_ty = ctx.types_mut().view(TypeId::INT64, AddressSpace::Global);
        let m = ctx
            .declare(MethodDeclaration::new("strided", TypeId::INT64))
            .unwrap();
        let mut mb = ctx.create_builder(m).unwrap();
        let entry = mb.create_basic_block(Location::Unknown);
        let v = mb.add_parameter(view_ty, Some("v")).unwrap();
        let i = mb.add_parameter(TypeId::INT32, Some("i")).unwrap();
        let mut bb = mb.block(entry);
        let p = bb
            .create_load_element_address(Location::Unknown, v, i)
            .unwrap();
        let loaded = bb.create_load(Location::Unknown, p).unwrap();
        bb.create_return(Location::Unknown, Some(loaded)).unwrap();
        mb.complete().unwrap();

        let alignments = PointerAlignments::compute_with(&ctx, 8, 128);
        assert_eq!(alignments.alignment_of(m, v, 1), 8);
        assert!(alignments.alignment_of(m, p, 1) >= 8);
    }

    // S4: structure field addresses inherit the offset alignment.
    #[test]
    fn field_address_combines_source_and_offset_alignment() {
        let mut ctx = IrContext::new(ContextFlags::empty());
        let mut sb = ctx.types_mut().structure();
        sb.add_field(TypeId::INT32).add_field(TypeId::INT64);
        let struct_ty = sb.seal();
        let ptr_ty = ctx.types_mut().pointer(struct_ty, AddressSpace::Global);

        let m = ctx
            .declare(MethodDeclaration::new("fields", TypeId::VOID))
            .unwrap();
        let mut mb = ctx.create_builder(m).unwrap();
        let entry = mb.create_basic_block(Location::Unknown);
        let s = mb.add_parameter(ptr_ty, Some("s")).unwrap();
        let mut bb = mb.block(entry);
        let f1 = bb
            .create_load_field_address(Location::Unknown, s, 1)
            .unwrap();
        bb.create_return(Location::Unknown, None).unwrap();
        mb.complete().unwrap();

        // Field 1 sits at offset 8; with a 16-aligned base the field address
        // is exactly min(16, 8) = 8.
        let alignments = PointerAlignments::compute_with(&ctx, 16, 128);
        assert_eq!(alignments.alignment_of(m, s, 1), 16);
        assert_eq!(alignments.alignment_of(m, f1, 1), 8);
    }

    #[test]
    fn alloca_alignment_comes_from_the_element_type() {
        let mut ctx = IrContext::new(ContextFlags::empty());
        let m = ctx
            .declare(MethodDeclaration::new("stack", TypeId::VOID))
            .unwrap();
        let mut mb = ctx.create_builder(m).unwrap();
        let entry = mb.create_basic_block(Location::Unknown);
        let mut bb = mb.block(entry);
        let small = bb
            .create_alloca(Location::Unknown, TypeId::INT8, AddressSpace::Local)
            .unwrap();
        let wide = bb
            .create_alloca(Location::Unknown, TypeId::INT64, AddressSpace::Local)
            .unwrap();
        bb.create_return(Location::Unknown, None).unwrap();
        mb.complete().unwrap();

        let alignments = PointerAlignments::compute(&ctx);
        assert_eq!(alignments.alignment_of(m, small, 1), 1);
        assert_eq!(alignments.alignment_of(m, wide, 1), 8);
        // The safe minimum lower-bounds the answer.
        assert_eq!(alignments.alignment_of(m, small, 4), 4);
    }

    // Invariant 10: the fixpoint is stable across repeated analyses, loops
    // included.
    #[test]
    fn loop_phi_alignment_converges_and_is_stable() {
        let mut ctx = IrContext::new(ContextFlags::empty());
        let view_ty = ctx.types_mut().view(TypeId::INT64, AddressSpace::Global);
        let m = ctx
            .declare(MethodDeclaration::new("walk", TypeId::VOID))
            .unwrap();
        let mut mb = ctx.create_builder(m).unwrap();
        let entry = mb.create_basic_block(Location::Unknown);
        let header = mb.create_basic_block(Location::Unknown);
        let body = mb.create_basic_block(Location::Unknown);
        let exit = mb.create_basic_block(Location::Unknown);
        let v = mb.add_parameter(view_ty, None).unwrap();
        let cond = mb.add_parameter(TypeId::INT1, None).unwrap();

        let mut bb = mb.block(entry);
        let i0 = bb.create_primitive(Location::Unknown, PrimitiveConstant::i32(0));
        let p0 = bb
            .create_load_element_address(Location::Unknown, v, i0)
            .unwrap();
        bb.create_branch(Location::Unknown, header).unwrap();

        let phi_ty = mb.method().value(p0).ty;
        let phi = mb.block(header).create_phi(Location::Unknown, phi_ty).unwrap();
        mb.block(header)
            .create_if_branch(Location::Unknown, cond, body, exit, BranchFlags::None)
            .unwrap();
        let mut bb = mb.block(body);
        let step = bb.create_primitive(Location::Unknown, PrimitiveConstant::i32(1));
        let p1 = bb
            .create_load_element_address(Location::Unknown, phi, step)
            .unwrap();
        bb.create_branch(Location::Unknown, header).unwrap();
        mb.add_phi_incoming(phi, entry, p0).unwrap();
        mb.add_phi_incoming(phi, body, p1).unwrap();
        mb.block(exit)
            .create_return(Location::Unknown, None)
            .unwrap();
        mb.complete().unwrap();

        let first = PointerAlignments::compute_with(&ctx, 8, 128);
        assert_eq!(first.alignment_of(m, phi, 1), 8);
        assert_eq!(first.alignment_of(m, p1, 1), 8);

        let second = PointerAlignments::compute_with(&ctx, 8, 128);
        assert_eq!(
            first.alignment_of(m, phi, 1),
            second.alignment_of(m, phi, 1)
        );
    }

    #[test]
    fn call_arguments_tighten_callee_parameter_alignment() {
        let mut ctx = IrContext::new(ContextFlags::empty());
        let elem_ptr = ctx.types_mut().pointer(TypeId::INT64, AddressSpace::Local);

        let callee = ctx
            .declare(MethodDeclaration::new("callee", TypeId::VOID))
            .unwrap();
        let mut mb = ctx.create_builder(callee).unwrap();
        let entry = mb.create_basic_block(Location::Unknown);
        let q = mb.add_parameter(elem_ptr, Some("q")).unwrap();
        mb.block(entry)
            .create_return(Location::Unknown, None)
            .unwrap();
        mb.complete().unwrap();

        let caller = ctx
            .declare(MethodDeclaration::new("caller", TypeId::VOID))
            .unwrap();
        let mut mb = ctx.create_builder(caller).unwrap();
        let entry = mb.create_basic_block(Location::Unknown);
        let mut bb = mb.block(entry);
        // A 1-aligned argument: an Int8 allocation reinterpreted as Int64.
        let byte = bb
            .create_alloca(Location::Unknown, TypeId::INT8, AddressSpace::Local)
            .unwrap();
        let cast = bb
            .create_pointer_cast(Location::Unknown, byte, TypeId::INT64)
            .unwrap();
        bb.create_call(Location::Unknown, callee, &[cast]).unwrap();
        bb.create_return(Location::Unknown, None).unwrap();
        mb.complete().unwrap();

        let alignments = PointerAlignments::compute_with(&ctx, 8, 128);
        // The seed of 8 is tightened by the 1-aligned call argument.
        assert_eq!(alignments.alignment_of(callee, q, 1), 1);
    }
}
