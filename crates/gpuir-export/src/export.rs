//! Flattening a context into the export object model.
//!
//! The walk goes methods → blocks → values, emitting an id-keyed record per
//! node and exactly the type records reachable from the exported methods
//! (signatures and value types, with their transitive children). Operand
//! references are resolved through replacement forwarding, so a container
//! never mentions replaced slots.

use std::collections::HashSet;

use gpuir_core::{
    IrContext, Method, MethodId, TypeId, TypeNode, TypeUniverse, ValueKind,
};

use crate::records::{
    pack_kind_and_flags, Container, IrMethodRecord, IrTypeRecord, IrValueRecord,
    RecordValueKind, TypeClass, NO_BLOCK_ID, VOID_TYPE_ID,
};

/// Exports every method of `ctx`.
pub fn export_context(ctx: &IrContext) -> Container {
    let mut container = Container::default();
    let mut seen_types = HashSet::new();
    for method in ctx.methods() {
        export_into(ctx, method, &mut container, &mut seen_types);
    }
    container
}

/// Exports a single method (and the types it reaches).
pub fn export_method(ctx: &IrContext, method: MethodId) -> Container {
    let mut container = Container::default();
    let mut seen_types = HashSet::new();
    export_into(ctx, ctx.method(method), &mut container, &mut seen_types);
    container
}

fn export_into(
    ctx: &IrContext,
    method: &Method,
    container: &mut Container,
    seen_types: &mut HashSet<TypeId>,
) {
    let universe = ctx.types();
    let return_type_id = type_ref(universe, method.return_type(), container, seen_types);

    let blocks: Vec<i64> = method
        .block_ids()
        .map(|b| method.block(b).id().0 as i64)
        .collect();
    container.methods.push(IrMethodRecord {
        id: method.id().0 as i64,
        name: method.name().to_string(),
        return_type_id,
        blocks,
    });

    for &parameter in method.parameters() {
        emit_value(ctx, method, parameter, NO_BLOCK_ID, container, seen_types);
    }
    for block in method.block_ids() {
        let block_node_id = method.block(block).id().0 as i64;
        for value in method.block_values(block) {
            emit_value(ctx, method, value, block_node_id, container, seen_types);
        }
    }
}

fn emit_value(
    ctx: &IrContext,
    method: &Method,
    value: gpuir_core::ValueId,
    block_id: i64,
    container: &mut Container,
    seen_types: &mut HashSet<TypeId>,
) {
    let node = method.value(value);
    let type_id = type_ref(ctx.types(), node.ty, container, seen_types);
    let (value_kind, data, tag) = encode_kind(ctx, &node.kind);

    let mut nodes: Vec<i64> = Vec::with_capacity(node.operands.len() + node.block_operands.len());
    let block_node = |b: gpuir_core::BlockId| method.block(b).id().0 as i64;
    if matches!(node.kind, ValueKind::Phi) {
        // Interleave (source block, incoming value) pairs.
        for (source, incoming) in method.phi_incoming(value) {
            nodes.push(block_node(source));
            nodes.push(method.value(incoming).id.0 as i64);
        }
    } else {
        for &operand in method.operands(value).iter() {
            nodes.push(method.value(operand).id.0 as i64);
        }
        for &target in &node.block_operands {
            nodes.push(block_node(target));
        }
    }

    container.values.push(IrValueRecord {
        id: node.id.0 as i64,
        value_kind,
        type_id,
        method_id: method.id().0 as i64,
        block_id,
        nodes,
        data,
        tag,
    });
}

/// Emits the record for `id` (and its children) on first sight and returns
/// the reference id. Void is implicit and yields [`VOID_TYPE_ID`].
fn type_ref(
    universe: &TypeUniverse,
    id: TypeId,
    container: &mut Container,
    seen: &mut HashSet<TypeId>,
) -> i64 {
    if id == TypeId::VOID {
        return VOID_TYPE_ID;
    }
    if seen.insert(id) {
        // Children first, so records arrive dependency-ordered.
        let children: Vec<TypeId> = universe.node(id).children().to_vec();
        for child in children {
            type_ref(universe, child, container, seen);
        }
        container.types.push(encode_type(universe, id));
    }
    i64::from(id.0)
}

fn encode_type(universe: &TypeUniverse, id: TypeId) -> IrTypeRecord {
    let (class, basic_value_type, data) = match *universe.node(id) {
        TypeNode::Void => (TypeClass::Void, None, 0),
        TypeNode::String => (TypeClass::String, None, 0),
        TypeNode::Primitive(basic) => (TypeClass::Primitive, Some(basic), 0),
        TypeNode::Padding(basic) => (TypeClass::Padding, Some(basic), 0),
        TypeNode::Pointer { space, .. } => (TypeClass::Pointer, None, space as u8 as i64),
        TypeNode::View { space, .. } => (TypeClass::View, None, space as u8 as i64),
        TypeNode::Array { dimensions, .. } => (TypeClass::Array, None, i64::from(dimensions)),
        TypeNode::Structure { .. } => (TypeClass::Structure, None, 0),
    };
    IrTypeRecord {
        id: i64::from(id.0),
        class,
        nodes: universe
            .node(id)
            .children()
            .iter()
            .map(|child| i64::from(child.0))
            .collect(),
        basic_value_type,
        data,
    }
}

fn encode_kind(ctx: &IrContext, kind: &ValueKind) -> (RecordValueKind, i64, Option<String>) {
    match kind {
        ValueKind::Parameter { index, name } => {
            (RecordValueKind::Parameter, i64::from(*index), name.clone())
        }
        ValueKind::Phi => (RecordValueKind::Phi, 0, None),
        ValueKind::UnaryArithmetic { kind, flags } => (
            RecordValueKind::UnaryArithmetic,
            pack_kind_and_flags(*kind as u32, flags.bits()),
            None,
        ),
        ValueKind::BinaryArithmetic { kind, flags } => (
            RecordValueKind::BinaryArithmetic,
            pack_kind_and_flags(*kind as u32, flags.bits()),
            None,
        ),
        ValueKind::TernaryArithmetic { kind, flags } => (
            RecordValueKind::TernaryArithmetic,
            pack_kind_and_flags(*kind as u32, flags.bits()),
            None,
        ),
        ValueKind::Compare { kind, flags } => (
            RecordValueKind::Compare,
            pack_kind_and_flags(*kind as u32, flags.bits()),
            None,
        ),
        // Flags word only; source and target types are recoverable from
        // the operand's and the value's type ids.
        ValueKind::Convert { flags } => {
            (RecordValueKind::Convert, i64::from(flags.bits()), None)
        }
        ValueKind::PointerCast => (RecordValueKind::PointerCast, 0, None),
        ValueKind::AddressSpaceCast { space } => (
            RecordValueKind::AddressSpaceCast,
            *space as u8 as i64,
            None,
        ),
        ValueKind::Alloca { space } => (RecordValueKind::Alloca, *space as u8 as i64, None),
        ValueKind::Load => (RecordValueKind::Load, 0, None),
        ValueKind::Store => (RecordValueKind::Store, 0, None),
        ValueKind::LoadElementAddress => (RecordValueKind::LoadElementAddress, 0, None),
        ValueKind::LoadFieldAddress { field } => {
            (RecordValueKind::LoadFieldAddress, i64::from(*field), None)
        }
        ValueKind::NewView => (RecordValueKind::NewView, 0, None),
        ValueKind::SubView => (RecordValueKind::SubView, 0, None),
        ValueKind::GetViewLength => (RecordValueKind::GetViewLength, 0, None),
        ValueKind::NewArray { dimensions } => {
            (RecordValueKind::NewArray, i64::from(*dimensions), None)
        }
        ValueKind::GetArrayLength => (RecordValueKind::GetArrayLength, 0, None),
        ValueKind::GetField { field } => (RecordValueKind::GetField, i64::from(*field), None),
        ValueKind::SetField { field } => (RecordValueKind::SetField, i64::from(*field), None),
        ValueKind::StructureValue => (RecordValueKind::StructureValue, 0, None),
        ValueKind::PrimitiveValue { value } => {
            (RecordValueKind::PrimitiveValue, value.raw as i64, None)
        }
        ValueKind::StringValue { value } => {
            (RecordValueKind::StringValue, 0, Some(value.clone()))
        }
        ValueKind::NullValue => (RecordValueKind::NullValue, 0, None),
        ValueKind::UndefinedValue => (RecordValueKind::UndefinedValue, 0, None),
        ValueKind::DeviceConstant { kind, dimension } => (
            RecordValueKind::DeviceConstant,
            pack_kind_and_flags(*kind as u32, *dimension as u32),
            None,
        ),
        ValueKind::Barrier => (RecordValueKind::Barrier, 0, None),
        ValueKind::PredicateBarrier { kind } => {
            (RecordValueKind::PredicateBarrier, *kind as u32 as i64, None)
        }
        ValueKind::Broadcast { kind } => {
            (RecordValueKind::Broadcast, *kind as u32 as i64, None)
        }
        ValueKind::WarpShuffle { kind } => {
            (RecordValueKind::WarpShuffle, *kind as u32 as i64, None)
        }
        ValueKind::SubWarpShuffle { kind } => {
            (RecordValueKind::SubWarpShuffle, *kind as u32 as i64, None)
        }
        ValueKind::Atomic { kind, flags } => (
            RecordValueKind::Atomic,
            pack_kind_and_flags(*kind as u32, flags.bits()),
            None,
        ),
        ValueKind::AtomicCas => (RecordValueKind::AtomicCas, 0, None),
        // The callee is referenced by its method record id.
        ValueKind::MethodCall { target } => (
            RecordValueKind::MethodCall,
            ctx.method(*target).id().0 as i64,
            None,
        ),
        ValueKind::DebugAssert { message } => {
            (RecordValueKind::DebugAssert, 0, Some(message.clone()))
        }
        ValueKind::WriteToOutput { format } => {
            (RecordValueKind::WriteToOutput, 0, Some(format.clone()))
        }
        ValueKind::HandleValue { tag } => (RecordValueKind::HandleValue, 0, Some(tag.clone())),
        ValueKind::LanguageEmit { expression } => {
            (RecordValueKind::LanguageEmit, 0, Some(expression.clone()))
        }
        ValueKind::Return => (RecordValueKind::Return, 0, None),
        ValueKind::UnconditionalBranch => (RecordValueKind::UnconditionalBranch, 0, None),
        ValueKind::IfBranch { flags } => {
            (RecordValueKind::IfBranch, *flags as u32 as i64, None)
        }
        ValueKind::SwitchBranch => (RecordValueKind::SwitchBranch, 0, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpuir_core::{ContextFlags, Location, MethodDeclaration, TypeId};

    // S1 export shape: 1 method, 1 block, 2 values, 1 type.
    #[test]
    fn identity_method_exports_minimal_container() {
        let mut ctx = IrContext::new(ContextFlags::empty());
        let m = ctx
            .declare(MethodDeclaration::new("identity", TypeId::INT32))
            .unwrap();
        let mut mb = ctx.create_builder(m).unwrap();
        let entry = mb.create_basic_block(Location::Unknown);
        let p = mb.add_parameter(TypeId::INT32, Some("x")).unwrap();
        mb.block(entry)
            .create_return(Location::Unknown, Some(p))
            .unwrap();
        mb.complete().unwrap();

        let container = export_method(&ctx, m);
        assert_eq!(container.methods.len(), 1);
        assert_eq!(container.methods[0].blocks.len(), 1);
        assert_eq!(container.values.len(), 2);
        assert_eq!(container.types.len(), 1);
        assert_eq!(container.types[0].class, TypeClass::Primitive);

        let parameter = &container.values[0];
        assert_eq!(parameter.value_kind, RecordValueKind::Parameter);
        assert_eq!(parameter.block_id, NO_BLOCK_ID);
        assert_eq!(parameter.tag.as_deref(), Some("x"));

        let ret = &container.values[1];
        assert_eq!(ret.value_kind, RecordValueKind::Return);
        assert_eq!(ret.type_id, VOID_TYPE_ID);
        assert_eq!(ret.nodes, vec![parameter.id]);
        assert_eq!(ret.block_id, container.methods[0].blocks[0]);
    }

    #[test]
    fn type_records_arrive_dependency_ordered() {
        let mut ctx = IrContext::new(ContextFlags::empty());
        let mut sb = ctx.types_mut().structure();
        sb.add_field(TypeId::INT32).add_field(TypeId::INT64);
        let s = sb.seal();
        let ptr = ctx.types_mut().pointer(s, gpuir_core::AddressSpace::Global);

        let m = ctx
            .declare(MethodDeclaration::new("takes_ptr", TypeId::VOID))
            .unwrap();
        let mut mb = ctx.create_builder(m).unwrap();
        let entry = mb.create_basic_block(Location::Unknown);
        mb.add_parameter(ptr, None).unwrap();
        mb.block(entry)
            .create_return(Location::Unknown, None)
            .unwrap();
        mb.complete().unwrap();

        let container = export_method(&ctx, m);
        // Int32, Int64, structure, pointer: children before parents.
        let position = |id: i64| container.types.iter().position(|t| t.id == id).unwrap();
        let ptr_record = container
            .types
            .iter()
            .find(|t| t.class == TypeClass::Pointer)
            .unwrap();
        let struct_id = ptr_record.nodes[0];
        assert!(position(struct_id) < position(ptr_record.id));
        let struct_record = container.types.iter().find(|t| t.id == struct_id).unwrap();
        for &field in &struct_record.nodes {
            assert!(position(field) < position(struct_id));
        }
    }

    #[test]
    fn replaced_values_are_not_exported() {
        let mut ctx = IrContext::new(ContextFlags::empty());
        let m = ctx
            .declare(MethodDeclaration::new("folded", TypeId::INT32))
            .unwrap();
        let mut mb = ctx.create_builder(m).unwrap();
        let entry = mb.create_basic_block(Location::Unknown);
        let p = mb.add_parameter(TypeId::INT32, None).unwrap();
        let mut bb = mb.block(entry);
        let dup = bb
            .create_binary_arithmetic(
                Location::Unknown,
                gpuir_core::BinaryArithKind::Add,
                p,
                p,
                gpuir_core::ArithFlags::empty(),
            )
            .unwrap();
        bb.create_return(Location::Unknown, Some(dup)).unwrap();
        mb.replace_and_remove(dup, p).unwrap();
        mb.complete().unwrap();

        let container = export_method(&ctx, m);
        // Parameter and return only; the return operand resolved to the
        // parameter.
        assert_eq!(container.values.len(), 2);
        let ret = container
            .values
            .iter()
            .find(|v| v.value_kind == RecordValueKind::Return)
            .unwrap();
        let parameter = container
            .values
            .iter()
            .find(|v| v.value_kind == RecordValueKind::Parameter)
            .unwrap();
        assert_eq!(ret.nodes, vec![parameter.id]);
    }
}
