//! Rebuilding a context from a flat container.
//!
//! Import is tolerant of arbitrary record order: type records are
//! topologically sorted by their `nodes` dependencies (cycles are
//! rejected), blocks are pre-allocated before any value exists, values are
//! materialized as raw slots in recorded order, and all operand and phi
//! edges are bound in a second pass once every id resolves. Each rebuilt
//! method goes through the normal builder completion, so an imported
//! method is verified like a hand-built one.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use gpuir_core::{
    AddressSpace, ArithFlags, AtomicKind, BasicValueType, BinaryArithKind, BlockId,
    BranchFlags, BroadcastKind, CompareFlags, CompareKind, ContextFlags, ConvertFlags,
    DeviceConstantKind, Dimension, IrContext, Location, MethodDeclaration, MethodId,
    PredicateBarrierKind, PrimitiveConstant, ShuffleKind, TernaryArithKind, TypeId,
    UnaryArithKind, ValueId, ValueKind,
};

use crate::error::ImportError;
use crate::records::{
    unpack_kind_and_flags, Container, IrTypeRecord, IrValueRecord, RecordValueKind, TypeClass,
};

/// Rebuilds a fresh context from `container`.
pub fn import_container(container: &Container) -> Result<IrContext, ImportError> {
    import_container_with_flags(container, ContextFlags::empty())
}

/// Rebuilds a fresh context with the given flags.
pub fn import_container_with_flags(
    container: &Container,
    flags: ContextFlags,
) -> Result<IrContext, ImportError> {
    let mut ctx = IrContext::new(flags);

    let type_map = import_types(container, &mut ctx)?;
    let type_of = |id: i64| -> Result<TypeId, ImportError> {
        if id < 0 {
            return Ok(TypeId::VOID);
        }
        type_map.get(&id).copied().ok_or(ImportError::MissingType(id))
    };

    // Declare all methods first, so call edges resolve in any order.
    let mut method_map: HashMap<i64, MethodId> = HashMap::new();
    for record in &container.methods {
        let declaration =
            MethodDeclaration::new(record.name.clone(), type_of(record.return_type_id)?);
        let handle = ctx.declare(declaration)?;
        if method_map.insert(record.id, handle).is_some() {
            return Err(ImportError::DuplicateId(record.id));
        }
    }

    for record in &container.methods {
        import_method(container, &mut ctx, record.id, &method_map, &type_of)?;
    }
    Ok(ctx)
}

/// Topologically sorts and re-interns the type records.
fn import_types(
    container: &Container,
    ctx: &mut IrContext,
) -> Result<HashMap<i64, TypeId>, ImportError> {
    let mut indices: HashMap<i64, NodeIndex> = HashMap::new();
    let mut graph: DiGraph<i64, ()> = DiGraph::new();
    for record in &container.types {
        if indices.insert(record.id, graph.add_node(record.id)).is_some() {
            return Err(ImportError::DuplicateId(record.id));
        }
    }
    let by_id: HashMap<i64, &IrTypeRecord> = container
        .types
        .iter()
        .map(|record| (record.id, record))
        .collect();
    for record in &container.types {
        for &child in &record.nodes {
            let Some(&child_index) = indices.get(&child) else {
                return Err(ImportError::MissingType(child));
            };
            graph.add_edge(child_index, indices[&record.id], ());
        }
    }

    let order = toposort(&graph, None)
        .map_err(|cycle| ImportError::TypeCycle(graph[cycle.node_id()]))?;

    let mut type_map: HashMap<i64, TypeId> = HashMap::new();
    for index in order {
        let record = by_id[&graph[index]];
        let child = |position: usize| -> Result<TypeId, ImportError> {
            let id = *record
                .nodes
                .get(position)
                .ok_or_else(|| ImportError::MalformedType {
                    id: record.id,
                    reason: format!("missing child at position {position}"),
                })?;
            type_map.get(&id).copied().ok_or(ImportError::MissingType(id))
        };
        let basic = || -> Result<BasicValueType, ImportError> {
            record
                .basic_value_type
                .ok_or_else(|| ImportError::MalformedType {
                    id: record.id,
                    reason: "missing basic value type".into(),
                })
        };
        let space = || -> Result<AddressSpace, ImportError> {
            AddressSpace::from_raw(record.data as u8).ok_or_else(|| {
                ImportError::MalformedType {
                    id: record.id,
                    reason: format!("unknown address space {}", record.data),
                }
            })
        };

        let mapped = match record.class {
            TypeClass::Void => ctx.types().void(),
            TypeClass::String => ctx.types().string(),
            TypeClass::Primitive => ctx.types().primitive(basic()?),
            TypeClass::Padding => {
                let basic = basic()?;
                ctx.types_mut().padding(basic)
            }
            TypeClass::Pointer => {
                let (element, space) = (child(0)?, space()?);
                ctx.types_mut().pointer(element, space)
            }
            TypeClass::View => {
                let (element, space) = (child(0)?, space()?);
                ctx.types_mut().view(element, space)
            }
            TypeClass::Array => {
                let element = child(0)?;
                ctx.types_mut().array(element, record.data as u32)
            }
            TypeClass::Structure => {
                let fields: Vec<TypeId> = (0..record.nodes.len())
                    .map(child)
                    .collect::<Result<_, _>>()?;
                let mut builder = ctx.types_mut().structure();
                for field in fields {
                    builder.add_field(field);
                }
                builder.seal()
            }
        };
        type_map.insert(record.id, mapped);
    }
    Ok(type_map)
}

fn import_method(
    container: &Container,
    ctx: &mut IrContext,
    method_record_id: i64,
    method_map: &HashMap<i64, MethodId>,
    type_of: &impl Fn(i64) -> Result<TypeId, ImportError>,
) -> Result<(), ImportError> {
    let record = container
        .methods
        .iter()
        .find(|m| m.id == method_record_id)
        .ok_or(ImportError::MissingMethod(method_record_id))?;
    let handle = method_map[&method_record_id];

    // Records of this method: parameters ordered by index, then body
    // values in container order.
    let mut parameters: Vec<&IrValueRecord> = Vec::new();
    let mut body: Vec<&IrValueRecord> = Vec::new();
    for value in &container.values {
        if value.method_id != method_record_id {
            continue;
        }
        if value.block_id < 0 {
            if value.value_kind != RecordValueKind::Parameter {
                return Err(ImportError::MalformedValue {
                    id: value.id,
                    reason: "only parameters may live outside a block".into(),
                });
            }
            parameters.push(value);
        } else {
            body.push(value);
        }
    }
    parameters.sort_by_key(|record| record.data);

    let mut builder = ctx.create_builder(handle).map_err(ImportError::Ir)?;

    // Pre-allocate all blocks.
    let mut block_map: HashMap<i64, BlockId> = HashMap::new();
    for &block_id in &record.blocks {
        let block = builder.create_basic_block(Location::Unknown);
        if block_map.insert(block_id, block).is_some() {
            return Err(ImportError::DuplicateId(block_id));
        }
    }

    // First pass: materialize every value slot in recorded order.
    let mut value_map: HashMap<i64, ValueId> = HashMap::new();
    for value in parameters.iter().chain(body.iter()) {
        let block = match value.block_id {
            id if id < 0 => None,
            id => Some(
                *block_map
                    .get(&id)
                    .ok_or(ImportError::MissingBlock(id))?,
            ),
        };
        let kind = decode_kind(value, method_map, type_of(value.type_id).ok())?;
        let slot = builder
            .append_raw_value(block, kind, type_of(value.type_id)?, Location::Unknown)
            .map_err(ImportError::Ir)?;
        if value_map.insert(value.id, slot).is_some() {
            return Err(ImportError::DuplicateId(value.id));
        }
    }

    // Second pass: bind operand and block edges now that every id resolves.
    for value in parameters.iter().chain(body.iter()) {
        let slot = value_map[&value.id];
        let resolve_value = |id: i64| -> Result<ValueId, ImportError> {
            value_map.get(&id).copied().ok_or(ImportError::MissingValue(id))
        };
        let resolve_block = |id: i64| -> Result<BlockId, ImportError> {
            block_map.get(&id).copied().ok_or(ImportError::MissingBlock(id))
        };

        let (operands, block_operands) = match value.value_kind {
            RecordValueKind::Phi => {
                if value.nodes.len() % 2 != 0 {
                    return Err(ImportError::MalformedValue {
                        id: value.id,
                        reason: "phi nodes must pair source blocks with values".into(),
                    });
                }
                let mut operands = Vec::with_capacity(value.nodes.len() / 2);
                let mut sources = Vec::with_capacity(value.nodes.len() / 2);
                for pair in value.nodes.chunks_exact(2) {
                    sources.push(resolve_block(pair[0])?);
                    operands.push(resolve_value(pair[1])?);
                }
                (operands, sources)
            }
            kind => {
                let target_count = match kind {
                    RecordValueKind::Return => 0,
                    RecordValueKind::UnconditionalBranch => value.nodes.len(),
                    RecordValueKind::IfBranch | RecordValueKind::SwitchBranch => {
                        value.nodes.len().saturating_sub(1)
                    }
                    _ => 0,
                };
                let operand_count = value.nodes.len() - target_count;
                let operands = value.nodes[..operand_count]
                    .iter()
                    .map(|&id| resolve_value(id))
                    .collect::<Result<Vec<_>, _>>()?;
                let block_operands = value.nodes[operand_count..]
                    .iter()
                    .map(|&id| resolve_block(id))
                    .collect::<Result<Vec<_>, _>>()?;
                (operands, block_operands)
            }
        };
        builder
            .bind_operands(slot, &operands, &block_operands)
            .map_err(ImportError::Ir)?;
    }

    builder.complete().map_err(ImportError::Ir)
}

fn decode_kind(
    record: &IrValueRecord,
    method_map: &HashMap<i64, MethodId>,
    mapped_type: Option<TypeId>,
) -> Result<ValueKind, ImportError> {
    let malformed = |reason: String| ImportError::MalformedValue {
        id: record.id,
        reason,
    };
    let (kind_code, flags_code) = unpack_kind_and_flags(record.data);
    let arith_flags = || {
        ArithFlags::from_bits(flags_code)
            .ok_or_else(|| malformed(format!("unknown arithmetic flags {flags_code:#x}")))
    };
    let tag = || {
        record
            .tag
            .clone()
            .ok_or_else(|| malformed("missing string tag".into()))
    };

    Ok(match record.value_kind {
        RecordValueKind::Parameter => ValueKind::Parameter {
            index: record.data as u32,
            name: record.tag.clone(),
        },
        RecordValueKind::Phi => ValueKind::Phi,
        RecordValueKind::UnaryArithmetic => ValueKind::UnaryArithmetic {
            kind: unary_from_code(kind_code)
                .ok_or_else(|| malformed(format!("unknown unary kind {kind_code}")))?,
            flags: arith_flags()?,
        },
        RecordValueKind::BinaryArithmetic => ValueKind::BinaryArithmetic {
            kind: binary_from_code(kind_code)
                .ok_or_else(|| malformed(format!("unknown binary kind {kind_code}")))?,
            flags: arith_flags()?,
        },
        RecordValueKind::TernaryArithmetic => ValueKind::TernaryArithmetic {
            kind: ternary_from_code(kind_code)
                .ok_or_else(|| malformed(format!("unknown ternary kind {kind_code}")))?,
            flags: arith_flags()?,
        },
        RecordValueKind::Compare => ValueKind::Compare {
            kind: compare_from_code(kind_code)
                .ok_or_else(|| malformed(format!("unknown compare kind {kind_code}")))?,
            flags: CompareFlags::from_bits(flags_code)
                .ok_or_else(|| malformed(format!("unknown compare flags {flags_code:#x}")))?,
        },
        RecordValueKind::Convert => ValueKind::Convert {
            flags: ConvertFlags::from_bits(record.data as u32)
                .ok_or_else(|| malformed(format!("unknown convert flags {}", record.data)))?,
        },
        RecordValueKind::PointerCast => ValueKind::PointerCast,
        RecordValueKind::AddressSpaceCast => ValueKind::AddressSpaceCast {
            space: AddressSpace::from_raw(record.data as u8)
                .ok_or_else(|| malformed(format!("unknown address space {}", record.data)))?,
        },
        RecordValueKind::Alloca => ValueKind::Alloca {
            space: AddressSpace::from_raw(record.data as u8)
                .ok_or_else(|| malformed(format!("unknown address space {}", record.data)))?,
        },
        RecordValueKind::Load => ValueKind::Load,
        RecordValueKind::Store => ValueKind::Store,
        RecordValueKind::LoadElementAddress => ValueKind::LoadElementAddress,
        RecordValueKind::LoadFieldAddress => ValueKind::LoadFieldAddress {
            field: record.data as u32,
        },
        RecordValueKind::NewView => ValueKind::NewView,
        RecordValueKind::SubView => ValueKind::SubView,
        RecordValueKind::GetViewLength => ValueKind::GetViewLength,
        RecordValueKind::NewArray => ValueKind::NewArray {
            dimensions: record.data as u32,
        },
        RecordValueKind::GetArrayLength => ValueKind::GetArrayLength,
        RecordValueKind::GetField => ValueKind::GetField {
            field: record.data as u32,
        },
        RecordValueKind::SetField => ValueKind::SetField {
            field: record.data as u32,
        },
        RecordValueKind::StructureValue => ValueKind::StructureValue,
        RecordValueKind::PrimitiveValue => {
            let basic = mapped_type
                .and_then(intrinsic_basic)
                .ok_or_else(|| malformed("primitive value without primitive type".into()))?;
            ValueKind::PrimitiveValue {
                value: PrimitiveConstant::from_raw(basic, record.data as u64),
            }
        }
        RecordValueKind::StringValue => ValueKind::StringValue { value: tag()? },
        RecordValueKind::NullValue => ValueKind::NullValue,
        RecordValueKind::UndefinedValue => ValueKind::UndefinedValue,
        RecordValueKind::DeviceConstant => ValueKind::DeviceConstant {
            kind: device_constant_from_code(kind_code)
                .ok_or_else(|| malformed(format!("unknown device constant {kind_code}")))?,
            dimension: dimension_from_code(flags_code)
                .ok_or_else(|| malformed(format!("unknown dimension {flags_code}")))?,
        },
        RecordValueKind::Barrier => ValueKind::Barrier,
        RecordValueKind::PredicateBarrier => ValueKind::PredicateBarrier {
            kind: predicate_barrier_from_code(record.data as u32)
                .ok_or_else(|| malformed(format!("unknown barrier kind {}", record.data)))?,
        },
        RecordValueKind::Broadcast => ValueKind::Broadcast {
            kind: broadcast_from_code(record.data as u32)
                .ok_or_else(|| malformed(format!("unknown broadcast kind {}", record.data)))?,
        },
        RecordValueKind::WarpShuffle => ValueKind::WarpShuffle {
            kind: shuffle_from_code(record.data as u32)
                .ok_or_else(|| malformed(format!("unknown shuffle kind {}", record.data)))?,
        },
        RecordValueKind::SubWarpShuffle => ValueKind::SubWarpShuffle {
            kind: shuffle_from_code(record.data as u32)
                .ok_or_else(|| malformed(format!("unknown shuffle kind {}", record.data)))?,
        },
        RecordValueKind::Atomic => ValueKind::Atomic {
            kind: atomic_from_code(kind_code)
                .ok_or_else(|| malformed(format!("unknown atomic kind {kind_code}")))?,
            flags: arith_flags()?,
        },
        RecordValueKind::AtomicCas => ValueKind::AtomicCas,
        RecordValueKind::MethodCall => ValueKind::MethodCall {
            target: *method_map
                .get(&record.data)
                .ok_or(ImportError::MissingMethod(record.data))?,
        },
        RecordValueKind::DebugAssert => ValueKind::DebugAssert { message: tag()? },
        RecordValueKind::WriteToOutput => ValueKind::WriteToOutput { format: tag()? },
        RecordValueKind::HandleValue => ValueKind::HandleValue { tag: tag()? },
        RecordValueKind::LanguageEmit => ValueKind::LanguageEmit { expression: tag()? },
        RecordValueKind::Return => ValueKind::Return,
        RecordValueKind::UnconditionalBranch => ValueKind::UnconditionalBranch,
        RecordValueKind::IfBranch => ValueKind::IfBranch {
            flags: branch_flags_from_code(record.data as u32)
                .ok_or_else(|| malformed(format!("unknown branch flags {}", record.data)))?,
        },
        RecordValueKind::SwitchBranch => ValueKind::SwitchBranch,
    })
}

// Decoding tables for the `#[repr(u32)]` kind enums.

/// The basic type behind a pre-registered primitive id. Primitives always
/// re-intern to their intrinsic ids, so this covers every mapped primitive.
fn intrinsic_basic(ty: TypeId) -> Option<BasicValueType> {
    match ty {
        TypeId::INT1 => Some(BasicValueType::Int1),
        TypeId::INT8 => Some(BasicValueType::Int8),
        TypeId::INT16 => Some(BasicValueType::Int16),
        TypeId::INT32 => Some(BasicValueType::Int32),
        TypeId::INT64 => Some(BasicValueType::Int64),
        TypeId::FLOAT8_E4M3 => Some(BasicValueType::Float8E4M3),
        TypeId::FLOAT8_E5M2 => Some(BasicValueType::Float8E5M2),
        TypeId::BFLOAT16 => Some(BasicValueType::BFloat16),
        TypeId::FLOAT16 => Some(BasicValueType::Float16),
        TypeId::FLOAT32 => Some(BasicValueType::Float32),
        TypeId::FLOAT64 => Some(BasicValueType::Float64),
        _ => None,
    }
}

fn unary_from_code(code: u32) -> Option<UnaryArithKind> {
    Some(match code {
        0 => UnaryArithKind::Neg,
        1 => UnaryArithKind::Not,
        2 => UnaryArithKind::Abs,
        3 => UnaryArithKind::Sqrt,
        _ => return None,
    })
}

fn binary_from_code(code: u32) -> Option<BinaryArithKind> {
    Some(match code {
        0 => BinaryArithKind::Add,
        1 => BinaryArithKind::Sub,
        2 => BinaryArithKind::Mul,
        3 => BinaryArithKind::Div,
        4 => BinaryArithKind::Rem,
        5 => BinaryArithKind::And,
        6 => BinaryArithKind::Or,
        7 => BinaryArithKind::Xor,
        8 => BinaryArithKind::Shl,
        9 => BinaryArithKind::Shr,
        10 => BinaryArithKind::Min,
        11 => BinaryArithKind::Max,
        _ => return None,
    })
}

fn ternary_from_code(code: u32) -> Option<TernaryArithKind> {
    (code == 0).then_some(TernaryArithKind::MultiplyAdd)
}

fn compare_from_code(code: u32) -> Option<CompareKind> {
    Some(match code {
        0 => CompareKind::Eq,
        1 => CompareKind::Ne,
        2 => CompareKind::Lt,
        3 => CompareKind::Le,
        4 => CompareKind::Gt,
        5 => CompareKind::Ge,
        _ => return None,
    })
}

fn atomic_from_code(code: u32) -> Option<AtomicKind> {
    Some(match code {
        0 => AtomicKind::Exchange,
        1 => AtomicKind::Add,
        2 => AtomicKind::And,
        3 => AtomicKind::Or,
        4 => AtomicKind::Xor,
        5 => AtomicKind::Min,
        6 => AtomicKind::Max,
        _ => return None,
    })
}

fn predicate_barrier_from_code(code: u32) -> Option<PredicateBarrierKind> {
    Some(match code {
        0 => PredicateBarrierKind::And,
        1 => PredicateBarrierKind::Or,
        2 => PredicateBarrierKind::PopCount,
        _ => return None,
    })
}

fn broadcast_from_code(code: u32) -> Option<BroadcastKind> {
    Some(match code {
        0 => BroadcastKind::Group,
        1 => BroadcastKind::Warp,
        _ => return None,
    })
}

fn shuffle_from_code(code: u32) -> Option<ShuffleKind> {
    Some(match code {
        0 => ShuffleKind::Generic,
        1 => ShuffleKind::Up,
        2 => ShuffleKind::Down,
        3 => ShuffleKind::Xor,
        _ => return None,
    })
}

fn device_constant_from_code(code: u32) -> Option<DeviceConstantKind> {
    Some(match code {
        0 => DeviceConstantKind::GridIndex,
        1 => DeviceConstantKind::GroupIndex,
        2 => DeviceConstantKind::GridDimension,
        3 => DeviceConstantKind::GroupDimension,
        4 => DeviceConstantKind::WarpSize,
        5 => DeviceConstantKind::LaneIndex,
        _ => return None,
    })
}

fn dimension_from_code(code: u32) -> Option<Dimension> {
    Some(match code {
        0 => Dimension::X,
        1 => Dimension::Y,
        2 => Dimension::Z,
        _ => return None,
    })
}

fn branch_flags_from_code(code: u32) -> Option<BranchFlags> {
    Some(match code {
        0 => BranchFlags::None,
        1 => BranchFlags::BackwardEdge,
        2 => BranchFlags::LoopBreakEdge,
        _ => return None,
    })
}
