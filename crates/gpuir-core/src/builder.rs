//! Method and block builders.
//!
//! All IR construction and mutation happens inside a [`MethodBuilder`]
//! session obtained from [`IrContext::create_builder`]. The method builder
//! creates blocks and parameters and hands out per-block [`BlockBuilder`]s,
//! whose factories validate operand shape and typing for every value kind
//! and may fold deterministic operations over constant operands.
//!
//! [`MethodBuilder::complete`] finalizes the session: it runs a control-flow
//! update, verifies the structural invariants, and releases the builder.
//! Dropping a builder without completing releases it without verification.

use std::collections::HashMap;

use smallvec::{smallvec, SmallVec};

use crate::context::{ContextFlags, IrContext};
use crate::error::IrError;
use crate::id::{BlockId, MethodId, ValueId};
use crate::location::Location;
use crate::method::Method;
use crate::ops::{
    ArithFlags, AtomicKind, BinaryArithKind, BranchFlags, BroadcastKind, CompareFlags,
    CompareKind, ConvertFlags, DeviceConstantKind, Dimension, PredicateBarrierKind,
    PrimitiveConstant, ShuffleKind, TernaryArithKind, UnaryArithKind,
};
use crate::rewriter::Rewriter;
use crate::types::{AddressSpace, BasicValueType, TypeNode};
use crate::universe::TypeId;
use crate::value::{Value, ValueKind};
use crate::verify;

/// An exclusive builder session on one method.
pub struct MethodBuilder<'ctx> {
    ctx: &'ctx mut IrContext,
    method: MethodId,
    released: bool,
    /// Per-session constant cache keyed by (block, type, bits).
    constants: HashMap<(BlockId, BasicValueType, u64), ValueId>,
}

impl<'ctx> MethodBuilder<'ctx> {
    pub(crate) fn new(ctx: &'ctx mut IrContext, method: MethodId) -> Self {
        MethodBuilder {
            ctx,
            method,
            released: false,
            constants: HashMap::new(),
        }
    }

    /// The method under construction.
    pub fn method(&self) -> &Method {
        self.ctx.method(self.method)
    }

    pub fn handle(&self) -> MethodId {
        self.method
    }

    pub fn context(&self) -> &IrContext {
        self.ctx
    }

    fn method_mut(&mut self) -> &mut Method {
        self.ctx.method_mut(self.method)
    }

    fn folding_enabled(&self) -> bool {
        !self
            .ctx
            .flags()
            .contains(ContextFlags::DISABLE_CONSTANT_PROPAGATION)
    }

    // -----------------------------------------------------------------------
    // Structure
    // -----------------------------------------------------------------------

    /// Appends a fresh block to the method. The first block becomes the
    /// entry.
    pub fn create_basic_block(&mut self, location: Location) -> BlockId {
        let id = self.ctx.new_node_id();
        let method = self.method_mut();
        method.mark_dirty();
        method.alloc_block(id, location)
    }

    /// Appends a parameter. Legal only before the first instruction is
    /// placed.
    pub fn add_parameter(
        &mut self,
        ty: TypeId,
        name: Option<&str>,
    ) -> Result<ValueId, IrError> {
        if ty == TypeId::VOID {
            return Err(IrError::argument_out_of_range("parameter of void type"));
        }
        let has_instructions = self
            .method()
            .block_ids()
            .any(|b| !self.method().block(b).values().is_empty()
                || self.method().block(b).terminator().is_some());
        if has_instructions {
            return Err(IrError::invalid_operation(
                "parameters must be added before the first instruction",
            ));
        }
        let id = self.ctx.new_node_id();
        let index = self.method().num_parameters() as u32;
        let name = name.map(str::to_owned);
        let method = self.method_mut();
        let value = method.alloc_value(Value {
            id,
            kind: ValueKind::Parameter { index, name },
            ty,
            operands: SmallVec::new(),
            block_operands: SmallVec::new(),
            block: None,
            location: Location::Unknown,
        });
        method.parameters.push(value);
        method.mark_dirty();
        Ok(value)
    }

    /// Opens a block builder targeting `block`.
    pub fn block(&mut self, block: BlockId) -> BlockBuilder<'_, 'ctx> {
        assert!(
            block.index() < self.method().num_blocks(),
            "unknown block handle {block}"
        );
        BlockBuilder {
            builder: self,
            block,
        }
    }

    // -----------------------------------------------------------------------
    // Replacement and removal
    // -----------------------------------------------------------------------

    /// Directs `old`'s forwarding pointer to `new`; reads through `old`
    /// transparently yield `new` from now on. The owning block still holds
    /// `old` until removal or the next compaction.
    pub fn replace(&mut self, old: ValueId, new: ValueId) -> Result<(), IrError> {
        let method = self.method();
        if method.resolve(new) == old {
            return Err(IrError::invalid_operation(
                "replacement target resolves to the replaced value",
            ));
        }
        self.method_mut().forward(old, new);
        Ok(())
    }

    /// Replaces `old` by `new` and logically removes the old slot.
    pub fn replace_and_remove(&mut self, old: ValueId, new: ValueId) -> Result<(), IrError> {
        self.replace(old, new)?;
        self.method_mut().remove_value(old);
        Ok(())
    }

    /// Logical removal; physical removal happens at the next compaction.
    pub fn remove(&mut self, value: ValueId) -> Result<(), IrError> {
        if self.method().is_removed(value) {
            return Err(IrError::invalid_operation("value was already removed"));
        }
        self.method_mut().remove_value(value);
        Ok(())
    }

    /// Opens a rewriter over this session.
    pub fn rewriter(&mut self) -> Rewriter<'_, 'ctx> {
        Rewriter::new(self)
    }

    // -----------------------------------------------------------------------
    // Phis
    // -----------------------------------------------------------------------

    /// Registers an incoming `(source block, value)` edge on a phi. The
    /// value must share the phi's declared type or be undefined.
    pub fn add_phi_incoming(
        &mut self,
        phi: ValueId,
        source: BlockId,
        value: ValueId,
    ) -> Result<(), IrError> {
        let method = self.method();
        let node = method.value(method.resolve(phi));
        if !matches!(node.kind, ValueKind::Phi) {
            return Err(IrError::invalid_operation("value is not a phi"));
        }
        let phi_ty = node.ty;
        let location = node.location.clone();
        let resolved = method.resolve(value);
        let incoming = method.value(resolved);
        if incoming.ty != phi_ty && !matches!(incoming.kind, ValueKind::UndefinedValue) {
            return Err(IrError::invalid_program(
                &location,
                "phi incoming value type differs from the phi type",
            ));
        }
        if source.index() >= method.num_blocks() {
            return Err(IrError::argument_out_of_range(format!(
                "unknown source block {source}"
            )));
        }
        let target = method.resolve(phi);
        let method = self.method_mut();
        let node = method.value_mut(target);
        node.operands.push(value);
        node.block_operands.push(source);
        method.mark_dirty();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Raw import surface
    // -----------------------------------------------------------------------

    /// Allocates a value slot with kind, type, and placement but no
    /// operands. Terminator kinds seal the block; `block = None` is legal
    /// only for parameters. Used by importers that materialize values in
    /// recorded order before their operands exist; operands are patched in
    /// afterwards with [`MethodBuilder::bind_operands`].
    pub fn append_raw_value(
        &mut self,
        block: Option<BlockId>,
        kind: ValueKind,
        ty: TypeId,
        location: Location,
    ) -> Result<ValueId, IrError> {
        let id = self.ctx.new_node_id();
        match block {
            None => {
                if !matches!(kind, ValueKind::Parameter { .. }) {
                    return Err(IrError::invalid_operation(
                        "only parameters may live outside a block",
                    ));
                }
                let method = self.method_mut();
                let value = method.alloc_value(Value {
                    id,
                    kind,
                    ty,
                    operands: SmallVec::new(),
                    block_operands: SmallVec::new(),
                    block: None,
                    location,
                });
                method.parameters.push(value);
                method.mark_dirty();
                Ok(value)
            }
            Some(block) => {
                if block.index() >= self.method().num_blocks() {
                    return Err(IrError::argument_out_of_range(format!(
                        "unknown block handle {block}"
                    )));
                }
                let is_terminator = kind.is_terminator();
                let method = self.method_mut();
                let value = method.alloc_value(Value {
                    id,
                    kind,
                    ty,
                    operands: SmallVec::new(),
                    block_operands: SmallVec::new(),
                    block: Some(block),
                    location,
                });
                if is_terminator {
                    if let Some(old) = method.block_mut(block).terminator.replace(value) {
                        method.remove_value(old);
                    }
                } else {
                    method.block_mut(block).values.push(value);
                }
                method.mark_dirty();
                Ok(value)
            }
        }
    }

    /// Patches the operand and block-operand lists of a raw value. Every
    /// referenced handle must already exist.
    pub fn bind_operands(
        &mut self,
        value: ValueId,
        operands: &[ValueId],
        block_operands: &[BlockId],
    ) -> Result<(), IrError> {
        let method = self.method();
        for &op in operands {
            if op.index() >= method.num_value_slots() {
                return Err(IrError::argument_out_of_range(format!(
                    "operand {op} does not resolve"
                )));
            }
        }
        for &b in block_operands {
            if b.index() >= method.num_blocks() {
                return Err(IrError::argument_out_of_range(format!(
                    "block operand {b} does not resolve"
                )));
            }
        }
        let method = self.method_mut();
        let node = method.value_mut(value);
        node.operands = SmallVec::from_slice(operands);
        node.block_operands = SmallVec::from_slice(block_operands);
        method.mark_dirty();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Completion
    // -----------------------------------------------------------------------

    /// Finalizes the method: runs a control-flow update, verifies the
    /// structural invariants, and releases the builder.
    pub fn complete(mut self) -> Result<(), IrError> {
        self.released = true;
        let method = self.ctx.method_mut(self.method);
        method.control_flow_update();
        let result = verify::verify_method(method);
        self.ctx.release_builder_slot();
        tracing::debug!(method = %self.method, ok = result.is_ok(), "builder completed");
        result
    }

    // -----------------------------------------------------------------------
    // Internals shared with block builders
    // -----------------------------------------------------------------------

    fn constant_in(
        &mut self,
        block: BlockId,
        location: Location,
        constant: PrimitiveConstant,
    ) -> ValueId {
        let key = (block, constant.basic, constant.raw);
        if self.folding_enabled() {
            if let Some(&cached) = self.constants.get(&key) {
                if !self.method().is_removed(cached) && !self.method().is_replaced(cached) {
                    return cached;
                }
            }
        }
        let id = self.ctx.new_node_id();
        let ty = self.ctx.types().primitive(constant.basic);
        let method = self.ctx.method_mut(self.method);
        let value = method.alloc_value(Value {
            id,
            kind: ValueKind::PrimitiveValue { value: constant },
            ty,
            operands: SmallVec::new(),
            block_operands: SmallVec::new(),
            block: Some(block),
            location,
        });
        method.block_mut(block).values.push(value);
        method.mark_dirty();
        if self.folding_enabled() {
            self.constants.insert(key, value);
        }
        value
    }
}

impl Drop for MethodBuilder<'_> {
    fn drop(&mut self) {
        if !self.released {
            // Abandoned session: release without verification.
            self.ctx.release_builder_slot();
            tracing::debug!(method = %self.method, "builder abandoned");
        }
    }
}

/// Value factories targeting one block of an open method builder.
pub struct BlockBuilder<'b, 'ctx> {
    builder: &'b mut MethodBuilder<'ctx>,
    block: BlockId,
}

impl BlockBuilder<'_, '_> {
    pub fn id(&self) -> BlockId {
        self.block
    }

    fn method(&self) -> &Method {
        self.builder.method()
    }

    fn push(
        &mut self,
        kind: ValueKind,
        ty: TypeId,
        operands: SmallVec<[ValueId; 2]>,
        block_operands: SmallVec<[BlockId; 2]>,
        location: Location,
    ) -> ValueId {
        let id = self.builder.ctx.new_node_id();
        let block = self.block;
        let is_terminator = kind.is_terminator();
        let method = self.builder.method_mut();
        let value = method.alloc_value(Value {
            id,
            kind,
            ty,
            operands,
            block_operands,
            block: Some(block),
            location,
        });
        if is_terminator {
            if let Some(old) = method.block_mut(block).terminator.replace(value) {
                method.remove_value(old);
            }
        } else {
            method.block_mut(block).values.push(value);
        }
        method.mark_dirty();
        value
    }

    fn resolved(&self, value: ValueId) -> &Value {
        let method = self.method();
        method.value(method.resolve(value))
    }

    fn type_of(&self, value: ValueId) -> TypeId {
        self.resolved(value).ty
    }

    fn node_of(&self, value: ValueId) -> &TypeNode {
        self.builder.ctx.types().node(self.type_of(value))
    }

    fn as_constant(&self, value: ValueId) -> Option<PrimitiveConstant> {
        match self.resolved(value).kind {
            ValueKind::PrimitiveValue { value } => Some(value),
            _ => None,
        }
    }

    fn expect_primitive(
        &self,
        value: ValueId,
        what: &str,
        location: &Location,
    ) -> Result<BasicValueType, IrError> {
        match *self.node_of(value) {
            TypeNode::Primitive(basic) => Ok(basic),
            _ => Err(IrError::invalid_program(
                location,
                format!("{what} must have a primitive type"),
            )),
        }
    }

    fn expect_int(
        &self,
        value: ValueId,
        what: &str,
        location: &Location,
    ) -> Result<BasicValueType, IrError> {
        let basic = self.expect_primitive(value, what, location)?;
        if !basic.is_int() {
            return Err(IrError::invalid_program(
                location,
                format!("{what} must have an integer type"),
            ));
        }
        Ok(basic)
    }

    fn expect_predicate(
        &self,
        value: ValueId,
        what: &str,
        location: &Location,
    ) -> Result<(), IrError> {
        if self.type_of(value) != TypeId::INT1 {
            return Err(IrError::invalid_program(
                location,
                format!("{what} must be an Int1 predicate"),
            ));
        }
        Ok(())
    }

    fn expect_block(&self, block: BlockId) -> Result<(), IrError> {
        if block.index() >= self.method().num_blocks() {
            return Err(IrError::argument_out_of_range(format!(
                "unknown block handle {block}"
            )));
        }
        Ok(())
    }

    fn address_payload(
        &self,
        value: ValueId,
        what: &str,
        location: &Location,
    ) -> Result<(TypeId, AddressSpace), IrError> {
        self.node_of(value).address_payload().ok_or_else(|| {
            IrError::invalid_program(
                location,
                format!("{what} must have a pointer or view type"),
            )
        })
    }

    // -----------------------------------------------------------------------
    // Constants
    // -----------------------------------------------------------------------

    /// A primitive constant. With constant propagation enabled, identical
    /// constants in the same block share a single cached value.
    pub fn create_primitive(
        &mut self,
        location: Location,
        constant: PrimitiveConstant,
    ) -> ValueId {
        let block = self.block;
        self.builder.constant_in(block, location, constant)
    }

    pub fn create_string(&mut self, location: Location, value: impl Into<String>) -> ValueId {
        self.push(
            ValueKind::StringValue {
                value: value.into(),
            },
            TypeId::STRING,
            SmallVec::new(),
            SmallVec::new(),
            location,
        )
    }

    /// The zero value of `ty`.
    pub fn create_null(&mut self, location: Location, ty: TypeId) -> Result<ValueId, IrError> {
        if ty == TypeId::VOID {
            return Err(IrError::invalid_program(&location, "null of void type"));
        }
        Ok(self.push(
            ValueKind::NullValue,
            ty,
            SmallVec::new(),
            SmallVec::new(),
            location,
        ))
    }

    /// An undefined value of `ty`, representing an uninitialized lane.
    pub fn create_undefined(
        &mut self,
        location: Location,
        ty: TypeId,
    ) -> Result<ValueId, IrError> {
        if ty == TypeId::VOID {
            return Err(IrError::invalid_program(&location, "undefined of void type"));
        }
        Ok(self.push(
            ValueKind::UndefinedValue,
            ty,
            SmallVec::new(),
            SmallVec::new(),
            location,
        ))
    }

    // -----------------------------------------------------------------------
    // Arithmetic
    // -----------------------------------------------------------------------

    pub fn create_unary_arithmetic(
        &mut self,
        location: Location,
        kind: UnaryArithKind,
        value: ValueId,
        flags: ArithFlags,
    ) -> Result<ValueId, IrError> {
        let basic = self.expect_primitive(value, "unary operand", &location)?;
        match kind {
            UnaryArithKind::Not if !basic.is_int() => {
                return Err(IrError::invalid_program(
                    &location,
                    "bitwise not requires an integer operand",
                ));
            }
            UnaryArithKind::Sqrt if !basic.is_float() => {
                return Err(IrError::invalid_program(
                    &location,
                    "sqrt requires a float operand",
                ));
            }
            _ => {}
        }
        if self.builder.folding_enabled() {
            if let Some(constant) = self.as_constant(value) {
                if let Some(folded) = fold_unary(kind, constant) {
                    return Ok(self.create_primitive(location, folded));
                }
            }
        }
        let ty = self.type_of(value);
        Ok(self.push(
            ValueKind::UnaryArithmetic { kind, flags },
            ty,
            smallvec![value],
            SmallVec::new(),
            location,
        ))
    }

    pub fn create_binary_arithmetic(
        &mut self,
        location: Location,
        kind: BinaryArithKind,
        lhs: ValueId,
        rhs: ValueId,
        flags: ArithFlags,
    ) -> Result<ValueId, IrError> {
        let left = self.expect_primitive(lhs, "left operand", &location)?;
        let right = self.expect_primitive(rhs, "right operand", &location)?;
        if left != right {
            return Err(IrError::invalid_program(
                &location,
                format!("binary arithmetic requires equal primitive types, got {left} and {right}"),
            ));
        }
        let int_only = matches!(
            kind,
            BinaryArithKind::And
                | BinaryArithKind::Or
                | BinaryArithKind::Xor
                | BinaryArithKind::Shl
                | BinaryArithKind::Shr
        );
        if int_only && !left.is_int() {
            return Err(IrError::invalid_program(
                &location,
                "bitwise operation requires integer operands",
            ));
        }
        if self.builder.folding_enabled() {
            if let (Some(a), Some(b)) = (self.as_constant(lhs), self.as_constant(rhs)) {
                if let Some(folded) = fold_binary(kind, flags, a, b) {
                    return Ok(self.create_primitive(location, folded));
                }
            }
        }
        let ty = self.type_of(lhs);
        Ok(self.push(
            ValueKind::BinaryArithmetic { kind, flags },
            ty,
            smallvec![lhs, rhs],
            SmallVec::new(),
            location,
        ))
    }

    pub fn create_ternary_arithmetic(
        &mut self,
        location: Location,
        kind: TernaryArithKind,
        a: ValueId,
        b: ValueId,
        c: ValueId,
        flags: ArithFlags,
    ) -> Result<ValueId, IrError> {
        let ta = self.expect_primitive(a, "first operand", &location)?;
        let tb = self.expect_primitive(b, "second operand", &location)?;
        let tc = self.expect_primitive(c, "third operand", &location)?;
        if ta != tb || tb != tc {
            return Err(IrError::invalid_program(
                &location,
                "ternary arithmetic requires equal primitive types",
            ));
        }
        let ty = self.type_of(a);
        Ok(self.push(
            ValueKind::TernaryArithmetic { kind, flags },
            ty,
            smallvec![a, b, c],
            SmallVec::new(),
            location,
        ))
    }

    pub fn create_compare(
        &mut self,
        location: Location,
        kind: CompareKind,
        lhs: ValueId,
        rhs: ValueId,
        flags: CompareFlags,
    ) -> Result<ValueId, IrError> {
        let left = self.expect_primitive(lhs, "left operand", &location)?;
        let right = self.expect_primitive(rhs, "right operand", &location)?;
        if left != right {
            return Err(IrError::invalid_program(
                &location,
                format!("compare requires equal primitive types, got {left} and {right}"),
            ));
        }
        if self.builder.folding_enabled() {
            if let (Some(a), Some(b)) = (self.as_constant(lhs), self.as_constant(rhs)) {
                if let Some(folded) = fold_compare(kind, flags, a, b) {
                    return Ok(
                        self.create_primitive(location, PrimitiveConstant::bool(folded))
                    );
                }
            }
        }
        Ok(self.push(
            ValueKind::Compare { kind, flags },
            TypeId::INT1,
            smallvec![lhs, rhs],
            SmallVec::new(),
            location,
        ))
    }

    // -----------------------------------------------------------------------
    // Conversions and casts
    // -----------------------------------------------------------------------

    pub fn create_convert(
        &mut self,
        location: Location,
        value: ValueId,
        target: TypeId,
        flags: ConvertFlags,
    ) -> Result<ValueId, IrError> {
        self.expect_primitive(value, "convert source", &location)?;
        let mut target = target;
        let TypeNode::Primitive(mut target_basic) = *self.builder.ctx.types().node(target)
        else {
            return Err(IrError::invalid_program(
                &location,
                "convert target must be a primitive type",
            ));
        };
        if target_basic == BasicValueType::Float64
            && self
                .builder
                .ctx
                .flags()
                .contains(ContextFlags::FORCE_32BIT_FLOATS)
        {
            target_basic = BasicValueType::Float32;
            target = TypeId::FLOAT32;
        }
        if self.builder.folding_enabled() {
            if self.type_of(value) == target {
                return Ok(self.method().resolve(value));
            }
            if let Some(constant) = self.as_constant(value) {
                if let Some(folded) = fold_convert(constant, target_basic, flags) {
                    return Ok(self.create_primitive(location, folded));
                }
            }
        }
        Ok(self.push(
            ValueKind::Convert { flags },
            target,
            smallvec![value],
            SmallVec::new(),
            location,
        ))
    }

    /// Reinterprets a pointer as a pointer to `new_element` in the same
    /// address space.
    pub fn create_pointer_cast(
        &mut self,
        location: Location,
        value: ValueId,
        new_element: TypeId,
    ) -> Result<ValueId, IrError> {
        let TypeNode::Pointer { space, .. } = *self.node_of(value) else {
            return Err(IrError::invalid_program(
                &location,
                "pointer cast requires a pointer operand",
            ));
        };
        let ty = self.builder.ctx.types_mut().pointer(new_element, space);
        Ok(self.push(
            ValueKind::PointerCast,
            ty,
            smallvec![value],
            SmallVec::new(),
            location,
        ))
    }

    /// Moves a pointer or view into another address space.
    pub fn create_address_space_cast(
        &mut self,
        location: Location,
        value: ValueId,
        space: AddressSpace,
    ) -> Result<ValueId, IrError> {
        let ty = match *self.node_of(value) {
            TypeNode::Pointer { element, .. } => {
                self.builder.ctx.types_mut().pointer(element, space)
            }
            TypeNode::View { element, .. } => self.builder.ctx.types_mut().view(element, space),
            _ => {
                return Err(IrError::invalid_program(
                    &location,
                    "address-space cast requires a pointer or view operand",
                ));
            }
        };
        Ok(self.push(
            ValueKind::AddressSpaceCast { space },
            ty,
            smallvec![value],
            SmallVec::new(),
            location,
        ))
    }

    // -----------------------------------------------------------------------
    // Memory
    // -----------------------------------------------------------------------

    /// Allocates an `element` in `space` and yields the pointer. Allocation
    /// is available in the local and shared address spaces only.
    pub fn create_alloca(
        &mut self,
        location: Location,
        element: TypeId,
        space: AddressSpace,
    ) -> Result<ValueId, IrError> {
        if !matches!(space, AddressSpace::Local | AddressSpace::Shared) {
            return Err(IrError::not_supported(format!(
                "alloca in the {space} address space"
            )));
        }
        if element == TypeId::VOID {
            return Err(IrError::invalid_program(&location, "alloca of void type"));
        }
        let ty = self.builder.ctx.types_mut().pointer(element, space);
        Ok(self.push(
            ValueKind::Alloca { space },
            ty,
            SmallVec::new(),
            SmallVec::new(),
            location,
        ))
    }

    pub fn create_load(
        &mut self,
        location: Location,
        address: ValueId,
    ) -> Result<ValueId, IrError> {
        let TypeNode::Pointer { element, .. } = *self.node_of(address) else {
            return Err(IrError::invalid_program(
                &location,
                "load requires a pointer operand",
            ));
        };
        Ok(self.push(
            ValueKind::Load,
            element,
            smallvec![address],
            SmallVec::new(),
            location,
        ))
    }

    pub fn create_store(
        &mut self,
        location: Location,
        address: ValueId,
        value: ValueId,
    ) -> Result<ValueId, IrError> {
        let TypeNode::Pointer { element, .. } = *self.node_of(address) else {
            return Err(IrError::invalid_program(
                &location,
                "store requires a pointer operand",
            ));
        };
        if self.type_of(value) != element {
            return Err(IrError::invalid_program(
                &location,
                "stored value type differs from the pointer element type",
            ));
        }
        Ok(self.push(
            ValueKind::Store,
            TypeId::VOID,
            smallvec![address, value],
            SmallVec::new(),
            location,
        ))
    }

    /// The address of element `index` of a pointer or view base.
    pub fn create_load_element_address(
        &mut self,
        location: Location,
        source: ValueId,
        index: ValueId,
    ) -> Result<ValueId, IrError> {
        let (element, space) = self.address_payload(source, "address source", &location)?;
        self.expect_int(index, "element index", &location)?;
        let ty = self.builder.ctx.types_mut().pointer(element, space);
        Ok(self.push(
            ValueKind::LoadElementAddress,
            ty,
            smallvec![source, index],
            SmallVec::new(),
            location,
        ))
    }

    /// The address of structure field `field` behind a pointer.
    pub fn create_load_field_address(
        &mut self,
        location: Location,
        source: ValueId,
        field: u32,
    ) -> Result<ValueId, IrError> {
        let TypeNode::Pointer { element, space } = *self.node_of(source) else {
            return Err(IrError::invalid_program(
                &location,
                "field address requires a pointer operand",
            ));
        };
        let TypeNode::Structure { ref fields } = *self.builder.ctx.types().node(element) else {
            return Err(IrError::invalid_program(
                &location,
                "field address requires a pointer to a structure",
            ));
        };
        let Some(&field_ty) = fields.get(field as usize) else {
            return Err(IrError::argument_out_of_range(format!(
                "field index {field} out of range for structure with {} fields",
                fields.len()
            )));
        };
        let ty = self.builder.ctx.types_mut().pointer(field_ty, space);
        Ok(self.push(
            ValueKind::LoadFieldAddress { field },
            ty,
            smallvec![source],
            SmallVec::new(),
            location,
        ))
    }

    // -----------------------------------------------------------------------
    // Views and arrays
    // -----------------------------------------------------------------------

    /// Builds a view from a base pointer and an element count.
    pub fn create_new_view(
        &mut self,
        location: Location,
        pointer: ValueId,
        length: ValueId,
    ) -> Result<ValueId, IrError> {
        let TypeNode::Pointer { element, space } = *self.node_of(pointer) else {
            return Err(IrError::invalid_program(
                &location,
                "view base must be a pointer",
            ));
        };
        self.expect_int(length, "view length", &location)?;
        let ty = self.builder.ctx.types_mut().view(element, space);
        Ok(self.push(
            ValueKind::NewView,
            ty,
            smallvec![pointer, length],
            SmallVec::new(),
            location,
        ))
    }

    /// A sub-range `[offset, offset + length)` of a view.
    pub fn create_sub_view(
        &mut self,
        location: Location,
        view: ValueId,
        offset: ValueId,
        length: ValueId,
    ) -> Result<ValueId, IrError> {
        if !self.node_of(view).is_view() {
            return Err(IrError::invalid_program(
                &location,
                "sub-view requires a view operand",
            ));
        }
        self.expect_int(offset, "sub-view offset", &location)?;
        self.expect_int(length, "sub-view length", &location)?;
        let ty = self.type_of(view);
        Ok(self.push(
            ValueKind::SubView,
            ty,
            smallvec![view, offset, length],
            SmallVec::new(),
            location,
        ))
    }

    pub fn create_get_view_length(
        &mut self,
        location: Location,
        view: ValueId,
    ) -> Result<ValueId, IrError> {
        if !self.node_of(view).is_view() {
            return Err(IrError::invalid_program(
                &location,
                "view length requires a view operand",
            ));
        }
        Ok(self.push(
            ValueKind::GetViewLength,
            TypeId::INT32,
            smallvec![view],
            SmallVec::new(),
            location,
        ))
    }

    /// Allocates a multi-dimensional array from per-dimension extents.
    pub fn create_new_array(
        &mut self,
        location: Location,
        element: TypeId,
        extents: &[ValueId],
    ) -> Result<ValueId, IrError> {
        if extents.is_empty() {
            return Err(IrError::argument_out_of_range(
                "array requires at least one dimension",
            ));
        }
        for &extent in extents {
            self.expect_int(extent, "array extent", &location)?;
        }
        let dimensions = extents.len() as u32;
        let ty = self.builder.ctx.types_mut().array(element, dimensions);
        Ok(self.push(
            ValueKind::NewArray { dimensions },
            ty,
            SmallVec::from_slice(extents),
            SmallVec::new(),
            location,
        ))
    }

    /// Total element count of an array.
    pub fn create_get_array_length(
        &mut self,
        location: Location,
        array: ValueId,
    ) -> Result<ValueId, IrError> {
        if !matches!(self.node_of(array), TypeNode::Array { .. }) {
            return Err(IrError::invalid_program(
                &location,
                "array length requires an array operand",
            ));
        }
        Ok(self.push(
            ValueKind::GetArrayLength,
            TypeId::INT32,
            smallvec![array],
            SmallVec::new(),
            location,
        ))
    }

    // -----------------------------------------------------------------------
    // Structures
    // -----------------------------------------------------------------------

    fn structure_field_type(
        &self,
        object: ValueId,
        field: u32,
        location: &Location,
    ) -> Result<TypeId, IrError> {
        let TypeNode::Structure { ref fields } = *self.node_of(object) else {
            return Err(IrError::invalid_program(
                location,
                "field access requires a structure operand",
            ));
        };
        fields.get(field as usize).copied().ok_or_else(|| {
            IrError::argument_out_of_range(format!(
                "field index {field} out of range for structure with {} fields",
                fields.len()
            ))
        })
    }

    pub fn create_get_field(
        &mut self,
        location: Location,
        object: ValueId,
        field: u32,
    ) -> Result<ValueId, IrError> {
        let field_ty = self.structure_field_type(object, field, &location)?;
        Ok(self.push(
            ValueKind::GetField { field },
            field_ty,
            smallvec![object],
            SmallVec::new(),
            location,
        ))
    }

    /// Functional update: a copy of `object` with `field` set to `value`.
    pub fn create_set_field(
        &mut self,
        location: Location,
        object: ValueId,
        field: u32,
        value: ValueId,
    ) -> Result<ValueId, IrError> {
        let field_ty = self.structure_field_type(object, field, &location)?;
        if self.type_of(value) != field_ty {
            return Err(IrError::invalid_program(
                &location,
                "field value type differs from the field type",
            ));
        }
        let ty = self.type_of(object);
        Ok(self.push(
            ValueKind::SetField { field },
            ty,
            smallvec![object, value],
            SmallVec::new(),
            location,
        ))
    }

    /// Assembles a structure value from per-field operands.
    pub fn create_structure_value(
        &mut self,
        location: Location,
        ty: TypeId,
        values: &[ValueId],
    ) -> Result<ValueId, IrError> {
        let TypeNode::Structure { ref fields } = *self.builder.ctx.types().node(ty) else {
            return Err(IrError::invalid_program(
                &location,
                "structure value requires a structure type",
            ));
        };
        let fields = fields.clone();
        if fields.len() != values.len() {
            return Err(IrError::invalid_program(
                &location,
                format!(
                    "structure value expects {} fields, got {}",
                    fields.len(),
                    values.len()
                ),
            ));
        }
        for (index, (&field_ty, &value)) in fields.iter().zip(values).enumerate() {
            if self.type_of(value) != field_ty {
                return Err(IrError::invalid_program(
                    &location,
                    format!("field {index} type differs from the structure field type"),
                ));
            }
        }
        Ok(self.push(
            ValueKind::StructureValue,
            ty,
            SmallVec::from_slice(values),
            SmallVec::new(),
            location,
        ))
    }

    // -----------------------------------------------------------------------
    // Device values and cross-lane operations
    // -----------------------------------------------------------------------

    pub fn create_device_constant(
        &mut self,
        location: Location,
        kind: DeviceConstantKind,
        dimension: Dimension,
    ) -> ValueId {
        self.push(
            ValueKind::DeviceConstant { kind, dimension },
            TypeId::INT32,
            SmallVec::new(),
            SmallVec::new(),
            location,
        )
    }

    pub fn create_barrier(&mut self, location: Location) -> ValueId {
        self.push(
            ValueKind::Barrier,
            TypeId::VOID,
            SmallVec::new(),
            SmallVec::new(),
            location,
        )
    }

    pub fn create_predicate_barrier(
        &mut self,
        location: Location,
        kind: PredicateBarrierKind,
        predicate: ValueId,
    ) -> Result<ValueId, IrError> {
        self.expect_predicate(predicate, "barrier predicate", &location)?;
        let ty = match kind {
            PredicateBarrierKind::And | PredicateBarrierKind::Or => TypeId::INT1,
            PredicateBarrierKind::PopCount => TypeId::INT32,
        };
        Ok(self.push(
            ValueKind::PredicateBarrier { kind },
            ty,
            smallvec![predicate],
            SmallVec::new(),
            location,
        ))
    }

    pub fn create_broadcast(
        &mut self,
        location: Location,
        value: ValueId,
        origin: ValueId,
        kind: BroadcastKind,
    ) -> Result<ValueId, IrError> {
        self.expect_primitive(value, "broadcast value", &location)?;
        self.expect_int(origin, "broadcast origin", &location)?;
        let ty = self.type_of(value);
        Ok(self.push(
            ValueKind::Broadcast { kind },
            ty,
            smallvec![value, origin],
            SmallVec::new(),
            location,
        ))
    }

    pub fn create_warp_shuffle(
        &mut self,
        location: Location,
        value: ValueId,
        origin: ValueId,
        kind: ShuffleKind,
    ) -> Result<ValueId, IrError> {
        self.expect_primitive(value, "shuffle value", &location)?;
        self.expect_int(origin, "shuffle origin", &location)?;
        let ty = self.type_of(value);
        Ok(self.push(
            ValueKind::WarpShuffle { kind },
            ty,
            smallvec![value, origin],
            SmallVec::new(),
            location,
        ))
    }

    pub fn create_sub_warp_shuffle(
        &mut self,
        location: Location,
        value: ValueId,
        origin: ValueId,
        width: ValueId,
        kind: ShuffleKind,
    ) -> Result<ValueId, IrError> {
        self.expect_primitive(value, "shuffle value", &location)?;
        self.expect_int(origin, "shuffle origin", &location)?;
        self.expect_int(width, "sub-warp width", &location)?;
        let ty = self.type_of(value);
        Ok(self.push(
            ValueKind::SubWarpShuffle { kind },
            ty,
            smallvec![value, origin, width],
            SmallVec::new(),
            location,
        ))
    }

    // -----------------------------------------------------------------------
    // Atomics
    // -----------------------------------------------------------------------

    fn atomic_element(
        &self,
        target: ValueId,
        location: &Location,
    ) -> Result<TypeId, IrError> {
        let TypeNode::Pointer { element, space } = *self.node_of(target) else {
            return Err(IrError::invalid_program(
                location,
                "atomic target must be a pointer",
            ));
        };
        if space == AddressSpace::Local {
            return Err(IrError::not_supported(
                "atomic operation on the local address space",
            ));
        }
        if !self.builder.ctx.types().node(element).is_primitive() {
            return Err(IrError::invalid_program(
                location,
                "atomic element type must be primitive",
            ));
        }
        Ok(element)
    }

    /// Atomic read-modify-write; yields the previous value.
    pub fn create_atomic(
        &mut self,
        location: Location,
        kind: AtomicKind,
        target: ValueId,
        value: ValueId,
        flags: ArithFlags,
    ) -> Result<ValueId, IrError> {
        let element = self.atomic_element(target, &location)?;
        if self.type_of(value) != element {
            return Err(IrError::invalid_program(
                &location,
                "atomic value type differs from the pointer element type",
            ));
        }
        Ok(self.push(
            ValueKind::Atomic { kind, flags },
            element,
            smallvec![target, value],
            SmallVec::new(),
            location,
        ))
    }

    /// Atomic compare-and-exchange; yields the previous value.
    pub fn create_atomic_cas(
        &mut self,
        location: Location,
        target: ValueId,
        compare: ValueId,
        value: ValueId,
    ) -> Result<ValueId, IrError> {
        let element = self.atomic_element(target, &location)?;
        if self.type_of(compare) != element || self.type_of(value) != element {
            return Err(IrError::invalid_program(
                &location,
                "compare-exchange operand types differ from the pointer element type",
            ));
        }
        Ok(self.push(
            ValueKind::AtomicCas,
            element,
            smallvec![target, compare, value],
            SmallVec::new(),
            location,
        ))
    }

    // -----------------------------------------------------------------------
    // Calls and diagnostics
    // -----------------------------------------------------------------------

    pub fn create_call(
        &mut self,
        location: Location,
        target: MethodId,
        arguments: &[ValueId],
    ) -> Result<ValueId, IrError> {
        let Some(callee) = self.builder.ctx.get_method(target) else {
            return Err(IrError::argument_out_of_range(format!(
                "unknown callee method handle {target}"
            )));
        };
        let return_type = callee.return_type();
        let parameter_types: Vec<TypeId> = callee
            .parameters()
            .iter()
            .map(|&p| callee.value(p).ty)
            .collect();
        // A declared-but-unbuilt callee has no parameters yet; typing is
        // deferred to its own builder session in that case.
        if !parameter_types.is_empty() || callee.entry_block().is_some() {
            if parameter_types.len() != arguments.len() {
                return Err(IrError::invalid_program(
                    &location,
                    format!(
                        "call expects {} arguments, got {}",
                        parameter_types.len(),
                        arguments.len()
                    ),
                ));
            }
            for (index, (&expected, &argument)) in
                parameter_types.iter().zip(arguments).enumerate()
            {
                if self.type_of(argument) != expected {
                    return Err(IrError::invalid_program(
                        &location,
                        format!("argument {index} type differs from the parameter type"),
                    ));
                }
            }
        }
        Ok(self.push(
            ValueKind::MethodCall { target },
            return_type,
            SmallVec::from_slice(arguments),
            SmallVec::new(),
            location,
        ))
    }

    /// A runtime assertion on `condition` with a diagnostic message.
    pub fn create_debug_assert(
        &mut self,
        location: Location,
        condition: ValueId,
        message: impl Into<String>,
    ) -> Result<ValueId, IrError> {
        self.expect_predicate(condition, "assert condition", &location)?;
        Ok(self.push(
            ValueKind::DebugAssert {
                message: message.into(),
            },
            TypeId::VOID,
            smallvec![condition],
            SmallVec::new(),
            location,
        ))
    }

    /// Formatted device-side output.
    pub fn create_write_to_output(
        &mut self,
        location: Location,
        format: impl Into<String>,
        arguments: &[ValueId],
    ) -> Result<ValueId, IrError> {
        for &argument in arguments {
            let node = self.node_of(argument);
            if !node.is_primitive() && !matches!(node, TypeNode::String) {
                return Err(IrError::invalid_program(
                    &location,
                    "output arguments must be primitive or string values",
                ));
            }
        }
        Ok(self.push(
            ValueKind::WriteToOutput {
                format: format.into(),
            },
            TypeId::VOID,
            SmallVec::from_slice(arguments),
            SmallVec::new(),
            location,
        ))
    }

    /// An opaque runtime handle identified by `tag`.
    pub fn create_handle(&mut self, location: Location, tag: impl Into<String>) -> ValueId {
        self.push(
            ValueKind::HandleValue { tag: tag.into() },
            TypeId::STRING,
            SmallVec::new(),
            SmallVec::new(),
            location,
        )
    }

    /// A verbatim target-language expression over `arguments`.
    pub fn create_language_emit(
        &mut self,
        location: Location,
        expression: impl Into<String>,
        arguments: &[ValueId],
        result: TypeId,
    ) -> ValueId {
        self.push(
            ValueKind::LanguageEmit {
                expression: expression.into(),
            },
            result,
            SmallVec::from_slice(arguments),
            SmallVec::new(),
            location,
        )
    }

    // -----------------------------------------------------------------------
    // Phis
    // -----------------------------------------------------------------------

    /// A phi of type `ty`. Incoming edges are registered afterwards with
    /// [`MethodBuilder::add_phi_incoming`]; at seal time their count must
    /// equal the number of predecessors.
    pub fn create_phi(&mut self, location: Location, ty: TypeId) -> Result<ValueId, IrError> {
        if ty == TypeId::VOID {
            return Err(IrError::invalid_program(&location, "phi of void type"));
        }
        Ok(self.push(
            ValueKind::Phi,
            ty,
            SmallVec::new(),
            SmallVec::new(),
            location,
        ))
    }

    /// Registers an incoming edge on a phi of this method.
    pub fn add_phi_incoming(
        &mut self,
        phi: ValueId,
        source: BlockId,
        value: ValueId,
    ) -> Result<(), IrError> {
        self.builder.add_phi_incoming(phi, source, value)
    }

    // -----------------------------------------------------------------------
    // Terminators
    // -----------------------------------------------------------------------

    /// Returns `value` (or nothing for void methods). Sets or replaces the
    /// block terminator.
    pub fn create_return(
        &mut self,
        location: Location,
        value: Option<ValueId>,
    ) -> Result<ValueId, IrError> {
        let return_type = self.method().return_type();
        let operands: SmallVec<[ValueId; 2]> = match (return_type == TypeId::VOID, value) {
            (true, None) => SmallVec::new(),
            (true, Some(_)) => {
                return Err(IrError::invalid_program(
                    &location,
                    "void method cannot return a value",
                ));
            }
            (false, None) => {
                return Err(IrError::invalid_program(
                    &location,
                    "non-void method must return a value",
                ));
            }
            (false, Some(value)) => {
                if self.type_of(value) != return_type {
                    return Err(IrError::invalid_program(
                        &location,
                        "returned value type differs from the method return type",
                    ));
                }
                smallvec![value]
            }
        };
        Ok(self.push(
            ValueKind::Return,
            TypeId::VOID,
            operands,
            SmallVec::new(),
            location,
        ))
    }

    pub fn create_branch(
        &mut self,
        location: Location,
        target: BlockId,
    ) -> Result<ValueId, IrError> {
        self.expect_block(target)?;
        Ok(self.push(
            ValueKind::UnconditionalBranch,
            TypeId::VOID,
            SmallVec::new(),
            smallvec![target],
            location,
        ))
    }

    pub fn create_if_branch(
        &mut self,
        location: Location,
        condition: ValueId,
        true_target: BlockId,
        false_target: BlockId,
        flags: BranchFlags,
    ) -> Result<ValueId, IrError> {
        self.expect_predicate(condition, "branch condition", &location)?;
        self.expect_block(true_target)?;
        self.expect_block(false_target)?;
        Ok(self.push(
            ValueKind::IfBranch { flags },
            TypeId::VOID,
            smallvec![condition],
            smallvec![true_target, false_target],
            location,
        ))
    }

    /// A multi-way branch on `selector`; `default` is target 0, `cases[i]`
    /// is the target for selector value `i`.
    pub fn create_switch_branch(
        &mut self,
        location: Location,
        selector: ValueId,
        default: BlockId,
        cases: &[BlockId],
    ) -> Result<ValueId, IrError> {
        self.expect_int(selector, "switch selector", &location)?;
        self.expect_block(default)?;
        for &case in cases {
            self.expect_block(case)?;
        }
        let mut block_operands: SmallVec<[BlockId; 2]> = smallvec![default];
        block_operands.extend_from_slice(cases);
        Ok(self.push(
            ValueKind::SwitchBranch,
            TypeId::VOID,
            smallvec![selector],
            block_operands,
            location,
        ))
    }
}

// ---------------------------------------------------------------------------
// Constant folding
// ---------------------------------------------------------------------------

fn fold_unary(kind: UnaryArithKind, a: PrimitiveConstant) -> Option<PrimitiveConstant> {
    if !a.basic.is_int() {
        return None;
    }
    let value = a.as_i64()?;
    let folded = match kind {
        UnaryArithKind::Neg => value.wrapping_neg(),
        UnaryArithKind::Not => {
            if a.basic == BasicValueType::Int1 {
                (value == 0) as i64
            } else {
                !value
            }
        }
        UnaryArithKind::Abs => value.wrapping_abs(),
        UnaryArithKind::Sqrt => return None,
    };
    Some(PrimitiveConstant::from_raw(a.basic, folded as u64))
}

fn fold_binary(
    kind: BinaryArithKind,
    flags: ArithFlags,
    a: PrimitiveConstant,
    b: PrimitiveConstant,
) -> Option<PrimitiveConstant> {
    if !a.basic.is_int() || a.basic != b.basic {
        return None;
    }
    let unsigned = flags.contains(ArithFlags::UNSIGNED);
    let (sa, sb) = (a.as_i64()?, b.as_i64()?);
    let (ua, ub) = (a.as_u64()?, b.as_u64()?);
    let width = a.basic.bit_width();
    let folded: i64 = match kind {
        BinaryArithKind::Add => sa.wrapping_add(sb),
        BinaryArithKind::Sub => sa.wrapping_sub(sb),
        BinaryArithKind::Mul => sa.wrapping_mul(sb),
        BinaryArithKind::Div => {
            if sb == 0 || (!unsigned && sa == i64::MIN && sb == -1) {
                return None;
            }
            if unsigned {
                (ua / ub) as i64
            } else {
                sa / sb
            }
        }
        BinaryArithKind::Rem => {
            if sb == 0 || (!unsigned && sa == i64::MIN && sb == -1) {
                return None;
            }
            if unsigned {
                (ua % ub) as i64
            } else {
                sa % sb
            }
        }
        BinaryArithKind::And => sa & sb,
        BinaryArithKind::Or => sa | sb,
        BinaryArithKind::Xor => sa ^ sb,
        BinaryArithKind::Shl => {
            if ub >= u64::from(width) {
                return None;
            }
            sa.wrapping_shl(ub as u32)
        }
        BinaryArithKind::Shr => {
            if ub >= u64::from(width) {
                return None;
            }
            if unsigned {
                (ua >> ub) as i64
            } else {
                sa >> ub
            }
        }
        BinaryArithKind::Min => {
            if unsigned {
                ua.min(ub) as i64
            } else {
                sa.min(sb)
            }
        }
        BinaryArithKind::Max => {
            if unsigned {
                ua.max(ub) as i64
            } else {
                sa.max(sb)
            }
        }
    };
    Some(PrimitiveConstant::from_raw(a.basic, folded as u64))
}

fn fold_compare(
    kind: CompareKind,
    flags: CompareFlags,
    a: PrimitiveConstant,
    b: PrimitiveConstant,
) -> Option<bool> {
    if !a.basic.is_int() || a.basic != b.basic {
        return None;
    }
    let ordering = if flags.contains(CompareFlags::UNSIGNED) {
        a.as_u64()?.cmp(&b.as_u64()?)
    } else {
        a.as_i64()?.cmp(&b.as_i64()?)
    };
    Some(match kind {
        CompareKind::Eq => ordering.is_eq(),
        CompareKind::Ne => ordering.is_ne(),
        CompareKind::Lt => ordering.is_lt(),
        CompareKind::Le => ordering.is_le(),
        CompareKind::Gt => ordering.is_gt(),
        CompareKind::Ge => ordering.is_ge(),
    })
}

fn fold_convert(
    a: PrimitiveConstant,
    target: BasicValueType,
    flags: ConvertFlags,
) -> Option<PrimitiveConstant> {
    if !a.basic.is_int() || !target.is_int() {
        return None;
    }
    let value = if flags.contains(ConvertFlags::SOURCE_UNSIGNED) {
        a.as_u64()? as i64
    } else {
        a.as_i64()?
    };
    Some(PrimitiveConstant::from_raw(target, value as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextFlags, IrContext};
    use crate::method::MethodDeclaration;

    fn context() -> IrContext {
        IrContext::new(ContextFlags::empty())
    }

    // S1: identity function Int32 -> Int32.
    #[test]
    fn build_identity_method() {
        let mut ctx = context();
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

        let method = ctx.method(m);
        assert_eq!(method.num_blocks(), 1);
        assert_eq!(method.num_parameters(), 1);
        assert_eq!(method.rpo(), &[entry]);
        assert_eq!(method.exit_block(), Some(entry));
        assert_eq!(method.block(entry).index(), 0);
        // Parameter plus return terminator.
        assert_eq!(method.block_values(entry).count(), 1);
        assert_eq!(method.num_value_slots(), 2);
    }

    // S2: diamond with phi.
    #[test]
    fn build_diamond_with_phi() {
        let mut ctx = context();
        let m = ctx
            .declare(MethodDeclaration::new("diamond", TypeId::INT32))
            .unwrap();
        let mut mb = ctx.create_builder(m).unwrap();
        let entry = mb.create_basic_block(Location::Unknown);
        let a = mb.create_basic_block(Location::Unknown);
        let b = mb.create_basic_block(Location::Unknown);
        let join = mb.create_basic_block(Location::Unknown);
        let p = mb.add_parameter(TypeId::INT1, Some("cond")).unwrap();

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

        let method = ctx.method(m);
        assert_eq!(method.block(entry).successors(), &[a, b]);
        assert_eq!(method.block(join).predecessors().len(), 2);
        assert!(method.block(join).predecessors().contains(&a));
        assert!(method.block(join).predecessors().contains(&b));
        assert_eq!(method.rpo()[0], entry);
        assert_eq!(*method.rpo().last().unwrap(), join);
        assert_eq!(method.exit_block(), Some(join));
    }

    #[test]
    fn phi_with_missing_incoming_fails_verification() {
        let mut ctx = context();
        let m = ctx
            .declare(MethodDeclaration::new("bad_phi", TypeId::INT32))
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
        mb.block(b).create_branch(Location::Unknown, join).unwrap();

        let phi = mb
            .block(join)
            .create_phi(Location::Unknown, TypeId::INT32)
            .unwrap();
        mb.add_phi_incoming(phi, a, va).unwrap();
        mb.block(join)
            .create_return(Location::Unknown, Some(phi))
            .unwrap();

        let err = mb.complete().unwrap_err();
        let IrError::VerificationFailed { failures } = err else {
            panic!("expected verification failure");
        };
        assert!(failures
            .iter()
            .any(|f| f.message.contains("phi incoming edge count")));
    }

    #[test]
    fn binary_arithmetic_requires_equal_types() {
        let mut ctx = context();
        let m = ctx
            .declare(MethodDeclaration::new("mismatch", TypeId::INT32))
            .unwrap();
        let mut mb = ctx.create_builder(m).unwrap();
        let entry = mb.create_basic_block(Location::Unknown);
        let mut bb = mb.block(entry);
        let a = bb.create_primitive(Location::Unknown, PrimitiveConstant::i32(1));
        let b = bb.create_primitive(Location::Unknown, PrimitiveConstant::i64(2));
        let err = bb
            .create_binary_arithmetic(
                Location::Unknown,
                BinaryArithKind::Add,
                a,
                b,
                ArithFlags::empty(),
            )
            .unwrap_err();
        assert!(matches!(err, IrError::InvalidProgram { .. }));
    }

    #[test]
    fn constant_folding_fires_on_integer_add() {
        let mut ctx = context();
        let m = ctx
            .declare(MethodDeclaration::new("fold", TypeId::INT32))
            .unwrap();
        let mut mb = ctx.create_builder(m).unwrap();
        let entry = mb.create_basic_block(Location::Unknown);
        let mut bb = mb.block(entry);
        let a = bb.create_primitive(Location::Unknown, PrimitiveConstant::i32(20));
        let b = bb.create_primitive(Location::Unknown, PrimitiveConstant::i32(22));
        let sum = bb
            .create_binary_arithmetic(
                Location::Unknown,
                BinaryArithKind::Add,
                a,
                b,
                ArithFlags::empty(),
            )
            .unwrap();
        bb.create_return(Location::Unknown, Some(sum)).unwrap();
        mb.complete().unwrap();

        let method = ctx.method(m);
        assert_eq!(
            method.value(sum).kind,
            ValueKind::PrimitiveValue {
                value: PrimitiveConstant::i32(42)
            }
        );
    }

    #[test]
    fn folded_constants_are_cached_per_block() {
        let mut ctx = context();
        let m = ctx
            .declare(MethodDeclaration::new("cache", TypeId::INT32))
            .unwrap();
        let mut mb = ctx.create_builder(m).unwrap();
        let entry = mb.create_basic_block(Location::Unknown);
        let mut bb = mb.block(entry);
        let a = bb.create_primitive(Location::Unknown, PrimitiveConstant::i32(7));
        let b = bb.create_primitive(Location::Unknown, PrimitiveConstant::i32(7));
        assert_eq!(a, b);
    }

    #[test]
    fn disable_constant_propagation_keeps_the_operation() {
        let mut ctx = IrContext::new(ContextFlags::DISABLE_CONSTANT_PROPAGATION);
        let m = ctx
            .declare(MethodDeclaration::new("nofold", TypeId::INT32))
            .unwrap();
        let mut mb = ctx.create_builder(m).unwrap();
        let entry = mb.create_basic_block(Location::Unknown);
        let mut bb = mb.block(entry);
        let a = bb.create_primitive(Location::Unknown, PrimitiveConstant::i32(1));
        let b = bb.create_primitive(Location::Unknown, PrimitiveConstant::i32(1));
        assert_ne!(a, b);
        let sum = bb
            .create_binary_arithmetic(
                Location::Unknown,
                BinaryArithKind::Add,
                a,
                b,
                ArithFlags::empty(),
            )
            .unwrap();
        bb.create_return(Location::Unknown, Some(sum)).unwrap();
        mb.complete().unwrap();
        assert!(matches!(
            ctx.method(m).value(sum).kind,
            ValueKind::BinaryArithmetic { .. }
        ));
    }

    #[test]
    fn division_by_zero_is_never_folded() {
        assert_eq!(
            fold_binary(
                BinaryArithKind::Div,
                ArithFlags::empty(),
                PrimitiveConstant::i32(1),
                PrimitiveConstant::i32(0),
            ),
            None
        );
    }

    #[test]
    fn unsigned_flags_change_folding() {
        let folded = fold_binary(
            BinaryArithKind::Div,
            ArithFlags::UNSIGNED,
            PrimitiveConstant::i32(-2),
            PrimitiveConstant::i32(2),
        )
        .unwrap();
        // -2 as u32 is 0xFFFFFFFE; halved and reinterpreted as i32.
        assert_eq!(folded, PrimitiveConstant::i32(0x7FFF_FFFF));

        assert_eq!(
            fold_compare(
                CompareKind::Lt,
                CompareFlags::UNSIGNED,
                PrimitiveConstant::i32(-1),
                PrimitiveConstant::i32(1),
            ),
            Some(false)
        );
        assert_eq!(
            fold_compare(
                CompareKind::Lt,
                CompareFlags::empty(),
                PrimitiveConstant::i32(-1),
                PrimitiveConstant::i32(1),
            ),
            Some(true)
        );
    }

    #[test]
    fn convert_folds_and_truncates() {
        let folded = fold_convert(
            PrimitiveConstant::i32(0x1_23),
            BasicValueType::Int8,
            ConvertFlags::empty(),
        )
        .unwrap();
        assert_eq!(folded, PrimitiveConstant::i8(0x23));
    }

    #[test]
    fn add_parameter_after_instruction_fails() {
        let mut ctx = context();
        let m = ctx
            .declare(MethodDeclaration::new("late", TypeId::VOID))
            .unwrap();
        let mut mb = ctx.create_builder(m).unwrap();
        let entry = mb.create_basic_block(Location::Unknown);
        mb.block(entry)
            .create_primitive(Location::Unknown, PrimitiveConstant::i32(0));
        let err = mb.add_parameter(TypeId::INT32, None).unwrap_err();
        assert!(matches!(err, IrError::InvalidOperation { .. }));
    }

    #[test]
    fn alloca_outside_local_or_shared_is_not_supported() {
        let mut ctx = context();
        let m = ctx
            .declare(MethodDeclaration::new("alloca", TypeId::VOID))
            .unwrap();
        let mut mb = ctx.create_builder(m).unwrap();
        let entry = mb.create_basic_block(Location::Unknown);
        let mut bb = mb.block(entry);
        let err = bb
            .create_alloca(Location::Unknown, TypeId::INT32, AddressSpace::Global)
            .unwrap_err();
        assert!(matches!(err, IrError::NotSupported { .. }));
        assert!(bb
            .create_alloca(Location::Unknown, TypeId::INT32, AddressSpace::Local)
            .is_ok());
    }

    #[test]
    fn sequential_builders_are_permitted() {
        let mut ctx = context();
        let m = ctx
            .declare(MethodDeclaration::new("twice", TypeId::VOID))
            .unwrap();
        let mut mb = ctx.create_builder(m).unwrap();
        let entry = mb.create_basic_block(Location::Unknown);
        mb.block(entry)
            .create_return(Location::Unknown, None)
            .unwrap();
        mb.complete().unwrap();

        // The first session released its slot; opening another succeeds.
        let mb = ctx.create_builder(m).unwrap();
        drop(mb);
        assert!(ctx.create_builder(m).is_ok());
    }

    #[test]
    fn replace_redirects_reads_until_compaction() {
        let mut ctx = context();
        let m = ctx
            .declare(MethodDeclaration::new("replace", TypeId::INT32))
            .unwrap();
        let mut mb = ctx.create_builder(m).unwrap();
        let entry = mb.create_basic_block(Location::Unknown);
        let p = mb.add_parameter(TypeId::INT32, None).unwrap();
        let mut bb = mb.block(entry);
        let dup = bb
            .create_binary_arithmetic(
                Location::Unknown,
                BinaryArithKind::Add,
                p,
                p,
                ArithFlags::empty(),
            )
            .unwrap();
        let ret = bb.create_return(Location::Unknown, Some(dup)).unwrap();
        mb.replace(dup, p).unwrap();
        mb.complete().unwrap();

        let method = ctx.method(m);
        assert_eq!(method.resolve(dup), p);
        // The return's operand reads through the replacement.
        assert_eq!(method.operands(ret).as_slice(), &[p]);
        // The block still physically holds the replaced slot.
        assert_eq!(method.block(entry).values().len(), 1);
    }

    #[test]
    fn return_type_mismatch_is_rejected() {
        let mut ctx = context();
        let m = ctx
            .declare(MethodDeclaration::new("badret", TypeId::INT64))
            .unwrap();
        let mut mb = ctx.create_builder(m).unwrap();
        let entry = mb.create_basic_block(Location::Unknown);
        let mut bb = mb.block(entry);
        let v = bb.create_primitive(Location::Unknown, PrimitiveConstant::i32(1));
        let err = bb.create_return(Location::Unknown, Some(v)).unwrap_err();
        assert!(matches!(err, IrError::InvalidProgram { .. }));
        let err = bb.create_return(Location::Unknown, None).unwrap_err();
        assert!(matches!(err, IrError::InvalidProgram { .. }));
    }

    #[test]
    fn call_checks_arity_and_types() {
        let mut ctx = context();
        let callee = ctx
            .declare(MethodDeclaration::new("callee", TypeId::INT32))
            .unwrap();
        let mut mb = ctx.create_builder(callee).unwrap();
        let entry = mb.create_basic_block(Location::Unknown);
        let p = mb.add_parameter(TypeId::INT32, None).unwrap();
        mb.block(entry)
            .create_return(Location::Unknown, Some(p))
            .unwrap();
        mb.complete().unwrap();

        let caller = ctx
            .declare(MethodDeclaration::new("caller", TypeId::INT32))
            .unwrap();
        let mut mb = ctx.create_builder(caller).unwrap();
        let entry = mb.create_basic_block(Location::Unknown);
        let q = mb.add_parameter(TypeId::INT32, None).unwrap();
        let mut bb = mb.block(entry);
        let err = bb.create_call(Location::Unknown, callee, &[]).unwrap_err();
        assert!(matches!(err, IrError::InvalidProgram { .. }));
        let call = bb.create_call(Location::Unknown, callee, &[q]).unwrap();
        bb.create_return(Location::Unknown, Some(call)).unwrap();
        mb.complete().unwrap();

        assert_eq!(ctx.method(caller).callees(), vec![callee]);
    }

    #[test]
    fn force_32bit_floats_narrows_convert_targets() {
        let mut ctx = IrContext::new(ContextFlags::FORCE_32BIT_FLOATS);
        let m = ctx
            .declare(MethodDeclaration::new("narrow", TypeId::VOID))
            .unwrap();
        let mut mb = ctx.create_builder(m).unwrap();
        let entry = mb.create_basic_block(Location::Unknown);
        let p = mb.add_parameter(TypeId::INT32, None).unwrap();
        let mut bb = mb.block(entry);
        let converted = bb
            .create_convert(
                Location::Unknown,
                p,
                TypeId::FLOAT64,
                ConvertFlags::empty(),
            )
            .unwrap();
        assert_eq!(bb.type_of(converted), TypeId::FLOAT32);
    }

    #[test]
    fn raw_values_bind_operands_in_a_second_pass() {
        let mut ctx = context();
        let m = ctx
            .declare(MethodDeclaration::new("raw", TypeId::INT32))
            .unwrap();
        let mut mb = ctx.create_builder(m).unwrap();
        let entry = mb.create_basic_block(Location::Unknown);
        let p = mb
            .append_raw_value(
                None,
                ValueKind::Parameter {
                    index: 0,
                    name: None,
                },
                TypeId::INT32,
                Location::Unknown,
            )
            .unwrap();
        let ret = mb
            .append_raw_value(
                Some(entry),
                ValueKind::Return,
                TypeId::VOID,
                Location::Unknown,
            )
            .unwrap();
        mb.bind_operands(ret, &[p], &[]).unwrap();
        mb.complete().unwrap();

        let method = ctx.method(m);
        assert_eq!(method.operands(ret).as_slice(), &[p]);
        assert_eq!(method.block(entry).terminator(), Some(ret));
    }
}
