//! The top-level IR container.
//!
//! [`IrContext`] owns the type universe, the method registry, the node-id
//! and node-marker allocators, the generation counter, and the
//! single-builder arbitration. All mutations go through `&mut self` (the
//! Rust aliasing rules are the multi-reader / single-writer lock of this
//! design); the atomic `builder_open` flag additionally guards against API
//! misuse across re-borrows and keeps GC and builders mutually exclusive.
//!
//! Compaction ("GC") bumps the generation counter, drops unloaded methods,
//! rebuilds dirty methods, and re-unifies the type table so that only types
//! reachable from live methods survive.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bitflags::bitflags;
use indexmap::IndexMap;

use crate::block::BasicBlock;
use crate::builder::MethodBuilder;
use crate::error::IrError;
use crate::id::{MethodId, NodeId, NodeMarker, ValueId};
use crate::location::Location;
use crate::method::{Method, MethodDeclaration, TransformationFlags, ValueSlot};
use crate::types::TypeNode;
use crate::universe::{TypeId, TypeUniverse};
use crate::value::ValueKind;

bitflags! {
    /// Context-wide configuration. Flags are config data on the context,
    /// never runtime switches on individual values.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ContextFlags: u32 {
        const ENABLE_DEBUG_INFORMATION = 1 << 0;
        const ENABLE_ASSERTIONS = 1 << 1;
        const INLINE_MUTABLE_STATIC_FIELD_VALUES = 1 << 2;
        const IGNORE_STATIC_FIELD_STORES = 1 << 3;
        const AGGRESSIVE_INLINING = 1 << 4;
        const FAST_MATH = 1 << 5;
        const FORCE_32BIT_FLOATS = 1 << 6;
        const FORCE_SYSTEM_GC = 1 << 7;
        const DISABLE_CONSTANT_PROPAGATION = 1 << 8;
        const ENABLE_PARALLEL_CODE_GENERATION = 1 << 9;
    }
}

/// Top-level IR container: type universe, method registry, id allocation,
/// generation counter, and builder arbitration.
#[derive(Debug)]
pub struct IrContext {
    flags: ContextFlags,
    types: TypeUniverse,
    /// Methods by handle, in declaration order.
    methods: IndexMap<MethodId, Method>,
    /// Name-keyed lookup backing idempotent declaration.
    names: HashMap<String, MethodId>,
    /// Methods marked for removal at the next GC.
    unloaded: HashSet<MethodId>,
    next_node_id: AtomicU64,
    next_marker: AtomicU64,
    next_method_id: u32,
    generation: u64,
    /// Single-writer arbitration across builder sessions.
    builder_open: AtomicBool,
}

impl IrContext {
    pub fn new(flags: ContextFlags) -> Self {
        IrContext {
            flags,
            types: TypeUniverse::new(),
            methods: IndexMap::new(),
            names: HashMap::new(),
            unloaded: HashSet::new(),
            next_node_id: AtomicU64::new(0),
            next_marker: AtomicU64::new(1),
            next_method_id: 0,
            generation: 0,
            builder_open: AtomicBool::new(false),
        }
    }

    pub fn flags(&self) -> ContextFlags {
        self.flags
    }

    /// Current generation. Bumped by each [`IrContext::gc`].
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The shared, immutable-once-interned type universe.
    pub fn types(&self) -> &TypeUniverse {
        &self.types
    }

    /// Mutable access for interning new types.
    pub fn types_mut(&mut self) -> &mut TypeUniverse {
        &mut self.types
    }

    /// Allocates a fresh node id. Ids are monotonic and never reused within
    /// this context's lifetime.
    pub fn new_node_id(&self) -> NodeId {
        NodeId(self.next_node_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Allocates a fresh visitation marker. Markers are monotonic and never
    /// recycled.
    pub fn new_node_marker(&self) -> NodeMarker {
        NodeMarker(self.next_marker.fetch_add(1, Ordering::Relaxed))
    }

    // -----------------------------------------------------------------------
    // Method registry
    // -----------------------------------------------------------------------

    /// Declares a method, reserving its handle.
    ///
    /// Idempotent: declaring the same name again returns the existing handle,
    /// provided the return type matches.
    pub fn declare(&mut self, declaration: MethodDeclaration) -> Result<MethodId, IrError> {
        if let Some(&existing) = self.names.get(&declaration.name) {
            let method = &self.methods[&existing];
            if method.return_type() != declaration.return_type {
                return Err(IrError::invalid_operation(format!(
                    "method '{}' was already declared with a different return type",
                    declaration.name
                )));
            }
            return Ok(existing);
        }

        let handle = MethodId(self.next_method_id);
        self.next_method_id += 1;
        let method = Method::new(
            self.new_node_id(),
            handle,
            declaration,
            Location::Unknown,
            self.generation,
        );
        tracing::debug!(method = %method.name(), %handle, "declare");
        self.names.insert(method.name().to_string(), handle);
        self.methods.insert(handle, method);
        Ok(handle)
    }

    /// Looks up a method by handle.
    pub fn get_method(&self, handle: MethodId) -> Option<&Method> {
        self.methods.get(&handle)
    }

    /// Looks up a method by handle, panicking on a stale handle.
    pub fn method(&self, handle: MethodId) -> &Method {
        &self.methods[&handle]
    }

    pub fn method_by_name(&self, name: &str) -> Option<MethodId> {
        self.names.get(name).copied()
    }

    /// All methods in declaration order.
    pub fn methods(&self) -> impl Iterator<Item = &Method> {
        self.methods.values()
    }

    pub fn num_methods(&self) -> usize {
        self.methods.len()
    }

    // -----------------------------------------------------------------------
    // Builder arbitration
    // -----------------------------------------------------------------------

    /// Opens a builder session on `method`. Fails with `InvalidOperation`
    /// while another builder is active (single-writer arbitration).
    pub fn create_builder(&mut self, method: MethodId) -> Result<MethodBuilder<'_>, IrError> {
        if !self.methods.contains_key(&method) {
            return Err(IrError::argument_out_of_range(format!(
                "unknown method handle {method}"
            )));
        }
        self.acquire_builder_slot()?;
        tracing::debug!(%method, "builder opened");
        Ok(MethodBuilder::new(self, method))
    }

    pub(crate) fn acquire_builder_slot(&self) -> Result<(), IrError> {
        if self.builder_open.swap(true, Ordering::SeqCst) {
            return Err(IrError::invalid_operation(
                "a builder is already open on this context",
            ));
        }
        Ok(())
    }

    pub(crate) fn release_builder_slot(&self) {
        self.builder_open.store(false, Ordering::SeqCst);
    }

    pub(crate) fn method_mut(&mut self, handle: MethodId) -> &mut Method {
        &mut self.methods[&handle]
    }

    // -----------------------------------------------------------------------
    // Unloading
    // -----------------------------------------------------------------------

    /// Marks a method for removal at the next GC.
    pub fn unload_method(&mut self, handle: MethodId) -> Result<(), IrError> {
        if !self.methods.contains_key(&handle) {
            return Err(IrError::argument_out_of_range(format!(
                "unknown method handle {handle}"
            )));
        }
        self.unloaded.insert(handle);
        Ok(())
    }

    /// Marks every method not reachable from `roots` through transitive
    /// call edges for removal at the next GC.
    pub fn unload_unreachable(&mut self, roots: &[MethodId]) -> Result<(), IrError> {
        if roots.is_empty() {
            return Err(IrError::argument_out_of_range(
                "reachable-root set must not be empty",
            ));
        }
        let mut reachable = HashSet::new();
        let mut queue: Vec<MethodId> = Vec::new();
        for &root in roots {
            if !self.methods.contains_key(&root) {
                return Err(IrError::argument_out_of_range(format!(
                    "unknown root method handle {root}"
                )));
            }
            if reachable.insert(root) {
                queue.push(root);
            }
        }
        while let Some(handle) = queue.pop() {
            for callee in self.methods[&handle].callees() {
                if self.methods.contains_key(&callee) && reachable.insert(callee) {
                    queue.push(callee);
                }
            }
        }
        for &handle in self.methods.keys() {
            if !reachable.contains(&handle) {
                self.unloaded.insert(handle);
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Compaction
    // -----------------------------------------------------------------------

    /// Compacts the context into the next generation.
    ///
    /// Bumps the generation counter, drops methods marked for unloading,
    /// rebuilds dirty methods (removed and replaced slots are physically
    /// dropped), and rebuilds the type table so that only the intrinsics and
    /// the types reachable from surviving methods remain.
    pub fn gc(&mut self) -> Result<(), IrError> {
        if self.builder_open.load(Ordering::SeqCst) {
            return Err(IrError::invalid_operation(
                "gc requires all builders to be released",
            ));
        }
        self.generation += 1;
        let generation = self.generation;

        let unloaded = std::mem::take(&mut self.unloaded);
        for handle in &unloaded {
            if let Some(method) = self.methods.shift_remove(handle) {
                tracing::debug!(method = %method.name(), "unloaded");
                self.names.remove(method.name());
            }
        }

        // Surviving methods must not reference a dropped method.
        for method in self.methods.values() {
            for callee in method.callees() {
                if !self.methods.contains_key(&callee) {
                    return Err(IrError::InvalidProgram {
                        message: format!(
                            "method '{}' calls unloaded method {callee}",
                            method.name()
                        ),
                    });
                }
            }
        }

        // Rebuild the type table: start from the intrinsics and re-register
        // types as they are visited through the surviving methods.
        let old_types = std::mem::replace(&mut self.types, TypeUniverse::new());
        let mut cache: HashMap<TypeId, TypeId> = HashMap::new();
        let types = &mut self.types;
        let mut rebuilt = 0usize;
        for method in self.methods.values_mut() {
            if method
                .transformation_flags()
                .contains(TransformationFlags::DIRTY)
            {
                method.compact();
                rebuilt += 1;
            }
            method.remap_types(|id| remap_type(&old_types, types, &mut cache, id));
            method.generation = generation;
            method.transformation_flags = TransformationFlags::empty();
        }

        tracing::debug!(
            generation,
            rebuilt,
            methods = self.methods.len(),
            types = self.types.len(),
            "gc"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Cross-context import
    // -----------------------------------------------------------------------

    /// Deep-copies `method` and everything it transitively calls from
    /// `source` into this context. Types are re-unified into this universe
    /// and all nodes receive fresh ids. Returns the imported handle.
    pub fn import(&mut self, source: &IrContext, method: MethodId) -> Result<MethodId, IrError> {
        if source.get_method(method).is_none() {
            return Err(IrError::argument_out_of_range(format!(
                "unknown method handle {method} in source context"
            )));
        }
        if self.builder_open.load(Ordering::SeqCst) {
            return Err(IrError::invalid_operation(
                "import requires all builders to be released",
            ));
        }

        // Dependency closure in deterministic BFS order.
        let mut order = vec![method];
        let mut seen: HashSet<MethodId> = order.iter().copied().collect();
        let mut cursor = 0;
        while cursor < order.len() {
            let current = order[cursor];
            cursor += 1;
            for callee in source.method(current).callees() {
                if source.get_method(callee).is_some() && seen.insert(callee) {
                    order.push(callee);
                }
            }
        }

        let mut type_cache: HashMap<TypeId, TypeId> = HashMap::new();
        let mut method_map: HashMap<MethodId, MethodId> = HashMap::new();
        for &src_handle in &order {
            let src = source.method(src_handle);
            let return_type = remap_type(
                &source.types,
                &mut self.types,
                &mut type_cache,
                src.return_type(),
            );
            let mut declaration = src.declaration().clone();
            declaration.return_type = return_type;
            let dst_handle = self.declare(declaration)?;
            method_map.insert(src_handle, dst_handle);
        }

        for &src_handle in &order {
            self.import_body(source, src_handle, &method_map, &mut type_cache)?;
        }

        tracing::debug!(
            imported = order.len(),
            root = %method_map[&method],
            "import"
        );
        Ok(method_map[&method])
    }

    /// Clones a method and all reachable types and methods into a fresh
    /// context, preserving structure and resetting node ids.
    pub fn extract_to_context(&self, method: MethodId) -> Result<(IrContext, MethodId), IrError> {
        let mut extracted = IrContext::new(self.flags);
        let handle = extracted.import(self, method)?;
        Ok((extracted, handle))
    }

    fn import_body(
        &mut self,
        source: &IrContext,
        src_handle: MethodId,
        method_map: &HashMap<MethodId, MethodId>,
        type_cache: &mut HashMap<TypeId, TypeId>,
    ) -> Result<(), IrError> {
        let src = source.method(src_handle);

        // Dense remapping over surviving value slots; operands resolve
        // through forwarding before they are remapped.
        let mut value_map: Vec<Option<ValueId>> = vec![None; src.num_value_slots()];
        let mut next = 0u32;
        for slot in 0..src.num_value_slots() {
            let id = ValueId(slot as u32);
            if src.is_removed(id) || src.is_replaced(id) {
                continue;
            }
            value_map[slot] = Some(ValueId(next));
            next += 1;
        }

        let types = &mut self.types;
        let ids = &self.next_node_id;
        let fresh_id = || NodeId(ids.fetch_add(1, Ordering::Relaxed));

        let mut values: Vec<ValueSlot> = Vec::with_capacity(next as usize);
        for slot in 0..src.num_value_slots() {
            let id = ValueId(slot as u32);
            if value_map[slot].is_none() {
                continue;
            }
            let mut value = src.value(id).clone();
            value.id = fresh_id();
            value.ty = remap_type(&source.types, types, type_cache, value.ty);
            let operands: smallvec::SmallVec<[ValueId; 2]> = value
                .operands
                .iter()
                .map(|&op| {
                    value_map[src.resolve(op).index()]
                        .expect("import dropped a referenced value")
                })
                .collect();
            value.operands = operands;
            if let ValueKind::MethodCall { target } = value.kind {
                value.kind = ValueKind::MethodCall {
                    target: *method_map.get(&target).expect("callee not imported"),
                };
            }
            values.push(ValueSlot {
                value,
                forwarded: None,
                removed: false,
                marker: 0,
            });
        }

        // Blocks keep their arena order, so block handles map one-to-one.
        let mut blocks: Vec<BasicBlock> = Vec::with_capacity(src.num_blocks());
        for block_id in src.block_ids() {
            let block = src.block(block_id);
            let mut rebuilt = BasicBlock::new(fresh_id(), block.location().clone());
            for &v in block.values() {
                if src.is_removed(v) || src.is_replaced(v) {
                    continue;
                }
                rebuilt.values.push(value_map[v.index()].unwrap());
            }
            rebuilt.terminator = block
                .terminator()
                .filter(|&t| !src.is_removed(t) && !src.is_replaced(t))
                .map(|t| value_map[t.index()].unwrap());
            blocks.push(rebuilt);
        }

        let parameters = src
            .parameters()
            .iter()
            .map(|&p| value_map[p.index()].expect("parameter dropped during import"))
            .collect();

        let dst_handle = method_map[&src_handle];
        let generation = self.generation;
        let dst = self.method_mut(dst_handle);
        dst.parameters = parameters;
        dst.entry = src.entry_block();
        dst.blocks = blocks;
        dst.values = values;
        dst.location = src.location().clone();
        dst.generation = generation;
        dst.control_flow_update();
        Ok(())
    }
}

/// Re-interns a type from one universe into another, memoized through
/// `cache`. Children are remapped first, so the result is canonical in the
/// destination universe.
pub(crate) fn remap_type(
    old: &TypeUniverse,
    new: &mut TypeUniverse,
    cache: &mut HashMap<TypeId, TypeId>,
    id: TypeId,
) -> TypeId {
    if let Some(&mapped) = cache.get(&id) {
        return mapped;
    }
    let mapped = match old.node(id).clone() {
        TypeNode::Void => new.void(),
        TypeNode::String => new.string(),
        TypeNode::Primitive(basic) => new.primitive(basic),
        TypeNode::Padding(basic) => new.padding(basic),
        TypeNode::Pointer { element, space } => {
            let element = remap_type(old, new, cache, element);
            new.pointer(element, space)
        }
        TypeNode::View { element, space } => {
            let element = remap_type(old, new, cache, element);
            new.view(element, space)
        }
        TypeNode::Array {
            element,
            dimensions,
        } => {
            let element = remap_type(old, new, cache, element);
            new.array(element, dimensions)
        }
        TypeNode::Structure { fields } => {
            let fields: Vec<TypeId> = fields
                .iter()
                .map(|&f| remap_type(old, new, cache, f))
                .collect();
            let mut builder = new.structure();
            for field in fields {
                builder.add_field(field);
            }
            builder.seal()
        }
    };
    cache.insert(id, mapped);
    mapped
}
