//! Textual IR dumps.
//!
//! [`MethodDump`] renders a method as blocks of numbered values, one value
//! per line, with kind names, operands, and branch targets. The output is
//! meant for diagnostics and tests, not for parsing.

use std::fmt;

use crate::method::Method;
use crate::types::TypeNode;
use crate::universe::{TypeId, TypeUniverse};
use crate::value::ValueKind;

/// Renders a type as a compact name like `Int32`, `ptr<Int64, global>`, or
/// `struct{Int32, Int64}`.
pub fn format_type(universe: &TypeUniverse, id: TypeId) -> String {
    match universe.node(id) {
        TypeNode::Void => "void".into(),
        TypeNode::String => "string".into(),
        TypeNode::Primitive(basic) => basic.to_string(),
        TypeNode::Padding(basic) => format!("padding<{basic}>"),
        TypeNode::Pointer { element, space } => {
            format!("ptr<{}, {space}>", format_type(universe, *element))
        }
        TypeNode::View { element, space } => {
            format!("view<{}, {space}>", format_type(universe, *element))
        }
        TypeNode::Array {
            element,
            dimensions,
        } => format!("array<{}, {dimensions}>", format_type(universe, *element)),
        TypeNode::Structure { fields } => {
            let fields: Vec<String> = fields
                .iter()
                .map(|&f| format_type(universe, f))
                .collect();
            format!("struct{{{}}}", fields.join(", "))
        }
    }
}

/// A displayable dump of one method.
pub struct MethodDump<'a> {
    method: &'a Method,
    universe: &'a TypeUniverse,
}

impl<'a> MethodDump<'a> {
    pub fn new(method: &'a Method, universe: &'a TypeUniverse) -> Self {
        MethodDump { method, universe }
    }
}

impl fmt::Display for MethodDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let method = self.method;
        write!(f, "method @{}(", method.name())?;
        for (i, &parameter) in method.parameters().iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            let value = method.value(parameter);
            write!(
                f,
                "{parameter}: {}",
                format_type(self.universe, value.ty)
            )?;
        }
        writeln!(
            f,
            ") : {} {{",
            format_type(self.universe, method.return_type())
        )?;

        let blocks: Vec<_> = if method.rpo().is_empty() {
            method.block_ids().collect()
        } else {
            method.rpo().to_vec()
        };
        for block_id in blocks {
            let block = method.block(block_id);
            write!(f, "  {block_id}:")?;
            if !block.predecessors().is_empty() {
                write!(f, " ; preds:")?;
                for &pred in block.predecessors() {
                    write!(f, " {pred}")?;
                }
            }
            writeln!(f)?;
            for value_id in method.block_values(block_id) {
                let value = method.value(value_id);
                write!(f, "    ")?;
                if value.ty != TypeId::VOID {
                    write!(f, "{value_id} = ")?;
                }
                write!(f, "{}", value.kind.name())?;
                match &value.kind {
                    ValueKind::PrimitiveValue { value: constant } => {
                        write!(f, " {constant}")?;
                    }
                    ValueKind::StringValue { value: text } => write!(f, " {text:?}")?,
                    ValueKind::MethodCall { target } => write!(f, " @{target}")?,
                    ValueKind::LoadFieldAddress { field }
                    | ValueKind::GetField { field }
                    | ValueKind::SetField { field } => write!(f, " #{field}")?,
                    _ => {}
                }
                for &operand in &value.operands {
                    write!(f, " {}", method.resolve(operand))?;
                }
                for &target in &value.block_operands {
                    write!(f, " {target}")?;
                }
                writeln!(f)?;
            }
        }
        write!(f, "}}")
    }
}
