//! Flat export/import object model for gpuir contexts.
//!
//! The core IR is arena-based and cyclic; serialization and backends
//! consume it as a flat, id-keyed triple of method, value, and type
//! records instead. [`export_context`]/[`export_method`] produce a
//! [`Container`]; [`import_container`] rebuilds a verified context from
//! one, tolerating arbitrary record order.
//!
//! # Modules
//!
//! - [`records`]: the flattened record types
//! - [`export`]: context/method flattening
//! - [`import`]: order-tolerant rebuild with type toposorting
//! - [`error`]: `ImportError` with all failure modes

pub mod error;
pub mod export;
pub mod import;
pub mod records;

// Re-export key types for ergonomic use.
pub use error::ImportError;
pub use export::{export_context, export_method};
pub use import::{import_container, import_container_with_flags};
pub use records::{
    Container, IrMethodRecord, IrTypeRecord, IrValueRecord, RecordValueKind, TypeClass,
    NO_BLOCK_ID, VOID_TYPE_ID,
};
