//! Node type registry.
//!
//! Every node type a workflow may reference is declared here: its
//! configuration schema, I/O handles, category, session behavior and
//! execution defaults. The catalog is populated once at startup and read
//! concurrently afterwards.

pub mod builtin;
pub mod config_schema;
pub mod entry;

pub use config_schema::{ConfigIssue, ConfigSchema, FieldSchema, FieldShape};
pub use entry::{
    DataShape, HandleDirection, HandleSpec, NodeCatalog, NodeCatalogEntry, NodeCategory,
};
