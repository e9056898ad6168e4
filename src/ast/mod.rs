/// EPL statement model and the tooling around it.
///
/// ```text
/// EPL text
///       ↓
/// Language Adapter        (adapter.rs, parser.rs)
///       ↓
/// Statement model         (types.rs)
///       ↓
/// Scope lookup / fields   (fields.rs)      → query analysis
/// Clause traversal        (traverse.rs)    → rewrite passes
///       ↓
/// EPL Compiler            (compiler.rs)
/// ```
pub mod adapter;
pub mod compiler;
pub mod fields;
pub mod parser;
pub mod traverse;
pub mod types;

// Re-export key types for convenience
pub use adapter::{EplAdapter, QueryLanguageAdapter};
pub use compiler::compile;
pub use fields::{FieldRef, Node, NodeKind, StreamNode};
pub use parser::{parse_epl, parse_with_options, Grammar, ParserOptions, DEFAULT_MAX_DEPTH};
pub use traverse::{traverse, Visitor};
pub use types::*;
