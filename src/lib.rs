pub mod ast;
pub mod config;
pub mod error;
pub mod field;
pub mod query;

pub use error::{Error, Result};
pub use query::{rewrite_query, Mapping, Query, QueryDescriptor, QueryParams};
