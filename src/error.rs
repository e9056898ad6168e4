//! Error types for query analysis and rewriting.

use thiserror::Error;

/// Errors reported to callers of the analysis and rewrite APIs.
///
/// Both kinds are local to one query or one rewrite call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The query is semantically invalid: an alias collides with a target
    /// name, or a qualified field names an unknown target or alias.
    #[error("client error: {0}")]
    Client(String),

    /// The query cannot be parsed, or a field's owning target cannot be
    /// determined while rewriting.
    #[error("query error: {0}")]
    Query(String),
}

impl Error {
    pub fn client(message: impl Into<String>) -> Self {
        Error::Client(message.into())
    }

    pub fn query(message: impl Into<String>) -> Self {
        Error::Query(message.into())
    }

    pub fn is_client(&self) -> bool {
        matches!(self, Error::Client(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::client("Invalid alias 'A', same with target name");
        assert_eq!(
            err.to_string(),
            "client error: Invalid alias 'A', same with target name"
        );
        assert!(err.is_client());

        let err = Error::query("unexpected end of input");
        assert!(err.to_string().starts_with("query error:"));
        assert!(!err.is_client());
    }
}
