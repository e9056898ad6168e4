/// Language adapter seam between query text and the statement model.
///
/// `Query` only knows this trait; the EPL adapter is the one it uses by
/// default.
use super::parser::{parse_with_options, ParserOptions};
use super::types::Statement;
use crate::error::Result;

/// Adapter for parsing a query language into the statement model.
///
/// # Example
///
/// ```ignore
/// let adapter = EplAdapter::default();
/// let statement = adapter.parse("select * from Target")?;
/// ```
pub trait QueryLanguageAdapter: Send + Sync {
    /// Human-readable name of the language this adapter handles.
    fn name(&self) -> &str;

    /// Parse input text into a single statement.
    fn parse(&self, input: &str) -> Result<Statement>;
}

/// Adapter for the EPL subset understood by `parser`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EplAdapter {
    pub options: ParserOptions,
}

impl EplAdapter {
    pub fn new(options: ParserOptions) -> Self {
        Self { options }
    }
}

impl QueryLanguageAdapter for EplAdapter {
    fn name(&self) -> &str {
        "EPL"
    }

    fn parse(&self, input: &str) -> Result<Statement> {
        parse_with_options(input, &self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epl_adapter() {
        let adapter = EplAdapter::default();
        assert_eq!(adapter.name(), "EPL");
        let statement = adapter.parse("select * from Target").unwrap();
        assert_eq!(statement.from.streams.len(), 1);
        assert!(adapter.parse("select from").is_err());
    }

    #[test]
    fn test_epl_adapter_honors_options() {
        let adapter = EplAdapter::new(ParserOptions { max_depth: 2 });
        assert!(adapter.parse("select x from T").is_ok());
        assert!(adapter.parse("select ((x)) from T").is_err());
    }
}
