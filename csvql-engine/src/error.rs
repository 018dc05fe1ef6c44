use csvql_ast::SemanticError;
use csvql_core::{LexicalError, ValueError};
use csvql_parser::ParserError;

/// The error type of the engine, covering the whole pipeline from
/// tokenizing to execution. Per-row CSV errors do not surface here; they
/// are logged and the row is skipped.
#[derive(Debug, thiserror::Error)]
pub enum CsvqlError {
    /// The tokenizer could not match the input.
    #[error(transparent)]
    Lexical(#[from] LexicalError),
    /// The parser hit an unexpected token or an incomplete phrase.
    #[error(transparent)]
    Parse(#[from] ParserError),
    /// Symbol resolution, type inference or validation failed.
    #[error(transparent)]
    Semantic(#[from] SemanticError),
    /// A runtime failure in the stack machine or an aggregate.
    #[error("evaluation error: {0}")]
    Evaluation(String),
    /// A catalog failure: unknown or duplicate table, missing mapping,
    /// or an attempt to modify a system table.
    #[error("catalog error: {0}")]
    Catalog(String),
    /// A file could not be opened or read.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Invalid options to CREATE MAPPING or a broken mapping pattern.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<ValueError> for CsvqlError {
    fn from(err: ValueError) -> Self {
        CsvqlError::Evaluation(err.to_string())
    }
}

impl From<serde_json::Error> for CsvqlError {
    fn from(err: serde_json::Error) -> Self {
        CsvqlError::Catalog(format!("cannot read catalog entry: {}", err))
    }
}

impl CsvqlError {
    /// Shorthand for an evaluation error.
    pub(crate) fn evaluation(message: impl Into<String>) -> Self {
        CsvqlError::Evaluation(message.into())
    }

    /// Shorthand for a catalog error.
    pub(crate) fn catalog(message: impl Into<String>) -> Self {
        CsvqlError::Catalog(message.into())
    }
}
