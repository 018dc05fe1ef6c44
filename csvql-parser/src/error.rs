use csvql_core::LexicalError;

/// Parser error
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParserError {
    /// Tokenize error.
    #[error(transparent)]
    Tokenize(#[from] LexicalError),
    /// Parse error, carrying the offending token and its location.
    #[error("{0}")]
    Parse(String),
}

/// A helper to create a parser error result.
pub(crate) fn parse_error<R>(message: impl Into<String>) -> Result<R, ParserError> {
    Err(ParserError::Parse(message.into()))
}
