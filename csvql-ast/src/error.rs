/// An error raised during symbol resolution, type inference or semantic
/// validation.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SemanticError {
    /// An identifier could not be resolved in any table of the scope.
    #[error("symbol '{0}' not found in any table")]
    UnknownSymbol(String),
    /// An identifier resolves in more than one table of the scope.
    #[error("ambiguous symbol '{0}' found")]
    AmbiguousSymbol(String),
    /// A table is not part of the catalog.
    #[error("table '{0}' not found")]
    UnknownTable(String),
    /// A column is not part of the named table.
    #[error("column '{0}' not found in table '{1}'")]
    UnknownColumn(String, String),
    /// The operand types do not fit an operation.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    /// Both sides of a UNION have to produce the same select list.
    #[error("both sides of a UNION must have the same select list")]
    UnionMismatch,
    /// The left side of a UNION has no output columns.
    #[error("a relation in a UNION must have at least one element in the select list")]
    EmptyUnionSide,
    /// More than one table reference in FROM without an explicit join.
    #[error("implicit joins are not allowed")]
    ImplicitJoin,
    /// A WHERE or ON condition with a non-boolean type.
    #[error("{0} condition has to be a boolean value expression")]
    NotBoolean(&'static str),
    /// A construct that is parsed but cannot be executed.
    #[error("{0} is not supported")]
    Unsupported(&'static str),
}

impl From<csvql_core::ValueError> for SemanticError {
    fn from(err: csvql_core::ValueError) -> Self {
        SemanticError::TypeMismatch(err.to_string())
    }
}
