use core::fmt;

/// A position in the SQL input, 1-based.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Location {
    /// Line number, starting at 1.
    pub line: u64,
    /// Column number, starting at 1.
    pub column: u64,
}

impl Default for Location {
    fn default() -> Self {
        Self { line: 1, column: 1 }
    }
}

impl Location {
    /// Advances the location over the given character.
    pub fn advance(&mut self, ch: char) {
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
    }

    /// Creates a lexical error at this location.
    pub fn into_error(self, message: impl Into<String>) -> LexicalError {
        LexicalError {
            message: message.into(),
            line: self.line,
            column: self.column,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// Lexer error, raised when no token definition matches the input.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message} at line {line}, column {column}")]
pub struct LexicalError {
    /// What went wrong.
    pub message: String,
    /// Line the error was detected on.
    pub line: u64,
    /// Column the error was detected at.
    pub column: u64,
}
