//! # csvql-lexer
//!
//! The SQL lexer of csvql. Turns a statement into a sequence of
//! location-tagged tokens, skipping whitespace and comments.

#![deny(missing_docs)]
#![deny(unused_imports)]

mod lexer;

pub use self::lexer::Lexer;
pub use csvql_core::{Ident, Keyword, LexicalError, LocatedToken, Location, Token};
