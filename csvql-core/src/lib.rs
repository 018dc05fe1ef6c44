//! # csvql-core
//!
//! csvql-core is a core library with the types shared by all csvql crates:
//! the SQL type system, the tagged [`Value`] variant, tokens and keywords.

#![deny(missing_docs)]
#![deny(unused_imports)]

mod error;
mod keyword;
mod tokens;
mod types;
mod value;

pub use self::{
    error::{LexicalError, Location},
    keyword::Keyword,
    tokens::{Ident, LocatedToken, Token},
    types::Type,
    value::{Value, ValueError},
};
