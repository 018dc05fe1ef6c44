//! # csvql-parser
//!
//! The recursive-descent SQL parser of csvql. Parses statements with one
//! token of lookahead, building the AST and the symbol table skeleton of
//! every query scope on the way.

#![deny(missing_docs)]
#![deny(unused_imports)]

mod error;
mod parser;

pub use self::{
    error::ParserError,
    parser::Parser,
};
