//! # csvql-ast
//!
//! The SQL AST of csvql: statement and expression nodes, the per-scope symbol
//! tables built by the parser and typed against the catalog, and the table
//! schema model shared with the catalog.

#![deny(missing_docs)]
#![deny(unused_imports)]

mod dump;
mod error;
mod expr;
mod operator;
mod query;
mod schema;
mod statement;
mod symbol;
mod utils;

pub use self::{
    dump::dump_statement,
    error::SemanticError,
    expr::{
        builtin_function_type, AggregateExpr, AggregateKind, BetweenExpr, BinaryOpExpr, CastExpr,
        Expr, FunctionExpr, Identifier, InExpr, LikeExpr, QualifiedAsterisk, UnaryOpExpr,
    },
    operator::{BinaryOperator, UnaryOperator},
    query::{
        DerivedColumn, FromClause, GroupByClause, Join, JoinKind, LimitClause, NamedType,
        NaturalJoinKind, OrderByClause, OrderExpression, Quantifier, Query, QueryExpr,
        QuerySpecification, SortOrder, TableExpression, TableIdentifier, TableReference,
        TableSubquery, UnionExpr,
    },
    schema::{CatalogRef, Column, SchemaConstraint, TableSchema},
    statement::{
        AlterTableAddStatement, AlterTableDropStatement, ColumnDefinition, CreateMappingStatement,
        CreateTableStatement, DropMappingStatement, DropTableStatement, ExplainKind,
        ExplainStatement, MappingEntry, Statement, TableConstraint,
    },
    symbol::{SymbolInfo, SymbolKind, SymbolRef, SymbolTable, SymbolTableRef},
};
