//! # csvql-engine
//!
//! The execution engine of csvql: the catalog with its file mappings, the
//! typed block store, the streaming operator nodes, the expression stack
//! machine and the planner that lowers a parsed query into an operator
//! pipeline producing a CSV result stream.

#![deny(unused_imports)]

mod aggregate;
mod block;
mod compile;
mod csvreader;
mod database;
mod engine;
mod error;
mod function;
mod iterator;
mod mapping;
mod operators;
mod plan;
mod scan;
mod stack;
mod validator;

pub use self::{
    aggregate::{create_aggregation, AggregationFunction},
    block::{Block, BlockManager, BlockProvider, Row, DEFAULT_BLOCK_CAPACITY},
    compile::{compile_expression, CompiledExpression},
    database::Database,
    engine::{ExecutionEngine, OperatorContext},
    error::CsvqlError,
    function::{FunctionRegistry, ScalarFunction},
    iterator::{
        BlockIterator, CachingBlockIterator, GroupingBlockIterator, HashingBlockIterator,
        SortingBlockIterator,
    },
    mapping::FileMapping,
    operators::{RootOperatorNode, RowOperator},
    plan::{ExecutionNode, ExecutionPlan},
    stack::{Instruction, StackMachine, VariableStore},
    validator::validate,
};
