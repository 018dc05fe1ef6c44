//! # csvql
//!
//! csvql is an in-process SQL query engine that executes a subset of SQL
//! over CSV files treated as read-only relations. Map one or more CSV file
//! patterns onto a named table schema, issue a SQL statement, and receive a
//! CSV-formatted result stream.
//!
//! ```no_run
//! use csvql::engine::{Database, ExecutionEngine};
//!
//! # fn main() -> Result<(), csvql::engine::CsvqlError> {
//! let mut engine = ExecutionEngine::new(Database::in_memory());
//! engine.set_files(vec!["/data/employees.csv".into()]);
//!
//! let mut output = Vec::new();
//! engine.execute(
//!     "CREATE TABLE employees(id INT, first_name STRING(64), last_name STRING(64))",
//!     &mut output,
//! )?;
//! engine.execute("CREATE MAPPING employees('employees\\.csv')", &mut output)?;
//! engine.execute("SELECT * FROM employees WHERE id > 100", &mut output)?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(unused_imports)]

pub use csvql_ast as ast;
pub use csvql_core as core;
pub use csvql_engine as engine;
pub use csvql_lexer as lexer;
pub use csvql_parser as parser;
