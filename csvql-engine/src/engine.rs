use std::{cell::RefCell, io::Write, rc::Rc, sync::Arc};

use csvql_parser::Parser;
use tracing::debug;

use crate::{
    block::BlockManager,
    database::Database,
    error::CsvqlError,
    function::FunctionRegistry,
    plan::ExecutionPlan,
    validator::validate,
};

/// Everything the operators of one query share: the catalog, the function
/// registry, the block manager, the candidate input files and the output
/// options. The context is immutable for the lifetime of an execution; the
/// catalog is only borrowed mutably by DDL statements.
pub struct OperatorContext {
    /// The catalog.
    pub database: Rc<RefCell<Database>>,
    /// The scalar function registry.
    pub functions: Rc<FunctionRegistry>,
    /// The block allocation authority of the query.
    pub block_manager: Arc<BlockManager>,
    /// The candidate input files that mappings are matched against.
    pub files: Vec<String>,
    /// Whether the output sink writes the `#`-prefixed header line.
    pub show_header_line: bool,
}

/// The engine: parses, validates, plans and executes one statement per
/// call, writing the CSV result stream into the given output.
pub struct ExecutionEngine {
    database: Rc<RefCell<Database>>,
    functions: Rc<FunctionRegistry>,
    block_manager: Arc<BlockManager>,
    files: Vec<String>,
    show_header_line: bool,
}

impl ExecutionEngine {
    /// Creates an engine over the given catalog.
    pub fn new(database: Database) -> Self {
        ExecutionEngine {
            database: Rc::new(RefCell::new(database)),
            functions: Rc::new(FunctionRegistry::with_builtins()),
            block_manager: Arc::new(BlockManager::default()),
            files: vec![],
            show_header_line: true,
        }
    }

    /// Sets the candidate input files table scans match their mapping
    /// patterns against.
    pub fn set_files(&mut self, files: Vec<String>) {
        self.files = files;
    }

    /// Controls the header line of the result stream.
    pub fn set_show_header_line(&mut self, show_header_line: bool) {
        self.show_header_line = show_header_line;
    }

    /// The shared catalog.
    pub fn database(&self) -> Rc<RefCell<Database>> {
        self.database.clone()
    }

    /// The block manager of this engine, for memory statistics.
    pub fn block_manager(&self) -> &BlockManager {
        &self.block_manager
    }

    /// Executes one SQL statement. Returns the number of result rows
    /// written (zero for DDL statements); on an error, nothing beyond the
    /// already flushed rows is written and the count is meaningless.
    pub fn execute(&mut self, sql: &str, output: &mut dyn Write) -> Result<i64, CsvqlError> {
        debug!(%sql, "executing statement");
        let statement = Parser::new_with_sql(sql)?.parse_statement()?;
        validate(&statement, &self.database.borrow())?;

        let context = Rc::new(OperatorContext {
            database: self.database.clone(),
            functions: self.functions.clone(),
            block_manager: self.block_manager.clone(),
            files: self.files.clone(),
            show_header_line: self.show_header_line,
        });
        let mut plan = ExecutionPlan::create(context, statement)?;
        plan.execute(output)
    }
}
