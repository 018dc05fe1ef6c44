use std::{
    path::Path,
    rc::Rc,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
};

use crossbeam_channel::{unbounded, Receiver};
use csvql_ast::{SymbolRef, SymbolTableRef};
use csvql_core::{Type, Value};
use tracing::debug;

use crate::{
    block::{Block, BlockProvider, Row},
    csvreader::{spawn_csv_ingest, CsvReadOptions},
    engine::OperatorContext,
    error::CsvqlError,
    iterator::BlockIterator,
    mapping::FileMapping,
    operators::RowOperator,
};

/// Consumes the blocks pushed by the dedicated CSV ingest thread. Dropping
/// the reader before EOF sets the cancel flag, disconnects the channel and
/// joins the thread.
pub(crate) struct BlockReader {
    receiver: Option<Receiver<Block>>,
    handle: Option<JoinHandle<()>>,
    cancel: Arc<AtomicBool>,
}

impl BlockReader {
    /// Opens the file and starts the ingest thread.
    pub(crate) fn new(
        path: &Path,
        types: Vec<Type>,
        options: CsvReadOptions,
        context: &OperatorContext,
    ) -> Result<Self, CsvqlError> {
        let cancel = Arc::new(AtomicBool::new(false));
        let (sender, receiver) = unbounded();
        let handle = spawn_csv_ingest(
            path,
            types,
            options,
            context.block_manager.clone(),
            sender,
            cancel.clone(),
        )?;
        Ok(BlockReader {
            receiver: Some(receiver),
            handle: Some(handle),
            cancel,
        })
    }
}

impl BlockProvider for BlockReader {
    fn next_block(&mut self) -> Result<Option<Block>, CsvqlError> {
        match &self.receiver {
            Some(receiver) => Ok(receiver.recv().ok()),
            None => Ok(None),
        }
    }
}

impl Drop for BlockReader {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        // disconnect the channel so a producer mid-push can finish
        self.receiver.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Returns the output schema of a scan: the table's column list restricted
/// to the columns referenced in the enclosing scope.
fn scan_column_infos(
    symbol_table: &SymbolTableRef,
    table_name: &str,
    columns: &[csvql_ast::Column],
) -> Vec<SymbolRef> {
    let symbol_table = symbol_table.borrow();
    columns
        .iter()
        .filter_map(|column| symbol_table.find_symbol_for_table(table_name, &column.name))
        .collect()
}

/// Produces rows from the CSV file mapped to a table, filled by the ingest
/// thread block by block.
pub(crate) struct TableScanOperatorNode {
    context: Rc<OperatorContext>,
    symbol_table: SymbolTableRef,
    table_name: String,
    table_identifier: String,
    columns: Vec<csvql_ast::Column>,
    types: Vec<Type>,
    iterator: Option<BlockIterator<BlockReader>>,
}

impl TableScanOperatorNode {
    pub(crate) fn new(
        context: Rc<OperatorContext>,
        symbol_table: SymbolTableRef,
        table_info: &SymbolRef,
    ) -> Result<Self, CsvqlError> {
        let (table_name, table_identifier) = {
            let info = table_info.borrow();
            (info.name.clone(), info.identifier.clone())
        };
        let database = context.database.borrow();
        let schema = database.table(&table_identifier)?;
        let columns = schema.columns().to_vec();
        let types = columns.iter().map(|column| column.ty).collect();
        drop(database);
        Ok(TableScanOperatorNode {
            context,
            symbol_table,
            table_name,
            table_identifier,
            columns,
            types,
            iterator: None,
        })
    }

    fn initialize_block_reader(&mut self) -> Result<(), CsvqlError> {
        let entry = self
            .context
            .database
            .borrow()
            .mapping_for_table(&self.table_identifier)?
            .clone();
        let file = FileMapping::find_file(&entry, &self.context.files)?.to_string();
        debug!(table = %self.table_identifier, file = %file, "starting table scan");
        let reader = BlockReader::new(
            Path::new(&file),
            self.types.clone(),
            CsvReadOptions {
                delimiter: entry.delimiter,
                skip_first_line: entry.skip_first_line,
            },
            &self.context,
        )?;
        self.iterator = Some(BlockIterator::new(
            reader,
            self.context.block_manager.clone(),
        ));
        Ok(())
    }
}

impl RowOperator for TableScanOperatorNode {
    fn next_row(&mut self) -> Result<Option<Row>, CsvqlError> {
        if self.iterator.is_none() {
            self.initialize_block_reader()?;
        }
        self.iterator
            .as_mut()
            .expect("block reader was just initialized")
            .next_row()
    }

    fn column_infos(&self) -> Vec<SymbolRef> {
        scan_column_infos(&self.symbol_table, &self.table_name, &self.columns)
    }

    fn dump(&self, output: &mut String) {
        output.push_str(&format!("TableScanOperator ({})\n", self.table_identifier));
    }
}

/// Emits the single `SYSTEM_DUAL` row without any I/O.
pub(crate) struct SystemTableScanOperatorNode {
    context: Rc<OperatorContext>,
    symbol_table: SymbolTableRef,
    table_name: String,
    table_identifier: String,
    columns: Vec<csvql_ast::Column>,
    iterator: Option<BlockIterator<SystemTableProvider>>,
}

pub(crate) struct SystemTableProvider {
    context: Rc<OperatorContext>,
    emitted: bool,
}

impl BlockProvider for SystemTableProvider {
    fn next_block(&mut self) -> Result<Option<Block>, CsvqlError> {
        if self.emitted {
            return Ok(None);
        }
        self.emitted = true;
        let mut block = self.context.block_manager.create_block();
        block.add_value(&Value::Boolean(false));
        block.next_row();
        block.end_blocks();
        Ok(Some(block))
    }
}

impl SystemTableScanOperatorNode {
    pub(crate) fn new(
        context: Rc<OperatorContext>,
        symbol_table: SymbolTableRef,
        table_info: &SymbolRef,
    ) -> Result<Self, CsvqlError> {
        let (table_name, table_identifier) = {
            let info = table_info.borrow();
            (info.name.clone(), info.identifier.clone())
        };
        let database = context.database.borrow();
        let schema = database.table(&table_identifier)?;
        let columns = schema.columns().to_vec();
        drop(database);
        Ok(SystemTableScanOperatorNode {
            context,
            symbol_table,
            table_name,
            table_identifier,
            columns,
            iterator: None,
        })
    }
}

impl RowOperator for SystemTableScanOperatorNode {
    fn next_row(&mut self) -> Result<Option<Row>, CsvqlError> {
        if self.iterator.is_none() {
            self.iterator = Some(BlockIterator::new(
                SystemTableProvider {
                    context: self.context.clone(),
                    emitted: false,
                },
                self.context.block_manager.clone(),
            ));
        }
        self.iterator
            .as_mut()
            .expect("iterator was just initialized")
            .next_row()
    }

    fn column_infos(&self) -> Vec<SymbolRef> {
        scan_column_infos(&self.symbol_table, &self.table_name, &self.columns)
    }

    fn dump(&self, output: &mut String) {
        output.push_str(&format!(
            "SystemTableScanOperatorNode({})\n",
            self.table_identifier
        ));
    }
}
