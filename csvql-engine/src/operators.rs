use std::{io::Write, mem, rc::Rc};

use csvql_ast::{
    DerivedColumn, Expr, Identifier, SortOrder, SymbolInfo, SymbolRef, SymbolTableRef,
};
use csvql_core::{Type, Value};

use crate::{
    aggregate::{create_aggregation, create_path_through, AggregationFunction},
    block::{Block, BlockProvider, Row},
    compile::{bind_variables, compile_expression, fill_variable_store, variable_index, CompiledExpression},
    engine::OperatorContext,
    error::CsvqlError,
    iterator::{
        BlockIterator, CachingBlockIterator, GroupingBlockIterator, HashingBlockIterator,
        SortingBlockIterator,
    },
    stack::VariableStore,
};

/// A streaming stage that yields tuples. Operators are connected bottom-up
/// into a pipeline and pulled from the root.
pub trait RowOperator {
    /// Returns the next tuple, or `None` at end of input (permanently).
    fn next_row(&mut self) -> Result<Option<Row>, CsvqlError>;

    /// Reports the output schema as symbols.
    fn column_infos(&self) -> Vec<SymbolRef>;

    /// Assigns a subquery alias to the output schema.
    fn set_output_alias(&mut self, _alias: &str) {}

    /// Writes a one-line description plus `-->` recursion into the inputs.
    fn dump(&self, output: &mut String);
}

/// The root of a pipeline; drives execution and writes the result stream.
pub trait RootOperatorNode {
    /// Pulls the pipeline to exhaustion, writing the CSV result stream.
    /// Returns the number of rows written (not counting the header).
    fn process(&mut self, output: &mut dyn Write) -> Result<i64, CsvqlError>;

    /// Writes a description of the pipeline.
    fn dump(&self, output: &mut String);
}

/// The matching rule tying an identifier symbol to an input column symbol:
/// by scope name, by qualified identifier, or by bare identifier for an
/// unprefixed reference.
fn symbol_matches(ident: &SymbolInfo, info: &SymbolInfo) -> bool {
    (!ident.name.is_empty() && ident.name == info.name)
        || (!ident.qualified_identifier.is_empty()
            && ident.qualified_identifier == info.qualified_identifier)
        || (ident.prefix.is_empty() && ident.identifier == info.identifier)
}

fn find_input_index(ident: &SymbolRef, input_symbols: &[SymbolRef]) -> Option<usize> {
    let ident = ident.borrow();
    input_symbols
        .iter()
        .position(|info| symbol_matches(&ident, &info.borrow()))
}

/// Applies a subquery alias to output symbols: every symbol is renamed to
/// `alias.identifier` so that references through the alias resolve.
fn remap_output_symbols(symbols: Vec<SymbolRef>, alias: &Option<String>) -> Vec<SymbolRef> {
    let alias = match alias {
        Some(alias) if !alias.is_empty() => alias,
        _ => return symbols,
    };
    symbols
        .into_iter()
        .map(|info| {
            let mut renamed = info.borrow().clone();
            // calc columns carry their name only through the alias
            let base = if !renamed.identifier.is_empty() {
                renamed.identifier.clone()
            } else if !renamed.alias.is_empty() {
                renamed.alias.clone()
            } else {
                renamed.name.clone()
            };
            renamed.identifier = base.clone();
            renamed.name = format!("{}.{}", alias, base);
            renamed.qualified_identifier = renamed.name.clone();
            renamed.prefix = alias.clone();
            renamed.relation = alias.clone();
            renamed.into_ref()
        })
        .collect()
}

fn dump_symbol_names(symbols: &[SymbolRef], output: &mut String) {
    let mut delim = "";
    for info in symbols {
        output.push_str(delim);
        output.push_str(&info.borrow().name);
        delim = ",";
    }
}

/// Writes the result stream: an optional `#`-prefixed header line, then one
/// CSV line per tuple. The buffer is flushed every 1000 rows.
pub(crate) struct OutputRowOperatorNode {
    input: Box<dyn RowOperator>,
    show_header_line: bool,
}

impl OutputRowOperatorNode {
    pub(crate) fn new(context: &OperatorContext, input: Box<dyn RowOperator>) -> Self {
        OutputRowOperatorNode {
            input,
            show_header_line: context.show_header_line,
        }
    }
}

impl RootOperatorNode for OutputRowOperatorNode {
    fn process(&mut self, output: &mut dyn Write) -> Result<i64, CsvqlError> {
        let mut buffer = String::new();
        if self.show_header_line {
            buffer.push('#');
            dump_symbol_names(&self.input.column_infos(), &mut buffer);
            buffer.push('\n');
        }
        let mut count: i64 = 0;
        while let Some(row) = self.input.next_row()? {
            let mut delim = "";
            for value in &row {
                buffer.push_str(delim);
                delim = ",";
                match value {
                    Value::String(s) => {
                        buffer.push('\'');
                        buffer.push_str(s);
                        buffer.push('\'');
                    }
                    value => buffer.push_str(&value.to_string()),
                }
            }
            buffer.push('\n');
            count += 1;
            if count % 1000 == 0 {
                output.write_all(buffer.as_bytes())?;
                buffer.clear();
            }
        }
        output.write_all(buffer.as_bytes())?;
        output.flush()?;
        Ok(count)
    }

    fn dump(&self, output: &mut String) {
        output.push_str("OutputRowOperator (");
        dump_symbol_names(&self.input.column_infos(), output);
        output.push_str(")\n-->");
        self.input.dump(output);
    }
}

/// Filters rows through a compiled predicate.
pub(crate) struct SelectOperatorNode {
    context: Rc<OperatorContext>,
    input: Box<dyn RowOperator>,
    compiled: CompiledExpression,
    bindings: Vec<(usize, usize)>,
    store: VariableStore,
    output_alias: Option<String>,
}

impl SelectOperatorNode {
    pub(crate) fn new(
        context: Rc<OperatorContext>,
        expr: &Expr,
        input: Box<dyn RowOperator>,
    ) -> Result<Self, CsvqlError> {
        let compiled = compile_expression(expr, &context.functions)?;
        let bindings = bind_variables(&compiled, &input.column_infos())?;
        Ok(SelectOperatorNode {
            context,
            input,
            compiled,
            bindings,
            store: VariableStore::new(),
            output_alias: None,
        })
    }
}

impl RowOperator for SelectOperatorNode {
    fn next_row(&mut self) -> Result<Option<Row>, CsvqlError> {
        while let Some(row) = self.input.next_row()? {
            fill_variable_store(&mut self.store, &self.bindings, &row);
            let verdict = self
                .compiled
                .machine
                .evaluate(&self.store, &self.context.functions)?;
            if verdict == Value::Boolean(true) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn column_infos(&self) -> Vec<SymbolRef> {
        remap_output_symbols(self.input.column_infos(), &self.output_alias)
    }

    fn set_output_alias(&mut self, alias: &str) {
        self.output_alias = Some(alias.to_string());
    }

    fn dump(&self, output: &mut String) {
        output.push_str("SelectOperator\n-->");
        self.input.dump(output);
    }
}

enum ProjectionColumn {
    /// Pass an input column through.
    Input(usize),
    /// Expand a wildcard to a list of input columns.
    Expand(Vec<usize>),
    /// Evaluate a compiled expression over the row.
    Computed {
        compiled: CompiledExpression,
        bindings: Vec<(usize, usize)>,
    },
}

/// The block-building side of the extended projection: evaluates the
/// select-list columns row by row into fresh blocks.
pub(crate) struct ProjectionSource {
    context: Rc<OperatorContext>,
    input: Box<dyn RowOperator>,
    columns: Vec<ProjectionColumn>,
    store: VariableStore,
    block: Option<Block>,
    finished: bool,
}

impl BlockProvider for ProjectionSource {
    fn next_block(&mut self) -> Result<Option<Block>, CsvqlError> {
        if self.finished {
            return Ok(None);
        }
        if self.block.is_none() {
            self.block = Some(self.context.block_manager.create_block());
        }
        let mut full: Option<Block> = None;
        while full.is_none() {
            let row = match self.input.next_row()? {
                Some(row) => row,
                None => {
                    let mut block = self.block.take().expect("projection block exists");
                    block.end_blocks();
                    self.finished = true;
                    return Ok(Some(block));
                }
            };
            for column in &self.columns {
                match column {
                    ProjectionColumn::Input(index) => {
                        append_value(
                            &row[*index],
                            &mut self.block,
                            &mut full,
                            &self.context,
                        )?;
                    }
                    ProjectionColumn::Expand(indices) => {
                        for index in indices {
                            append_value(
                                &row[*index],
                                &mut self.block,
                                &mut full,
                                &self.context,
                            )?;
                        }
                    }
                    ProjectionColumn::Computed { compiled, bindings } => {
                        fill_variable_store(&mut self.store, bindings, &row);
                        let value = compiled
                            .machine
                            .evaluate(&self.store, &self.context.functions)?;
                        append_value(&value, &mut self.block, &mut full, &self.context)?;
                    }
                }
            }
            self.block
                .as_mut()
                .expect("projection block exists")
                .next_row();
        }
        Ok(full)
    }
}

fn append_value(
    value: &Value,
    block: &mut Option<Block>,
    full: &mut Option<Block>,
    context: &OperatorContext,
) -> Result<(), CsvqlError> {
    let current = block.as_mut().expect("projection block exists");
    if !current.add_value(value) {
        current.mark_next_block();
        let fresh = context.block_manager.create_block();
        *full = Some(mem::replace(current, fresh));
        if !current.add_value(value) {
            return Err(CsvqlError::evaluation(
                "value does not fit into an empty block",
            ));
        }
    }
    Ok(())
}

/// Evaluates the select list: identifiers pass their input column through,
/// wildcards expand, any other expression is computed by a stack machine.
pub(crate) struct ExtendedProjectionOperatorNode {
    output_symbols: Vec<SymbolRef>,
    iterator: BlockIterator<ProjectionSource>,
    output_alias: Option<String>,
}

impl ExtendedProjectionOperatorNode {
    pub(crate) fn new(
        context: Rc<OperatorContext>,
        symbol_table: SymbolTableRef,
        columns: &[DerivedColumn],
        input: Box<dyn RowOperator>,
    ) -> Result<Self, CsvqlError> {
        let input_symbols = input.column_infos();
        let mut output_symbols = vec![];
        let mut projection_columns = vec![];

        for derived in columns {
            match &derived.expr {
                Expr::Identifier(ident) => {
                    let index =
                        find_input_index(&ident.info, &input_symbols).ok_or_else(|| {
                            CsvqlError::evaluation(format!(
                                "select list expression '{}' not found in context",
                                ident.info.borrow().name
                            ))
                        })?;
                    output_symbols.push(ident.info.clone());
                    projection_columns.push(ProjectionColumn::Input(index));
                }
                Expr::QualifiedAsterisk(asterisk) => {
                    let table = if asterisk.prefix.is_empty() {
                        None
                    } else {
                        symbol_table.borrow().find_table_symbol(&asterisk.prefix)
                    };
                    match table {
                        Some(table) => {
                            let (table_name, table_identifier) = {
                                let table = table.borrow();
                                (table.name.clone(), table.identifier.clone())
                            };
                            let database = context.database.borrow();
                            let schema = database.table(&table_identifier)?;
                            let mut indices = vec![];
                            for column in schema.columns() {
                                let info = symbol_table
                                    .borrow()
                                    .find_symbol_for_table(&table_name, &column.name)
                                    .ok_or_else(|| {
                                        CsvqlError::evaluation(format!(
                                            "could not find output symbol '{}' in input symbols",
                                            column.name
                                        ))
                                    })?;
                                let index = input_symbols
                                    .iter()
                                    .position(|symbol| Rc::ptr_eq(symbol, &info))
                                    .ok_or_else(|| {
                                        CsvqlError::evaluation(format!(
                                            "could not find output symbol '{}' in input symbols",
                                            column.name
                                        ))
                                    })?;
                                indices.push(index);
                                output_symbols.push(info);
                            }
                            projection_columns.push(ProjectionColumn::Expand(indices));
                        }
                        None => {
                            output_symbols.extend(input_symbols.iter().cloned());
                            projection_columns
                                .push(ProjectionColumn::Expand((0..input_symbols.len()).collect()));
                        }
                    }
                }
                expr => {
                    let info = symbol_table
                        .borrow()
                        .find_symbol(&derived.symbol_name)
                        .ok_or_else(|| {
                            CsvqlError::evaluation(format!(
                                "symbol '{}' not found in scope",
                                derived.symbol_name
                            ))
                        })?;
                    output_symbols.push(info);
                    let compiled = compile_expression(expr, &context.functions)?;
                    let bindings = bind_variables(&compiled, &input_symbols)?;
                    projection_columns.push(ProjectionColumn::Computed { compiled, bindings });
                }
            }
        }

        let manager = context.block_manager.clone();
        let source = ProjectionSource {
            context,
            input,
            columns: projection_columns,
            store: VariableStore::new(),
            block: None,
            finished: false,
        };
        Ok(ExtendedProjectionOperatorNode {
            output_symbols,
            iterator: BlockIterator::new(source, manager),
            output_alias: None,
        })
    }
}

impl RowOperator for ExtendedProjectionOperatorNode {
    fn next_row(&mut self) -> Result<Option<Row>, CsvqlError> {
        self.iterator.next_row()
    }

    fn column_infos(&self) -> Vec<SymbolRef> {
        remap_output_symbols(self.output_symbols.clone(), &self.output_alias)
    }

    fn set_output_alias(&mut self, alias: &str) {
        self.output_alias = Some(alias.to_string());
    }

    fn dump(&self, output: &mut String) {
        output.push_str("ExtendedProjectionOperator (");
        dump_symbol_names(&self.output_symbols, output);
        output.push_str(")\n-->");
        self.iterator.provider().input.dump(output);
    }
}

/// Imposes a key-based order on its input through a sorting iterator.
pub(crate) struct SortOperatorNode {
    iterator: SortingBlockIterator,
    input_symbols: Vec<SymbolRef>,
    order_description: String,
    output_alias: Option<String>,
}

impl SortOperatorNode {
    pub(crate) fn new(
        order_expressions: &[(Expr, SortOrder)],
        input: Box<dyn RowOperator>,
    ) -> Result<Self, CsvqlError> {
        let input_symbols = input.column_infos();
        let mut orders = vec![];
        let mut order_description = String::new();
        for (expr, order) in order_expressions {
            let ident = match expr {
                Expr::Identifier(ident) => ident,
                _ => {
                    return Err(CsvqlError::evaluation(
                        "complex order expressions are not supported yet",
                    ))
                }
            };
            let index = find_input_index(&ident.info, &input_symbols).ok_or_else(|| {
                CsvqlError::evaluation(format!(
                    "order expression '{}' not found in context",
                    ident.info.borrow().name
                ))
            })?;
            if !order_description.is_empty() {
                order_description.push(',');
            }
            order_description.push_str(&format!(
                "{} {}",
                expr,
                match order {
                    SortOrder::Ascending => "ASC",
                    SortOrder::Descending => "DESC",
                }
            ));
            orders.push((index, *order));
        }
        Ok(SortOperatorNode {
            iterator: SortingBlockIterator::new(input, orders),
            input_symbols,
            order_description,
            output_alias: None,
        })
    }
}

impl RowOperator for SortOperatorNode {
    fn next_row(&mut self) -> Result<Option<Row>, CsvqlError> {
        self.iterator.next_row()
    }

    fn column_infos(&self) -> Vec<SymbolRef> {
        remap_output_symbols(self.input_symbols.clone(), &self.output_alias)
    }

    fn set_output_alias(&mut self, alias: &str) {
        self.output_alias = Some(alias.to_string());
    }

    fn dump(&self, output: &mut String) {
        output.push_str(&format!("SortOperator ({})\n-->", self.order_description));
        self.iterator.input().dump(output);
    }
}

/// Discards the first `offset` rows and passes up to `limit` rows through.
pub(crate) struct LimitOperatorNode {
    input: Box<dyn RowOperator>,
    limit: i64,
    offset: i64,
    output_alias: Option<String>,
}

impl LimitOperatorNode {
    pub(crate) fn new(
        context: &OperatorContext,
        limit: &Expr,
        offset: Option<&Expr>,
        input: Box<dyn RowOperator>,
    ) -> Result<Self, CsvqlError> {
        let limit = evaluate_constant(context, limit)?;
        let offset = match offset {
            Some(offset) => evaluate_constant(context, offset)?,
            None => 0,
        };
        Ok(LimitOperatorNode {
            input,
            limit,
            offset,
            output_alias: None,
        })
    }
}

fn evaluate_constant(context: &OperatorContext, expr: &Expr) -> Result<i64, CsvqlError> {
    let compiled = compile_expression(expr, &context.functions)?;
    let value = compiled
        .machine
        .evaluate(&VariableStore::new(), &context.functions)?;
    value
        .as_int()
        .ok_or_else(|| CsvqlError::evaluation("LIMIT and OFFSET need integer expressions"))
}

impl RowOperator for LimitOperatorNode {
    fn next_row(&mut self) -> Result<Option<Row>, CsvqlError> {
        while self.offset > 0 {
            self.offset -= 1;
            if self.input.next_row()?.is_none() {
                return Ok(None);
            }
        }
        if self.limit <= 0 {
            return Ok(None);
        }
        self.limit -= 1;
        self.input.next_row()
    }

    fn column_infos(&self) -> Vec<SymbolRef> {
        remap_output_symbols(self.input.column_infos(), &self.output_alias)
    }

    fn set_output_alias(&mut self, alias: &str) {
        self.output_alias = Some(alias.to_string());
    }

    fn dump(&self, output: &mut String) {
        output.push_str(&format!(
            "LimitOperator ({} -> {})\n-->",
            self.offset, self.limit
        ));
        self.input.dump(output);
    }
}

/// Groups the input by the GROUP BY identifiers and runs one aggregation
/// per select-list entry. Keys that are grouped but not selected are
/// carried as suppressed path-through columns.
pub(crate) struct GroupingOperatorNode {
    iterator: GroupingBlockIterator,
    output_symbols: Vec<SymbolRef>,
    function_description: String,
    group_description: String,
    output_alias: Option<String>,
}

impl GroupingOperatorNode {
    pub(crate) fn new(
        _context: Rc<OperatorContext>,
        symbol_table: SymbolTableRef,
        columns: &[DerivedColumn],
        group_identifiers: &[Identifier],
        input: Box<dyn RowOperator>,
    ) -> Result<Self, CsvqlError> {
        let input_symbols = input.column_infos();
        let mut grouping_indices = vec![];
        let mut output_columns = vec![];
        let mut functions: Vec<Box<dyn AggregationFunction>> = vec![];
        let mut output_symbols = vec![];
        let mut found_group_identifiers: Vec<String> = vec![];

        for derived in columns {
            match &derived.expr {
                Expr::Identifier(ident) => {
                    add_path_through(
                        ident,
                        false,
                        &input_symbols,
                        &mut grouping_indices,
                        &mut output_columns,
                        &mut output_symbols,
                        &mut functions,
                    )?;
                    let name = ident.info.borrow().name.clone();
                    match group_identifiers
                        .iter()
                        .find(|group| name == group.identifier)
                    {
                        Some(group) => found_group_identifiers.push(group.identifier.clone()),
                        None => {
                            return Err(CsvqlError::evaluation(
                                "all elements of the select list of a group by have to be \
                                 aggregations or contained in the group by expressions",
                            ))
                        }
                    }
                }
                Expr::Aggregate(aggregate) => {
                    let mut row_value_id = 0;
                    let mut ty = Type::Int;
                    if let Some(param) = &aggregate.expr {
                        let param = match param.as_ref() {
                            Expr::Identifier(param) => param,
                            _ => {
                                return Err(CsvqlError::evaluation(
                                    "currently only identifiers are allowed as aggregation \
                                     parameters",
                                ))
                            }
                        };
                        let qualified = param.qualified_identifier();
                        row_value_id = variable_index(&qualified, &input_symbols).ok_or_else(
                            || {
                                CsvqlError::evaluation(format!(
                                    "aggregation parameter '{}' not found",
                                    qualified
                                ))
                            },
                        )?;
                        ty = input_symbols[row_value_id].borrow().ty;
                    }
                    functions.push(create_aggregation(aggregate.kind, ty)?);
                    let info = symbol_table
                        .borrow()
                        .find_symbol(&derived.symbol_name)
                        .ok_or_else(|| {
                            CsvqlError::evaluation(format!(
                                "symbol '{}' not found in scope",
                                derived.symbol_name
                            ))
                        })?;
                    output_symbols.push(info);
                    output_columns.push(row_value_id);
                }
                _ => {
                    return Err(CsvqlError::evaluation(
                        "only grouping values and aggregate functions are allowed in a group by",
                    ))
                }
            }
        }

        for group in group_identifiers {
            if !found_group_identifiers.contains(&group.identifier) {
                add_path_through(
                    group,
                    true,
                    &input_symbols,
                    &mut grouping_indices,
                    &mut output_columns,
                    &mut output_symbols,
                    &mut functions,
                )?;
            }
        }

        let function_description = functions
            .iter()
            .map(|function| function.name())
            .collect::<Vec<_>>()
            .join(",");
        let group_description = group_identifiers
            .iter()
            .map(|group| group.identifier.as_str())
            .collect::<Vec<_>>()
            .join(",");

        Ok(GroupingOperatorNode {
            iterator: GroupingBlockIterator::new(
                input,
                grouping_indices,
                output_columns,
                functions,
            ),
            output_symbols,
            function_description,
            group_description,
            output_alias: None,
        })
    }
}

fn add_path_through(
    ident: &Identifier,
    suppress: bool,
    input_symbols: &[SymbolRef],
    grouping_indices: &mut Vec<usize>,
    output_columns: &mut Vec<usize>,
    output_symbols: &mut Vec<SymbolRef>,
    functions: &mut Vec<Box<dyn AggregationFunction>>,
) -> Result<(), CsvqlError> {
    let index = find_input_index(&ident.info, input_symbols).ok_or_else(|| {
        CsvqlError::evaluation(format!(
            "group expression '{}' not found in context",
            ident.info.borrow().qualified_identifier
        ))
    })?;
    grouping_indices.push(index);
    output_columns.push(index);
    if !suppress {
        output_symbols.push(input_symbols[index].clone());
    }
    functions.push(create_path_through(suppress));
    Ok(())
}

impl RowOperator for GroupingOperatorNode {
    fn next_row(&mut self) -> Result<Option<Row>, CsvqlError> {
        self.iterator.next_row()
    }

    fn column_infos(&self) -> Vec<SymbolRef> {
        remap_output_symbols(self.output_symbols.clone(), &self.output_alias)
    }

    fn set_output_alias(&mut self, alias: &str) {
        self.output_alias = Some(alias.to_string());
    }

    fn dump(&self, output: &mut String) {
        output.push_str(&format!(
            "GroupingOperator ({} -> {})\n-->",
            self.function_description, self.group_description
        ));
        self.iterator.input().dump(output);
    }
}

struct AggregationUnit {
    function: Box<dyn AggregationFunction>,
    compiled: CompiledExpression,
    bindings: Vec<(usize, usize)>,
}

/// The block-building side of the aggregation without GROUP BY: runs every
/// aggregation over all input rows and emits exactly one output row.
pub(crate) struct AggregationSource {
    context: Rc<OperatorContext>,
    input: Box<dyn RowOperator>,
    units: Vec<AggregationUnit>,
    store: VariableStore,
    done: bool,
}

impl BlockProvider for AggregationSource {
    fn next_block(&mut self) -> Result<Option<Block>, CsvqlError> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        for unit in &mut self.units {
            unit.function.init();
        }
        while let Some(row) = self.input.next_row()? {
            for unit in &mut self.units {
                fill_variable_store(&mut self.store, &unit.bindings, &row);
                let value = unit
                    .compiled
                    .machine
                    .evaluate(&self.store, &self.context.functions)?;
                unit.function.step(&value)?;
            }
        }
        let mut block = self.context.block_manager.create_block();
        for unit in &mut self.units {
            block.add_value(&unit.function.finalize());
        }
        block.next_row();
        block.end_blocks();
        Ok(Some(block))
    }
}

/// Runs the aggregations of a select list without GROUP BY; emits exactly
/// one row.
pub(crate) struct AggregationOperatorNode {
    output_symbols: Vec<SymbolRef>,
    iterator: BlockIterator<AggregationSource>,
    function_description: String,
    output_alias: Option<String>,
}

impl AggregationOperatorNode {
    pub(crate) fn new(
        context: Rc<OperatorContext>,
        symbol_table: SymbolTableRef,
        columns: &[DerivedColumn],
        input: Box<dyn RowOperator>,
    ) -> Result<Self, CsvqlError> {
        let input_symbols = input.column_infos();
        let mut units = vec![];
        let mut output_symbols = vec![];

        for derived in columns {
            let aggregate = match &derived.expr {
                Expr::Aggregate(aggregate) => aggregate,
                _ => {
                    return Err(CsvqlError::evaluation(
                        "no aggregation on other than aggregation functions",
                    ))
                }
            };
            let (ty, compiled, bindings) = match &aggregate.expr {
                Some(param) => {
                    let ty = param.type_of()?;
                    let compiled = compile_expression(param, &context.functions)?;
                    let bindings = bind_variables(&compiled, &input_symbols)?;
                    (ty, compiled, bindings)
                }
                None => {
                    // COUNT(*) steps on a dummy value
                    let dummy = Expr::Literal(Value::Null(Type::Boolean));
                    let compiled = compile_expression(&dummy, &context.functions)?;
                    (Type::Int, compiled, vec![])
                }
            };
            units.push(AggregationUnit {
                function: create_aggregation(aggregate.kind, ty)?,
                compiled,
                bindings,
            });
            let info = symbol_table
                .borrow()
                .find_symbol(&derived.symbol_name)
                .ok_or_else(|| {
                    CsvqlError::evaluation(format!(
                        "symbol '{}' not found in scope",
                        derived.symbol_name
                    ))
                })?;
            output_symbols.push(info);
        }

        let function_description = units
            .iter()
            .map(|unit| unit.function.name())
            .collect::<Vec<_>>()
            .join(",");
        let manager = context.block_manager.clone();
        let source = AggregationSource {
            context,
            input,
            units,
            store: VariableStore::new(),
            done: false,
        };
        Ok(AggregationOperatorNode {
            output_symbols,
            iterator: BlockIterator::new(source, manager),
            function_description,
            output_alias: None,
        })
    }
}

impl RowOperator for AggregationOperatorNode {
    fn next_row(&mut self) -> Result<Option<Row>, CsvqlError> {
        self.iterator.next_row()
    }

    fn column_infos(&self) -> Vec<SymbolRef> {
        remap_output_symbols(self.output_symbols.clone(), &self.output_alias)
    }

    fn set_output_alias(&mut self, alias: &str) {
        self.output_alias = Some(alias.to_string());
    }

    fn dump(&self, output: &mut String) {
        output.push_str(&format!(
            "AggregationOperator ({})\n-->",
            self.function_description
        ));
        self.iterator.provider().input.dump(output);
    }
}

/// The nested-loop cross join: the left input is scanned once, the right
/// input is replayed through a caching iterator for every left row.
pub(crate) struct CrossJoinOperatorNode {
    lhs_input: Box<dyn RowOperator>,
    rhs_iterator: CachingBlockIterator,
    current_lhs: Option<Row>,
    output_symbols: Vec<SymbolRef>,
}

impl CrossJoinOperatorNode {
    pub(crate) fn new(
        context: &OperatorContext,
        lhs: Box<dyn RowOperator>,
        rhs: Box<dyn RowOperator>,
    ) -> Self {
        let mut output_symbols = lhs.column_infos();
        output_symbols.extend(rhs.column_infos());
        CrossJoinOperatorNode {
            lhs_input: lhs,
            rhs_iterator: CachingBlockIterator::new(rhs, context.block_manager.clone()),
            current_lhs: None,
            output_symbols,
        }
    }
}

impl RowOperator for CrossJoinOperatorNode {
    fn next_row(&mut self) -> Result<Option<Row>, CsvqlError> {
        loop {
            if self.current_lhs.is_none() {
                self.current_lhs = self.lhs_input.next_row()?;
                if self.current_lhs.is_none() {
                    return Ok(None);
                }
            }
            match self.rhs_iterator.next_row()? {
                Some(rhs_row) => {
                    let mut row = self
                        .current_lhs
                        .clone()
                        .expect("left row is present");
                    row.extend(rhs_row);
                    return Ok(Some(row));
                }
                None => {
                    self.current_lhs = self.lhs_input.next_row()?;
                    if self.current_lhs.is_none() {
                        return Ok(None);
                    }
                    self.rhs_iterator.rewind()?;
                }
            }
        }
    }

    fn column_infos(&self) -> Vec<SymbolRef> {
        self.output_symbols.clone()
    }

    fn dump(&self, output: &mut String) {
        output.push_str("CrossJoinOperator\n-->");
        self.lhs_input.dump(output);
        output.push_str("-->");
        self.rhs_iterator.input().dump(output);
    }
}

/// A cross join filtered by a compiled ON predicate.
pub(crate) struct InnerJoinOperatorNode {
    context: Rc<OperatorContext>,
    join: CrossJoinOperatorNode,
    compiled: CompiledExpression,
    bindings: Vec<(usize, usize)>,
    store: VariableStore,
}

impl InnerJoinOperatorNode {
    pub(crate) fn new(
        context: Rc<OperatorContext>,
        expr: &Expr,
        lhs: Box<dyn RowOperator>,
        rhs: Box<dyn RowOperator>,
    ) -> Result<Self, CsvqlError> {
        let join = CrossJoinOperatorNode::new(&context, lhs, rhs);
        let compiled = compile_expression(expr, &context.functions)?;
        let bindings = bind_variables(&compiled, &join.column_infos())?;
        Ok(InnerJoinOperatorNode {
            context,
            join,
            compiled,
            bindings,
            store: VariableStore::new(),
        })
    }
}

impl RowOperator for InnerJoinOperatorNode {
    fn next_row(&mut self) -> Result<Option<Row>, CsvqlError> {
        while let Some(row) = self.join.next_row()? {
            fill_variable_store(&mut self.store, &self.bindings, &row);
            let verdict = self
                .compiled
                .machine
                .evaluate(&self.store, &self.context.functions)?;
            if verdict == Value::Boolean(true) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn column_infos(&self) -> Vec<SymbolRef> {
        self.join.column_infos()
    }

    fn dump(&self, output: &mut String) {
        output.push_str("InnerJoinOperatorNode\n");
        self.join.dump(output);
    }
}

/// The equi-join on identifiers: the right input is consumed into a hash
/// table keyed on the right identifier's column; each left row probes with
/// its key column and emits the matching right rows.
pub(crate) struct InnerHashJoinOperatorNode {
    lhs_input: Box<dyn RowOperator>,
    rhs_iterator: HashingBlockIterator,
    current_lhs: Option<Row>,
    lhs_key_position: usize,
    output_symbols: Vec<SymbolRef>,
}

impl InnerHashJoinOperatorNode {
    pub(crate) fn new(
        expr: &Expr,
        lhs: Box<dyn RowOperator>,
        rhs: Box<dyn RowOperator>,
    ) -> Result<Self, CsvqlError> {
        let lhs_symbols = lhs.column_infos();
        let rhs_symbols = rhs.column_infos();
        let mut output_symbols = lhs_symbols.clone();
        output_symbols.extend(rhs_symbols.clone());

        let mut lhs_key_position = None;
        let mut rhs_key_position = None;
        for variable in expr.collect_identifiers() {
            let name = variable.qualified_identifier();
            if variable_index(&name, &output_symbols).is_none() {
                return Err(CsvqlError::evaluation(format!(
                    "variable '{}' not found in context",
                    name
                )));
            }
            if let Some(index) = variable_index(&name, &rhs_symbols) {
                rhs_key_position = Some(index);
            }
            if let Some(index) = variable_index(&name, &lhs_symbols) {
                lhs_key_position = Some(index);
            }
        }
        let (lhs_key_position, rhs_key_position) = match (lhs_key_position, rhs_key_position) {
            (Some(lhs), Some(rhs)) => (lhs, rhs),
            _ => {
                return Err(CsvqlError::evaluation(
                    "hash join predicate needs one identifier on each side",
                ))
            }
        };

        Ok(InnerHashJoinOperatorNode {
            lhs_input: lhs,
            rhs_iterator: HashingBlockIterator::new(rhs, rhs_key_position),
            current_lhs: None,
            lhs_key_position,
            output_symbols,
        })
    }
}

impl RowOperator for InnerHashJoinOperatorNode {
    fn next_row(&mut self) -> Result<Option<Row>, CsvqlError> {
        loop {
            if let Some(current) = &self.current_lhs {
                if let Some(rhs_row) = self.rhs_iterator.next_key_value_row() {
                    let mut row = current.clone();
                    row.extend(rhs_row);
                    return Ok(Some(row));
                }
            }
            match self.lhs_input.next_row()? {
                Some(row) => {
                    let key = row[self.lhs_key_position].clone();
                    self.rhs_iterator.set_context_for_key(&key)?;
                    self.current_lhs = Some(row);
                }
                None => {
                    // free all resources, the last row was delivered
                    self.rhs_iterator.reset();
                    self.current_lhs = None;
                    return Ok(None);
                }
            }
        }
    }

    fn column_infos(&self) -> Vec<SymbolRef> {
        self.output_symbols.clone()
    }

    fn dump(&self, output: &mut String) {
        output.push_str("InnerHashJoinOperator\n-->");
        self.lhs_input.dump(output);
        output.push_str("-->");
        self.rhs_iterator.input().dump(output);
    }
}

/// Reads the first input to exhaustion, then the second. Duplicates are not
/// eliminated, not even for `UNION DISTINCT`.
pub(crate) struct UnionOperatorNode {
    first_input: Box<dyn RowOperator>,
    second_input: Box<dyn RowOperator>,
    on_second: bool,
    output_alias: Option<String>,
}

impl UnionOperatorNode {
    pub(crate) fn new(first: Box<dyn RowOperator>, second: Box<dyn RowOperator>) -> Self {
        UnionOperatorNode {
            first_input: first,
            second_input: second,
            on_second: false,
            output_alias: None,
        }
    }
}

impl RowOperator for UnionOperatorNode {
    fn next_row(&mut self) -> Result<Option<Row>, CsvqlError> {
        if !self.on_second {
            if let Some(row) = self.first_input.next_row()? {
                return Ok(Some(row));
            }
            self.on_second = true;
        }
        self.second_input.next_row()
    }

    fn column_infos(&self) -> Vec<SymbolRef> {
        remap_output_symbols(self.first_input.column_infos(), &self.output_alias)
    }

    fn set_output_alias(&mut self, alias: &str) {
        self.output_alias = Some(alias.to_string());
    }

    fn dump(&self, output: &mut String) {
        output.push_str("UnionOperatorNode\n-->");
        self.first_input.dump(output);
        output.push_str("-->");
        self.second_input.dump(output);
    }
}
