use std::{io::Write, rc::Rc};

use csvql_ast::{
    dump_statement, AlterTableAddStatement, AlterTableDropStatement, BinaryOperator, Column,
    CreateMappingStatement, CreateTableStatement, DropMappingStatement, DropTableStatement,
    ExplainKind, ExplainStatement, Expr, Query, QueryExpr, SchemaConstraint, SemanticError,
    SortOrder, Statement, TableReference, TableSchema,
};
use tracing::debug;

use crate::{
    engine::OperatorContext,
    error::CsvqlError,
    operators::{
        AggregationOperatorNode, CrossJoinOperatorNode, ExtendedProjectionOperatorNode,
        GroupingOperatorNode, InnerHashJoinOperatorNode, InnerJoinOperatorNode, LimitOperatorNode,
        OutputRowOperatorNode, RootOperatorNode, RowOperator, SelectOperatorNode, SortOperatorNode,
        UnionOperatorNode,
    },
    scan::{SystemTableScanOperatorNode, TableScanOperatorNode},
};

/// One executable step of a statement.
pub enum ExecutionNode {
    /// Create a table in the catalog.
    CreateTable(CreateTableStatement),
    /// Accepted, executed as a no-op.
    AlterTableAdd(AlterTableAddStatement),
    /// Accepted, executed as a no-op.
    AlterTableDrop(AlterTableDropStatement),
    /// Drop a table from the catalog.
    DropTable(DropTableStatement),
    /// Register a file mapping.
    CreateMapping(CreateMappingStatement),
    /// Remove a file mapping.
    DropMapping(DropMappingStatement),
    /// Describe a query instead of running it.
    Explain(ExplainStatement),
    /// Run a query pipeline.
    Query(QueryExecutionNode),
}

/// A planned query: the output sink driving the operator pipeline.
pub struct QueryExecutionNode {
    root: OutputRowOperatorNode,
}

impl QueryExecutionNode {
    fn execute(&mut self, output: &mut dyn Write) -> Result<i64, CsvqlError> {
        self.root.process(output)
    }

    /// Writes the operator pipeline description.
    pub fn dump(&self, output: &mut String) {
        self.root.dump(output);
    }
}

/// The execution plan of one statement.
pub struct ExecutionPlan {
    context: Rc<OperatorContext>,
    nodes: Vec<ExecutionNode>,
}

impl ExecutionPlan {
    /// Builds the execution plan of a validated statement.
    pub fn create(
        context: Rc<OperatorContext>,
        statement: Statement,
    ) -> Result<Self, CsvqlError> {
        let node = match statement {
            Statement::Query(query) => {
                ExecutionNode::Query(create_query_execution_node(&context, &query)?)
            }
            Statement::CreateTable(stmt) => ExecutionNode::CreateTable(stmt),
            Statement::AlterTableAdd(stmt) => ExecutionNode::AlterTableAdd(stmt),
            Statement::AlterTableDrop(stmt) => ExecutionNode::AlterTableDrop(stmt),
            Statement::DropTable(stmt) => ExecutionNode::DropTable(stmt),
            Statement::CreateMapping(stmt) => ExecutionNode::CreateMapping(stmt),
            Statement::DropMapping(stmt) => ExecutionNode::DropMapping(stmt),
            Statement::Explain(stmt) => ExecutionNode::Explain(stmt),
        };
        Ok(ExecutionPlan {
            context,
            nodes: vec![node],
        })
    }

    /// Executes the plan, returning the number of result rows written.
    pub fn execute(&mut self, output: &mut dyn Write) -> Result<i64, CsvqlError> {
        let mut count = 0;
        let context = self.context.clone();
        for node in &mut self.nodes {
            count += execute_node(&context, node, output)?;
        }
        Ok(count)
    }
}

fn execute_node(
    context: &Rc<OperatorContext>,
    node: &mut ExecutionNode,
    output: &mut dyn Write,
) -> Result<i64, CsvqlError> {
    match node {
        ExecutionNode::Query(query) => query.execute(output),
        ExecutionNode::CreateTable(stmt) => {
            if stmt.name.starts_with("SYSTEM_") {
                return Err(CsvqlError::catalog("cannot create system tables"));
            }
            let mut database = context.database.borrow_mut();
            if stmt.if_not_exists && database.has_table(&stmt.name) {
                return Ok(0);
            }
            database.add_table(schema_from_statement(stmt), true)?;
            debug!(table = %stmt.name, "created table");
            Ok(0)
        }
        ExecutionNode::AlterTableAdd(_) | ExecutionNode::AlterTableDrop(_) => Ok(0),
        ExecutionNode::DropTable(stmt) => {
            context.database.borrow_mut().drop_table(&stmt.name)?;
            Ok(0)
        }
        ExecutionNode::CreateMapping(stmt) => {
            context
                .database
                .borrow_mut()
                .add_mapping(&stmt.table, stmt.mappings.clone())?;
            Ok(0)
        }
        ExecutionNode::DropMapping(stmt) => {
            context.database.borrow_mut().remove_mapping(&stmt.table)?;
            Ok(0)
        }
        ExecutionNode::Explain(stmt) => {
            let text = match stmt.kind {
                ExplainKind::Ast => dump_statement(&Statement::Query(stmt.query.clone())),
                ExplainKind::Exec => {
                    let node = create_query_execution_node(context, &stmt.query)?;
                    let mut text = String::new();
                    node.dump(&mut text);
                    text
                }
            };
            output.write_all(text.as_bytes())?;
            if !text.ends_with('\n') {
                output.write_all(b"\n")?;
            }
            Ok(0)
        }
    }
}

fn schema_from_statement(stmt: &CreateTableStatement) -> TableSchema {
    let mut schema = TableSchema::new(stmt.name.clone());
    for definition in &stmt.columns {
        schema.columns.push(Column {
            name: definition.name.clone(),
            ty: definition.ty,
            primary_key: definition.primary_key,
            unique: definition.unique,
            not_null: definition.not_null,
            default_value: definition.default_value.clone(),
            check: definition.check.as_ref().map(|check| check.to_string()),
            length: definition.length,
        });
    }
    for constraint in &stmt.constraints {
        schema.constraints.push(SchemaConstraint {
            name: constraint.name.clone(),
            primary_keys: constraint.primary_keys.clone(),
            unique_keys: constraint.unique_keys.clone(),
            check: constraint.check.as_ref().map(|check| check.to_string()),
        });
    }
    schema
}

/// Wraps the planned pipeline of a query into the output sink.
pub(crate) fn create_query_execution_node(
    context: &Rc<OperatorContext>,
    query: &Query,
) -> Result<QueryExecutionNode, CsvqlError> {
    let operator = create_operator_tree(context, &query.expr)?;
    Ok(QueryExecutionNode {
        root: OutputRowOperatorNode::new(context, operator),
    })
}

/// Lowers a query expression into an operator tree, bottom-up.
fn create_operator_tree(
    context: &Rc<OperatorContext>,
    expr: &QueryExpr,
) -> Result<Box<dyn RowOperator>, CsvqlError> {
    match expr {
        QueryExpr::Union(union) => {
            let first = create_operator_tree(context, &union.lhs)?;
            let second = create_operator_tree(context, &union.rhs)?;
            Ok(Box::new(UnionOperatorNode::new(first, second)))
        }
        QueryExpr::Select(select) => {
            let table_expression = &select.table_expression;
            let reference = table_expression
                .from
                .references
                .first()
                .ok_or(SemanticError::ImplicitJoin)?;
            let mut current = plan_table_reference(context, reference)?;

            if let Some(selection) = &table_expression.selection {
                current = Box::new(SelectOperatorNode::new(
                    context.clone(),
                    selection,
                    current,
                )?);
            }

            current = if let Some(group_by) = &table_expression.group_by {
                Box::new(GroupingOperatorNode::new(
                    context.clone(),
                    select.symbol_table.clone(),
                    &select.columns,
                    &group_by.identifiers,
                    current,
                )?)
            } else if select
                .columns
                .first()
                .map_or(false, |column| column.expr.is_aggregate())
            {
                if select.columns.iter().any(|column| !column.expr.is_aggregate()) {
                    return Err(CsvqlError::evaluation(
                        "no aggregation on other than aggregation functions",
                    ));
                }
                Box::new(AggregationOperatorNode::new(
                    context.clone(),
                    select.symbol_table.clone(),
                    &select.columns,
                    current,
                )?)
            } else {
                Box::new(ExtendedProjectionOperatorNode::new(
                    context.clone(),
                    select.symbol_table.clone(),
                    &select.columns,
                    current,
                )?)
            };

            if let Some(order_by) = &table_expression.order_by {
                let expressions: Vec<(Expr, SortOrder)> = order_by
                    .expressions
                    .iter()
                    .map(|order| (order.expr.clone(), order.order))
                    .collect();
                current = Box::new(SortOperatorNode::new(&expressions, current)?);
            }

            if let Some(limit) = &table_expression.limit {
                current = Box::new(LimitOperatorNode::new(
                    context,
                    &limit.limit,
                    limit.offset.as_ref(),
                    current,
                )?);
            }

            Ok(current)
        }
    }
}

fn plan_table_reference(
    context: &Rc<OperatorContext>,
    reference: &TableReference,
) -> Result<Box<dyn RowOperator>, CsvqlError> {
    match reference {
        TableReference::Identifier(table) => {
            let table_symbol = table.identifier.info.clone();
            let scope = table.symbol_table.clone();
            if table.identifier.identifier.starts_with("SYSTEM_") {
                Ok(Box::new(SystemTableScanOperatorNode::new(
                    context.clone(),
                    scope,
                    &table_symbol,
                )?))
            } else {
                Ok(Box::new(TableScanOperatorNode::new(
                    context.clone(),
                    scope,
                    &table_symbol,
                )?))
            }
        }
        TableReference::Subquery(subquery) => {
            let mut operator = create_operator_tree(context, &subquery.query)?;
            // the subquery output has to answer to the subquery alias
            operator.set_output_alias(&subquery.alias);
            Ok(operator)
        }
        TableReference::Join(join) => {
            let left = plan_table_reference(context, &join.left)?;
            let right = plan_table_reference(context, &join.right)?;
            match join.kind {
                csvql_ast::JoinKind::Cross => {
                    Ok(Box::new(CrossJoinOperatorNode::new(context, left, right)))
                }
                csvql_ast::JoinKind::Inner => {
                    let constraint = join.constraint.as_ref().ok_or_else(|| {
                        CsvqlError::evaluation("inner join without an ON condition")
                    })?;
                    if is_equi_join_on_identifiers(constraint) {
                        // only equi joins can be performed as hash joins
                        Ok(Box::new(InnerHashJoinOperatorNode::new(
                            constraint, left, right,
                        )?))
                    } else {
                        Ok(Box::new(InnerJoinOperatorNode::new(
                            context.clone(),
                            constraint,
                            left,
                            right,
                        )?))
                    }
                }
                _ => Err(SemanticError::Unsupported("this join type").into()),
            }
        }
    }
}

fn is_equi_join_on_identifiers(expr: &Expr) -> bool {
    match expr {
        Expr::Binary(binary) => {
            binary.op == BinaryOperator::Eq
                && matches!(*binary.lhs, Expr::Identifier(_))
                && matches!(*binary.rhs, Expr::Identifier(_))
        }
        _ => false,
    }
}
