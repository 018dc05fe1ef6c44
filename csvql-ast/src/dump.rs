use crate::{
    expr::Expr,
    query::{QueryExpr, TableExpression, TableReference},
    statement::Statement,
};

/// Renders a statement as an indented node tree, one node per line. This is
/// what `EXPLAIN AST` prints.
pub fn dump_statement(statement: &Statement) -> String {
    let mut out = String::new();
    let mut dumper = Dumper { out: &mut out };
    dumper.statement(statement, 0);
    out
}

struct Dumper<'a> {
    out: &'a mut String,
}

impl<'a> Dumper<'a> {
    fn line(&mut self, indent: usize, text: &str) {
        self.out.push_str(&"  ".repeat(indent));
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn statement(&mut self, statement: &Statement, indent: usize) {
        match statement {
            Statement::Query(query) => {
                self.line(indent, "Query");
                self.query_expr(&query.expr, indent + 1);
            }
            Statement::CreateTable(stmt) => {
                self.line(
                    indent,
                    &format!(
                        "CreateTable {}{}",
                        stmt.name,
                        if stmt.if_not_exists {
                            " (if not exists)"
                        } else {
                            ""
                        }
                    ),
                );
                for column in &stmt.columns {
                    self.line(indent + 1, &format!("Column {}", column));
                }
                for constraint in &stmt.constraints {
                    self.line(indent + 1, &format!("Constraint {}", constraint));
                }
            }
            Statement::AlterTableAdd(stmt) => {
                self.line(
                    indent,
                    &format!("AlterTableAdd {} {}", stmt.table, stmt.definition),
                );
            }
            Statement::AlterTableDrop(stmt) => {
                self.line(
                    indent,
                    &format!("AlterTableDrop {} {}", stmt.table, stmt.column),
                );
            }
            Statement::DropTable(stmt) => self.line(indent, &format!("DropTable {}", stmt.name)),
            Statement::CreateMapping(stmt) => {
                self.line(indent, &format!("CreateMapping {}", stmt.table));
                for mapping in &stmt.mappings {
                    self.line(
                        indent + 1,
                        &format!(
                            "Mapping '{}' delimiter '{}' skip_first_line {}",
                            mapping.pattern, mapping.delimiter, mapping.skip_first_line
                        ),
                    );
                }
            }
            Statement::DropMapping(stmt) => {
                self.line(indent, &format!("DropMapping {}", stmt.table));
            }
            Statement::Explain(stmt) => {
                self.line(indent, &format!("Explain {}", stmt.kind));
                self.query_expr(&stmt.query.expr, indent + 1);
            }
        }
    }

    fn query_expr(&mut self, expr: &QueryExpr, indent: usize) {
        match expr {
            QueryExpr::Select(select) => {
                self.line(
                    indent,
                    &format!("QuerySpecification ({:?})", select.quantifier),
                );
                for column in &select.columns {
                    self.line(indent + 1, &format!("DerivedColumn {}", column.symbol_name));
                    self.expr(&column.expr, indent + 2);
                }
                self.table_expression(&select.table_expression, indent + 1);
            }
            QueryExpr::Union(union) => {
                self.line(indent, &format!("Union ({:?})", union.quantifier));
                self.query_expr(&union.lhs, indent + 1);
                self.query_expr(&union.rhs, indent + 1);
            }
        }
    }

    fn table_expression(&mut self, table_expression: &TableExpression, indent: usize) {
        self.line(indent, "From");
        for reference in &table_expression.from.references {
            self.table_reference(reference, indent + 1);
        }
        if let Some(selection) = &table_expression.selection {
            self.line(indent, "Where");
            self.expr(selection, indent + 1);
        }
        if let Some(group_by) = &table_expression.group_by {
            self.line(indent, "GroupBy");
            for identifier in &group_by.identifiers {
                self.line(indent + 1, &format!("Identifier {}", identifier));
            }
        }
        if let Some(having) = &table_expression.having {
            self.line(indent, "Having");
            self.expr(having, indent + 1);
        }
        if let Some(order_by) = &table_expression.order_by {
            self.line(indent, "OrderBy");
            for expr in &order_by.expressions {
                self.line(indent + 1, &format!("{:?}", expr.order));
                self.expr(&expr.expr, indent + 2);
            }
        }
        if let Some(limit) = &table_expression.limit {
            self.line(indent, "Limit");
            self.expr(&limit.limit, indent + 1);
            if let Some(offset) = &limit.offset {
                self.line(indent, "Offset");
                self.expr(offset, indent + 1);
            }
        }
    }

    fn table_reference(&mut self, reference: &TableReference, indent: usize) {
        match reference {
            TableReference::Identifier(table) => {
                self.line(indent, &format!("TableIdentifier {}", table));
            }
            TableReference::Subquery(subquery) => {
                self.line(indent, &format!("TableSubquery {}", subquery.alias));
                self.query_expr(&subquery.query, indent + 1);
            }
            TableReference::Join(join) => {
                self.line(indent, &format!("{:?}", join.kind));
                self.table_reference(&join.left, indent + 1);
                self.table_reference(&join.right, indent + 1);
                if let Some(constraint) = &join.constraint {
                    self.line(indent + 1, "On");
                    self.expr(constraint, indent + 2);
                }
            }
        }
    }

    fn expr(&mut self, expr: &Expr, indent: usize) {
        match expr {
            Expr::Literal(value) => self.line(indent, &format!("Literal {}", value)),
            Expr::Identifier(ident) => self.line(indent, &format!("Identifier {}", ident)),
            Expr::QualifiedAsterisk(asterisk) => {
                self.line(indent, &format!("QualifiedAsterisk {}", asterisk));
            }
            Expr::Unary(unary) => {
                self.line(indent, &format!("UnaryOp {}", unary.op));
                self.expr(&unary.expr, indent + 1);
            }
            Expr::Cast(cast) => {
                self.line(indent, &format!("Cast {}", cast.target));
                self.expr(&cast.expr, indent + 1);
            }
            Expr::Binary(binary) => {
                self.line(indent, &format!("BinaryOp {}", binary.op));
                self.expr(&binary.lhs, indent + 1);
                self.expr(&binary.rhs, indent + 1);
            }
            Expr::Like(like) => {
                self.line(indent, &format!("Like '{}'", like.pattern));
                self.expr(&like.expr, indent + 1);
            }
            Expr::Between(between) => {
                self.line(indent, "Between");
                self.expr(&between.expr, indent + 1);
                self.expr(&between.low, indent + 1);
                self.expr(&between.high, indent + 1);
            }
            Expr::In(in_expr) => {
                self.line(indent, "In");
                self.expr(&in_expr.expr, indent + 1);
                for item in &in_expr.list {
                    self.expr(item, indent + 1);
                }
            }
            Expr::Function(function) => {
                self.line(indent, &format!("Function {}", function.name));
                for arg in &function.args {
                    self.expr(arg, indent + 1);
                }
            }
            Expr::Aggregate(aggregate) => {
                match &aggregate.expr {
                    Some(arg) => {
                        self.line(indent, &format!("Aggregate {}", aggregate.kind));
                        self.expr(arg, indent + 1);
                    }
                    None => self.line(indent, &format!("Aggregate {}(*)", aggregate.kind)),
                };
            }
        }
    }
}
