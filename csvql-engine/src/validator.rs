use csvql_ast::{
    JoinKind, Query, QueryExpr, SemanticError, Statement, SymbolTable, TableReference,
};
use csvql_core::Type;

use crate::{database::Database, error::CsvqlError};

/// Validates a statement against the catalog: triggers symbol-table typing
/// and rejects unsupported constructs, implicit joins, non-boolean WHERE
/// and ON conditions and mismatched UNION sides.
pub fn validate(statement: &Statement, database: &Database) -> Result<(), CsvqlError> {
    match statement {
        Statement::Query(query) => validate_query(query, database),
        Statement::Explain(explain) => validate_query(&explain.query, database),
        _ => Ok(()),
    }
}

fn validate_query(query: &Query, database: &Database) -> Result<(), CsvqlError> {
    SymbolTable::type_symbol_table(&query.symbol_table(), database)?;
    validate_query_expr(&query.expr, database)
}

fn validate_query_expr(expr: &QueryExpr, database: &Database) -> Result<(), CsvqlError> {
    match expr {
        QueryExpr::Union(union) => {
            SymbolTable::type_symbol_table(&union.rhs.symbol_table(), database)?;
            SymbolTable::type_symbol_table(&union.lhs.symbol_table(), database)?;

            let left = union.lhs.output_columns()?;
            let right = union.rhs.output_columns()?;
            if left.is_empty() {
                return Err(SemanticError::EmptyUnionSide.into());
            }
            if left.len() != right.len() {
                return Err(SemanticError::UnionMismatch.into());
            }
            for (l, r) in left.iter().zip(&right) {
                if l.ty != r.ty {
                    return Err(SemanticError::UnionMismatch.into());
                }
            }

            validate_query_expr(&union.lhs, database)?;
            validate_query_expr(&union.rhs, database)
        }
        QueryExpr::Select(select) => {
            let table_expression = &select.table_expression;
            if table_expression.from.references.len() > 1 {
                return Err(SemanticError::ImplicitJoin.into());
            }
            for reference in &table_expression.from.references {
                validate_table_reference(reference, database)?;
            }
            if let Some(selection) = &table_expression.selection {
                if selection.type_of()? != Type::Boolean {
                    return Err(SemanticError::NotBoolean("where").into());
                }
            }
            if table_expression.having.is_some() {
                return Err(SemanticError::Unsupported("HAVING").into());
            }
            Ok(())
        }
    }
}

fn validate_table_reference(
    reference: &TableReference,
    database: &Database,
) -> Result<(), CsvqlError> {
    match reference {
        TableReference::Identifier(_) => Ok(()),
        TableReference::Subquery(subquery) => validate_query_expr(&subquery.query, database),
        TableReference::Join(join) => {
            match join.kind {
                JoinKind::Cross => {}
                JoinKind::Inner => {
                    let constraint = join
                        .constraint
                        .as_ref()
                        .ok_or(SemanticError::NotBoolean("on"))?;
                    if constraint.type_of()? != Type::Boolean {
                        return Err(SemanticError::NotBoolean("on").into());
                    }
                }
                JoinKind::Left | JoinKind::Right | JoinKind::Full => {
                    return Err(SemanticError::Unsupported("outer joins").into())
                }
                JoinKind::Natural(_) => {
                    return Err(SemanticError::Unsupported("natural joins").into())
                }
            }
            validate_table_reference(&join.left, database)?;
            validate_table_reference(&join.right, database)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csvql_ast::{Column, TableSchema};
    use csvql_parser::Parser;

    fn database() -> Database {
        let mut database = Database::in_memory();
        let mut employees = TableSchema::new("EMPLOYEES");
        employees.columns.push(Column::new("ID", Type::Int));
        employees
            .columns
            .push(Column::new("LAST_NAME", Type::String));
        employees
            .columns
            .push(Column::new("BIRTH_DATE", Type::Date));
        database.add_table(employees, false).unwrap();
        let mut salaries = TableSchema::new("SALARIES");
        salaries.columns.push(Column::new("ID", Type::Int));
        salaries.columns.push(Column::new("SALARY", Type::Real));
        database.add_table(salaries, false).unwrap();
        database
    }

    fn check(sql: &str) -> Result<(), CsvqlError> {
        let statement = Parser::new_with_sql(sql).unwrap().parse_statement().unwrap();
        validate(&statement, &database())
    }

    #[test]
    fn boolean_conditions_pass() {
        check("SELECT id FROM employees WHERE id > 100").unwrap();
        check("SELECT * FROM employees emp INNER JOIN salaries sal ON emp.id = sal.id").unwrap();
    }

    #[test]
    fn non_boolean_where_is_rejected() {
        let err = check("SELECT id FROM employees WHERE id + 1").unwrap_err();
        assert!(matches!(
            err,
            CsvqlError::Semantic(SemanticError::NotBoolean("where"))
        ));
    }

    #[test]
    fn non_boolean_on_is_rejected() {
        let err = check(
            "SELECT * FROM employees emp INNER JOIN salaries sal ON emp.id + sal.id",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CsvqlError::Semantic(SemanticError::NotBoolean("on"))
        ));
    }

    #[test]
    fn implicit_joins_are_rejected() {
        let err = check("SELECT * FROM employees, salaries").unwrap_err();
        assert!(matches!(
            err,
            CsvqlError::Semantic(SemanticError::ImplicitJoin)
        ));
    }

    #[test]
    fn having_is_rejected() {
        let err = check(
            "SELECT count(id) FROM employees group by last_name HAVING count(id) > 1",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CsvqlError::Semantic(SemanticError::Unsupported("HAVING"))
        ));
    }

    #[test]
    fn outer_and_natural_joins_are_rejected() {
        assert!(check("SELECT * FROM employees emp LEFT JOIN salaries sal ON emp.id = sal.id")
            .is_err());
        assert!(check("SELECT * FROM employees NATURAL JOIN salaries").is_err());
    }

    #[test]
    fn union_sides_have_to_match() {
        check(
            "SELECT id FROM employees WHERE id < 100 UNION (SELECT id FROM employees \
             WHERE id >= 100)",
        )
        .unwrap();
        let err = check("SELECT id FROM employees UNION (SELECT last_name FROM employees)")
            .unwrap_err();
        assert!(matches!(
            err,
            CsvqlError::Semantic(SemanticError::UnionMismatch)
        ));
    }

    #[test]
    fn unknown_symbols_surface_from_typing() {
        let err = check("SELECT nope FROM employees").unwrap_err();
        assert!(matches!(
            err,
            CsvqlError::Semantic(SemanticError::UnknownSymbol(_))
        ));
    }

    #[test]
    fn ambiguous_symbols_surface_from_typing() {
        let err = check(
            "SELECT id FROM employees emp INNER JOIN salaries sal ON emp.id = sal.id",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CsvqlError::Semantic(SemanticError::AmbiguousSymbol(_))
        ));
    }
}
