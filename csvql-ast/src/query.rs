use core::fmt;

use csvql_core::Type;

use crate::{
    error::SemanticError,
    expr::{Expr, Identifier},
    symbol::SymbolTableRef,
    utils::display_comma_separated,
};

/// `ALL` or `DISTINCT`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Quantifier {
    /// Keep duplicates (the default).
    All,
    /// Request duplicate elimination.
    Distinct,
}

/// `ASC` or `DESC` in an ORDER BY.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SortOrder {
    /// Ascending order, nulls last.
    Ascending,
    /// Descending order, nulls first.
    Descending,
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        })
    }
}

/// A name/type pair describing one output column of a relation, used to
/// check that both sides of a UNION produce the same shape.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NamedType {
    /// The output column name.
    pub name: String,
    /// The output column type.
    pub ty: Type,
}

/// A top-level query statement.
#[derive(Clone, Debug)]
pub struct Query {
    /// The query expression: a SELECT or a UNION tree.
    pub expr: QueryExpr,
}

impl Query {
    /// Returns the symbol table of the query scope.
    pub fn symbol_table(&self) -> SymbolTableRef {
        self.expr.symbol_table()
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.expr)
    }
}

/// A SELECT or a UNION of two query expressions.
#[derive(Clone, Debug)]
pub enum QueryExpr {
    /// A plain query specification.
    Select(Box<QuerySpecification>),
    /// A UNION of two query expressions.
    Union(Box<UnionExpr>),
}

impl QueryExpr {
    /// Returns the symbol table of the scope the expression belongs to.
    pub fn symbol_table(&self) -> SymbolTableRef {
        match self {
            QueryExpr::Select(select) => select.symbol_table.clone(),
            QueryExpr::Union(union) => union.symbol_table.clone(),
        }
    }

    /// Returns the output columns of the relation, for UNION validation.
    /// The symbol tables have to be typed before this is called.
    pub fn output_columns(&self) -> Result<Vec<NamedType>, SemanticError> {
        match self {
            QueryExpr::Union(union) => union.lhs.output_columns(),
            QueryExpr::Select(select) => {
                let mut output = vec![];
                for column in &select.columns {
                    match &column.expr {
                        Expr::QualifiedAsterisk(asterisk) => {
                            // expand to the columns of the named table, or of
                            // the first table in scope
                            let symbol_table = select.symbol_table.borrow();
                            let table_name = if asterisk.prefix.is_empty() {
                                let tables = symbol_table.tables();
                                match tables.first() {
                                    Some(table) => table.borrow().name.clone(),
                                    None => continue,
                                }
                            } else {
                                asterisk.prefix.clone()
                            };
                            for info in symbol_table.find_all_symbols_for_table(&table_name) {
                                let info = info.borrow();
                                output.push(NamedType {
                                    name: info.name.clone(),
                                    ty: info.ty,
                                });
                            }
                        }
                        expr => output.push(NamedType {
                            name: column.symbol_name.clone(),
                            ty: expr.type_of()?,
                        }),
                    }
                }
                Ok(output)
            }
        }
    }
}

impl fmt::Display for QueryExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QueryExpr::Select(select) => write!(f, "{}", select),
            QueryExpr::Union(union) => write!(f, "{}", union),
        }
    }
}

/// One entry of the select list, with the symbol name it is registered
/// under in the scope (either its own name or a generated `$alias_N`).
#[derive(Clone, Debug)]
pub struct DerivedColumn {
    /// The select-list expression.
    pub expr: Expr,
    /// The symbol this column is registered as.
    pub symbol_name: String,
    /// The alias as written in the statement, for printing.
    pub alias: Option<String>,
}

impl fmt::Display for DerivedColumn {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.expr)?;
        if let Some(alias) = &self.alias {
            write!(f, " AS {}", alias)?;
        }
        Ok(())
    }
}

/// `SELECT <quantifier> <select list> <table expression>`.
#[derive(Clone, Debug)]
pub struct QuerySpecification {
    /// The scope of this query.
    pub symbol_table: SymbolTableRef,
    /// ALL or DISTINCT.
    pub quantifier: Quantifier,
    /// The select list.
    pub columns: Vec<DerivedColumn>,
    /// FROM and the optional clauses.
    pub table_expression: TableExpression,
}

impl fmt::Display for QuerySpecification {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SELECT ")?;
        if self.quantifier == Quantifier::Distinct {
            write!(f, "DISTINCT ")?;
        }
        write!(f, "{}", display_comma_separated(&self.columns))?;
        write!(f, " {}", self.table_expression)
    }
}

/// `UNION [ALL|DISTINCT]` of two query expressions.
#[derive(Clone, Debug)]
pub struct UnionExpr {
    /// The scope the union was parsed in.
    pub symbol_table: SymbolTableRef,
    /// ALL or DISTINCT.
    pub quantifier: Quantifier,
    /// Left side.
    pub lhs: QueryExpr,
    /// Right side.
    pub rhs: QueryExpr,
}

impl fmt::Display for UnionExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} UNION ", self.lhs)?;
        if self.quantifier == Quantifier::Distinct {
            write!(f, "DISTINCT ")?;
        }
        write!(f, "({})", self.rhs)
    }
}

/// The table expression of a query: FROM plus the optional WHERE, GROUP BY,
/// HAVING, ORDER BY and LIMIT clauses.
#[derive(Clone, Debug)]
pub struct TableExpression {
    /// The FROM clause.
    pub from: FromClause,
    /// The WHERE condition.
    pub selection: Option<Expr>,
    /// The GROUP BY clause.
    pub group_by: Option<GroupByClause>,
    /// The HAVING condition; parsed but rejected by the validator.
    pub having: Option<Expr>,
    /// The ORDER BY clause.
    pub order_by: Option<OrderByClause>,
    /// The LIMIT clause.
    pub limit: Option<LimitClause>,
}

impl fmt::Display for TableExpression {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.from)?;
        if let Some(selection) = &self.selection {
            write!(f, " WHERE {}", selection)?;
        }
        if let Some(group_by) = &self.group_by {
            write!(f, " {}", group_by)?;
        }
        if let Some(having) = &self.having {
            write!(f, " HAVING {}", having)?;
        }
        if let Some(order_by) = &self.order_by {
            write!(f, " {}", order_by)?;
        }
        if let Some(limit) = &self.limit {
            write!(f, " {}", limit)?;
        }
        Ok(())
    }
}

/// The FROM clause with its table references.
#[derive(Clone, Debug)]
pub struct FromClause {
    /// The scope the clause was parsed in.
    pub symbol_table: SymbolTableRef,
    /// The table references; more than one is an implicit join, which the
    /// validator rejects.
    pub references: Vec<TableReference>,
}

impl fmt::Display for FromClause {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "FROM {}", display_comma_separated(&self.references))
    }
}

/// A table reference in FROM: a table, a subquery or a join.
#[derive(Clone, Debug)]
pub enum TableReference {
    /// A plain table, optionally aliased.
    Identifier(TableIdentifier),
    /// A parenthesized subquery with an alias.
    Subquery(TableSubquery),
    /// A join of a table reference with a table factor.
    Join(Box<Join>),
}

impl fmt::Display for TableReference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TableReference::Identifier(table) => write!(f, "{}", table),
            TableReference::Subquery(subquery) => write!(f, "{}", subquery),
            TableReference::Join(join) => write!(f, "{}", join),
        }
    }
}

/// A table name with an optional alias, bound to its table symbol.
#[derive(Clone, Debug)]
pub struct TableIdentifier {
    /// The scope the table was referenced in.
    pub symbol_table: SymbolTableRef,
    /// The table identifier; its symbol carries the alias.
    pub identifier: Identifier,
}

impl fmt::Display for TableIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.identifier.identifier)?;
        let alias = self.identifier.info.borrow().alias.clone();
        if !alias.is_empty() && alias != self.identifier.identifier {
            write!(f, " AS {}", alias)?;
        }
        Ok(())
    }
}

/// A subquery in FROM, e.g. `(SELECT ...) AS sub`.
#[derive(Clone, Debug)]
pub struct TableSubquery {
    /// The parsed subquery.
    pub query: QueryExpr,
    /// The alias of the subquery.
    pub alias: String,
    /// The scope the subquery was parsed in (its parent scope).
    pub symbol_table: SymbolTableRef,
}

impl fmt::Display for TableSubquery {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({})", self.query)?;
        if !self.alias.is_empty() {
            write!(f, " AS {}", self.alias)?;
        }
        Ok(())
    }
}

/// The join flavor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum JoinKind {
    /// CROSS JOIN.
    Cross,
    /// INNER JOIN with an ON condition.
    Inner,
    /// LEFT [OUTER] JOIN; parsed but not executed.
    Left,
    /// RIGHT [OUTER] JOIN; parsed but not executed.
    Right,
    /// FULL [OUTER] JOIN; parsed but not executed.
    Full,
    /// NATURAL [INNER|LEFT|RIGHT|FULL] JOIN; parsed but not executed.
    Natural(NaturalJoinKind),
}

/// The inner flavor of a natural join.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NaturalJoinKind {
    /// NATURAL [INNER] JOIN.
    Inner,
    /// NATURAL LEFT JOIN.
    Left,
    /// NATURAL RIGHT JOIN.
    Right,
    /// NATURAL FULL JOIN.
    Full,
}

impl fmt::Display for JoinKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            JoinKind::Cross => "CROSS JOIN",
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
            JoinKind::Full => "FULL JOIN",
            JoinKind::Natural(NaturalJoinKind::Inner) => "NATURAL JOIN",
            JoinKind::Natural(NaturalJoinKind::Left) => "NATURAL LEFT JOIN",
            JoinKind::Natural(NaturalJoinKind::Right) => "NATURAL RIGHT JOIN",
            JoinKind::Natural(NaturalJoinKind::Full) => "NATURAL FULL JOIN",
        })
    }
}

/// A join of a (possibly joined) table reference with a table factor.
#[derive(Clone, Debug)]
pub struct Join {
    /// The join flavor.
    pub kind: JoinKind,
    /// The left side, possibly a join chain itself.
    pub left: TableReference,
    /// The right side, always a table factor.
    pub right: TableReference,
    /// The ON condition for joins that carry one.
    pub constraint: Option<Expr>,
}

impl fmt::Display for Join {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} {}", self.left, self.kind, self.right)?;
        if let Some(constraint) = &self.constraint {
            write!(f, " ON {}", constraint)?;
        }
        Ok(())
    }
}

/// The GROUP BY clause.
#[derive(Clone, Debug)]
pub struct GroupByClause {
    /// ALL or DISTINCT.
    pub quantifier: Quantifier,
    /// The grouping identifiers.
    pub identifiers: Vec<Identifier>,
}

impl fmt::Display for GroupByClause {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "GROUP BY {}", display_comma_separated(&self.identifiers))
    }
}

/// One `<expr> [ASC|DESC]` entry of an ORDER BY.
#[derive(Clone, Debug)]
pub struct OrderExpression {
    /// The sort expression; only identifiers are executable.
    pub expr: Expr,
    /// The sort direction.
    pub order: SortOrder,
}

impl fmt::Display for OrderExpression {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.expr, self.order)
    }
}

/// The ORDER BY clause.
#[derive(Clone, Debug)]
pub struct OrderByClause {
    /// The sort keys, most significant first.
    pub expressions: Vec<OrderExpression>,
}

impl fmt::Display for OrderByClause {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ORDER BY {}", display_comma_separated(&self.expressions))
    }
}

/// The LIMIT clause with an optional OFFSET.
#[derive(Clone, Debug)]
pub struct LimitClause {
    /// The row count; a constant expression.
    pub limit: Expr,
    /// The number of rows to skip first.
    pub offset: Option<Expr>,
}

impl fmt::Display for LimitClause {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "LIMIT {}", self.limit)?;
        if let Some(offset) = &self.offset {
            write!(f, " OFFSET {}", offset)?;
        }
        Ok(())
    }
}
