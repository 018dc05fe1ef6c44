use csvql_ast::{
    DerivedColumn, Expr, FromClause, GroupByClause, Identifier, Join, JoinKind, LimitClause,
    NaturalJoinKind, OrderByClause, OrderExpression, QualifiedAsterisk, Quantifier, Query,
    QueryExpr, QuerySpecification, SortOrder, SymbolInfo, SymbolKind, SymbolTable, SymbolTableRef,
    TableExpression, TableIdentifier, TableReference, TableSubquery,
};
use csvql_core::{Keyword, Token};

use crate::{error::ParserError, parser::Parser};

impl Parser {
    /// Parses a query statement.
    pub fn parse_query(&mut self) -> Result<Query, ParserError> {
        let expr = self.parse_query_expression(None)?;
        Ok(Query { expr })
    }

    /// Parses a query expression: a query specification followed by any
    /// number of UNION tails. A new symbol table scope is opened, nested
    /// under the given parent scope if there is one.
    pub(crate) fn parse_query_expression(
        &mut self,
        parent: Option<&SymbolTableRef>,
    ) -> Result<QueryExpr, ParserError> {
        let scope = match parent {
            Some(parent) => SymbolTable::create_nested(parent),
            None => SymbolTable::create(),
        };

        let expect_right_paren = self.next_token_if_is(&Token::LeftParen);
        self.expect_keyword(Keyword::SELECT)?;
        let quantifier = self.parse_quantifier();

        let columns = self.parse_select_list(&scope)?;
        let table_expression = self.parse_table_expression(&scope)?;

        if expect_right_paren {
            self.expect_token(&Token::RightParen)?;
        }

        let mut query = QueryExpr::Select(Box::new(QuerySpecification {
            symbol_table: scope.clone(),
            quantifier,
            columns,
            table_expression,
        }));

        while self.parse_keyword(Keyword::UNION) {
            let quantifier = self.parse_quantifier();
            self.expect_token(&Token::LeftParen)?;
            let rhs = self.parse_query_expression(Some(&scope))?;
            self.expect_token(&Token::RightParen)?;
            query = QueryExpr::Union(Box::new(csvql_ast::UnionExpr {
                symbol_table: scope.clone(),
                quantifier,
                lhs: query,
                rhs,
            }));
        }

        Ok(query)
    }

    fn parse_quantifier(&mut self) -> Quantifier {
        if self.parse_keyword(Keyword::DISTINCT) {
            Quantifier::Distinct
        } else {
            self.parse_keyword(Keyword::ALL);
            Quantifier::All
        }
    }

    /// Parses the select list. A leading `*` is only allowed as the first
    /// entry.
    fn parse_select_list(
        &mut self,
        scope: &SymbolTableRef,
    ) -> Result<Vec<DerivedColumn>, ParserError> {
        let mut columns = vec![];
        let mut first = true;
        loop {
            if first && self.next_token_if_is(&Token::Asterisk) {
                columns.push(DerivedColumn {
                    expr: Expr::QualifiedAsterisk(QualifiedAsterisk {
                        prefix: String::new(),
                        quoted: false,
                    }),
                    symbol_name: String::new(),
                    alias: None,
                });
            } else {
                columns.push(self.parse_derived_column(scope)?);
            }
            first = false;
            if !self.next_token_if_is(&Token::Comma) {
                break;
            }
        }
        Ok(columns)
    }

    /// Parses one select-list entry. Entries that are not plain identifiers
    /// get a generated `$alias_N` symbol; a trailing `[AS] name` renames and
    /// re-registers the symbol.
    fn parse_derived_column(
        &mut self,
        scope: &SymbolTableRef,
    ) -> Result<DerivedColumn, ParserError> {
        let expr = self.parse_expression(scope)?;

        let mut symbol_name = match &expr {
            Expr::Identifier(identifier) => identifier.qualified_identifier(),
            Expr::QualifiedAsterisk(_) => String::new(),
            expr => {
                let alias = scope.borrow_mut().next_alias();
                let mut info = SymbolInfo::new(alias.clone(), SymbolKind::Calc);
                info.expression = Some(expr.clone());
                scope.borrow_mut().add_symbol(info.into_ref());
                alias
            }
        };

        let mut alias = None;
        let has_alias = matches!(
            self.peek_token(),
            Some(Token::Keyword(Keyword::AS, _)) | Some(Token::Ident(_))
        );
        if has_alias && !symbol_name.is_empty() {
            self.parse_keyword(Keyword::AS);
            let value = self.parse_alias_name()?;
            let renamed = match scope.borrow().find_symbol(&symbol_name) {
                Some(info) => {
                    let mut renamed = info.borrow().clone();
                    renamed.name = value.clone();
                    renamed.alias = value.clone();
                    Some(renamed)
                }
                None => None,
            };
            if let Some(renamed) = renamed {
                scope
                    .borrow_mut()
                    .replace_symbol(&symbol_name, renamed.into_ref());
            }
            symbol_name = value.clone();
            alias = Some(value);
        }

        Ok(DerivedColumn {
            expr,
            symbol_name,
            alias,
        })
    }

    /// Parses a select-list alias. Keywords are accepted here, so that an
    /// aggregate can be aliased to its own name, e.g. `count(id) AS count`.
    fn parse_alias_name(&mut self) -> Result<String, ParserError> {
        match self.peek_token() {
            Some(Token::Ident(_)) => Ok(self.parse_quoted_identifier()?.0),
            Some(Token::Keyword(_, spelling)) => {
                let name = spelling.to_string();
                self.next_token();
                Ok(name)
            }
            _ => self.expected("an identifier"),
        }
    }

    /// Parses the table expression: FROM plus the optional clauses.
    fn parse_table_expression(
        &mut self,
        scope: &SymbolTableRef,
    ) -> Result<TableExpression, ParserError> {
        let from = self.parse_from(scope)?;
        let selection = if self.parse_keyword(Keyword::WHERE) {
            Some(self.parse_expression(scope)?)
        } else {
            None
        };
        let group_by = self.parse_group_by(scope)?;
        let having = if self.parse_keyword(Keyword::HAVING) {
            Some(self.parse_expression(scope)?)
        } else {
            None
        };
        let order_by = self.parse_order_by(scope)?;
        let limit = self.parse_limit(scope)?;
        Ok(TableExpression {
            from,
            selection,
            group_by,
            having,
            order_by,
            limit,
        })
    }

    fn parse_from(&mut self, scope: &SymbolTableRef) -> Result<FromClause, ParserError> {
        self.expect_keyword(Keyword::FROM)?;
        let mut references = vec![];
        loop {
            references.push(self.parse_table_reference(scope)?);
            if !self.next_token_if_is(&Token::Comma) {
                break;
            }
        }
        Ok(FromClause {
            symbol_table: scope.clone(),
            references,
        })
    }

    fn peek_is_join(&self) -> bool {
        matches!(
            self.peek_token(),
            Some(Token::Keyword(
                Keyword::INNER
                    | Keyword::LEFT
                    | Keyword::RIGHT
                    | Keyword::FULL
                    | Keyword::NATURAL
                    | Keyword::JOIN
                    | Keyword::CROSS,
                _
            ))
        )
    }

    fn parse_table_reference(
        &mut self,
        scope: &SymbolTableRef,
    ) -> Result<TableReference, ParserError> {
        let mut reference = self.parse_table_factor(scope)?;
        while self.peek_is_join() {
            reference = self.parse_join_clause(scope, reference)?;
        }
        Ok(reference)
    }

    /// Parses a table factor: a parenthesized subquery with an alias, or an
    /// aliased table name.
    fn parse_table_factor(
        &mut self,
        scope: &SymbolTableRef,
    ) -> Result<TableReference, ParserError> {
        if self.next_token_if_is(&Token::LeftParen) {
            let query = self.parse_query_expression(Some(scope))?;
            self.expect_token(&Token::RightParen)?;
            let mut subquery_alias = String::new();
            if self.parse_keyword(Keyword::AS) {
                let (value, _) = self.parse_quoted_identifier()?;
                subquery_alias = value;
            }
            let mut info = SymbolInfo::new(subquery_alias.clone(), SymbolKind::Subquery);
            info.subquery = Some(query.symbol_table());
            scope.borrow_mut().add_symbol(info.into_ref());
            Ok(TableReference::Subquery(TableSubquery {
                query,
                alias: subquery_alias,
                symbol_table: scope.clone(),
            }))
        } else {
            Ok(TableReference::Identifier(
                self.parse_aliased_table(scope)?,
            ))
        }
    }

    /// Parses `table [AS alias]` and registers the table symbol.
    fn parse_aliased_table(
        &mut self,
        scope: &SymbolTableRef,
    ) -> Result<TableIdentifier, ParserError> {
        let (table_name, mut quoted) = self.parse_quoted_identifier()?;
        let mut info = SymbolInfo::new(table_name.clone(), SymbolKind::Table);
        info.identifier = table_name.clone();

        let mut registered_name = table_name.clone();
        let has_alias = matches!(
            self.peek_token(),
            Some(Token::Keyword(Keyword::AS, _)) | Some(Token::Ident(_))
        );
        if has_alias {
            self.parse_keyword(Keyword::AS);
            let (alias, alias_quoted) = self.parse_quoted_identifier()?;
            info.alias = alias.clone();
            registered_name = alias;
            quoted = alias_quoted;
        }
        info.name = registered_name.clone();
        scope.borrow_mut().add_symbol(info.into_ref());
        let info = scope
            .borrow()
            .find_symbol(&registered_name)
            .expect("table symbol was just registered");

        Ok(TableIdentifier {
            symbol_table: scope.clone(),
            identifier: Identifier {
                prefix: String::new(),
                identifier: table_name,
                quoted,
                info,
            },
        })
    }

    fn parse_join_clause(
        &mut self,
        scope: &SymbolTableRef,
        left: TableReference,
    ) -> Result<TableReference, ParserError> {
        let kind = self.parse_join_kind()?;
        let right = self.parse_table_factor(scope)?;
        let constraint = match kind {
            JoinKind::Inner | JoinKind::Left | JoinKind::Right | JoinKind::Full => {
                self.expect_keyword(Keyword::ON)?;
                Some(self.parse_expression(scope)?)
            }
            JoinKind::Cross | JoinKind::Natural(_) => None,
        };
        Ok(TableReference::Join(Box::new(Join {
            kind,
            left,
            right,
            constraint,
        })))
    }

    fn parse_join_kind(&mut self) -> Result<JoinKind, ParserError> {
        if self.parse_keyword(Keyword::CROSS) {
            self.expect_keyword(Keyword::JOIN)?;
            return Ok(JoinKind::Cross);
        }
        if self.parse_keyword(Keyword::INNER) {
            self.expect_keyword(Keyword::JOIN)?;
            return Ok(JoinKind::Inner);
        }
        if self.parse_keyword(Keyword::NATURAL) {
            let kind = if self.parse_keyword(Keyword::LEFT) {
                NaturalJoinKind::Left
            } else if self.parse_keyword(Keyword::RIGHT) {
                NaturalJoinKind::Right
            } else if self.parse_keyword(Keyword::FULL) {
                NaturalJoinKind::Full
            } else {
                self.parse_keyword(Keyword::INNER);
                NaturalJoinKind::Inner
            };
            if kind != NaturalJoinKind::Inner {
                self.parse_keyword(Keyword::OUTER);
            }
            self.expect_keyword(Keyword::JOIN)?;
            return Ok(JoinKind::Natural(kind));
        }
        if self.parse_keyword(Keyword::LEFT) {
            self.parse_keyword(Keyword::OUTER);
            self.expect_keyword(Keyword::JOIN)?;
            return Ok(JoinKind::Left);
        }
        if self.parse_keyword(Keyword::RIGHT) {
            self.parse_keyword(Keyword::OUTER);
            self.expect_keyword(Keyword::JOIN)?;
            return Ok(JoinKind::Right);
        }
        if self.parse_keyword(Keyword::FULL) {
            self.parse_keyword(Keyword::OUTER);
            self.expect_keyword(Keyword::JOIN)?;
            return Ok(JoinKind::Full);
        }
        self.expect_keyword(Keyword::JOIN)?;
        Ok(JoinKind::Inner)
    }

    fn parse_group_by(
        &mut self,
        scope: &SymbolTableRef,
    ) -> Result<Option<GroupByClause>, ParserError> {
        if !self.parse_keyword(Keyword::GROUP) {
            return Ok(None);
        }
        self.expect_keyword(Keyword::BY)?;
        let quantifier = self.parse_quantifier();
        let identifiers = self.parse_identifier_list(scope)?;
        Ok(Some(GroupByClause {
            quantifier,
            identifiers,
        }))
    }

    /// Parses a comma-separated identifier list, registering plain symbols.
    fn parse_identifier_list(
        &mut self,
        scope: &SymbolTableRef,
    ) -> Result<Vec<Identifier>, ParserError> {
        let mut identifiers = vec![];
        loop {
            let (prefix, name, quoted) = self.parse_qualified_identifier_parts()?;
            identifiers.push(self.register_identifier(scope, prefix, name, quoted));
            if !self.next_token_if_is(&Token::Comma) {
                break;
            }
        }
        Ok(identifiers)
    }

    fn parse_order_by(
        &mut self,
        scope: &SymbolTableRef,
    ) -> Result<Option<OrderByClause>, ParserError> {
        if !self.parse_keyword(Keyword::ORDER) {
            return Ok(None);
        }
        self.expect_keyword(Keyword::BY)?;
        let mut expressions = vec![];
        loop {
            let expr = self.parse_expression(scope)?;
            let order = if self.parse_keyword(Keyword::DESC) {
                SortOrder::Descending
            } else {
                self.parse_keyword(Keyword::ASC);
                SortOrder::Ascending
            };
            expressions.push(OrderExpression { expr, order });
            if !self.next_token_if_is(&Token::Comma) {
                break;
            }
        }
        Ok(Some(OrderByClause { expressions }))
    }

    fn parse_limit(
        &mut self,
        scope: &SymbolTableRef,
    ) -> Result<Option<LimitClause>, ParserError> {
        if !self.parse_keyword(Keyword::LIMIT) {
            return Ok(None);
        }
        let limit = self.parse_expression(scope)?;
        let offset = if self.parse_keyword(Keyword::OFFSET) {
            Some(self.parse_expression(scope)?)
        } else {
            None
        };
        Ok(Some(LimitClause { limit, offset }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csvql_ast::Statement;

    fn parse(sql: &str) -> Statement {
        Parser::new_with_sql(sql)
            .unwrap()
            .parse_statement()
            .unwrap()
    }

    fn parse_query_stmt(sql: &str) -> Query {
        match parse(sql) {
            Statement::Query(query) => query,
            other => panic!("expected a query, got {:?}", other),
        }
    }

    #[test]
    fn select_list_aliases() {
        let query = parse_query_stmt(
            "SELECT id,(first_name || ' ' || last_name) as name,birth_date birthday, \
             7 * 5 / 4 as calc FROM employees emp",
        );
        let select = match &query.expr {
            QueryExpr::Select(select) => select,
            other => panic!("expected a select, got {:?}", other),
        };
        let names: Vec<&str> = select
            .columns
            .iter()
            .map(|c| c.symbol_name.as_str())
            .collect();
        assert_eq!(names, vec!["ID", "NAME", "BIRTHDAY", "CALC"]);
        // calc columns got registered as calc symbols under their alias
        let scope = select.symbol_table.borrow();
        assert!(scope.find_symbol("NAME").is_some());
        assert_eq!(
            scope.find_symbol("CALC").unwrap().borrow().kind,
            SymbolKind::Calc
        );
    }

    #[test]
    fn derived_columns_get_generated_aliases() {
        let query = parse_query_stmt("SELECT 3+4 FROM system_dual");
        let select = match &query.expr {
            QueryExpr::Select(select) => select,
            other => panic!("expected a select, got {:?}", other),
        };
        assert_eq!(select.columns[0].symbol_name, "$alias_0");
    }

    #[test]
    fn table_aliases_register_table_symbols() {
        let query = parse_query_stmt("SELECT id FROM employees emp");
        let scope = query.symbol_table();
        let scope = scope.borrow();
        assert!(scope.has_table_symbol("EMP"));
        let table = scope.find_table_symbol("EMP").unwrap();
        assert_eq!(table.borrow().identifier, "EMPLOYEES");
        assert_eq!(table.borrow().alias, "EMP");
    }

    #[test]
    fn union_tails_nest_to_the_left() {
        let query = parse_query_stmt(
            "SELECT * FROM employees WHERE id < 4700 \
             UNION (SELECT * FROM employees WHERE id >= 4700)",
        );
        match query.expr {
            QueryExpr::Union(union) => {
                assert!(matches!(union.lhs, QueryExpr::Select(_)));
                assert!(matches!(union.rhs, QueryExpr::Select(_)));
            }
            other => panic!("expected a union, got {:?}", other),
        }
    }

    #[test]
    fn subqueries_register_nested_scopes() {
        let query = parse_query_stmt("SELECT id FROM (SELECT id FROM employees) AS sub");
        let scope = query.symbol_table();
        let scope = scope.borrow();
        let subqueries = scope.subqueries();
        assert_eq!(subqueries.len(), 1);
        assert_eq!(subqueries[0].borrow().name, "SUB");
        let nested = subqueries[0].borrow().subquery.clone().unwrap();
        assert!(nested.borrow().parent().is_some());
    }

    #[test]
    fn joins_chain_left_deep() {
        let query = parse_query_stmt(
            "SELECT * FROM a INNER JOIN b ON a.x = b.x CROSS JOIN c",
        );
        let select = match &query.expr {
            QueryExpr::Select(select) => select,
            other => panic!("expected a select, got {:?}", other),
        };
        match &select.table_expression.from.references[0] {
            TableReference::Join(outer) => {
                assert_eq!(outer.kind, JoinKind::Cross);
                assert!(matches!(&outer.left, TableReference::Join(inner)
                    if inner.kind == JoinKind::Inner && inner.constraint.is_some()));
            }
            other => panic!("expected a join, got {:?}", other),
        }
    }

    #[test]
    fn group_order_limit_clauses() {
        let query = parse_query_stmt(
            "SELECT count(id) as count,last_name FROM employees \
             group by last_name order by last_name limit 3 offset 3",
        );
        let select = match &query.expr {
            QueryExpr::Select(select) => select,
            other => panic!("expected a select, got {:?}", other),
        };
        let te = &select.table_expression;
        assert_eq!(te.group_by.as_ref().unwrap().identifiers.len(), 1);
        assert_eq!(te.order_by.as_ref().unwrap().expressions.len(), 1);
        let limit = te.limit.as_ref().unwrap();
        assert!(matches!(limit.limit, Expr::Literal(csvql_core::Value::Int(3))));
        assert!(limit.offset.is_some());
    }

    #[test]
    fn errors_carry_the_offending_token_and_location() {
        let err = Parser::new_with_sql("SELECT FROM t")
            .unwrap()
            .parse_statement()
            .unwrap_err();
        match err {
            ParserError::Parse(message) => {
                assert!(message.contains("FROM"), "message was: {}", message);
                assert!(message.contains("line 1"), "message was: {}", message);
            }
            other => panic!("expected a parse error, got {:?}", other),
        }
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        let mut parser = Parser::new_with_sql("SELECT id FROM t nonsense nonsense").unwrap();
        assert!(parser.parse_statement().is_err());
    }

    #[test]
    fn printed_queries_parse_again() {
        let inputs = [
            "SELECT id,(first_name || ' ' || last_name) as name FROM employees emp \
             WHERE id BETWEEN 100 AND 9999 AND emp.birth_date > DATE'1960-01-01'",
            "SELECT count(id) as count,last_name FROM employees group by last_name \
             order by last_name",
            "SELECT * FROM employees emp INNER JOIN salaries sal ON emp.id = sal.id",
            "SELECT * FROM employees WHERE id < 4700 UNION (SELECT * FROM employees \
             WHERE id >= 4700)",
            "SELECT 3+4 FROM SYSTEM_DUAL",
        ];
        for input in inputs {
            let first = parse(input).to_string();
            let second = parse(&first).to_string();
            assert_eq!(first, second, "round-trip diverged for {}", input);
        }
    }
}
