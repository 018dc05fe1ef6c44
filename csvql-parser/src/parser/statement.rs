use csvql_ast::{
    AlterTableAddStatement, AlterTableDropStatement, ColumnDefinition, CreateMappingStatement,
    CreateTableStatement, DropMappingStatement, DropTableStatement, ExplainKind, ExplainStatement,
    MappingEntry, Statement, SymbolTable, TableConstraint,
};
use csvql_core::{Keyword, Token};

use crate::{error::ParserError, parser::Parser};

impl Parser {
    /// Parses `CREATE TABLE [IF NOT EXISTS] name (...)` after the leading
    /// keywords were consumed.
    pub(crate) fn parse_create_table(&mut self) -> Result<CreateTableStatement, ParserError> {
        let mut if_not_exists = false;
        if self.parse_keyword(Keyword::IF) {
            self.expect_keyword(Keyword::NOT)?;
            self.expect_keyword(Keyword::EXISTS)?;
            if_not_exists = true;
        }
        let (name, _) = self.parse_quoted_identifier()?;
        self.expect_token(&Token::LeftParen)?;

        let mut columns = vec![];
        let mut constraints = vec![];
        loop {
            match self.peek_token() {
                Some(Token::Ident(_)) => columns.push(self.parse_column_definition()?),
                Some(Token::Keyword(
                    Keyword::CONSTRAINT | Keyword::PRIMARY | Keyword::UNIQUE | Keyword::CHECK,
                    _,
                )) => constraints.push(self.parse_table_constraint()?),
                _ => break,
            }
            if !self.next_token_if_is(&Token::Comma) {
                break;
            }
            // a comma has to be followed by another table element
            if !matches!(
                self.peek_token(),
                Some(Token::Ident(_))
                    | Some(Token::Keyword(
                        Keyword::CONSTRAINT | Keyword::PRIMARY | Keyword::UNIQUE | Keyword::CHECK,
                        _
                    ))
            ) {
                return self.expected("a table element");
            }
        }
        self.expect_token(&Token::RightParen)?;

        Ok(CreateTableStatement {
            name,
            columns,
            constraints,
            if_not_exists,
        })
    }

    fn parse_column_definition(&mut self) -> Result<ColumnDefinition, ParserError> {
        let (name, _) = self.parse_quoted_identifier()?;
        let (ty, length) = self.parse_type()?;
        let mut definition = ColumnDefinition::new(name, ty);
        definition.length = length;

        if self.parse_keyword(Keyword::DEFAULT) {
            definition.default_value = Some(self.parse_literal_value()?);
        }
        if self.parse_keyword(Keyword::CONSTRAINT) {
            // a named column constraint; the name itself is not retained
            self.parse_quoted_identifier()?;
        }
        self.parse_column_constraints(&mut definition)?;

        Ok(definition)
    }

    fn parse_column_constraints(
        &mut self,
        definition: &mut ColumnDefinition,
    ) -> Result<(), ParserError> {
        if self.parse_keyword(Keyword::PRIMARY) {
            self.expect_keyword(Keyword::KEY)?;
            definition.primary_key = true;
        } else if self.parse_keyword(Keyword::NOT) {
            self.expect_keyword(Keyword::NULL)?;
            definition.not_null = true;
        } else if self.parse_keyword(Keyword::UNIQUE) {
            definition.unique = true;
        }
        if self.parse_keyword(Keyword::CHECK) {
            self.expect_token(&Token::LeftParen)?;
            let scope = SymbolTable::create();
            definition.check = Some(self.parse_expression(&scope)?);
            self.expect_token(&Token::RightParen)?;
        }
        Ok(())
    }

    fn parse_table_constraint(&mut self) -> Result<TableConstraint, ParserError> {
        let mut constraint = TableConstraint::default();

        if self.parse_keyword(Keyword::CONSTRAINT) {
            let (name, _) = self.parse_quoted_identifier()?;
            constraint.name = Some(name);
        }
        if self.parse_keyword(Keyword::PRIMARY) {
            self.expect_keyword(Keyword::KEY)?;
            self.expect_token(&Token::LeftParen)?;
            constraint.primary_keys = self.parse_column_name_list()?;
            self.expect_token(&Token::RightParen)?;
        } else if self.parse_keyword(Keyword::UNIQUE) {
            self.expect_token(&Token::LeftParen)?;
            constraint.unique_keys = self.parse_column_name_list()?;
            self.expect_token(&Token::RightParen)?;
        }
        if self.parse_keyword(Keyword::CHECK) {
            self.expect_token(&Token::LeftParen)?;
            let scope = SymbolTable::create();
            constraint.check = Some(self.parse_expression(&scope)?);
            self.expect_token(&Token::RightParen)?;
        }

        Ok(constraint)
    }

    fn parse_column_name_list(&mut self) -> Result<Vec<String>, ParserError> {
        let mut columns = vec![];
        loop {
            let (name, _) = self.parse_quoted_identifier()?;
            columns.push(name);
            if !self.next_token_if_is(&Token::Comma) {
                break;
            }
        }
        Ok(columns)
    }

    /// Parses `ALTER TABLE name ADD|DROP [COLUMN] ...` after `ALTER`.
    pub(crate) fn parse_alter_table(&mut self) -> Result<Statement, ParserError> {
        self.expect_keyword(Keyword::TABLE)?;
        let (table, _) = self.parse_quoted_identifier()?;
        if self.parse_keyword(Keyword::ADD) {
            self.parse_keyword(Keyword::COLUMN);
            Ok(Statement::AlterTableAdd(AlterTableAddStatement {
                table,
                definition: self.parse_column_definition()?,
            }))
        } else if self.parse_keyword(Keyword::DROP) {
            self.parse_keyword(Keyword::COLUMN);
            let (column, _) = self.parse_quoted_identifier()?;
            Ok(Statement::AlterTableDrop(AlterTableDropStatement {
                table,
                column,
            }))
        } else {
            self.expected("ADD or DROP")
        }
    }

    /// Parses `DROP TABLE name` after the leading keywords.
    pub(crate) fn parse_drop_table(&mut self) -> Result<DropTableStatement, ParserError> {
        let (name, _) = self.parse_quoted_identifier()?;
        Ok(DropTableStatement { name })
    }

    /// Parses `CREATE MAPPING name('pattern'[, delimiter[, skip_first]])`
    /// after the leading keywords.
    pub(crate) fn parse_create_mapping(&mut self) -> Result<CreateMappingStatement, ParserError> {
        let (table, _) = self.parse_quoted_identifier()?;
        self.expect_token(&Token::LeftParen)?;

        let pattern = match self.peek_token() {
            Some(Token::Ident(ident)) if ident.quoted => {
                let (value, _) = self.parse_quoted_identifier()?;
                value
            }
            _ => self.parse_string_literal()?,
        };

        let mut delimiter = ',';
        let mut skip_first_line = false;
        if self.next_token_if_is(&Token::Comma) {
            delimiter = match self.peek_token() {
                Some(Token::Char(_)) => match self.next_token() {
                    Some(Token::Char(c)) => c,
                    _ => unreachable!(),
                },
                _ => return self.expected("a delimiter character"),
            };
            if self.next_token_if_is(&Token::Comma) {
                skip_first_line = if self.parse_keyword(Keyword::TRUE) {
                    true
                } else if self.parse_keyword(Keyword::FALSE) {
                    false
                } else {
                    return self.expected("TRUE or FALSE");
                };
            }
        }
        self.expect_token(&Token::RightParen)?;

        Ok(CreateMappingStatement {
            table,
            mappings: vec![MappingEntry {
                pattern,
                delimiter,
                skip_first_line,
            }],
        })
    }

    /// Parses `DROP MAPPING name` after the leading keywords.
    pub(crate) fn parse_drop_mapping(&mut self) -> Result<DropMappingStatement, ParserError> {
        let (table, _) = self.parse_quoted_identifier()?;
        Ok(DropMappingStatement { table })
    }

    /// Parses `EXPLAIN AST|EXEC <query>` after `EXPLAIN`.
    pub(crate) fn parse_explain(&mut self) -> Result<ExplainStatement, ParserError> {
        let kind = if self.parse_keyword(Keyword::AST) {
            ExplainKind::Ast
        } else if self.parse_keyword(Keyword::EXEC) {
            ExplainKind::Exec
        } else {
            return self.expected("AST or EXEC");
        };
        let query = self.parse_query()?;
        Ok(ExplainStatement { kind, query })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csvql_core::{Type, Value};

    fn parse(sql: &str) -> Statement {
        Parser::new_with_sql(sql)
            .unwrap()
            .parse_statement()
            .unwrap()
    }

    #[test]
    fn create_table_with_columns_and_constraints() {
        let statement = parse(
            "CREATE TABLE IF NOT EXISTS employees(id INT PRIMARY KEY, \
             first_name STRING(64) NOT NULL, birth_date DATE, active BOOLEAN DEFAULT true, \
             CONSTRAINT uq UNIQUE (first_name, birth_date))",
        );
        let create = match statement {
            Statement::CreateTable(create) => create,
            other => panic!("expected CREATE TABLE, got {:?}", other),
        };
        assert!(create.if_not_exists);
        assert_eq!(create.name, "EMPLOYEES");
        assert_eq!(create.columns.len(), 4);
        assert!(create.columns[0].primary_key);
        assert_eq!(create.columns[1].ty, Type::String);
        assert_eq!(create.columns[1].length, 64);
        assert!(create.columns[1].not_null);
        assert_eq!(create.columns[3].default_value, Some(Value::Boolean(true)));
        assert_eq!(create.constraints.len(), 1);
        assert_eq!(
            create.constraints[0].unique_keys,
            vec!["FIRST_NAME".to_string(), "BIRTH_DATE".to_string()]
        );
    }

    #[test]
    fn create_mapping_with_options() {
        let statement = parse("CREATE MAPPING employees('employees\\.csv', ';', true)");
        let mapping = match statement {
            Statement::CreateMapping(mapping) => mapping,
            other => panic!("expected CREATE MAPPING, got {:?}", other),
        };
        assert_eq!(mapping.table, "EMPLOYEES");
        assert_eq!(
            mapping.mappings,
            vec![MappingEntry {
                pattern: "employees\\.csv".into(),
                delimiter: ';',
                skip_first_line: true,
            }]
        );
    }

    #[test]
    fn create_mapping_defaults() {
        let statement = parse("CREATE MAPPING salaries('salaries.csv')");
        let mapping = match statement {
            Statement::CreateMapping(mapping) => mapping,
            other => panic!("expected CREATE MAPPING, got {:?}", other),
        };
        assert_eq!(mapping.mappings[0].delimiter, ',');
        assert!(!mapping.mappings[0].skip_first_line);
    }

    #[test]
    fn drop_statements() {
        assert!(matches!(parse("DROP TABLE employees;"), Statement::DropTable(_)));
        assert!(matches!(
            parse("DROP MAPPING employees"),
            Statement::DropMapping(_)
        ));
    }

    #[test]
    fn alter_table_statements() {
        assert!(matches!(
            parse("ALTER TABLE employees ADD COLUMN salary REAL"),
            Statement::AlterTableAdd(_)
        ));
        assert!(matches!(
            parse("ALTER TABLE employees DROP COLUMN salary"),
            Statement::AlterTableDrop(_)
        ));
    }

    #[test]
    fn explain_statements() {
        let statement = parse("EXPLAIN AST SELECT id FROM employees");
        match statement {
            Statement::Explain(explain) => assert_eq!(explain.kind, ExplainKind::Ast),
            other => panic!("expected EXPLAIN, got {:?}", other),
        }
        let statement = parse("EXPLAIN EXEC SELECT id FROM employees");
        match statement {
            Statement::Explain(explain) => assert_eq!(explain.kind, ExplainKind::Exec),
            other => panic!("expected EXPLAIN, got {:?}", other),
        }
    }
}
