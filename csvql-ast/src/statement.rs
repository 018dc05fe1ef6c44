use core::fmt;

use csvql_core::{Type, Value};

use crate::{
    expr::{display_literal, Expr},
    query::Query,
    utils::display_comma_separated,
};

/// A parsed SQL statement.
#[derive(Clone, Debug)]
pub enum Statement {
    /// A SELECT query.
    Query(Query),
    /// `CREATE TABLE [IF NOT EXISTS] name (...)`.
    CreateTable(CreateTableStatement),
    /// `ALTER TABLE name ADD [COLUMN] ...`; parsed, executed as a no-op.
    AlterTableAdd(AlterTableAddStatement),
    /// `ALTER TABLE name DROP [COLUMN] ...`; parsed, executed as a no-op.
    AlterTableDrop(AlterTableDropStatement),
    /// `DROP TABLE name`.
    DropTable(DropTableStatement),
    /// `CREATE MAPPING name('pattern', delimiter, skip_first_line)`.
    CreateMapping(CreateMappingStatement),
    /// `DROP MAPPING name`.
    DropMapping(DropMappingStatement),
    /// `EXPLAIN AST|EXEC <query>`.
    Explain(ExplainStatement),
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Statement::Query(query) => write!(f, "{}", query),
            Statement::CreateTable(stmt) => write!(f, "{}", stmt),
            Statement::AlterTableAdd(stmt) => write!(f, "{}", stmt),
            Statement::AlterTableDrop(stmt) => write!(f, "{}", stmt),
            Statement::DropTable(stmt) => write!(f, "{}", stmt),
            Statement::CreateMapping(stmt) => write!(f, "{}", stmt),
            Statement::DropMapping(stmt) => write!(f, "{}", stmt),
            Statement::Explain(stmt) => write!(f, "{}", stmt),
        }
    }
}

/// One column definition of a CREATE TABLE statement.
#[derive(Clone, Debug)]
pub struct ColumnDefinition {
    /// The column name.
    pub name: String,
    /// The column type.
    pub ty: Type,
    /// PRIMARY KEY flag.
    pub primary_key: bool,
    /// UNIQUE flag.
    pub unique: bool,
    /// NOT NULL flag.
    pub not_null: bool,
    /// The DEFAULT value, if declared.
    pub default_value: Option<Value>,
    /// The CHECK expression, if declared.
    pub check: Option<Expr>,
    /// The declared string length, 0 when unbounded.
    pub length: u32,
}

impl ColumnDefinition {
    /// Creates a plain column definition.
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        ColumnDefinition {
            name: name.into(),
            ty,
            primary_key: false,
            unique: false,
            not_null: false,
            default_value: None,
            check: None,
            length: 0,
        }
    }
}

impl fmt::Display for ColumnDefinition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.name, self.ty)?;
        if self.ty == Type::String && self.length > 0 {
            write!(f, "({})", self.length)?;
        }
        if let Some(default) = &self.default_value {
            write!(f, " DEFAULT {}", display_literal(default))?;
        }
        if self.primary_key {
            write!(f, " PRIMARY KEY")?;
        }
        if self.not_null {
            write!(f, " NOT NULL")?;
        }
        if self.unique {
            write!(f, " UNIQUE")?;
        }
        if let Some(check) = &self.check {
            write!(f, " CHECK({})", check)?;
        }
        Ok(())
    }
}

/// A table-level constraint of a CREATE TABLE statement.
#[derive(Clone, Debug, Default)]
pub struct TableConstraint {
    /// The constraint name, if declared.
    pub name: Option<String>,
    /// PRIMARY KEY column list.
    pub primary_keys: Vec<String>,
    /// UNIQUE column list.
    pub unique_keys: Vec<String>,
    /// CHECK expression.
    pub check: Option<Expr>,
}

impl fmt::Display for TableConstraint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(name) = &self.name {
            write!(f, "CONSTRAINT {} ", name)?;
        }
        if !self.primary_keys.is_empty() {
            write!(
                f,
                "PRIMARY KEY({})",
                display_comma_separated(&self.primary_keys)
            )?;
        }
        if !self.unique_keys.is_empty() {
            write!(f, "UNIQUE({})", display_comma_separated(&self.unique_keys))?;
        }
        if let Some(check) = &self.check {
            write!(f, "CHECK({})", check)?;
        }
        Ok(())
    }
}

/// `CREATE TABLE [IF NOT EXISTS] name (...)`.
#[derive(Clone, Debug)]
pub struct CreateTableStatement {
    /// The table name.
    pub name: String,
    /// The column definitions.
    pub columns: Vec<ColumnDefinition>,
    /// Table-level constraints.
    pub constraints: Vec<TableConstraint>,
    /// Whether IF NOT EXISTS was given.
    pub if_not_exists: bool,
}

impl fmt::Display for CreateTableStatement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CREATE TABLE ")?;
        if self.if_not_exists {
            write!(f, "IF NOT EXISTS ")?;
        }
        write!(f, "{}(", self.name)?;
        write!(f, "{}", display_comma_separated(&self.columns))?;
        if !self.constraints.is_empty() {
            write!(f, ",{}", display_comma_separated(&self.constraints))?;
        }
        write!(f, ")")
    }
}

/// `ALTER TABLE name ADD [COLUMN] <definition>`.
#[derive(Clone, Debug)]
pub struct AlterTableAddStatement {
    /// The table name.
    pub table: String,
    /// The added column.
    pub definition: ColumnDefinition,
}

impl fmt::Display for AlterTableAddStatement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ALTER TABLE {} ADD COLUMN {}", self.table, self.definition)
    }
}

/// `ALTER TABLE name DROP [COLUMN] <column>`.
#[derive(Clone, Debug)]
pub struct AlterTableDropStatement {
    /// The table name.
    pub table: String,
    /// The dropped column name.
    pub column: String,
}

impl fmt::Display for AlterTableDropStatement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ALTER TABLE {} DROP COLUMN {}", self.table, self.column)
    }
}

/// `DROP TABLE name`.
#[derive(Clone, Debug)]
pub struct DropTableStatement {
    /// The table name.
    pub name: String,
}

impl fmt::Display for DropTableStatement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "DROP TABLE {}", self.name)
    }
}

/// One file mapping entry: a file pattern plus CSV options.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MappingEntry {
    /// The file pattern, matched as a regular expression against candidate
    /// file paths.
    pub pattern: String,
    /// The field delimiter.
    pub delimiter: char,
    /// Whether the first line of the file is a header to skip.
    pub skip_first_line: bool,
}

/// `CREATE MAPPING name('pattern', delimiter, skip_first_line)`.
#[derive(Clone, Debug)]
pub struct CreateMappingStatement {
    /// The mapped table name.
    pub table: String,
    /// The mapping entries.
    pub mappings: Vec<MappingEntry>,
}

impl fmt::Display for CreateMappingStatement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CREATE MAPPING {}(", self.table)?;
        let mut delim = "";
        for mapping in &self.mappings {
            write!(
                f,
                "{}'{}','{}',{}",
                delim,
                mapping.pattern,
                mapping.delimiter,
                if mapping.skip_first_line {
                    "TRUE"
                } else {
                    "FALSE"
                }
            )?;
            delim = ",";
        }
        write!(f, ")")
    }
}

/// `DROP MAPPING name`.
#[derive(Clone, Debug)]
pub struct DropMappingStatement {
    /// The mapped table name.
    pub table: String,
}

impl fmt::Display for DropMappingStatement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "DROP MAPPING {}", self.table)
    }
}

/// What an EXPLAIN statement should describe.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ExplainKind {
    /// Dump the AST of the query.
    Ast,
    /// Dump the operator pipeline of the query.
    Exec,
}

impl fmt::Display for ExplainKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Ast => "AST",
            Self::Exec => "EXEC",
        })
    }
}

/// `EXPLAIN AST|EXEC <query>`.
#[derive(Clone, Debug)]
pub struct ExplainStatement {
    /// What to describe.
    pub kind: ExplainKind,
    /// The described query.
    pub query: Query,
}

impl fmt::Display for ExplainStatement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "EXPLAIN {} {}", self.kind, self.query)
    }
}
