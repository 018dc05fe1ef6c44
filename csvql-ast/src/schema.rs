use csvql_core::{Type, Value};
use serde::{Deserialize, Serialize};

/// Read access to the table schemas of a catalog, used to type symbol
/// tables without knowing the concrete catalog implementation.
pub trait CatalogRef {
    /// Returns true if the catalog holds a table with the given name.
    fn has_table(&self, name: &str) -> bool;

    /// Returns the schema of the named table.
    fn table(&self, name: &str) -> Option<&TableSchema>;
}

/// One column of a table schema.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// The column name.
    pub name: String,
    /// The column type.
    pub ty: Type,
    /// Whether the column is part of the primary key.
    #[serde(default)]
    pub primary_key: bool,
    /// Whether the column is unique.
    #[serde(default)]
    pub unique: bool,
    /// Whether the column rejects nulls.
    #[serde(default)]
    pub not_null: bool,
    /// The default value, if one was declared.
    #[serde(default)]
    pub default_value: Option<Value>,
    /// The CHECK expression as SQL text, if one was declared.
    #[serde(default)]
    pub check: Option<String>,
    /// The declared length for string columns, 0 when unbounded.
    #[serde(default)]
    pub length: u32,
}

impl Column {
    /// Creates a plain column with the given name and type.
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Column {
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

/// A table-level constraint of a schema.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaConstraint {
    /// The constraint name, if one was declared.
    #[serde(default)]
    pub name: Option<String>,
    /// The primary key column list.
    #[serde(default)]
    pub primary_keys: Vec<String>,
    /// The unique column list.
    #[serde(default)]
    pub unique_keys: Vec<String>,
    /// The CHECK expression as SQL text, if one was declared.
    #[serde(default)]
    pub check: Option<String>,
}

/// The schema of one table: its name, ordered columns and table-level
/// constraints. This is what the catalog persists.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// The (upper-cased) table name.
    pub name: String,
    /// The ordered column list.
    pub columns: Vec<Column>,
    /// Table-level constraints.
    #[serde(default)]
    pub constraints: Vec<SchemaConstraint>,
}

impl TableSchema {
    /// Creates an empty schema with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        TableSchema {
            name: name.into(),
            columns: vec![],
            constraints: vec![],
        }
    }

    /// Returns the ordered column list.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Returns the number of columns.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Returns true if the table has a column with the given name.
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Finds a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }

    /// Returns the position of a column.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_round_trips_through_json() {
        let schema = TableSchema {
            name: "EMPLOYEES".into(),
            columns: vec![
                Column {
                    primary_key: true,
                    ..Column::new("ID", Type::Int)
                },
                Column::new("HIRE_DATE", Type::Date),
            ],
            constraints: vec![SchemaConstraint {
                name: Some("PK".into()),
                primary_keys: vec!["ID".into()],
                ..SchemaConstraint::default()
            }],
        };
        let json = serde_json::to_string(&schema).unwrap();
        let back: TableSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(schema, back);
    }

    #[test]
    fn readers_tolerate_additional_fields() {
        let json = r#"{
            "name": "T",
            "columns": [{"name": "A", "ty": "Int", "flavour": "vanilla"}],
            "comment": "from a newer version"
        }"#;
        let schema: TableSchema = serde_json::from_str(json).unwrap();
        assert_eq!(schema.column_count(), 1);
        assert_eq!(schema.columns()[0].ty, Type::Int);
    }
}
