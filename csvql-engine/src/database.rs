use std::{
    fs,
    path::{Path, PathBuf},
};

use csvql_ast::{CatalogRef, Column, MappingEntry, TableSchema};
use csvql_core::Type;
use tracing::debug;

use crate::{error::CsvqlError, mapping::FileMapping};

const SYSTEM_PREFIX: &str = "SYSTEM_";

/// The catalog: the set of table schemas and the file-mapping registry.
/// With a database path set, tables and mappings are persisted as JSON
/// documents under `tables/` and `mappings/` and loaded back on startup.
#[derive(Debug, Default)]
pub struct Database {
    path: Option<PathBuf>,
    tables: Vec<TableSchema>,
    mappings: FileMapping,
}

impl Database {
    /// Creates an in-memory database holding only the system tables.
    pub fn in_memory() -> Self {
        let mut database = Database::default();
        database.add_system_tables();
        database
    }

    /// Opens (or bootstraps) a database directory: creates the `tables/`,
    /// `mappings/` and `functions/` subdirectories when absent and loads
    /// the persisted tables and mappings.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CsvqlError> {
        let path = path.into();
        for dir in [
            path.clone(),
            path.join("tables"),
            path.join("mappings"),
            path.join("functions"),
        ] {
            if !dir.exists() {
                fs::create_dir_all(&dir)?;
            }
        }
        let mut database = Database {
            path: Some(path),
            tables: vec![],
            mappings: FileMapping::new(),
        };
        database.add_system_tables();
        database.read_tables_from_path()?;
        database.read_mappings_from_path()?;
        Ok(database)
    }

    fn add_system_tables(&mut self) {
        let mut dual = TableSchema::new("SYSTEM_DUAL");
        dual.columns.push(Column::new("X", Type::Boolean));
        self.tables.push(dual);
    }

    fn table_path(&self) -> Option<PathBuf> {
        self.path.as_ref().map(|path| path.join("tables"))
    }

    fn mapping_path(&self) -> Option<PathBuf> {
        self.path.as_ref().map(|path| path.join("mappings"))
    }

    fn read_tables_from_path(&mut self) -> Result<(), CsvqlError> {
        let table_path = match self.table_path() {
            Some(path) => path,
            None => return Ok(()),
        };
        for entry in fs::read_dir(table_path)? {
            let entry = entry?;
            let content = fs::read_to_string(entry.path())?;
            let schema: TableSchema = serde_json::from_str(&content).map_err(|err| {
                CsvqlError::catalog(format!(
                    "cannot load table file '{}': {}",
                    entry.path().display(),
                    err
                ))
            })?;
            if self.has_table(&schema.name) {
                return Err(CsvqlError::catalog(format!(
                    "table '{}' already added",
                    schema.name
                )));
            }
            debug!(table = %schema.name, "loaded table schema");
            self.tables.push(schema);
        }
        Ok(())
    }

    fn read_mappings_from_path(&mut self) -> Result<(), CsvqlError> {
        if let Some(path) = self.mapping_path() {
            self.mappings.read_from_path(&path)?;
        }
        Ok(())
    }

    /// Returns true if the named table exists; names are case-insensitive.
    pub fn has_table(&self, name: &str) -> bool {
        self.find_table(name).is_some()
    }

    /// Returns the schema of the named table.
    pub fn table(&self, name: &str) -> Result<&TableSchema, CsvqlError> {
        self.find_table(name)
            .ok_or_else(|| CsvqlError::catalog(format!("table '{}' not found", name)))
    }

    fn find_table(&self, name: &str) -> Option<&TableSchema> {
        let name = name.to_uppercase();
        self.tables.iter().find(|table| table.name == name)
    }

    /// Adds a table, optionally persisting it to the database directory.
    pub fn add_table(&mut self, schema: TableSchema, persist: bool) -> Result<(), CsvqlError> {
        if self.has_table(&schema.name) {
            return Err(CsvqlError::catalog(format!(
                "table '{}' does already exist",
                schema.name
            )));
        }
        if persist {
            if let Some(table_path) = self.table_path() {
                let content = serde_json::to_string_pretty(&schema).map_err(|err| {
                    CsvqlError::catalog(format!("cannot serialize table: {}", err))
                })?;
                fs::write(table_path.join(&schema.name), content)?;
            }
        }
        self.tables.push(schema);
        Ok(())
    }

    /// Drops a table and its mapping. System tables cannot be dropped.
    pub fn drop_table(&mut self, name: &str) -> Result<(), CsvqlError> {
        let name = name.to_uppercase();
        if name.starts_with(SYSTEM_PREFIX) {
            return Err(CsvqlError::catalog(format!(
                "table '{}' is a system table, dropping nothing",
                name
            )));
        }
        let index = self
            .tables
            .iter()
            .position(|table| table.name == name)
            .ok_or_else(|| {
                CsvqlError::catalog(format!("table '{}' not found, dropping nothing", name))
            })?;
        if let Some(table_path) = self.table_path() {
            let file = table_path.join(&name);
            if file.exists() {
                fs::remove_file(file)?;
            }
        }
        self.tables.remove(index);
        self.remove_mapping_files(&name);
        self.mappings.remove_mapping(&name);
        Ok(())
    }

    /// Returns the mapping entry of a table.
    pub fn mapping_for_table(&self, table: &str) -> Result<&MappingEntry, CsvqlError> {
        self.mappings
            .mapping_for_table(&table.to_uppercase())
            .ok_or_else(|| CsvqlError::catalog(format!("no mapping found for table '{}'", table)))
    }

    /// Adds (or replaces) the mapping of a table, persisting it when the
    /// database has a directory. System tables cannot be mapped.
    pub fn add_mapping(
        &mut self,
        table: &str,
        entries: Vec<MappingEntry>,
    ) -> Result<(), CsvqlError> {
        let table = table.to_uppercase();
        if table.starts_with(SYSTEM_PREFIX) {
            return Err(CsvqlError::catalog("cannot add mappings for system tables"));
        }
        self.mappings.add_mapping(table.clone(), entries)?;
        if let Some(mapping_path) = self.mapping_path() {
            self.mappings.persist(&table, &mapping_path)?;
        }
        Ok(())
    }

    /// Removes the mapping of a table. System tables have no mappings.
    pub fn remove_mapping(&mut self, table: &str) -> Result<(), CsvqlError> {
        let table = table.to_uppercase();
        if table.starts_with(SYSTEM_PREFIX) {
            return Err(CsvqlError::catalog(
                "cannot drop mappings for system tables",
            ));
        }
        if !self.mappings.has_mapping(&table) {
            return Err(CsvqlError::catalog(format!(
                "mapping '{}' not found",
                table
            )));
        }
        self.remove_mapping_files(&table);
        self.mappings.remove_mapping(&table);
        Ok(())
    }

    fn remove_mapping_files(&self, table: &str) {
        if let Some(mapping_path) = self.mapping_path() {
            let file = mapping_path.join(table);
            if file.exists() {
                let _ = fs::remove_file(file);
            }
        }
    }

    /// The database directory, if the database is persistent.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl CatalogRef for Database {
    fn has_table(&self, name: &str) -> bool {
        Database::has_table(self, name)
    }

    fn table(&self, name: &str) -> Option<&TableSchema> {
        self.find_table(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn employees() -> TableSchema {
        let mut schema = TableSchema::new("EMPLOYEES");
        schema.columns.push(Column::new("ID", Type::Int));
        schema
            .columns
            .push(Column::new("LAST_NAME", Type::String));
        schema
    }

    #[test]
    fn system_dual_is_always_present() {
        let database = Database::in_memory();
        let dual = database.table("SYSTEM_DUAL").unwrap();
        assert_eq!(dual.column_count(), 1);
        assert_eq!(dual.columns()[0].ty, Type::Boolean);
    }

    #[test]
    fn tables_are_case_insensitive() {
        let mut database = Database::in_memory();
        database.add_table(employees(), false).unwrap();
        assert!(database.has_table("employees"));
        assert!(database.table("Employees").is_ok());
    }

    #[test]
    fn duplicate_tables_are_rejected() {
        let mut database = Database::in_memory();
        database.add_table(employees(), false).unwrap();
        assert!(matches!(
            database.add_table(employees(), false),
            Err(CsvqlError::Catalog(_))
        ));
    }

    #[test]
    fn system_tables_are_protected() {
        let mut database = Database::in_memory();
        assert!(database.drop_table("SYSTEM_DUAL").is_err());
        assert!(database
            .add_mapping(
                "SYSTEM_DUAL",
                vec![MappingEntry {
                    pattern: "x".into(),
                    delimiter: ',',
                    skip_first_line: false,
                }]
            )
            .is_err());
    }

    #[test]
    fn persistent_databases_reload_their_state() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut database = Database::open(dir.path()).unwrap();
            database.add_table(employees(), true).unwrap();
            database
                .add_mapping(
                    "EMPLOYEES",
                    vec![MappingEntry {
                        pattern: "employees\\.csv".into(),
                        delimiter: ';',
                        skip_first_line: true,
                    }],
                )
                .unwrap();
        }
        let database = Database::open(dir.path()).unwrap();
        assert!(database.has_table("EMPLOYEES"));
        let mapping = database.mapping_for_table("EMPLOYEES").unwrap();
        assert_eq!(mapping.delimiter, ';');
        assert!(mapping.skip_first_line);
        // the directory tree was bootstrapped
        assert!(dir.path().join("tables").is_dir());
        assert!(dir.path().join("mappings").is_dir());
        assert!(dir.path().join("functions").is_dir());
    }

    #[test]
    fn drop_table_removes_the_mapping() {
        let mut database = Database::in_memory();
        database.add_table(employees(), false).unwrap();
        database
            .add_mapping(
                "EMPLOYEES",
                vec![MappingEntry {
                    pattern: "employees\\.csv".into(),
                    delimiter: ',',
                    skip_first_line: false,
                }],
            )
            .unwrap();
        database.drop_table("EMPLOYEES").unwrap();
        assert!(!database.has_table("EMPLOYEES"));
        assert!(database.mapping_for_table("EMPLOYEES").is_err());
    }
}
