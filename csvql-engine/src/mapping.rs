use std::{fs, path::Path};

use csvql_ast::MappingEntry;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CsvqlError;

/// One persisted table mapping: the table name and its mapping entries.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct TableMapping {
    table: String,
    entries: Vec<MappingEntry>,
}

/// The registry associating table names with file patterns and CSV parsing
/// options.
#[derive(Clone, Debug, Default)]
pub struct FileMapping {
    mappings: Vec<TableMapping>,
}

impl FileMapping {
    /// Creates an empty registry.
    pub fn new() -> Self {
        FileMapping::default()
    }

    /// Returns the mapping entry of the given table.
    pub fn mapping_for_table(&self, table: &str) -> Option<&MappingEntry> {
        self.mappings
            .iter()
            .find(|mapping| mapping.table == table)
            .and_then(|mapping| mapping.entries.first())
    }

    /// Returns true if the table has a mapping.
    pub fn has_mapping(&self, table: &str) -> bool {
        self.mapping_for_table(table).is_some()
    }

    /// Adds the mapping entries of a table, validating the patterns.
    pub fn add_mapping(
        &mut self,
        table: impl Into<String>,
        entries: Vec<MappingEntry>,
    ) -> Result<(), CsvqlError> {
        let table = table.into();
        if entries.is_empty() {
            return Err(CsvqlError::Config(format!(
                "mapping for table '{}' needs at least one file pattern",
                table
            )));
        }
        for entry in &entries {
            Regex::new(&entry.pattern).map_err(|err| {
                CsvqlError::Config(format!(
                    "invalid file pattern '{}': {}",
                    entry.pattern, err
                ))
            })?;
        }
        self.mappings.retain(|mapping| mapping.table != table);
        self.mappings.push(TableMapping { table, entries });
        Ok(())
    }

    /// Removes the mapping of a table.
    pub fn remove_mapping(&mut self, table: &str) {
        self.mappings.retain(|mapping| mapping.table != table);
    }

    /// Finds the first candidate file matching the pattern of the entry.
    /// The pattern matches anywhere at the end of the path, so a bare file
    /// name maps files in any directory.
    pub fn find_file<'a>(
        entry: &MappingEntry,
        files: &'a [String],
    ) -> Result<&'a str, CsvqlError> {
        let pattern = format!(".*{}", entry.pattern);
        let regex = Regex::new(&pattern).map_err(|err| {
            CsvqlError::Config(format!("invalid file pattern '{}': {}", entry.pattern, err))
        })?;
        files
            .iter()
            .find(|file| regex.is_match(file))
            .map(|file| file.as_str())
            .ok_or_else(|| {
                CsvqlError::catalog(format!("no file found for mapping '{}'", pattern))
            })
    }

    /// Loads all mappings persisted under the given directory.
    pub fn read_from_path(&mut self, path: &Path) -> Result<(), CsvqlError> {
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let content = fs::read_to_string(entry.path())?;
            let mapping: TableMapping = serde_json::from_str(&content)?;
            self.mappings
                .retain(|existing| existing.table != mapping.table);
            self.mappings.push(mapping);
        }
        Ok(())
    }

    /// Persists the mapping of one table as a JSON document under the given
    /// directory.
    pub fn persist(&self, table: &str, path: &Path) -> Result<(), CsvqlError> {
        let mapping = self
            .mappings
            .iter()
            .find(|mapping| mapping.table == table)
            .ok_or_else(|| CsvqlError::catalog(format!("mapping '{}' not found", table)))?;
        let content = serde_json::to_string_pretty(mapping)
            .map_err(|err| CsvqlError::catalog(format!("cannot serialize mapping: {}", err)))?;
        fs::write(path.join(table), content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pattern: &str) -> MappingEntry {
        MappingEntry {
            pattern: pattern.into(),
            delimiter: ',',
            skip_first_line: false,
        }
    }

    #[test]
    fn mapping_patterns_match_candidate_files() {
        let files = vec![
            "/data/salaries.csv".to_string(),
            "/data/employees.csv".to_string(),
        ];
        let employees = entry("employees\\.csv");
        assert_eq!(
            FileMapping::find_file(&employees, &files).unwrap(),
            "/data/employees.csv"
        );
        let missing = entry("departments\\.csv");
        assert!(matches!(
            FileMapping::find_file(&missing, &files),
            Err(CsvqlError::Catalog(_))
        ));
    }

    #[test]
    fn invalid_patterns_are_configuration_errors() {
        let mut mapping = FileMapping::new();
        let err = mapping
            .add_mapping("EMPLOYEES", vec![entry("([")])
            .unwrap_err();
        assert!(matches!(err, CsvqlError::Config(_)));
    }

    #[test]
    fn mappings_replace_and_remove() {
        let mut mapping = FileMapping::new();
        mapping
            .add_mapping("EMPLOYEES", vec![entry("a\\.csv")])
            .unwrap();
        mapping
            .add_mapping("EMPLOYEES", vec![entry("b\\.csv")])
            .unwrap();
        assert_eq!(
            mapping.mapping_for_table("EMPLOYEES").unwrap().pattern,
            "b\\.csv"
        );
        mapping.remove_mapping("EMPLOYEES");
        assert!(!mapping.has_mapping("EMPLOYEES"));
    }

    #[test]
    fn mappings_round_trip_through_the_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let mut mapping = FileMapping::new();
        mapping
            .add_mapping("EMPLOYEES", vec![entry("employees\\.csv")])
            .unwrap();
        mapping.persist("EMPLOYEES", dir.path()).unwrap();

        let mut loaded = FileMapping::new();
        loaded.read_from_path(dir.path()).unwrap();
        assert_eq!(
            loaded.mapping_for_table("EMPLOYEES").unwrap().pattern,
            "employees\\.csv"
        );
    }
}
