use core::fmt;
use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

use csvql_core::Type;

use crate::{error::SemanticError, expr::Expr, schema::CatalogRef};

/// The kind of a symbol.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SymbolKind {
    /// No kind assigned yet.
    NoSym,
    /// A plain column symbol.
    Plain,
    /// A table symbol.
    Table,
    /// A subquery symbol, holding the nested symbol table.
    Subquery,
    /// A function symbol.
    Function,
    /// A calculated select-list entry; holds the producing expression.
    Calc,
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::NoSym => "NOSYM",
            Self::Plain => "PLAIN",
            Self::Table => "TABLE",
            Self::Subquery => "SUBQUERY",
            Self::Function => "FUNCTION",
            Self::Calc => "CALC",
        })
    }
}

/// A shared, mutable symbol. The parser creates symbols, the typing pass
/// fills in types and qualified names.
pub type SymbolRef = Rc<RefCell<SymbolInfo>>;

/// Everything known about one name in a query scope.
#[derive(Clone, Debug)]
pub struct SymbolInfo {
    /// The unique name of the symbol within its table.
    pub name: String,
    /// What kind of symbol this is.
    pub kind: SymbolKind,
    /// The resolved type; `Type::None` until typed.
    pub ty: Type,
    /// The bare identifier (column or table name).
    pub identifier: String,
    /// The table prefix the identifier was written with, if any.
    pub prefix: String,
    /// An alias assigned with `AS` or a table alias.
    pub alias: String,
    /// The name of the owning relation.
    pub relation: String,
    /// The fully qualified `table.column` name, filled during typing.
    pub qualified_identifier: String,
    /// For `Calc` symbols, the expression that produces the value.
    pub expression: Option<Expr>,
    /// For `Subquery` symbols, the nested symbol table.
    pub subquery: Option<SymbolTableRef>,
}

impl Default for SymbolInfo {
    fn default() -> Self {
        SymbolInfo {
            name: String::new(),
            kind: SymbolKind::NoSym,
            ty: Type::None,
            identifier: String::new(),
            prefix: String::new(),
            alias: String::new(),
            relation: String::new(),
            qualified_identifier: String::new(),
            expression: None,
            subquery: None,
        }
    }
}

impl SymbolInfo {
    /// Creates a new symbol with the given name and kind.
    pub fn new(name: impl Into<String>, kind: SymbolKind) -> Self {
        SymbolInfo {
            name: name.into(),
            kind,
            ..SymbolInfo::default()
        }
    }

    /// Wraps the symbol into a shared reference.
    pub fn into_ref(self) -> SymbolRef {
        Rc::new(RefCell::new(self))
    }
}

/// A shared symbol table scope.
pub type SymbolTableRef = Rc<RefCell<SymbolTable>>;

/// The per-query-scope registry of known names. Built by the parser, typed
/// against the catalog by the validator, consumed by the planner. A nested
/// scope holds a weak back reference to its parent for lookup fallback.
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<SymbolRef>,
    alias_count: u32,
    parent: Weak<RefCell<SymbolTable>>,
}

impl SymbolTable {
    /// Creates a new root symbol table.
    pub fn create() -> SymbolTableRef {
        Rc::new(RefCell::new(SymbolTable::default()))
    }

    /// Creates a new symbol table nested below the given parent.
    pub fn create_nested(parent: &SymbolTableRef) -> SymbolTableRef {
        Rc::new(RefCell::new(SymbolTable {
            parent: Rc::downgrade(parent),
            ..SymbolTable::default()
        }))
    }

    /// Returns the parent scope, if this is a nested scope and the parent is
    /// still alive.
    pub fn parent(&self) -> Option<SymbolTableRef> {
        self.parent.upgrade()
    }

    /// Returns all symbols of the scope, in registration order.
    pub fn symbols(&self) -> &[SymbolRef] {
        &self.symbols
    }

    /// Finds a symbol by name.
    pub fn find_symbol(&self, name: &str) -> Option<SymbolRef> {
        self.symbols
            .iter()
            .find(|symbol| symbol.borrow().name == name)
            .cloned()
    }

    /// Returns true if a symbol with the given name exists.
    pub fn has_symbol(&self, name: &str) -> bool {
        self.find_symbol(name).is_some()
    }

    /// Adds a symbol. Returns false if the name is already taken.
    pub fn add_symbol(&mut self, info: SymbolRef) -> bool {
        if self.has_symbol(&info.borrow().name) {
            return false;
        }
        self.symbols.push(info);
        true
    }

    /// Replaces the symbol named `to_replace` with the given info in place,
    /// keeping every shared reference to it valid; adds the symbol if there
    /// is nothing to replace.
    pub fn replace_symbol(&mut self, to_replace: &str, info: SymbolRef) {
        match self.find_symbol(to_replace) {
            Some(existing) => {
                let replacement = info.borrow().clone();
                *existing.borrow_mut() = replacement;
            }
            None => {
                self.add_symbol(info);
            }
        }
    }

    /// Returns the next generated alias name, `$alias_N`.
    pub fn next_alias(&mut self) -> String {
        let alias = format!("$alias_{}", self.alias_count);
        self.alias_count += 1;
        alias
    }

    /// Returns all table symbols of the scope.
    pub fn tables(&self) -> Vec<SymbolRef> {
        self.symbols_of_kind(SymbolKind::Table)
    }

    /// Returns all subquery symbols of the scope.
    pub fn subqueries(&self) -> Vec<SymbolRef> {
        self.symbols_of_kind(SymbolKind::Subquery)
    }

    fn symbols_of_kind(&self, kind: SymbolKind) -> Vec<SymbolRef> {
        self.symbols
            .iter()
            .filter(|symbol| symbol.borrow().kind == kind)
            .cloned()
            .collect()
    }

    /// Returns true if a table symbol matches the given name or alias.
    pub fn has_table_symbol(&self, table_or_alias: &str) -> bool {
        self.find_table_symbol(table_or_alias).is_some()
    }

    /// Finds a table symbol by name, identifier or alias.
    pub fn find_table_symbol(&self, table_or_alias: &str) -> Option<SymbolRef> {
        self.symbols
            .iter()
            .find(|symbol| {
                let symbol = symbol.borrow();
                symbol.kind == SymbolKind::Table
                    && (symbol.name == table_or_alias
                        || symbol.identifier == table_or_alias
                        || symbol.alias == table_or_alias)
            })
            .cloned()
    }

    /// Returns true if a plain symbol for `table.column` exists.
    pub fn has_symbol_for_table(&self, table: &str, column: &str) -> bool {
        self.find_symbol_for_table(table, column).is_some()
    }

    /// Finds the plain symbol of a column of the named table.
    pub fn find_symbol_for_table(&self, table: &str, column: &str) -> Option<SymbolRef> {
        self.symbols
            .iter()
            .find(|symbol| {
                let symbol = symbol.borrow();
                symbol.kind == SymbolKind::Plain
                    && symbol.relation == table
                    && symbol.identifier == column
            })
            .cloned()
    }

    /// Finds a symbol by its alias.
    pub fn find_aliased_symbol(&self, alias: &str) -> Option<SymbolRef> {
        self.symbols
            .iter()
            .find(|symbol| symbol.borrow().alias == alias)
            .cloned()
    }

    /// Returns all plain symbols that belong to the named table.
    pub fn find_all_symbols_for_table(&self, table: &str) -> Vec<SymbolRef> {
        self.symbols
            .iter()
            .filter(|symbol| {
                let symbol = symbol.borrow();
                symbol.kind == SymbolKind::Plain && symbol.relation == table
            })
            .cloned()
            .collect()
    }

    /// Types the scope against the catalog: subquery scopes are typed first,
    /// then every plain symbol is resolved to a table column, then calc
    /// symbols take the type of their expression.
    pub fn type_symbol_table(
        table: &SymbolTableRef,
        catalog: &dyn CatalogRef,
    ) -> Result<(), SemanticError> {
        // first resolve child symbol tables
        let subqueries = table.borrow().subqueries();
        for subquery in &subqueries {
            let child = subquery
                .borrow()
                .subquery
                .clone()
                .expect("subquery symbol carries a nested symbol table");
            Self::type_symbol_table(&child, catalog)?;
        }

        let tables = table.borrow().tables();
        Self::fill_with_table_data(table, catalog, &tables)?;

        let symbols: Vec<SymbolRef> = table.borrow().symbols.to_vec();
        for info in &symbols {
            let (is_untyped_plain, has_prefix, display_name) = {
                let info = info.borrow();
                (
                    info.kind == SymbolKind::Plain && info.qualified_identifier.is_empty(),
                    !info.prefix.is_empty(),
                    if info.prefix.is_empty() {
                        info.identifier.clone()
                    } else {
                        format!("{}.{}", info.prefix, info.identifier)
                    },
                )
            };
            if !is_untyped_plain {
                continue;
            }
            let resolved = if has_prefix {
                Self::fill_info_from_table_prefix(catalog, &tables, info)?
            } else {
                Self::fill_info_from_table(table, catalog, &tables, info)?
            };
            if !resolved && !Self::fill_info_from_subquery(&subqueries, info)? {
                return Err(SemanticError::UnknownSymbol(display_name));
            }
        }

        for info in &symbols {
            let expression = {
                let info = info.borrow();
                if info.kind == SymbolKind::Calc {
                    info.expression.clone()
                } else {
                    None
                }
            };
            if let Some(expression) = expression {
                let ty = expression.type_of()?;
                info.borrow_mut().ty = ty;
            }
        }
        Ok(())
    }

    /// Registers a plain `table.column` symbol for every column of every
    /// table in scope.
    fn fill_with_table_data(
        table: &SymbolTableRef,
        catalog: &dyn CatalogRef,
        tables: &[SymbolRef],
    ) -> Result<(), SemanticError> {
        for info in tables {
            let (table_name, identifier) = {
                let info = info.borrow();
                (info.name.clone(), info.identifier.clone())
            };
            let schema = catalog
                .table(&identifier)
                .ok_or_else(|| SemanticError::UnknownTable(identifier.clone()))?;
            for column in schema.columns() {
                let name = format!("{}.{}", table_name, column.name);
                if table.borrow().has_symbol(&name) {
                    continue;
                }
                let mut element = SymbolInfo::new(name.clone(), SymbolKind::Plain);
                element.identifier = column.name.clone();
                element.ty = column.ty;
                element.relation = table_name.clone();
                element.qualified_identifier = name;
                table.borrow_mut().add_symbol(element.into_ref());
            }
        }
        Ok(())
    }

    /// Resolves a prefixed identifier against the catalog; the prefix may be
    /// a table name or a table alias. Returns false if the prefix names
    /// neither, so that the subquery fallback can take over.
    fn fill_info_from_table_prefix(
        catalog: &dyn CatalogRef,
        tables: &[SymbolRef],
        info: &SymbolRef,
    ) -> Result<bool, SemanticError> {
        let (prefix, identifier) = {
            let info = info.borrow();
            (info.prefix.clone(), info.identifier.clone())
        };
        let mut table = prefix.clone();
        let mut relation = prefix.clone();
        if !catalog.has_table(&prefix) {
            // this could be some kind of alias, search for alias name of table
            table.clear();
            for table_info in tables {
                let table_info = table_info.borrow();
                if table_info.alias == prefix {
                    table = table_info.identifier.clone();
                    relation = table_info.name.clone();
                    break;
                }
            }
            if table.is_empty() {
                return Ok(false);
            }
        }
        let schema = catalog
            .table(&table)
            .ok_or_else(|| SemanticError::UnknownTable(table.clone()))?;
        let column = schema
            .column(&identifier)
            .ok_or_else(|| SemanticError::UnknownColumn(identifier.clone(), table.clone()))?;
        let mut info = info.borrow_mut();
        info.ty = column.ty;
        info.relation = relation;
        info.qualified_identifier = format!("{}.{}", prefix, column.name);
        Ok(true)
    }

    /// Resolves an unprefixed identifier by searching every table in scope.
    /// An identifier found in more than one table is ambiguous; one found in
    /// none may still be an alias of a calc symbol.
    fn fill_info_from_table(
        table: &SymbolTableRef,
        catalog: &dyn CatalogRef,
        tables: &[SymbolRef],
        info: &SymbolRef,
    ) -> Result<bool, SemanticError> {
        let identifier = info.borrow().identifier.clone();
        let mut found = false;
        for table_info in tables {
            let (table_identifier, table_name) = {
                let table_info = table_info.borrow();
                (table_info.identifier.clone(), table_info.name.clone())
            };
            let schema = catalog
                .table(&table_identifier)
                .ok_or_else(|| SemanticError::UnknownTable(table_identifier.clone()))?;
            let mut ident = identifier.clone();
            if !schema.has_column(&ident) {
                if let Some(aliased) = table.borrow().find_aliased_symbol(&ident) {
                    ident = aliased.borrow().identifier.clone();
                }
            }
            if let Some(column) = schema.column(&ident) {
                if found {
                    return Err(SemanticError::AmbiguousSymbol(identifier));
                }
                found = true;
                let mut info = info.borrow_mut();
                info.ty = column.ty;
                info.relation = table_name.clone();
                info.qualified_identifier = format!("{}.{}", table_name, column.name);
            }
        }
        if !found {
            // this could be a CALC field
            match table.borrow().find_aliased_symbol(&identifier) {
                Some(aliased) if aliased.borrow().kind == SymbolKind::Calc => {
                    info.borrow_mut().kind = SymbolKind::Calc;
                }
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Resolves an identifier against the output symbols of the subqueries
    /// in scope.
    fn fill_info_from_subquery(
        subqueries: &[SymbolRef],
        info: &SymbolRef,
    ) -> Result<bool, SemanticError> {
        let (name, identifier, prefix, alias) = {
            let info = info.borrow();
            (
                info.name.clone(),
                info.identifier.clone(),
                info.prefix.clone(),
                info.alias.clone(),
            )
        };
        let mut found = false;
        for query in subqueries {
            let (query_name, child) = {
                let query = query.borrow();
                (query.name.clone(), query.subquery.clone())
            };
            let child = match child {
                Some(child) => child,
                None => continue,
            };
            for symbol in child.borrow().symbols() {
                let symbol = symbol.borrow();
                let matches = symbol.name == name
                    || (!alias.is_empty() && identifier == symbol.identifier)
                    || (query_name == prefix && identifier == symbol.identifier)
                    || (prefix.is_empty() && identifier == symbol.identifier);
                if matches {
                    if found {
                        return Err(SemanticError::AmbiguousSymbol(identifier));
                    }
                    found = true;
                    let mut info = info.borrow_mut();
                    info.ty = symbol.ty;
                    info.qualified_identifier = info.name.clone();
                    break;
                }
            }
        }
        Ok(found)
    }

    /// Renders the symbol table (and nested subquery tables) for debugging.
    pub fn dump(&self, indent: usize) -> String {
        let pad = " ".repeat(indent);
        let mut out = format!("{}Dumping symbol table:\n", pad);
        for symbol in &self.symbols {
            let symbol = symbol.borrow();
            out.push_str(&format!(
                "{}{} symbol type: {} type: {} identifier: {} prefix: {} alias: {} relation: {} qualified: {}\n",
                pad,
                symbol.name,
                symbol.kind,
                symbol.ty,
                symbol.identifier,
                symbol.prefix,
                symbol.alias,
                symbol.relation,
                symbol.qualified_identifier,
            ));
            if symbol.kind == SymbolKind::Subquery {
                if let Some(subquery) = &symbol.subquery {
                    out.push_str(&subquery.borrow().dump(indent + 2));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, TableSchema};

    struct TestCatalog {
        tables: Vec<TableSchema>,
    }

    impl CatalogRef for TestCatalog {
        fn has_table(&self, name: &str) -> bool {
            self.tables.iter().any(|t| t.name == name)
        }

        fn table(&self, name: &str) -> Option<&TableSchema> {
            self.tables.iter().find(|t| t.name == name)
        }
    }

    fn employees_catalog() -> TestCatalog {
        TestCatalog {
            tables: vec![TableSchema {
                name: "EMPLOYEES".into(),
                columns: vec![
                    Column::new("ID", Type::Int),
                    Column::new("FIRST_NAME", Type::String),
                    Column::new("LAST_NAME", Type::String),
                ],
                constraints: vec![],
            }],
        }
    }

    fn table_scope() -> SymbolTableRef {
        let scope = SymbolTable::create();
        let mut table = SymbolInfo::new("EMP", SymbolKind::Table);
        table.identifier = "EMPLOYEES".into();
        table.alias = "EMP".into();
        scope.borrow_mut().add_symbol(table.into_ref());
        scope
    }

    #[test]
    fn alias_counter_is_monotonic() {
        let scope = SymbolTable::create();
        assert_eq!(scope.borrow_mut().next_alias(), "$alias_0");
        assert_eq!(scope.borrow_mut().next_alias(), "$alias_1");
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let scope = SymbolTable::create();
        assert!(scope
            .borrow_mut()
            .add_symbol(SymbolInfo::new("ID", SymbolKind::Plain).into_ref()));
        assert!(!scope
            .borrow_mut()
            .add_symbol(SymbolInfo::new("ID", SymbolKind::Plain).into_ref()));
    }

    #[test]
    fn typing_fills_columns_from_catalog() {
        let scope = table_scope();
        let mut ident = SymbolInfo::new("ID", SymbolKind::Plain);
        ident.identifier = "ID".into();
        let ident = ident.into_ref();
        scope.borrow_mut().add_symbol(ident.clone());

        SymbolTable::type_symbol_table(&scope, &employees_catalog()).unwrap();

        assert_eq!(ident.borrow().ty, Type::Int);
        assert_eq!(ident.borrow().qualified_identifier, "EMP.ID");
        // every column of the table became a plain symbol
        assert!(scope.borrow().has_symbol_for_table("EMP", "LAST_NAME"));
    }

    #[test]
    fn typing_resolves_alias_prefixes() {
        let scope = table_scope();
        let mut ident = SymbolInfo::new("EMP.ID", SymbolKind::Plain);
        ident.identifier = "ID".into();
        ident.prefix = "EMP".into();
        let ident = ident.into_ref();
        // the table symbol registered EMP.ID for us already, pick another name
        ident.borrow_mut().name = "X".into();
        scope.borrow_mut().add_symbol(ident.clone());

        SymbolTable::type_symbol_table(&scope, &employees_catalog()).unwrap();
        assert_eq!(ident.borrow().ty, Type::Int);
    }

    #[test]
    fn unknown_symbols_fail_typing() {
        let scope = table_scope();
        let mut ident = SymbolInfo::new("NOPE", SymbolKind::Plain);
        ident.identifier = "NOPE".into();
        scope.borrow_mut().add_symbol(ident.into_ref());

        let err = SymbolTable::type_symbol_table(&scope, &employees_catalog()).unwrap_err();
        assert_eq!(err, SemanticError::UnknownSymbol("NOPE".into()));
    }

    #[test]
    fn ambiguous_symbols_fail_typing() {
        let mut catalog = employees_catalog();
        catalog.tables.push(TableSchema {
            name: "SALARIES".into(),
            columns: vec![Column::new("ID", Type::Int)],
            constraints: vec![],
        });

        let scope = table_scope();
        let mut second = SymbolInfo::new("SAL", SymbolKind::Table);
        second.identifier = "SALARIES".into();
        scope.borrow_mut().add_symbol(second.into_ref());

        let mut ident = SymbolInfo::new("ID", SymbolKind::Plain);
        ident.identifier = "ID".into();
        scope.borrow_mut().add_symbol(ident.into_ref());

        let err = SymbolTable::type_symbol_table(&scope, &catalog).unwrap_err();
        assert_eq!(err, SemanticError::AmbiguousSymbol("ID".into()));
    }
}
