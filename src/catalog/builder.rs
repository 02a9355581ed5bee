//! Test harness for building catalog state.
//!
//! A fluent API for constructing catalog state in tests, mirroring the shape
//! a backend's introspection would return.
//!
//! # Example
//!
//! ```rust
//! use pg_migration_run::catalog::builder::CatalogBuilder;
//!
//! let catalog = CatalogBuilder::new()
//!     .table("patients", |t| {
//!         t.column("id", "uuid", false)
//!          .column("document", "varchar(50)", false)
//!          .pk(&["id"]);
//!     })
//!     .build();
//! ```

use crate::catalog::types::{Catalog, ColumnState, ConstraintState, IndexState, TableState};
use crate::change::{ReferentialAction, TypeName};

/// Builder for constructing a [`Catalog`] in tests.
pub struct CatalogBuilder {
    catalog: Catalog,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self {
            catalog: Catalog::new(),
        }
    }

    /// Add a table to the catalog. The closure receives a [`TableBuilder`]
    /// to configure columns, indexes, and constraints.
    pub fn table(mut self, name: &str, f: impl FnOnce(&mut TableBuilder)) -> Self {
        let mut builder = TableBuilder::new(name);
        f(&mut builder);
        self.catalog.insert_table(builder.build());
        self
    }

    pub fn build(self) -> Catalog {
        self.catalog
    }
}

impl Default for CatalogBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for constructing a [`TableState`] in tests.
pub struct TableBuilder {
    state: TableState,
}

impl TableBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            state: TableState {
                name: name.to_string(),
                columns: vec![],
                indexes: vec![],
                constraints: vec![],
            },
        }
    }

    /// Add a column. The type accepts modifier syntax: `"varchar(50)"`
    /// becomes name `varchar` with modifiers `[50]`.
    pub fn column(&mut self, name: &str, type_name: &str, nullable: bool) -> &mut Self {
        self.state.columns.push(ColumnState {
            name: name.to_string(),
            type_name: parse_type(type_name),
            nullable,
            default: None,
        });
        self
    }

    /// Add a column with a default SQL expression.
    pub fn column_with_default(
        &mut self,
        name: &str,
        type_name: &str,
        nullable: bool,
        default: &str,
    ) -> &mut Self {
        self.state.columns.push(ColumnState {
            name: name.to_string(),
            type_name: parse_type(type_name),
            nullable,
            default: Some(default.to_string()),
        });
        self
    }

    /// Add an index.
    pub fn index(&mut self, name: &str, columns: &[&str], unique: bool) -> &mut Self {
        self.state.indexes.push(IndexState {
            name: name.to_string(),
            columns: columns.iter().map(|s| s.to_string()).collect(),
            unique,
            where_clause: None,
        });
        self
    }

    /// Add a partial index with a WHERE clause.
    pub fn partial_index(&mut self, name: &str, columns: &[&str], where_clause: &str) -> &mut Self {
        self.state.indexes.push(IndexState {
            name: name.to_string(),
            columns: columns.iter().map(|s| s.to_string()).collect(),
            unique: false,
            where_clause: Some(where_clause.to_string()),
        });
        self
    }

    /// Add a primary key constraint (and its backing index).
    pub fn pk(&mut self, columns: &[&str]) -> &mut Self {
        self.state.constraints.push(ConstraintState::PrimaryKey {
            columns: columns.iter().map(|s| s.to_string()).collect(),
        });
        self.state.indexes.push(IndexState {
            name: format!("{}_pkey", self.state.name),
            columns: columns.iter().map(|s| s.to_string()).collect(),
            unique: true,
            where_clause: None,
        });
        self
    }

    /// Add a foreign key constraint.
    pub fn fk(
        &mut self,
        name: &str,
        columns: &[&str],
        ref_table: &str,
        ref_columns: &[&str],
    ) -> &mut Self {
        self.state.constraints.push(ConstraintState::ForeignKey {
            name: Some(name.to_string()),
            columns: columns.iter().map(|s| s.to_string()).collect(),
            ref_table: ref_table.to_string(),
            ref_columns: ref_columns.iter().map(|s| s.to_string()).collect(),
            on_delete: ReferentialAction::NoAction,
        });
        self
    }

    /// Add a unique constraint (and its backing index).
    pub fn unique(&mut self, name: &str, columns: &[&str]) -> &mut Self {
        self.state.constraints.push(ConstraintState::Unique {
            name: Some(name.to_string()),
            columns: columns.iter().map(|s| s.to_string()).collect(),
        });
        self.state.indexes.push(IndexState {
            name: name.to_string(),
            columns: columns.iter().map(|s| s.to_string()).collect(),
            unique: true,
            where_clause: None,
        });
        self
    }

    pub fn build(self) -> TableState {
        self.state
    }
}

/// Parse `"varchar(50)"` / `"numeric(10,2)"` / `"timestamp"` into a
/// [`TypeName`]. Unparseable modifier lists are treated as part of the name.
fn parse_type(s: &str) -> TypeName {
    if let Some(open) = s.find('(')
        && let Some(close) = s.rfind(')')
        && close > open
    {
        let mods: Result<Vec<i64>, _> = s[open + 1..close]
            .split(',')
            .map(|m| m.trim().parse::<i64>())
            .collect();
        if let Ok(modifiers) = mods {
            return TypeName::with_modifiers(s[..open].trim(), modifiers);
        }
    }
    TypeName::simple(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_builder_basic() {
        let catalog = CatalogBuilder::new()
            .table("patients", |t| {
                t.column("id", "uuid", false).pk(&["id"]);
            })
            .build();

        assert!(catalog.has_table("patients"));
        let table = catalog.get_table("patients").unwrap();
        assert_eq!(table.columns.len(), 1);
        assert!(catalog.has_index("patients_pkey"));
    }

    #[test]
    fn test_parse_type_with_modifiers() {
        let t = parse_type("varchar(50)");
        assert_eq!(t.name, "varchar");
        assert_eq!(t.modifiers, vec![50]);

        let t = parse_type("numeric(10, 2)");
        assert_eq!(t.modifiers, vec![10, 2]);

        let t = parse_type("timestamp without time zone");
        assert_eq!(t.name, "timestamp without time zone");
        assert!(t.modifiers.is_empty());
    }

    #[test]
    fn test_builder_registers_indexes_in_catalog() {
        let catalog = CatalogBuilder::new()
            .table("audit_logs", |t| {
                t.column("tenant_id", "varchar(100)", false)
                    .column("severity", "varchar(20)", false)
                    .partial_index(
                        "ix_audit_logs_tenant_severity_ts",
                        &["tenant_id", "severity"],
                        "severity IN ('WARNING','ERROR','CRITICAL')",
                    );
            })
            .build();

        let idx = catalog.get_index("ix_audit_logs_tenant_severity_ts").unwrap();
        assert!(idx.where_clause.is_some());
        assert_eq!(
            catalog.table_for_index("ix_audit_logs_tenant_severity_ts"),
            Some("audit_logs")
        );
    }
}
