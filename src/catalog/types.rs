//! Catalog types — the structural schema state used for planning.
//!
//! A [`Catalog`] is a point-in-time picture of table/column/index/constraint
//! state, produced by an introspecting backend or built directly in tests.
//! Planning decisions read it; they never query the live database mid-plan.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::change::{ReferentialAction, TableSpec, TypeName};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    tables: HashMap<String, TableState>,
    /// Reverse lookup: index name → owning table key.
    index_to_table: HashMap<String, String>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_table(&self, name: &str) -> Option<&TableState> {
        self.tables.get(name)
    }

    pub fn get_table_mut(&mut self, name: &str) -> Option<&mut TableState> {
        self.tables.get_mut(name)
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn insert_table(&mut self, table: TableState) {
        for idx in &table.indexes {
            if !idx.name.is_empty() {
                self.index_to_table
                    .insert(idx.name.clone(), table.name.clone());
            }
        }
        self.tables.insert(table.name.clone(), table);
    }

    pub fn remove_table(&mut self, name: &str) -> Option<TableState> {
        let table = self.tables.remove(name)?;
        for idx in &table.indexes {
            self.index_to_table.remove(&idx.name);
        }
        Some(table)
    }

    /// Register an index in the reverse lookup.
    pub fn register_index(&mut self, index_name: &str, table_key: &str) {
        if !index_name.is_empty() {
            self.index_to_table
                .insert(index_name.to_string(), table_key.to_string());
        }
    }

    /// Remove an index from the reverse lookup.
    pub fn unregister_index(&mut self, index_name: &str) {
        self.index_to_table.remove(index_name);
    }

    /// Look up which table owns a given index. O(1).
    pub fn table_for_index(&self, index_name: &str) -> Option<&str> {
        self.index_to_table.get(index_name).map(|s| s.as_str())
    }

    /// Look up an index by name across all tables.
    pub fn get_index(&self, index_name: &str) -> Option<&IndexState> {
        let table_key = self.index_to_table.get(index_name)?;
        let table = self.tables.get(table_key)?;
        table.indexes.iter().find(|idx| idx.name == index_name)
    }

    pub fn has_index(&self, index_name: &str) -> bool {
        self.get_index(index_name).is_some()
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableState> {
        self.tables.values()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableState {
    pub name: String,
    pub columns: Vec<ColumnState>,
    pub indexes: Vec<IndexState>,
    pub constraints: Vec<ConstraintState>,
}

impl TableState {
    /// Build catalog state from a table definition, including the backing
    /// indexes PostgreSQL creates implicitly (`{table}_pkey` for the primary
    /// key, one unique index per UNIQUE constraint).
    pub fn from_spec(spec: &TableSpec) -> Self {
        let key = spec.name.key();
        let mut table = TableState {
            name: key,
            columns: spec
                .columns
                .iter()
                .map(|c| ColumnState {
                    name: c.name.clone(),
                    type_name: c.type_name.clone(),
                    nullable: c.nullable,
                    default: c.default.clone(),
                })
                .collect(),
            indexes: vec![],
            constraints: vec![],
        };

        if !spec.primary_key.is_empty() {
            table.constraints.push(ConstraintState::PrimaryKey {
                columns: spec.primary_key.clone(),
            });
            table.indexes.push(IndexState {
                name: format!("{}_pkey", spec.name.name),
                columns: spec.primary_key.clone(),
                unique: true,
                where_clause: None,
            });
        }

        for unique in &spec.uniques {
            table.constraints.push(ConstraintState::Unique {
                name: Some(unique.name.clone()),
                columns: unique.columns.clone(),
            });
            table.indexes.push(IndexState {
                name: unique.name.clone(),
                columns: unique.columns.clone(),
                unique: true,
                where_clause: None,
            });
        }

        for fk in &spec.foreign_keys {
            table.constraints.push(ConstraintState::ForeignKey {
                name: Some(fk.name.clone()),
                columns: fk.columns.clone(),
                ref_table: fk.ref_table.key(),
                ref_columns: fk.ref_columns.clone(),
                on_delete: fk.on_delete,
            });
        }

        table
    }

    pub fn get_column(&self, name: &str) -> Option<&ColumnState> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn get_column_mut(&mut self, name: &str) -> Option<&mut ColumnState> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.get_column(name).is_some()
    }

    /// Remove a column and everything that depends on it. PostgreSQL drops
    /// dependent indexes and multi-column constraints with the column, so
    /// the catalog mirrors that. Returns the names of removed indexes so the
    /// caller can update the reverse lookup.
    pub fn remove_column(&mut self, name: &str) -> Vec<String> {
        self.columns.retain(|c| c.name != name);

        let removed_indexes: Vec<String> = self
            .indexes
            .iter()
            .filter(|idx| idx.columns.iter().any(|c| c == name))
            .map(|idx| idx.name.clone())
            .collect();
        self.indexes
            .retain(|idx| !idx.columns.iter().any(|c| c == name));

        self.constraints.retain(|c| match c {
            ConstraintState::PrimaryKey { columns }
            | ConstraintState::ForeignKey { columns, .. }
            | ConstraintState::Unique { columns, .. } => !columns.iter().any(|c| c == name),
        });

        removed_indexes
    }

    pub fn get_foreign_key(&self, fk_name: &str) -> Option<&ConstraintState> {
        self.constraints.iter().find(
            |c| matches!(c, ConstraintState::ForeignKey { name: Some(n), .. } if n == fk_name),
        )
    }

    pub fn has_foreign_key(&self, fk_name: &str) -> bool {
        self.get_foreign_key(fk_name).is_some()
    }

    /// All column sets that must stay unique: the primary key plus every
    /// UNIQUE constraint. Used by the in-memory backend to enforce
    /// uniqueness on inserts.
    pub fn unique_column_sets(&self) -> Vec<&[String]> {
        self.constraints
            .iter()
            .filter_map(|c| match c {
                ConstraintState::PrimaryKey { columns } => Some(columns.as_slice()),
                ConstraintState::Unique { columns, .. } => Some(columns.as_slice()),
                ConstraintState::ForeignKey { .. } => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnState {
    pub name: String,
    pub type_name: TypeName,
    pub nullable: bool,
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexState {
    pub name: String,
    /// Column names in definition order.
    pub columns: Vec<String>,
    pub unique: bool,
    /// WHERE clause for partial indexes.
    pub where_clause: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstraintState {
    PrimaryKey {
        columns: Vec<String>,
    },
    ForeignKey {
        name: Option<String>,
        columns: Vec<String>,
        ref_table: String,
        ref_columns: Vec<String>,
        on_delete: ReferentialAction,
    },
    Unique {
        name: Option<String>,
        columns: Vec<String>,
    },
}
