//! In-memory backend — a faithful stand-in for a live database.
//!
//! Holds catalog state, table rows, and the ledger in plain data
//! structures. Mutations run against a clone of the state and commit only
//! on full success, giving the same all-or-nothing semantics a transaction
//! provides. Unlike the planner's simulator, execution here is strict: a
//! step whose target is missing, or that violates a unique constraint, is
//! an error — exactly the failures a live server would raise.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::catalog::{Catalog, ColumnState, IndexState, Snapshot, TableState};
use crate::change::{ChangeOp, RowValues};
use crate::db::{Database, DbError};
use crate::ledger::MigrationRecord;
use crate::planner::PlannedStep;

#[derive(Debug, Clone, Default)]
struct State {
    catalog: Catalog,
    rows: HashMap<String, Vec<RowValues>>,
    ledger: Vec<MigrationRecord>,
}

/// An in-memory database with transactional apply semantics.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    state: State,
    locked: bool,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing schema state (the "legacy database" of a test).
    pub fn with_catalog(catalog: Catalog) -> Self {
        Self {
            state: State {
                catalog,
                rows: HashMap::new(),
                ledger: Vec::new(),
            },
            locked: false,
        }
    }

    /// Current catalog state, for assertions.
    pub fn catalog(&self) -> &Catalog {
        &self.state.catalog
    }

    /// Mutable catalog access, for simulating out-of-band schema changes
    /// in tests.
    pub fn catalog_mut(&mut self) -> &mut Catalog {
        &mut self.state.catalog
    }

    /// Rows of a table, for assertions. Empty when the table has none.
    pub fn rows(&self, table: &str) -> &[RowValues] {
        self.state
            .rows
            .get(table)
            .map(|r| r.as_slice())
            .unwrap_or(&[])
    }

    /// Pre-populate rows, bypassing constraint checks (fixture setup).
    pub fn seed_rows(&mut self, table: &str, rows: Vec<RowValues>) {
        self.state.rows.entry(table.to_string()).or_default().extend(rows);
    }

    /// Applied-migration records, for assertions.
    pub fn records(&self) -> &[MigrationRecord] {
        &self.state.ledger
    }

    fn exec(state: &mut State, step: &PlannedStep) -> Result<(), DbError> {
        let fail = |detail: String| DbError::ChangeFailed {
            change_id: step.change_id.clone(),
            detail,
        };

        match &step.op {
            ChangeOp::CreateTable { spec } => {
                let key = spec.name.key();
                if state.catalog.has_table(&key) {
                    return Err(fail(format!("relation \"{key}\" already exists")));
                }
                for fk in &spec.foreign_keys {
                    let ref_key = fk.ref_table.key();
                    if ref_key != key && !state.catalog.has_table(&ref_key) {
                        return Err(fail(format!("relation \"{ref_key}\" does not exist")));
                    }
                }
                state.catalog.insert_table(TableState::from_spec(spec));
                state.rows.entry(key).or_default();
            }
            ChangeOp::DropTable { table, .. } => {
                let key = table.key();
                if state.catalog.remove_table(&key).is_none() {
                    return Err(fail(format!("relation \"{key}\" does not exist")));
                }
                state.rows.remove(&key);
            }
            ChangeOp::AddColumn { table, column } => {
                let key = table.key();
                let has_rows = state.rows.get(&key).map(|r| !r.is_empty()).unwrap_or(false);
                let t = state
                    .catalog
                    .get_table_mut(&key)
                    .ok_or_else(|| fail(format!("relation \"{key}\" does not exist")))?;
                if t.has_column(&column.name) {
                    return Err(fail(format!(
                        "column \"{}\" of relation \"{key}\" already exists",
                        column.name
                    )));
                }
                if !column.nullable && column.default.is_none() && has_rows {
                    return Err(fail(format!(
                        "column \"{}\" of relation \"{key}\" contains null values",
                        column.name
                    )));
                }
                t.columns.push(ColumnState {
                    name: column.name.clone(),
                    type_name: column.type_name.clone(),
                    nullable: column.nullable,
                    default: column.default.clone(),
                });
            }
            ChangeOp::DropColumn { table, column, .. } => {
                let key = table.key();
                let t = state
                    .catalog
                    .get_table_mut(&key)
                    .ok_or_else(|| fail(format!("relation \"{key}\" does not exist")))?;
                if !t.has_column(column) {
                    return Err(fail(format!(
                        "column \"{column}\" of relation \"{key}\" does not exist"
                    )));
                }
                let removed = t.remove_column(column);
                for idx in removed {
                    state.catalog.unregister_index(&idx);
                }
                if let Some(rows) = state.rows.get_mut(&key) {
                    for row in rows {
                        row.remove(column);
                    }
                }
            }
            ChangeOp::AlterColumnType {
                table,
                column,
                new_type,
                ..
            } => {
                let key = table.key();
                let col = state
                    .catalog
                    .get_table_mut(&key)
                    .ok_or_else(|| fail(format!("relation \"{key}\" does not exist")))?
                    .get_column_mut(column)
                    .ok_or_else(|| {
                        fail(format!(
                            "column \"{column}\" of relation \"{key}\" does not exist"
                        ))
                    })?;
                col.type_name = new_type.clone();
            }
            ChangeOp::AlterColumnNullability {
                table,
                column,
                nullable,
            } => {
                let key = table.key();
                if !*nullable
                    && let Some(rows) = state.rows.get(&key)
                    && rows.iter().any(|r| r.get(column) == Some(&Value::Null))
                {
                    return Err(fail(format!(
                        "column \"{column}\" of relation \"{key}\" contains null values"
                    )));
                }
                let col = state
                    .catalog
                    .get_table_mut(&key)
                    .ok_or_else(|| fail(format!("relation \"{key}\" does not exist")))?
                    .get_column_mut(column)
                    .ok_or_else(|| {
                        fail(format!(
                            "column \"{column}\" of relation \"{key}\" does not exist"
                        ))
                    })?;
                col.nullable = *nullable;
            }
            ChangeOp::CreateIndex { spec } => {
                let key = spec.table.key();
                if state.catalog.has_index(&spec.name) {
                    return Err(fail(format!("relation \"{}\" already exists", spec.name)));
                }
                let t = state
                    .catalog
                    .get_table_mut(&key)
                    .ok_or_else(|| fail(format!("relation \"{key}\" does not exist")))?;
                for column in &spec.columns {
                    if !t.has_column(column) {
                        return Err(fail(format!(
                            "column \"{column}\" of relation \"{key}\" does not exist"
                        )));
                    }
                }
                t.indexes.push(IndexState {
                    name: spec.name.clone(),
                    columns: spec.columns.clone(),
                    unique: spec.unique,
                    where_clause: spec.where_clause.clone(),
                });
                state.catalog.register_index(&spec.name, &key);
            }
            ChangeOp::DropIndex { name, .. } => {
                let Some(key) = state.catalog.table_for_index(name).map(str::to_string) else {
                    return Err(fail(format!("index \"{name}\" does not exist")));
                };
                state.catalog.unregister_index(name);
                if let Some(t) = state.catalog.get_table_mut(&key) {
                    t.indexes.retain(|idx| idx.name != *name);
                }
            }
            ChangeOp::AddForeignKey { table, spec } => {
                let key = table.key();
                let ref_key = spec.ref_table.key();
                if !state.catalog.has_table(&ref_key) {
                    return Err(fail(format!("relation \"{ref_key}\" does not exist")));
                }
                let t = state
                    .catalog
                    .get_table_mut(&key)
                    .ok_or_else(|| fail(format!("relation \"{key}\" does not exist")))?;
                if t.has_foreign_key(&spec.name) {
                    return Err(fail(format!(
                        "constraint \"{}\" for relation \"{key}\" already exists",
                        spec.name
                    )));
                }
                t.constraints.push(crate::catalog::ConstraintState::ForeignKey {
                    name: Some(spec.name.clone()),
                    columns: spec.columns.clone(),
                    ref_table: ref_key,
                    ref_columns: spec.ref_columns.clone(),
                    on_delete: spec.on_delete,
                });
            }
            ChangeOp::DropForeignKey { table, name, .. } => {
                let key = table.key();
                let t = state
                    .catalog
                    .get_table_mut(&key)
                    .ok_or_else(|| fail(format!("relation \"{key}\" does not exist")))?;
                if !t.has_foreign_key(name) {
                    return Err(fail(format!(
                        "constraint \"{name}\" of relation \"{key}\" does not exist"
                    )));
                }
                t.constraints.retain(|c| {
                    !matches!(
                        c,
                        crate::catalog::ConstraintState::ForeignKey { name: Some(n), .. } if n == name
                    )
                });
            }
            ChangeOp::InsertRow { table, row, .. } => {
                let key = table.key();
                let t = state
                    .catalog
                    .get_table(&key)
                    .ok_or_else(|| fail(format!("relation \"{key}\" does not exist")))?;

                // NOT NULL columns without a default must be present and
                // non-null in the inserted row.
                for column in &t.columns {
                    if !column.nullable && column.default.is_none() {
                        match row.get(&column.name) {
                            None | Some(Value::Null) => {
                                return Err(fail(format!(
                                    "null value in column \"{}\" of relation \"{key}\" \
                                     violates not-null constraint",
                                    column.name
                                )));
                            }
                            Some(_) => {}
                        }
                    }
                }

                // Enforce the primary key and every UNIQUE constraint.
                let unique_sets: Vec<Vec<String>> = t
                    .unique_column_sets()
                    .into_iter()
                    .map(|s| s.to_vec())
                    .collect();
                let existing = state.rows.entry(key.clone()).or_default();
                for set in &unique_sets {
                    let candidate: Vec<Option<&Value>> =
                        set.iter().map(|c| row.get(c)).collect();
                    if candidate.iter().any(|v| v.is_none()) {
                        continue;
                    }
                    if existing.iter().any(|r| {
                        set.iter()
                            .zip(&candidate)
                            .all(|(c, v)| r.get(c) == *v)
                    }) {
                        return Err(fail(format!(
                            "duplicate key value violates unique constraint on ({})",
                            set.join(", ")
                        )));
                    }
                }
                existing.push(row.clone());
            }
            ChangeOp::DeleteRow {
                table,
                key_column,
                key,
                ..
            } => {
                let table_key = table.key();
                if !state.catalog.has_table(&table_key) {
                    return Err(fail(format!("relation \"{table_key}\" does not exist")));
                }
                if let Some(rows) = state.rows.get_mut(&table_key) {
                    rows.retain(|r| r.get(key_column) != Some(key));
                }
            }
        }
        Ok(())
    }

    fn record(state: &mut State, migration_id: &str, checksum: &str) -> Result<(), DbError> {
        if state.ledger.iter().any(|r| r.migration_id == migration_id) {
            return Err(DbError::Ledger(format!(
                "migration `{migration_id}` is already recorded"
            )));
        }
        state.ledger.push(MigrationRecord {
            migration_id: migration_id.to_string(),
            applied_at: Utc::now(),
            checksum: checksum.to_string(),
        });
        Ok(())
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn acquire_lock(&mut self) -> Result<(), DbError> {
        if self.locked {
            return Err(DbError::Lock("lock already held".to_string()));
        }
        self.locked = true;
        Ok(())
    }

    async fn release_lock(&mut self) -> Result<(), DbError> {
        self.locked = false;
        Ok(())
    }

    async fn ledger(&mut self) -> Result<Vec<MigrationRecord>, DbError> {
        let mut records = self.state.ledger.clone();
        records.sort_by(|a, b| a.migration_id.cmp(&b.migration_id));
        Ok(records)
    }

    async fn snapshot(&mut self, probes: &[crate::catalog::RowProbe]) -> Result<Snapshot, DbError> {
        let mut snapshot = Snapshot::new(self.state.catalog.clone());
        for probe in probes {
            let present = self
                .state
                .rows
                .get(&probe.table.key())
                .map(|rows| {
                    rows.iter()
                        .any(|r| r.get(&probe.key_column) == Some(&probe.key))
                })
                .unwrap_or(false);
            snapshot.set_row_presence(probe, present);
        }
        Ok(snapshot)
    }

    async fn apply(
        &mut self,
        migration_id: &str,
        checksum: &str,
        steps: &[PlannedStep],
    ) -> Result<(), DbError> {
        // Run against a clone; commit only when every step succeeded.
        let mut working = self.state.clone();
        for step in steps {
            Self::exec(&mut working, step)?;
        }
        Self::record(&mut working, migration_id, checksum)?;
        self.state = working;
        Ok(())
    }

    async fn apply_unchained(
        &mut self,
        migration_id: &str,
        checksum: &str,
        steps: &[PlannedStep],
    ) -> Result<(), DbError> {
        for step in steps {
            Self::exec(&mut self.state, step)?;
        }
        Self::record(&mut self.state, migration_id, checksum)
    }

    async fn revert(&mut self, migration_id: &str, steps: &[PlannedStep]) -> Result<(), DbError> {
        let mut working = self.state.clone();
        for step in steps {
            Self::exec(&mut working, step)?;
        }
        let before = working.ledger.len();
        working.ledger.retain(|r| r.migration_id != migration_id);
        if working.ledger.len() == before {
            return Err(DbError::Ledger(format!(
                "migration `{migration_id}` is not recorded"
            )));
        }
        self.state = working;
        Ok(())
    }
}
