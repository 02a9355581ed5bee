//! Snapshot simulation — applies a planned operation to catalog state.
//!
//! The planner threads a snapshot through a migration's descriptors: each
//! operation it decides to apply is also simulated here, so later
//! descriptors plan against the intermediate state (an index on a table
//! created two steps earlier must see that table). The same mutation logic
//! backs verification replays.
//!
//! Operations whose target is missing are silently ignored — the planner
//! only simulates operations it has already found applicable, and the
//! simulator mirrors state transitions, it does not enforce them.

use crate::catalog::types::{ColumnState, ConstraintState, IndexState, TableState};
use crate::catalog::Snapshot;
use crate::change::ChangeOp;

/// Apply a single planned operation to the snapshot.
pub fn apply(snapshot: &mut Snapshot, op: &ChangeOp) {
    match op {
        ChangeOp::CreateTable { spec } => {
            snapshot.catalog.insert_table(TableState::from_spec(spec));
        }
        ChangeOp::DropTable { table, .. } => {
            snapshot.catalog.remove_table(&table.key());
        }
        ChangeOp::AddColumn { table, column } => {
            if let Some(t) = snapshot.catalog.get_table_mut(&table.key()) {
                t.columns.push(ColumnState {
                    name: column.name.clone(),
                    type_name: column.type_name.clone(),
                    nullable: column.nullable,
                    default: column.default.clone(),
                });
            }
        }
        ChangeOp::DropColumn { table, column, .. } => {
            let key = table.key();
            let removed = snapshot
                .catalog
                .get_table_mut(&key)
                .map(|t| t.remove_column(column))
                .unwrap_or_default();
            for idx in removed {
                snapshot.catalog.unregister_index(&idx);
            }
        }
        ChangeOp::AlterColumnType {
            table,
            column,
            new_type,
            ..
        } => {
            if let Some(t) = snapshot.catalog.get_table_mut(&table.key())
                && let Some(col) = t.get_column_mut(column)
            {
                col.type_name = new_type.clone();
            }
        }
        ChangeOp::AlterColumnNullability {
            table,
            column,
            nullable,
        } => {
            if let Some(t) = snapshot.catalog.get_table_mut(&table.key())
                && let Some(col) = t.get_column_mut(column)
            {
                col.nullable = *nullable;
            }
        }
        ChangeOp::CreateIndex { spec } => {
            let table_key = spec.table.key();
            if let Some(t) = snapshot.catalog.get_table_mut(&table_key) {
                t.indexes.push(IndexState {
                    name: spec.name.clone(),
                    columns: spec.columns.clone(),
                    unique: spec.unique,
                    where_clause: spec.where_clause.clone(),
                });
                snapshot.catalog.register_index(&spec.name, &table_key);
            }
        }
        ChangeOp::DropIndex { name, .. } => {
            if let Some(table_key) = snapshot.catalog.table_for_index(name).map(str::to_string) {
                snapshot.catalog.unregister_index(name);
                if let Some(t) = snapshot.catalog.get_table_mut(&table_key) {
                    t.indexes.retain(|idx| idx.name != *name);
                }
            }
        }
        ChangeOp::AddForeignKey { table, spec } => {
            if let Some(t) = snapshot.catalog.get_table_mut(&table.key()) {
                t.constraints.push(ConstraintState::ForeignKey {
                    name: Some(spec.name.clone()),
                    columns: spec.columns.clone(),
                    ref_table: spec.ref_table.key(),
                    ref_columns: spec.ref_columns.clone(),
                    on_delete: spec.on_delete,
                });
            }
        }
        ChangeOp::DropForeignKey { table, name, .. } => {
            if let Some(t) = snapshot.catalog.get_table_mut(&table.key()) {
                t.constraints.retain(|c| {
                    !matches!(c, ConstraintState::ForeignKey { name: Some(n), .. } if n == name)
                });
            }
        }
        ChangeOp::InsertRow {
            table,
            key_column,
            row,
        } => {
            if let Some(key) = row.get(key_column) {
                snapshot.simulate_row(table, key_column, key, true);
            }
        }
        ChangeOp::DeleteRow {
            table,
            key_column,
            key,
            ..
        } => {
            snapshot.simulate_row(table, key_column, key, false);
        }
    }
}
