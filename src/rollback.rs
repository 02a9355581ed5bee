//! Rollback planning — derives the inverse descriptor list for a migration.
//!
//! Symmetric operations invert mechanically (AddColumn ↔ DropColumn,
//! CreateTable ↔ DropTable, CreateIndex ↔ DropIndex). Destructive
//! operations invert only through the prior shape captured at authoring
//! time: the dropped object no longer exists in the catalog when the Down
//! runs, so its original definition cannot be introspected — and guessing
//! would silently reconstruct the wrong shape.
//!
//! Type and nullability alterations invert through their own guards: the
//! expected-state precondition on the Up descriptor is exactly the target
//! state of the Down descriptor, and vice versa.

use thiserror::Error;

use crate::change::{ChangeDescriptor, ChangeKind, ChangeOp, Migration, Precondition};

#[derive(Debug, Error)]
pub enum InvertError {
    /// A destructive change has no captured prior shape.
    #[error("change `{change_id}` ({kind}) has no captured prior shape; cannot derive a rollback")]
    MissingPriorShape { change_id: String, kind: ChangeKind },

    /// A type/nullability alteration has no expected-state guard to swap.
    #[error("change `{change_id}` ({kind}) has no expected-state guard; cannot derive a rollback")]
    MissingGuard { change_id: String, kind: ChangeKind },

    /// An `InsertRow` whose row values do not contain its own key column.
    #[error("change `{change_id}` inserts a row with no value for key column `{key_column}`")]
    KeyValueMissing {
        change_id: String,
        key_column: String,
    },
}

/// Derive the Down descriptor list for a migration: each change inverted,
/// in reverse order. Seed rows are not inverted here — the runner
/// reconciles them in the Down direction separately.
pub fn invert(migration: &Migration) -> Result<Vec<ChangeDescriptor>, InvertError> {
    migration
        .changes
        .iter()
        .rev()
        .map(invert_change)
        .collect()
}

fn invert_change(descriptor: &ChangeDescriptor) -> Result<ChangeDescriptor, InvertError> {
    let kind = descriptor.op.kind();
    let missing_prior = || InvertError::MissingPriorShape {
        change_id: descriptor.id.clone(),
        kind,
    };

    let mut inverted = match &descriptor.op {
        ChangeOp::CreateTable { spec } => {
            ChangeDescriptor::drop_table(spec.name.clone(), spec.clone())
        }
        ChangeOp::DropTable { prior, .. } => {
            let spec = prior.clone().ok_or_else(missing_prior)?;
            ChangeDescriptor::create_table(spec)
        }
        ChangeOp::AddColumn { table, column } => {
            ChangeDescriptor::drop_column(table.clone(), column.clone())
        }
        ChangeOp::DropColumn { table, prior, .. } => {
            let column = prior.clone().ok_or_else(missing_prior)?;
            ChangeDescriptor::add_column(table.clone(), column)
        }
        ChangeOp::AlterColumnType {
            table,
            column,
            new_type,
            ..
        } => {
            let Some(Precondition::ColumnHasType {
                type_name: old_type,
                ..
            }) = &descriptor.precondition
            else {
                return Err(InvertError::MissingGuard {
                    change_id: descriptor.id.clone(),
                    kind,
                });
            };
            // Swap source and target; the Down guard expects the Up target.
            ChangeDescriptor::alter_column_type(
                table.clone(),
                column.clone(),
                new_type.clone(),
                old_type.clone(),
            )
        }
        ChangeOp::AlterColumnNullability {
            table,
            column,
            nullable,
        } => {
            let Some(Precondition::ColumnNullability {
                nullable: old_nullable,
                ..
            }) = &descriptor.precondition
            else {
                return Err(InvertError::MissingGuard {
                    change_id: descriptor.id.clone(),
                    kind,
                });
            };
            ChangeDescriptor::alter_column_nullability(
                table.clone(),
                column.clone(),
                *nullable,
                *old_nullable,
            )
        }
        ChangeOp::CreateIndex { spec } => ChangeDescriptor::drop_index(spec.clone()),
        ChangeOp::DropIndex { prior, .. } => {
            let spec = prior.clone().ok_or_else(missing_prior)?;
            ChangeDescriptor::create_index(spec)
        }
        ChangeOp::AddForeignKey { table, spec } => {
            ChangeDescriptor::drop_foreign_key(table.clone(), spec.clone())
        }
        ChangeOp::DropForeignKey { table, prior, .. } => {
            let spec = prior.clone().ok_or_else(missing_prior)?;
            ChangeDescriptor::add_foreign_key(table.clone(), spec)
        }
        ChangeOp::InsertRow {
            table,
            key_column,
            row,
        } => {
            let key = row
                .get(key_column)
                .cloned()
                .ok_or_else(|| InvertError::KeyValueMissing {
                    change_id: descriptor.id.clone(),
                    key_column: key_column.clone(),
                })?;
            ChangeDescriptor::delete_row(table.clone(), key_column.clone(), key, Some(row.clone()))
        }
        ChangeOp::DeleteRow {
            table,
            key_column,
            prior,
            ..
        } => {
            let row = prior.clone().ok_or_else(missing_prior)?;
            ChangeDescriptor::insert_row(table.clone(), key_column.clone(), row)
        }
    };

    inverted.id = format!("{}~down", descriptor.id);
    Ok(inverted)
}
