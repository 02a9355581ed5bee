//! Seed-data reconciliation — fixed reference rows with stable keys.
//!
//! Seed rows carry caller-assigned UUID keys so reapplication is idempotent
//! by key equality, never by insertion order. System-owned rows are never
//! updated in place: the Up direction compiles to delete-by-key followed by
//! insert, so revised seed content replaces the old row wholesale.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::change::{ChangeDescriptor, QualifiedName, RowValues};

/// Direction of a reconciliation (or migration) run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// A static reference row shipped with a migration, keyed by a fixed UUID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedRow {
    pub table: QualifiedName,
    pub key_column: String,
    pub key: Uuid,
    /// Non-key column values. The key column is added automatically.
    pub values: RowValues,
}

impl SeedRow {
    pub fn new(
        table: impl Into<QualifiedName>,
        key_column: impl Into<String>,
        key: Uuid,
        values: RowValues,
    ) -> Self {
        Self {
            table: table.into(),
            key_column: key_column.into(),
            key,
            values,
        }
    }

    fn key_value(&self) -> Value {
        Value::String(self.key.to_string())
    }

    /// The full row including the key column.
    fn full_row(&self) -> RowValues {
        let mut row = self.values.clone();
        row.insert(self.key_column.clone(), self.key_value());
        row
    }
}

/// Compile seed rows into guarded change descriptors for the given
/// direction.
///
/// Up: delete-by-key then insert, both guarded by planner key-existence
/// checks — an insert must never be left to fail on a primary-key conflict,
/// since that would abort the whole migration transaction. Down: delete by
/// the same fixed keys, removing exactly the rows this migration owns.
pub fn reconcile(migration_id: &str, seeds: &[SeedRow], direction: Direction) -> Vec<ChangeDescriptor> {
    let mut changes = Vec::new();
    for seed in seeds {
        match direction {
            Direction::Up => {
                let mut delete = ChangeDescriptor::delete_row(
                    seed.table.clone(),
                    seed.key_column.clone(),
                    seed.key_value(),
                    Some(seed.full_row()),
                );
                delete.id = format!("{}/seed/{}/{}/del", migration_id, seed.table.key(), seed.key);
                changes.push(delete);

                let mut insert = ChangeDescriptor::insert_row(
                    seed.table.clone(),
                    seed.key_column.clone(),
                    seed.full_row(),
                );
                insert.id = format!("{}/seed/{}/{}/ins", migration_id, seed.table.key(), seed.key);
                changes.push(insert);
            }
            Direction::Down => {
                let mut delete = ChangeDescriptor::delete_row(
                    seed.table.clone(),
                    seed.key_column.clone(),
                    seed.key_value(),
                    Some(seed.full_row()),
                );
                delete.id = format!("{}/seed/{}/{}/del", migration_id, seed.table.key(), seed.key);
                changes.push(delete);
            }
        }
    }
    changes
}
