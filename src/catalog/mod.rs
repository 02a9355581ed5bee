//! Schema snapshots: structural catalog state plus probed row presence.
//!
//! Backends introspect live state into a [`Snapshot`] once, before planning
//! begins. Planning is then a pure function of (descriptor, snapshot) —
//! no live queries happen mid-plan, which keeps the planner unit-testable
//! against hand-built snapshots.

pub mod builder;
pub mod simulate;
pub mod types;

use std::collections::HashMap;

use serde_json::Value;

use crate::change::QualifiedName;

pub use types::{Catalog, ColumnState, ConstraintState, IndexState, TableState};

/// A row-presence question a backend answers while taking a snapshot:
/// "does `table` contain a row whose `key_column` equals `key`?"
///
/// Data descriptors (seed inserts/deletes) are planned against these
/// answers, so key existence is decided up front rather than discovered as
/// an insert failure mid-transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct RowProbe {
    pub table: QualifiedName,
    pub key_column: String,
    pub key: Value,
}

impl RowProbe {
    fn key(&self) -> (String, String, String) {
        (
            self.table.key(),
            self.key_column.clone(),
            self.key.to_string(),
        )
    }
}

/// Introspected state at the moment planning starts: the structural catalog
/// plus the answers to the requested row probes.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub catalog: Catalog,
    row_presence: HashMap<(String, String, String), bool>,
}

impl Snapshot {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            row_presence: HashMap::new(),
        }
    }

    /// Record a probe answer.
    pub fn set_row_presence(&mut self, probe: &RowProbe, present: bool) {
        self.row_presence.insert(probe.key(), present);
    }

    /// Whether the probed row is present. `None` when the probe was never
    /// collected — the planner treats that as a planning error rather than
    /// guessing.
    pub fn row_present(&self, table: &QualifiedName, key_column: &str, key: &Value) -> Option<bool> {
        self.row_presence
            .get(&(table.key(), key_column.to_string(), key.to_string()))
            .copied()
    }

    /// Flip a recorded probe answer after a simulated insert/delete, so a
    /// later descriptor in the same plan sees the intermediate state.
    pub(crate) fn simulate_row(&mut self, table: &QualifiedName, key_column: &str, key: &Value, present: bool) {
        self.row_presence.insert(
            (table.key(), key_column.to_string(), key.to_string()),
            present,
        );
    }
}
