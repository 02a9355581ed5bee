//! Database backends.
//!
//! The [`Database`] trait is the runner's only view of storage: take a
//! snapshot, read the ledger, apply or revert a planned batch atomically.
//! [`memory::MemoryDatabase`] backs tests and dry runs;
//! `postgres::PgDatabase` (behind the `postgres` feature) talks to a live
//! server over sqlx.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::catalog::{RowProbe, Snapshot};
use crate::ledger::MigrationRecord;
use crate::planner::PlannedStep;

#[derive(Debug, Error)]
pub enum DbError {
    /// Introspection could not read catalog metadata. Fatal: planning never
    /// starts on a snapshot we could not take.
    #[error("catalog access failed: {0}")]
    CatalogAccess(String),

    /// A planned change failed to execute. The transaction (if any) has
    /// been rolled back; the id names the failing descriptor.
    #[error("change `{change_id}` failed: {detail}")]
    ChangeFailed { change_id: String, detail: String },

    /// The ledger could not be read or written.
    #[error("ledger access failed: {0}")]
    Ledger(String),

    /// The migration lock could not be acquired — another runner is active.
    #[error("could not acquire migration lock: {0}")]
    Lock(String),
}

/// Storage backend contract. All mutation entry points are atomic: either
/// every step (and the ledger write) lands, or none do — except
/// [`apply_unchained`](Database::apply_unchained), the explicit escape
/// hatch for operations that cannot run inside a transaction.
#[async_trait]
pub trait Database: Send {
    /// Take the advisory lock guarding migration runs.
    async fn acquire_lock(&mut self) -> Result<(), DbError>;

    async fn release_lock(&mut self) -> Result<(), DbError>;

    /// All applied-migration records. Creates the ledger storage on first
    /// use.
    async fn ledger(&mut self) -> Result<Vec<MigrationRecord>, DbError>;

    /// Introspect current schema state, answering the given row probes.
    async fn snapshot(&mut self, probes: &[RowProbe]) -> Result<Snapshot, DbError>;

    /// Apply all steps and record the migration, atomically.
    async fn apply(
        &mut self,
        migration_id: &str,
        checksum: &str,
        steps: &[PlannedStep],
    ) -> Result<(), DbError>;

    /// Apply steps one at a time outside a transaction, recording the
    /// migration only after the last step succeeds. A crash mid-sequence
    /// leaves the migration unrecorded; the guards make the retry skip the
    /// steps that already landed.
    async fn apply_unchained(
        &mut self,
        migration_id: &str,
        checksum: &str,
        steps: &[PlannedStep],
    ) -> Result<(), DbError>;

    /// Apply inverse steps and delete the migration's ledger record,
    /// atomically.
    async fn revert(&mut self, migration_id: &str, steps: &[PlannedStep]) -> Result<(), DbError>;
}
