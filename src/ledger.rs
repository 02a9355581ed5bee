//! Migration ledger records and checksums.
//!
//! One record per applied migration, written in the same transaction as the
//! migration's changes and deleted only by an explicit rollback. The
//! checksum is a SHA-256 over the canonical JSON of the migration's
//! descriptor and seed lists, so editing an already-applied migration is
//! detected as drift instead of silently diverging.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::change::Migration;

/// One row in the migration ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub migration_id: String,
    pub applied_at: DateTime<Utc>,
    pub checksum: String,
}

/// SHA-256 of the migration's canonical JSON form (changes + seeds).
/// Descriptor ids participate: they are derived deterministically from the
/// migration id and ordinal, so reordering changes alters the checksum.
pub fn checksum(migration: &Migration) -> String {
    let payload = serde_json::to_vec(&(&migration.changes, &migration.seeds))
        .expect("change descriptors serialize infallibly");
    let mut hasher = Sha256::new();
    hasher.update(&payload);
    format!("{:x}", hasher.finalize())
}
