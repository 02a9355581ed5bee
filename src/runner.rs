//! Migration runner — orchestrates ledger, validation, planning, and
//! execution.
//!
//! For each migration: consult the ledger (applied migrations are skipped
//! wholesale, with checksum drift detection), validate the descriptor list,
//! snapshot live state, plan every descriptor against the snapshot, then
//! execute the surviving steps atomically and record the migration — all
//! under one advisory lock per run.
//!
//! A single migration moves `Pending -> Planning -> Applying -> Applied`;
//! any execution failure rolls the transaction back and leaves it
//! `Pending`. Rollback moves `Applied -> RollingBack -> Pending` and only
//! ever peels the most recently applied migration (linear history).

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use strum_macros::Display;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::catalog::simulate;
use crate::change::{ChangeDescriptor, Migration};
use crate::config::RunnerConfig;
use crate::db::{Database, DbError};
use crate::ledger::{self, MigrationRecord};
use crate::planner::{self, Decision, MigrationPlan, PlanError};
use crate::rollback::{self, InvertError};
use crate::seed::{self, Direction};
use crate::validate::{self, ValidationIssue};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Invert(#[from] InvertError),

    #[error("migration `{migration_id}` failed validation:\n{details}")]
    Validation {
        migration_id: String,
        details: String,
    },

    /// The descriptor list was edited after the migration was applied.
    #[error(
        "checksum mismatch for applied migration `{migration_id}`: \
         ledger has {recorded}, code computes {computed}"
    )]
    ChecksumMismatch {
        migration_id: String,
        recorded: String,
        computed: String,
    },

    #[error(
        "migration `{pending}` sorts before applied migration `{applied}`; \
         out-of-order application is disabled"
    )]
    OutOfOrder { pending: String, applied: String },

    #[error("migrations must be sorted by id, but `{0}` appears after `{1}`")]
    Unsorted(String, String),

    #[error(
        "migration `{0}` contains operations that cannot run in a transaction; \
         set apply.transactional = false to run it sequenced"
    )]
    RequiresNonTransactional(String),

    #[error("migration `{0}` is not applied")]
    NotApplied(String),

    #[error("migration `{0}` is not the most recently applied; rollback is linear")]
    NotLatest(String),
}

/// Lifecycle state of a single migration, as reported by `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum MigrationState {
    Pending,
    Planning,
    Applying,
    Applied,
    RollingBack,
    Failed,
}

#[derive(Debug, Clone)]
pub struct MigrationStatus {
    pub migration_id: String,
    pub state: MigrationState,
    pub applied_at: Option<DateTime<Utc>>,
    pub checksum: Option<String>,
}

/// Outcome of an `up` run.
#[derive(Debug, Clone, Default)]
pub struct UpReport {
    pub applied: Vec<String>,
    pub skipped: Vec<String>,
}

/// A structural divergence between what the ledger says was applied and
/// what the live catalog contains.
#[derive(Debug, Clone)]
pub struct DriftFinding {
    pub table: String,
    pub detail: String,
}

impl fmt::Display for DriftFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.table, self.detail)
    }
}

/// Applies ordered migrations to a [`Database`].
pub struct Runner<D: Database> {
    db: D,
    config: RunnerConfig,
}

impl<D: Database> Runner<D> {
    pub fn new(db: D, config: RunnerConfig) -> Self {
        Self { db, config }
    }

    pub fn database(&self) -> &D {
        &self.db
    }

    pub fn into_database(self) -> D {
        self.db
    }

    /// Apply all pending migrations, in order. Already-applied migrations
    /// are skipped at ledger granularity; their descriptors are not even
    /// re-planned.
    pub async fn up(&mut self, migrations: &[Migration]) -> Result<UpReport, RunnerError> {
        check_order(migrations)?;
        let lock = self.config.ledger.advisory_lock;
        if lock {
            self.db.acquire_lock().await?;
        }
        let result = self.up_inner(migrations).await;
        if lock {
            self.release_lock_logged().await;
        }
        result
    }

    /// Roll back one migration. It must be the most recently applied one —
    /// the ledger enforces linear history.
    pub async fn down(&mut self, migration: &Migration) -> Result<(), RunnerError> {
        let lock = self.config.ledger.advisory_lock;
        if lock {
            self.db.acquire_lock().await?;
        }
        let result = self.down_inner(migration).await;
        if lock {
            self.release_lock_logged().await;
        }
        result
    }

    /// Release failures must not mask the run's own outcome.
    async fn release_lock_logged(&mut self) {
        if let Err(e) = self.db.release_lock().await {
            warn!(error = %e, "failed to release migration lock");
        }
    }

    /// Dry run: the plan for every pending migration, without executing.
    /// Later migrations are planned against the simulated effects of
    /// earlier ones.
    pub async fn plan(&mut self, migrations: &[Migration]) -> Result<Vec<MigrationPlan>, RunnerError> {
        check_order(migrations)?;
        let records = self.db.ledger().await?;
        let applied: HashMap<&str, &MigrationRecord> = records
            .iter()
            .map(|r| (r.migration_id.as_str(), r))
            .collect();

        let pending: Vec<(&Migration, Vec<ChangeDescriptor>)> = migrations
            .iter()
            .filter(|m| !applied.contains_key(m.id.as_str()))
            .map(|m| (m, up_descriptors(m)))
            .collect();

        let all_probes: Vec<_> = {
            let mut probes = Vec::new();
            for (_, descriptors) in &pending {
                for probe in planner::row_probes(descriptors) {
                    if !probes.contains(&probe) {
                        probes.push(probe);
                    }
                }
            }
            probes
        };

        let mut snapshot = self.db.snapshot(&all_probes).await?;
        let mut plans = Vec::with_capacity(pending.len());
        for (migration, descriptors) in &pending {
            let plan = planner::plan_changes(&migration.id, descriptors, &snapshot)?;
            for step in plan.steps() {
                simulate::apply(&mut snapshot, &step.op);
            }
            plans.push(plan);
        }
        Ok(plans)
    }

    /// Applied/pending status for the given migrations, plus ledger entries
    /// with no matching migration in the list.
    pub async fn status(&mut self, migrations: &[Migration]) -> Result<Vec<MigrationStatus>, RunnerError> {
        let records = self.db.ledger().await?;
        let by_id: HashMap<&str, &MigrationRecord> = records
            .iter()
            .map(|r| (r.migration_id.as_str(), r))
            .collect();

        let mut statuses: Vec<MigrationStatus> = migrations
            .iter()
            .map(|m| match by_id.get(m.id.as_str()) {
                Some(record) => MigrationStatus {
                    migration_id: m.id.clone(),
                    state: MigrationState::Applied,
                    applied_at: Some(record.applied_at),
                    checksum: Some(record.checksum.clone()),
                },
                None => MigrationStatus {
                    migration_id: m.id.clone(),
                    state: MigrationState::Pending,
                    applied_at: None,
                    checksum: None,
                },
            })
            .collect();

        // Ledger entries the code no longer knows about still show up —
        // they usually mean the operator is running an older checkout.
        for record in &records {
            if !migrations.iter().any(|m| m.id == record.migration_id) {
                statuses.push(MigrationStatus {
                    migration_id: record.migration_id.clone(),
                    state: MigrationState::Applied,
                    applied_at: Some(record.applied_at),
                    checksum: Some(record.checksum.clone()),
                });
            }
        }

        statuses.sort_by(|a, b| a.migration_id.cmp(&b.migration_id));
        Ok(statuses)
    }

    /// Check the live catalog against what the ledger claims was applied.
    ///
    /// Applied migrations are re-planned, in order, against the live
    /// snapshot: in a converged database every structural descriptor skips,
    /// because its target state is already present. A descriptor that would
    /// re-apply means the state it establishes is missing: the schema
    /// drifted behind the ledger's back. Seed-data descriptors are excluded
    /// (Up reconciliation always re-applies them), as is state undone by a
    /// later migration in the same list (simulation threads the replay).
    pub async fn verify(&mut self, migrations: &[Migration]) -> Result<Vec<DriftFinding>, RunnerError> {
        check_order(migrations)?;
        let records = self.db.ledger().await?;

        let replay: Vec<(&Migration, Vec<ChangeDescriptor>)> = migrations
            .iter()
            .filter(|m| records.iter().any(|r| r.migration_id == m.id))
            .map(|m| {
                let mut descriptors = m.changes.clone();
                descriptors.retain(|d| {
                    !matches!(
                        d.op,
                        crate::change::ChangeOp::InsertRow { .. }
                            | crate::change::ChangeOp::DeleteRow { .. }
                    )
                });
                (m, descriptors)
            })
            .collect();

        let mut snapshot = self.db.snapshot(&[]).await?;
        let mut findings = Vec::new();
        for (migration, descriptors) in &replay {
            let plan = planner::plan_changes(&migration.id, descriptors, &snapshot)?;
            for decision in &plan.decisions {
                if let Decision::Apply(op) = &decision.decision {
                    findings.push(DriftFinding {
                        table: op.table().map(|t| t.key()).unwrap_or_default(),
                        detail: format!(
                            "change `{}` would re-apply: {}",
                            decision.change_id,
                            crate::render::render(op)
                        ),
                    });
                    simulate::apply(&mut snapshot, op);
                }
            }
        }

        Ok(findings)
    }

    async fn up_inner(&mut self, migrations: &[Migration]) -> Result<UpReport, RunnerError> {
        let records = self.db.ledger().await?;
        let mut max_applied: Option<String> = records
            .iter()
            .map(|r| r.migration_id.clone())
            .max();
        let applied: HashMap<String, String> = records
            .into_iter()
            .map(|r| (r.migration_id, r.checksum))
            .collect();

        let mut report = UpReport::default();

        for migration in migrations {
            let computed = ledger::checksum(migration);

            if let Some(recorded) = applied.get(&migration.id) {
                if *recorded != computed {
                    return Err(RunnerError::ChecksumMismatch {
                        migration_id: migration.id.clone(),
                        recorded: recorded.clone(),
                        computed,
                    });
                }
                debug!(migration_id = %migration.id, "already applied, skipping");
                report.skipped.push(migration.id.clone());
                continue;
            }

            if !self.config.apply.allow_out_of_order
                && let Some(max) = &max_applied
                && migration.id < *max
            {
                return Err(RunnerError::OutOfOrder {
                    pending: migration.id.clone(),
                    applied: max.clone(),
                });
            }

            self.check_validation(migration)?;
            self.apply_one(migration, &computed).await?;
            if max_applied.as_deref().is_none_or(|max| migration.id.as_str() > max) {
                max_applied = Some(migration.id.clone());
            }
            report.applied.push(migration.id.clone());
        }

        Ok(report)
    }

    async fn apply_one(&mut self, migration: &Migration, checksum: &str) -> Result<(), RunnerError> {
        debug!(migration_id = %migration.id, state = %MigrationState::Planning, "planning");
        let descriptors = up_descriptors(migration);
        let probes = planner::row_probes(&descriptors);
        let snapshot = self.db.snapshot(&probes).await?;
        let plan = planner::plan_changes(&migration.id, &descriptors, &snapshot)?;
        log_skips(&plan);

        let steps = plan.steps();
        let unchained = steps.iter().any(|s| s.op.requires_own_transaction());
        if unchained && self.config.apply.transactional {
            return Err(RunnerError::RequiresNonTransactional(migration.id.clone()));
        }

        debug!(migration_id = %migration.id, state = %MigrationState::Applying, "applying");
        let result = if unchained {
            self.db
                .apply_unchained(&migration.id, checksum, &steps)
                .await
        } else {
            self.db.apply(&migration.id, checksum, &steps).await
        };

        match result {
            Ok(()) => {
                info!(
                    migration_id = %migration.id,
                    applied = steps.len(),
                    skipped = plan.skip_count(),
                    "migration applied"
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    migration_id = %migration.id,
                    state = %MigrationState::Failed,
                    error = %e,
                    "migration failed; transaction rolled back"
                );
                Err(e.into())
            }
        }
    }

    async fn down_inner(&mut self, migration: &Migration) -> Result<(), RunnerError> {
        let records = self.db.ledger().await?;
        let record = records
            .iter()
            .find(|r| r.migration_id == migration.id)
            .ok_or_else(|| RunnerError::NotApplied(migration.id.clone()))?;

        let latest = records
            .iter()
            .map(|r| r.migration_id.as_str())
            .max()
            .unwrap_or_default();
        if migration.id != latest {
            return Err(RunnerError::NotLatest(migration.id.clone()));
        }

        let computed = ledger::checksum(migration);
        if record.checksum != computed {
            return Err(RunnerError::ChecksumMismatch {
                migration_id: migration.id.clone(),
                recorded: record.checksum.clone(),
                computed,
            });
        }

        debug!(migration_id = %migration.id, state = %MigrationState::RollingBack, "rolling back");
        // Seed rows go first (the structural inversion may drop their
        // tables), then the inverted changes in reverse author order.
        let mut descriptors = seed::reconcile(&migration.id, &migration.seeds, Direction::Down);
        descriptors.extend(rollback::invert(migration)?);

        let probes = planner::row_probes(&descriptors);
        let snapshot = self.db.snapshot(&probes).await?;
        let plan = planner::plan_changes(&migration.id, &descriptors, &snapshot)?;
        log_skips(&plan);

        self.db.revert(&migration.id, &plan.steps()).await?;
        info!(migration_id = %migration.id, "migration rolled back");
        Ok(())
    }

    fn check_validation(&self, migration: &Migration) -> Result<(), RunnerError> {
        let issues = validate::validate_migration(migration, &self.config.validate_options());
        for issue in &issues {
            warn!(migration_id = %migration.id, %issue, "validation issue");
        }
        if self.config.apply.strict_validation && validate::has_errors(&issues) {
            return Err(RunnerError::Validation {
                migration_id: migration.id.clone(),
                details: format_issues(&issues),
            });
        }
        Ok(())
    }

}

/// The full Up descriptor list: authored changes, then reconciled seeds.
fn up_descriptors(migration: &Migration) -> Vec<ChangeDescriptor> {
    let mut descriptors = migration.changes.clone();
    descriptors.extend(seed::reconcile(
        &migration.id,
        &migration.seeds,
        Direction::Up,
    ));
    descriptors
}

fn check_order(migrations: &[Migration]) -> Result<(), RunnerError> {
    for pair in migrations.windows(2) {
        if pair[1].id <= pair[0].id {
            return Err(RunnerError::Unsorted(
                pair[1].id.clone(),
                pair[0].id.clone(),
            ));
        }
    }
    Ok(())
}

fn log_skips(plan: &MigrationPlan) {
    for decision in &plan.decisions {
        if let Decision::Skip(reason) = &decision.decision {
            debug!(
                change_id = %decision.change_id,
                kind = %decision.kind,
                %reason,
                "descriptor skipped"
            );
        }
    }
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("  {i}"))
        .collect::<Vec<_>>()
        .join("\n")
}
