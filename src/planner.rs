//! Conditional change planning — pure decisions over a snapshot.
//!
//! `Plan(descriptor, snapshot) -> Skip | Apply`. Every operation first
//! passes intrinsic applicability checks (does the target exist / is the
//! target absent, as the operation requires), then its explicit
//! precondition. Checks run in a fixed order — table existence before
//! column existence before type/nullability state — and short-circuit on
//! the first failure, which becomes the skip reason.
//!
//! A skip is not an error. Re-running a migration against a database that
//! is already at the target shape, or was never at the expected baseline,
//! must fall through cleanly; only genuinely inconsistent inputs (a data
//! descriptor whose row probe was never collected) surface as [`PlanError`].

use std::fmt;

use serde_json::Value;
use thiserror::Error;

use crate::catalog::{simulate, RowProbe, Snapshot};
use crate::change::{ChangeDescriptor, ChangeKind, ChangeOp, Precondition, QualifiedName, TypeName};

#[derive(Debug, Error)]
pub enum PlanError {
    /// A data descriptor's key was not covered by the snapshot's row probes.
    /// The runner collects probes from the descriptor list itself, so this
    /// indicates a hand-built snapshot missing a probe, not operator error.
    #[error("no row probe for {table}.{key_column} = {key} (change `{change_id}`)")]
    MissingRowProbe {
        change_id: String,
        table: String,
        key_column: String,
        key: String,
    },

    /// An `InsertRow` whose row values do not contain its own key column.
    #[error("change `{change_id}` inserts into {table} but the row has no `{key_column}` value")]
    KeyValueMissing {
        change_id: String,
        table: String,
        key_column: String,
    },
}

/// Why a descriptor was skipped. Informational only; surfaced in plans and
/// debug logs, never as an error.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    TableMissing { table: String },
    TableAlreadyExists { table: String },
    ColumnMissing { table: String, column: String },
    ColumnAlreadyExists { table: String, column: String },
    TypeMismatch {
        table: String,
        column: String,
        expected: TypeName,
        found: TypeName,
    },
    NullabilityMismatch {
        table: String,
        column: String,
        expected_nullable: bool,
    },
    IndexMissing { index: String },
    IndexAlreadyExists { index: String },
    ForeignKeyMissing { table: String, name: String },
    ForeignKeyAlreadyExists { table: String, name: String },
    RowMissing { table: String, key: String },
    RowAlreadyPresent { table: String, key: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::TableMissing { table } => write!(f, "table {table} does not exist"),
            SkipReason::TableAlreadyExists { table } => write!(f, "table {table} already exists"),
            SkipReason::ColumnMissing { table, column } => {
                write!(f, "column {table}.{column} does not exist")
            }
            SkipReason::ColumnAlreadyExists { table, column } => {
                write!(f, "column {table}.{column} already exists")
            }
            SkipReason::TypeMismatch {
                table,
                column,
                expected,
                found,
            } => write!(
                f,
                "column {table}.{column} is {found}, expected {expected}"
            ),
            SkipReason::NullabilityMismatch {
                table,
                column,
                expected_nullable,
            } => write!(
                f,
                "column {table}.{column} is not {} as expected",
                if *expected_nullable { "nullable" } else { "NOT NULL" }
            ),
            SkipReason::IndexMissing { index } => write!(f, "index {index} does not exist"),
            SkipReason::IndexAlreadyExists { index } => write!(f, "index {index} already exists"),
            SkipReason::ForeignKeyMissing { table, name } => {
                write!(f, "foreign key {name} on {table} does not exist")
            }
            SkipReason::ForeignKeyAlreadyExists { table, name } => {
                write!(f, "foreign key {name} on {table} already exists")
            }
            SkipReason::RowMissing { table, key } => {
                write!(f, "no row in {table} with key {key}")
            }
            SkipReason::RowAlreadyPresent { table, key } => {
                write!(f, "row in {table} with key {key} already present")
            }
        }
    }
}

/// The planner's verdict for one descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Skip(SkipReason),
    Apply(ChangeOp),
}

impl Decision {
    pub fn is_apply(&self) -> bool {
        matches!(self, Decision::Apply(_))
    }
}

/// One descriptor's planning outcome, kept in author order.
#[derive(Debug, Clone)]
pub struct PlannedDecision {
    pub change_id: String,
    pub kind: ChangeKind,
    pub decision: Decision,
}

/// An operation cleared for execution, tagged with the descriptor id so
/// execution failures can name the exact change involved.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStep {
    pub change_id: String,
    pub op: ChangeOp,
}

/// The plan for one migration: every descriptor's decision, in order.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    pub migration_id: String,
    pub decisions: Vec<PlannedDecision>,
}

impl MigrationPlan {
    /// The operations that will execute, in order.
    pub fn steps(&self) -> Vec<PlannedStep> {
        self.decisions
            .iter()
            .filter_map(|d| match &d.decision {
                Decision::Apply(op) => Some(PlannedStep {
                    change_id: d.change_id.clone(),
                    op: op.clone(),
                }),
                Decision::Skip(_) => None,
            })
            .collect()
    }

    pub fn apply_count(&self) -> usize {
        self.decisions.iter().filter(|d| d.decision.is_apply()).count()
    }

    pub fn skip_count(&self) -> usize {
        self.decisions.len() - self.apply_count()
    }

    /// True when every descriptor skipped — the schema already matches.
    pub fn is_noop(&self) -> bool {
        self.apply_count() == 0
    }
}

/// Plan an ordered descriptor list against a snapshot.
///
/// The snapshot is cloned and mutated as planning proceeds: each applied
/// operation is simulated so later descriptors see the intermediate state
/// (the index descriptor following a `CreateTable` must find the table).
pub fn plan_changes(
    migration_id: &str,
    changes: &[ChangeDescriptor],
    snapshot: &Snapshot,
) -> Result<MigrationPlan, PlanError> {
    let mut working = snapshot.clone();
    let mut decisions = Vec::with_capacity(changes.len());

    for descriptor in changes {
        let decision = plan_change(descriptor, &working)?;
        if let Decision::Apply(op) = &decision {
            simulate::apply(&mut working, op);
        }
        decisions.push(PlannedDecision {
            change_id: descriptor.id.clone(),
            kind: descriptor.op.kind(),
            decision,
        });
    }

    Ok(MigrationPlan {
        migration_id: migration_id.to_string(),
        decisions,
    })
}

/// Plan a single descriptor against a snapshot.
pub fn plan_change(
    descriptor: &ChangeDescriptor,
    snapshot: &Snapshot,
) -> Result<Decision, PlanError> {
    if let Some(reason) = intrinsic_check(descriptor, snapshot)? {
        return Ok(Decision::Skip(reason));
    }
    if let Some(precondition) = &descriptor.precondition
        && let Some(reason) = check_precondition(&descriptor.id, precondition, snapshot)?
    {
        return Ok(Decision::Skip(reason));
    }
    Ok(Decision::Apply(descriptor.op.clone()))
}

/// Collect the row probes a snapshot must answer for the given descriptors:
/// the keys of every data operation plus any explicit row preconditions.
pub fn row_probes(changes: &[ChangeDescriptor]) -> Vec<RowProbe> {
    let mut probes: Vec<RowProbe> = Vec::new();
    let mut push = |probe: RowProbe| {
        if !probes.contains(&probe) {
            probes.push(probe);
        }
    };

    for descriptor in changes {
        match &descriptor.op {
            ChangeOp::InsertRow {
                table,
                key_column,
                row,
            } => {
                if let Some(key) = row.get(key_column) {
                    push(RowProbe {
                        table: table.clone(),
                        key_column: key_column.clone(),
                        key: key.clone(),
                    });
                }
            }
            ChangeOp::DeleteRow {
                table,
                key_column,
                key,
                ..
            } => push(RowProbe {
                table: table.clone(),
                key_column: key_column.clone(),
                key: key.clone(),
            }),
            _ => {}
        }
        match &descriptor.precondition {
            Some(Precondition::RowExists {
                table,
                key_column,
                key,
            })
            | Some(Precondition::RowAbsent {
                table,
                key_column,
                key,
            }) => push(RowProbe {
                table: table.clone(),
                key_column: key_column.clone(),
                key: key.clone(),
            }),
            _ => {}
        }
    }

    probes
}

/// Applicability checks derived from the operation itself: the existence
/// (or required absence) of the objects it touches. Table before column
/// before anything finer, short-circuiting on the first failure.
fn intrinsic_check(
    descriptor: &ChangeDescriptor,
    snapshot: &Snapshot,
) -> Result<Option<SkipReason>, PlanError> {
    let cat = &snapshot.catalog;
    let reason = match &descriptor.op {
        ChangeOp::CreateTable { spec } => {
            let key = spec.name.key();
            cat.has_table(&key)
                .then(|| SkipReason::TableAlreadyExists { table: key })
        }
        ChangeOp::DropTable { table, .. } => {
            let key = table.key();
            (!cat.has_table(&key)).then(|| SkipReason::TableMissing { table: key })
        }
        ChangeOp::AddColumn { table, column } => {
            let key = table.key();
            match cat.get_table(&key) {
                None => Some(SkipReason::TableMissing { table: key }),
                Some(t) if t.has_column(&column.name) => Some(SkipReason::ColumnAlreadyExists {
                    table: key,
                    column: column.name.clone(),
                }),
                Some(_) => None,
            }
        }
        ChangeOp::DropColumn { table, column, .. } => {
            column_check(cat, table, column)
        }
        ChangeOp::AlterColumnType { table, column, .. }
        | ChangeOp::AlterColumnNullability { table, column, .. } => {
            column_check(cat, table, column)
        }
        ChangeOp::CreateIndex { spec } => {
            let key = spec.table.key();
            if !cat.has_table(&key) {
                Some(SkipReason::TableMissing { table: key })
            } else if cat.has_index(&spec.name) {
                Some(SkipReason::IndexAlreadyExists {
                    index: spec.name.clone(),
                })
            } else {
                None
            }
        }
        ChangeOp::DropIndex { name, .. } => (!cat.has_index(name)).then(|| SkipReason::IndexMissing {
            index: name.clone(),
        }),
        ChangeOp::AddForeignKey { table, spec } => {
            let key = table.key();
            let ref_key = spec.ref_table.key();
            match cat.get_table(&key) {
                None => Some(SkipReason::TableMissing { table: key }),
                Some(_) if !cat.has_table(&ref_key) => {
                    Some(SkipReason::TableMissing { table: ref_key })
                }
                Some(t) if t.has_foreign_key(&spec.name) => {
                    Some(SkipReason::ForeignKeyAlreadyExists {
                        table: key,
                        name: spec.name.clone(),
                    })
                }
                Some(_) => None,
            }
        }
        ChangeOp::DropForeignKey { table, name, .. } => {
            let key = table.key();
            match cat.get_table(&key) {
                None => Some(SkipReason::TableMissing { table: key }),
                Some(t) if !t.has_foreign_key(name) => Some(SkipReason::ForeignKeyMissing {
                    table: key,
                    name: name.clone(),
                }),
                Some(_) => None,
            }
        }
        ChangeOp::InsertRow {
            table,
            key_column,
            row,
        } => {
            let key_name = table.key();
            if !cat.has_table(&key_name) {
                Some(SkipReason::TableMissing { table: key_name })
            } else {
                let Some(key) = row.get(key_column) else {
                    return Err(PlanError::KeyValueMissing {
                        change_id: descriptor.id.clone(),
                        table: key_name,
                        key_column: key_column.clone(),
                    });
                };
                row_presence(descriptor, snapshot, table, key_column, key)?
                    .then(|| SkipReason::RowAlreadyPresent {
                        table: key_name,
                        key: key.to_string(),
                    })
            }
        }
        ChangeOp::DeleteRow {
            table,
            key_column,
            key,
            ..
        } => {
            let key_name = table.key();
            if !cat.has_table(&key_name) {
                Some(SkipReason::TableMissing { table: key_name })
            } else {
                (!row_presence(descriptor, snapshot, table, key_column, key)?).then(|| {
                    SkipReason::RowMissing {
                        table: key_name,
                        key: key.to_string(),
                    }
                })
            }
        }
    };
    Ok(reason)
}

fn column_check(
    cat: &crate::catalog::Catalog,
    table: &QualifiedName,
    column: &str,
) -> Option<SkipReason> {
    let key = table.key();
    match cat.get_table(&key) {
        None => Some(SkipReason::TableMissing { table: key }),
        Some(t) if !t.has_column(column) => Some(SkipReason::ColumnMissing {
            table: key,
            column: column.to_string(),
        }),
        Some(_) => None,
    }
}

fn row_presence(
    descriptor: &ChangeDescriptor,
    snapshot: &Snapshot,
    table: &QualifiedName,
    key_column: &str,
    key: &Value,
) -> Result<bool, PlanError> {
    snapshot
        .row_present(table, key_column, key)
        .ok_or_else(|| PlanError::MissingRowProbe {
            change_id: descriptor.id.clone(),
            table: table.key(),
            key_column: key_column.to_string(),
            key: key.to_string(),
        })
}

/// Evaluate an explicit precondition. `Ok(None)` means it holds; a
/// `SkipReason` names the first check that failed, in table → column →
/// state order.
fn check_precondition(
    change_id: &str,
    precondition: &Precondition,
    snapshot: &Snapshot,
) -> Result<Option<SkipReason>, PlanError> {
    let cat = &snapshot.catalog;
    let reason = match precondition {
        Precondition::TableExists(table) => {
            let key = table.key();
            (!cat.has_table(&key)).then(|| SkipReason::TableMissing { table: key })
        }
        Precondition::TableAbsent(table) => {
            let key = table.key();
            cat.has_table(&key)
                .then(|| SkipReason::TableAlreadyExists { table: key })
        }
        Precondition::ColumnExists { table, column } => column_check(cat, table, column),
        Precondition::ColumnAbsent { table, column } => {
            let key = table.key();
            match cat.get_table(&key) {
                None => Some(SkipReason::TableMissing { table: key }),
                Some(t) if t.has_column(column) => Some(SkipReason::ColumnAlreadyExists {
                    table: key,
                    column: column.clone(),
                }),
                Some(_) => None,
            }
        }
        Precondition::ColumnHasType {
            table,
            column,
            type_name,
        } => {
            if let Some(reason) = column_check(cat, table, column) {
                Some(reason)
            } else {
                let key = table.key();
                let found = &cat
                    .get_table(&key)
                    .and_then(|t| t.get_column(column))
                    .map(|c| c.type_name.clone())
                    .unwrap_or_else(|| TypeName::simple("unknown"));
                (!type_name.matches(found)).then(|| SkipReason::TypeMismatch {
                    table: key,
                    column: column.clone(),
                    expected: type_name.clone(),
                    found: found.clone(),
                })
            }
        }
        Precondition::ColumnNullability {
            table,
            column,
            nullable,
        } => {
            if let Some(reason) = column_check(cat, table, column) {
                Some(reason)
            } else {
                let key = table.key();
                let current = cat
                    .get_table(&key)
                    .and_then(|t| t.get_column(column))
                    .map(|c| c.nullable)
                    .unwrap_or(true);
                (current != *nullable).then(|| SkipReason::NullabilityMismatch {
                    table: key,
                    column: column.clone(),
                    expected_nullable: *nullable,
                })
            }
        }
        Precondition::IndexExists(name) => (!cat.has_index(name)).then(|| SkipReason::IndexMissing {
            index: name.clone(),
        }),
        Precondition::IndexAbsent(name) => cat.has_index(name).then(|| SkipReason::IndexAlreadyExists {
            index: name.clone(),
        }),
        Precondition::ForeignKeyExists { table, name } => {
            let key = table.key();
            match cat.get_table(&key) {
                None => Some(SkipReason::TableMissing { table: key }),
                Some(t) if !t.has_foreign_key(name) => Some(SkipReason::ForeignKeyMissing {
                    table: key,
                    name: name.clone(),
                }),
                Some(_) => None,
            }
        }
        Precondition::ForeignKeyAbsent { table, name } => {
            let key = table.key();
            match cat.get_table(&key) {
                None => Some(SkipReason::TableMissing { table: key }),
                Some(t) if t.has_foreign_key(name) => Some(SkipReason::ForeignKeyAlreadyExists {
                    table: key,
                    name: name.clone(),
                }),
                Some(_) => None,
            }
        }
        Precondition::RowExists {
            table,
            key_column,
            key,
        } => {
            let present = snapshot.row_present(table, key_column, key).ok_or_else(|| {
                PlanError::MissingRowProbe {
                    change_id: change_id.to_string(),
                    table: table.key(),
                    key_column: key_column.clone(),
                    key: key.to_string(),
                }
            })?;
            (!present).then(|| SkipReason::RowMissing {
                table: table.key(),
                key: key.to_string(),
            })
        }
        Precondition::RowAbsent {
            table,
            key_column,
            key,
        } => {
            let present = snapshot.row_present(table, key_column, key).ok_or_else(|| {
                PlanError::MissingRowProbe {
                    change_id: change_id.to_string(),
                    table: table.key(),
                    key_column: key_column.clone(),
                    key: key.to_string(),
                }
            })?;
            present.then(|| SkipReason::RowAlreadyPresent {
                table: table.key(),
                key: key.to_string(),
            })
        }
    };
    Ok(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::builder::CatalogBuilder;
    use crate::change::{ColumnSpec, IndexSpec, TableSpec};
    use proptest::prelude::*;

    fn clinic_snapshot() -> Snapshot {
        Snapshot::new(
            CatalogBuilder::new()
                .table("patients", |t| {
                    t.column("id", "uuid", false)
                        .column("document", "varchar(50)", false)
                        .column("created_at", "timestamp", false)
                        .pk(&["id"]);
                })
                .table("appointments", |t| {
                    t.column("id", "uuid", false)
                        .column("scheduled_at", "timestamp", false)
                        .pk(&["id"]);
                })
                .build(),
        )
    }

    #[test]
    fn test_guarded_retype_applies_when_type_matches() {
        let snapshot = clinic_snapshot();
        let d = ChangeDescriptor::alter_column_type(
            "patients",
            "created_at",
            TypeName::timestamp(),
            TypeName::timestamptz(),
        );
        let decision = plan_change(&d, &snapshot).unwrap();
        assert!(decision.is_apply());
    }

    #[test]
    fn test_guarded_retype_skips_when_already_converted() {
        let snapshot = Snapshot::new(
            CatalogBuilder::new()
                .table("patients", |t| {
                    t.column("created_at", "timestamptz", false);
                })
                .build(),
        );
        let d = ChangeDescriptor::alter_column_type(
            "patients",
            "created_at",
            TypeName::timestamp(),
            TypeName::timestamptz(),
        );
        match plan_change(&d, &snapshot).unwrap() {
            Decision::Skip(SkipReason::TypeMismatch { found, .. }) => {
                assert!(found.matches(&TypeName::timestamptz()));
            }
            other => panic!("expected TypeMismatch skip, got {:?}", other),
        }
    }

    #[test]
    fn test_table_check_precedes_column_check() {
        let snapshot = Snapshot::default();
        let d = ChangeDescriptor::alter_column_type(
            "never_created",
            "created_at",
            TypeName::timestamp(),
            TypeName::timestamptz(),
        );
        match plan_change(&d, &snapshot).unwrap() {
            Decision::Skip(SkipReason::TableMissing { table }) => {
                assert_eq!(table, "never_created");
            }
            other => panic!("expected TableMissing (checked first), got {:?}", other),
        }
    }

    #[test]
    fn test_column_check_precedes_type_check() {
        let snapshot = clinic_snapshot();
        let d = ChangeDescriptor::alter_column_type(
            "patients",
            "deleted_at",
            TypeName::timestamp(),
            TypeName::timestamptz(),
        );
        match plan_change(&d, &snapshot).unwrap() {
            Decision::Skip(SkipReason::ColumnMissing { column, .. }) => {
                assert_eq!(column, "deleted_at");
            }
            other => panic!("expected ColumnMissing, got {:?}", other),
        }
    }

    #[test]
    fn test_create_table_is_idempotent_by_existence() {
        let snapshot = clinic_snapshot();
        let d = ChangeDescriptor::create_table(
            TableSpec::new("patients")
                .column(ColumnSpec::new("id", TypeName::simple("uuid")).not_null()),
        );
        assert!(matches!(
            plan_change(&d, &snapshot).unwrap(),
            Decision::Skip(SkipReason::TableAlreadyExists { .. })
        ));
    }

    #[test]
    fn test_plan_threads_intermediate_state() {
        // The index descriptor targets a table created one step earlier in
        // the same migration; planning against the initial snapshot alone
        // would wrongly skip it.
        let snapshot = Snapshot::default();
        let changes = vec![
            with_id(
                ChangeDescriptor::create_table(
                    TableSpec::new("notification_rules")
                        .column(ColumnSpec::new("id", TypeName::simple("uuid")).not_null())
                        .column(ColumnSpec::new("tenant_id", TypeName::varchar(100)).not_null())
                        .primary_key(&["id"]),
                ),
                "m/0000",
            ),
            with_id(
                ChangeDescriptor::create_index(IndexSpec::new(
                    "ix_notification_rules_tenant",
                    "notification_rules",
                    &["tenant_id"],
                )),
                "m/0001",
            ),
        ];

        let plan = plan_changes("m", &changes, &snapshot).unwrap();
        assert_eq!(plan.apply_count(), 2, "{:?}", plan.decisions);
    }

    #[test]
    fn test_planning_the_result_again_is_a_noop() {
        // Idempotence at plan level: simulate the first plan, then plan the
        // same changes against the result — everything skips.
        let snapshot = clinic_snapshot();
        let changes: Vec<ChangeDescriptor> = crate::change::retype_sweep(
            &[
                ("patients", &["created_at"][..]),
                ("appointments", &["scheduled_at"][..]),
            ],
            TypeName::timestamp(),
            TypeName::timestamptz(),
        )
        .into_iter()
        .enumerate()
        .map(|(i, mut d)| {
            d.id = format!("m/{i:04}");
            d
        })
        .collect();

        let mut working = snapshot.clone();
        let first = plan_changes("m", &changes, &working).unwrap();
        assert_eq!(first.apply_count(), 2);
        for step in first.steps() {
            simulate::apply(&mut working, &step.op);
        }

        let second = plan_changes("m", &changes, &working).unwrap();
        assert!(second.is_noop(), "{:?}", second.decisions);
    }

    #[test]
    fn test_missing_row_probe_is_a_plan_error() {
        let snapshot = clinic_snapshot();
        let mut row = crate::change::RowValues::new();
        row.insert("id".to_string(), serde_json::json!("k1"));
        let d = with_id(ChangeDescriptor::insert_row("patients", "id", row), "m/0000");

        let err = plan_change(&d, &snapshot).unwrap_err();
        assert!(matches!(err, PlanError::MissingRowProbe { .. }));
    }

    #[test]
    fn test_row_probes_collects_data_descriptor_keys() {
        let mut row = crate::change::RowValues::new();
        row.insert("id".to_string(), serde_json::json!("k1"));
        let changes = vec![
            ChangeDescriptor::delete_row("report_templates", "id", serde_json::json!("k1"), None),
            ChangeDescriptor::insert_row("report_templates", "id", row),
        ];
        // Same key appears in both descriptors; probed once.
        let probes = row_probes(&changes);
        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].table.key(), "report_templates");
    }

    #[test]
    fn test_add_foreign_key_skips_when_ref_table_missing() {
        let snapshot = clinic_snapshot();
        let d = with_id(
            ChangeDescriptor::add_foreign_key(
                "appointments",
                crate::change::ForeignKeySpec::new(
                    "fk_appointments_journey",
                    &["journey_id"],
                    "patient_journeys",
                    &["id"],
                ),
            ),
            "m/0000",
        );
        match plan_change(&d, &snapshot).unwrap() {
            Decision::Skip(SkipReason::TableMissing { table }) => {
                assert_eq!(table, "patient_journeys");
            }
            other => panic!("expected ref-table TableMissing, got {:?}", other),
        }
    }

    fn with_id(mut d: ChangeDescriptor, id: &str) -> ChangeDescriptor {
        d.id = id.to_string();
        d
    }

    proptest! {
        /// A guarded varchar widening applies exactly when the live width
        /// equals the guard's expected width, regardless of the values.
        #[test]
        fn prop_retype_applies_iff_guard_matches(
            current in 1i64..1000,
            expected in 1i64..1000,
            target in 1i64..1000,
        ) {
            let snapshot = Snapshot::new(
                CatalogBuilder::new()
                    .table("patients", |t| {
                        t.column("document", &format!("varchar({current})"), false);
                    })
                    .build(),
            );
            let d = ChangeDescriptor::alter_column_type(
                "patients",
                "document",
                TypeName::varchar(expected),
                TypeName::varchar(target),
            );
            let decision = plan_change(&d, &snapshot).unwrap();
            prop_assert_eq!(decision.is_apply(), current == expected);
        }
    }
}
