//! Integration tests for the full migration pipeline.
//!
//! These drive the [`Runner`] end-to-end against the in-memory backend,
//! using a clinic-flavored fixture schema: a legacy database with naive
//! timestamps, a narrow patient document column, per-column audit-log
//! indexes, and leftover shadow foreign-key columns.

use anyhow::Result;
use pg_migration_run::catalog::builder::CatalogBuilder;
use pg_migration_run::catalog::Catalog;
use pg_migration_run::change::{retype_sweep, ColumnSpec, ForeignKeySpec, IndexSpec, RowValues};
use pg_migration_run::db::memory::MemoryDatabase;
use pg_migration_run::runner::MigrationState;
use pg_migration_run::{
    ChangeDescriptor, Migration, Runner, RunnerConfig, RunnerError, SeedRow, TableSpec, TypeName,
};
use serde_json::json;
use uuid::Uuid;

/// The legacy clinic schema before any migration in this suite runs.
fn clinic_catalog() -> Catalog {
    CatalogBuilder::new()
        .table("patients", |t| {
            t.column("id", "uuid", false)
                .column("document", "varchar(50)", false)
                .column("created_at", "timestamp", false)
                .column("updated_at", "timestamp", true)
                .pk(&["id"]);
        })
        .table("appointments", |t| {
            t.column("id", "uuid", false)
                .column("patient_id", "uuid", false)
                .column("scheduled_at", "timestamp", false)
                .pk(&["id"])
                .fk("fk_appointments_patient", &["patient_id"], "patients", &["id"]);
        })
        .table("audit_logs", |t| {
            t.column("id", "bigint", false)
                .column("tenant_id", "varchar(100)", false)
                .column("user_id", "uuid", true)
                .column("action", "varchar(100)", false)
                .column("entity_type", "varchar(100)", false)
                .column("entity_id", "varchar(100)", false)
                .column("severity", "varchar(20)", false)
                .column("logged_at", "timestamp", false)
                .pk(&["id"])
                .index("ix_audit_logs_action", &["action"], false)
                .index("ix_audit_logs_entity", &["entity_type", "entity_id"], false)
                .index("ix_audit_logs_severity", &["severity"], false)
                .index("ix_audit_logs_tenant", &["tenant_id"], false);
        })
        .table("surveys", |t| {
            t.column("id", "uuid", false)
                .column("survey_id1", "uuid", true)
                .pk(&["id"])
                .index("ix_surveys_survey_id1", &["survey_id1"], false)
                .fk("fk_surveys_survey_id1", &["survey_id1"], "surveys", &["id"]);
        })
        .build()
}

fn clinic_runner() -> Runner<MemoryDatabase> {
    Runner::new(
        MemoryDatabase::with_catalog(clinic_catalog()),
        RunnerConfig::default(),
    )
}

/// The data-driven timezone sweep: every naive timestamp column becomes
/// timestamptz.
fn timestamp_sweep_migration() -> Migration {
    Migration::new("20250101000000_utc_timestamps").extend(retype_sweep(
        &[
            ("patients", &["created_at", "updated_at"][..]),
            ("appointments", &["scheduled_at"][..]),
            ("audit_logs", &["logged_at"][..]),
        ],
        TypeName::timestamp(),
        TypeName::timestamptz(),
    ))
}

fn column_type(db: &MemoryDatabase, table: &str, column: &str) -> TypeName {
    db.catalog()
        .get_table(table)
        .unwrap_or_else(|| panic!("table {table} missing"))
        .get_column(column)
        .unwrap_or_else(|| panic!("column {table}.{column} missing"))
        .type_name
        .clone()
}

fn column_nullable(db: &MemoryDatabase, table: &str, column: &str) -> bool {
    db.catalog()
        .get_table(table)
        .unwrap_or_else(|| panic!("table {table} missing"))
        .get_column(column)
        .unwrap_or_else(|| panic!("column {table}.{column} missing"))
        .nullable
}

// ---------------------------------------------------------------------------
// Idempotence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_timestamp_sweep_is_idempotent() -> Result<()> {
    let mut runner = clinic_runner();
    let m = timestamp_sweep_migration();

    let report = runner.up(std::slice::from_ref(&m)).await?;
    assert_eq!(report.applied.len(), 1);
    assert!(column_type(runner.database(), "patients", "created_at").matches(&TypeName::timestamptz()));

    // Second run: skipped at ledger granularity, schema unchanged.
    let report = runner.up(std::slice::from_ref(&m)).await?;
    assert!(report.applied.is_empty());
    assert_eq!(report.skipped, vec![m.id.clone()]);
    assert!(column_type(runner.database(), "patients", "created_at").matches(&TypeName::timestamptz()));
    Ok(())
}

#[tokio::test]
async fn test_reapplied_descriptors_are_noops_beneath_the_ledger() -> Result<()> {
    // A later migration repeating the same guarded alters must succeed with
    // every descriptor skipping — descriptor guards are defense-in-depth
    // beneath the ledger's migration-granularity check.
    let mut runner = clinic_runner();
    runner.up(&[timestamp_sweep_migration()]).await?;

    let repeat = Migration::new("20250102000000_sweep_again").extend(retype_sweep(
        &[("patients", &["created_at", "updated_at"][..])],
        TypeName::timestamp(),
        TypeName::timestamptz(),
    ));
    let plans = runner.plan(std::slice::from_ref(&repeat)).await?;
    assert_eq!(plans.len(), 1);
    assert!(plans[0].is_noop(), "{:?}", plans[0].decisions);

    let report = runner.up(&[timestamp_sweep_migration(), repeat]).await?;
    assert_eq!(report.applied.len(), 1);
    assert!(column_type(runner.database(), "patients", "updated_at").matches(&TypeName::timestamptz()));
    Ok(())
}

// ---------------------------------------------------------------------------
// Guard correctness against a divergent baseline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_sweep_against_empty_database_skips_everything() -> Result<()> {
    // None of the swept tables exist; every descriptor skips on the table
    // guard and the migration still records as applied.
    let mut runner = Runner::new(MemoryDatabase::new(), RunnerConfig::default());
    let m = timestamp_sweep_migration();

    let report = runner.up(std::slice::from_ref(&m)).await?;
    assert_eq!(report.applied, vec![m.id.clone()]);
    assert_eq!(runner.database().records().len(), 1);

    let statuses = runner.status(&[m]).await?;
    assert_eq!(statuses[0].state, MigrationState::Applied);
    Ok(())
}

#[tokio::test]
async fn test_partial_baseline_applies_only_matching_columns() -> Result<()> {
    // Only patients exists, and updated_at was already converted by an
    // out-of-band change: exactly one descriptor applies.
    let catalog = CatalogBuilder::new()
        .table("patients", |t| {
            t.column("id", "uuid", false)
                .column("created_at", "timestamp", false)
                .column("updated_at", "timestamptz", true);
        })
        .build();
    let mut runner = Runner::new(MemoryDatabase::with_catalog(catalog), RunnerConfig::default());

    let m = timestamp_sweep_migration();
    let plans = runner.plan(std::slice::from_ref(&m)).await?;
    assert_eq!(plans[0].apply_count(), 1, "{:?}", plans[0].decisions);

    runner.up(&[m]).await?;
    assert!(column_type(runner.database(), "patients", "created_at").matches(&TypeName::timestamptz()));
    Ok(())
}

// ---------------------------------------------------------------------------
// Atomicity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_failing_migration_leaves_no_trace() {
    // The SET NOT NULL step fails against a row holding a null; the earlier
    // widening in the same migration must not survive.
    let catalog = CatalogBuilder::new()
        .table("patients", |t| {
            t.column("id", "uuid", false)
                .column("document", "varchar(50)", true)
                .pk(&["id"]);
        })
        .build();
    let mut db = MemoryDatabase::with_catalog(catalog);
    let mut row = RowValues::new();
    row.insert("id".to_string(), json!("p1"));
    row.insert("document".to_string(), serde_json::Value::Null);
    db.seed_rows("patients", vec![row]);
    let mut runner = Runner::new(db, RunnerConfig::default());

    let m = Migration::new("20250101000000_document_not_null")
        .change(ChangeDescriptor::alter_column_type(
            "patients",
            "document",
            TypeName::varchar(50),
            TypeName::varchar(500),
        ))
        .change(ChangeDescriptor::alter_column_nullability(
            "patients", "document", true, false,
        ));

    let err = runner.up(&[m]).await.unwrap_err();
    assert!(matches!(err, RunnerError::Db(_)), "got {err:?}");

    // Schema equals the pre-attempt snapshot; nothing recorded.
    assert!(column_type(runner.database(), "patients", "document").matches(&TypeName::varchar(50)));
    assert!(column_nullable(runner.database(), "patients", "document"));
    assert!(runner.database().records().is_empty());
}

// ---------------------------------------------------------------------------
// Round-trip: shadow foreign-key cleanup and rollback
// ---------------------------------------------------------------------------

fn shadow_fk_cleanup() -> Migration {
    // Drop the duplicate shadow column along with its index and FK, each
    // with its prior shape captured for rollback.
    Migration::new("20250103000000_drop_shadow_fks")
        .change(ChangeDescriptor::drop_foreign_key(
            "surveys",
            ForeignKeySpec::new("fk_surveys_survey_id1", &["survey_id1"], "surveys", &["id"]),
        ))
        .change(ChangeDescriptor::drop_index(IndexSpec::new(
            "ix_surveys_survey_id1",
            "surveys",
            &["survey_id1"],
        )))
        .change(ChangeDescriptor::drop_column(
            "surveys",
            ColumnSpec::new("survey_id1", TypeName::simple("uuid")),
        ))
}

#[tokio::test]
async fn test_up_then_down_restores_shadow_column_shape() -> Result<()> {
    let mut runner = clinic_runner();
    let m = shadow_fk_cleanup();

    runner.up(std::slice::from_ref(&m)).await?;
    {
        let db = runner.database();
        let surveys = db.catalog().get_table("surveys").unwrap();
        assert!(!surveys.has_column("survey_id1"));
        assert!(!surveys.has_foreign_key("fk_surveys_survey_id1"));
        assert!(!db.catalog().has_index("ix_surveys_survey_id1"));
    }

    runner.down(&m).await?;
    {
        let db = runner.database();
        // The column comes back with its original nullable uuid type, and
        // the constraint and index that Up removed are restored.
        assert!(column_type(db, "surveys", "survey_id1").matches(&TypeName::simple("uuid")));
        assert!(column_nullable(db, "surveys", "survey_id1"));
        assert!(db.catalog().get_table("surveys").unwrap().has_foreign_key("fk_surveys_survey_id1"));
        assert!(db.catalog().has_index("ix_surveys_survey_id1"));
        assert!(db.records().is_empty());
    }

    // The rolled-back migration is pending again and can be re-applied.
    let report = runner.up(&[m]).await?;
    assert_eq!(report.applied.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_down_restores_timestamp_types() -> Result<()> {
    let mut runner = clinic_runner();
    let m = timestamp_sweep_migration();

    runner.up(std::slice::from_ref(&m)).await?;
    runner.down(&m).await?;

    let db = runner.database();
    assert!(column_type(db, "patients", "created_at").matches(&TypeName::timestamp()));
    assert!(column_type(db, "appointments", "scheduled_at").matches(&TypeName::timestamp()));
    assert!(column_nullable(db, "patients", "updated_at"));
    Ok(())
}

// ---------------------------------------------------------------------------
// Concrete scenario 1: patients document widening + hash column
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_patients_document_widening_scenario() -> Result<()> {
    let mut runner = clinic_runner();
    let m = Migration::new("20250104000000_document_hash")
        .change(ChangeDescriptor::alter_column_type(
            "patients",
            "document",
            TypeName::varchar(50),
            TypeName::varchar(500),
        ))
        .change(ChangeDescriptor::add_column(
            "patients",
            ColumnSpec::new("document_hash", TypeName::varchar(100)),
        ))
        .change(ChangeDescriptor::create_index(IndexSpec::new(
            "ix_patients_document_hash",
            "patients",
            &["document_hash"],
        )));

    runner.up(&[m]).await?;

    let db = runner.database();
    assert!(column_type(db, "patients", "document").matches(&TypeName::varchar(500)));
    assert!(!column_nullable(db, "patients", "document"));
    assert!(column_type(db, "patients", "document_hash").matches(&TypeName::varchar(100)));
    assert!(column_nullable(db, "patients", "document_hash"));
    assert!(db.catalog().has_index("ix_patients_document_hash"));
    Ok(())
}

// ---------------------------------------------------------------------------
// Concrete scenario 2: audit-log index rework
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_audit_log_composite_index_rework() -> Result<()> {
    let mut runner = clinic_runner();
    let m = Migration::new("20250105000000_audit_log_indexes")
        .change(ChangeDescriptor::drop_index(IndexSpec::new(
            "ix_audit_logs_action",
            "audit_logs",
            &["action"],
        )))
        .change(ChangeDescriptor::drop_index(IndexSpec::new(
            "ix_audit_logs_entity",
            "audit_logs",
            &["entity_type", "entity_id"],
        )))
        .change(ChangeDescriptor::drop_index(IndexSpec::new(
            "ix_audit_logs_severity",
            "audit_logs",
            &["severity"],
        )))
        .change(ChangeDescriptor::drop_index(IndexSpec::new(
            "ix_audit_logs_tenant",
            "audit_logs",
            &["tenant_id"],
        )))
        .change(ChangeDescriptor::create_index(IndexSpec::new(
            "ix_audit_logs_tenant_action_ts",
            "audit_logs",
            &["tenant_id", "action", "logged_at"],
        )))
        .change(ChangeDescriptor::create_index(IndexSpec::new(
            "ix_audit_logs_tenant_entity",
            "audit_logs",
            &["tenant_id", "entity_type", "entity_id"],
        )))
        .change(ChangeDescriptor::create_index(
            IndexSpec::new(
                "ix_audit_logs_tenant_severity_ts",
                "audit_logs",
                &["tenant_id", "severity", "logged_at"],
            )
            .filtered("\"severity\" IN ('WARNING','ERROR','CRITICAL')"),
        ))
        .change(ChangeDescriptor::create_index(IndexSpec::new(
            "ix_audit_logs_tenant_severity",
            "audit_logs",
            &["tenant_id", "severity"],
        )))
        .change(ChangeDescriptor::create_index(IndexSpec::new(
            "ix_audit_logs_tenant_ts",
            "audit_logs",
            &["tenant_id", "logged_at"],
        )))
        .change(ChangeDescriptor::create_index(IndexSpec::new(
            "ix_audit_logs_tenant_user_ts",
            "audit_logs",
            &["tenant_id", "user_id", "logged_at"],
        )));

    runner.up(&[m]).await?;

    let db = runner.database();
    for dropped in [
        "ix_audit_logs_action",
        "ix_audit_logs_entity",
        "ix_audit_logs_severity",
        "ix_audit_logs_tenant",
    ] {
        assert!(!db.catalog().has_index(dropped), "{dropped} should be gone");
    }
    for created in [
        "ix_audit_logs_tenant_action_ts",
        "ix_audit_logs_tenant_entity",
        "ix_audit_logs_tenant_severity_ts",
        "ix_audit_logs_tenant_severity",
        "ix_audit_logs_tenant_ts",
        "ix_audit_logs_tenant_user_ts",
    ] {
        assert!(db.catalog().has_index(created), "{created} should exist");
    }
    let filtered = db.catalog().get_index("ix_audit_logs_tenant_severity_ts").unwrap();
    assert!(filtered.where_clause.as_deref().unwrap().contains("WARNING"));
    Ok(())
}

// ---------------------------------------------------------------------------
// Concrete scenario 3: encryption-key registry
// ---------------------------------------------------------------------------

fn encryption_keys_migration() -> Migration {
    Migration::new("20250106000000_encryption_keys").change(ChangeDescriptor::create_table(
        TableSpec::new("encryption_keys")
            .column(ColumnSpec::new("id", TypeName::simple("uuid")).not_null())
            .column(ColumnSpec::new("key_id", TypeName::varchar(100)).not_null())
            .column(ColumnSpec::new("key_version", TypeName::simple("integer")).not_null())
            .column(
                ColumnSpec::new("tenant_id", TypeName::varchar(100))
                    .not_null()
                    .default_sql("''"),
            )
            .column(ColumnSpec::new("is_active", TypeName::simple("boolean")).not_null().default_sql("true"))
            .column(ColumnSpec::new("expires_at", TypeName::timestamptz()))
            .column(ColumnSpec::new("rotated_at", TypeName::timestamptz()))
            .column(ColumnSpec::new("rotated_by", TypeName::simple("uuid")))
            .primary_key(&["id"])
            .unique("uq_encryption_keys_key_version_tenant", &["key_id", "key_version", "tenant_id"]),
    ))
}

#[tokio::test]
async fn test_encryption_keys_unique_spans_tenant() -> Result<()> {
    let mut runner = Runner::new(MemoryDatabase::new(), RunnerConfig::default());
    runner.up(&[encryption_keys_migration()]).await?;
    assert!(runner.database().catalog().has_table("encryption_keys"));

    let key_row = |id: &str, tenant: &str| {
        let mut row = RowValues::new();
        row.insert("id".to_string(), json!(id));
        row.insert("key_id".to_string(), json!("master"));
        row.insert("key_version".to_string(), json!(1));
        row.insert("tenant_id".to_string(), json!(tenant));
        row
    };

    // Same key_id/key_version under two tenants: accepted.
    let inserts = Migration::new("20250107000000_seed_keys")
        .change(ChangeDescriptor::insert_row(
            "encryption_keys",
            "id",
            key_row("b0000000-0000-0000-0000-000000000001", ""),
        ))
        .change(ChangeDescriptor::insert_row(
            "encryption_keys",
            "id",
            key_row("b0000000-0000-0000-0000-000000000002", "clinic-a"),
        ));
    runner.up(&[encryption_keys_migration(), inserts]).await?;
    assert_eq!(runner.database().rows("encryption_keys").len(), 2);

    // A duplicate (key_id, key_version, tenant_id) triple: rejected.
    let duplicate = Migration::new("20250108000000_duplicate_key").change(
        ChangeDescriptor::insert_row(
            "encryption_keys",
            "id",
            key_row("b0000000-0000-0000-0000-000000000003", "clinic-a"),
        ),
    );
    let err = runner
        .up(&[encryption_keys_migration(), duplicate])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unique constraint"), "{err}");
    assert_eq!(runner.database().rows("encryption_keys").len(), 2);
    Ok(())
}

// ---------------------------------------------------------------------------
// Seed reconciliation
// ---------------------------------------------------------------------------

fn report_templates_migration() -> Migration {
    Migration::new("20250109000000_report_templates")
        .change(ChangeDescriptor::create_table(
            TableSpec::new("report_templates")
                .column(ColumnSpec::new("id", TypeName::simple("uuid")).not_null())
                .column(ColumnSpec::new("name", TypeName::varchar(200)).not_null())
                .column(
                    ColumnSpec::new("tenant_id", TypeName::varchar(100))
                        .not_null()
                        .default_sql("''"),
                )
                .primary_key(&["id"]),
        ))
        .seed(template_seed(
            "0b9f4f6e-3a44-4f0e-9c2b-6d4f8a2e1c11",
            "Monthly revenue",
        ))
        .seed(template_seed(
            "4fd0a9d2-78f2-4f39-9f59-2b7c9e3d5a02",
            "Patient intake",
        ))
}

fn template_seed(key: &str, name: &str) -> SeedRow {
    let mut values = RowValues::new();
    values.insert("name".to_string(), json!(name));
    values.insert("tenant_id".to_string(), json!(""));
    SeedRow::new(
        "report_templates",
        "id",
        Uuid::parse_str(key).expect("fixture uuid"),
        values,
    )
}

#[tokio::test]
async fn test_seed_rows_are_reconciled_idempotently() -> Result<()> {
    let mut runner = Runner::new(MemoryDatabase::new(), RunnerConfig::default());
    runner.up(&[report_templates_migration()]).await?;
    assert_eq!(runner.database().rows("report_templates").len(), 2);

    // A revision re-ships one template under the same key with new content:
    // delete-by-key then insert, no duplicate.
    let mut revised_values = RowValues::new();
    revised_values.insert("name".to_string(), json!("Monthly revenue (v2)"));
    revised_values.insert("tenant_id".to_string(), json!(""));
    let revision = Migration::new("20250110000000_revise_template").seed(SeedRow::new(
        "report_templates",
        "id",
        Uuid::parse_str("0b9f4f6e-3a44-4f0e-9c2b-6d4f8a2e1c11").expect("fixture uuid"),
        revised_values,
    ));
    runner
        .up(&[report_templates_migration(), revision.clone()])
        .await?;

    let rows = runner.database().rows("report_templates");
    assert_eq!(rows.len(), 2, "revision must replace, not duplicate");
    assert!(rows.iter().any(|r| r.get("name") == Some(&json!("Monthly revenue (v2)"))));

    // Down removes exactly the revision's row, not the other template.
    runner.down(&revision).await?;
    let rows = runner.database().rows("report_templates");
    assert_eq!(rows.len(), 1);
    assert!(rows.iter().any(|r| r.get("name") == Some(&json!("Patient intake"))));
    Ok(())
}

// ---------------------------------------------------------------------------
// Tenant-scope validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_tenant_column_enforced_on_new_tables() {
    let mut config = RunnerConfig::default();
    config.tenancy.column = Some("tenant_id".to_string());
    let mut runner = Runner::new(MemoryDatabase::new(), config);

    let m = Migration::new("20250111000000_system_notifications").change(
        ChangeDescriptor::create_table(
            TableSpec::new("system_notifications")
                .column(ColumnSpec::new("id", TypeName::simple("uuid")).not_null())
                .primary_key(&["id"]),
        ),
    );
    let err = runner.up(&[m]).await.unwrap_err();
    assert!(matches!(err, RunnerError::Validation { .. }), "{err}");
    assert!(err.to_string().contains("tenant_id"));
}

// ---------------------------------------------------------------------------
// Drift verification
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_verify_reports_out_of_band_changes() -> Result<()> {
    let mut runner = clinic_runner();
    let m = timestamp_sweep_migration();
    runner.up(std::slice::from_ref(&m)).await?;
    assert!(runner.verify(std::slice::from_ref(&m)).await?.is_empty());

    // Someone reverts a column by hand behind the ledger's back.
    let mut db = runner.into_database();
    db.catalog_mut()
        .get_table_mut("patients")
        .unwrap()
        .get_column_mut("created_at")
        .unwrap()
        .type_name = TypeName::timestamp();

    let mut runner = Runner::new(db, RunnerConfig::default());
    let findings = runner.verify(&[m]).await?;
    assert_eq!(findings.len(), 1, "{findings:?}");
    assert!(findings[0].detail.contains("created_at"));
    Ok(())
}

// ---------------------------------------------------------------------------
// Dry-run planning
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_plan_previews_without_executing() -> Result<()> {
    let mut runner = clinic_runner();
    let sweep = timestamp_sweep_migration();
    let cleanup = shadow_fk_cleanup();

    let plans = runner.plan(&[sweep.clone(), cleanup.clone()]).await?;
    assert_eq!(plans.len(), 2);
    assert_eq!(plans[0].apply_count(), 4);
    assert_eq!(plans[1].apply_count(), 3);

    // Nothing executed, nothing recorded.
    assert!(column_type(runner.database(), "patients", "created_at").matches(&TypeName::timestamp()));
    assert!(runner.database().records().is_empty());

    // After applying, the plan for the same input is empty.
    runner.up(&[sweep.clone(), cleanup.clone()]).await?;
    let plans = runner.plan(&[sweep, cleanup]).await?;
    assert!(plans.is_empty());
    Ok(())
}
