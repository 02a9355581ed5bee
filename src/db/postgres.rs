//! Live PostgreSQL backend over sqlx.
//!
//! Introspects real catalog state from `information_schema` and
//! `pg_catalog`, executes rendered SQL inside transactions, and keeps the
//! ledger table in the configured schema. The advisory lock is held on a
//! dedicated pooled connection for the duration of a run — advisory locks
//! are session-scoped, so it must not hop between pool connections.

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row};

use crate::catalog::{
    Catalog, ColumnState, ConstraintState, IndexState, RowProbe, Snapshot, TableState,
};
use crate::change::{ReferentialAction, TypeName};
use crate::config::RunnerConfig;
use crate::db::{Database, DbError};
use crate::ledger::MigrationRecord;
use crate::planner::PlannedStep;
use crate::render;

/// PostgreSQL-backed [`Database`].
pub struct PgDatabase {
    pool: PgPool,
    schema: String,
    ledger_table: String,
    lock_key: i64,
    lock_conn: Option<PoolConnection<Postgres>>,
}

impl PgDatabase {
    /// The configuration's schema and ledger table names have already been
    /// validated as plain identifiers.
    pub fn new(pool: PgPool, config: &RunnerConfig) -> Self {
        let schema = config.ledger.schema.clone();
        let ledger_table = config.ledger.table.clone();
        let lock_key = advisory_lock_key(&schema, &ledger_table);
        Self {
            pool,
            schema,
            ledger_table,
            lock_key,
            lock_conn: None,
        }
    }

    fn ledger_ident(&self) -> String {
        format!(
            "{}.{}",
            render::quote_ident(&self.schema),
            render::quote_ident(&self.ledger_table)
        )
    }

    async fn ensure_ledger(&self) -> Result<(), DbError> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             migration_id varchar(255) PRIMARY KEY, \
             applied_at timestamptz NOT NULL DEFAULT now(), \
             checksum varchar(64) NOT NULL)",
            self.ledger_ident()
        );
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| DbError::Ledger(e.to_string()))?;
        Ok(())
    }

    async fn introspect_catalog(&self) -> Result<Catalog, DbError> {
        let catalog_err = |e: sqlx::Error| DbError::CatalogAccess(e.to_string());
        let mut catalog = Catalog::new();

        let tables: Vec<PgRow> = sqlx::query(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = $1 AND table_type = 'BASE TABLE' AND table_name <> $2 \
             ORDER BY table_name",
        )
        .bind(&self.schema)
        .bind(&self.ledger_table)
        .fetch_all(&self.pool)
        .await
        .map_err(catalog_err)?;

        for row in &tables {
            let name: String = row.try_get("table_name").map_err(catalog_err)?;
            catalog.insert_table(TableState {
                name,
                columns: vec![],
                indexes: vec![],
                constraints: vec![],
            });
        }

        let columns: Vec<PgRow> = sqlx::query(
            "SELECT table_name, column_name, data_type, is_nullable, column_default, \
                    character_maximum_length, numeric_precision, numeric_scale \
             FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name <> $2 \
             ORDER BY table_name, ordinal_position",
        )
        .bind(&self.schema)
        .bind(&self.ledger_table)
        .fetch_all(&self.pool)
        .await
        .map_err(catalog_err)?;

        for row in &columns {
            let table: String = row.try_get("table_name").map_err(catalog_err)?;
            let name: String = row.try_get("column_name").map_err(catalog_err)?;
            let data_type: String = row.try_get("data_type").map_err(catalog_err)?;
            let is_nullable: String = row.try_get("is_nullable").map_err(catalog_err)?;
            let default: Option<String> = row.try_get("column_default").map_err(catalog_err)?;
            let char_len: Option<i32> =
                row.try_get("character_maximum_length").map_err(catalog_err)?;
            let num_precision: Option<i32> =
                row.try_get("numeric_precision").map_err(catalog_err)?;
            let num_scale: Option<i32> = row.try_get("numeric_scale").map_err(catalog_err)?;

            if let Some(t) = catalog.get_table_mut(&table) {
                t.columns.push(ColumnState {
                    name,
                    type_name: map_type(&data_type, char_len, num_precision, num_scale),
                    nullable: is_nullable == "YES",
                    default,
                });
            }
        }

        let indexes: Vec<PgRow> = sqlx::query(
            "SELECT t.relname AS table_name, \
                    i.relname AS index_name, \
                    ix.indisunique AS is_unique, \
                    pg_get_expr(ix.indpred, ix.indrelid) AS where_clause, \
                    a.attname AS column_name \
             FROM pg_index ix \
             JOIN pg_class i ON i.oid = ix.indexrelid \
             JOIN pg_class t ON t.oid = ix.indrelid \
             JOIN pg_namespace n ON n.oid = t.relnamespace \
             CROSS JOIN LATERAL unnest(ix.indkey) WITH ORDINALITY AS cols(attnum, ord) \
             LEFT JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = cols.attnum \
             WHERE n.nspname = $1 AND t.relname <> $2 \
             ORDER BY t.relname, i.relname, cols.ord",
        )
        .bind(&self.schema)
        .bind(&self.ledger_table)
        .fetch_all(&self.pool)
        .await
        .map_err(catalog_err)?;

        for row in &indexes {
            let table: String = row.try_get("table_name").map_err(catalog_err)?;
            let index_name: String = row.try_get("index_name").map_err(catalog_err)?;
            let unique: bool = row.try_get("is_unique").map_err(catalog_err)?;
            let where_clause: Option<String> = row.try_get("where_clause").map_err(catalog_err)?;
            // Expression entries have attnum 0 and no attribute name; the
            // catalog models plain-column indexes only.
            let column: Option<String> = row.try_get("column_name").map_err(catalog_err)?;

            let Some(t) = catalog.get_table_mut(&table) else {
                continue;
            };
            if let Some(existing) = t.indexes.iter_mut().find(|idx| idx.name == index_name) {
                if let Some(column) = column {
                    existing.columns.push(column);
                }
            } else {
                t.indexes.push(IndexState {
                    name: index_name.clone(),
                    columns: column.into_iter().collect(),
                    unique,
                    where_clause,
                });
                catalog.register_index(&index_name, &table);
            }
        }

        let key_constraints: Vec<PgRow> = sqlx::query(
            "SELECT tc.table_name, tc.constraint_name, tc.constraint_type, kcu.column_name \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
               ON kcu.constraint_name = tc.constraint_name \
              AND kcu.table_schema = tc.table_schema \
             WHERE tc.table_schema = $1 AND tc.table_name <> $2 \
               AND tc.constraint_type IN ('PRIMARY KEY', 'UNIQUE') \
             ORDER BY tc.table_name, tc.constraint_name, kcu.ordinal_position",
        )
        .bind(&self.schema)
        .bind(&self.ledger_table)
        .fetch_all(&self.pool)
        .await
        .map_err(catalog_err)?;

        for row in &key_constraints {
            let table: String = row.try_get("table_name").map_err(catalog_err)?;
            let constraint_name: String = row.try_get("constraint_name").map_err(catalog_err)?;
            let constraint_type: String = row.try_get("constraint_type").map_err(catalog_err)?;
            let column: String = row.try_get("column_name").map_err(catalog_err)?;

            let Some(t) = catalog.get_table_mut(&table) else {
                continue;
            };
            let is_pk = constraint_type == "PRIMARY KEY";
            let existing = t.constraints.iter_mut().find(|c| match c {
                ConstraintState::PrimaryKey { .. } => is_pk,
                ConstraintState::Unique { name: Some(n), .. } => !is_pk && *n == constraint_name,
                _ => false,
            });
            match existing {
                Some(ConstraintState::PrimaryKey { columns })
                | Some(ConstraintState::Unique { columns, .. }) => columns.push(column),
                _ => {
                    if is_pk {
                        t.constraints.push(ConstraintState::PrimaryKey {
                            columns: vec![column],
                        });
                    } else {
                        t.constraints.push(ConstraintState::Unique {
                            name: Some(constraint_name),
                            columns: vec![column],
                        });
                    }
                }
            }
        }

        let foreign_keys: Vec<PgRow> = sqlx::query(
            "SELECT tc.table_name, tc.constraint_name, kcu.column_name, \
                    ccu.table_name AS ref_table, ccu.column_name AS ref_column, rc.delete_rule \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
               ON kcu.constraint_name = tc.constraint_name \
              AND kcu.table_schema = tc.table_schema \
             JOIN information_schema.referential_constraints rc \
               ON rc.constraint_name = tc.constraint_name \
              AND rc.constraint_schema = tc.table_schema \
             JOIN information_schema.constraint_column_usage ccu \
               ON ccu.constraint_name = tc.constraint_name \
              AND ccu.table_schema = tc.table_schema \
             WHERE tc.table_schema = $1 AND tc.constraint_type = 'FOREIGN KEY' \
             ORDER BY tc.table_name, tc.constraint_name, kcu.ordinal_position",
        )
        .bind(&self.schema)
        .fetch_all(&self.pool)
        .await
        .map_err(catalog_err)?;

        for row in &foreign_keys {
            let table: String = row.try_get("table_name").map_err(catalog_err)?;
            let constraint_name: String = row.try_get("constraint_name").map_err(catalog_err)?;
            let column: String = row.try_get("column_name").map_err(catalog_err)?;
            let ref_table: String = row.try_get("ref_table").map_err(catalog_err)?;
            let ref_column: String = row.try_get("ref_column").map_err(catalog_err)?;
            let delete_rule: String = row.try_get("delete_rule").map_err(catalog_err)?;

            let Some(t) = catalog.get_table_mut(&table) else {
                continue;
            };
            let existing = t.constraints.iter_mut().find(|c| {
                matches!(c, ConstraintState::ForeignKey { name: Some(n), .. } if *n == constraint_name)
            });
            match existing {
                Some(ConstraintState::ForeignKey {
                    columns,
                    ref_columns,
                    ..
                }) => {
                    // The usage join yields one row per (column, ref_column)
                    // pair; dedup keeps composite keys in order.
                    if !columns.contains(&column) {
                        columns.push(column);
                    }
                    if !ref_columns.contains(&ref_column) {
                        ref_columns.push(ref_column);
                    }
                }
                _ => {
                    t.constraints.push(ConstraintState::ForeignKey {
                        name: Some(constraint_name),
                        columns: vec![column],
                        ref_table,
                        ref_columns: vec![ref_column],
                        on_delete: map_delete_rule(&delete_rule),
                    });
                }
            }
        }

        Ok(catalog)
    }

    async fn probe_row(&self, probe: &RowProbe) -> Result<bool, DbError> {
        // Compare textually so uuid/varchar/integer keys all bind the same
        // way. Seed keys are system-owned identifiers, not user data.
        let table = match &probe.table.schema {
            Some(schema) => format!(
                "{}.{}",
                render::quote_ident(schema),
                render::quote_ident(&probe.table.name)
            ),
            None => format!(
                "{}.{}",
                render::quote_ident(&self.schema),
                render::quote_ident(&probe.table.name)
            ),
        };
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {table} WHERE {}::text = $1)",
            render::quote_ident(&probe.key_column)
        );
        let key_text = match &probe.key {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        sqlx::query_scalar(&sql)
            .bind(key_text)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DbError::CatalogAccess(e.to_string()))
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn acquire_lock(&mut self) -> Result<(), DbError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| DbError::Lock(e.to_string()))?;
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(self.lock_key)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| DbError::Lock(e.to_string()))?;
        if !acquired {
            return Err(DbError::Lock(
                "another migration run holds the advisory lock".to_string(),
            ));
        }
        self.lock_conn = Some(conn);
        Ok(())
    }

    async fn release_lock(&mut self) -> Result<(), DbError> {
        if let Some(mut conn) = self.lock_conn.take() {
            sqlx::query("SELECT pg_advisory_unlock($1)")
                .bind(self.lock_key)
                .execute(&mut *conn)
                .await
                .map_err(|e| DbError::Lock(e.to_string()))?;
        }
        Ok(())
    }

    async fn ledger(&mut self) -> Result<Vec<MigrationRecord>, DbError> {
        self.ensure_ledger().await?;
        let sql = format!(
            "SELECT migration_id, applied_at, checksum FROM {} ORDER BY migration_id",
            self.ledger_ident()
        );
        let rows: Vec<PgRow> = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DbError::Ledger(e.to_string()))?;
        rows.iter()
            .map(|row| {
                Ok(MigrationRecord {
                    migration_id: row
                        .try_get("migration_id")
                        .map_err(|e: sqlx::Error| DbError::Ledger(e.to_string()))?,
                    applied_at: row
                        .try_get("applied_at")
                        .map_err(|e: sqlx::Error| DbError::Ledger(e.to_string()))?,
                    checksum: row
                        .try_get("checksum")
                        .map_err(|e: sqlx::Error| DbError::Ledger(e.to_string()))?,
                })
            })
            .collect()
    }

    async fn snapshot(&mut self, probes: &[RowProbe]) -> Result<Snapshot, DbError> {
        let catalog = self.introspect_catalog().await?;
        let mut snapshot = Snapshot::new(catalog);
        for probe in probes {
            // A probe against a table that does not exist yet answers
            // "absent" — the table will be created earlier in the plan or
            // the descriptor will skip on the table guard.
            let present = if snapshot.catalog.has_table(&probe.table.key()) {
                self.probe_row(probe).await?
            } else {
                false
            };
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
        self.ensure_ledger().await?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::CatalogAccess(e.to_string()))?;

        for step in steps {
            let sql = render::render(&step.op);
            sqlx::query(&sql)
                .execute(&mut *tx)
                .await
                .map_err(|e| DbError::ChangeFailed {
                    change_id: step.change_id.clone(),
                    detail: e.to_string(),
                })?;
        }

        let insert = format!(
            "INSERT INTO {} (migration_id, checksum) VALUES ($1, $2)",
            self.ledger_ident()
        );
        sqlx::query(&insert)
            .bind(migration_id)
            .bind(checksum)
            .execute(&mut *tx)
            .await
            .map_err(|e| DbError::Ledger(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| DbError::CatalogAccess(e.to_string()))
    }

    async fn apply_unchained(
        &mut self,
        migration_id: &str,
        checksum: &str,
        steps: &[PlannedStep],
    ) -> Result<(), DbError> {
        self.ensure_ledger().await?;
        for step in steps {
            let sql = render::render(&step.op);
            sqlx::query(&sql)
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::ChangeFailed {
                    change_id: step.change_id.clone(),
                    detail: e.to_string(),
                })?;
        }
        let insert = format!(
            "INSERT INTO {} (migration_id, checksum) VALUES ($1, $2)",
            self.ledger_ident()
        );
        sqlx::query(&insert)
            .bind(migration_id)
            .bind(checksum)
            .execute(&self.pool)
            .await
            .map_err(|e| DbError::Ledger(e.to_string()))?;
        Ok(())
    }

    async fn revert(&mut self, migration_id: &str, steps: &[PlannedStep]) -> Result<(), DbError> {
        self.ensure_ledger().await?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::CatalogAccess(e.to_string()))?;

        for step in steps {
            let sql = render::render(&step.op);
            sqlx::query(&sql)
                .execute(&mut *tx)
                .await
                .map_err(|e| DbError::ChangeFailed {
                    change_id: step.change_id.clone(),
                    detail: e.to_string(),
                })?;
        }

        let delete = format!(
            "DELETE FROM {} WHERE migration_id = $1",
            self.ledger_ident()
        );
        let result = sqlx::query(&delete)
            .bind(migration_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| DbError::Ledger(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(DbError::Ledger(format!(
                "migration `{migration_id}` is not recorded"
            )));
        }

        tx.commit()
            .await
            .map_err(|e| DbError::CatalogAccess(e.to_string()))
    }
}

/// Stable advisory-lock key derived from the schema and ledger table name,
/// so independent ledgers on the same server do not contend.
fn advisory_lock_key(schema: &str, ledger_table: &str) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(schema.as_bytes());
    hasher.update(b".");
    hasher.update(ledger_table.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

/// Map an `information_schema` column description to a [`TypeName`].
/// Length/precision modifiers are only meaningful for character and numeric
/// types; everything else reports spurious storage-level precision.
fn map_type(
    data_type: &str,
    char_len: Option<i32>,
    num_precision: Option<i32>,
    num_scale: Option<i32>,
) -> TypeName {
    match data_type {
        "character varying" | "character" => match char_len {
            Some(len) => TypeName::with_modifiers(data_type, vec![i64::from(len)]),
            None => TypeName::simple(data_type),
        },
        "numeric" | "decimal" => match (num_precision, num_scale) {
            (Some(p), Some(s)) => TypeName::with_modifiers(data_type, vec![i64::from(p), i64::from(s)]),
            _ => TypeName::simple(data_type),
        },
        other => TypeName::simple(other),
    }
}

fn map_delete_rule(rule: &str) -> ReferentialAction {
    match rule {
        "CASCADE" => ReferentialAction::Cascade,
        "SET NULL" => ReferentialAction::SetNull,
        "RESTRICT" => ReferentialAction::Restrict,
        _ => ReferentialAction::NoAction,
    }
}
