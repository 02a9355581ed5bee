//! Change descriptors — the typed intent model for schema migrations.
//!
//! A migration is an ordered list of [`ChangeDescriptor`]s. Each descriptor
//! carries one atomic operation ([`ChangeOp`]) plus an optional
//! [`Precondition`] over introspected schema state. The planner evaluates
//! preconditions against a snapshot; a failed precondition skips the
//! descriptor, it never errors.
//!
//! Constructors attach the canonical precondition for each operation, so the
//! repetitive guard pattern ("alter only if the column still has the old
//! type") is expressed once here instead of per call site.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumIter};

use crate::seed::SeedRow;

/// Schema-qualified name. `schema` is None for unqualified references.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualifiedName {
    pub schema: Option<String>,
    pub name: String,
}

impl QualifiedName {
    pub fn unqualified(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    pub fn qualified(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }

    /// Key used for catalog lookup: `name` or `schema.name`.
    pub fn key(&self) -> String {
        match &self.schema {
            Some(s) => format!("{}.{}", s, self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(s) => write!(f, "{}.{}", s, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl From<&str> for QualifiedName {
    fn from(s: &str) -> Self {
        match s.split_once('.') {
            Some((schema, name)) => Self::qualified(schema, name),
            None => Self::unqualified(s),
        }
    }
}

/// A column type with optional modifiers. For `varchar(100)`:
/// name = "varchar", modifiers = [100].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeName {
    /// Base type name, lowercased.
    pub name: String,
    /// Type modifiers. For `numeric(10,2)`: [10, 2].
    pub modifiers: Vec<i64>,
}

impl TypeName {
    pub fn simple(name: impl Into<String>) -> Self {
        Self {
            name: name.into().to_lowercase(),
            modifiers: vec![],
        }
    }

    pub fn with_modifiers(name: impl Into<String>, modifiers: Vec<i64>) -> Self {
        Self {
            name: name.into().to_lowercase(),
            modifiers,
        }
    }

    pub fn varchar(len: i64) -> Self {
        Self::with_modifiers("varchar", vec![len])
    }

    pub fn timestamp() -> Self {
        Self::simple("timestamp")
    }

    pub fn timestamptz() -> Self {
        Self::simple("timestamptz")
    }

    /// Canonical spelling of the base type, folding PostgreSQL aliases
    /// (`character varying` = `varchar`, `timestamp with time zone` =
    /// `timestamptz`, `decimal` = `numeric`, ...). Used for guard matching
    /// so a descriptor authored with the short name still matches a catalog
    /// reporting the long form.
    pub fn canonical_name(&self) -> &str {
        canonical_type_name(&self.name)
    }

    /// Guard equality: canonical base names and modifiers both match.
    pub fn matches(&self, other: &TypeName) -> bool {
        self.canonical_name() == other.canonical_name() && self.modifiers == other.modifiers
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.modifiers.is_empty() {
            let mods: Vec<String> = self.modifiers.iter().map(|m| m.to_string()).collect();
            write!(f, "({})", mods.join(","))?;
        }
        Ok(())
    }
}

/// Fold a type name to its canonical spelling. Names outside the alias
/// table are returned as-is, so an exotic type still only matches itself.
fn canonical_type_name(name: &str) -> &str {
    match name {
        "varchar" | "character varying" => "varchar",
        "char" | "character" => "char",
        "timestamp" | "timestamp without time zone" => "timestamp",
        "timestamptz" | "timestamp with time zone" => "timestamptz",
        "time without time zone" | "time" => "time",
        "timetz" | "time with time zone" => "timetz",
        "numeric" | "decimal" => "numeric",
        "int" | "integer" | "int4" => "integer",
        "bigint" | "int8" => "bigint",
        "smallint" | "int2" => "smallint",
        "bool" | "boolean" => "boolean",
        "varbit" | "bit varying" => "varbit",
        "float8" | "double precision" => "double precision",
        "float4" | "real" => "real",
        "text" => "text",
        "uuid" => "uuid",
        "date" => "date",
        "bytea" => "bytea",
        "json" => "json",
        "jsonb" => "jsonb",
        "serial" => "serial",
        "bigserial" => "bigserial",
        other => other,
    }
}

/// A column definition used by `CreateTable` and `AddColumn`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub type_name: TypeName,
    /// true = nullable (the default), false = NOT NULL.
    pub nullable: bool,
    /// Raw SQL default expression (`"''"`, `"now()"`, `"0"`), if any.
    pub default: Option<String>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, type_name: TypeName) -> Self {
        Self {
            name: name.into(),
            type_name,
            nullable: true,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default_sql(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }
}

/// Referential action for foreign keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumIter)]
pub enum ReferentialAction {
    #[strum(serialize = "NO ACTION")]
    NoAction,
    #[strum(serialize = "CASCADE")]
    Cascade,
    #[strum(serialize = "SET NULL")]
    SetNull,
    #[strum(serialize = "RESTRICT")]
    Restrict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeySpec {
    pub name: String,
    pub columns: Vec<String>,
    pub ref_table: QualifiedName,
    pub ref_columns: Vec<String>,
    pub on_delete: ReferentialAction,
}

impl ForeignKeySpec {
    pub fn new(
        name: impl Into<String>,
        columns: &[&str],
        ref_table: impl Into<QualifiedName>,
        ref_columns: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|s| s.to_string()).collect(),
            ref_table: ref_table.into(),
            ref_columns: ref_columns.iter().map(|s| s.to_string()).collect(),
            on_delete: ReferentialAction::NoAction,
        }
    }

    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = action;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniqueSpec {
    pub name: String,
    pub columns: Vec<String>,
}

/// Full definition of a table to create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: QualifiedName,
    pub columns: Vec<ColumnSpec>,
    pub primary_key: Vec<String>,
    pub uniques: Vec<UniqueSpec>,
    pub foreign_keys: Vec<ForeignKeySpec>,
}

impl TableSpec {
    pub fn new(name: impl Into<QualifiedName>) -> Self {
        Self {
            name: name.into(),
            columns: vec![],
            primary_key: vec![],
            uniques: vec![],
            foreign_keys: vec![],
        }
    }

    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn unique(mut self, name: impl Into<String>, columns: &[&str]) -> Self {
        self.uniques.push(UniqueSpec {
            name: name.into(),
            columns: columns.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn foreign_key(mut self, fk: ForeignKeySpec) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    pub fn get_column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Index definition. `concurrent` indexes cannot run inside a transaction;
/// the runner refuses them in transactional mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub table: QualifiedName,
    pub columns: Vec<String>,
    pub unique: bool,
    pub where_clause: Option<String>,
    pub concurrent: bool,
}

impl IndexSpec {
    pub fn new(name: impl Into<String>, table: impl Into<QualifiedName>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            columns: columns.iter().map(|s| s.to_string()).collect(),
            unique: false,
            where_clause: None,
            concurrent: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn filtered(mut self, where_clause: impl Into<String>) -> Self {
        self.where_clause = Some(where_clause.into());
        self
    }

    pub fn concurrently(mut self) -> Self {
        self.concurrent = true;
        self
    }
}

/// A row of values keyed by column name. BTreeMap keeps serialization
/// order deterministic for checksums.
pub type RowValues = BTreeMap<String, Value>;

/// One atomic structural or data operation.
///
/// Destructive variants carry an optional `prior` shape: the exact
/// definition of the object being removed, captured at authoring time so
/// rollback can reconstruct it. Inversion fails without it — the object no
/// longer exists in the catalog by the time a Down runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChangeOp {
    CreateTable {
        spec: TableSpec,
    },
    DropTable {
        table: QualifiedName,
        prior: Option<TableSpec>,
    },
    AddColumn {
        table: QualifiedName,
        column: ColumnSpec,
    },
    DropColumn {
        table: QualifiedName,
        column: String,
        prior: Option<ColumnSpec>,
    },
    AlterColumnType {
        table: QualifiedName,
        column: String,
        new_type: TypeName,
        /// Optional `USING` expression for casts PostgreSQL cannot infer.
        using: Option<String>,
    },
    AlterColumnNullability {
        table: QualifiedName,
        column: String,
        nullable: bool,
    },
    CreateIndex {
        spec: IndexSpec,
    },
    DropIndex {
        name: String,
        prior: Option<IndexSpec>,
    },
    AddForeignKey {
        table: QualifiedName,
        spec: ForeignKeySpec,
    },
    DropForeignKey {
        table: QualifiedName,
        name: String,
        prior: Option<ForeignKeySpec>,
    },
    InsertRow {
        table: QualifiedName,
        key_column: String,
        row: RowValues,
    },
    DeleteRow {
        table: QualifiedName,
        key_column: String,
        key: Value,
        prior: Option<RowValues>,
    },
}

/// Operation kind, for logging and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumIter)]
pub enum ChangeKind {
    CreateTable,
    DropTable,
    AddColumn,
    DropColumn,
    AlterColumnType,
    AlterColumnNullability,
    CreateIndex,
    DropIndex,
    AddForeignKey,
    DropForeignKey,
    InsertRow,
    DeleteRow,
}

impl ChangeOp {
    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeOp::CreateTable { .. } => ChangeKind::CreateTable,
            ChangeOp::DropTable { .. } => ChangeKind::DropTable,
            ChangeOp::AddColumn { .. } => ChangeKind::AddColumn,
            ChangeOp::DropColumn { .. } => ChangeKind::DropColumn,
            ChangeOp::AlterColumnType { .. } => ChangeKind::AlterColumnType,
            ChangeOp::AlterColumnNullability { .. } => ChangeKind::AlterColumnNullability,
            ChangeOp::CreateIndex { .. } => ChangeKind::CreateIndex,
            ChangeOp::DropIndex { .. } => ChangeKind::DropIndex,
            ChangeOp::AddForeignKey { .. } => ChangeKind::AddForeignKey,
            ChangeOp::DropForeignKey { .. } => ChangeKind::DropForeignKey,
            ChangeOp::InsertRow { .. } => ChangeKind::InsertRow,
            ChangeOp::DeleteRow { .. } => ChangeKind::DeleteRow,
        }
    }

    /// The table this operation addresses, if any. `DropIndex` resolves its
    /// table through the catalog, not the descriptor.
    pub fn table(&self) -> Option<&QualifiedName> {
        match self {
            ChangeOp::CreateTable { spec } => Some(&spec.name),
            ChangeOp::DropTable { table, .. }
            | ChangeOp::AddColumn { table, .. }
            | ChangeOp::DropColumn { table, .. }
            | ChangeOp::AlterColumnType { table, .. }
            | ChangeOp::AlterColumnNullability { table, .. }
            | ChangeOp::AddForeignKey { table, .. }
            | ChangeOp::DropForeignKey { table, .. }
            | ChangeOp::InsertRow { table, .. }
            | ChangeOp::DeleteRow { table, .. } => Some(table),
            ChangeOp::CreateIndex { spec } => Some(&spec.table),
            ChangeOp::DropIndex { .. } => None,
        }
    }

    /// True for operations that cannot run inside a transaction.
    pub fn requires_own_transaction(&self) -> bool {
        match self {
            ChangeOp::CreateIndex { spec } => spec.concurrent,
            _ => false,
        }
    }
}

/// A predicate over introspected schema state. Evaluated by the planner
/// before an operation is applied; a false predicate skips the descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Precondition {
    TableExists(QualifiedName),
    TableAbsent(QualifiedName),
    ColumnExists {
        table: QualifiedName,
        column: String,
    },
    ColumnAbsent {
        table: QualifiedName,
        column: String,
    },
    /// Column exists and its current type matches. This is the guard every
    /// type alteration carries: re-running against an already-converted
    /// column is a no-op, not an error.
    ColumnHasType {
        table: QualifiedName,
        column: String,
        type_name: TypeName,
    },
    ColumnNullability {
        table: QualifiedName,
        column: String,
        nullable: bool,
    },
    IndexExists(String),
    IndexAbsent(String),
    ForeignKeyExists {
        table: QualifiedName,
        name: String,
    },
    ForeignKeyAbsent {
        table: QualifiedName,
        name: String,
    },
    RowExists {
        table: QualifiedName,
        key_column: String,
        key: Value,
    },
    RowAbsent {
        table: QualifiedName,
        key_column: String,
        key: Value,
    },
}

/// One atomic intended change: an operation plus its guard.
///
/// The `id` is assigned when the descriptor is added to a [`Migration`]
/// (`<migration-id>/<ordinal>`), so failures and skips can name the exact
/// descriptor involved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeDescriptor {
    pub id: String,
    pub op: ChangeOp,
    pub precondition: Option<Precondition>,
}

impl ChangeDescriptor {
    fn bare(op: ChangeOp) -> Self {
        Self {
            id: String::new(),
            op,
            precondition: None,
        }
    }

    fn guarded(op: ChangeOp, precondition: Precondition) -> Self {
        Self {
            id: String::new(),
            op,
            precondition: Some(precondition),
        }
    }

    pub fn create_table(spec: TableSpec) -> Self {
        Self::bare(ChangeOp::CreateTable { spec })
    }

    /// Drop a table, capturing its full prior definition for rollback.
    pub fn drop_table(table: impl Into<QualifiedName>, prior: TableSpec) -> Self {
        Self::bare(ChangeOp::DropTable {
            table: table.into(),
            prior: Some(prior),
        })
    }

    pub fn add_column(table: impl Into<QualifiedName>, column: ColumnSpec) -> Self {
        Self::bare(ChangeOp::AddColumn {
            table: table.into(),
            column,
        })
    }

    /// Drop a column, capturing its prior definition for rollback.
    pub fn drop_column(table: impl Into<QualifiedName>, prior: ColumnSpec) -> Self {
        let table = table.into();
        Self::bare(ChangeOp::DropColumn {
            table,
            column: prior.name.clone(),
            prior: Some(prior),
        })
    }

    /// Change a column's type, guarded on the expected current type.
    /// Skipped when the column is absent or already converted.
    pub fn alter_column_type(
        table: impl Into<QualifiedName>,
        column: impl Into<String>,
        from: TypeName,
        to: TypeName,
    ) -> Self {
        let table = table.into();
        let column = column.into();
        Self::guarded(
            ChangeOp::AlterColumnType {
                table: table.clone(),
                column: column.clone(),
                new_type: to,
                using: None,
            },
            Precondition::ColumnHasType {
                table,
                column,
                type_name: from,
            },
        )
    }

    /// Attach a `USING` cast expression to an `AlterColumnType` descriptor.
    pub fn with_using(mut self, expr: impl Into<String>) -> Self {
        if let ChangeOp::AlterColumnType { using, .. } = &mut self.op {
            *using = Some(expr.into());
        }
        self
    }

    /// Change a column's nullability, guarded on the expected current state.
    pub fn alter_column_nullability(
        table: impl Into<QualifiedName>,
        column: impl Into<String>,
        from_nullable: bool,
        nullable: bool,
    ) -> Self {
        let table = table.into();
        let column = column.into();
        Self::guarded(
            ChangeOp::AlterColumnNullability {
                table: table.clone(),
                column: column.clone(),
                nullable,
            },
            Precondition::ColumnNullability {
                table,
                column,
                nullable: from_nullable,
            },
        )
    }

    pub fn create_index(spec: IndexSpec) -> Self {
        Self::bare(ChangeOp::CreateIndex { spec })
    }

    /// Drop an index, capturing its prior definition for rollback.
    pub fn drop_index(prior: IndexSpec) -> Self {
        Self::bare(ChangeOp::DropIndex {
            name: prior.name.clone(),
            prior: Some(prior),
        })
    }

    pub fn add_foreign_key(table: impl Into<QualifiedName>, spec: ForeignKeySpec) -> Self {
        Self::bare(ChangeOp::AddForeignKey {
            table: table.into(),
            spec,
        })
    }

    /// Drop a foreign key, capturing its prior definition for rollback.
    pub fn drop_foreign_key(table: impl Into<QualifiedName>, prior: ForeignKeySpec) -> Self {
        Self::bare(ChangeOp::DropForeignKey {
            table: table.into(),
            name: prior.name.clone(),
            prior: Some(prior),
        })
    }

    /// Insert a row keyed by a stable identifier, skipped when the key is
    /// already present.
    pub fn insert_row(
        table: impl Into<QualifiedName>,
        key_column: impl Into<String>,
        row: RowValues,
    ) -> Self {
        Self::bare(ChangeOp::InsertRow {
            table: table.into(),
            key_column: key_column.into(),
            row,
        })
    }

    /// Delete a row by its stable key, capturing the prior values for
    /// rollback. Skipped when the key is absent.
    pub fn delete_row(
        table: impl Into<QualifiedName>,
        key_column: impl Into<String>,
        key: Value,
        prior: Option<RowValues>,
    ) -> Self {
        Self::bare(ChangeOp::DeleteRow {
            table: table.into(),
            key_column: key_column.into(),
            key,
            prior,
        })
    }

    /// Replace the auto-attached precondition. Rarely needed; `None` makes
    /// the operation unconditional apart from intrinsic applicability checks.
    pub fn with_precondition(mut self, precondition: Option<Precondition>) -> Self {
        self.precondition = precondition;
        self
    }
}

/// Emit one guarded type alteration per `(table, columns)` entry.
///
/// This is the data-driven form of the "alter every timestamp column"
/// pattern: instead of hand-writing one guarded block per column, list the
/// targets once and derive identical descriptors for each.
pub fn retype_sweep(
    targets: &[(&str, &[&str])],
    from: TypeName,
    to: TypeName,
) -> Vec<ChangeDescriptor> {
    let mut changes = Vec::new();
    for (table, columns) in targets {
        for column in *columns {
            changes.push(ChangeDescriptor::alter_column_type(
                *table,
                *column,
                from.clone(),
                to.clone(),
            ));
        }
    }
    changes
}

/// An ordered, atomic batch of changes applied once and recorded in the
/// ledger. Identifiers sort lexicographically; a timestamp prefix
/// (`20240101120000_description`) gives the strict total order the ledger
/// enforces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Migration {
    pub id: String,
    pub changes: Vec<ChangeDescriptor>,
    pub seeds: Vec<SeedRow>,
}

impl Migration {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            changes: vec![],
            seeds: vec![],
        }
    }

    /// Append a descriptor, assigning its stable id
    /// (`<migration-id>/<ordinal>`).
    pub fn change(mut self, mut descriptor: ChangeDescriptor) -> Self {
        descriptor.id = format!("{}/{:04}", self.id, self.changes.len());
        self.changes.push(descriptor);
        self
    }

    /// Append descriptors in order, assigning ids.
    pub fn extend(mut self, descriptors: Vec<ChangeDescriptor>) -> Self {
        for d in descriptors {
            self = self.change(d);
        }
        self
    }

    /// Attach a seed row, reconciled independently of structural changes.
    pub fn seed(mut self, row: SeedRow) -> Self {
        self.seeds.push(row);
        self
    }

    /// True if any change cannot run inside a transaction.
    pub fn requires_non_transactional(&self) -> bool {
        self.changes.iter().any(|c| c.op.requires_own_transaction())
    }
}
