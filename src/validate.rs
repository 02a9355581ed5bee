//! Authoring-time migration validation.
//!
//! These checks run before planning and catch descriptor-list mistakes the
//! planner's guards cannot: a new table missing the tenant column, an
//! unguarded type change that would not survive re-application, a
//! destructive change with no captured prior shape (rolling it back will
//! fail), duplicate descriptor ids. In strict mode the runner refuses to
//! apply a migration with error-level issues.

use std::collections::HashSet;
use std::fmt;

use strum_macros::Display;

use crate::change::{ChangeOp, Migration, Precondition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
pub enum IssueSeverity {
    #[strum(serialize = "WARNING")]
    Warning,
    #[strum(serialize = "ERROR")]
    Error,
}

#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub change_id: String,
    pub severity: IssueSeverity,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.severity, self.change_id, self.message)
    }
}

/// What the validator enforces, derived from runner configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    /// When set, every created table must carry this column with a default.
    /// Reads scoped by tenant silently exclude rows where the column is
    /// missing or NULL, so a safe default is part of the invariant.
    pub tenant_column: Option<String>,
    /// Table keys exempt from the tenant-column requirement (global,
    /// non-tenant entities).
    pub tenant_exempt: Vec<String>,
}

/// Validate a migration's descriptor list. Returns all issues found, in
/// descriptor order.
pub fn validate_migration(migration: &Migration, options: &ValidateOptions) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let mut seen_ids: HashSet<&str> = HashSet::new();

    for descriptor in &migration.changes {
        if !seen_ids.insert(&descriptor.id) {
            issues.push(ValidationIssue {
                change_id: descriptor.id.clone(),
                severity: IssueSeverity::Error,
                message: "duplicate change id".to_string(),
            });
        }

        match &descriptor.op {
            ChangeOp::AlterColumnType { .. } => {
                if !matches!(
                    descriptor.precondition,
                    Some(Precondition::ColumnHasType { .. })
                ) {
                    issues.push(ValidationIssue {
                        change_id: descriptor.id.clone(),
                        severity: IssueSeverity::Error,
                        message: "type change carries no expected-type guard; \
                                  re-application against a migrated schema would not be a no-op"
                            .to_string(),
                    });
                }
            }
            ChangeOp::AlterColumnNullability { .. } => {
                if !matches!(
                    descriptor.precondition,
                    Some(Precondition::ColumnNullability { .. })
                ) {
                    issues.push(ValidationIssue {
                        change_id: descriptor.id.clone(),
                        severity: IssueSeverity::Error,
                        message: "nullability change carries no expected-state guard".to_string(),
                    });
                }
            }
            ChangeOp::DropTable { prior: None, .. }
            | ChangeOp::DropColumn { prior: None, .. }
            | ChangeOp::DropIndex { prior: None, .. }
            | ChangeOp::DropForeignKey { prior: None, .. }
            | ChangeOp::DeleteRow { prior: None, .. } => {
                issues.push(ValidationIssue {
                    change_id: descriptor.id.clone(),
                    severity: IssueSeverity::Warning,
                    message: "destructive change has no captured prior shape; \
                              rollback of this migration will fail"
                        .to_string(),
                });
            }
            ChangeOp::InsertRow {
                key_column, row, ..
            } => {
                if !row.contains_key(key_column) {
                    issues.push(ValidationIssue {
                        change_id: descriptor.id.clone(),
                        severity: IssueSeverity::Error,
                        message: format!("inserted row has no value for key column `{key_column}`"),
                    });
                }
            }
            ChangeOp::CreateTable { spec } => {
                if let Some(tenant_column) = &options.tenant_column {
                    let key = spec.name.key();
                    if !options.tenant_exempt.contains(&key) {
                        match spec.get_column(tenant_column) {
                            None => issues.push(ValidationIssue {
                                change_id: descriptor.id.clone(),
                                severity: IssueSeverity::Error,
                                message: format!(
                                    "new table {key} has no `{tenant_column}` column; \
                                     tenant-scoped reads would never see its rows"
                                ),
                            }),
                            Some(column) if column.default.is_none() => {
                                issues.push(ValidationIssue {
                                    change_id: descriptor.id.clone(),
                                    severity: IssueSeverity::Error,
                                    message: format!(
                                        "`{tenant_column}` on {key} has no default; \
                                         legacy rows would be invisible to tenant-scoped reads"
                                    ),
                                });
                            }
                            Some(_) => {}
                        }
                    }
                }
            }
            _ => {}
        }
    }

    issues
}

/// True if any issue is error-level.
pub fn has_errors(issues: &[ValidationIssue]) -> bool {
    issues.iter().any(|i| i.severity == IssueSeverity::Error)
}
