//! SQL rendering — turns planned operations into PostgreSQL statements.
//!
//! One statement per operation. Identifiers are always double-quoted and
//! string literals single-quote-escaped, so generated SQL is safe for any
//! name the descriptor model can express. Guards are NOT rendered — by the
//! time an operation reaches the renderer the planner has already decided
//! it applies.

use serde_json::Value;

use crate::change::{ChangeOp, ColumnSpec, QualifiedName, ReferentialAction, TypeName};

/// Render a planned operation as a single SQL statement (no trailing
/// semicolon).
pub fn render(op: &ChangeOp) -> String {
    match op {
        ChangeOp::CreateTable { spec } => {
            let mut items: Vec<String> = spec.columns.iter().map(render_column).collect();
            if !spec.primary_key.is_empty() {
                items.push(format!("PRIMARY KEY ({})", ident_list(&spec.primary_key)));
            }
            for unique in &spec.uniques {
                items.push(format!(
                    "CONSTRAINT {} UNIQUE ({})",
                    quote_ident(&unique.name),
                    ident_list(&unique.columns)
                ));
            }
            for fk in &spec.foreign_keys {
                items.push(format!(
                    "CONSTRAINT {} {}",
                    quote_ident(&fk.name),
                    foreign_key_body(&fk.columns, &fk.ref_table, &fk.ref_columns, fk.on_delete)
                ));
            }
            format!(
                "CREATE TABLE {} ({})",
                qualified(&spec.name),
                items.join(", ")
            )
        }
        ChangeOp::DropTable { table, .. } => format!("DROP TABLE {}", qualified(table)),
        ChangeOp::AddColumn { table, column } => format!(
            "ALTER TABLE {} ADD COLUMN {}",
            qualified(table),
            render_column(column)
        ),
        ChangeOp::DropColumn { table, column, .. } => format!(
            "ALTER TABLE {} DROP COLUMN {}",
            qualified(table),
            quote_ident(column)
        ),
        ChangeOp::AlterColumnType {
            table,
            column,
            new_type,
            using,
        } => {
            let mut sql = format!(
                "ALTER TABLE {} ALTER COLUMN {} TYPE {}",
                qualified(table),
                quote_ident(column),
                render_type(new_type)
            );
            if let Some(expr) = using {
                sql.push_str(" USING ");
                sql.push_str(expr);
            }
            sql
        }
        ChangeOp::AlterColumnNullability {
            table,
            column,
            nullable,
        } => format!(
            "ALTER TABLE {} ALTER COLUMN {} {} NOT NULL",
            qualified(table),
            quote_ident(column),
            if *nullable { "DROP" } else { "SET" }
        ),
        ChangeOp::CreateIndex { spec } => {
            let mut sql = String::from("CREATE ");
            if spec.unique {
                sql.push_str("UNIQUE ");
            }
            sql.push_str("INDEX ");
            if spec.concurrent {
                sql.push_str("CONCURRENTLY ");
            }
            sql.push_str(&format!(
                "{} ON {} ({})",
                quote_ident(&spec.name),
                qualified(&spec.table),
                ident_list(&spec.columns)
            ));
            if let Some(where_clause) = &spec.where_clause {
                sql.push_str(" WHERE ");
                sql.push_str(where_clause);
            }
            sql
        }
        ChangeOp::DropIndex { name, .. } => format!("DROP INDEX {}", quote_ident(name)),
        ChangeOp::AddForeignKey { table, spec } => format!(
            "ALTER TABLE {} ADD CONSTRAINT {} {}",
            qualified(table),
            quote_ident(&spec.name),
            foreign_key_body(&spec.columns, &spec.ref_table, &spec.ref_columns, spec.on_delete)
        ),
        ChangeOp::DropForeignKey { table, name, .. } => format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            qualified(table),
            quote_ident(name)
        ),
        ChangeOp::InsertRow { table, row, .. } => {
            let columns: Vec<&String> = row.keys().collect();
            let values: Vec<String> = row.values().map(literal).collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                qualified(table),
                columns
                    .iter()
                    .map(|c| quote_ident(c))
                    .collect::<Vec<_>>()
                    .join(", "),
                values.join(", ")
            )
        }
        ChangeOp::DeleteRow {
            table,
            key_column,
            key,
            ..
        } => format!(
            "DELETE FROM {} WHERE {} = {}",
            qualified(table),
            quote_ident(key_column),
            literal(key)
        ),
    }
}

/// Quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn qualified(name: &QualifiedName) -> String {
    match &name.schema {
        Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&name.name)),
        None => quote_ident(&name.name),
    }
}

fn ident_list(names: &[String]) -> String {
    names
        .iter()
        .map(|n| quote_ident(n))
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_type(type_name: &TypeName) -> String {
    type_name.to_string()
}

fn render_column(column: &ColumnSpec) -> String {
    let mut sql = format!("{} {}", quote_ident(&column.name), render_type(&column.type_name));
    if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default {
        sql.push_str(" DEFAULT ");
        sql.push_str(default);
    }
    sql
}

fn foreign_key_body(
    columns: &[String],
    ref_table: &QualifiedName,
    ref_columns: &[String],
    on_delete: ReferentialAction,
) -> String {
    let mut sql = format!(
        "FOREIGN KEY ({}) REFERENCES {} ({})",
        ident_list(columns),
        qualified(ref_table),
        ident_list(ref_columns)
    );
    if on_delete != ReferentialAction::NoAction {
        sql.push_str(" ON DELETE ");
        sql.push_str(&on_delete.to_string());
    }
    sql
}

/// Render a JSON value as a SQL literal. Strings are quote-escaped;
/// arrays/objects become JSON text literals.
fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote_literal(s),
        Value::Array(_) | Value::Object(_) => quote_literal(&value.to_string()),
    }
}

fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}
