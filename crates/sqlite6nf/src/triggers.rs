//! Generated triggers: the runtime mechanism that appends history rows as
//! tracked tables are used.
//!
//! Each history row is stamped with the engine clock. SQLite keeps `'now'`
//! fixed for the duration of one statement step, so all triggers fired by
//! one statement observe the same time. When a relation already holds a
//! version of the same id at or after that time (several statements within
//! one millisecond), the stamp moves one millisecond past the latest version:
//! per-id transaction-time stays strictly increasing and the
//! `(id, "transaction")` key never collides.
//!
//! The row identity is read through whichever rowid alias the table's own
//! columns leave visible; see [`row_alias`].

use crate::catalog::{instance_exist_relation, instance_relation, value_relation, PREFIX};
use crate::lexer::quote_identifier;
use crate::types::{ColumnId, TableId, SQL_NOW};

pub fn insert_instance_trigger_name(table: TableId) -> String {
    format!("{PREFIX}trigger_insert_{table}")
}

pub fn delete_instance_trigger_name(table: TableId) -> String {
    format!("{PREFIX}trigger_delete_{table}")
}

pub fn insert_value_trigger_name(table: TableId, column: ColumnId) -> String {
    format!("{PREFIX}trigger_insert_{table}_{column}")
}

pub fn update_value_trigger_name(table: TableId, column: ColumnId) -> String {
    format!("{PREFIX}trigger_update_{table}_{column}")
}

/// Names SQLite accepts for the row identity, in preference order.
pub const ROW_ALIASES: [&str; 3] = ["rowid", "_rowid_", "oid"];

/// The first rowid alias not shadowed by a declared column.
pub fn row_alias<'a>(columns: impl IntoIterator<Item = &'a str>) -> Option<&'static str> {
    let columns: Vec<&str> = columns.into_iter().collect();
    ROW_ALIASES
        .into_iter()
        .find(|alias| !columns.iter().any(|c| c.eq_ignore_ascii_case(alias)))
}

/// Stamp for a new version of `row` in `relation`.
fn stamp(relation: &str, row: &str) -> String {
    let relation = quote_identifier(relation);
    format!(
        r#"(SELECT CASE
                WHEN max("transaction") IS NULL OR max("transaction") < {SQL_NOW}
                THEN {SQL_NOW}
                ELSE strftime('%Y-%m-%d %H:%M:%f', max("transaction"), '+0.001 seconds')
            END
            FROM {relation} WHERE "id" = {row})"#
    )
}

/// AFTER INSERT on the base table: record the row identity and its existence.
pub fn insert_instance_trigger(table: TableId, table_name: &str, row: &str) -> String {
    let exist = instance_exist_relation(table);
    let row = format!("NEW.{row}");
    format!(
        r#"CREATE TRIGGER IF NOT EXISTS {trigger}
    AFTER INSERT ON {base}
    FOR EACH ROW BEGIN
        INSERT OR IGNORE INTO {instance} ("id")
        VALUES ({row});

        INSERT INTO {exist_q} ("id", "transaction", "exist")
        VALUES ({row}, {stamp}, 1);
    END"#,
        trigger = quote_identifier(&insert_instance_trigger_name(table)),
        base = quote_identifier(table_name),
        instance = quote_identifier(&instance_relation(table)),
        exist_q = quote_identifier(&exist),
        stamp = stamp(&exist, &row),
    )
}

/// AFTER DELETE on the base table: record that the row no longer exists.
pub fn delete_instance_trigger(table: TableId, table_name: &str, row: &str) -> String {
    let exist = instance_exist_relation(table);
    let row = format!("OLD.{row}");
    format!(
        r#"CREATE TRIGGER IF NOT EXISTS {trigger}
    AFTER DELETE ON {base}
    FOR EACH ROW BEGIN
        INSERT INTO {exist_q} ("id", "transaction", "exist")
        VALUES ({row}, {stamp}, 0);
    END"#,
        trigger = quote_identifier(&delete_instance_trigger_name(table)),
        base = quote_identifier(table_name),
        exist_q = quote_identifier(&exist),
        stamp = stamp(&exist, &row),
    )
}

fn value_trigger(
    trigger: &str,
    event: &str,
    table: TableId,
    column: ColumnId,
    table_name: &str,
    column_name: &str,
    row: &str,
) -> String {
    let value = value_relation(table, column);
    let row = format!("NEW.{row}");
    format!(
        r#"CREATE TRIGGER IF NOT EXISTS {trigger}
    {event} ON {base}
    FOR EACH ROW BEGIN
        INSERT INTO {value_q} ("id", "transaction", "value")
        VALUES ({row}, {stamp}, NEW.{column_q});
    END"#,
        trigger = quote_identifier(trigger),
        base = quote_identifier(table_name),
        value_q = quote_identifier(&value),
        stamp = stamp(&value, &row),
        column_q = quote_identifier(column_name),
    )
}

/// AFTER INSERT on the base table: record the column's initial value.
pub fn insert_value_trigger(
    table: TableId,
    column: ColumnId,
    table_name: &str,
    column_name: &str,
    row: &str,
) -> String {
    value_trigger(
        &insert_value_trigger_name(table, column),
        "AFTER INSERT",
        table,
        column,
        table_name,
        column_name,
        row,
    )
}

/// AFTER UPDATE OF the column: record the new value.
pub fn update_value_trigger(
    table: TableId,
    column: ColumnId,
    table_name: &str,
    column_name: &str,
    row: &str,
) -> String {
    let event = format!("AFTER UPDATE OF {}", quote_identifier(column_name));
    value_trigger(
        &update_value_trigger_name(table, column),
        &event,
        table,
        column,
        table_name,
        column_name,
        row,
    )
}
