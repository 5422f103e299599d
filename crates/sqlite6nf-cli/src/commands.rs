//! Command implementations shared by the one-shot subcommands and the REPL.
//!
//! Every command returns JSON so the caller decides how to print it.

use anyhow::Context;
use serde_json::{json, Value as Json};

use sqlite6nf::{
    classify_script, split_statements, table_references, ConnectOptions, Rows, Selector,
    TemporalConnection, TransactionTime, Value,
};

/// Open the database with the given options.
pub fn open(path: &str, options: ConnectOptions) -> anyhow::Result<TemporalConnection> {
    TemporalConnection::open(path, options).with_context(|| format!("cannot open database {path}"))
}

/// Parse a transaction time given on the command line.
pub fn parse_time(raw: &str) -> Result<TransactionTime, String> {
    raw.parse::<TransactionTime>().map_err(|e| e.to_string())
}

pub fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Integer(i) => json!(i),
        Value::Real(f) => serde_json::Number::from_f64(*f).map_or(Json::Null, Json::Number),
        Value::Text(s) => Json::String(s.clone()),
        Value::Blob(bytes) => Json::String(bytes.iter().map(|b| format!("{b:02x}")).collect()),
    }
}

pub fn rows_to_json(rows: &Rows) -> Json {
    json!({
        "columns": rows.columns,
        "rows": rows
            .rows
            .iter()
            .map(|row| row.iter().map(value_to_json).collect::<Vec<_>>())
            .collect::<Vec<_>>(),
    })
}

/// Historize the named tables, or every eligible one when none are named.
pub fn normalize(conn: &TemporalConnection, tables: &[String]) -> anyhow::Result<Json> {
    let selector = if tables.is_empty() {
        Selector::All
    } else {
        Selector::from(tables.to_vec())
    };
    let report = conn.normalize(selector).context("normalize failed")?;
    Ok(serde_json::to_value(report)?)
}

/// Statements and FROM/JOIN references of a script, without running it.
pub fn classify(sql: &str) -> Json {
    json!({
        "statements": classify_script(sql),
        "references": table_references(sql),
    })
}

/// Run each statement of a script and collect its result set.
pub fn exec(
    conn: &TemporalConnection,
    sql: &str,
    as_of: Option<TransactionTime>,
) -> anyhow::Result<Json> {
    let mut results = Vec::new();
    for statement in split_statements(sql) {
        let rows = conn
            .query(statement.text, &[], as_of)
            .with_context(|| format!("statement failed: {}", statement.text.trim()))?;
        results.push(rows_to_json(&rows));
    }
    Ok(Json::Array(results))
}

pub fn tables(conn: &TemporalConnection) -> anyhow::Result<Json> {
    Ok(serde_json::to_value(conn.tracked_tables()?)?)
}

pub fn history(conn: &TemporalConnection, table: &str) -> anyhow::Result<Json> {
    let history = conn
        .table_history(table)
        .with_context(|| format!("no history for {table}"))?;
    Ok(serde_json::to_value(history)?)
}

/// The statement text actually run for a point-in-time read.
pub fn rewrite(conn: &TemporalConnection, sql: &str, at: TransactionTime) -> anyhow::Result<String> {
    Ok(conn.substitute(sql, Some(at))?)
}

pub fn info(database: &str, options: &ConnectOptions) -> Json {
    json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "database": database,
        "options": options,
    })
}
