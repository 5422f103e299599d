//! Narrow capability interface over the underlying SQL engine.
//!
//! The catalog, normalizer and rewriter only ever talk to an [`Engine`];
//! the rusqlite implementation lives here.

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Statement};
use serde::{Deserialize, Serialize};

use crate::types::{TemporalError, TemporalResult, TransactionTime, SQL_NOW};

/// How `begin` acquires locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    #[default]
    Deferred,
    Immediate,
    Exclusive,
}

impl IsolationLevel {
    pub fn begin_sql(self) -> &'static str {
        match self {
            IsolationLevel::Deferred => "BEGIN DEFERRED TRANSACTION",
            IsolationLevel::Immediate => "BEGIN IMMEDIATE TRANSACTION",
            IsolationLevel::Exclusive => "BEGIN EXCLUSIVE TRANSACTION",
        }
    }
}

impl std::str::FromStr for IsolationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deferred" => Ok(IsolationLevel::Deferred),
            "immediate" => Ok(IsolationLevel::Immediate),
            "exclusive" => Ok(IsolationLevel::Exclusive),
            other => Err(format!("unknown isolation level: {other}")),
        }
    }
}

/// A fully materialized query result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Rows {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of the named column in the given row.
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.columns.iter().position(|c| c.eq_ignore_ascii_case(column))?;
        self.rows.get(row)?.get(idx)
    }
}

/// The statement-level operations the temporal layer needs.
pub trait Engine {
    /// Run one statement, returning the number of changed rows.
    fn execute(&self, sql: &str, params: &[Value]) -> rusqlite::Result<usize>;

    /// Run a script of zero or more statements without parameters.
    fn execute_batch(&self, sql: &str) -> rusqlite::Result<()>;

    /// Run one statement and collect every row it returns.
    fn query(&self, sql: &str, params: &[Value]) -> rusqlite::Result<Rows>;

    /// Whether an explicit transaction is open.
    fn in_transaction(&self) -> bool;

    fn begin(&self, level: IsolationLevel) -> rusqlite::Result<()> {
        self.execute_batch(level.begin_sql())
    }

    fn commit(&self) -> rusqlite::Result<()> {
        self.execute_batch("COMMIT TRANSACTION")
    }

    fn rollback(&self) -> rusqlite::Result<()> {
        self.execute_batch("ROLLBACK TRANSACTION")
    }
}

impl Engine for Connection {
    fn execute(&self, sql: &str, params: &[Value]) -> rusqlite::Result<usize> {
        Connection::execute(self, sql, params_from_iter(params.iter()))
    }

    fn execute_batch(&self, sql: &str) -> rusqlite::Result<()> {
        Connection::execute_batch(self, sql)
    }

    fn query(&self, sql: &str, params: &[Value]) -> rusqlite::Result<Rows> {
        let mut stmt = self.prepare(sql)?;
        collect_rows(&mut stmt, params)
    }

    fn in_transaction(&self) -> bool {
        !self.is_autocommit()
    }
}

/// Read the engine clock, the same clock the triggers stamp history with.
pub fn clock<E: Engine + ?Sized>(engine: &E) -> TemporalResult<TransactionTime> {
    let rows = engine.query(&format!("SELECT {SQL_NOW}"), &[])?;
    match rows.rows.first().and_then(|r| r.first()) {
        Some(Value::Text(now)) => now.parse(),
        other => Err(TemporalError::InvalidTime(format!("{other:?}"))),
    }
}

/// Run a prepared statement and materialize every row.
pub(crate) fn collect_rows(stmt: &mut Statement<'_>, params: &[Value]) -> rusqlite::Result<Rows> {
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();

    let mut rows = Vec::new();
    let mut cursor = stmt.query(params_from_iter(params.iter()))?;
    while let Some(row) = cursor.next()? {
        let mut values = Vec::with_capacity(width);
        for idx in 0..width {
            values.push(row.get::<_, Value>(idx)?);
        }
        rows.push(values);
    }

    Ok(Rows { columns, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_collects_rows_and_columns() {
        let conn = Connection::open_in_memory().unwrap();
        Engine::execute_batch(&conn, "CREATE TABLE t(a, b); INSERT INTO t VALUES (1, 'x'), (2, NULL);")
            .unwrap();

        let rows = Engine::query(&conn, "SELECT a, b FROM t WHERE a >= ?1 ORDER BY a", &[Value::Integer(1)])
            .unwrap();
        assert_eq!(rows.columns, vec!["a", "b"]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.get(0, "B"), Some(&Value::Text("x".into())));
        assert_eq!(rows.get(1, "b"), Some(&Value::Null));
    }

    #[test]
    fn test_transaction_state_follows_begin_and_commit() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(!Engine::in_transaction(&conn));
        conn.begin(IsolationLevel::Immediate).unwrap();
        assert!(Engine::in_transaction(&conn));
        conn.commit().unwrap();
        assert!(!Engine::in_transaction(&conn));
    }

    #[test]
    fn test_rollback_discards_work() {
        let conn = Connection::open_in_memory().unwrap();
        Engine::execute_batch(&conn, "CREATE TABLE t(a)").unwrap();
        conn.begin(IsolationLevel::Deferred).unwrap();
        Engine::execute(&conn, "INSERT INTO t VALUES (?1)", &[Value::Integer(7)]).unwrap();
        conn.rollback().unwrap();

        let rows = Engine::query(&conn, "SELECT count(*) FROM t", &[]).unwrap();
        assert_eq!(rows.rows[0][0], Value::Integer(0));
    }

    #[test]
    fn test_clock_tracks_wall_time() {
        let conn = Connection::open_in_memory().unwrap();
        let before = TransactionTime::now();
        let now = clock(&conn).unwrap();
        assert!(now >= before);
    }

    #[test]
    fn test_isolation_level_parse() {
        assert_eq!("IMMEDIATE".parse::<IsolationLevel>().unwrap(), IsolationLevel::Immediate);
        assert!("serializable".parse::<IsolationLevel>().is_err());
    }
}
