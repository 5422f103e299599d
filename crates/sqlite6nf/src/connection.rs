//! TemporalConnection: the public entry point.
//!
//! Wraps a `rusqlite::Connection` by composition. Every statement passes
//! through the classifier first; statements given an as-of time are
//! rewritten to read tracked tables from their history.

use std::path::Path;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};

use crate::catalog::{Catalog, TableHistory, TrackedTable};
use crate::classifier::{classify_script, ClassifiedStatement};
use crate::config::ConnectOptions;
use crate::engine::{collect_rows, Engine, IsolationLevel, Rows};
use crate::normalizer::{NormalizeReport, Normalizer};
use crate::rewrite::rewrite_as_of;
use crate::types::{Selector, TemporalError, TemporalResult, TransactionTime};

pub struct TemporalConnection {
    conn: Connection,
    options: ConnectOptions,
}

impl TemporalConnection {
    /// Open a database file with explicit options.
    pub fn open(path: impl AsRef<Path>, options: ConnectOptions) -> TemporalResult<Self> {
        let path = path.as_ref();
        tracing::debug!("Opening {}", path.display());
        let conn = Connection::open_with_flags(path, options.open_flags())?;
        Self::from_connection(conn, options)
    }

    pub fn open_in_memory() -> TemporalResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, ConnectOptions::default())
    }

    /// Wrap an already-open connection, applying the runtime options.
    pub fn from_connection(conn: Connection, options: ConnectOptions) -> TemporalResult<Self> {
        conn.busy_timeout(options.timeout())?;
        conn.set_prepared_statement_cache_capacity(options.cached_statements);
        conn.pragma_update(None, "foreign_keys", options.foreign_keys)?;
        Ok(Self { conn, options })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn into_inner(self) -> Connection {
        self.conn
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// Classify a script without running it.
    ///
    /// Structural statements against tracked tables are reported with a
    /// warning: the catalog does not follow `ALTER TABLE` or `DROP TABLE`.
    pub fn simulate(&self, sql: &str) -> TemporalResult<Vec<ClassifiedStatement>> {
        let statements = classify_script(sql);
        let catalog = Catalog::new(&self.conn);

        for statement in &statements {
            let Some(kind) = &statement.kind else {
                continue;
            };
            let Some(object) = kind.object() else {
                continue;
            };
            if kind.alters_table()
                && object.in_main_schema()
                && catalog.is_tracked(&object.table.value())?
            {
                tracing::warn!(
                    "Structural change to tracked table {}: history is not updated",
                    object.table.value()
                );
            }
        }

        Ok(statements)
    }

    /// The statement text that would actually be run.
    pub fn substitute(&self, sql: &str, as_of: Option<TransactionTime>) -> TemporalResult<String> {
        self.simulate(sql)?;
        match as_of {
            Some(at) => rewrite_as_of(&self.conn, sql, at),
            None => Ok(sql.to_string()),
        }
    }

    pub fn execute(
        &self,
        sql: &str,
        params: &[Value],
        as_of: Option<TransactionTime>,
    ) -> TemporalResult<usize> {
        let sql = self.substitute(sql, as_of)?;
        Ok(Engine::execute(self, &sql, params)?)
    }

    /// Run one statement once per parameter set, atomically.
    ///
    /// Returns the total number of changed rows. Inside a caller's
    /// transaction the batch enlists in it instead.
    pub fn execute_many<P>(
        &self,
        sql: &str,
        param_sets: impl IntoIterator<Item = P>,
        as_of: Option<TransactionTime>,
    ) -> TemporalResult<usize>
    where
        P: AsRef<[Value]>,
    {
        let sql = self.substitute(sql, as_of)?;
        self.atomically(|| {
            let mut stmt = self.conn.prepare_cached(&sql)?;
            let mut changed = 0;
            for params in param_sets {
                changed += stmt.execute(params_from_iter(params.as_ref().iter()))?;
            }
            Ok(changed)
        })
    }

    /// Run a script of statements without parameters.
    pub fn execute_script(&self, sql: &str, as_of: Option<TransactionTime>) -> TemporalResult<()> {
        let sql = self.substitute(sql, as_of)?;
        self.conn.execute_batch(&sql)?;
        Ok(())
    }

    pub fn query(
        &self,
        sql: &str,
        params: &[Value],
        as_of: Option<TransactionTime>,
    ) -> TemporalResult<Rows> {
        let sql = self.substitute(sql, as_of)?;
        Ok(Engine::query(self, &sql, params)?)
    }

    /// Historize the selected tables. See [`Normalizer`].
    pub fn normalize(&self, selector: impl Into<Selector>) -> TemporalResult<NormalizeReport> {
        Normalizer::new(self).run(&selector.into())
    }

    pub fn tracked_tables(&self) -> TemporalResult<Vec<TrackedTable>> {
        Catalog::new(self).tracked_tables()
    }

    /// Catalog history of a tracked table, looked up by current name.
    pub fn table_history(&self, name: &str) -> TemporalResult<TableHistory> {
        let catalog = Catalog::new(self);
        let table = catalog
            .find(name)?
            .ok_or_else(|| TemporalError::TableNotFound(name.to_string()))?;
        catalog.history(table.id)
    }

    /// Open a transaction at the configured isolation level.
    pub fn begin(&self) -> TemporalResult<()> {
        Ok(Engine::begin(self, self.options.isolation)?)
    }

    pub fn commit(&self) -> TemporalResult<()> {
        Ok(Engine::commit(self)?)
    }

    pub fn rollback(&self) -> TemporalResult<()> {
        Ok(Engine::rollback(self)?)
    }

    pub fn in_transaction(&self) -> bool {
        Engine::in_transaction(self)
    }

    fn atomically<T>(&self, work: impl FnOnce() -> TemporalResult<T>) -> TemporalResult<T> {
        if self.in_transaction() {
            return work();
        }
        self.begin()?;
        match work() {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                if self.in_transaction() {
                    if let Err(rollback_err) = self.rollback() {
                        tracing::error!("Rollback of failed batch also failed: {rollback_err}");
                    }
                }
                Err(e)
            }
        }
    }
}

impl Engine for TemporalConnection {
    fn execute(&self, sql: &str, params: &[Value]) -> rusqlite::Result<usize> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        stmt.execute(params_from_iter(params.iter()))
    }

    fn execute_batch(&self, sql: &str) -> rusqlite::Result<()> {
        self.conn.execute_batch(sql)
    }

    fn query(&self, sql: &str, params: &[Value]) -> rusqlite::Result<Rows> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        collect_rows(&mut stmt, params)
    }

    fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    fn begin(&self, level: IsolationLevel) -> rusqlite::Result<()> {
        self.conn.execute_batch(level.begin_sql())
    }
}

impl std::fmt::Debug for TemporalConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemporalConnection")
            .field("path", &self.conn.path())
            .field("options", &self.options)
            .finish()
    }
}
