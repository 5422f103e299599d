//! Normalizer: bootstraps the catalog and historizes tables.
//!
//! One call runs as a single unit of work: it opens an immediate transaction
//! unless the caller already holds one, stamps everything it records with a
//! single transaction time, and commits only a transaction it opened itself.
//! Any failure in a transaction it owns rolls the whole call back, including
//! tables that were fully processed earlier in the same call.

use rusqlite::types::Value;
use serde::Serialize;

use crate::catalog::{is_reserved_name, Catalog};
use crate::engine::{clock, Engine, IsolationLevel};
use crate::triggers;
use crate::types::{
    ColumnId, IneligibleReason, Selector, TableId, TemporalError, TemporalResult,
    TransactionTime,
};

// Live tables of the main schema in creation order.
const SQL_LIVE_TABLES: &str = r#"
    SELECT s."name", l."type", l."wr"
    FROM "sqlite_schema" AS s
    JOIN pragma_table_list AS l ON l."schema" = 'main' AND l."name" = s."name"
    WHERE s."type" = 'table'
    ORDER BY s.rowid"#;

const SQL_LIVE_TABLE: &str = r#"
    SELECT l."name", l."type", l."wr"
    FROM pragma_table_list AS l
    WHERE l."schema" = 'main' AND l."name" = ?1 COLLATE NOCASE"#;

const SQL_LIVE_COLUMNS: &str = r#"
    SELECT "name", "type" FROM pragma_table_info(?1)
    ORDER BY "cid""#;

/// One column of a live table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveColumn {
    pub name: String,
    pub dtype: String,
}

/// A historized column as recorded by a `normalize` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedColumn {
    pub id: ColumnId,
    pub name: String,
    pub dtype: String,
}

/// A table historized by a `normalize` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedTable {
    pub id: TableId,
    pub name: String,
    pub columns: Vec<NormalizedColumn>,
}

/// Outcome of one `normalize` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizeReport {
    /// The single transaction time recorded for every catalog row.
    pub transaction: TransactionTime,
    pub tables: Vec<NormalizedTable>,
    /// Explicitly named tables that were already tracked.
    pub skipped: Vec<String>,
}

struct LiveTable {
    name: String,
    kind: String,
    without_rowid: bool,
}

impl LiveTable {
    fn from_row(row: &[Value]) -> Option<Self> {
        let name = match row.first()? {
            Value::Text(s) => s.clone(),
            _ => return None,
        };
        let kind = match row.get(1)? {
            Value::Text(s) => s.clone(),
            _ => String::new(),
        };
        let without_rowid = matches!(row.get(2), Some(Value::Integer(1)));
        Some(Self {
            name,
            kind,
            without_rowid,
        })
    }

    fn ineligibility(&self) -> Option<IneligibleReason> {
        if is_reserved_name(&self.name) {
            Some(IneligibleReason::ReservedName)
        } else if self.kind != "table" {
            Some(IneligibleReason::NotATable)
        } else if self.without_rowid {
            Some(IneligibleReason::WithoutRowid)
        } else {
            None
        }
    }
}

/// Historizes tables over an engine.
pub struct Normalizer<'e, E: Engine + ?Sized> {
    engine: &'e E,
    catalog: Catalog<'e, E>,
}

impl<'e, E: Engine + ?Sized> Normalizer<'e, E> {
    pub fn new(engine: &'e E) -> Self {
        Self {
            engine,
            catalog: Catalog::new(engine),
        }
    }

    /// Historize the selected tables.
    pub fn run(&self, selector: &Selector) -> TemporalResult<NormalizeReport> {
        let owns_transaction = !self.engine.in_transaction();
        if owns_transaction {
            self.engine.begin(IsolationLevel::Immediate)?;
        }

        match self.run_in_transaction(selector) {
            Ok(report) => {
                if owns_transaction {
                    self.engine.commit()?;
                }
                tracing::info!(
                    "Normalized {} table(s) at {}",
                    report.tables.len(),
                    report.transaction
                );
                Ok(report)
            }
            Err(e) => {
                // INSERT OR ROLLBACK may already have ended the transaction
                if owns_transaction && self.engine.in_transaction() {
                    if let Err(rollback_err) = self.engine.rollback() {
                        tracing::error!("Rollback after failed normalize also failed: {rollback_err}");
                    }
                }
                Err(e)
            }
        }
    }

    fn run_in_transaction(&self, selector: &Selector) -> TemporalResult<NormalizeReport> {
        self.catalog.ensure()?;

        let (names, skipped) = match selector {
            Selector::All => (self.eligible_tables()?, Vec::new()),
            Selector::Tables(requested) => self.resolve(requested)?,
        };

        // One clock reading for the whole call
        let transaction = clock(self.engine)?;
        let mut tables = Vec::with_capacity(names.len());
        for name in &names {
            tables.push(self.historize(name, transaction)?);
        }

        Ok(NormalizeReport {
            transaction,
            tables,
            skipped,
        })
    }

    /// Every live table that may be historized and is not yet tracked.
    pub fn eligible_tables(&self) -> TemporalResult<Vec<String>> {
        let mut names = Vec::new();
        for row in self.engine.query(SQL_LIVE_TABLES, &[])?.rows {
            let Some(table) = LiveTable::from_row(&row) else {
                continue;
            };
            if table.ineligibility().is_some()
                || self.row_alias(&table.name)?.is_none()
                || self.catalog.is_tracked(&table.name)?
            {
                continue;
            }
            names.push(table.name);
        }
        Ok(names)
    }

    /// Validate explicit names before anything is written.
    ///
    /// Returns the canonical names to historize and the already-tracked ones.
    fn resolve(&self, requested: &[String]) -> TemporalResult<(Vec<String>, Vec<String>)> {
        let mut names: Vec<String> = Vec::new();
        let mut skipped = Vec::new();

        for name in requested {
            let rows = self
                .engine
                .query(SQL_LIVE_TABLE, &[Value::Text(name.clone())])?;
            let table = rows
                .rows
                .first()
                .and_then(|row| LiveTable::from_row(row))
                .ok_or_else(|| TemporalError::TableNotFound(name.clone()))?;

            let reason = match table.ineligibility() {
                Some(reason) => Some(reason),
                None if self.row_alias(&table.name)?.is_none() => {
                    Some(IneligibleReason::ShadowedRowid)
                }
                None => None,
            };
            if let Some(reason) = reason {
                return Err(TemporalError::Ineligible {
                    table: table.name,
                    reason,
                });
            }
            if self.catalog.is_tracked(&table.name)? {
                tracing::debug!("Table {} is already tracked, skipping", table.name);
                skipped.push(table.name);
                continue;
            }
            if names.iter().any(|n| n.eq_ignore_ascii_case(&table.name)) {
                continue;
            }
            names.push(table.name);
        }

        Ok((names, skipped))
    }

    /// Columns of a live table in ordinal order.
    pub fn live_columns(&self, table: &str) -> TemporalResult<Vec<LiveColumn>> {
        let rows = self
            .engine
            .query(SQL_LIVE_COLUMNS, &[Value::Text(table.to_string())])?;
        Ok(rows
            .rows
            .into_iter()
            .filter_map(|row| {
                let mut values = row.into_iter();
                let name = match values.next()? {
                    Value::Text(s) => s,
                    _ => return None,
                };
                let dtype = match values.next() {
                    Some(Value::Text(s)) => s,
                    _ => String::new(),
                };
                Some(LiveColumn { name, dtype })
            })
            .collect())
    }

    /// The rowid alias the table's own columns leave visible, if any.
    fn row_alias(&self, table: &str) -> TemporalResult<Option<&'static str>> {
        let columns = self.live_columns(table)?;
        Ok(triggers::row_alias(columns.iter().map(|c| c.name.as_str())))
    }

    fn historize(&self, name: &str, at: TransactionTime) -> TemporalResult<NormalizedTable> {
        let live = self.live_columns(name)?;
        let row = triggers::row_alias(live.iter().map(|c| c.name.as_str())).ok_or_else(|| {
            TemporalError::Ineligible {
                table: name.to_string(),
                reason: IneligibleReason::ShadowedRowid,
            }
        })?;

        let table_id = self.catalog.insert_table(at, name)?;
        tracing::info!("Tracking table {name} as {table_id} (identity {row})");

        self.catalog.create_instance_relations(table_id)?;
        self.engine
            .execute(&triggers::insert_instance_trigger(table_id, name, row), &[])?;
        self.engine
            .execute(&triggers::delete_instance_trigger(table_id, name, row), &[])?;

        let mut columns = Vec::new();
        for column in live {
            let column_id = self.catalog.insert_column(table_id, at, &column.name)?;
            tracing::debug!(
                "Tracking column {name}.{} ({}) as {column_id}",
                column.name,
                column.dtype
            );

            self.catalog
                .create_value_relation(table_id, column_id, &column.dtype)?;
            self.engine.execute(
                &triggers::insert_value_trigger(table_id, column_id, name, &column.name, row),
                &[],
            )?;
            self.engine.execute(
                &triggers::update_value_trigger(table_id, column_id, name, &column.name, row),
                &[],
            )?;

            columns.push(NormalizedColumn {
                id: column_id,
                name: column.name,
                dtype: column.dtype,
            });
        }

        Ok(NormalizedTable {
            id: table_id,
            name: name.to_string(),
            columns,
        })
    }
}
