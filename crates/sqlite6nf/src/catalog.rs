//! Catalog: persistent metadata of historized tables and columns, plus the
//! DDL of the per-table and per-column shadow relations.
//!
//! Every history relation is keyed on `(id, "transaction")` and only ever
//! receives inserts. Catalog inserts use `INSERT OR ROLLBACK`, so a
//! constraint violation unwinds the whole enclosing transaction.

use std::collections::BTreeMap;

use rusqlite::types::Value;
use serde::Serialize;

use crate::engine::Engine;
use crate::lexer::quote_identifier;
use crate::types::{ColumnId, TableId, TemporalError, TemporalResult, TransactionTime};

/// Prefix reserved for every relation and trigger this crate creates.
pub const PREFIX: &str = "sqlite6nf_";

pub const TABLE: &str = "sqlite6nf_table";
pub const TABLE_EXIST: &str = "sqlite6nf_table_exist";
pub const TABLE_NAME: &str = "sqlite6nf_table_name";
pub const COLUMN: &str = "sqlite6nf_column";
pub const COLUMN_EXIST: &str = "sqlite6nf_column_exist";
pub const COLUMN_NAME: &str = "sqlite6nf_column_name";

/// Upper bound used to read the latest version of everything.
pub(crate) const END_OF_TIME: &str = "9999-12-31 23:59:59.999";

const SQL_CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS "sqlite6nf_table" (
        "id" INTEGER PRIMARY KEY
    )"#;

const SQL_CREATE_TABLE_EXIST: &str = r#"
    CREATE TABLE IF NOT EXISTS "sqlite6nf_table_exist" (
        "id" INTEGER NOT NULL,
        "transaction" TEXT NOT NULL,
        "exist" INTEGER NOT NULL,
        PRIMARY KEY ("id", "transaction"),
        FOREIGN KEY ("id") REFERENCES "sqlite6nf_table"("id")
    )"#;

const SQL_CREATE_TABLE_NAME: &str = r#"
    CREATE TABLE IF NOT EXISTS "sqlite6nf_table_name" (
        "id" INTEGER NOT NULL,
        "transaction" TEXT NOT NULL,
        "name" TEXT NOT NULL,
        PRIMARY KEY ("id", "transaction"),
        FOREIGN KEY ("id") REFERENCES "sqlite6nf_table"("id")
    )"#;

const SQL_CREATE_COLUMN: &str = r#"
    CREATE TABLE IF NOT EXISTS "sqlite6nf_column" (
        "id" INTEGER PRIMARY KEY,
        "table_id" INTEGER NOT NULL,
        FOREIGN KEY ("table_id") REFERENCES "sqlite6nf_table"("id")
    )"#;

const SQL_CREATE_COLUMN_EXIST: &str = r#"
    CREATE TABLE IF NOT EXISTS "sqlite6nf_column_exist" (
        "id" INTEGER NOT NULL,
        "transaction" TEXT NOT NULL,
        "exist" INTEGER NOT NULL,
        PRIMARY KEY ("id", "transaction"),
        FOREIGN KEY ("id") REFERENCES "sqlite6nf_column"("id")
    )"#;

const SQL_CREATE_COLUMN_NAME: &str = r#"
    CREATE TABLE IF NOT EXISTS "sqlite6nf_column_name" (
        "id" INTEGER NOT NULL,
        "transaction" TEXT NOT NULL,
        "name" TEXT NOT NULL,
        PRIMARY KEY ("id", "transaction"),
        FOREIGN KEY ("id") REFERENCES "sqlite6nf_column"("id")
    )"#;

const SQL_INSERT_TABLE: &str = r#"
    INSERT OR ROLLBACK INTO "sqlite6nf_table" ("id")
    VALUES (NULL)
    RETURNING "id""#;

const SQL_INSERT_TABLE_EXIST: &str = r#"
    INSERT OR ROLLBACK INTO "sqlite6nf_table_exist" ("id", "transaction", "exist")
    VALUES (?1, ?2, ?3)"#;

const SQL_INSERT_TABLE_NAME: &str = r#"
    INSERT OR ROLLBACK INTO "sqlite6nf_table_name" ("id", "transaction", "name")
    VALUES (?1, ?2, ?3)"#;

const SQL_INSERT_COLUMN: &str = r#"
    INSERT OR ROLLBACK INTO "sqlite6nf_column" ("id", "table_id")
    VALUES (NULL, ?1)
    RETURNING "id""#;

const SQL_INSERT_COLUMN_EXIST: &str = r#"
    INSERT OR ROLLBACK INTO "sqlite6nf_column_exist" ("id", "transaction", "exist")
    VALUES (?1, ?2, ?3)"#;

const SQL_INSERT_COLUMN_NAME: &str = r#"
    INSERT OR ROLLBACK INTO "sqlite6nf_column_name" ("id", "transaction", "name")
    VALUES (?1, ?2, ?3)"#;

const SQL_IS_TRACKED: &str = r#"
    SELECT EXISTS (
        SELECT 1 FROM "sqlite6nf_table_name"
        WHERE "name" = ?1 COLLATE NOCASE
    )"#;

const SQL_CATALOG_EXISTS: &str = r#"
    SELECT count(*) FROM "sqlite_schema"
    WHERE "type" = 'table' AND "name" IN ('sqlite6nf_table', 'sqlite6nf_table_name',
        'sqlite6nf_column', 'sqlite6nf_column_name')"#;

// Name as of ?1: the latest version not after ?1, else the earliest one.
const SQL_TABLES_AT: &str = r#"
    SELECT t."id",
        coalesce(
            (SELECT n."name" FROM "sqlite6nf_table_name" AS n
             WHERE n."id" = t."id" AND n."transaction" <= ?1
             ORDER BY n."transaction" DESC LIMIT 1),
            (SELECT n."name" FROM "sqlite6nf_table_name" AS n
             WHERE n."id" = t."id"
             ORDER BY n."transaction" ASC LIMIT 1)) AS "name"
    FROM "sqlite6nf_table" AS t
    ORDER BY t."id""#;

const SQL_COLUMNS_AT: &str = r#"
    SELECT c."id", c."table_id",
        coalesce(
            (SELECT n."name" FROM "sqlite6nf_column_name" AS n
             WHERE n."id" = c."id" AND n."transaction" <= ?1
             ORDER BY n."transaction" DESC LIMIT 1),
            (SELECT n."name" FROM "sqlite6nf_column_name" AS n
             WHERE n."id" = c."id"
             ORDER BY n."transaction" ASC LIMIT 1)) AS "name"
    FROM "sqlite6nf_column" AS c
    ORDER BY c."id""#;

const SQL_TABLE_EXIST_HISTORY: &str = r#"
    SELECT "transaction", "exist" FROM "sqlite6nf_table_exist"
    WHERE "id" = ?1 ORDER BY "transaction""#;

const SQL_TABLE_NAME_HISTORY: &str = r#"
    SELECT "transaction", "name" FROM "sqlite6nf_table_name"
    WHERE "id" = ?1 ORDER BY "transaction""#;

/// Whether a name falls in a namespace reserved by this crate or by SQLite.
pub fn is_reserved_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with(PREFIX) || lower.starts_with("sqlite_")
}

/// `sqlite6nf_<table>`: row identities ever seen.
pub fn instance_relation(table: TableId) -> String {
    format!("{PREFIX}{table}")
}

/// `sqlite6nf_<table>_exist`: row existence history.
pub fn instance_exist_relation(table: TableId) -> String {
    format!("{PREFIX}{table}_exist")
}

/// `sqlite6nf_<table>_<column>`: value history of one column.
pub fn value_relation(table: TableId, column: ColumnId) -> String {
    format!("{PREFIX}{table}_{column}")
}

fn instance_ddl(table: TableId) -> String {
    format!(
        r#"CREATE TABLE IF NOT EXISTS {instance} (
        "id" INTEGER PRIMARY KEY
    )"#,
        instance = quote_identifier(&instance_relation(table)),
    )
}

fn instance_exist_ddl(table: TableId) -> String {
    format!(
        r#"CREATE TABLE IF NOT EXISTS {exist} (
        "id" INTEGER NOT NULL,
        "transaction" TEXT NOT NULL,
        "exist" INTEGER NOT NULL,
        PRIMARY KEY ("id", "transaction"),
        FOREIGN KEY ("id") REFERENCES {instance}("id")
    )"#,
        exist = quote_identifier(&instance_exist_relation(table)),
        instance = quote_identifier(&instance_relation(table)),
    )
}

fn value_ddl(table: TableId, column: ColumnId, dtype: &str) -> String {
    let dtype = dtype.trim();
    let value_column = if dtype.is_empty() {
        r#""value""#.to_string()
    } else {
        format!(r#""value" {dtype}"#)
    };
    format!(
        r#"CREATE TABLE IF NOT EXISTS {value} (
        "id" INTEGER NOT NULL,
        "transaction" TEXT NOT NULL,
        {value_column},
        PRIMARY KEY ("id", "transaction"),
        FOREIGN KEY ("id") REFERENCES {instance}("id")
    )"#,
        value = quote_identifier(&value_relation(table, column)),
        instance = quote_identifier(&instance_relation(table)),
    )
}

/// A tracked column and its name at some point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedColumn {
    pub id: ColumnId,
    pub name: String,
}

/// A tracked table and its columns, named as of some point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedTable {
    pub id: TableId,
    pub name: String,
    pub columns: Vec<TrackedColumn>,
}

/// Existence and name history of one tracked table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableHistory {
    pub id: TableId,
    pub exist: Vec<(TransactionTime, bool)>,
    pub names: Vec<(TransactionTime, String)>,
}

/// Catalog operations over an engine.
pub struct Catalog<'e, E: Engine + ?Sized> {
    engine: &'e E,
}

impl<'e, E: Engine + ?Sized> Catalog<'e, E> {
    pub fn new(engine: &'e E) -> Self {
        Self { engine }
    }

    /// Create the six catalog relations if they are missing.
    pub fn ensure(&self) -> TemporalResult<()> {
        for ddl in [
            SQL_CREATE_TABLE,
            SQL_CREATE_TABLE_EXIST,
            SQL_CREATE_TABLE_NAME,
            SQL_CREATE_COLUMN,
            SQL_CREATE_COLUMN_EXIST,
            SQL_CREATE_COLUMN_NAME,
        ] {
            self.engine.execute(ddl, &[])?;
        }
        Ok(())
    }

    /// Whether the catalog relations have been created.
    pub fn exists(&self) -> TemporalResult<bool> {
        let rows = self.engine.query(SQL_CATALOG_EXISTS, &[])?;
        Ok(matches!(rows.rows.first().and_then(|r| r.first()), Some(Value::Integer(4))))
    }

    /// Allocate a table id and record its existence and name at `at`.
    pub fn insert_table(&self, at: TransactionTime, name: &str) -> TemporalResult<TableId> {
        let id = TableId(self.returning_id(SQL_INSERT_TABLE, &[])?);
        let stamp = Value::Text(at.to_string());
        self.engine.execute(
            SQL_INSERT_TABLE_EXIST,
            &[Value::Integer(id.0), stamp.clone(), Value::Integer(1)],
        )?;
        self.engine.execute(
            SQL_INSERT_TABLE_NAME,
            &[Value::Integer(id.0), stamp, Value::Text(name.to_string())],
        )?;
        Ok(id)
    }

    /// Allocate a column id owned by `table` and record its existence and name.
    pub fn insert_column(
        &self,
        table: TableId,
        at: TransactionTime,
        name: &str,
    ) -> TemporalResult<ColumnId> {
        let id = ColumnId(self.returning_id(SQL_INSERT_COLUMN, &[Value::Integer(table.0)])?);
        let stamp = Value::Text(at.to_string());
        self.engine.execute(
            SQL_INSERT_COLUMN_EXIST,
            &[Value::Integer(id.0), stamp.clone(), Value::Integer(1)],
        )?;
        self.engine.execute(
            SQL_INSERT_COLUMN_NAME,
            &[Value::Integer(id.0), stamp, Value::Text(name.to_string())],
        )?;
        Ok(id)
    }

    fn returning_id(&self, sql: &str, params: &[Value]) -> TemporalResult<i64> {
        let rows = self.engine.query(sql, params)?;
        match rows.rows.first().and_then(|r| r.first()) {
            Some(Value::Integer(id)) => Ok(*id),
            _ => Err(TemporalError::Sqlite(rusqlite::Error::QueryReturnedNoRows)),
        }
    }

    /// Create the Instance and Instance-existence relations of a table.
    pub fn create_instance_relations(&self, table: TableId) -> TemporalResult<()> {
        self.engine.execute(&instance_ddl(table), &[])?;
        self.engine.execute(&instance_exist_ddl(table), &[])?;
        Ok(())
    }

    /// Create the Value relation of a column, typed like the original column.
    pub fn create_value_relation(
        &self,
        table: TableId,
        column: ColumnId,
        dtype: &str,
    ) -> TemporalResult<()> {
        self.engine.execute(&value_ddl(table, column, dtype), &[])?;
        Ok(())
    }

    /// Whether a table of this name (case-insensitive) was ever historized.
    pub fn is_tracked(&self, name: &str) -> TemporalResult<bool> {
        if !self.exists()? {
            return Ok(false);
        }
        let rows = self
            .engine
            .query(SQL_IS_TRACKED, &[Value::Text(name.to_string())])?;
        Ok(matches!(rows.rows.first().and_then(|r| r.first()), Some(Value::Integer(1))))
    }

    /// Every tracked table under its current name.
    pub fn tracked_tables(&self) -> TemporalResult<Vec<TrackedTable>> {
        self.tables_named_at(END_OF_TIME)
    }

    /// Every tracked table under the names valid at `at`.
    pub fn tracked_tables_at(&self, at: TransactionTime) -> TemporalResult<Vec<TrackedTable>> {
        self.tables_named_at(&at.to_string())
    }

    fn tables_named_at(&self, at: &str) -> TemporalResult<Vec<TrackedTable>> {
        if !self.exists()? {
            return Ok(Vec::new());
        }
        let at = Value::Text(at.to_string());

        let mut columns: BTreeMap<i64, Vec<TrackedColumn>> = BTreeMap::new();
        for row in self.engine.query(SQL_COLUMNS_AT, &[at.clone()])?.rows {
            let (Some(id), Some(table_id), Some(name)) =
                (as_integer(&row[0]), as_integer(&row[1]), as_text(&row[2]))
            else {
                continue;
            };
            columns.entry(table_id).or_default().push(TrackedColumn {
                id: ColumnId(id),
                name,
            });
        }

        let mut tables = Vec::new();
        for row in self.engine.query(SQL_TABLES_AT, &[at])?.rows {
            let (Some(id), Some(name)) = (as_integer(&row[0]), as_text(&row[1])) else {
                continue;
            };
            tables.push(TrackedTable {
                id: TableId(id),
                name,
                columns: columns.remove(&id).unwrap_or_default(),
            });
        }
        Ok(tables)
    }

    /// Look up a tracked table by its current name.
    pub fn find(&self, name: &str) -> TemporalResult<Option<TrackedTable>> {
        Ok(self
            .tracked_tables()?
            .into_iter()
            .find(|t| t.name.eq_ignore_ascii_case(name)))
    }

    /// Existence and name history of a tracked table.
    pub fn history(&self, table: TableId) -> TemporalResult<TableHistory> {
        let id = Value::Integer(table.0);

        let mut exist = Vec::new();
        for row in self.engine.query(SQL_TABLE_EXIST_HISTORY, &[id.clone()])?.rows {
            exist.push((as_time(&row[0])?, as_integer(&row[1]).unwrap_or(0) != 0));
        }

        let mut names = Vec::new();
        for row in self.engine.query(SQL_TABLE_NAME_HISTORY, &[id])?.rows {
            names.push((as_time(&row[0])?, as_text(&row[1]).unwrap_or_default()));
        }

        Ok(TableHistory {
            id: table,
            exist,
            names,
        })
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(i) => Some(*i),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Text(s) => Some(s.clone()),
        Value::Integer(i) => Some(i.to_string()),
        _ => None,
    }
}

pub(crate) fn as_time(value: &Value) -> TemporalResult<TransactionTime> {
    match value {
        Value::Text(s) => s.parse(),
        other => Err(TemporalError::InvalidTime(format!("{other:?}"))),
    }
}
