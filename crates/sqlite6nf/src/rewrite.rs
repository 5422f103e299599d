//! Point-in-time reads.
//!
//! Every `FROM`/`JOIN` reference to a tracked table is swapped for a derived
//! table that rebuilds the table's rows from its history relations as they
//! stood at a given transaction time. Everything else in the statement text
//! is left byte-for-byte as written.
//!
//! The derived table has the declared columns of the table in their catalog
//! order and nothing else, so `SELECT *` keeps the live shape. Rowid aliases
//! are not addressable through it; tables with an `INTEGER PRIMARY KEY`
//! column expose the identity under that column's name.
//!
//! Stamps of versions written within the same millisecond are pushed one
//! millisecond apart and can run ahead of the engine clock. A read at or
//! after the current engine time is therefore answered from the latest
//! version of every row, not from a time cut.

use crate::catalog::{
    instance_exist_relation, instance_relation, is_reserved_name, value_relation, Catalog,
    TrackedTable, END_OF_TIME,
};
use crate::classifier::references_in;
use crate::engine::{clock, Engine};
use crate::lexer::{quote_identifier, scan, Token, TokenKind};
use crate::grammar::Cursor;
use crate::types::{TemporalResult, TransactionTime};

/// Words that may follow a table reference and are never an alias.
const CLAUSE_KEYWORDS: &[&str] = &[
    "WHERE", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "NATURAL", "ON", "USING",
    "GROUP", "ORDER", "LIMIT", "HAVING", "WINDOW", "UNION", "INTERSECT", "EXCEPT",
    "RETURNING", "INDEXED", "NOT", "SET", "VALUES", "DEFAULT", "WHEN", "THEN", "ELSE",
    "END", "OFFSET",
];

/// Rewrite `sql` so that tracked tables read as they were at `at`.
pub fn rewrite_as_of<E: Engine + ?Sized>(
    engine: &E,
    sql: &str,
    at: TransactionTime,
) -> TemporalResult<String> {
    let catalog = Catalog::new(engine);
    if !catalog.exists()? {
        return Ok(sql.to_string());
    }

    let tokens = scan(sql);
    let references = references_in(&tokens);
    if references.is_empty() {
        return Ok(sql.to_string());
    }
    let (tables, cut) = if at >= clock(engine)? {
        (catalog.tracked_tables()?, format!("'{END_OF_TIME}'"))
    } else {
        (catalog.tracked_tables_at(at)?, at.to_sql_literal())
    };

    let mut replacements = Vec::new();
    for reference in &references {
        let object = &reference.object;
        if !object.in_main_schema()
            || is_reserved_name(&object.table.value())
            || is_delete_target(&tokens, object.span.start)
        {
            continue;
        }
        let Some(table) = tables.iter().find(|t| object.table.matches(&t.name)) else {
            continue;
        };

        let mut text = derived_table(table, &cut);
        if !has_alias(&tokens, reference.next_token) {
            text.push_str(" AS ");
            text.push_str(object.table.raw());
        }
        tracing::debug!("Reading {} as of {at}", table.name);
        replacements.push((object.span.clone(), text));
    }

    let mut rewritten = sql.to_string();
    for (span, text) in replacements.into_iter().rev() {
        rewritten.replace_range(span, &text);
    }
    Ok(rewritten)
}

/// The rows of `table` as they stood at `at`, given as a SQL literal.
fn derived_table(table: &TrackedTable, at: &str) -> String {
    let mut projection = Vec::with_capacity(table.columns.len());
    for column in &table.columns {
        projection.push(format!(
            r#"(SELECT v."value" FROM {value} AS v WHERE v."id" = i."id" AND v."transaction" <= {at} ORDER BY v."transaction" DESC LIMIT 1) AS {name}"#,
            value = quote_identifier(&value_relation(table.id, column.id)),
            name = quote_identifier(&column.name),
        ));
    }

    format!(
        r#"(SELECT {projection} FROM {instance} AS i WHERE (SELECT e."exist" FROM {exist} AS e WHERE e."id" = i."id" AND e."transaction" <= {at} ORDER BY e."transaction" DESC LIMIT 1) = 1)"#,
        projection = projection.join(", "),
        instance = quote_identifier(&instance_relation(table.id)),
        exist = quote_identifier(&instance_exist_relation(table.id)),
    )
}

/// Whether the tokens after a reference start an alias.
fn has_alias(tokens: &[Token<'_>], next: usize) -> bool {
    match Cursor::at(tokens, next).peek() {
        Some(token) if token.is_keyword("AS") => true,
        Some(token) if matches!(token.kind, TokenKind::Quoted(_)) => true,
        Some(token) if token.kind == TokenKind::Word => {
            !CLAUSE_KEYWORDS.iter().any(|k| token.is_keyword(k))
        }
        _ => false,
    }
}

/// `DELETE FROM t` names the table being written, not a source of rows.
fn is_delete_target(tokens: &[Token<'_>], start: usize) -> bool {
    let Some(idx) = tokens.iter().position(|t| t.offset == start) else {
        return false;
    };
    let mut previous = tokens[..idx]
        .iter()
        .rev()
        .filter(|t| !t.is_trivia() && !t.is_symbol('('));
    previous.next();
    previous.next().is_some_and(|t| t.is_keyword("DELETE"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::Normalizer;
    use crate::types::Selector;
    use rusqlite::types::Value;
    use rusqlite::Connection;
    use std::time::Duration;

    fn pause() {
        std::thread::sleep(Duration::from_millis(5));
    }

    fn tracked_users() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();
        Normalizer::new(&conn).run(&Selector::from("users")).unwrap();
        conn
    }

    fn stamps(conn: &Connection, relation: &str) -> Vec<TransactionTime> {
        let rows = Engine::query(
            conn,
            &format!(r#"SELECT "transaction" FROM "{relation}" ORDER BY "transaction""#),
            &[],
        )
        .unwrap();
        rows.rows
            .iter()
            .map(|r| match &r[0] {
                Value::Text(s) => s.parse().unwrap(),
                other => panic!("unexpected stamp {other:?}"),
            })
            .collect()
    }

    fn names_at(conn: &Connection, sql: &str, at: TransactionTime) -> Vec<Value> {
        let rewritten = rewrite_as_of(conn, sql, at).unwrap();
        Engine::query(conn, &rewritten, &[])
            .unwrap()
            .rows
            .into_iter()
            .map(|mut r| r.remove(0))
            .collect()
    }

    #[test]
    fn test_reads_follow_history() {
        let conn = tracked_users();
        conn.execute("INSERT INTO users VALUES (1, 'Alice')", []).unwrap();
        pause();
        conn.execute("UPDATE users SET name = 'Alicia' WHERE id = 1", []).unwrap();
        pause();
        conn.execute("DELETE FROM users WHERE id = 1", []).unwrap();

        let values = stamps(&conn, "sqlite6nf_1_2");
        let exist = stamps(&conn, "sqlite6nf_1_exist");
        let sql = "SELECT name FROM users WHERE id = 1";

        assert_eq!(names_at(&conn, sql, values[0]), vec![Value::Text("Alice".into())]);
        assert_eq!(names_at(&conn, sql, values[1]), vec![Value::Text("Alicia".into())]);
        assert!(names_at(&conn, sql, exist[1]).is_empty());
        assert!(names_at(&conn, sql, "2000-01-01".parse().unwrap()).is_empty());
    }

    #[test]
    fn test_existing_alias_is_kept() {
        let conn = tracked_users();
        let at: TransactionTime = "2024-01-01 00:00:00.000".parse().unwrap();
        let rewritten =
            rewrite_as_of(&conn, "SELECT u.name FROM users u WHERE u.id = 1", at).unwrap();
        assert!(rewritten.ends_with(") u WHERE u.id = 1"));
        assert!(!rewritten.contains(" AS users"));

        let rewritten = rewrite_as_of(&conn, "SELECT users.name FROM Users WHERE 1", at).unwrap();
        assert!(rewritten.contains(") AS Users WHERE 1"));
        assert!(rewritten.contains(r#"'2024-01-01 00:00:00.000'"#));
    }

    #[test]
    fn test_untracked_and_foreign_schemas_pass_through() {
        let conn = tracked_users();
        conn.execute_batch("CREATE TABLE other (x)").unwrap();
        let at = TransactionTime::now();

        for sql in [
            "SELECT x FROM other",
            "SELECT * FROM temp.users",
            "SELECT * FROM sqlite6nf_table",
            "DELETE FROM users WHERE id = 1",
            "SELECT 1",
            "SELECT * FROM pragma_table_info('users')",
        ] {
            assert_eq!(rewrite_as_of(&conn, sql, at).unwrap(), sql);
        }
    }

    #[test]
    fn test_no_catalog_passes_through() {
        let conn = Connection::open_in_memory().unwrap();
        let sql = "SELECT * FROM users";
        assert_eq!(rewrite_as_of(&conn, sql, TransactionTime::now()).unwrap(), sql);
    }

    #[test]
    fn test_star_keeps_live_shape() {
        let conn = tracked_users();
        conn.execute("INSERT INTO users VALUES (1, 'a')", []).unwrap();
        let sql = "SELECT * FROM users";

        let live = Engine::query(&conn, sql, &[]).unwrap();
        let past = Engine::query(&conn, &rewrite_as_of(&conn, sql, TransactionTime::now()).unwrap(), &[])
            .unwrap();
        assert_eq!(past.columns, vec!["id", "name"]);
        assert_eq!(past, live);
    }

    #[test]
    fn test_comma_joined_tables_rewritten_in_either_order() {
        let conn = tracked_users();
        conn.execute_batch("CREATE TABLE o (x); INSERT INTO o VALUES (1);")
            .unwrap();
        conn.execute("INSERT INTO users VALUES (1, 'a')", []).unwrap();
        let before: TransactionTime = "2000-01-01".parse().unwrap();

        for sql in ["SELECT name FROM users, o", "SELECT name FROM o, users"] {
            let rewritten = rewrite_as_of(&conn, sql, before).unwrap();
            assert_eq!(rewritten.matches(r#"FROM "sqlite6nf_1" AS i"#).count(), 1);
            assert!(names_at(&conn, sql, before).is_empty(), "{sql}");
        }
    }

    #[test]
    fn test_present_read_sees_stamps_ahead_of_clock() {
        let conn = tracked_users();
        conn.execute("INSERT INTO users VALUES (1, 'v0')", []).unwrap();
        for i in 1..=200 {
            conn.execute("UPDATE users SET name = ?1 WHERE id = 1", [format!("v{i}")])
                .unwrap();
        }

        let sql = "SELECT name FROM users";
        let at = TransactionTime::from(chrono::Utc::now() + chrono::Duration::milliseconds(20));
        assert_eq!(names_at(&conn, sql, at), vec![Value::Text("v200".into())]);
    }

    #[test]
    fn test_join_both_sides_rewritten() {
        let conn = tracked_users();
        let at = TransactionTime::now();
        let rewritten = rewrite_as_of(
            &conn,
            "SELECT a.name FROM users AS a JOIN main.users b ON a.id = b.id",
            at,
        )
        .unwrap();
        assert_eq!(rewritten.matches(r#"FROM "sqlite6nf_1" AS i"#).count(), 2);
        assert!(rewritten.contains(") AS a JOIN ("));
        assert!(rewritten.ends_with(") b ON a.id = b.id"));
    }
}
