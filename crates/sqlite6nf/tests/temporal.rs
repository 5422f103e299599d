//! Integration tests for historization: catalog bootstrap, generated
//! triggers, transaction handling and point-in-time reads.

use std::time::Duration;

use sqlite6nf::{
    ConnectOptions, IneligibleReason, Selector, TemporalConnection, TemporalError,
    TransactionTime, Value,
};

// ─────────────────────── helpers ───────────────────────

fn users() -> TemporalConnection {
    let conn = TemporalConnection::open_in_memory().unwrap();
    conn.execute_script(
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);",
        None,
    )
    .unwrap();
    conn
}

/// Let the engine clock move past every stamp recorded so far.
fn pause() {
    std::thread::sleep(Duration::from_millis(5));
}

fn count(conn: &TemporalConnection, sql: &str) -> i64 {
    match &conn.query(sql, &[], None).unwrap().rows[0][0] {
        Value::Integer(n) => *n,
        other => panic!("expected a count, got {other:?}"),
    }
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

/// `(id, transaction, third column)` rows of a history relation in order.
fn history(conn: &TemporalConnection, relation: &str) -> Vec<(i64, TransactionTime, Value)> {
    let sql = format!(r#"SELECT * FROM "{relation}" ORDER BY "id", "transaction""#);
    conn.query(&sql, &[], None)
        .unwrap()
        .rows
        .into_iter()
        .map(|row| {
            let mut values = row.into_iter();
            let id = match values.next() {
                Some(Value::Integer(id)) => id,
                other => panic!("bad id {other:?}"),
            };
            let at = match values.next() {
                Some(Value::Text(s)) => s.parse().unwrap(),
                other => panic!("bad transaction {other:?}"),
            };
            (id, at, values.next().unwrap())
        })
        .collect()
}

fn schema_objects(conn: &TemporalConnection) -> (i64, i64) {
    let tables = count(
        conn,
        "SELECT count(*) FROM sqlite_schema WHERE type = 'table' AND name LIKE 'sqlite6nf%'",
    );
    let triggers = count(conn, "SELECT count(*) FROM sqlite_schema WHERE type = 'trigger'");
    (tables, triggers)
}

// ─────────────────────── normalize ───────────────────────

#[test]
fn test_normalize_creates_exact_objects() {
    let conn = users();
    let report = conn.normalize("users").unwrap();

    assert_eq!(report.tables.len(), 1);
    let table = &report.tables[0];
    assert_eq!(table.name, "users");
    assert_eq!(table.columns.len(), 2);
    assert_eq!(table.columns[1].name, "name");
    assert_eq!(table.columns[1].dtype, "TEXT");

    // six catalog relations, one instance, one instance-existence, two values
    assert_eq!(schema_objects(&conn), (6 + 1 + 1 + 2, 2 + 2 * 2));
    assert_eq!(
        count(&conn, r#"SELECT count(*) FROM sqlite_schema WHERE name GLOB 'sqlite6nf_1_[0-9]*'"#),
        2
    );

    let table_rows = count(&conn, "SELECT count(*) FROM sqlite6nf_table_exist")
        + count(&conn, "SELECT count(*) FROM sqlite6nf_table_name");
    let column_rows = count(&conn, "SELECT count(*) FROM sqlite6nf_column_exist")
        + count(&conn, "SELECT count(*) FROM sqlite6nf_column_name");
    assert_eq!(table_rows, 2);
    assert_eq!(column_rows, 4);

    // every catalog row carries the single transaction time of the call
    assert_eq!(
        count(
            &conn,
            &format!(
                "SELECT count(*) FROM sqlite6nf_column_name WHERE \"transaction\" = '{}'",
                report.transaction
            )
        ),
        2
    );
}

#[test]
fn test_normalize_twice_is_noop() {
    let conn = users();
    conn.normalize(Selector::All).unwrap();
    let before = schema_objects(&conn);

    let again = conn.normalize("users").unwrap();
    assert!(again.tables.is_empty());
    assert_eq!(again.skipped, vec!["users".to_string()]);

    let all = conn.normalize(Selector::All).unwrap();
    assert!(all.tables.is_empty());
    assert!(all.skipped.is_empty());

    assert_eq!(schema_objects(&conn), before);
    assert_eq!(count(&conn, "SELECT count(*) FROM sqlite6nf_table_name"), 1);
    assert_eq!(count(&conn, "SELECT count(*) FROM sqlite6nf_column_name"), 2);
}

#[test]
fn test_normalize_all_skips_ineligible() {
    let conn = users();
    conn.execute_script(
        "CREATE TABLE kv (k TEXT PRIMARY KEY, v) WITHOUT ROWID;
         CREATE VIEW names AS SELECT name FROM users;
         CREATE TABLE orders (id INTEGER PRIMARY KEY, total REAL);",
        None,
    )
    .unwrap();

    let report = conn.normalize(Selector::All).unwrap();
    let names: Vec<&str> = report.tables.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["users", "orders"]);
    assert!(report.tables[1].id > report.tables[0].id);
}

#[test]
fn test_rejected_selector_leaves_nothing_behind() {
    let conn = users();
    conn.execute_script("CREATE VIEW v AS SELECT 1", None).unwrap();

    let err = conn.normalize(["users", "missing"]).unwrap_err();
    assert!(matches!(err, TemporalError::TableNotFound(ref t) if t == "missing"));

    let err = conn.normalize(["users", "v"]).unwrap_err();
    assert!(matches!(
        err,
        TemporalError::Ineligible {
            reason: IneligibleReason::NotATable,
            ..
        }
    ));

    assert!(conn.tracked_tables().unwrap().is_empty());
    assert_eq!(schema_objects(&conn), (0, 0));
    assert!(!conn.in_transaction());
}

#[test]
fn test_table_shadowing_every_rowid_alias_is_rejected() {
    let conn = users();
    conn.execute_script("CREATE TABLE odd (oid, _rowid_, RowID)", None)
        .unwrap();

    let err = conn.normalize(["users", "odd"]).unwrap_err();
    assert!(matches!(
        err,
        TemporalError::Ineligible {
            reason: IneligibleReason::ShadowedRowid,
            ref table,
        } if table == "odd"
    ));
    assert!(conn.tracked_tables().unwrap().is_empty());

    let report = conn.normalize(Selector::All).unwrap();
    assert_eq!(report.tables.len(), 1);
    assert_eq!(report.tables[0].name, "users");
}

// ─────────────────────── transactions ───────────────────────

#[test]
fn test_normalize_enlists_in_caller_transaction() {
    let conn = users();

    conn.begin().unwrap();
    conn.normalize("users").unwrap();
    assert!(conn.in_transaction());
    conn.rollback().unwrap();
    assert!(conn.tracked_tables().unwrap().is_empty());

    conn.begin().unwrap();
    conn.normalize("users").unwrap();
    conn.commit().unwrap();
    assert_eq!(conn.tracked_tables().unwrap().len(), 1);
}

#[test]
fn test_failing_batch_rolls_back_entirely() {
    let conn = users();
    conn.normalize("users").unwrap();

    let rows = vec![
        vec![Value::Integer(1), text("Ann")],
        vec![Value::Integer(2), text("Bob")],
        vec![Value::Integer(1), text("Dup")],
    ];
    let err = conn
        .execute_many("INSERT INTO users (id, name) VALUES (?1, ?2)", rows, None)
        .unwrap_err();
    assert!(matches!(err, TemporalError::Sqlite(_)));

    assert!(!conn.in_transaction());
    assert_eq!(count(&conn, "SELECT count(*) FROM users"), 0);
    assert_eq!(count(&conn, "SELECT count(*) FROM sqlite6nf_1"), 0);
    assert_eq!(count(&conn, "SELECT count(*) FROM sqlite6nf_1_2"), 0);

    let changed = conn
        .execute_many(
            "INSERT INTO users (id, name) VALUES (?1, ?2)",
            [[Value::Integer(1), text("Ann")], [Value::Integer(2), text("Bob")]],
            None,
        )
        .unwrap();
    assert_eq!(changed, 2);
    assert_eq!(count(&conn, "SELECT count(*) FROM sqlite6nf_1_exist"), 2);
}

// ─────────────────────── history ───────────────────────

#[test]
fn test_users_end_to_end() {
    let conn = users();
    conn.normalize("users").unwrap();

    conn.execute("INSERT INTO users VALUES (1, 'Alice')", &[], None).unwrap();
    pause();
    conn.execute("UPDATE users SET name = 'Alicia' WHERE id = 1", &[], None)
        .unwrap();
    pause();
    conn.execute("DELETE FROM users WHERE id = 1", &[], None).unwrap();

    let names = history(&conn, "sqlite6nf_1_2");
    let exist = history(&conn, "sqlite6nf_1_exist");
    assert_eq!(names.len(), 2);
    assert_eq!(exist.len(), 2);

    let (t1, t2, t3) = (names[0].1, names[1].1, exist[1].1);
    assert!(t1 < t2 && t2 < t3);
    assert_eq!(names[0], (1, t1, text("Alice")));
    assert_eq!(names[1], (1, t2, text("Alicia")));
    assert_eq!(exist[0], (1, t1, Value::Integer(1)));
    assert_eq!(exist[1], (1, t3, Value::Integer(0)));

    // the key column is historized like any other
    assert_eq!(history(&conn, "sqlite6nf_1_1"), vec![(1, t1, Value::Integer(1))]);
    assert_eq!(count(&conn, "SELECT count(*) FROM sqlite6nf_1"), 1);
}

#[test]
fn test_history_is_append_only() {
    let conn = users();
    conn.normalize("users").unwrap();

    let relations = ["sqlite6nf_1", "sqlite6nf_1_exist", "sqlite6nf_1_1", "sqlite6nf_1_2"];
    let snapshot = |conn: &TemporalConnection| -> Vec<Vec<Vec<Value>>> {
        relations
            .iter()
            .map(|r| conn.query(&format!("SELECT * FROM {r}"), &[], None).unwrap().rows)
            .collect()
    };

    let mut previous = snapshot(&conn);
    let steps = [
        "INSERT INTO users VALUES (1, 'a')",
        "UPDATE users SET name = 'b'",
        "DELETE FROM users",
        // SQLite hands out rowid 1 again
        "INSERT INTO users (name) VALUES ('c')",
        "UPDATE users SET name = NULL",
    ];
    for step in steps {
        conn.execute(step, &[], None).unwrap();
        let current = snapshot(&conn);
        for (before, after) in previous.iter().zip(&current) {
            assert!(after.len() >= before.len());
            for row in before {
                assert!(after.contains(row), "{row:?} disappeared after {step}");
            }
        }
        previous = current;
    }

    assert_eq!(count(&conn, "SELECT count(*) FROM sqlite6nf_1"), 1);
    assert_eq!(count(&conn, "SELECT count(*) FROM sqlite6nf_1_exist"), 3);
    assert_eq!(count(&conn, "SELECT count(*) FROM sqlite6nf_1_2"), 4);
}

#[test]
fn test_rapid_updates_get_distinct_stamps() {
    let conn = users();
    conn.normalize("users").unwrap();
    conn.execute("INSERT INTO users VALUES (7, 'v0')", &[], None).unwrap();
    for i in 1..=20 {
        conn.execute(
            "UPDATE users SET name = ?1 WHERE id = 7",
            &[text(&format!("v{i}"))],
            None,
        )
        .unwrap();
    }

    let versions = history(&conn, "sqlite6nf_1_2");
    assert_eq!(versions.len(), 21);
    assert!(versions.windows(2).all(|w| w[0].1 < w[1].1));
    assert_eq!(versions.last().unwrap().2, text("v20"));

    // stamps may now run ahead of the clock; a present read still sees the last write
    let soon = TransactionTime::from(chrono::Utc::now() + chrono::Duration::milliseconds(10));
    let rows = conn
        .query("SELECT name FROM users WHERE id = 7", &[], Some(soon))
        .unwrap();
    assert_eq!(rows.rows, vec![vec![text("v20")]]);
}

#[test]
fn test_declared_rowid_column_keeps_inserts_working() {
    let conn = TemporalConnection::open_in_memory().unwrap();
    conn.execute_script("CREATE TABLE t (rowid TEXT, x)", None).unwrap();
    conn.normalize("t").unwrap();

    conn.execute("INSERT INTO t VALUES ('abc', 1)", &[], None).unwrap();
    conn.execute("UPDATE t SET rowid = 'def'", &[], None).unwrap();
    conn.execute("DELETE FROM t", &[], None).unwrap();

    let tags: Vec<(i64, Value)> = history(&conn, "sqlite6nf_1_1")
        .into_iter()
        .map(|(id, _, value)| (id, value))
        .collect();
    assert_eq!(tags, vec![(1, text("abc")), (1, text("def"))]);

    let exist: Vec<(i64, Value)> = history(&conn, "sqlite6nf_1_exist")
        .into_iter()
        .map(|(id, _, value)| (id, value))
        .collect();
    assert_eq!(exist, vec![(1, Value::Integer(1)), (1, Value::Integer(0))]);
}

#[test]
fn test_untracked_column_update_is_ignored() {
    let conn = TemporalConnection::open_in_memory().unwrap();
    conn.execute_script("CREATE TABLE t (a, b)", None).unwrap();
    conn.normalize("t").unwrap();

    conn.execute("INSERT INTO t VALUES (1, 2)", &[], None).unwrap();
    conn.execute("UPDATE t SET b = 3", &[], None).unwrap();

    assert_eq!(history(&conn, "sqlite6nf_1_1").len(), 1);
    assert_eq!(history(&conn, "sqlite6nf_1_2").len(), 2);
}

// ─────────────────────── point-in-time reads ───────────────────────

#[test]
fn test_query_as_of() {
    let conn = users();
    conn.normalize("users").unwrap();

    conn.execute("INSERT INTO users VALUES (1, 'Alice'), (2, 'Bob')", &[], None)
        .unwrap();
    pause();
    conn.execute("UPDATE users SET name = 'Alicia' WHERE id = 1", &[], None)
        .unwrap();
    pause();
    conn.execute("DELETE FROM users WHERE id = 2", &[], None).unwrap();

    let names = history(&conn, "sqlite6nf_1_2");
    let t1 = names[0].1;
    let t2 = names.iter().find(|r| r.2 == text("Alicia")).unwrap().1;
    let sql = "SELECT id, name FROM users ORDER BY id";

    let at_t1 = conn.query(sql, &[], Some(t1)).unwrap();
    assert_eq!(
        at_t1.rows,
        vec![
            vec![Value::Integer(1), text("Alice")],
            vec![Value::Integer(2), text("Bob")],
        ]
    );

    let at_t2 = conn.query(sql, &[], Some(t2)).unwrap();
    assert_eq!(at_t2.rows.len(), 2);
    assert_eq!(at_t2.rows[0][1], text("Alicia"));

    let now = conn.query(sql, &[], Some(TransactionTime::now())).unwrap();
    assert_eq!(now.rows, vec![vec![Value::Integer(1), text("Alicia")]]);
    assert_eq!(now.rows, conn.query(sql, &[], None).unwrap().rows);

    let by_name = conn
        .query("SELECT u.id FROM users u WHERE u.name = ?1", &[text("Alice")], Some(t1))
        .unwrap();
    assert_eq!(by_name.rows, vec![vec![Value::Integer(1)]]);

    let shape = conn.query("SELECT * FROM users", &[], Some(t1)).unwrap();
    assert_eq!(shape.columns, conn.query("SELECT * FROM users", &[], None).unwrap().columns);
}

#[test]
fn test_comma_joined_read_as_of() {
    let conn = users();
    conn.normalize("users").unwrap();
    conn.execute_script("CREATE TABLE o (x); INSERT INTO o VALUES (1);", None)
        .unwrap();
    conn.execute("INSERT INTO users VALUES (1, 'a')", &[], None).unwrap();
    let long_ago: TransactionTime = "2000-01-01".parse().unwrap();

    for sql in ["SELECT name FROM users, o", "SELECT name FROM o, users"] {
        assert_ne!(conn.substitute(sql, Some(long_ago)).unwrap(), sql);
        assert!(conn.query(sql, &[], Some(long_ago)).unwrap().is_empty(), "{sql}");
        assert_eq!(conn.query(sql, &[], None).unwrap().rows, vec![vec![text("a")]]);
    }
}

// ─────────────────────── persistence ───────────────────────

#[test]
fn test_history_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.db");

    {
        let conn = TemporalConnection::open(&path, ConnectOptions::default()).unwrap();
        conn.execute_script("CREATE TABLE notes (body TEXT)", None).unwrap();
        conn.normalize(Selector::All).unwrap();
        conn.execute("INSERT INTO notes VALUES ('first')", &[], None).unwrap();
    }

    let conn = TemporalConnection::open(&path, ConnectOptions::default()).unwrap();
    conn.execute("INSERT INTO notes VALUES ('second')", &[], None).unwrap();

    let tracked = conn.tracked_tables().unwrap();
    assert_eq!(tracked.len(), 1);
    assert_eq!(tracked[0].name, "notes");
    assert_eq!(history(&conn, "sqlite6nf_1_1").len(), 2);

    let table = conn.table_history("NOTES").unwrap();
    assert_eq!(table.exist.len(), 1);
    assert!(table.exist[0].1);
    assert_eq!(table.names[0].1, "notes");
}

#[test]
fn test_read_only_connection_cannot_normalize() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ro.db");
    {
        let conn = TemporalConnection::open(&path, ConnectOptions::default()).unwrap();
        conn.execute_script("CREATE TABLE t (x)", None).unwrap();
    }

    let options = ConnectOptions {
        read_only: true,
        ..ConnectOptions::default()
    };
    let conn = TemporalConnection::open(&path, options).unwrap();
    assert!(matches!(conn.normalize("t"), Err(TemporalError::Sqlite(_))));
    assert!(!conn.in_transaction());
}
