//! Statement classifier: splits SQL text into top-level statements and
//! recognizes the structural ones.
//!
//! Recognized productions, tried in this order (first match wins):
//! ```text
//! CREATE [TEMP|TEMPORARY] TABLE [IF NOT EXISTS] object
//! ALTER TABLE object
//! DROP TABLE [IF EXISTS] object
//! CREATE [TEMP|TEMPORARY] VIEW [IF NOT EXISTS] object
//! DROP VIEW [IF EXISTS] object
//! ATTACH DATABASE ... [AS schema-identifier]
//! DETACH [DATABASE] schema-identifier
//! ```
//! A statement matching none of them is passed through unclassified.
//!
//! Independently, every `FROM`/`JOIN` followed by an object reference is
//! tagged as a table reference, unless the object is a table-valued function
//! call or the start of a sub-select. The comma-separated items of a `FROM`
//! list are tagged the same way.

use serde::Serialize;

use crate::grammar::{Cursor, ObjectRef};
use crate::lexer::{scan, Identifier, Token};

/// One top-level statement of a script.
#[derive(Debug, Clone)]
pub struct Statement<'a> {
    /// Statement text, without the terminating semicolon.
    pub text: &'a str,
    /// Byte offset of `text` in the script.
    pub offset: usize,
    pub tokens: Vec<Token<'a>>,
}

/// A recognized structural statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "statement", rename_all = "snake_case")]
pub enum StatementKind {
    CreateTable {
        temporary: bool,
        if_not_exists: bool,
        object: ObjectRef,
    },
    AlterTable {
        object: ObjectRef,
    },
    DropTable {
        if_exists: bool,
        object: ObjectRef,
    },
    CreateView {
        temporary: bool,
        if_not_exists: bool,
        object: ObjectRef,
    },
    DropView {
        if_exists: bool,
        object: ObjectRef,
    },
    AttachDatabase {
        schema: Option<Identifier>,
    },
    DetachDatabase {
        schema: Identifier,
    },
}

impl StatementKind {
    /// The table or view the statement acts on, if it names one.
    pub fn object(&self) -> Option<&ObjectRef> {
        match self {
            StatementKind::CreateTable { object, .. }
            | StatementKind::AlterTable { object }
            | StatementKind::DropTable { object, .. }
            | StatementKind::CreateView { object, .. }
            | StatementKind::DropView { object, .. } => Some(object),
            StatementKind::AttachDatabase { .. } | StatementKind::DetachDatabase { .. } => None,
        }
    }

    /// True for statements that change the structure of a table.
    pub fn alters_table(&self) -> bool {
        matches!(
            self,
            StatementKind::AlterTable { .. } | StatementKind::DropTable { .. }
        )
    }
}

/// A statement together with its classification.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifiedStatement {
    pub offset: usize,
    pub text: String,
    /// `None` means the statement is passed through unmodified.
    pub kind: Option<StatementKind>,
}

/// Keyword that introduced a table reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKeyword {
    From,
    Join,
}

/// A table reference following `FROM` or `JOIN`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableReference {
    pub keyword: ReferenceKeyword,
    pub object: ObjectRef,
    /// Index of the first token after the reference.
    #[serde(skip)]
    pub next_token: usize,
}

/// Split a script into statements at semicolons outside comments and quotes.
///
/// Semicolons inside the `BEGIN ... END` body of a `CREATE TRIGGER` do not
/// split. Statements holding only whitespace or comments are dropped.
pub fn split_statements(sql: &str) -> Vec<Statement<'_>> {
    let tokens = scan(sql);
    let mut statements = Vec::new();
    let mut start = 0usize;
    let mut current: Vec<Token<'_>> = Vec::new();
    for token in tokens {
        if token.is_symbol(';') && !in_trigger_body(&current) {
            if current.iter().any(|t| !t.is_trivia()) {
                statements.push(Statement {
                    text: &sql[start..token.offset],
                    offset: start,
                    tokens: std::mem::take(&mut current),
                });
            } else {
                current.clear();
            }
            start = token.end();
            continue;
        }
        current.push(token);
    }
    if current.iter().any(|t| !t.is_trivia()) {
        statements.push(Statement {
            text: &sql[start..],
            offset: start,
            tokens: current,
        });
    }

    statements
}

/// Whether the tokens are a `CREATE TRIGGER` whose body is still open.
fn in_trigger_body(tokens: &[Token<'_>]) -> bool {
    let mut cursor = Cursor::new(tokens);
    if !cursor.keyword("CREATE") {
        return false;
    }
    temporary(&mut cursor);
    if !cursor.keyword("TRIGGER") {
        return false;
    }

    let mut in_body = false;
    let mut cases = 0usize;
    while let Some(token) = cursor.advance() {
        if token.is_keyword("CASE") {
            cases += 1;
        } else if token.is_keyword("END") {
            if cases > 0 {
                cases -= 1;
            } else if in_body {
                return false;
            }
        } else if token.is_keyword("BEGIN") && cases == 0 {
            in_body = true;
        }
    }
    in_body
}

/// Classify one statement.
pub fn classify(statement: &Statement<'_>) -> Option<StatementKind> {
    let tokens = &statement.tokens;
    create_table(Cursor::new(tokens))
        .or_else(|| alter_table(Cursor::new(tokens)))
        .or_else(|| drop_table(Cursor::new(tokens)))
        .or_else(|| create_view(Cursor::new(tokens)))
        .or_else(|| drop_view(Cursor::new(tokens)))
        .or_else(|| attach_database(Cursor::new(tokens)))
        .or_else(|| detach_database(Cursor::new(tokens)))
}

/// Split and classify a whole script.
pub fn classify_script(sql: &str) -> Vec<ClassifiedStatement> {
    split_statements(sql)
        .iter()
        .map(|statement| ClassifiedStatement {
            offset: statement.offset,
            text: statement.text.to_string(),
            kind: classify(statement),
        })
        .collect()
}

// ── Productions ──

fn temporary(cursor: &mut Cursor<'_, '_>) -> bool {
    cursor.any_keyword(&["TEMP", "TEMPORARY"]).is_some()
}

/// `CREATE [TEMP|TEMPORARY] <noun> [IF NOT EXISTS] object`
fn create_object(mut cursor: Cursor<'_, '_>, noun: &str) -> Option<(bool, bool, ObjectRef)> {
    if !cursor.keyword("CREATE") {
        return None;
    }
    let temporary = temporary(&mut cursor);
    if !cursor.keyword(noun) {
        return None;
    }
    let if_not_exists = cursor.keywords(&["IF", "NOT", "EXISTS"]);
    let object = cursor.object()?;
    Some((temporary, if_not_exists, object))
}

/// `DROP <noun> [IF EXISTS] object`
fn drop_object(mut cursor: Cursor<'_, '_>, noun: &str) -> Option<(bool, ObjectRef)> {
    if !cursor.keywords(&["DROP", noun]) {
        return None;
    }
    let if_exists = cursor.keywords(&["IF", "EXISTS"]);
    let object = cursor.object()?;
    Some((if_exists, object))
}

fn create_table(cursor: Cursor<'_, '_>) -> Option<StatementKind> {
    let (temporary, if_not_exists, object) = create_object(cursor, "TABLE")?;
    Some(StatementKind::CreateTable {
        temporary,
        if_not_exists,
        object,
    })
}

fn alter_table(mut cursor: Cursor<'_, '_>) -> Option<StatementKind> {
    if !cursor.keywords(&["ALTER", "TABLE"]) {
        return None;
    }
    let object = cursor.object()?;
    Some(StatementKind::AlterTable { object })
}

fn drop_table(cursor: Cursor<'_, '_>) -> Option<StatementKind> {
    let (if_exists, object) = drop_object(cursor, "TABLE")?;
    Some(StatementKind::DropTable { if_exists, object })
}

fn create_view(cursor: Cursor<'_, '_>) -> Option<StatementKind> {
    let (temporary, if_not_exists, object) = create_object(cursor, "VIEW")?;
    Some(StatementKind::CreateView {
        temporary,
        if_not_exists,
        object,
    })
}

fn drop_view(cursor: Cursor<'_, '_>) -> Option<StatementKind> {
    let (if_exists, object) = drop_object(cursor, "VIEW")?;
    Some(StatementKind::DropView { if_exists, object })
}

fn attach_database(mut cursor: Cursor<'_, '_>) -> Option<StatementKind> {
    if !cursor.keywords(&["ATTACH", "DATABASE"]) {
        return None;
    }
    // The file expression is arbitrary; the schema name is the identifier
    // after the last `AS` outside parentheses.
    let mut schema = None;
    let mut depth = 0usize;
    while let Some(token) = cursor.advance() {
        if token.is_symbol('(') {
            depth += 1;
        } else if token.is_symbol(')') {
            depth = depth.saturating_sub(1);
        } else if depth == 0 && token.is_keyword("AS") {
            let mut lookahead = cursor;
            if let Some((ident, _)) = lookahead.identifier() {
                if lookahead.at_end() {
                    schema = Some(ident);
                }
            }
        }
    }
    Some(StatementKind::AttachDatabase { schema })
}

fn detach_database(mut cursor: Cursor<'_, '_>) -> Option<StatementKind> {
    if !cursor.keyword("DETACH") {
        return None;
    }
    let mut with_noun = cursor;
    if with_noun.keyword("DATABASE") {
        if let Some((schema, _)) = with_noun.identifier() {
            return Some(StatementKind::DetachDatabase { schema });
        }
    }
    // `DETACH database` detaches a schema literally named "database"
    let (schema, _) = cursor.identifier()?;
    Some(StatementKind::DetachDatabase { schema })
}

// ── Table references ──

/// Words that close a `FROM` list at its own nesting level.
const FROM_LIST_END: &[&str] = &[
    "WHERE", "GROUP", "HAVING", "WINDOW", "ORDER", "LIMIT", "UNION", "INTERSECT", "EXCEPT",
    "RETURNING", "SET", "FROM",
];

/// Tag every `FROM`/`JOIN` object reference in the given tokens.
///
/// Items joined by a comma in a `FROM` list are tagged as `FROM` references.
pub fn references_in(tokens: &[Token<'_>]) -> Vec<TableReference> {
    let mut references = Vec::new();

    for (idx, token) in tokens.iter().enumerate() {
        let keyword = if token.is_keyword("FROM") {
            ReferenceKeyword::From
        } else if token.is_keyword("JOIN") {
            ReferenceKeyword::Join
        } else {
            continue;
        };

        references.extend(reference_at(tokens, idx + 1, keyword));
        if keyword == ReferenceKeyword::From {
            for comma in list_commas(tokens, idx + 1) {
                references.extend(reference_at(tokens, comma + 1, ReferenceKeyword::From));
            }
        }
    }

    references.sort_by_key(|r| r.object.span.start);
    references
}

/// The object reference starting at `start`, unless it is a table-valued
/// function call or a sub-select.
fn reference_at(
    tokens: &[Token<'_>],
    start: usize,
    keyword: ReferenceKeyword,
) -> Option<TableReference> {
    let mut cursor = Cursor::at(tokens, start);
    while cursor.symbol('(') {}
    if cursor.peek_keyword("SELECT") || cursor.peek_keyword("WITH") {
        return None;
    }
    let object = cursor.object()?;
    if cursor.peek_symbol('(') {
        return None;
    }
    Some(TableReference {
        keyword,
        object,
        next_token: cursor.position(),
    })
}

/// Indices of the commas separating the items of a `FROM` list.
fn list_commas(tokens: &[Token<'_>], start: usize) -> Vec<usize> {
    let mut commas = Vec::new();
    let mut depth = 0usize;
    for (idx, token) in tokens.iter().enumerate().skip(start) {
        if token.is_trivia() {
            continue;
        }
        if token.is_symbol('(') {
            depth += 1;
        } else if token.is_symbol(')') {
            if depth == 0 {
                break;
            }
            depth -= 1;
        } else if depth == 0 {
            if token.is_symbol(';') || FROM_LIST_END.iter().any(|k| token.is_keyword(k)) {
                break;
            }
            if token.is_symbol(',') {
                commas.push(idx);
            }
        }
    }
    commas
}

/// Tag every `FROM`/`JOIN` object reference in a script.
pub fn table_references(sql: &str) -> Vec<TableReference> {
    references_in(&scan(sql))
}
