//! sqlite6nf: temporal history for SQLite tables through 6NF shadow relations,
//! generated triggers and SQL statement classification.

pub mod catalog;
pub mod classifier;
pub mod config;
pub mod connection;
pub mod engine;
pub mod grammar;
pub mod lexer;
pub mod normalizer;
pub mod rewrite;
pub mod triggers;
pub mod types;

pub use catalog::{Catalog, TableHistory, TrackedColumn, TrackedTable};
pub use classifier::{
    classify, classify_script, split_statements, table_references, ClassifiedStatement,
    ReferenceKeyword, StatementKind, TableReference,
};
pub use config::ConnectOptions;
pub use connection::TemporalConnection;
pub use engine::{Engine, IsolationLevel, Rows};
pub use grammar::ObjectRef;
pub use lexer::{Identifier, QuoteStyle};
pub use normalizer::{NormalizeReport, NormalizedColumn, NormalizedTable, Normalizer};
pub use rewrite::rewrite_as_of;
pub use types::*;

pub use rusqlite;
pub use rusqlite::types::Value;
