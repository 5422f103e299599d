//! sqlite6nf command-line front end: one-shot subcommands and an interactive REPL.

pub mod commands;
pub mod config;
pub mod repl;

pub use config::{resolve_database_path, resolve_options};
