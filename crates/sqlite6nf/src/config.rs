//! Connection options.

use std::time::Duration;

use rusqlite::OpenFlags;
use serde::{Deserialize, Serialize};

use crate::engine::IsolationLevel;

pub const ENV_TIMEOUT_MS: &str = "SQLITE6NF_TIMEOUT_MS";
pub const ENV_ISOLATION: &str = "SQLITE6NF_ISOLATION";
pub const ENV_READ_ONLY: &str = "SQLITE6NF_READ_ONLY";

/// Every option recognized when opening a [`TemporalConnection`](crate::TemporalConnection).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
    /// How long to wait on a locked database before failing.
    pub timeout_ms: u64,
    /// Lock acquisition of transactions opened through `begin`.
    pub isolation: IsolationLevel,
    /// Interpret the path as a `file:` URI.
    pub uri: bool,
    pub read_only: bool,
    /// Capacity of the prepared statement cache.
    pub cached_statements: usize,
    pub foreign_keys: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            isolation: IsolationLevel::Deferred,
            uri: false,
            read_only: false,
            cached_statements: 128,
            foreign_keys: false,
        }
    }
}

impl ConnectOptions {
    /// Defaults overlaid with `SQLITE6NF_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Overlay values looked up by environment variable name.
    ///
    /// Unparseable values are logged and ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup(ENV_TIMEOUT_MS) {
            match raw.trim().parse() {
                Ok(ms) => self.timeout_ms = ms,
                Err(_) => tracing::warn!("Ignoring {ENV_TIMEOUT_MS}={raw}: not a number"),
            }
        }
        if let Some(raw) = lookup(ENV_ISOLATION) {
            match raw.parse() {
                Ok(level) => self.isolation = level,
                Err(e) => tracing::warn!("Ignoring {ENV_ISOLATION}: {e}"),
            }
        }
        if let Some(raw) = lookup(ENV_READ_ONLY) {
            match parse_flag(&raw) {
                Some(flag) => self.read_only = flag,
                None => tracing::warn!("Ignoring {ENV_READ_ONLY}={raw}: not a boolean"),
            }
        }
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Flags passed to `sqlite3_open_v2`.
    pub fn open_flags(&self) -> OpenFlags {
        let mut flags = OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if self.read_only {
            flags |= OpenFlags::SQLITE_OPEN_READ_ONLY;
        } else {
            flags |= OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
        }
        if self.uri {
            flags |= OpenFlags::SQLITE_OPEN_URI;
        }
        flags
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
