//! Core identity, time and error types shared by the catalog and normalizer.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

/// Surrogate id of a tracked table. Allocated once, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableId(pub i64);

/// Surrogate id of a tracked column. Allocated once, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ColumnId(pub i64);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Storage format of every `transaction` column: UTC, millisecond precision.
///
/// Fixed width, so comparing the stored text compares the times.
pub const TRANSACTION_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// The SQL expression producing the engine clock in [`TRANSACTION_FORMAT`].
pub const SQL_NOW: &str = "strftime('%Y-%m-%d %H:%M:%f', 'now')";

/// A transaction-time stamp as stored in the history relations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionTime(NaiveDateTime);

impl TransactionTime {
    /// Wall-clock time, truncated to the stored precision.
    pub fn now() -> Self {
        Self::from(Utc::now())
    }

    pub fn as_naive(&self) -> NaiveDateTime {
        self.0
    }

    /// Render as a single-quoted SQL string literal.
    pub fn to_sql_literal(&self) -> String {
        format!("'{self}'")
    }
}

impl From<DateTime<Utc>> for TransactionTime {
    fn from(value: DateTime<Utc>) -> Self {
        Self::from(value.naive_utc())
    }
}

impl From<NaiveDateTime> for TransactionTime {
    fn from(value: NaiveDateTime) -> Self {
        let millis = value.and_utc().timestamp_millis();
        let truncated = DateTime::from_timestamp_millis(millis)
            .map(|dt| dt.naive_utc())
            .unwrap_or(value);
        Self(truncated)
    }
}

impl fmt::Display for TransactionTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(TRANSACTION_FORMAT))
    }
}

impl FromStr for TransactionTime {
    type Err = TemporalError;

    /// Accepts the stored format plus the common ISO-8601 variants
    /// (`T` separator, optional fraction, optional trailing `Z`, bare date).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let text = trimmed.strip_suffix('Z').unwrap_or(trimmed);

        for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
            if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
                return Ok(Self::from(parsed));
            }
        }
        if let Ok(date) = chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d") {
            if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
                return Ok(Self::from(midnight));
            }
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(Self::from(dt.with_timezone(&Utc)));
        }

        Err(TemporalError::InvalidTime(s.to_string()))
    }
}

impl Serialize for TransactionTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TransactionTime {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Which tables a `normalize` call should historize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Every eligible table, resolved when the call runs.
    All,
    /// The named tables, in the given order.
    Tables(Vec<String>),
}

impl From<&str> for Selector {
    fn from(value: &str) -> Self {
        Selector::Tables(vec![value.to_string()])
    }
}

impl From<String> for Selector {
    fn from(value: String) -> Self {
        Selector::Tables(vec![value])
    }
}

impl From<Vec<String>> for Selector {
    fn from(value: Vec<String>) -> Self {
        Selector::Tables(value)
    }
}

impl From<&[&str]> for Selector {
    fn from(value: &[&str]) -> Self {
        Selector::Tables(value.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Selector {
    fn from(value: [&str; N]) -> Self {
        Selector::Tables(value.iter().map(|s| s.to_string()).collect())
    }
}

/// Why a named table was refused by `normalize`.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IneligibleReason {
    #[error("name uses a reserved prefix")]
    ReservedName,

    #[error("not an ordinary table")]
    NotATable,

    #[error("table is declared WITHOUT ROWID")]
    WithoutRowid,

    #[error("columns shadow rowid, _rowid_ and oid")]
    ShadowedRowid,
}

/// Errors raised by the temporal layer.
#[derive(thiserror::Error, Debug)]
pub enum TemporalError {
    /// Engine error, surfaced exactly as the engine reported it.
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Table '{table}' cannot be historized: {reason}")]
    Ineligible {
        table: String,
        reason: IneligibleReason,
    },

    #[error("Invalid transaction time: {0}")]
    InvalidTime(String),
}

/// Convenience result type.
pub type TemporalResult<T> = Result<T, TemporalError>;
