//! Database access layer.
//!
//! Everything above this module talks to a [`DbSession`] obtained from a
//! [`Connector`]; the production implementation lives in [`mysql`].

pub mod mysql;
pub mod pool;

use std::fmt;

use async_trait::async_trait;
use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DbError;

pub use mysql::MySqlConnector;
pub use pool::{ConnectionPool, PooledConnection};

/// A result row after scalar normalization, keyed by column name in select order.
pub type NormalizedRow = Map<String, Value>;

/// Connection parameters supplied by the caller on every request.
#[derive(Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(alias = "user")]
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default)]
    pub database: Option<String>,
}

fn default_port() -> u16 {
    3306
}

impl ConnectionConfig {
    /// Pool identity; excludes the password.
    pub fn fingerprint(&self) -> ConfigFingerprint {
        ConfigFingerprint(format!(
            "{}@{}:{}/{}",
            self.username,
            self.host,
            self.port,
            self.database.as_deref().unwrap_or("")
        ))
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("database", &self.database)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigFingerprint(String);

impl fmt::Display for ConfigFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single decoded cell, before it is made transport-safe.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Decimal(BigDecimal),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Timestamp(DateTime<Utc>),
    Time(NaiveTime),
    Json(Value),
}

impl ScalarValue {
    /// Textual view used by introspection, where metadata columns may come back
    /// as either strings or raw bytes depending on the server version.
    pub fn as_text(&self) -> Option<String> {
        match self {
            ScalarValue::Null => None,
            ScalarValue::Text(s) => Some(s.clone()),
            ScalarValue::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
            other => match other.normalize() {
                Value::String(s) => Some(s),
                Value::Null => None,
                v => Some(v.to_string()),
            },
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            ScalarValue::Int(i) => u64::try_from(*i).ok(),
            ScalarValue::UInt(u) => Some(*u),
            ScalarValue::Decimal(d) => d.to_u64(),
            ScalarValue::Text(s) => s.trim().parse().ok(),
            ScalarValue::Bytes(b) => String::from_utf8_lossy(b).trim().parse().ok(),
            _ => None,
        }
    }

    /// Convert to a JSON value: temporal types become ISO-8601 text,
    /// fixed-point decimals become floats, binary becomes lossy UTF-8.
    pub fn normalize(&self) -> Value {
        match self {
            ScalarValue::Null => Value::Null,
            ScalarValue::Bool(b) => Value::Bool(*b),
            ScalarValue::Int(i) => Value::from(*i),
            ScalarValue::UInt(u) => Value::from(*u),
            ScalarValue::Float(f) => float_value(*f),
            ScalarValue::Decimal(d) => d.to_f64().map(float_value).unwrap_or(Value::Null),
            ScalarValue::Text(s) => Value::String(s.clone()),
            ScalarValue::Bytes(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
            ScalarValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            ScalarValue::DateTime(dt) => {
                Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            }
            ScalarValue::Timestamp(ts) => {
                Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            ScalarValue::Time(t) => Value::String(t.format("%H:%M:%S%.f").to_string()),
            ScalarValue::Json(v) => v.clone(),
        }
    }
}

fn float_value(f: f64) -> Value {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Rows returned by a statement, cells in column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<ScalarValue>>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<ScalarValue>>) -> Self {
        Self { columns, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&ScalarValue> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)
    }

    pub fn text(&self, row: usize, column: &str) -> Option<String> {
        self.value(row, column).and_then(ScalarValue::as_text)
    }

    /// Text of the cell at a fixed position, for statements whose column
    /// names depend on the database name (`SHOW TABLES`).
    pub fn text_at(&self, row: usize, column: usize) -> Option<String> {
        self.rows.get(row)?.get(column).and_then(ScalarValue::as_text)
    }

    pub fn first_text(&self) -> Option<String> {
        self.text_at(0, 0)
    }

    /// Rows as `{column: value}` objects.
    pub fn normalized(&self) -> Vec<NormalizedRow> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row.iter())
                    .map(|(column, value)| (column.clone(), value.normalize()))
                    .collect()
            })
            .collect()
    }
}

/// Outcome of running one statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Execution {
    Rows(ResultSet),
    Affected { rows_affected: u64 },
}

/// One live database handle. Not safe for concurrent use; callers serialize
/// access through [`PooledConnection`].
#[async_trait]
pub trait DbSession: Send {
    async fn execute(&mut self, sql: &str) -> Result<Execution, DbError>;

    async fn commit(&mut self) -> Result<(), DbError>;

    async fn rollback(&mut self) -> Result<(), DbError>;

    /// Cheap liveness probe.
    async fn ping(&mut self) -> bool;

    async fn close(self: Box<Self>) -> Result<(), DbError>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn DbSession>, DbError>;
}

/// Run a statement and return its rows, treating a non-query as an empty set.
pub async fn query_rows(session: &mut dyn DbSession, sql: &str) -> Result<ResultSet, DbError> {
    match session.execute(sql).await? {
        Execution::Rows(rows) => Ok(rows),
        Execution::Affected { .. } => Ok(ResultSet::default()),
    }
}

/// Backtick-quote an identifier for interpolation into introspection statements.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_fingerprint_ignores_password() {
        let a = ConnectionConfig {
            host: "db".into(),
            port: 3306,
            username: "app".into(),
            password: "one".into(),
            database: Some("shop".into()),
        };
        let b = ConnectionConfig { password: "two".into(), ..a.clone() };
        assert_eq!(a.fingerprint(), b.fingerprint());

        let c = ConnectionConfig { database: Some("crm".into()), ..a.clone() };
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_debug_masks_password() {
        let cfg = ConnectionConfig {
            host: "db".into(),
            port: 3306,
            username: "app".into(),
            password: "hunter2".into(),
            database: None,
        };
        let rendered = format!("{:?}", cfg);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let cfg: ConnectionConfig =
            serde_json::from_str(r#"{"host":"localhost","user":"root","password":"x"}"#).unwrap();
        assert_eq!(cfg.port, 3306);
        assert_eq!(cfg.username, "root");
        assert!(cfg.database.is_none());
    }

    #[test]
    fn test_normalize_temporal_and_decimal() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(ScalarValue::Date(date).normalize(), Value::String("2024-03-09".into()));

        let dt = date.and_hms_opt(14, 5, 0).unwrap();
        assert_eq!(
            ScalarValue::DateTime(dt).normalize(),
            Value::String("2024-03-09T14:05:00".into())
        );

        let dec = BigDecimal::from_str("19.95").unwrap();
        assert_eq!(ScalarValue::Decimal(dec).normalize(), serde_json::json!(19.95));

        assert_eq!(
            ScalarValue::Bytes(b"abc".to_vec()).normalize(),
            Value::String("abc".into())
        );
        assert_eq!(ScalarValue::Float(f64::NAN).normalize(), Value::Null);
    }

    #[test]
    fn test_normalized_rows_keep_column_order() {
        let rs = ResultSet::new(
            vec!["id".into(), "name".into()],
            vec![vec![ScalarValue::Int(1), ScalarValue::Text("ada".into())]],
        );
        let rows = rs.normalized();
        let keys: Vec<&String> = rows[0].keys().collect();
        assert_eq!(keys, vec!["id", "name"]);
        assert_eq!(rs.text(0, "NAME").as_deref(), Some("ada"));
    }

    #[test]
    fn test_quote_identifier_escapes_backticks() {
        assert_eq!(quote_identifier("orders"), "`orders`");
        assert_eq!(quote_identifier("we`ird"), "`we``ird`");
    }
}
