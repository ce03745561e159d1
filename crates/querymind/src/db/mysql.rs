//! MySQL driver on top of sqlx.
//!
//! Sessions run with autocommit disabled so the execution core decides when a
//! statement's effects become durable.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::StreamExt;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::{Column, ConnectOptions, Connection, Either, Executor, Row, TypeInfo, ValueRef};
use tracing::{debug, warn};

use super::{Connector, ConnectionConfig, DbSession, Execution, ResultSet, ScalarValue};
use crate::error::DbError;
use crate::utils::TextUtils;

/// Leading keywords of statements that report a result set even when empty.
const ROW_RETURNING_KEYWORDS: &[&str] = &[
    "SELECT", "SHOW", "DESCRIBE", "DESC", "EXPLAIN", "WITH", "VALUES", "TABLE",
];

pub struct MySqlConnector {
    connect_timeout: Duration,
}

impl MySqlConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for MySqlConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl Connector for MySqlConnector {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn DbSession>, DbError> {
        let connect_error = |message: String| DbError::Connect {
            host: config.host.clone(),
            port: config.port,
            message,
        };

        let mut options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.username)
            .password(&config.password);
        if let Some(db) = config.database.as_deref().filter(|d| !d.is_empty()) {
            options = options.database(db);
        }

        let mut conn = tokio::time::timeout(self.connect_timeout, options.connect())
            .await
            .map_err(|_| connect_error(format!("timed out after {:?}", self.connect_timeout)))?
            .map_err(|e| connect_error(e.to_string()))?;

        (&mut conn)
            .execute(sqlx::raw_sql("SET autocommit = 0"))
            .await
            .map_err(|e| connect_error(e.to_string()))?;

        debug!("Opened MySQL session to {}", config.fingerprint());
        Ok(Box::new(MySqlSession { conn }))
    }
}

pub struct MySqlSession {
    conn: MySqlConnection,
}

#[async_trait]
impl DbSession for MySqlSession {
    async fn execute(&mut self, sql: &str) -> Result<Execution, DbError> {
        let mut stream = sqlx::raw_sql(sql).fetch_many(&mut self.conn);

        let mut columns: Vec<String> = Vec::new();
        let mut rows = Vec::new();
        let mut rows_affected = 0u64;
        let mut saw_rows = false;

        while let Some(item) = stream.next().await {
            match item.map_err(DbError::statement)? {
                Either::Left(done) => {
                    rows_affected += done.rows_affected();
                }
                Either::Right(row) => {
                    if !saw_rows {
                        columns = row.columns().iter().map(|c| c.name().to_string()).collect();
                        saw_rows = true;
                    }
                    rows.push((0..row.columns().len()).map(|i| decode_cell(&row, i)).collect());
                }
            }
        }

        if saw_rows || returns_rows(sql) {
            Ok(Execution::Rows(ResultSet::new(columns, rows)))
        } else {
            Ok(Execution::Affected { rows_affected })
        }
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        (&mut self.conn)
            .execute(sqlx::raw_sql("COMMIT"))
            .await
            .map(|_| ())
            .map_err(|e| DbError::Transaction(e.to_string()))
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        (&mut self.conn)
            .execute(sqlx::raw_sql("ROLLBACK"))
            .await
            .map(|_| ())
            .map_err(|e| DbError::Transaction(e.to_string()))
    }

    async fn ping(&mut self) -> bool {
        match self.conn.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!("MySQL ping failed: {}", e);
                false
            }
        }
    }

    async fn close(self: Box<Self>) -> Result<(), DbError> {
        self.conn
            .close()
            .await
            .map_err(|e| DbError::Transaction(e.to_string()))
    }
}

fn returns_rows(sql: &str) -> bool {
    ROW_RETURNING_KEYWORDS.contains(&TextUtils::leading_keyword(sql).as_str())
}

fn decode_cell(row: &MySqlRow, index: usize) -> ScalarValue {
    let value_ref = match row.try_get_raw(index) {
        Ok(v) => v,
        Err(_) => return ScalarValue::Null,
    };
    if value_ref.is_null() {
        return ScalarValue::Null;
    }

    let type_info = value_ref.type_info();
    let type_name = type_info.name().to_ascii_uppercase();

    let decoded = match type_name.as_str() {
        "BOOLEAN" => row.try_get_unchecked::<bool, _>(index).ok().map(ScalarValue::Bool),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            row.try_get_unchecked::<i64, _>(index).ok().map(ScalarValue::Int)
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" | "BIT" => {
            row.try_get_unchecked::<u64, _>(index).ok().map(ScalarValue::UInt)
        }
        "FLOAT" => row
            .try_get_unchecked::<f32, _>(index)
            .ok()
            .map(|f| ScalarValue::Float(f64::from(f))),
        "DOUBLE" => row.try_get_unchecked::<f64, _>(index).ok().map(ScalarValue::Float),
        "DECIMAL" => row
            .try_get_unchecked::<sqlx::types::BigDecimal, _>(index)
            .ok()
            .map(ScalarValue::Decimal),
        "DATE" => row.try_get_unchecked::<NaiveDate, _>(index).ok().map(ScalarValue::Date),
        "DATETIME" => row
            .try_get_unchecked::<NaiveDateTime, _>(index)
            .ok()
            .map(ScalarValue::DateTime),
        "TIMESTAMP" => row
            .try_get_unchecked::<DateTime<Utc>, _>(index)
            .ok()
            .map(ScalarValue::Timestamp),
        "TIME" => row.try_get_unchecked::<NaiveTime, _>(index).ok().map(ScalarValue::Time),
        "JSON" => row
            .try_get_unchecked::<serde_json::Value, _>(index)
            .ok()
            .map(ScalarValue::Json),
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB"
        | "GEOMETRY" => row
            .try_get_unchecked::<Vec<u8>, _>(index)
            .ok()
            .map(ScalarValue::Bytes),
        _ => None,
    };

    decoded
        .or_else(|| row.try_get_unchecked::<String, _>(index).ok().map(ScalarValue::Text))
        .or_else(|| row.try_get_unchecked::<Vec<u8>, _>(index).ok().map(ScalarValue::Bytes))
        .unwrap_or(ScalarValue::Null)
}
