use tracing::{debug, info, warn};

use super::ddl::extract_keys;
use super::{
    ColumnInfo, ReducedColumn, ReducedSchema, ReducedTable, SchemaDescription, SchemaSnapshot,
    TableInfo,
};
use crate::db::{query_rows, quote_identifier, DbSession, NormalizedRow, ResultSet};
use crate::error::{DbError, QueryError};

const SYSTEM_SCHEMAS: &[&str] = &["information_schema", "performance_schema", "mysql", "sys"];

#[derive(Debug, Clone)]
pub struct SchemaInspector {
    sample_limit: usize,
}

impl Default for SchemaInspector {
    fn default() -> Self {
        Self { sample_limit: 3 }
    }
}

impl SchemaInspector {
    pub fn new(sample_limit: usize) -> Self {
        Self { sample_limit }
    }

    /// Rich snapshot, falling back to the reduced dump. The read snapshot
    /// opened by introspection is released before returning.
    pub async fn describe(&self, session: &mut dyn DbSession) -> Result<SchemaDescription, QueryError> {
        let result = self.describe_inner(session).await;
        if let Err(e) = session.rollback().await {
            debug!("Releasing introspection snapshot failed: {}", e);
        }
        result
    }

    async fn describe_inner(&self, session: &mut dyn DbSession) -> Result<SchemaDescription, QueryError> {
        let rich_error = match self.snapshot(session).await {
            Ok(snapshot) => return Ok(SchemaDescription::Rich(snapshot)),
            Err(QueryError::NoDatabaseSelected) => return Err(QueryError::NoDatabaseSelected),
            Err(e) => e,
        };
        warn!("Rich schema snapshot failed, using reduced dump: {}", rich_error);

        match self.reduced(session).await {
            Ok(reduced) => Ok(SchemaDescription::Reduced(reduced)),
            Err(QueryError::NoDatabaseSelected) => Err(QueryError::NoDatabaseSelected),
            Err(fallback_error) => Err(QueryError::SchemaUnavailable(format!(
                "{}; reduced dump also failed: {}",
                rich_error, fallback_error
            ))),
        }
    }

    pub async fn snapshot(&self, session: &mut dyn DbSession) -> Result<SchemaSnapshot, QueryError> {
        let database = current_database(session).await?;
        let table_names = list_tables(session).await?;

        let mut tables = Vec::with_capacity(table_names.len());
        for name in table_names {
            tables.push(self.inspect_table(session, &name).await?);
        }

        let snapshot = SchemaSnapshot::from_tables(database, tables);
        info!(
            "Schema snapshot of {}: {} tables, {} relationships",
            snapshot.database, snapshot.stats.table_count, snapshot.stats.total_relationships
        );
        Ok(snapshot)
    }

    pub async fn reduced(&self, session: &mut dyn DbSession) -> Result<ReducedSchema, QueryError> {
        let database = current_database(session).await?;
        let table_names = list_tables(session).await?;

        let mut tables = Vec::with_capacity(table_names.len());
        for name in table_names {
            let columns = describe_table(session, &name)
                .await?
                .into_iter()
                .map(|c| ReducedColumn {
                    name: c.name,
                    data_type: c.data_type,
                    key: c.key,
                })
                .collect();
            let sample_rows = self.sample_rows(session, &name).await;
            tables.push(ReducedTable {
                name,
                columns,
                sample_rows,
            });
        }

        Ok(ReducedSchema { database, tables })
    }

    /// Databases visible to the login, without the server's own schemas.
    pub async fn databases(&self, session: &mut dyn DbSession) -> Result<Vec<String>, DbError> {
        let rows = query_rows(session, "SHOW DATABASES").await?;
        Ok((0..rows.rows.len())
            .filter_map(|i| rows.text_at(i, 0))
            .filter(|name| !SYSTEM_SCHEMAS.contains(&name.to_ascii_lowercase().as_str()))
            .collect())
    }

    async fn inspect_table(&self, session: &mut dyn DbSession, name: &str) -> Result<TableInfo, QueryError> {
        let quoted = quote_identifier(name);

        let create = query_rows(session, &format!("SHOW CREATE TABLE {}", quoted))
            .await
            .map_err(|e| schema_error(name, e))?;
        let ddl = create.text_at(0, 1).unwrap_or_default();
        let keys = extract_keys(&ddl);

        let columns = describe_table(session, name).await?;

        let row_count = match query_rows(session, &format!("SELECT COUNT(*) AS count FROM {}", quoted)).await {
            Ok(rs) => rs.value(0, "count").and_then(|v| v.as_u64()),
            Err(e) => {
                debug!("Row count for {} unavailable: {}", name, e);
                None
            }
        };
        let sample_rows = self.sample_rows(session, name).await;

        let (primary_key, composite_primary_key) = match keys.primary_key.len() {
            0 => (None, Vec::new()),
            1 => (keys.primary_key.into_iter().next(), Vec::new()),
            _ => (None, keys.primary_key),
        };

        Ok(TableInfo {
            name: name.to_string(),
            columns,
            primary_key,
            composite_primary_key,
            foreign_keys: keys.foreign_keys,
            indexes: keys.indexes,
            row_count,
            sample_rows,
        })
    }

    async fn sample_rows(&self, session: &mut dyn DbSession, name: &str) -> Vec<NormalizedRow> {
        if self.sample_limit == 0 {
            return Vec::new();
        }
        let sql = format!("SELECT * FROM {} LIMIT {}", quote_identifier(name), self.sample_limit);
        match query_rows(session, &sql).await {
            Ok(rs) => rs.normalized(),
            Err(e) => {
                debug!("Sample rows for {} unavailable: {}", name, e);
                Vec::new()
            }
        }
    }
}

async fn current_database(session: &mut dyn DbSession) -> Result<String, QueryError> {
    let rs = query_rows(session, "SELECT DATABASE()")
        .await
        .map_err(|e| QueryError::SchemaUnavailable(e.to_string()))?;
    rs.first_text()
        .filter(|name| !name.is_empty())
        .ok_or(QueryError::NoDatabaseSelected)
}

async fn list_tables(session: &mut dyn DbSession) -> Result<Vec<String>, QueryError> {
    let rs = query_rows(session, "SHOW TABLES")
        .await
        .map_err(|e| QueryError::SchemaUnavailable(e.to_string()))?;
    Ok((0..rs.rows.len()).filter_map(|i| rs.text_at(i, 0)).collect())
}

async fn describe_table(session: &mut dyn DbSession, name: &str) -> Result<Vec<ColumnInfo>, QueryError> {
    let rs = query_rows(session, &format!("DESCRIBE {}", quote_identifier(name)))
        .await
        .map_err(|e| schema_error(name, e))?;
    Ok(parse_columns(&rs))
}

fn parse_columns(rs: &ResultSet) -> Vec<ColumnInfo> {
    (0..rs.rows.len())
        .filter_map(|i| {
            Some(ColumnInfo {
                name: rs.text(i, "Field")?,
                data_type: rs.text(i, "Type").unwrap_or_default(),
                nullable: rs
                    .text(i, "Null")
                    .map(|v| v.eq_ignore_ascii_case("YES"))
                    .unwrap_or(false),
                key: rs.text(i, "Key").unwrap_or_default(),
                default: rs.text(i, "Default"),
                extra: rs.text(i, "Extra").unwrap_or_default(),
            })
        })
        .collect()
}

fn schema_error(table: &str, err: DbError) -> QueryError {
    QueryError::SchemaUnavailable(format!("table {}: {}", table, err))
}
