//! Schema introspection and the model-facing description of a database.
//!
//! [`SchemaInspector`] builds a [`SchemaSnapshot`] from a live session. Key
//! extraction from `SHOW CREATE TABLE` output is best-effort: single-column
//! primary and foreign keys are modelled, composite keys are reported as a
//! diagnostic instead.

pub mod analysis;
pub mod ddl;
pub mod inspector;
pub mod render;

use serde::Serialize;

use crate::db::NormalizedRow;

pub use analysis::{DatabaseStats, SchemaAnalysis, SchemaIssue, SchemaPattern, IndexSuggestion};
pub use inspector::SchemaInspector;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    /// `PRI`, `UNI`, `MUL` or empty, as reported by `DESCRIBE`.
    pub key: String,
    pub default: Option<String>,
    pub extra: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKey {
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub primary_key: Option<String>,
    /// Set when the table's primary key spans several columns.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub composite_primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
    pub indexes: Vec<IndexInfo>,
    pub row_count: Option<u64>,
    pub sample_rows: Vec<NormalizedRow>,
}

impl TableInfo {
    pub fn foreign_key_for(&self, column: &str) -> Option<&ForeignKey> {
        self.foreign_keys.iter().find(|fk| fk.column == column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RelationshipEdge {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaSnapshot {
    pub database: String,
    pub tables: Vec<TableInfo>,
    pub relationships: Vec<RelationshipEdge>,
    pub stats: DatabaseStats,
    pub analysis: SchemaAnalysis,
}

impl SchemaSnapshot {
    /// Assemble a snapshot, deriving edges, stats and diagnostics from the tables.
    pub fn from_tables(database: impl Into<String>, tables: Vec<TableInfo>) -> Self {
        let relationships = analysis::relationships(&tables);
        let stats = analysis::stats(&tables, &relationships);
        let analysis = analysis::analyze(&tables, &relationships);
        Self {
            database: database.into(),
            tables,
            relationships,
            stats,
            analysis,
        }
    }

    pub fn table(&self, name: &str) -> Option<&TableInfo> {
        self.tables.iter().find(|t| t.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReducedColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReducedTable {
    pub name: String,
    pub columns: Vec<ReducedColumn>,
    pub sample_rows: Vec<NormalizedRow>,
}

/// Structural dump used when the rich snapshot cannot be built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReducedSchema {
    pub database: String,
    pub tables: Vec<ReducedTable>,
}

/// What the prompt assembler receives.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaDescription {
    Rich(SchemaSnapshot),
    Reduced(ReducedSchema),
}

impl SchemaDescription {
    pub fn database(&self) -> &str {
        match self {
            SchemaDescription::Rich(s) => &s.database,
            SchemaDescription::Reduced(r) => &r.database,
        }
    }

    pub fn render(&self) -> String {
        match self {
            SchemaDescription::Rich(s) => render::render_snapshot(s),
            SchemaDescription::Reduced(r) => render::render_reduced(r),
        }
    }
}
