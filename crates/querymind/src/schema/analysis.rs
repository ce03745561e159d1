//! Aggregate statistics and lightweight structural diagnostics.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Serialize;

use super::{RelationshipEdge, TableInfo};

/// Tables above this many rows are expected to carry at least
/// [`MIN_INDEXES_FOR_LARGE_TABLE`] secondary indexes.
pub const LARGE_TABLE_ROWS: u64 = 10_000;
pub const MIN_INDEXES_FOR_LARGE_TABLE: usize = 2;
const LARGEST_TABLES_REPORTED: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSize {
    pub name: String,
    pub row_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatabaseStats {
    pub table_count: usize,
    pub total_relationships: usize,
    pub largest_tables: Vec<TableSize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "pattern", rename_all = "snake_case")]
pub enum SchemaPattern {
    Unknown,
    StarOrSnowflake { center_tables: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum SchemaIssue {
    MissingPrimaryKey { table: String },
    CompositePrimaryKey { table: String, columns: Vec<String> },
    IsolatedTable { table: String },
}

impl fmt::Display for SchemaIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaIssue::MissingPrimaryKey { table } => {
                write!(f, "table {} has no primary key", table)
            }
            SchemaIssue::CompositePrimaryKey { table, columns } => write!(
                f,
                "table {} has a composite primary key ({}) that is not modelled",
                table,
                columns.join(", ")
            ),
            SchemaIssue::IsolatedTable { table } => {
                write!(f, "table {} has no relationships with other tables", table)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexSuggestion {
    pub table: String,
    pub row_count: u64,
    pub index_count: usize,
}

impl fmt::Display for IndexSuggestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "table {} holds {} rows but only {} index(es); consider adding more",
            self.table, self.row_count, self.index_count
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaAnalysis {
    pub pattern: SchemaPattern,
    pub issues: Vec<SchemaIssue>,
    pub suggestions: Vec<IndexSuggestion>,
}

/// One edge per extracted foreign key, in table order.
pub fn relationships(tables: &[TableInfo]) -> Vec<RelationshipEdge> {
    tables
        .iter()
        .flat_map(|table| {
            table.foreign_keys.iter().map(move |fk| RelationshipEdge {
                from_table: table.name.clone(),
                from_column: fk.column.clone(),
                to_table: fk.referenced_table.clone(),
                to_column: fk.referenced_column.clone(),
            })
        })
        .collect()
}

pub fn stats(tables: &[TableInfo], relationships: &[RelationshipEdge]) -> DatabaseStats {
    let mut sized: Vec<TableSize> = tables
        .iter()
        .filter_map(|t| match t.row_count {
            Some(n) if n > 0 => Some(TableSize {
                name: t.name.clone(),
                row_count: n,
            }),
            _ => None,
        })
        .collect();
    sized.sort_by(|a, b| b.row_count.cmp(&a.row_count));
    sized.truncate(LARGEST_TABLES_REPORTED);

    DatabaseStats {
        table_count: tables.len(),
        total_relationships: relationships.len(),
        largest_tables: sized,
    }
}

pub fn analyze(tables: &[TableInfo], relationships: &[RelationshipEdge]) -> SchemaAnalysis {
    SchemaAnalysis {
        pattern: detect_pattern(tables, relationships),
        issues: find_issues(tables, relationships),
        suggestions: suggest_indexes(tables),
    }
}

/// More than two tables, and a non-empty minority (under a third of all
/// tables) referenced by more than one relationship.
fn detect_pattern(tables: &[TableInfo], relationships: &[RelationshipEdge]) -> SchemaPattern {
    if tables.len() <= 2 {
        return SchemaPattern::Unknown;
    }

    let mut references: HashMap<&str, usize> = HashMap::new();
    for rel in relationships {
        *references.entry(rel.to_table.as_str()).or_default() += 1;
    }

    let mut center_tables: Vec<String> = references
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(table, _)| table.to_string())
        .collect();
    center_tables.sort();

    if !center_tables.is_empty() && (center_tables.len() as f64) < tables.len() as f64 / 3.0 {
        SchemaPattern::StarOrSnowflake { center_tables }
    } else {
        SchemaPattern::Unknown
    }
}

fn find_issues(tables: &[TableInfo], relationships: &[RelationshipEdge]) -> Vec<SchemaIssue> {
    let mut issues = Vec::new();

    for table in tables {
        if table.primary_key.is_some() {
            continue;
        }
        if table.composite_primary_key.is_empty() {
            issues.push(SchemaIssue::MissingPrimaryKey {
                table: table.name.clone(),
            });
        } else {
            issues.push(SchemaIssue::CompositePrimaryKey {
                table: table.name.clone(),
                columns: table.composite_primary_key.clone(),
            });
        }
    }

    let connected: HashSet<&str> = relationships
        .iter()
        .flat_map(|r| [r.from_table.as_str(), r.to_table.as_str()])
        .collect();
    issues.extend(
        tables
            .iter()
            .filter(|t| !connected.contains(t.name.as_str()))
            .map(|t| SchemaIssue::IsolatedTable {
                table: t.name.clone(),
            }),
    );

    issues
}

fn suggest_indexes(tables: &[TableInfo]) -> Vec<IndexSuggestion> {
    tables
        .iter()
        .filter_map(|t| {
            let rows = t.row_count.unwrap_or(0);
            (rows > LARGE_TABLE_ROWS && t.indexes.len() < MIN_INDEXES_FOR_LARGE_TABLE).then(|| {
                IndexSuggestion {
                    table: t.name.clone(),
                    row_count: rows,
                    index_count: t.indexes.len(),
                }
            })
        })
        .collect()
}
