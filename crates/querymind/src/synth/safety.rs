//! Lexical filter for destructive statements.
//!
//! A safety net for generated text, not a security boundary: it over-matches
//! keywords inside string literals and does not see through every dialect
//! form of a destructive statement.

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

lazy_static! {
    static ref DROP_DATABASE: Regex = Regex::new(r"(?i)\bdrop\s+(database|schema)\b").unwrap();
    static ref DROP_TABLE: Regex = Regex::new(r"(?i)\bdrop\s+table\b").unwrap();
    static ref TRUNCATE: Regex = Regex::new(r"(?i)\btruncate\s+(table\b|[`\w])").unwrap();
    static ref DELETE_FROM: Regex = Regex::new(r"(?i)\bdelete\s+from\b").unwrap();
    static ref ALTER_DROP: Regex = Regex::new(r"(?is)\balter\s+table\b.*\bdrop\b").unwrap();
    static ref UPDATE: Regex = Regex::new(r"(?i)\bupdate\b").unwrap();
    static ref WHERE: Regex = Regex::new(r"(?i)\bwhere\b").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DestructiveOperation {
    DropDatabase,
    DropTable,
    TruncateTable,
    DeleteWithoutWhere,
    AlterTableDrop,
    UpdateWithoutWhere,
}

impl fmt::Display for DestructiveOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DestructiveOperation::DropDatabase => "DROP DATABASE",
            DestructiveOperation::DropTable => "DROP TABLE",
            DestructiveOperation::TruncateTable => "TRUNCATE TABLE",
            DestructiveOperation::DeleteWithoutWhere => "DELETE without WHERE",
            DestructiveOperation::AlterTableDrop => "ALTER TABLE ... DROP",
            DestructiveOperation::UpdateWithoutWhere => "UPDATE without WHERE",
        };
        f.write_str(label)
    }
}

/// First destructive pattern found in `sql`, if any.
pub fn find_destructive(sql: &str) -> Option<DestructiveOperation> {
    if DROP_DATABASE.is_match(sql) {
        return Some(DestructiveOperation::DropDatabase);
    }
    if DROP_TABLE.is_match(sql) {
        return Some(DestructiveOperation::DropTable);
    }
    if TRUNCATE.is_match(sql) {
        return Some(DestructiveOperation::TruncateTable);
    }
    if lacks_where_after(&DELETE_FROM, sql) {
        return Some(DestructiveOperation::DeleteWithoutWhere);
    }
    if ALTER_DROP.is_match(sql) {
        return Some(DestructiveOperation::AlterTableDrop);
    }
    if lacks_where_after(&UPDATE, sql) {
        return Some(DestructiveOperation::UpdateWithoutWhere);
    }
    None
}

/// True if some match of `pattern` has no `WHERE` anywhere after it.
fn lacks_where_after(pattern: &Regex, sql: &str) -> bool {
    pattern
        .find_iter(sql)
        .any(|m| !WHERE.is_match(&sql[m.end()..]))
}
