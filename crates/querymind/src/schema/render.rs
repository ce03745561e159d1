//! Plain-text rendering of schema descriptions for prompts.

use std::fmt::Write;

use serde_json::Value;

use super::{ReducedSchema, SchemaPattern, SchemaSnapshot};
use crate::db::NormalizedRow;
use crate::utils::TextUtils;

/// Sample cell values longer than this are cut before reaching the prompt.
const MAX_SAMPLE_VALUE_CHARS: usize = 80;

pub fn render_snapshot(snapshot: &SchemaSnapshot) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "Database: {}", snapshot.database);
    let _ = writeln!(
        out,
        "{} tables and {} relationships\n",
        snapshot.stats.table_count, snapshot.stats.total_relationships
    );

    let analysis = &snapshot.analysis;
    out.push_str("Schema analysis:\n");
    match &analysis.pattern {
        SchemaPattern::Unknown => out.push_str("- Pattern: unknown\n"),
        SchemaPattern::StarOrSnowflake { center_tables } => {
            let _ = writeln!(
                out,
                "- Pattern: star or snowflake (center: {})",
                center_tables.join(", ")
            );
        }
    }
    if !analysis.issues.is_empty() {
        out.push_str("- Potential issues:\n");
        for issue in &analysis.issues {
            let _ = writeln!(out, "  * {}", issue);
        }
    }
    if !analysis.suggestions.is_empty() {
        out.push_str("- Optimization suggestions:\n");
        for suggestion in &analysis.suggestions {
            let _ = writeln!(out, "  * {}", suggestion);
        }
    }
    out.push('\n');

    for table in &snapshot.tables {
        match table.row_count {
            Some(n) => {
                let _ = writeln!(out, "Table: {} ({} rows)", table.name, n);
            }
            None => {
                let _ = writeln!(out, "Table: {}", table.name);
            }
        }

        out.push_str("  Columns:\n");
        for col in &table.columns {
            let mut line = format!("  - {} ({})", col.name, col.data_type);
            if table.primary_key.as_deref() == Some(col.name.as_str()) {
                line.push_str(" [PK]");
            }
            if let Some(fk) = table.foreign_key_for(&col.name) {
                let _ = write!(line, " [FK -> {}.{}]", fk.referenced_table, fk.referenced_column);
            }
            if col.nullable {
                line.push_str(" [nullable]");
            }
            if !col.extra.is_empty() {
                let _ = write!(line, " [{}]", col.extra);
            }
            out.push_str(&line);
            out.push('\n');
        }

        if !table.indexes.is_empty() {
            out.push_str("  Indexes:\n");
            for idx in &table.indexes {
                let kind = if idx.unique { "unique index" } else { "index" };
                let _ = writeln!(out, "  - {} {} on {}", kind, idx.name, idx.columns.join(", "));
            }
        }

        write_samples(&mut out, &table.sample_rows);
        out.push('\n');
    }

    if !snapshot.relationships.is_empty() {
        out.push_str("Relationships:\n");
        for rel in &snapshot.relationships {
            let _ = writeln!(
                out,
                "- {}.{} -> {}.{}",
                rel.from_table, rel.from_column, rel.to_table, rel.to_column
            );
        }
    }

    out.trim_end().to_string()
}

pub fn render_reduced(schema: &ReducedSchema) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Database: {}\n", schema.database);

    for table in &schema.tables {
        let _ = writeln!(out, "Table: {}", table.name);
        out.push_str("  Columns:\n");
        for col in &table.columns {
            let marker = match col.key.as_str() {
                "PRI" => " [PK]",
                "MUL" => " [FK/index]",
                "UNI" => " [unique]",
                _ => "",
            };
            let _ = writeln!(out, "  - {} ({}){}", col.name, col.data_type, marker);
        }
        write_samples(&mut out, &table.sample_rows);
        out.push('\n');
    }

    out.trim_end().to_string()
}

fn write_samples(out: &mut String, rows: &[NormalizedRow]) {
    if rows.is_empty() {
        return;
    }
    out.push_str("  Sample rows:\n");
    for (i, row) in rows.iter().enumerate() {
        let cells: Vec<String> = row
            .iter()
            .map(|(k, v)| format!("{}={}", k, sample_value(v)))
            .collect();
        let _ = writeln!(out, "  - row {}: {}", i + 1, cells.join(", "));
    }
}

fn sample_value(value: &Value) -> String {
    let text = match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    TextUtils::truncate_with_ellipsis(&text, MAX_SAMPLE_VALUE_CHARS).into_owned()
}
