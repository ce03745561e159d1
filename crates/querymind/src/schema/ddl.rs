//! Key and index extraction from `SHOW CREATE TABLE` text.
//!
//! Pattern matching, not parsing: anything the patterns miss is simply absent
//! from the result.

use lazy_static::lazy_static;
use regex::Regex;

use super::{ForeignKey, IndexInfo};

lazy_static! {
    static ref PRIMARY_KEY: Regex = Regex::new(r"PRIMARY KEY\s*\(([^)]*)\)").unwrap();
    static ref FOREIGN_KEY: Regex = Regex::new(
        r"FOREIGN KEY\s*\(`([^`]+)`\)\s*REFERENCES\s*`([^`]+)`\s*\(`([^`]+)`\)"
    )
    .unwrap();
    static ref SECONDARY_INDEX: Regex =
        Regex::new(r"(?m)^\s*(UNIQUE\s+)?KEY\s+`([^`]+)`\s*\((.*)\)").unwrap();
    static ref QUOTED_NAME: Regex = Regex::new(r"`([^`]+)`").unwrap();
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedKeys {
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
    pub indexes: Vec<IndexInfo>,
}

pub fn extract_keys(create_statement: &str) -> ExtractedKeys {
    let primary_key = PRIMARY_KEY
        .captures(create_statement)
        .map(|caps| quoted_names(&caps[1]))
        .unwrap_or_default();

    let foreign_keys = FOREIGN_KEY
        .captures_iter(create_statement)
        .map(|caps| ForeignKey {
            column: caps[1].to_string(),
            referenced_table: caps[2].to_string(),
            referenced_column: caps[3].to_string(),
        })
        .collect();

    let indexes = SECONDARY_INDEX
        .captures_iter(create_statement)
        .map(|caps| IndexInfo {
            name: caps[2].to_string(),
            columns: quoted_names(&caps[3]),
            unique: caps.get(1).is_some(),
        })
        .collect();

    ExtractedKeys {
        primary_key,
        foreign_keys,
        indexes,
    }
}

fn quoted_names(list: &str) -> Vec<String> {
    QUOTED_NAME
        .captures_iter(list)
        .map(|caps| caps[1].to_string())
        .collect()
}
