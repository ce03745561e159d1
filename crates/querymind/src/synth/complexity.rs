//! Lexical complexity profile of a query.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

lazy_static! {
    static ref JOIN: Regex = Regex::new(r"(?i)\bjoin\b").unwrap();
    static ref WHERE: Regex = Regex::new(r"(?i)\bwhere\b").unwrap();
    static ref WHERE_END: Regex = Regex::new(r"(?i)\b(group\s+by|order\s+by|limit)\b").unwrap();
    static ref CONNECTIVE: Regex = Regex::new(r"(?i)\b(and|or)\b").unwrap();
    static ref AGGREGATE: Regex = Regex::new(r"(?i)\b(count|sum|avg|min|max)\s*\(").unwrap();
    static ref GROUP_BY: Regex = Regex::new(r"(?i)\bgroup\s+by\b").unwrap();
    static ref ORDER_BY: Regex = Regex::new(r"(?i)\border\s+by\b").unwrap();
    static ref LIMIT: Regex = Regex::new(r"(?i)\blimit\b").unwrap();
    static ref SUBQUERY: Regex = Regex::new(r"(?i)\(\s*select\b").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityLevel {
    Simple,
    Moderate,
    Complex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComplexityProfile {
    pub joins: usize,
    pub conditions: usize,
    pub aggregations: bool,
    pub grouping: bool,
    pub sorting: bool,
    pub limit: bool,
    pub subqueries: usize,
    pub score: usize,
    pub level: ComplexityLevel,
}

impl ComplexityProfile {
    pub fn of(sql: &str) -> Self {
        let joins = JOIN.find_iter(sql).count();
        let conditions = count_conditions(sql);
        let aggregations = AGGREGATE.is_match(sql);
        let grouping = GROUP_BY.is_match(sql);
        let sorting = ORDER_BY.is_match(sql);
        let limit = LIMIT.is_match(sql);
        let subqueries = SUBQUERY.find_iter(sql).count();

        let score = joins * 2
            + conditions
            + if aggregations { 3 } else { 0 }
            + if grouping { 2 } else { 0 }
            + if sorting { 1 } else { 0 }
            + subqueries * 3;

        let level = match score {
            s if s > 10 => ComplexityLevel::Complex,
            s if s > 5 => ComplexityLevel::Moderate,
            _ => ComplexityLevel::Simple,
        };

        Self {
            joins,
            conditions,
            aggregations,
            grouping,
            sorting,
            limit,
            subqueries,
            score,
            level,
        }
    }
}

fn count_conditions(sql: &str) -> usize {
    let Some(found) = WHERE.find(sql) else {
        return 0;
    };
    let clause = &sql[found.end()..];
    let clause = match WHERE_END.find(clause) {
        Some(end) => &clause[..end.start()],
        None => clause,
    };
    CONNECTIVE.find_iter(clause).count() + 1
}
