//! Turning questions into vetted SQL.

pub mod complexity;
pub mod safety;
pub mod sanitize;
pub mod synthesizer;

use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::error::QueryError;
use crate::utils::TextUtils;

pub use complexity::{ComplexityLevel, ComplexityProfile};
pub use safety::{find_destructive, DestructiveOperation};
pub use sanitize::sanitize;
pub use synthesizer::{QuerySynthesizer, SynthesisSettings};

const SENTINEL_PREFIX: &str = "ERROR:";

/// Statements the model is allowed to answer with.
const SQL_KEYWORDS: &[&str] = &[
    "SELECT", "WITH", "SHOW", "DESCRIBE", "DESC", "EXPLAIN", "INSERT", "UPDATE", "DELETE",
    "REPLACE", "CREATE", "ALTER", "DROP", "TRUNCATE", "CALL",
];

/// Sanitized SQL that passed the destructive-operation filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SynthesizedQuery(String);

impl SynthesizedQuery {
    /// Sanitize raw model output and run every check on it.
    pub fn vet(raw: &str) -> Result<Self, QueryError> {
        let sql = sanitize(raw);

        if sql.len() >= SENTINEL_PREFIX.len()
            && sql.is_char_boundary(SENTINEL_PREFIX.len())
            && sql[..SENTINEL_PREFIX.len()].eq_ignore_ascii_case(SENTINEL_PREFIX)
        {
            return Err(QueryError::AmbiguousQuery(sql[SENTINEL_PREFIX.len()..].to_string()));
        }

        if sql.is_empty() {
            return Err(QueryError::EmptyGeneration);
        }
        let keyword = TextUtils::leading_keyword(&sql);
        if !SQL_KEYWORDS.contains(&keyword.as_str()) {
            debug!("Generated text does not start with a SQL keyword: {:?}", keyword);
            return Err(QueryError::EmptyGeneration);
        }

        if let Some(op) = find_destructive(&sql) {
            return Err(QueryError::UnsafeOperation(op));
        }

        Ok(Self(sql))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    pub fn complexity(&self) -> ComplexityProfile {
        ComplexityProfile::of(&self.0)
    }
}

impl fmt::Display for SynthesizedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SynthesizedQuery {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_vet_accepts_fenced_select() {
        let query = SynthesizedQuery::vet("```sql\nSELECT COUNT(*) AS count FROM orders;\n```").unwrap();
        assert_eq!(query.as_str(), "SELECT COUNT(*) AS count FROM orders");
    }

    #[test]
    fn test_vet_reports_sentinel_detail() {
        match SynthesizedQuery::vet("ERROR: Ambiguous Query") {
            Err(QueryError::AmbiguousQuery(detail)) => assert_eq!(detail, " Ambiguous Query"),
            other => panic!("expected ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn test_vet_rejects_prose_and_empty_output() {
        assert!(matches!(SynthesizedQuery::vet("```sql\n```"), Err(QueryError::EmptyGeneration)));
        assert!(matches!(
            SynthesizedQuery::vet("I am not sure what you mean."),
            Err(QueryError::EmptyGeneration)
        ));
    }

    #[test]
    fn test_vet_rejects_destructive() {
        assert!(matches!(
            SynthesizedQuery::vet("UPDATE users SET active=0"),
            Err(QueryError::UnsafeOperation(DestructiveOperation::UpdateWithoutWhere))
        ));
        assert!(SynthesizedQuery::vet("UPDATE users SET active=0 WHERE id=1").is_ok());
    }

    #[test]
    fn test_leading_parenthesis_is_accepted() {
        let query = SynthesizedQuery::vet("(SELECT 1) UNION (SELECT 2)").unwrap();
        let profile = query.complexity();
        assert_eq!(profile.subqueries, 2);
        assert_eq!(profile.level, ComplexityLevel::Moderate);

        let plain = SynthesizedQuery::vet("(SELECT id FROM orders)").unwrap();
        assert_eq!(plain.complexity().level, ComplexityLevel::Simple);
    }

    proptest! {
        #[test]
        fn prop_sentinel_with_any_suffix_is_ambiguous(suffix in "[^\\n`#-]{0,40}") {
            let raw = format!("ERROR:{suffix}");
            let is_ambiguous = matches!(SynthesizedQuery::vet(&raw), Err(QueryError::AmbiguousQuery(_)));
            prop_assert!(is_ambiguous);
        }
    }
}
