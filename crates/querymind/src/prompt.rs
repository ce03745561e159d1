//! Instruction payloads sent to the generation backend.
//!
//! Both builders are pure functions of their inputs.

use std::fmt::Write;

use crate::db::NormalizedRow;
use crate::history::ConversationHistory;
use crate::schema::SchemaDescription;
use crate::utils::TextUtils;

/// What the model must answer with when a question cannot be mapped safely.
pub const AMBIGUOUS_SENTINEL: &str = "ERROR: Ambiguous Query";

pub const EMPTY_HISTORY_PLACEHOLDER: &str = "No previous conversation.";

/// Rows embedded in the explanation prompt; the remainder is summarized as a count.
const MAX_RESULT_ROWS_IN_PROMPT: usize = 50;
const MAX_RESULT_CHARS_IN_PROMPT: usize = 12_000;

pub fn render_history(history: &ConversationHistory) -> String {
    if history.is_empty() {
        return EMPTY_HISTORY_PLACEHOLDER.to_string();
    }
    history
        .turns()
        .map(|turn| format!("User: {}\nResponse: {}", turn.question, turn.query))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_sql_prompt(
    schema: &SchemaDescription,
    history: &ConversationHistory,
    question: &str,
) -> String {
    format!(
        "You are an expert MySQL query writer. Translate the user's question into a single SQL \
statement for the database described below.

## Database structure
{schema}

## Conversation so far
{history}

## Question
{question}

## Output rules
1. Output only the SQL statement itself.
2. Do not add explanations, comments or markdown code fences.
3. Use only tables and columns that appear in the database structure; the statement must run on MySQL as written.
4. Resolve follow-up references (\"those\", \"the same customers\") against the conversation so far.
5. Join along the listed relationships where the question spans several tables.
6. If the question cannot be mapped to one unambiguous query, output exactly: {sentinel}",
        schema = schema.render(),
        history = render_history(history),
        question = question.trim(),
        sentinel = AMBIGUOUS_SENTINEL,
    )
}

pub fn build_answer_prompt(question: &str, sql: &str, rows: &[NormalizedRow]) -> String {
    format!(
        "A user asked: \"{question}\"

The following MySQL query was run to answer it:
{sql}

It returned:
{results}

Answer the user's question in plain language using only these results. Be concise, quote the \
concrete numbers and values, and say so plainly if nothing matched.",
        question = question.trim(),
        sql = sql,
        results = render_results(rows),
    )
}

fn render_results(rows: &[NormalizedRow]) -> String {
    if rows.is_empty() {
        return "(no rows)".to_string();
    }
    let shown = &rows[..rows.len().min(MAX_RESULT_ROWS_IN_PROMPT)];
    let mut text = serde_json::to_string(shown).unwrap_or_else(|_| "[]".to_string());
    text = TextUtils::truncate_with_ellipsis(&text, MAX_RESULT_CHARS_IN_PROMPT).into_owned();
    if rows.len() > shown.len() {
        let _ = write!(text, "\n({} more rows not shown; {} rows in total)", rows.len() - shown.len(), rows.len());
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::ConversationTurn;
    use crate::schema::{ReducedSchema, SchemaDescription};
    use serde_json::json;

    fn empty_schema() -> SchemaDescription {
        SchemaDescription::Reduced(ReducedSchema {
            database: "shop".into(),
            tables: Vec::new(),
        })
    }

    #[test]
    fn test_empty_history_uses_placeholder() {
        let prompt = build_sql_prompt(&empty_schema(), &ConversationHistory::new(), "how many orders?");
        assert!(prompt.contains(EMPTY_HISTORY_PLACEHOLDER));
        assert!(prompt.contains("## Question\nhow many orders?"));
        assert!(prompt.contains(AMBIGUOUS_SENTINEL));
        assert!(prompt.contains("Database: shop"));
    }

    #[test]
    fn test_history_rendered_in_order() {
        let mut history = ConversationHistory::new();
        history.push(ConversationTurn::new("first", "SELECT 1"));
        history.push(ConversationTurn::new("second", "SELECT 2"));
        let rendered = render_history(&history);
        assert_eq!(rendered, "User: first\nResponse: SELECT 1\n\nUser: second\nResponse: SELECT 2");
    }

    #[test]
    fn test_answer_prompt_truncates_large_results() {
        let rows: Vec<NormalizedRow> = (0..120)
            .map(|i| json!({"id": i}).as_object().unwrap().clone())
            .collect();
        let prompt = build_answer_prompt("list ids", "SELECT id FROM t", &rows);
        assert!(prompt.contains("70 more rows not shown; 120 rows in total"));
        assert!(prompt.contains("{\"id\":49}"));
        assert!(!prompt.contains("{\"id\":50}"));
    }

    #[test]
    fn test_answer_prompt_empty_results() {
        let prompt = build_answer_prompt("anything?", "SELECT 1 FROM t WHERE 0", &[]);
        assert!(prompt.contains("(no rows)"));
    }
}
