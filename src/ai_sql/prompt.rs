//! Prompt generation utilities for AI SQL generation

use crate::ai_sql::cache::{CacheKind, CachedContext};
use std::fmt::Write;

/// Prompt generator for ClickHouse SQL queries
pub struct PromptGenerator;

impl PromptGenerator {
    /// Fixed system instruction sent with every request
    pub fn system_prompt() -> String {
        "You are an expert ClickHouse SQL query generator. Generate efficient, idiomatic \
         ClickHouse SQL. Respond with the SQL statement only, without explanations or \
         Markdown formatting."
            .to_string()
    }

    /// User prompt combining the client-provided schema, cached context and the request
    pub fn user_prompt(prompt: &str, schema: Option<&str>, context: &[CachedContext]) -> String {
        let mut text = String::new();

        if let Some(schema) = schema.map(str::trim).filter(|s| !s.is_empty()) {
            let _ = writeln!(text, "Schema:\n{schema}\n");
        }

        for entry in context {
            let label = match entry.kind {
                CacheKind::Schema => "DDL",
                CacheKind::Data => "Sample rows",
            };
            let _ = writeln!(
                text,
                "{label} for {}.{}:\n{}\n",
                entry.database,
                entry.table,
                entry.content.trim_end()
            );
        }

        let _ = write!(
            text,
            "User Query: {}\n\nGenerate the SQL query.",
            prompt.trim()
        );
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt() {
        let prompt = PromptGenerator::system_prompt();
        assert!(prompt.contains("ClickHouse"));
        assert!(prompt.contains("SQL query generator"));
    }

    #[test]
    fn test_user_prompt_includes_context() {
        let context = vec![
            CachedContext {
                database: "shop".to_string(),
                table: "orders".to_string(),
                kind: CacheKind::Schema,
                content: "CREATE TABLE shop.orders (id UInt64) ENGINE = MergeTree".to_string(),
            },
            CachedContext {
                database: "shop".to_string(),
                table: "orders".to_string(),
                kind: CacheKind::Data,
                content: "id\n1\n2".to_string(),
            },
        ];

        let prompt = PromptGenerator::user_prompt("top 10 orders", Some("orders(id)"), &context);
        assert!(prompt.starts_with("Schema:\norders(id)"));
        assert!(prompt.contains("DDL for shop.orders"));
        assert!(prompt.contains("Sample rows for shop.orders"));
        assert!(prompt.ends_with("User Query: top 10 orders\n\nGenerate the SQL query."));
    }

    #[test]
    fn test_user_prompt_without_context() {
        let prompt = PromptGenerator::user_prompt("count users", None, &[]);
        assert!(prompt.starts_with("User Query: count users"));
    }
}
