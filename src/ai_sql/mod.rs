//! AI-assisted SQL generation from natural language
//!
//! The engine combines a client-provided schema outline with the cached DDL
//! and sample rows of the current connection and database, sends them to the
//! selected provider and returns the cleaned SQL text. Nothing is retried.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod prompt;

pub use cache::{AiContextCache, CacheEntry, CacheKind, CacheReport, CachedContext};
pub use client::{AiProvider, clean_sql_response, create_ai_client};
pub use config::{AiProviderType, AiSqlConfig};
pub use error::{AiError, AiResult};
pub use prompt::PromptGenerator;

use tracing::{debug, info, warn};

/// Parameters of one generation request
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest<'a> {
    pub prompt: &'a str,
    pub schema: Option<&'a str>,
    pub provider: AiProviderType,
    pub api_key: Option<&'a str>,
    pub model: Option<&'a str>,
    /// Cache namespace of the connection the prompt is about
    pub connection_prefix: Option<&'a str>,
    pub database: Option<&'a str>,
}

/// Main AI SQL engine that orchestrates SQL generation
pub struct AiSqlEngine {
    config: AiSqlConfig,
    cache: AiContextCache,
}

impl AiSqlEngine {
    pub fn new(config: AiSqlConfig, cache: AiContextCache) -> Self {
        Self { config, cache }
    }

    pub fn config(&self) -> &AiSqlConfig {
        &self.config
    }

    pub fn cache(&self) -> &AiContextCache {
        &self.cache
    }

    /// Generate SQL with the provider named in the request
    pub async fn generate_sql(&self, request: &GenerateRequest<'_>) -> AiResult<String> {
        if request.prompt.trim().is_empty() {
            return Err(AiError::ValidationError("Missing required field: prompt".to_string()));
        }
        let provider = create_ai_client(request.provider, request.api_key, request.model, &self.config)?;
        self.generate_with(provider.as_ref(), request).await
    }

    /// Generate SQL with an already constructed provider
    pub async fn generate_with(
        &self,
        provider: &dyn AiProvider,
        request: &GenerateRequest<'_>,
    ) -> AiResult<String> {
        info!("Generating SQL with {}", provider.name());

        let context = match (request.connection_prefix, request.database) {
            (Some(prefix), Some(database)) => match self.cache.load_context(prefix, database).await {
                Ok(context) => context,
                Err(e) => {
                    warn!("Ignoring unreadable AI context cache: {}", e);
                    Vec::new()
                }
            },
            _ => Vec::new(),
        };
        debug!("Using {} cached context file(s)", context.len());

        let system_prompt = PromptGenerator::system_prompt();
        let user_prompt = PromptGenerator::user_prompt(request.prompt, request.schema, &context);
        debug!("User prompt length: {} chars", user_prompt.len());

        let raw = provider.complete(&system_prompt, &user_prompt).await?;
        let sql = clean_sql_response(&raw);
        if sql.is_empty() {
            return Err(AiError::ProviderError(format!(
                "{} returned an empty response",
                provider.name()
            )));
        }
        Ok(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Replays a canned completion and remembers the prompt it was given
    struct ScriptedProvider {
        reply: String,
        seen: Mutex<Option<String>>,
    }

    impl ScriptedProvider {
        fn replying(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                seen: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl AiProvider for ScriptedProvider {
        async fn complete(&self, _system_prompt: &str, user_prompt: &str) -> AiResult<String> {
            *self.seen.lock().unwrap() = Some(user_prompt.to_string());
            Ok(self.reply.clone())
        }

        fn name(&self) -> &str {
            "Scripted"
        }
    }

    fn engine(dir: &TempDir) -> AiSqlEngine {
        AiSqlEngine::new(
            AiSqlConfig::default(),
            AiContextCache::new(dir.path(), 10, Duration::from_secs(3600), 100),
        )
    }

    #[tokio::test]
    async fn test_generate_uses_cached_context() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        engine
            .cache()
            .write_entry("defa", "shop", "orders", CacheKind::Schema, "CREATE TABLE shop.orders (id UInt64)")
            .await
            .unwrap();

        let provider = ScriptedProvider::replying("```sql\nSELECT count() FROM shop.orders\n```");
        let request = GenerateRequest {
            prompt: "how many orders",
            connection_prefix: Some("defa"),
            database: Some("shop"),
            ..Default::default()
        };

        let sql = engine.generate_with(&provider, &request).await.unwrap();
        assert_eq!(sql, "SELECT count() FROM shop.orders");

        let seen = provider.seen.lock().unwrap().clone().unwrap();
        assert!(seen.contains("CREATE TABLE shop.orders (id UInt64)"));
        assert!(seen.contains("how many orders"));
    }

    #[tokio::test]
    async fn test_empty_completion_is_provider_error() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let provider = ScriptedProvider::replying("```\n```");
        let request = GenerateRequest {
            prompt: "anything",
            ..Default::default()
        };
        assert!(matches!(
            engine.generate_with(&provider, &request).await,
            Err(AiError::ProviderError(_))
        ));
    }

    #[tokio::test]
    async fn test_blank_prompt_rejected() {
        let dir = TempDir::new().unwrap();
        let request = GenerateRequest {
            prompt: "  ",
            api_key: Some("key"),
            ..Default::default()
        };
        assert!(matches!(
            engine(&dir).generate_sql(&request).await,
            Err(AiError::ValidationError(_))
        ));
    }
}
