//! AI provider client implementations

use crate::ai_sql::config::{AiProviderType, AiSqlConfig};
use crate::ai_sql::error::{AiError, AiResult};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Trait for AI providers
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Send one system + user exchange and return the raw completion text
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> AiResult<String>;

    /// Get provider name
    fn name(&self) -> &str;
}

/// Settings shared by every provider implementation
#[derive(Clone)]
struct ProviderSettings {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    timeout_secs: u64,
}

impl ProviderSettings {
    fn new(api_key: String, model: String, config: &AiSqlConfig, provider: AiProviderType) -> AiResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AiError::NetworkError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url(provider).trim_end_matches('/').to_string(),
            model,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout_secs: config.timeout_seconds,
        })
    }

    /// Send a prepared request and decode a successful JSON body
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> AiResult<T> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AiError::TimeoutError {
                    timeout_secs: self.timeout_secs,
                }
            } else {
                AiError::NetworkError(format!("Request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AiError::ApiError {
                status_code: status.as_u16(),
                message: provider_error_message(&error_text),
            });
        }

        response
            .json()
            .await
            .map_err(|e| AiError::ProviderError(format!("Failed to parse API response: {e}")))
    }
}

/// Pull `error.message` out of a provider error body, falling back to the raw text
fn provider_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

/// OpenAI chat completions provider
pub struct OpenAiProvider {
    settings: ProviderSettings,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: Message,
}

#[async_trait]
impl AiProvider for OpenAiProvider {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> AiResult<String> {
        let s = &self.settings;
        let url = format!("{}/chat/completions", s.base_url);
        debug!(
            "Calling OpenAI API with model: {}, max_tokens: {}, temperature: {}",
            s.model, s.max_tokens, s.temperature
        );

        let request_body = OpenAiRequest {
            model: s.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: user_prompt.to_string(),
                },
            ],
            temperature: s.temperature,
            max_tokens: s.max_tokens,
        };

        let response: OpenAiResponse = s
            .send(s.client.post(&url).bearer_auth(&s.api_key).json(&request_body))
            .await?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AiError::ProviderError("No choices in response".to_string()))
    }

    fn name(&self) -> &str {
        "OpenAI"
    }
}

/// Google Gemini generateContent provider
pub struct GeminiProvider {
    settings: ProviderSettings,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    system_instruction: GeminiContent,
    contents: Vec<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[async_trait]
impl AiProvider for GeminiProvider {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> AiResult<String> {
        let s = &self.settings;
        let url = format!("{}/v1beta/models/{}:generateContent", s.base_url, s.model);
        debug!("Calling Gemini API with model: {}", s.model);

        let request_body = GeminiRequest {
            system_instruction: GeminiContent {
                role: None,
                parts: vec![GeminiPart {
                    text: system_prompt.to_string(),
                }],
            },
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts: vec![GeminiPart {
                    text: user_prompt.to_string(),
                }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: s.temperature,
                max_output_tokens: s.max_tokens,
            },
        };

        let response: GeminiResponse = s
            .send(
                s.client
                    .post(&url)
                    .header("x-goog-api-key", &s.api_key)
                    .json(&request_body),
            )
            .await?;

        let text: String = response
            .candidates
            .into_iter()
            .next()
            .map(|c| c.content.parts.into_iter().map(|p| p.text).collect())
            .ok_or_else(|| AiError::ProviderError("No candidates in response".to_string()))?;
        Ok(text)
    }

    fn name(&self) -> &str {
        "Gemini"
    }
}

/// Anthropic Claude provider implementation
pub struct AnthropicProvider {
    settings: ProviderSettings,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl AiProvider for AnthropicProvider {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> AiResult<String> {
        let s = &self.settings;
        let url = format!("{}/v1/messages", s.base_url);

        let request_body = AnthropicRequest {
            model: s.model.clone(),
            max_tokens: s.max_tokens,
            temperature: s.temperature,
            system: Some(system_prompt.to_string()),
            messages: vec![Message {
                role: "user".to_string(),
                content: user_prompt.to_string(),
            }],
        };

        debug!(
            "Calling Anthropic API with model: {}, max_tokens: {}, temperature: {}",
            s.model, s.max_tokens, s.temperature
        );

        let response: AnthropicResponse = s
            .send(
                s.client
                    .post(&url)
                    .header("x-api-key", &s.api_key)
                    .header("anthropic-version", "2023-06-01")
                    .json(&request_body),
            )
            .await?;

        // Extract text content from the first content block
        response
            .content
            .into_iter()
            .next()
            .map(|c| c.text)
            .ok_or_else(|| AiError::ProviderError("No content in response".to_string()))
    }

    fn name(&self) -> &str {
        "Anthropic Claude"
    }
}

/// Create an AI client for `provider`
///
/// The request-supplied key and model take precedence over configuration.
pub fn create_ai_client(
    provider: AiProviderType,
    api_key: Option<&str>,
    model: Option<&str>,
    config: &AiSqlConfig,
) -> AiResult<Box<dyn AiProvider>> {
    let api_key = api_key
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .or_else(|| config.get_api_key(provider))
        .ok_or_else(|| {
            AiError::ConfigurationError(format!(
                "{provider} API key not configured. Provide apiKey or set {}",
                provider.api_key_env()
            ))
        })?;

    let model = model
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| config.model(provider))
        .to_string();

    info!("Using {} with model {}", provider, model);
    let settings = ProviderSettings::new(api_key, model, config, provider)?;

    Ok(match provider {
        AiProviderType::OpenAI => Box::new(OpenAiProvider { settings }),
        AiProviderType::Gemini => Box::new(GeminiProvider { settings }),
        AiProviderType::Anthropic => Box::new(AnthropicProvider { settings }),
    })
}

/// Clean SQL response by removing markdown code blocks and extra whitespace
pub fn clean_sql_response(sql: &str) -> String {
    let mut cleaned = extract_fenced_block(sql).unwrap_or(sql).trim().to_string();

    // Remove any leading/trailing semicolons if multiple
    while cleaned.ends_with(";;") {
        cleaned.pop();
    }

    cleaned
}

/// Body of the first Markdown code fence, without its language tag
fn extract_fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    let body_start = match after_fence.find('\n') {
        Some(newline) if after_fence[..newline].trim().chars().all(|c| c.is_ascii_alphanumeric()) => {
            newline + 1
        }
        _ => 0,
    };
    let body = &after_fence[body_start..];
    Some(match body.find("```") {
        Some(end) => &body[..end],
        None => body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("```sql\nSELECT * FROM users;\n```", "SELECT * FROM users;")]
    #[case("```\nSELECT * FROM users;\n```", "SELECT * FROM users;")]
    #[case("SELECT * FROM users;", "SELECT * FROM users;")]
    #[case("  SELECT * FROM users;  ", "SELECT * FROM users;")]
    #[case("SELECT * FROM users;;", "SELECT * FROM users;")]
    #[case(
        "Here is the query:\n```sql\nSELECT count() FROM hits\n```\nIt counts rows.",
        "SELECT count() FROM hits"
    )]
    fn test_clean_sql_response(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(clean_sql_response(input), expected);
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let config = AiSqlConfig {
            gemini_api_key: None,
            ..Default::default()
        };
        let result = create_ai_client(AiProviderType::Gemini, Some("  "), None, &config);
        match result {
            Err(AiError::ConfigurationError(message)) => assert!(message.contains("GEMINI_API_KEY")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("client built without an API key"),
        }
    }

    #[test]
    fn test_request_key_and_model_override() {
        let config = AiSqlConfig::default();
        let client =
            create_ai_client(AiProviderType::Anthropic, Some("key"), Some("custom"), &config).unwrap();
        assert_eq!(client.name(), "Anthropic Claude");
    }

    #[test]
    fn test_provider_error_message_extraction() {
        let body = r#"{"error": {"message": "Invalid API key", "type": "auth"}}"#;
        assert_eq!(provider_error_message(body), "Invalid API key");
        assert_eq!(provider_error_message("bad gateway\n"), "bad gateway");
    }
}
