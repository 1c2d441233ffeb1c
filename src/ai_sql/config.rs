//! Configuration for AI SQL generation

use serde::{Deserialize, Serialize};
use std::fmt;

/// AI provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiProviderType {
    #[default]
    OpenAI,
    Gemini,
    #[serde(alias = "claude")]
    Anthropic,
}

impl AiProviderType {
    /// Environment variable that supplies the API key
    pub fn api_key_env(&self) -> &'static str {
        match self {
            AiProviderType::OpenAI => "OPENAI_API_KEY",
            AiProviderType::Gemini => "GEMINI_API_KEY",
            AiProviderType::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

impl fmt::Display for AiProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AiProviderType::OpenAI => "OpenAI",
            AiProviderType::Gemini => "Gemini",
            AiProviderType::Anthropic => "Anthropic",
        })
    }
}

/// Configuration for AI SQL generation
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiSqlConfig {
    /// Provider used when a request does not name one
    pub provider: AiProviderType,

    // === OpenAI Configuration ===
    /// OpenAI API key (can also use OPENAI_API_KEY env var)
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,

    // === Gemini Configuration ===
    /// Gemini API key (can also use GEMINI_API_KEY env var)
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: String,

    // === Anthropic Configuration ===
    /// Anthropic API key (can also use ANTHROPIC_API_KEY env var)
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: String,
    pub anthropic_base_url: String,

    // === Generation Parameters ===
    /// Temperature (0.0 = deterministic, 1.0 = creative)
    pub temperature: f32,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for AiSqlConfig {
    fn default() -> Self {
        Self {
            provider: AiProviderType::OpenAI,

            openai_api_key: None,
            openai_model: "gpt-4o-mini".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),

            gemini_api_key: None,
            gemini_model: "gemini-1.5-flash".to_string(),
            gemini_base_url: "https://generativelanguage.googleapis.com".to_string(),

            anthropic_api_key: None,
            anthropic_model: "claude-sonnet-4-5-20250929".to_string(),
            anthropic_base_url: "https://api.anthropic.com".to_string(),

            temperature: 0.0, // Deterministic for SQL generation
            max_tokens: 2048,
            timeout_seconds: 60,
        }
    }
}

impl fmt::Debug for AiSqlConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = |k: &Option<String>| k.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("AiSqlConfig")
            .field("provider", &self.provider)
            .field("openai_api_key", &key(&self.openai_api_key))
            .field("openai_model", &self.openai_model)
            .field("gemini_api_key", &key(&self.gemini_api_key))
            .field("gemini_model", &self.gemini_model)
            .field("anthropic_api_key", &key(&self.anthropic_api_key))
            .field("anthropic_model", &self.anthropic_model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

impl AiSqlConfig {
    /// Configured API key for a provider, ignoring blank values
    pub fn get_api_key(&self, provider: AiProviderType) -> Option<String> {
        let configured = match provider {
            AiProviderType::OpenAI => &self.openai_api_key,
            AiProviderType::Gemini => &self.gemini_api_key,
            AiProviderType::Anthropic => &self.anthropic_api_key,
        };
        configured.clone().filter(|k| !k.trim().is_empty())
    }

    /// Take provider keys from `OPENAI_API_KEY`, `GEMINI_API_KEY` and `ANTHROPIC_API_KEY`
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for provider in [
            AiProviderType::OpenAI,
            AiProviderType::Gemini,
            AiProviderType::Anthropic,
        ] {
            let Some(key) = lookup(provider.api_key_env()).filter(|k| !k.trim().is_empty()) else {
                continue;
            };
            let slot = match provider {
                AiProviderType::OpenAI => &mut self.openai_api_key,
                AiProviderType::Gemini => &mut self.gemini_api_key,
                AiProviderType::Anthropic => &mut self.anthropic_api_key,
            };
            *slot = Some(key);
        }
    }

    /// Default model for a provider
    pub fn model(&self, provider: AiProviderType) -> &str {
        match provider {
            AiProviderType::OpenAI => &self.openai_model,
            AiProviderType::Gemini => &self.gemini_model,
            AiProviderType::Anthropic => &self.anthropic_model,
        }
    }

    pub fn base_url(&self, provider: AiProviderType) -> &str {
        match provider {
            AiProviderType::OpenAI => &self.openai_base_url,
            AiProviderType::Gemini => &self.gemini_base_url,
            AiProviderType::Anthropic => &self.anthropic_base_url,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err("Temperature must be between 0.0 and 1.0".to_string());
        }

        if self.max_tokens == 0 {
            return Err("max_tokens must be greater than 0".to_string());
        }

        if self.timeout_seconds == 0 {
            return Err("timeout_seconds must be greater than 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AiSqlConfig::default();
        assert_eq!(config.provider, AiProviderType::OpenAI);
        assert_eq!(config.temperature, 0.0);
        assert_eq!(config.timeout_seconds, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = AiSqlConfig::default();

        config.temperature = 2.0;
        assert!(config.validate().is_err());

        config.temperature = 0.5;
        assert!(config.validate().is_ok());

        config.timeout_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_configured_key_wins() {
        let config = AiSqlConfig {
            gemini_api_key: Some("from-config".to_string()),
            ..Default::default()
        };
        assert_eq!(
            config.get_api_key(AiProviderType::Gemini),
            Some("from-config".to_string())
        );
    }

    #[test]
    fn test_environment_keys_fill_providers() {
        let mut config = AiSqlConfig {
            openai_api_key: Some("from-config".to_string()),
            ..Default::default()
        };
        config.apply_env(|name| match name {
            "GEMINI_API_KEY" => Some("gemini-env".to_string()),
            "ANTHROPIC_API_KEY" => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(
            config.get_api_key(AiProviderType::OpenAI).as_deref(),
            Some("from-config")
        );
        assert_eq!(
            config.get_api_key(AiProviderType::Gemini).as_deref(),
            Some("gemini-env")
        );
        assert_eq!(config.get_api_key(AiProviderType::Anthropic), None);
    }

    #[test]
    fn test_provider_names_deserialize() {
        let parsed: Vec<AiProviderType> =
            serde_json::from_str(r#"["openai", "gemini", "anthropic", "claude"]"#).unwrap();
        assert_eq!(
            parsed,
            vec![
                AiProviderType::OpenAI,
                AiProviderType::Gemini,
                AiProviderType::Anthropic,
                AiProviderType::Anthropic
            ]
        );
    }

    #[test]
    fn test_debug_hides_keys() {
        let config = AiSqlConfig {
            openai_api_key: Some("sk-secret".to_string()),
            ..Default::default()
        };
        assert!(!format!("{config:?}").contains("sk-secret"));
    }
}
