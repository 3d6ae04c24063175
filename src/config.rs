use std::env;
use std::time::Duration;

use crate::types::LLMProvider;

const DEFAULT_MAX_UPLOAD_BYTES: usize = 200 * 1024 * 1024;
const DEFAULT_SESSION_TTL_SECS: u64 = 60 * 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub llm: LLMConfig,
    pub agent: AgentConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub max_upload_bytes: usize,
    /// Sessions untouched for this long are dropped
    pub session_ttl: Duration,
}

#[derive(Clone)]
pub struct LLMConfig {
    pub provider: LLMProvider,
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: String,
    pub max_tokens: Option<u32>,
}

// Keeps the key out of `{:?}` output
impl std::fmt::Debug for LLMConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LLMConfig")
            .field("provider", &self.provider)
            .field("api_key", &self.masked_api_key())
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl LLMConfig {
    /// First few characters of the key, for startup logging
    pub fn masked_api_key(&self) -> String {
        let prefix: String = self.api_key.chars().take(6).collect();
        format!("{}...", prefix)
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_iterations: usize,
    pub output_limit: usize,
    pub preview_rows: usize,
}

impl Config {
    /// Load `.env` if present, then read the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key/value source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = get("OPENAI_API_KEY").ok_or(ConfigError::Missing("OPENAI_API_KEY"))?;
        let provider_name = get("LLM_PROVIDER").unwrap_or_else(|| "openai".to_string());
        let provider = provider_name
            .parse::<LLMProvider>()
            .map_err(|_| ConfigError::Invalid {
                key: "LLM_PROVIDER",
                value: provider_name.clone(),
            })?;

        Ok(Self {
            server: ServerConfig {
                port: parse_or(&get, "PORT", 8501)?,
                host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                max_upload_bytes: parse_or(&get, "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
                session_ttl: Duration::from_secs(parse_or(&get, "SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS)?),
            },
            llm: LLMConfig {
                provider,
                api_key,
                base_url: get("OPENAI_BASE_URL"),
                model: get("LLM_MODEL").unwrap_or_else(|| "gpt-4".to_string()),
                max_tokens: Some(parse_or(&get, "LLM_MAX_TOKENS", 1024)?),
            },
            agent: AgentConfig {
                max_iterations: parse_or(&get, "AGENT_MAX_ITERATIONS", 10)?,
                output_limit: parse_or(&get, "AGENT_OUTPUT_LIMIT", 4000)?,
                preview_rows: parse_or(&get, "PREVIEW_ROWS", 5)?,
            },
        })
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_missing_api_key_is_fatal() {
        let err = Config::from_lookup(lookup(&[("PORT", "9000")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("OPENAI_API_KEY")));
        assert_eq!(err.to_string(), "OPENAI_API_KEY must be set");

        let err = Config::from_lookup(lookup(&[("OPENAI_API_KEY", "  ")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[("OPENAI_API_KEY", "sk-test-1234567890")])).unwrap();
        assert_eq!(config.server.port, 8501);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.llm.provider, LLMProvider::OpenAI);
        assert_eq!(config.llm.model, "gpt-4");
        assert_eq!(config.server.session_ttl, Duration::from_secs(3600));
        assert_eq!(config.agent.max_iterations, 10);
        assert_eq!(config.agent.preview_rows, 5);
        assert!(config.llm.base_url.is_none());
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let config = Config::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "k"),
            ("LLM_PROVIDER", "groq"),
            ("LLM_MODEL", "llama-3.1-70b"),
            ("PORT", "3000"),
            ("SESSION_TTL_SECS", "90"),
        ]))
        .unwrap();
        assert_eq!(config.server.session_ttl, Duration::from_secs(90));
        assert_eq!(config.llm.provider, LLMProvider::Groq);
        assert_eq!(config.llm.model, "llama-3.1-70b");
        assert_eq!(config.server.port, 3000);

        let err = Config::from_lookup(lookup(&[("OPENAI_API_KEY", "k"), ("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PORT", .. }));
    }

    #[test]
    fn test_debug_masks_api_key() {
        let config = Config::from_lookup(lookup(&[("OPENAI_API_KEY", "sk-secret-value-123")])).unwrap();
        let debug = format!("{:?}", config.llm);
        assert!(!debug.contains("secret-value"));
        assert!(debug.contains("sk-sec..."));
    }
}
