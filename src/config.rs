use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::models::catalog_get;

/// Error type for configuration loading
#[derive(Debug)]
pub enum ConfigError {
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
    MissingProject,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError { path, source } => {
                write!(
                    f,
                    "Failed to read config file {}: {}",
                    path.display(),
                    source
                )
            }
            ConfigError::ParseError { path, source } => {
                write!(f, "Invalid TOML syntax in {}: {}", path.display(), source)
            }
            ConfigError::InvalidValue {
                field,
                value,
                reason,
            } => {
                write!(f, "Invalid value '{}' for '{}': {}", value, field, reason)
            }
            ConfigError::MissingProject => {
                write!(
                    f,
                    "No project id configured. Set project_id in config.toml or VERTEX_PROXY_PROJECT / GOOGLE_CLOUD_PROJECT."
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadError { source, .. } => Some(source),
            ConfigError::ParseError { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Proxy configuration loaded from `~/.vertex_proxy/config.toml` plus
/// environment overrides. Read once at startup, read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Google Cloud project id. Required.
    #[serde(default)]
    pub project_id: String,
    /// Default region for Anthropic models.
    #[serde(default = "default_region")]
    pub default_region: String,
    /// Default region for Google models.
    #[serde(default = "default_google_region")]
    pub google_region: String,
    #[serde(default = "default_model")]
    pub default_model: String,
    /// When non-empty, only these canonical ids are listed and served.
    #[serde(default)]
    pub enabled_models: Vec<String>,
    /// Alias -> canonical id. Layered over the compiled-in alias table.
    #[serde(default)]
    pub model_aliases: HashMap<String, String>,
    /// Canonical id -> ordered fallback candidates.
    #[serde(default)]
    pub fallback_chains: HashMap<String, Vec<String>>,
    /// Trim old messages when the estimated prompt exceeds the context window.
    #[serde(default)]
    pub auto_truncate: bool,
    /// Tokens reserved for the response when auto-truncating.
    #[serde(default = "default_reserve")]
    pub reserve_output_tokens: u32,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    /// Per-request wall clock timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_region() -> String {
    "us-east5".to_string()
}

fn default_google_region() -> String {
    "us-central1".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-5@20250929".to_string()
}

fn default_reserve() -> u32 {
    8192
}

fn default_port() -> u16 {
    8000
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_request_timeout() -> u64 {
    300
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            default_region: default_region(),
            google_region: default_google_region(),
            default_model: default_model(),
            enabled_models: Vec::new(),
            model_aliases: HashMap::new(),
            fallback_chains: HashMap::new(),
            auto_truncate: false,
            reserve_output_tokens: default_reserve(),
            port: default_port(),
            host: default_host(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Config {
    /// State directory: `~/.vertex_proxy`.
    pub fn dir() -> PathBuf {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".vertex_proxy")
    }

    pub fn path() -> PathBuf {
        if let Ok(p) = std::env::var("VERTEX_PROXY_CONFIG") {
            return PathBuf::from(p);
        }
        Self::dir().join("config.toml")
    }

    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path();
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::ReadError {
                path: path.clone(),
                source: e,
            })?;
            toml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.clone(),
                source: e,
            })?
        } else {
            Config::default()
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Environment variables override file values.
    fn apply_env(&mut self) {
        if let Ok(p) = std::env::var("VERTEX_PROXY_PROJECT") {
            self.project_id = p;
        } else if self.project_id.is_empty()
            && let Ok(p) = std::env::var("GOOGLE_CLOUD_PROJECT")
        {
            self.project_id = p;
        }
        if let Ok(r) = std::env::var("VERTEX_PROXY_REGION") {
            self.default_region = r;
        }
        if let Ok(r) = std::env::var("VERTEX_PROXY_GOOGLE_REGION") {
            self.google_region = r;
        }
        if let Ok(p) = std::env::var("VERTEX_PROXY_PORT")
            && let Ok(port) = p.parse()
        {
            self.port = port;
        }
    }

    /// Alias and fallback targets must land in the catalog; a typo here
    /// would otherwise surface as a confusing upstream 404 at request time.
    fn validate(&self) -> Result<(), ConfigError> {
        for (alias, target) in &self.model_aliases {
            if catalog_get(target).is_none() {
                return Err(ConfigError::InvalidValue {
                    field: format!("model_aliases.{alias}"),
                    value: target.clone(),
                    reason: "target is not a catalog model".to_string(),
                });
            }
        }
        for (model, chain) in &self.fallback_chains {
            for target in chain {
                if catalog_get(target).is_none() {
                    return Err(ConfigError::InvalidValue {
                        field: format!("fallback_chains.{model}"),
                        value: target.clone(),
                        reason: "fallback target is not a catalog model".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Require a project id; called by main after CLI overrides are applied.
    pub fn require_project(&self) -> Result<(), ConfigError> {
        if self.project_id.is_empty() {
            return Err(ConfigError::MissingProject);
        }
        Ok(())
    }

    pub fn with_overrides(mut self, port: Option<u16>, host: Option<String>) -> Self {
        if let Some(p) = port {
            self.port = p;
        }
        if let Some(h) = host {
            self.host = h;
        }
        self
    }

    /// Alias table as ordered pairs for the resolver.
    pub fn alias_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .model_aliases
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        pairs.sort();
        pairs
    }

    /// First untried fallback for a canonical model id.
    pub fn fallback_for(&self, canonical: &str) -> Option<&str> {
        self.fallback_chains
            .get(canonical)
            .and_then(|chain| chain.first())
            .map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.default_region, "us-east5");
        assert_eq!(config.google_region, "us-central1");
        assert!(!config.auto_truncate);
        assert_eq!(config.reserve_output_tokens, 8192);
    }

    #[test]
    fn test_with_overrides() {
        let config = Config::default().with_overrides(Some(3000), Some("0.0.0.0".to_string()));
        assert_eq!(config.port, 3000);
        assert_eq!(config.host, "0.0.0.0");
    }

    #[test]
    fn test_missing_project_rejected() {
        let config = Config::default();
        assert!(config.require_project().is_err());

        let mut config = Config::default();
        config.project_id = "my-project".to_string();
        assert!(config.require_project().is_ok());
    }

    #[test]
    fn test_alias_validation() {
        let mut config = Config::default();
        config
            .model_aliases
            .insert("fast".to_string(), "gemini-2.5-flash".to_string());
        assert!(config.validate().is_ok());

        config
            .model_aliases
            .insert("bad".to_string(), "not-a-model".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fallback_validation() {
        let mut config = Config::default();
        config.fallback_chains.insert(
            "claude-sonnet-4-5@20250929".to_string(),
            vec!["claude-haiku-4-5@20251001".to_string()],
        );
        assert!(config.validate().is_ok());
        assert_eq!(
            config.fallback_for("claude-sonnet-4-5@20250929"),
            Some("claude-haiku-4-5@20251001")
        );
        assert_eq!(config.fallback_for("gemini-2.5-pro"), None);

        config
            .fallback_chains
            .insert("x".to_string(), vec!["nope".to_string()]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_toml() {
        let toml_src = r#"
            project_id = "acme-ai"
            default_region = "europe-west1"
            auto_truncate = true

            [model_aliases]
            quick = "gemini-2.5-flash"

            [fallback_chains]
            "claude-sonnet-4-5@20250929" = ["claude-haiku-4-5@20251001"]
        "#;
        let config: Config = toml::from_str(toml_src).unwrap();
        assert_eq!(config.project_id, "acme-ai");
        assert_eq!(config.default_region, "europe-west1");
        assert!(config.auto_truncate);
        assert_eq!(
            config.model_aliases.get("quick").map(|s| s.as_str()),
            Some("gemini-2.5-flash")
        );
        assert!(config.validate().is_ok());
    }
}
