//! Configuration management with layered loading
//!
//! Precedence (lowest to highest):
//! 1. Compiled defaults
//! 2. Global config: `$XDG_CONFIG_HOME/taxo/taxo.toml`
//! 3. Environment variables: `TAXO_*` prefix (e.g. `TAXO_LLM__API_KEY`)
//!
//! The loaded `Settings` object is constructed once and handed to every
//! collaborator client; nothing reads credentials from process globals.

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::errors::{TaxonomyError, TaxonomyResult};

/// Completion tokens reserved out of each model's context window.
const COMPLETION_RESERVE: usize = 4096;

/// LLM completion service settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmSettings {
    /// API key for the OpenAI-compatible completion endpoint
    pub api_key: Option<String>,
    /// Base URL, e.g. "https://api.openai.com/v1"
    pub base_url: Option<String>,
    /// Model identifier used for completion requests
    pub model: String,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: "gpt-4o".to_string(),
        }
    }
}

/// Embedding service settings. Key and URL fall back to the LLM settings
/// when unset, since both commonly sit behind the same gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    /// Model identifier used for embedding requests
    pub model: String,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: "doubao-embedding-large-text-250515".to_string(),
        }
    }
}

/// Refinement thresholds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RefineSettings {
    /// Minimum cosine similarity to propose consolidating two modes
    pub merge_threshold: f64,
    /// Fraction of total level-1 frequency a mode must retain to survive
    pub remove_threshold: f64,
}

impl Default for RefineSettings {
    fn default() -> Self {
        Self {
            merge_threshold: 0.6,
            remove_threshold: 0.01,
        }
    }
}

/// Unified configuration for taxo.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub llm: LlmSettings,
    pub embedding: EmbeddingSettings,
    pub refine: RefineSettings,
    /// Worker pool size for assignment and analysis
    pub max_workers: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            llm: LlmSettings::default(),
            embedding: EmbeddingSettings::default(),
            refine: RefineSettings::default(),
            max_workers: 5,
        }
    }
}

/// Get the XDG config directory for taxo.
pub fn global_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "taxo").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the global config file.
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("taxo.toml"))
}

impl Settings {
    /// Load settings with layered precedence (defaults, global TOML, env).
    pub fn load() -> TaxonomyResult<Self> {
        Self::load_from(global_config_path().as_deref())
    }

    /// Load with an explicit config file path; `None` skips the file layer.
    pub fn load_from(config_file: Option<&Path>) -> TaxonomyResult<Self> {
        let mut builder = Config::builder();

        if let Some(path) = config_file {
            if path.exists() {
                builder = builder.add_source(File::from(path.to_path_buf()).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("TAXO")
                .separator("__")
                .list_separator(","),
        );

        let config = builder.build().map_err(config_err)?;

        let mut settings = Settings::default();
        if let Ok(val) = config.get_string("llm.api_key") {
            settings.llm.api_key = Some(val);
        }
        if let Ok(val) = config.get_string("llm.base_url") {
            settings.llm.base_url = Some(val);
        }
        if let Ok(val) = config.get_string("llm.model") {
            settings.llm.model = val;
        }
        if let Ok(val) = config.get_string("embedding.api_key") {
            settings.embedding.api_key = Some(val);
        }
        if let Ok(val) = config.get_string("embedding.base_url") {
            settings.embedding.base_url = Some(val);
        }
        if let Ok(val) = config.get_string("embedding.model") {
            settings.embedding.model = val;
        }
        if let Ok(val) = config.get_float("refine.merge_threshold") {
            settings.refine.merge_threshold = val;
        }
        if let Ok(val) = config.get_float("refine.remove_threshold") {
            settings.refine.remove_threshold = val;
        }
        if let Ok(val) = config.get_int("max_workers") {
            settings.max_workers = val.max(1) as usize;
        }

        Ok(settings)
    }

    /// Resolved LLM credentials, the one fatal startup requirement.
    pub fn llm_credentials(&self) -> TaxonomyResult<(String, String)> {
        let key = self
            .llm
            .api_key
            .clone()
            .ok_or_else(|| TaxonomyError::MissingCredentials("llm.api_key".to_string()))?;
        let url = self
            .llm
            .base_url
            .clone()
            .ok_or_else(|| TaxonomyError::MissingCredentials("llm.base_url".to_string()))?;
        Ok((key, url))
    }

    /// Resolved embedding credentials, falling back to the LLM pair.
    pub fn embedding_credentials(&self) -> TaxonomyResult<(String, String)> {
        match (&self.embedding.api_key, &self.embedding.base_url) {
            (Some(key), Some(url)) => Ok((key.clone(), url.clone())),
            _ => self.llm_credentials(),
        }
    }

    /// Usable prompt budget for the configured completion model.
    pub fn context_len(&self) -> usize {
        let window = match self.llm.model.as_str() {
            "qwen3-max-preview" => 256_000,
            "grok-4-0709" => 256_000,
            "deepseek-v3.1" => 128_000,
            "claude-opus-4-1-20250805" => 200_000,
            "gemini-2.5-pro" => 1_000_000,
            _ => 128_000,
        };
        window - COMPLETION_RESERVE
    }

    /// Show the effective configuration as TOML.
    pub fn to_toml(&self) -> TaxonomyResult<String> {
        toml::to_string_pretty(self).map_err(|e| TaxonomyError::Config {
            message: format!("serialize config: {e}"),
        })
    }

    /// Generate a template config file.
    pub fn template() -> String {
        r#"# taxo configuration
#
# Locations (by precedence, lowest to highest):
#   Global: ~/.config/taxo/taxo.toml
#   Env:    TAXO_* environment variables (e.g. TAXO_LLM__API_KEY)

[llm]
# api_key = "sk-..."
# base_url = "https://api.openai.com/v1"
# model = "gpt-4o"

[embedding]
# Falls back to the [llm] key/url when unset
# api_key = "sk-..."
# base_url = "https://api.openai.com/v1"
# model = "doubao-embedding-large-text-250515"

[refine]
# Cosine similarity threshold for merging modes
# merge_threshold = 0.6
# Frequency ratio threshold for removing modes
# remove_threshold = 0.01

# Worker pool size for assignment and analysis
# max_workers = 5
"#
        .to_string()
    }
}

fn config_err(e: ConfigError) -> TaxonomyError {
    TaxonomyError::Config {
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_no_config_when_loading_then_uses_defaults() {
        let settings = Settings::load_from(None).expect("load defaults");
        assert_eq!(settings.llm.model, "gpt-4o");
        assert_eq!(settings.max_workers, 5);
        assert!((settings.refine.merge_threshold - 0.6).abs() < f64::EPSILON);
    }

    #[test]
    fn given_missing_credentials_when_resolving_then_errors() {
        let settings = Settings::default();
        assert!(settings.llm_credentials().is_err());
    }

    #[test]
    fn given_only_llm_credentials_when_resolving_embedding_then_falls_back() {
        let settings = Settings {
            llm: LlmSettings {
                api_key: Some("key".to_string()),
                base_url: Some("https://llm.example.com/v1".to_string()),
                ..LlmSettings::default()
            },
            ..Settings::default()
        };
        let (key, url) = settings.embedding_credentials().unwrap();
        assert_eq!(key, "key");
        assert_eq!(url, "https://llm.example.com/v1");
    }

    #[test]
    fn given_unknown_model_when_context_len_then_default_window() {
        let settings = Settings::default();
        assert_eq!(settings.context_len(), 128_000 - 4096);
    }

    #[test]
    fn given_gemini_model_when_context_len_then_large_window() {
        let mut settings = Settings::default();
        settings.llm.model = "gemini-2.5-pro".to_string();
        assert_eq!(settings.context_len(), 1_000_000 - 4096);
    }
}
