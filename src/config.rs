//! Layered configuration: defaults, optional YAML file, `LEXAGENT_*` env vars

use crate::error::AgentError;
use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "lexagent.yaml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub confidence: ConfidenceWeights,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub confidence_threshold: f32,
    pub retry_budget: usize,
    pub retrieval_timeout_ms: u64,
    pub model_timeout_ms: u64,
    /// Number of models tried (in priority order) before reasoning degrades
    pub model_attempts: usize,
    /// Upper bound for a single excerpt in characters
    pub excerpt_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            retry_budget: 1,
            retrieval_timeout_ms: 5_000,
            model_timeout_ms: 40_000,
            model_attempts: 2,
            excerpt_chars: 200,
        }
    }
}

impl PipelineConfig {
    pub fn retrieval_timeout(&self) -> Duration {
        Duration::from_millis(self.retrieval_timeout_ms)
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_millis(self.model_timeout_ms)
    }
}

/// Weights for the aggregate confidence score (normalised on use)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceWeights {
    pub relevance: f32,
    pub citation_coverage: f32,
    pub reasoning_completeness: f32,
    /// Subtracted when the answer came from a fallback model
    pub fallback_penalty: f32,
    /// Ceiling applied when no model produced a draft
    pub model_unavailable_cap: f32,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            relevance: 0.4,
            citation_coverage: 0.35,
            reasoning_completeness: 0.25,
            fallback_penalty: 0.05,
            model_unavailable_cap: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Model ids in priority order; the first is the primary
    pub model_ids: Vec<String>,
    pub max_tokens: usize,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            model_ids: vec!["claude-sonnet-4-5".to_string(), "claude-haiku-4-5".to_string()],
            max_tokens: 2048,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub max_entries_per_user: usize,
    pub max_age_secs: Option<u64>,
    pub related_limit: usize,
    pub min_shared_keywords: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_entries_per_user: 100,
            max_age_secs: None,
            related_limit: 3,
            min_shared_keywords: 3,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServicesConfig {
    pub similarity_url: Option<String>,
    pub keyword_url: Option<String>,
    pub model_url: Option<String>,
    pub model_api_key: Option<String>,
    pub memory_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error
    pub level: String,
    /// pretty or json
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with precedence (lowest to highest):
    /// defaults, `lexagent.yaml`, `LEXAGENT_*` environment variables.
    pub fn load() -> Result<AgentConfig> {
        Self::load_with(Path::new(DEFAULT_CONFIG_FILE))
    }

    /// Same as `load` but reading the YAML layer from `path`
    pub fn load_with(path: impl AsRef<Path>) -> Result<AgentConfig> {
        let config: AgentConfig = Figment::new()
            .merge(Serialized::defaults(AgentConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("LEXAGENT_").split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &AgentConfig) -> Result<(), AgentError> {
        let pipeline = &config.pipeline;
        if !(0.0..=1.0).contains(&pipeline.confidence_threshold) {
            return Err(AgentError::Config(format!(
                "confidence_threshold {} must be within [0, 1]",
                pipeline.confidence_threshold
            )));
        }
        if pipeline.retrieval_timeout_ms == 0 || pipeline.model_timeout_ms == 0 {
            return Err(AgentError::Config("timeouts must be greater than 0".to_string()));
        }
        if pipeline.model_attempts == 0 {
            return Err(AgentError::Config("model_attempts must be at least 1".to_string()));
        }
        if pipeline.excerpt_chars < 20 {
            return Err(AgentError::Config("excerpt_chars must be at least 20".to_string()));
        }

        let w = &config.confidence;
        let weights = [w.relevance, w.citation_coverage, w.reasoning_completeness];
        if weights.iter().any(|x| *x < 0.0 || !x.is_finite()) {
            return Err(AgentError::Config("confidence weights must be non-negative".to_string()));
        }
        if weights.iter().sum::<f32>() <= 0.0 {
            return Err(AgentError::Config("confidence weights must not all be zero".to_string()));
        }
        if !(0.0..=1.0).contains(&w.fallback_penalty) || !(0.0..=1.0).contains(&w.model_unavailable_cap) {
            return Err(AgentError::Config(
                "fallback_penalty and model_unavailable_cap must be within [0, 1]".to_string(),
            ));
        }

        if config.models.model_ids.is_empty() {
            return Err(AgentError::Config("at least one model id is required".to_string()));
        }
        if config.memory.max_entries_per_user == 0 {
            return Err(AgentError::Config("max_entries_per_user must be at least 1".to_string()));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.logging.level.as_str()) {
            return Err(AgentError::Config(format!("unknown log level: {}", config.logging.level)));
        }
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&config.logging.format.as_str()) {
            return Err(AgentError::Config(format!("unknown log format: {}", config.logging.format)));
        }

        Ok(())
    }
}
