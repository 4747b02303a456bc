use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::document::DedupPolicy;
use crate::ocr::{EngineCommand, EngineKind};
use crate::retry::RetryPolicy;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{var}: cannot parse '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("CHUNK_OVERLAP ({overlap}) must be smaller than CHUNK_SIZE ({size})")]
    ChunkOverlap { size: usize, overlap: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackend {
    OpenAi,
    Hash,
}

impl FromStr for EmbeddingBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(EmbeddingBackend::OpenAi),
            "hash" => Ok(EmbeddingBackend::Hash),
            other => Err(format!("expected 'openai' or 'hash', got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationBackend {
    OpenAi,
    DeepSeek,
}

impl FromStr for GenerationBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(GenerationBackend::OpenAi),
            "deepseek" => Ok(GenerationBackend::DeepSeek),
            other => Err(format!("expected 'openai' or 'deepseek', got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorBackend {
    Qdrant,
    Memory,
}

impl FromStr for VectorBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "qdrant" => Ok(VectorBackend::Qdrant),
            "memory" => Ok(VectorBackend::Memory),
            other => Err(format!("expected 'qdrant' or 'memory', got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OcrConfig {
    pub engine: EngineKind,
    /// `None` runs the built-in Tesseract worker.
    pub command: Option<EngineCommand>,
    pub language: String,
    pub timeout: Duration,
    pub max_concurrent: usize,
    pub scratch_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ChunkConfig {
    pub size: usize,
    pub overlap: usize,
    pub separators: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    pub model: String,
    pub dimensions: usize,
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub backend: GenerationBackend,
    pub openai_model: String,
    pub deepseek_model: String,
    pub temperature: f32,
}

#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub backend: VectorBackend,
    pub qdrant_url: String,
    pub collection: String,
    pub dedup: DedupPolicy,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub ocr: OcrConfig,
    pub chunk: ChunkConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub index: IndexConfig,
    pub openai_api_key: Option<String>,
    pub openai_api_base: String,
    pub deepseek_api_key: Option<String>,
    pub top_k: usize,
    pub query_cache_size: usize,
    pub retry: RetryPolicy,
    pub provider_timeout: Duration,
    pub http_max_concurrent: usize,
    pub upload_limit_bytes: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any variable source; unset or blank
    /// variables take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let engine: EngineKind = parse_or(&get, "OCR_ENGINE", EngineKind::Lines)?;
        let command = match get("OCR_COMMAND") {
            Some(line) => Some(EngineCommand::parse(&line).ok_or(ConfigError::Invalid {
                var: "OCR_COMMAND",
                value: line.clone(),
                reason: "empty command".to_string(),
            })?),
            None => None,
        };
        let ocr = OcrConfig {
            engine,
            command,
            language: get("OCR_LANG").unwrap_or_else(|| "eng".to_string()),
            timeout: Duration::from_secs(parse_or(&get, "OCR_TIMEOUT_SECS", 20u64)?),
            max_concurrent: parse_or(&get, "OCR_MAX_CONCURRENT", 4usize)?.max(1),
            scratch_dir: get("OCR_SCRATCH_DIR").map(PathBuf::from),
        };

        let size: usize = parse_or(&get, "CHUNK_SIZE", 500)?;
        let overlap: usize = parse_or(&get, "CHUNK_OVERLAP", 100)?;
        if size == 0 || overlap >= size {
            return Err(ConfigError::ChunkOverlap { size, overlap });
        }
        let chunk = ChunkConfig {
            size,
            overlap,
            separators: get("CHUNK_SEPARATORS")
                .map(|raw| parse_separators(&raw))
                .unwrap_or_else(|| engine.default_separators()),
        };

        let embedding = EmbeddingConfig {
            backend: parse_or(&get, "EMBEDDING_PROVIDER", EmbeddingBackend::OpenAi)?,
            model: get("OPENAI_EMBEDDING_MODEL").unwrap_or_else(|| "text-embedding-3-small".to_string()),
            dimensions: parse_or(&get, "EMBEDDING_DIMENSIONS", 1024usize)?,
        };

        let generation = GenerationConfig {
            backend: parse_or(&get, "GENERATION_PROVIDER", GenerationBackend::OpenAi)?,
            openai_model: get("OPENAI_CHAT_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            deepseek_model: get("DEEPSEEK_MODEL").unwrap_or_else(|| "deepseek-chat".to_string()),
            temperature: parse_or(&get, "GENERATION_TEMPERATURE", 0.3f32)?,
        };

        let index = IndexConfig {
            backend: parse_or(&get, "VECTOR_BACKEND", VectorBackend::Qdrant)?,
            qdrant_url: get("QDRANT_URL").unwrap_or_else(|| "http://localhost:6333".to_string()),
            collection: get("QDRANT_COLLECTION").unwrap_or_else(|| "ragtest".to_string()),
            dedup: parse_or(&get, "INDEX_DEDUP", DedupPolicy::Append)?,
        };

        let retry = RetryPolicy {
            max_attempts: parse_or(&get, "RETRY_MAX_ATTEMPTS", 3usize)?.max(1),
            base_delay: Duration::from_millis(parse_or(&get, "RETRY_BASE_DELAY_MS", 500u64)?),
            ..RetryPolicy::default()
        };

        Ok(Self {
            ocr,
            chunk,
            embedding,
            generation,
            index,
            openai_api_key: get("OPENAI_API_KEY"),
            openai_api_base: get("OPENAI_API_BASE").unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            deepseek_api_key: get("DEEPSEEK_API_KEY"),
            top_k: parse_or(&get, "RETRIEVAL_TOP_K", 3usize)?.max(1),
            query_cache_size: parse_or(&get, "QUERY_CACHE_SIZE", 256usize)?,
            retry,
            provider_timeout: Duration::from_secs(parse_or(&get, "PROVIDER_TIMEOUT_SECS", 60u64)?),
            http_max_concurrent: parse_or(&get, "HTTP_MAX_CONCURRENT", 64usize)?.max(1),
            upload_limit_bytes: parse_or(&get, "UPLOAD_LIMIT_BYTES", 20 * 1024 * 1024usize)?,
        })
    }

    pub fn require_openai_key(&self) -> Result<&str, ConfigError> {
        self.openai_api_key
            .as_deref()
            .ok_or(ConfigError::Missing("OPENAI_API_KEY"))
    }

    pub fn require_deepseek_key(&self) -> Result<&str, ConfigError> {
        self.deepseek_api_key
            .as_deref()
            .ok_or(ConfigError::Missing("DEEPSEEK_API_KEY"))
    }
}

fn parse_or<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    let Some(value) = get(var) else {
        return Ok(default);
    };
    match value.trim().parse::<T>() {
        Ok(parsed) => Ok(parsed),
        Err(e) => Err(ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}

/// `|`-separated list; `\n` and `\t` escapes are expanded.
fn parse_separators(raw: &str) -> Vec<String> {
    raw.split('|')
        .map(|s| s.replace("\\n", "\n").replace("\\t", "\t"))
        .filter(|s| !s.is_empty())
        .collect()
}
