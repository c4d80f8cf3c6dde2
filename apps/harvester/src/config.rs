use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::pipeline::filter::DEFAULT_INTEREST_KEYWORDS;
use crate::pipeline::prompts::default_system_prompt;
use crate::pipeline::scheduler::SchedulerConfig;

/// Where the compiled artifact is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactBackend {
    Local,
    S3(S3Settings),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Settings {
    pub bucket: String,
    /// Custom endpoint (MinIO, LocalStack); the SDK default when unset.
    pub endpoint: Option<String>,
    pub prefix: String,
}

/// Tuning the pipeline consumes. Never read from the environment directly.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_unit_size: usize,
    pub chunk_size: usize,
    pub scheduler: SchedulerConfig,
    pub interest_keywords: Vec<String>,
    pub system_prompt: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_unit_size: 30_000,
            chunk_size: 30_000,
            scheduler: SchedulerConfig::default(),
            interest_keywords: DEFAULT_INTEREST_KEYWORDS
                .iter()
                .map(|k| k.to_string())
                .collect(),
            system_prompt: default_system_prompt(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_unit_size == 0 {
            bail!("MAX_UNIT_SIZE must be greater than zero");
        }
        if self.chunk_size == 0 {
            bail!("CHUNK_SIZE must be greater than zero");
        }
        if self.chunk_size > self.max_unit_size {
            bail!(
                "CHUNK_SIZE ({}) must not exceed MAX_UNIT_SIZE ({})",
                self.chunk_size,
                self.max_unit_size
            );
        }
        if self.scheduler.max_concurrent == 0 {
            bail!("MAX_CONCURRENT must be greater than zero");
        }
        if self.scheduler.max_retries == 0 {
            bail!("MAX_RETRIES must be greater than zero");
        }
        if self.scheduler.retry_base_delay > self.scheduler.retry_max_delay {
            bail!("RETRY_BASE_DELAY_MS must not exceed RETRY_MAX_DELAY_MS");
        }
        if self.interest_keywords.iter().all(|k| k.trim().is_empty()) {
            bail!("interest keyword set is empty; every unit would be discarded");
        }
        Ok(())
    }
}

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub anthropic_api_key: String,
    pub port: u16,
    pub rust_log: String,
    pub work_dir: PathBuf,
    pub backend: ArtifactBackend,
    pub pipeline: PipelineConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let defaults = PipelineConfig::default();
        let scheduler = SchedulerConfig {
            max_concurrent: parse_env("MAX_CONCURRENT", defaults.scheduler.max_concurrent)?,
            stagger_delay: millis_env("STAGGER_DELAY_MS", defaults.scheduler.stagger_delay)?,
            retry_base_delay: millis_env(
                "RETRY_BASE_DELAY_MS",
                defaults.scheduler.retry_base_delay,
            )?,
            retry_max_delay: millis_env("RETRY_MAX_DELAY_MS", defaults.scheduler.retry_max_delay)?,
            max_retries: parse_env("MAX_RETRIES", defaults.scheduler.max_retries)?,
            fail_fast: parse_env("FAIL_FAST", defaults.scheduler.fail_fast)?,
        };

        let pipeline = PipelineConfig {
            max_unit_size: parse_env("MAX_UNIT_SIZE", defaults.max_unit_size)?,
            chunk_size: parse_env("CHUNK_SIZE", defaults.chunk_size)?,
            scheduler,
            interest_keywords: load_keywords()?.unwrap_or(defaults.interest_keywords),
            system_prompt: defaults.system_prompt,
        };
        pipeline.validate()?;

        Ok(Config {
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            work_dir: std::env::var("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("logs")),
            backend: load_backend()?,
            pipeline,
        })
    }
}

fn load_backend() -> Result<ArtifactBackend> {
    let kind = std::env::var("ARTIFACT_BACKEND").unwrap_or_else(|_| "local".to_string());
    match kind.trim().to_ascii_lowercase().as_str() {
        "local" => Ok(ArtifactBackend::Local),
        "s3" => {
            let prefix = std::env::var("S3_PREFIX").unwrap_or_else(|_| "harvester".to_string());
            if prefix.trim_matches('/').is_empty() {
                bail!("S3_PREFIX must not be empty; deletes would cover the whole bucket");
            }
            Ok(ArtifactBackend::S3(S3Settings {
                bucket: require_env("S3_BUCKET")?,
                endpoint: std::env::var("S3_ENDPOINT").ok().filter(|e| !e.is_empty()),
                prefix,
            }))
        }
        other => bail!("ARTIFACT_BACKEND must be 'local' or 's3', got '{other}'"),
    }
}

/// `INTEREST_KEYWORDS` wins over `INTEREST_KEYWORDS_FILE`; `None` means use the defaults.
fn load_keywords() -> Result<Option<Vec<String>>> {
    if let Ok(list) = std::env::var("INTEREST_KEYWORDS") {
        return Ok(Some(split_keywords(&list, ',')));
    }
    if let Ok(path) = std::env::var("INTEREST_KEYWORDS_FILE") {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read INTEREST_KEYWORDS_FILE '{path}'"))?;
        return Ok(Some(split_keywords(&contents, '\n')));
    }
    Ok(None)
}

fn split_keywords(raw: &str, separator: char) -> Vec<String> {
    raw.split(separator)
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse::<T>()
        .with_context(|| format!("{key} has an invalid value '{raw}'"))
}

fn millis_env(key: &str, default: Duration) -> Result<Duration> {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parse_env(key, default_ms).map(Duration::from_millis)
}
