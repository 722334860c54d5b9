//! TOML configuration.
//!
//! Every section and field has a default, so an empty file (or no file at
//! the default path) yields a working configuration. Secrets are never read
//! from the file: `OPENAI_API_KEY` and `SERPER_API_KEY` come from the
//! environment.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Path used by the CLI when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "./config/sota.toml";

pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const SERPER_API_KEY_ENV: &str = "SERPER_API_KEY";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub parse: ParseConfig,
    #[serde(default)]
    pub analyze: AnalyzeConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/sotaforge.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_model")]
    pub model: String,
    /// OpenAI-compatible API root; `/chat/completions` is appended.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    /// Pause before retrying a throttled chat call.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Temperature for tool-side completions (scoring, analysis).
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_synthesis_temperature")]
    pub synthesis_temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_base_url(),
            timeout_secs: default_llm_timeout_secs(),
            cooldown_secs: default_cooldown_secs(),
            temperature: default_temperature(),
            synthesis_temperature: default_synthesis_temperature(),
        }
    }
}

fn default_model() -> String {
    "gpt-4.1-nano".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    120
}
fn default_cooldown_secs() -> u64 {
    60
}
fn default_temperature() -> f32 {
    0.0
}
fn default_synthesis_temperature() -> f32 {
    0.5
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Validation attempts are bounded by `attempt < max_retries`, with the
    /// attempt counter starting at 1.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_message_history")]
    pub max_message_history: usize,
    /// History kept on the last retry after repeated throttling.
    #[serde(default = "default_rate_limit_history")]
    pub rate_limit_history: usize,
    /// Run the final `store` stage that writes the report to `final_sota`.
    #[serde(default = "default_true")]
    pub store_final_report: bool,
    #[serde(default = "default_progress_capacity")]
    pub progress_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            max_message_history: default_max_message_history(),
            rate_limit_history: default_rate_limit_history(),
            store_final_report: true,
            progress_capacity: default_progress_capacity(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_max_message_history() -> usize {
    30
}
fn default_rate_limit_history() -> usize {
    5
}
fn default_true() -> bool {
    true
}
fn default_progress_capacity() -> usize {
    256
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_serper_url")]
    pub serper_url: String,
    #[serde(default = "default_arxiv_url")]
    pub arxiv_url: String,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            serper_url: default_serper_url(),
            arxiv_url: default_arxiv_url(),
            max_results: default_max_results(),
            timeout_secs: default_search_timeout_secs(),
        }
    }
}

fn default_serper_url() -> String {
    "https://google.serper.dev/search".to_string()
}
fn default_arxiv_url() -> String {
    "http://export.arxiv.org/api/query".to_string()
}
fn default_max_results() -> u32 {
    10
}
fn default_search_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ParseConfig {
    /// Documents fetched at once by `parse_documents`.
    #[serde(default = "default_parse_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_web_timeout_secs")]
    pub web_timeout_secs: u64,
    #[serde(default = "default_pdf_timeout_secs")]
    pub pdf_timeout_secs: u64,
    /// Characters of extracted text kept in the store.
    #[serde(default = "default_full_text_limit")]
    pub full_text_limit: usize,
    /// Characters of text echoed back to the model in tool results.
    #[serde(default = "default_return_text_limit")]
    pub return_text_limit: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            concurrency: default_parse_concurrency(),
            web_timeout_secs: default_web_timeout_secs(),
            pdf_timeout_secs: default_pdf_timeout_secs(),
            full_text_limit: default_full_text_limit(),
            return_text_limit: default_return_text_limit(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_parse_concurrency() -> usize {
    4
}
fn default_web_timeout_secs() -> u64 {
    10
}
fn default_pdf_timeout_secs() -> u64 {
    30
}
fn default_full_text_limit() -> usize {
    3000
}
fn default_return_text_limit() -> usize {
    800
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (SOTAforge)".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalyzeConfig {
    #[serde(default = "default_prompt_text_limit")]
    pub prompt_text_limit: usize,
}

impl Default for AnalyzeConfig {
    fn default() -> Self {
        Self {
            prompt_text_limit: default_prompt_text_limit(),
        }
    }
}

fn default_prompt_text_limit() -> usize {
    1200
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    /// Seconds a finished task stays queryable before it is evicted.
    #[serde(default = "default_task_ttl_secs")]
    pub task_ttl_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            allowed_origins: default_allowed_origins(),
            task_ttl_secs: default_task_ttl_secs(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_task_ttl_secs() -> u64 {
    3600
}
fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://localhost:3001".to_string(),
        "http://127.0.0.1:3000".to_string(),
    ]
}

impl Config {
    /// Whether the API keys a pipeline run needs are present in the
    /// environment. Returns the names of the missing ones.
    pub fn missing_api_keys() -> Vec<&'static str> {
        [OPENAI_API_KEY_ENV, SERPER_API_KEY_ENV]
            .into_iter()
            .filter(|name| {
                std::env::var(name)
                    .map(|v| v.trim().is_empty())
                    .unwrap_or(true)
            })
            .collect()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Like [`load_config`], but a missing file at the default path yields the
/// built-in defaults. An explicitly named file must exist.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if !path.exists() && path == Path::new(DEFAULT_CONFIG_PATH) {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(Config::default());
    }
    load_config(path)
}

fn validate(config: &Config) -> Result<()> {
    if config.llm.model.trim().is_empty() {
        anyhow::bail!("llm.model must not be empty");
    }
    if !config.llm.base_url.starts_with("http://") && !config.llm.base_url.starts_with("https://") {
        anyhow::bail!("llm.base_url must be an http(s) URL");
    }
    if !(0.0..=2.0).contains(&config.llm.temperature)
        || !(0.0..=2.0).contains(&config.llm.synthesis_temperature)
    {
        anyhow::bail!("llm temperatures must be in [0.0, 2.0]");
    }

    if config.pipeline.max_retries == 0 {
        anyhow::bail!("pipeline.max_retries must be >= 1");
    }
    if config.pipeline.max_message_history == 0 {
        anyhow::bail!("pipeline.max_message_history must be >= 1");
    }
    if config.pipeline.rate_limit_history == 0 {
        anyhow::bail!("pipeline.rate_limit_history must be >= 1");
    }
    if config.pipeline.progress_capacity == 0 {
        anyhow::bail!("pipeline.progress_capacity must be >= 1");
    }

    if !(1..=100).contains(&config.search.max_results) {
        anyhow::bail!("search.max_results must be between 1 and 100");
    }

    if config.parse.concurrency == 0 {
        anyhow::bail!("parse.concurrency must be >= 1");
    }
    if config.parse.full_text_limit == 0 || config.parse.return_text_limit == 0 {
        anyhow::bail!("parse text limits must be > 0");
    }

    if config.analyze.prompt_text_limit == 0 {
        anyhow::bail!("analyze.prompt_text_limit must be > 0");
    }

    Ok(())
}
