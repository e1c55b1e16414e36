//! Application configuration for Brandlens.
//!
//! User config lives at `~/.brandlens/brandlens.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BrandlensError, Result};
use crate::types::{BRAND_PROFILE_TASK, COMPETITOR_ANALYSIS_TASK};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "brandlens.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".brandlens";

/// Upper bound on retry attempts for any single health check or generation.
pub const MAX_ATTEMPTS_CEILING: u32 = 5;

// ---------------------------------------------------------------------------
// Config structs (matching brandlens.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Content budget settings.
    #[serde(default)]
    pub content: ContentConfig,

    /// Retry and timeout policy for model calls.
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Acquisition settings.
    #[serde(default)]
    pub source: SourceConfig,

    /// Model providers keyed by identifier.
    #[serde(default = "default_providers")]
    pub providers: BTreeMap<String, ProviderConfig>,

    /// Model task routing keyed by task name.
    #[serde(default = "default_tasks")]
    pub tasks: BTreeMap<String, ModelTaskConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            defaults: DefaultsConfig::default(),
            content: ContentConfig::default(),
            routing: RoutingConfig::default(),
            source: SourceConfig::default(),
            providers: default_providers(),
            tasks: default_tasks(),
        }
    }
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Root directory for the run ledger, original content, and results.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Acquisition mode: "http" or "fixture".
    #[serde(default = "default_source_mode")]
    pub source: String,

    /// Directory holding mock pages for the fixture source.
    #[serde(default = "default_fixture_dir")]
    pub fixture_dir: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            source: default_source_mode(),
            fixture_dir: default_fixture_dir(),
        }
    }
}

fn default_data_dir() -> String {
    "~/.brandlens/data".into()
}
fn default_source_mode() -> String {
    "http".into()
}
fn default_fixture_dir() -> String {
    "fixtures/pages".into()
}

/// `[content]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentConfig {
    /// Hard input limit of the models, in tokens.
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: u64,

    /// Conservative characters-per-token ratio.
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: u64,

    /// Fraction of the token limit the processed content may use.
    #[serde(default = "default_safety_margin")]
    pub safety_margin: f64,

    /// Length of the preview exposed in artifact summaries.
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,

    /// Timeout for persisting an original copy.
    #[serde(default = "default_persist_timeout")]
    pub persist_timeout_secs: u64,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            max_input_tokens: default_max_input_tokens(),
            chars_per_token: default_chars_per_token(),
            safety_margin: default_safety_margin(),
            preview_chars: default_preview_chars(),
            persist_timeout_secs: default_persist_timeout(),
        }
    }
}

impl ContentConfig {
    /// Character budget for processed content.
    ///
    /// `floor(max_input_tokens * safety_margin) * chars_per_token`; 3,800,000
    /// with the defaults.
    pub fn char_budget(&self) -> usize {
        let margin = self.safety_margin.clamp(0.0, 1.0);
        let tokens = (self.max_input_tokens as f64 * margin).floor() as u64;
        tokens.saturating_mul(self.chars_per_token) as usize
    }

    pub fn persist_timeout(&self) -> Duration {
        Duration::from_secs(self.persist_timeout_secs)
    }
}

fn default_max_input_tokens() -> u64 {
    1_000_000
}
fn default_chars_per_token() -> u64 {
    4
}
fn default_safety_margin() -> f64 {
    0.95
}
fn default_preview_chars() -> usize {
    200
}
fn default_persist_timeout() -> u64 {
    30
}

/// `[routing]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Attempts per health check or generation before it counts as failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay between attempts; doubles after each failure.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// Timeout for a single generation call.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    /// Timeout for a single health check.
    #[serde(default = "default_health_timeout")]
    pub health_timeout_secs: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff(),
            call_timeout_secs: default_call_timeout(),
            health_timeout_secs: default_health_timeout(),
        }
    }
}

impl RoutingConfig {
    /// Attempts clamped to `1..=MAX_ATTEMPTS_CEILING`.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.clamp(1, MAX_ATTEMPTS_CEILING)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_retry_backoff() -> u64 {
    250
}
fn default_call_timeout() -> u64 {
    120
}
fn default_health_timeout() -> u64 {
    10
}

/// `[source]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// HTTP timeout for fetching the target page.
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,

    /// Largest response body accepted.
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: u64,

    /// Allow loopback/private hosts (local testing only).
    #[serde(default)]
    pub allow_private_hosts: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_source_timeout(),
            max_response_bytes: default_max_response_bytes(),
            allow_private_hosts: false,
        }
    }
}

fn default_source_timeout() -> u64 {
    30
}
fn default_max_response_bytes() -> u64 {
    20 * 1024 * 1024
}

/// Wire protocol spoken by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// `/models` + `/chat/completions` (OpenRouter, OpenAI, vLLM, ...).
    OpenaiCompatible,
    /// Ollama's `/api/tags` + `/api/chat`.
    Ollama,
}

/// `[providers.<id>]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub base_url: String,
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

/// One side of a task's primary/fallback pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelTarget {
    pub provider: String,
    pub model: String,
}

impl std::fmt::Display for ModelTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// `[tasks.<name>]` entry: static routing for one model-backed task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelTaskConfig {
    pub primary: ModelTarget,
    pub fallback: ModelTarget,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

fn default_temperature() -> f64 {
    0.3
}
fn default_max_output_tokens() -> u32 {
    4096
}

fn default_providers() -> BTreeMap<String, ProviderConfig> {
    BTreeMap::from([
        (
            "openrouter".to_string(),
            ProviderConfig {
                kind: ProviderKind::OpenaiCompatible,
                base_url: "https://openrouter.ai/api/v1".into(),
                api_key_env: Some("OPENROUTER_API_KEY".into()),
            },
        ),
        (
            "ollama".to_string(),
            ProviderConfig {
                kind: ProviderKind::Ollama,
                base_url: "http://localhost:11434".into(),
                api_key_env: None,
            },
        ),
    ])
}

fn default_tasks() -> BTreeMap<String, ModelTaskConfig> {
    let task = |temperature| ModelTaskConfig {
        primary: ModelTarget {
            provider: "openrouter".into(),
            model: "google/gemini-2.5-flash".into(),
        },
        fallback: ModelTarget {
            provider: "ollama".into(),
            model: "llama3.1:8b".into(),
        },
        temperature,
        max_output_tokens: default_max_output_tokens(),
    };
    BTreeMap::from([
        (BRAND_PROFILE_TASK.to_string(), task(0.3)),
        (COMPETITOR_ANALYSIS_TASK.to_string(), task(0.5)),
    ])
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    if path == "~" || path.starts_with("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| BrandlensError::config("could not determine home directory"))?;
        let rest = path.trim_start_matches('~').trim_start_matches('/');
        return Ok(if rest.is_empty() { home } else { home.join(rest) });
    }
    Ok(PathBuf::from(path))
}

impl AppConfig {
    /// Resolved data directory.
    pub fn data_dir(&self) -> Result<PathBuf> {
        expand_home(&self.defaults.data_dir)
    }

    /// Look up the routing entry for `task`.
    pub fn task(&self, task: &str) -> Result<&ModelTaskConfig> {
        self.tasks
            .get(task)
            .ok_or_else(|| BrandlensError::config(format!("no [tasks.{task}] configured")))
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.brandlens/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| BrandlensError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.brandlens/brandlens.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| BrandlensError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| BrandlensError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| BrandlensError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| BrandlensError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| BrandlensError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check internal consistency: every task target names a defined provider and
/// the content budget is non-zero.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.content.char_budget() == 0 {
        return Err(BrandlensError::config(
            "content budget is zero; check [content] max_input_tokens, chars_per_token and safety_margin",
        ));
    }

    for (name, task) in &config.tasks {
        for target in [&task.primary, &task.fallback] {
            if !config.providers.contains_key(&target.provider) {
                return Err(BrandlensError::config(format!(
                    "[tasks.{name}] references undefined provider `{}`",
                    target.provider
                )));
            }
        }
    }

    for required in [BRAND_PROFILE_TASK, COMPETITOR_ANALYSIS_TASK] {
        config.task(required)?;
    }

    Ok(())
}

/// Check that every provider referenced by a task has its API key env var set.
pub fn validate_api_keys(config: &AppConfig) -> Result<()> {
    let mut referenced: Vec<&str> = config
        .tasks
        .values()
        .flat_map(|t| [t.primary.provider.as_str(), t.fallback.provider.as_str()])
        .collect();
    referenced.sort_unstable();
    referenced.dedup();

    for id in referenced {
        let Some(provider) = config.providers.get(id) else {
            continue;
        };
        let Some(var_name) = &provider.api_key_env else {
            continue;
        };
        match std::env::var(var_name) {
            Ok(val) if !val.is_empty() => {}
            _ => {
                return Err(BrandlensError::config(format!(
                    "API key for provider `{id}` not found. Set the {var_name} environment variable."
                )));
            }
        }
    }
    Ok(())
}
