//! Configuration for the forge engine.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (SEEDSTR_API_KEY, ENGINE_POLL_MIN_MS, ...)
//! 2. Config file (`--config <path>` or `.forge/config.yaml`)
//! 3. Defaults
//!
//! Config file discovery:
//! - Searches current directory and parents for .forge/config.yaml
//! - Relative paths in the file resolve against the project root (the
//!   directory containing .forge/)

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::SafetyLimits;

/// Configuration errors; all of them abort startup
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("ENGINE_POLL_MIN_MS ({min}) cannot be larger than ENGINE_POLL_MAX_MS ({max})")]
    InvalidPollBounds { min: u64, max: u64 },

    #[error("Marketplace API key is not set (SEEDSTR_API_KEY)")]
    MissingMarketplaceKey,

    #[error("No completion provider has an API key (GROQ_API_KEY, LLM_API_KEY or OPENAI_API_KEY)")]
    NoCredentialedProvider,

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub marketplace: MarketplaceConfig,

    #[serde(default)]
    pub watcher: WatcherConfig,

    #[serde(default)]
    pub brain: BrainConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub safety: SafetyLimits,
}

/// Control surface settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,

    /// Start the orchestrator as soon as the server is listening
    #[serde(default = "default_true")]
    pub auto_start: bool,

    /// Keep-alive comment interval for event streams
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8787
}
fn default_cors_origin() -> String {
    "*".to_string()
}
fn default_true() -> bool {
    true
}
fn default_heartbeat_secs() -> u64 {
    15
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
            auto_start: default_true(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

impl ServerConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }
}

/// Job marketplace endpoints and credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceConfig {
    /// Base URL for the upload endpoint
    #[serde(default = "default_v1_url")]
    pub v1_url: String,

    /// Base URL for job listing and responses
    #[serde(default = "default_v2_url")]
    pub v2_url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_agent_id")]
    pub agent_id: String,

    #[serde(default = "default_page_size")]
    pub page_size: usize,

    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    #[serde(default = "default_upload_timeout_ms")]
    pub upload_timeout_ms: u64,

    #[serde(default = "default_upload_timeout_ms")]
    pub respond_timeout_ms: u64,
}

fn default_v1_url() -> String {
    "https://www.seedstr.io/api/v1".to_string()
}
fn default_v2_url() -> String {
    "https://www.seedstr.io/api/v2".to_string()
}
fn default_agent_id() -> String {
    "NEXUS.FORGE".to_string()
}
fn default_page_size() -> usize {
    20
}
fn default_max_pages() -> usize {
    1
}
fn default_poll_timeout_ms() -> u64 {
    12_000
}
fn default_upload_timeout_ms() -> u64 {
    30_000
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            v1_url: default_v1_url(),
            v2_url: default_v2_url(),
            api_key: None,
            agent_id: default_agent_id(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            poll_timeout_ms: default_poll_timeout_ms(),
            upload_timeout_ms: default_upload_timeout_ms(),
            respond_timeout_ms: default_upload_timeout_ms(),
        }
    }
}

impl MarketplaceConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.upload_timeout_ms)
    }

    pub fn respond_timeout(&self) -> Duration {
        Duration::from_millis(self.respond_timeout_ms)
    }
}

/// Polling cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_poll_min_ms")]
    pub poll_min_ms: u64,

    #[serde(default = "default_poll_max_ms")]
    pub poll_max_ms: u64,

    /// Delay before the first poll after start
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
}

fn default_poll_min_ms() -> u64 {
    5_000
}
fn default_poll_max_ms() -> u64 {
    10_000
}
fn default_initial_delay_ms() -> u64 {
    200
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_min_ms: default_poll_min_ms(),
            poll_max_ms: default_poll_max_ms(),
            initial_delay_ms: default_initial_delay_ms(),
        }
    }
}

/// Text generation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainConfig {
    /// Providers in priority order
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    #[serde(default = "default_completion_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            system_prompt: default_system_prompt(),
            timeout_ms: default_completion_timeout_ms(),
        }
    }
}

impl BrainConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_completion_timeout_ms() -> u64 {
    120_000
}

fn default_system_prompt() -> String {
    [
        "You generate complete, working front-end projects.",
        "Return only valid JSON with this schema:",
        r#"{ "projectName": "string", "files": [{ "path": "string", "content": "string" }], "notes": ["optional"] }"#,
        "Paths are relative to the project root.",
        "Do not wrap the JSON in markdown code fences.",
    ]
    .join("\n")
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig {
            name: "groq".to_string(),
            endpoint: "https://api.groq.com/openai/v1/chat/completions".to_string(),
            api_key: None,
            model: "llama-3.3-70b-versatile".to_string(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        },
        ProviderConfig {
            name: "openai".to_string(),
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        },
    ]
}

/// One chat-completion backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    8000
}

impl ProviderConfig {
    pub fn has_credential(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

/// Filesystem layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Wiped and rewritten on every run
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Timestamped archives accumulate here
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("runs/current")
}
fn default_archive_dir() -> PathBuf {
    PathBuf::from("runs/archives")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            archive_dir: default_archive_dir(),
        }
    }
}

impl EngineConfig {
    /// Load from file (explicit or discovered) and the process environment,
    /// then validate
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config = Self::resolve(explicit)?;
        config.validate()?;
        Ok(config)
    }

    /// Same sources as [`EngineConfig::load`], without validation
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to determine current directory")?;

        let config_file = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => find_config_file(&cwd),
        };

        let (mut config, base_dir) = match config_file {
            Some(ref path) => {
                let config = load_config_file(path)?;
                (config, project_root(path, explicit.is_some()))
            }
            None => (Self::default(), cwd),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.resolve_paths(&base_dir);
        Ok(config)
    }

    /// Apply environment overrides through `get`
    pub fn apply_env<F>(&mut self, get: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("ENGINE_HOST") {
            self.server.host = v;
        }
        if let Some(v) = get("ENGINE_PORT").or_else(|| get("PORT")) {
            self.server.port = parse_value("ENGINE_PORT", &v)?;
        }
        if let Some(v) = get("ENGINE_CORS_ORIGIN") {
            self.server.cors_origin = v;
        }
        if let Some(v) = get("ENGINE_AUTO_START") {
            self.server.auto_start = parse_bool(&v);
        }

        if let Some(v) = get("SEEDSTR_API_KEY") {
            self.marketplace.api_key = Some(v);
        }
        if let Some(v) = get("SEEDSTR_AGENT_ID") {
            self.marketplace.agent_id = v;
        }
        if let Some(v) = get("SEEDSTR_V1_URL") {
            self.marketplace.v1_url = v;
        }
        if let Some(v) = get("SEEDSTR_V2_URL") {
            self.marketplace.v2_url = v;
        }

        if let Some(v) = get("ENGINE_POLL_MIN_MS") {
            self.watcher.poll_min_ms = parse_value("ENGINE_POLL_MIN_MS", &v)?;
        }
        if let Some(v) = get("ENGINE_POLL_MAX_MS") {
            self.watcher.poll_max_ms = parse_value("ENGINE_POLL_MAX_MS", &v)?;
        }

        if let Some(key) = get("LLM_API_KEY").or_else(|| get("GROQ_API_KEY")) {
            self.provider_mut("groq").api_key = Some(key);
        }
        if let Some(model) = get("LLM_MODEL") {
            self.provider_mut("groq").model = model;
        }
        if let Some(key) = get("OPENAI_API_KEY") {
            self.provider_mut("openai").api_key = Some(key);
        }
        if let Some(v) = get("LLM_TEMPERATURE") {
            let temperature: f32 = parse_value("LLM_TEMPERATURE", &v)?;
            for provider in &mut self.brain.providers {
                provider.temperature = temperature;
            }
        }
        if let Some(v) = get("LLM_SYSTEM_PROMPT") {
            self.brain.system_prompt = v;
        }

        if let Some(v) = get("ENGINE_OUTPUT_DIR") {
            self.paths.output_dir = PathBuf::from(v);
        }
        if let Some(v) = get("ENGINE_ARCHIVE_DIR") {
            self.paths.archive_dir = PathBuf::from(v);
        }

        Ok(())
    }

    /// Make output and archive directories absolute against `base`
    pub fn resolve_paths(&mut self, base: &Path) {
        if self.paths.output_dir.is_relative() {
            self.paths.output_dir = base.join(&self.paths.output_dir);
        }
        if self.paths.archive_dir.is_relative() {
            self.paths.archive_dir = base.join(&self.paths.archive_dir);
        }
    }

    /// Fail fast on settings the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watcher.poll_min_ms > self.watcher.poll_max_ms {
            return Err(ConfigError::InvalidPollBounds {
                min: self.watcher.poll_min_ms,
                max: self.watcher.poll_max_ms,
            });
        }
        if self.marketplace.page_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "marketplace.page_size".to_string(),
                value: "0".to_string(),
            });
        }
        if !self.marketplace.api_key.as_deref().is_some_and(|k| !k.is_empty()) {
            return Err(ConfigError::MissingMarketplaceKey);
        }
        if !self.brain.providers.iter().any(ProviderConfig::has_credential) {
            return Err(ConfigError::NoCredentialedProvider);
        }
        Ok(())
    }

    /// Copy with every credential masked, for display
    pub fn redacted(&self) -> Self {
        let mask = |key: &Option<String>| key.as_ref().map(|_| "***".to_string());
        let mut copy = self.clone();
        copy.marketplace.api_key = mask(&self.marketplace.api_key);
        for provider in &mut copy.brain.providers {
            provider.api_key = mask(&provider.api_key);
        }
        copy
    }

    fn provider_mut(&mut self, name: &str) -> &mut ProviderConfig {
        let index = match self.brain.providers.iter().position(|p| p.name == name) {
            Some(index) => index,
            None => {
                let fallback = default_providers()
                    .into_iter()
                    .find(|p| p.name == name)
                    .unwrap_or_else(|| ProviderConfig {
                        name: name.to_string(),
                        endpoint: String::new(),
                        api_key: None,
                        model: String::new(),
                        temperature: default_temperature(),
                        max_tokens: default_max_tokens(),
                    });
                self.brain.providers.push(fallback);
                self.brain.providers.len() - 1
            }
        };
        &mut self.brain.providers[index]
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Find config file by searching current directory and parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(".forge").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Directory relative paths in a config file resolve against
fn project_root(config_path: &Path, explicit: bool) -> PathBuf {
    let parent = config_path.parent().unwrap_or(Path::new("."));
    if explicit {
        return parent.to_path_buf();
    }
    // Discovered files live in .forge/, so the project root is one level up
    parent.parent().unwrap_or(parent).to_path_buf()
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<EngineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8787);
        assert_eq!(config.server.cors_origin, "*");
        assert!(config.server.auto_start);
        assert_eq!(config.watcher.poll_min_ms, 5000);
        assert_eq!(config.watcher.poll_max_ms, 10000);
        assert_eq!(config.marketplace.poll_timeout(), Duration::from_secs(12));
        assert_eq!(config.marketplace.upload_timeout(), Duration::from_secs(30));
        assert_eq!(config.brain.providers.len(), 2);
        assert_eq!(config.brain.providers[0].name, "groq");
        assert_eq!(config.brain.providers[1].name, "openai");
    }

    #[test]
    fn test_env_overrides() {
        let vars = env(&[
            ("ENGINE_PORT", "9000"),
            ("ENGINE_AUTO_START", "no"),
            ("SEEDSTR_API_KEY", "mk-123"),
            ("ENGINE_POLL_MIN_MS", "1000"),
            ("ENGINE_POLL_MAX_MS", "2000"),
            ("GROQ_API_KEY", "gsk-1"),
            ("LLM_MODEL", "custom-model"),
            ("OPENAI_API_KEY", "sk-1"),
            ("LLM_TEMPERATURE", "0.7"),
        ]);

        let mut config = EngineConfig::default();
        config.apply_env(|k| vars.get(k).cloned()).unwrap();

        assert_eq!(config.server.port, 9000);
        assert!(!config.server.auto_start);
        assert_eq!(config.marketplace.api_key.as_deref(), Some("mk-123"));
        assert_eq!(config.watcher.poll_min_ms, 1000);
        assert_eq!(config.brain.providers[0].api_key.as_deref(), Some("gsk-1"));
        assert_eq!(config.brain.providers[0].model, "custom-model");
        assert_eq!(config.brain.providers[1].api_key.as_deref(), Some("sk-1"));
        assert!(config.brain.providers.iter().all(|p| p.temperature == 0.7));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_env_value_is_rejected() {
        let vars = env(&[("ENGINE_POLL_MIN_MS", "soon")]);
        let mut config = EngineConfig::default();
        let err = config.apply_env(|k| vars.get(k).cloned()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_validate_fails_fast() {
        let mut config = EngineConfig::default();
        assert_eq!(config.validate(), Err(ConfigError::MissingMarketplaceKey));

        config.marketplace.api_key = Some("mk".to_string());
        assert_eq!(config.validate(), Err(ConfigError::NoCredentialedProvider));

        config.brain.providers[1].api_key = Some("sk".to_string());
        assert!(config.validate().is_ok());

        config.watcher.poll_min_ms = 20_000;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidPollBounds {
                min: 20_000,
                max: 10_000
            })
        );
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let forge_dir = temp.path().join(".forge");
        std::fs::create_dir_all(&forge_dir).unwrap();

        let config_path = forge_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
server:
  port: 9100
watcher:
  poll_min_ms: 100
  poll_max_ms: 200
paths:
  output_dir: build/current
safety:
  max_files: 10
"#
        )
        .unwrap();

        let mut config = load_config_file(&config_path).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.watcher.poll_max_ms, 200);
        assert_eq!(config.watcher.initial_delay_ms, 200);
        assert_eq!(config.safety.max_files, 10);
        assert_eq!(config.marketplace.agent_id, "NEXUS.FORGE");

        config.resolve_paths(&project_root(&config_path, false));
        assert_eq!(config.paths.output_dir, temp.path().join("build/current"));
        assert_eq!(config.paths.archive_dir, temp.path().join("runs/archives"));
    }

    #[test]
    fn test_find_config_file_walks_parents() {
        let temp = TempDir::new().unwrap();
        let forge_dir = temp.path().join(".forge");
        std::fs::create_dir_all(&forge_dir).unwrap();
        std::fs::write(forge_dir.join("config.yaml"), "{}").unwrap();

        let nested = temp.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(
            find_config_file(&nested),
            Some(forge_dir.join("config.yaml"))
        );
    }

    #[test]
    fn test_redacted_masks_keys() {
        let mut config = EngineConfig::default();
        config.marketplace.api_key = Some("secret".to_string());
        config.brain.providers[0].api_key = Some("secret".to_string());

        let redacted = config.redacted();
        assert_eq!(redacted.marketplace.api_key.as_deref(), Some("***"));
        assert_eq!(redacted.brain.providers[0].api_key.as_deref(), Some("***"));
        assert_eq!(redacted.brain.providers[1].api_key, None);
    }
}
