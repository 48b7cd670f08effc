//! Configuration for evidencesync
//!
//! Loaded once from `<home>/config.toml` and resolved into explicit settings
//! at job start. Secrets missing from the file fall back to environment
//! variables (`GITHUB_TOKEN`, `JIRA_API_TOKEN`, `LLM_API_KEY`).

use crate::error::SyncError;
use crate::llm;
use crate::sources::github::GitHubSettings;
use crate::sources::jira::JiraSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the configuration inside the home directory
pub const CONFIG_FILE: &str = "config.toml";

/// File name of the database inside the home directory
pub const DATABASE_FILE: &str = "evidence.db";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Code host settings
    #[serde(default)]
    pub github: GitHubConfig,

    /// Issue tracker settings
    #[serde(default)]
    pub jira: JiraConfig,

    /// Classification service settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// Pipeline tuning
    #[serde(default)]
    pub sync: SyncSettings,
}

/// Code host configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// API base URL
    #[serde(default = "default_github_endpoint")]
    pub endpoint: String,

    /// Login whose work is tracked
    pub username: Option<String>,

    /// API token (falls back to `GITHUB_TOKEN`)
    pub token: Option<String>,

    /// Repository allow-list (`owner/repo`); empty means all
    #[serde(default)]
    pub repositories: Vec<String>,

    /// Search facets to run
    #[serde(default = "default_github_facets")]
    pub facets: Vec<String>,
}

/// Issue tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraConfig {
    /// Site URL, e.g. `https://acme.atlassian.net`
    pub endpoint: Option<String>,

    /// Account email used for basic auth
    pub email: Option<String>,

    /// API token (falls back to `JIRA_API_TOKEN`)
    pub token: Option<String>,

    /// Project allow-list (keys); empty means all
    #[serde(default)]
    pub projects: Vec<String>,

    /// Search facets to run
    #[serde(default = "default_jira_facets")]
    pub facets: Vec<String>,
}

/// LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// API endpoint URL (e.g., http://localhost:11434 for Ollama)
    pub endpoint: Option<String>,

    /// Model name to use
    pub model: Option<String>,

    /// API key (falls back to `LLM_API_KEY`)
    pub api_key: Option<String>,

    /// Maximum tokens for response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Temperature for generation
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Pipeline tuning knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Items per classification batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Rate-limit retries per batch
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff in seconds; retry n waits `n × backoff_secs`
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,

    /// Initial per-item body length sent for classification
    #[serde(default = "default_body_truncation")]
    pub body_truncation: usize,

    /// Floor for body length when shrinking after rate limits
    #[serde(default = "default_min_body_truncation")]
    pub min_body_truncation: usize,

    /// Changed file names listed per item
    #[serde(default = "default_max_files_per_item")]
    pub max_files_per_item: usize,

    /// Global item cap applied in dry-run mode
    #[serde(default = "default_dry_run_limit")]
    pub dry_run_limit: usize,

    /// Results requested per search page
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Pages fetched per query before giving up
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

fn default_github_endpoint() -> String {
    "https://api.github.com".to_string()
}

fn default_github_facets() -> Vec<String> {
    vec!["authored".to_string(), "reviewed".to_string()]
}

fn default_jira_facets() -> Vec<String> {
    vec!["assigned".to_string()]
}

fn default_max_tokens() -> usize {
    4096
}

fn default_temperature() -> f32 {
    0.2
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_batch_size() -> usize {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_secs() -> u64 {
    30
}

fn default_body_truncation() -> usize {
    1200
}

fn default_min_body_truncation() -> usize {
    200
}

fn default_max_files_per_item() -> usize {
    20
}

fn default_dry_run_limit() -> usize {
    20
}

fn default_page_size() -> u32 {
    50
}

fn default_max_pages() -> u32 {
    10
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            endpoint: default_github_endpoint(),
            username: None,
            token: None,
            repositories: Vec::new(),
            facets: default_github_facets(),
        }
    }
}

impl Default for JiraConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            email: None,
            token: None,
            projects: Vec::new(),
            facets: default_jira_facets(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: None,
            api_key: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            backoff_secs: default_backoff_secs(),
            body_truncation: default_body_truncation(),
            min_body_truncation: default_min_body_truncation(),
            max_files_per_item: default_max_files_per_item(),
            dry_run_limit: default_dry_run_limit(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
        }
    }
}

/// Default home directory for config and database
pub fn default_home() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("evidencesync"))
        .unwrap_or_else(|| PathBuf::from(".evidencesync"))
}

impl Config {
    /// Load configuration from the home directory or return defaults
    pub fn load_or_default(home: &Path) -> Result<Self> {
        let config_path = home.join(CONFIG_FILE);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the home directory
    pub fn save(&self, home: &Path) -> Result<()> {
        std::fs::create_dir_all(home)?;

        let config_path = home.join(CONFIG_FILE);
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.sync.batch_size == 0 {
            anyhow::bail!("sync.batch_size must be > 0");
        }
        if self.sync.page_size == 0 || self.sync.page_size > 100 {
            anyhow::bail!("sync.page_size must be in 1..=100");
        }
        if self.sync.max_pages == 0 {
            anyhow::bail!("sync.max_pages must be > 0");
        }
        if self.sync.dry_run_limit == 0 {
            anyhow::bail!("sync.dry_run_limit must be > 0");
        }
        if self.sync.min_body_truncation > self.sync.body_truncation {
            anyhow::bail!("sync.min_body_truncation must not exceed sync.body_truncation");
        }
        for facet in &self.github.facets {
            if !matches!(facet.as_str(), "authored" | "reviewed") {
                anyhow::bail!("Unknown github facet: '{}'. Must be authored or reviewed.", facet);
            }
        }
        for facet in &self.jira.facets {
            if !matches!(facet.as_str(), "assigned" | "reported") {
                anyhow::bail!("Unknown jira facet: '{}'. Must be assigned or reported.", facet);
            }
        }
        Ok(())
    }

    /// Resolve code host settings using the process environment
    pub fn resolve_github(&self) -> std::result::Result<GitHubSettings, SyncError> {
        self.resolve_github_with(|key| std::env::var(key).ok())
    }

    /// Resolve code host settings with an explicit environment lookup
    pub fn resolve_github_with<F>(&self, env: F) -> std::result::Result<GitHubSettings, SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let username = self
            .github
            .username
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| SyncError::Configuration("github.username is not set".to_string()))?;

        let token = self
            .github
            .token
            .clone()
            .or_else(|| env("GITHUB_TOKEN"))
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                SyncError::Configuration(
                    "GitHub token missing: set github.token or GITHUB_TOKEN".to_string(),
                )
            })?;

        Ok(GitHubSettings {
            endpoint: self.github.endpoint.trim_end_matches('/').to_string(),
            username,
            token,
            facets: self.github.facets.clone(),
            page_size: self.sync.page_size,
        })
    }

    /// Resolve issue tracker settings using the process environment
    pub fn resolve_jira(&self) -> std::result::Result<JiraSettings, SyncError> {
        self.resolve_jira_with(|key| std::env::var(key).ok())
    }

    /// Resolve issue tracker settings with an explicit environment lookup
    pub fn resolve_jira_with<F>(&self, env: F) -> std::result::Result<JiraSettings, SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint = self
            .jira
            .endpoint
            .clone()
            .ok_or_else(|| SyncError::Configuration("jira.endpoint is not set".to_string()))?;

        let email = self
            .jira
            .email
            .clone()
            .ok_or_else(|| SyncError::Configuration("jira.email is not set".to_string()))?;

        let token = self
            .jira
            .token
            .clone()
            .or_else(|| env("JIRA_API_TOKEN"))
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                SyncError::Configuration(
                    "Jira token missing: set jira.token or JIRA_API_TOKEN".to_string(),
                )
            })?;

        Ok(JiraSettings {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            email,
            token,
            facets: self.jira.facets.clone(),
            page_size: self.sync.page_size,
        })
    }

    /// Resolve classification client settings using the process environment
    pub fn resolve_llm(&self) -> std::result::Result<llm::LlmConfig, SyncError> {
        self.resolve_llm_with(|key| std::env::var(key).ok())
    }

    /// Resolve classification client settings with an explicit environment lookup
    pub fn resolve_llm_with<F>(&self, env: F) -> std::result::Result<llm::LlmConfig, SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint = self
            .llm
            .endpoint
            .clone()
            .ok_or_else(|| SyncError::Configuration("llm.endpoint is not set".to_string()))?;

        let model = self
            .llm
            .model
            .clone()
            .ok_or_else(|| SyncError::Configuration("llm.model is not set".to_string()))?;

        Ok(llm::LlmConfig {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model,
            api_key: self.llm.api_key.clone().or_else(|| env("LLM_API_KEY")),
            max_tokens: self.llm.max_tokens,
            temperature: self.llm.temperature,
            timeout_secs: self.llm.timeout_secs,
        })
    }

    /// Scope allow-list configured for a source system
    pub fn default_scopes(&self, system: crate::evidence::SourceSystem) -> Vec<String> {
        match system {
            crate::evidence::SourceSystem::GitHub => self.github.repositories.clone(),
            crate::evidence::SourceSystem::Jira => self.jira.projects.clone(),
        }
    }
}
