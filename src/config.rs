//! # Config: Client Configuration
//!
//! Where the backend lives, which access token to send, and a few client-side
//! knobs. Stored as TOML at `~/.tasklens/config.toml`; every field can be
//! overridden per invocation by CLI flags or `TASKLENS_*` environment
//! variables (see `main.rs`).
//!
//! ```toml
//! server = "https://api.example.com"
//! token = "eyJhbGciOi..."
//! project_id = "proj_123"
//! page_size = 20
//! request_timeout_secs = 30
//! cache_capacity = 64
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_server() -> String {
    "http://localhost:8000".to_string()
}

fn default_page_size() -> u32 {
    crate::filters::DEFAULT_PAGE_SIZE
}

fn default_request_timeout_secs() -> u64 {
    crate::client::DEFAULT_REQUEST_TIMEOUT.as_secs()
}

fn default_cache_capacity() -> usize {
    crate::cache::DEFAULT_CACHE_CAPACITY
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_server")]
    pub server: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: default_server(),
            token: None,
            project_id: None,
            page_size: default_page_size(),
            request_timeout_secs: default_request_timeout_secs(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Reject values that would make every request fail.
    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.server)
            .with_context(|| format!("invalid server URL '{}'", self.server))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("server URL must be http or https, got '{}'", url.scheme());
        }
        if self.page_size == 0 {
            anyhow::bail!("page_size must be at least 1");
        }
        Ok(())
    }

    /// Apply per-invocation overrides on top of the file values.
    pub fn with_overrides(
        mut self,
        server: Option<String>,
        token: Option<String>,
        project_id: Option<String>,
    ) -> Self {
        if let Some(server) = server {
            self.server = server;
        }
        if let Some(token) = token {
            self.token = Some(token);
        }
        if let Some(project_id) = project_id {
            self.project_id = Some(project_id);
        }
        self
    }
}

/// Default location: `~/.tasklens/config.toml`.
pub fn config_path() -> Result<PathBuf> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_err(|_| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(PathBuf::from(home).join(".tasklens").join("config.toml"))
}

/// Load the config at `path`. A missing file yields the defaults.
pub fn load_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config: Config =
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
    Ok(config)
}

pub fn save_to(path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
