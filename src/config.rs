//! Layered configuration for distill.
//!
//! Settings resolve file → environment → CLI flags: `.distill/distill.toml`
//! provides defaults, `DISTILL_*` environment variables (loaded through
//! dotenvy) override the file, and CLI flags override both.
//!
//! # Configuration File Format
//!
//! ```toml
//! [backend]
//! url = "https://api.anthropic.com"
//! model = "claude-sonnet-4-20250514"
//!
//! [server]
//! port = 4242
//! db_path = ".distill/distill.db"
//! ```
//!
//! The API key is environment-only (`DISTILL_API_KEY`) so it never lands in
//! a checked-in file.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Generation backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub url: String,
    pub model: String,
    #[serde(skip)]
    pub api_key: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "https://api.anthropic.com".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            api_key: String::new(),
        }
    }
}

/// Server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub port: u16,
    pub db_path: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: 4242,
            db_path: ".distill/distill.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub server: ServerSection,
}

impl Config {
    /// Load configuration for a project directory.
    pub fn load(project_dir: &Path) -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = project_dir.join(".distill/distill.toml");
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Config::default()
        };

        config.apply_vars(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply environment-style overrides from a lookup function.
    fn apply_vars(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(v) = get("DISTILL_BACKEND_URL") {
            self.backend.url = v;
        }
        if let Some(v) = get("DISTILL_MODEL") {
            self.backend.model = v;
        }
        if let Some(v) = get("DISTILL_API_KEY") {
            self.backend.api_key = v;
        }
        if let Some(v) = get("DISTILL_PORT") {
            if let Ok(port) = v.parse() {
                self.server.port = port;
            }
        }
        if let Some(v) = get("DISTILL_DB") {
            self.server.db_path = v;
        }
    }
}
