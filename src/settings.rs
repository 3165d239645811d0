//! Runtime configuration.
//!
//! Values come from `config/default.toml`, then the file named by
//! `SANCTIONS_CONFIG`, then `SANCTIONS__SECTION__KEY` environment variables.

use std::path::Path;

use chrono::Duration;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub tokens: TokenSettings,
    #[serde(default)]
    pub sanctions: SanctionSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenSettings {
    #[serde(default = "default_secret")]
    pub secret: String,
    #[serde(default = "default_lifetime_hours")]
    pub lifetime_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SanctionSettings {
    #[serde(default = "default_pending_approval_hours")]
    pub pending_approval_hours: i64,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_db_path() -> String {
    "data/sanctions.db".to_string()
}

fn default_secret() -> String {
    "change-me-in-production".to_string()
}

fn default_lifetime_hours() -> i64 {
    168 // one week
}

fn default_pending_approval_hours() -> i64 {
    48
}

fn default_base_url() -> String {
    "http://localhost:5000".to_string()
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            secret: default_secret(),
            lifetime_hours: default_lifetime_hours(),
        }
    }
}

impl Default for SanctionSettings {
    fn default() -> Self {
        Self {
            pending_approval_hours: default_pending_approval_hours(),
            base_url: default_base_url(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self, config::ConfigError> {
        let explicit = std::env::var("SANCTIONS_CONFIG").ok();
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false));
        if let Some(path) = explicit {
            builder = builder.add_source(config::File::with_name(&path));
        }
        builder
            .add_source(config::Environment::with_prefix("SANCTIONS").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Reads a single file, without environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()?
            .try_deserialize()
    }

    pub fn pending_approval_window(&self) -> Duration {
        Duration::hours(self.sanctions.pending_approval_hours)
    }

    pub fn token_lifetime(&self) -> Duration {
        Duration::hours(self.tokens.lifetime_hours)
    }
}
