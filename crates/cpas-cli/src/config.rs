//! Memory store configuration.
//!
//! Reads the `[memory]` section from `config/default.toml`, then applies
//! environment overrides (`CPAS_MEMORY_DB`, `CPAS_LOG_LEVEL`). A missing
//! file or section falls back to defaults; a malformed file is an error.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use cpas_memory::{StoreLocation, StoreOptions};
use serde::Deserialize;

/// Environment variable overriding `memory.db_path`.
pub const ENV_DB: &str = "CPAS_MEMORY_DB";
/// Environment variable overriding `memory.log_level`.
pub const ENV_LOG_LEVEL: &str = "CPAS_LOG_LEVEL";

/// Settings loaded from the `[memory]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Database file, or `:memory:`.
    pub db_path: String,
    /// How long a writer waits on a locked database.
    pub busy_timeout_ms: u64,
    /// Use WAL journaling for file-backed stores.
    pub wal: bool,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: "data/cpas_memory.db".to_string(),
            busy_timeout_ms: 5_000,
            wal: true,
            log_level: "warn".to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    memory: MemoryConfig,
}

impl MemoryConfig {
    /// Load from `path`; defaults if the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(content)?;
        Ok(file.memory)
    }

    /// Apply overrides from `lookup` (normally `std::env::var`).
    pub fn apply_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db) = lookup(ENV_DB).filter(|v| !v.trim().is_empty()) {
            self.db_path = db;
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|v| !v.trim().is_empty()) {
            self.log_level = level;
        }
        self
    }

    pub fn location(&self) -> StoreLocation {
        StoreLocation::parse(&self.db_path)
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            journal_wal: self.wal,
            ..StoreOptions::default()
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = MemoryConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, MemoryConfig::default());
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config = MemoryConfig::from_toml(
            r#"
            [memory]
            db_path = "/var/lib/cpas/memory.db"
            wal = false
            "#,
        )
        .unwrap();
        assert_eq!(config.db_path, "/var/lib/cpas/memory.db");
        assert!(!config.wal);
        assert_eq!(config.busy_timeout_ms, 5_000);
        assert!(!config.store_options().journal_wal);
    }

    #[test]
    fn other_sections_are_ignored() {
        let config = MemoryConfig::from_toml("[bot]\nhistory_window = 3\n").unwrap();
        assert_eq!(config, MemoryConfig::default());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[memory\ndb_path = ").unwrap();
        assert!(MemoryConfig::load(&path).is_err());
    }

    #[test]
    fn env_overrides_file() {
        let config = MemoryConfig::default().apply_env(|name| match name {
            ENV_DB => Some(":memory:".to_string()),
            ENV_LOG_LEVEL => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(config.location(), StoreLocation::InMemory);
        assert_eq!(config.log_level, "warn");
    }
}
