// Copyright (c) 2025 Chetan Conikee <conikee@gmail.com>
// Licensed under the MIT License

//! The Config collaborator: optional, TOML-backed settings plus the
//! bookmark list the Forest mutates under its edit/delete coupling rules.
//!
//! Config is absent-by-default: a missing or unparsable file yields
//! [`Config::default`] rather than an error, so the engine is usable with
//! zero setup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ForestError, Result};

/// Optional settings loaded from `<base>/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Where the Store keeps its data, if not the default application
    /// directory.
    pub store_root: Option<PathBuf>,
    /// The provider name used when a caller does not specify one.
    pub default_provider: Option<String>,
    /// The model name used when a caller does not specify one.
    pub default_model: Option<String>,
    /// The `tracing` filter directive the demo binary's `--verbose` flag
    /// installs.
    pub log_level: Option<String>,
}

impl Config {
    /// Loads config from `path`, or from the platform data directory's
    /// `config.toml` if `path` is `None`. A missing or unparsable file
    /// yields `Config::default()`.
    pub fn load(path: Option<&Path>) -> Config {
        let resolved = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Config::default(),
            },
        };
        let Ok(content) = std::fs::read_to_string(&resolved) else {
            return Config::default();
        };
        toml::from_str(&content).unwrap_or_default()
    }

    /// The default config path: `<data dir>/forest-engine/config.toml`.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("forest-engine").join("config.toml"))
    }

    /// Resolves the store's base directory: the configured `store_root`,
    /// or `<data dir>/forest-engine/store` if unset.
    #[must_use]
    pub fn resolved_store_root(&self) -> PathBuf {
        self.store_root.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("forest-engine")
                .join("store")
        })
    }

    /// Writes this config to `path` as TOML, creating parent directories as
    /// needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ForestError::io(parent.to_path_buf(), e))?;
        }
        let toml = toml::to_string_pretty(self)
            .map_err(|e| ForestError::consistency("config", format!("failed to serialize config: {e}")))?;
        std::fs::write(path, toml).map_err(|e| ForestError::io(path.to_path_buf(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_missing_file_yields_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let config = Config::load(Some(&path));
        assert!(config.store_root.is_none());
        assert!(config.default_provider.is_none());
    }

    #[test]
    fn load_unparsable_file_yields_default_instead_of_erroring() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is not valid toml {{{").unwrap();
        let config = Config::load(Some(&path));
        assert!(config.default_model.is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config {
            store_root: Some(PathBuf::from("/tmp/forest")),
            default_provider: Some("openai".into()),
            default_model: Some("gpt-4".into()),
            log_level: Some("debug".into()),
        };
        config.save(&path).unwrap();
        let loaded = Config::load(Some(&path));
        assert_eq!(loaded.default_provider.as_deref(), Some("openai"));
        assert_eq!(loaded.store_root, Some(PathBuf::from("/tmp/forest")));
    }

    #[test]
    fn resolved_store_root_falls_back_when_unset() {
        let config = Config::default();
        let resolved = config.resolved_store_root();
        assert!(resolved.ends_with("store"));
    }
}
