//! Layered JSON config files
//!
//! The same file name is looked up in two places: the user's global config
//! directory and the `.wpok/` directory of the current project.

use crate::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Where a config layer lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigScope {
    /// `<config_dir>/wpok/`
    Global,
    /// `./.wpok/`
    Project,
}

impl ConfigScope {
    /// Lowest precedence first
    pub const LAYERED: [ConfigScope; 2] = [ConfigScope::Global, ConfigScope::Project];

    fn resolve_dir(self) -> Result<PathBuf> {
        match self {
            ConfigScope::Global => dirs::config_dir()
                .map(|dir| dir.join("wpok"))
                .ok_or_else(|| Error::Config("no config directory on this system".to_string())),
            ConfigScope::Project => std::env::current_dir()
                .map(|cwd| cwd.join(".wpok"))
                .map_err(|e| Error::Config(format!("cannot resolve project directory: {}", e))),
        }
    }
}

impl fmt::Display for ConfigScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigScope::Global => f.write_str("global"),
            ConfigScope::Project => f.write_str("project"),
        }
    }
}

/// One directory of JSON config files
#[derive(Debug, Clone)]
pub struct JsonStore {
    scope: ConfigScope,
    dir: PathBuf,
}

impl JsonStore {
    /// Store for `scope` at its standard location
    pub fn open(scope: ConfigScope) -> Result<Self> {
        Ok(Self::at(scope, scope.resolve_dir()?))
    }

    /// Store for `scope` rooted at an explicit directory
    pub fn at(scope: ConfigScope, dir: impl Into<PathBuf>) -> Self {
        Self {
            scope,
            dir: dir.into(),
        }
    }

    pub fn scope(&self) -> ConfigScope {
        self.scope
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Parse `name`, or `None` when this layer does not have it
    pub fn read<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.path(name);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!("No {} config at {}", self.scope, path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(Error::Config(format!(
                    "cannot read {} config {}: {}",
                    self.scope,
                    path.display(),
                    e
                )))
            }
        };

        serde_json::from_str(&content).map(Some).map_err(|e| {
            Error::Config(format!(
                "invalid {} config {}: {}",
                self.scope,
                path.display(),
                e
            ))
        })
    }

    /// Write `value` as pretty JSON, creating the directory if needed
    pub fn write<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path(name);
        let content = serde_json::to_string_pretty(value)?;
        std::fs::write(&path, content)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WpokConfig;

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::at(ConfigScope::Project, dir.path().join(".wpok"));

        let missing: Option<WpokConfig> = store.read("config.json").unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::at(ConfigScope::Global, dir.path().join("wpok"));

        let config = WpokConfig::new().with_store_path("/tmp/x.db");
        let path = store.write("config.json", &config).unwrap();
        assert!(path.ends_with("wpok/config.json"));

        let loaded: WpokConfig = store.read("config.json").unwrap().unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_parse_error_names_the_layer() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::at(ConfigScope::Project, dir.path());
        std::fs::write(store.path("config.json"), "{not json").unwrap();

        let err = store.read::<WpokConfig>("config.json").unwrap_err();
        assert!(matches!(&err, Error::Config(msg) if msg.starts_with("invalid project config")));
    }
}
