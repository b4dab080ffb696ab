//! Connection configuration.
//!
//! Loaded from TOML:
//!
//! ```toml
//! database_url = "sqlite://app.db"
//! dialect = "sqlite"
//! max_connections = 5
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::builder::Dialect;
use crate::error::{Error, Result};

/// Environment variable that overrides `database_url`.
pub const DATABASE_URL_ENV: &str = "QUERENT_DATABASE_URL";

const LOCAL_FILE: &str = "querent.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_url: Option<String>,
    pub dialect: Dialect,
    pub max_connections: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            dialect: Dialect::Generic,
            max_connections: 5,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Read a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        tracing::debug!("loaded config from {}", path.display());
        Self::from_toml(&content)
    }

    /// Load configuration and apply the environment override.
    ///
    /// An explicit path must exist. Otherwise `./querent.toml`, then
    /// `<config dir>/querent/config.toml`, then defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::candidates().into_iter().find(|p| p.is_file()) {
                Some(found) => Self::from_file(found)?,
                None => Self::default(),
            },
        };
        config.apply_env_from(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn candidates() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_FILE)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("querent").join("config.toml"));
        }
        paths
    }

    /// Override fields from an environment lookup.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(DATABASE_URL_ENV).filter(|url| !url.is_empty()) {
            self.database_url = Some(url);
        }
    }

    /// Effective dialect: the configured one, or inferred from the URL when generic.
    pub fn dialect(&self) -> Dialect {
        match (self.dialect, self.database_url.as_deref()) {
            (Dialect::Generic, Some(url)) => Dialect::from_url(url).unwrap_or(Dialect::Generic),
            (dialect, _) => dialect,
        }
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn database(mut self, url: impl Into<String>) -> Self {
        self.config.database_url = Some(url.into());
        self
    }

    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.config.dialect = dialect;
        self
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.config.max_connections = max;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.database_url, None);
        assert_eq!(config.dialect(), Dialect::Generic);
        assert_eq!(config.max_connections, 5);
    }

    #[test]
    fn test_from_toml() {
        let config = Config::from_toml(
            r#"
            database_url = "postgres://localhost/app"
            dialect = "postgres"
            max_connections = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/app"));
        assert_eq!(config.dialect, Dialect::Postgres);
        assert_eq!(config.max_connections, 10);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(r#"database_url = "sqlite::memory:""#).unwrap();
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.dialect, Dialect::Generic);
        assert_eq!(config.dialect(), Dialect::Sqlite);
    }

    #[test]
    fn test_bad_toml() {
        let err = Config::from_toml("max_connections = \"many\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = Config::load(Some(Path::new("/nonexistent/querent.toml"))).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_env_override() {
        let mut config = Config::builder().database("mysql://a/b").build();
        config.apply_env_from(|key| (key == DATABASE_URL_ENV).then(|| "sqlite::memory:".to_string()));
        assert_eq!(config.database_url.as_deref(), Some("sqlite::memory:"));

        config.apply_env_from(|_| Some(String::new()));
        assert_eq!(config.database_url.as_deref(), Some("sqlite::memory:"));

        config.apply_env_from(|_| None);
        assert_eq!(config.database_url.as_deref(), Some("sqlite::memory:"));
    }

    #[test]
    fn test_explicit_dialect_wins() {
        let config = Config::builder()
            .database("postgres://localhost/app")
            .dialect(Dialect::MySql)
            .build();
        assert_eq!(config.dialect(), Dialect::MySql);
    }
}
