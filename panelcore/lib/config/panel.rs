//! The panel configuration file and its environment overrides.

use std::{
    env,
    path::{Path, PathBuf},
};

use getset::Getters;
use panelutils::DEFAULT_LOG_RING_CAPACITY;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    config::{
        BackendDescriptor, BackendKind, BIN_FOLDER_ENV_VAR, CONFIG_PATH_ENV_VAR, DB_DSN_ENV_VAR,
        DB_PATH_ENV_VAR, DB_TYPE_ENV_VAR, DEFAULT_BIN_FOLDER, DEFAULT_CONFIG_FILENAME,
        DEFAULT_DB_PATH, DEFAULT_DB_TYPE, DEFAULT_ENGINE_CONFIG_FILENAME, DEFAULT_LOG_LEVEL,
        DEFAULT_SERVICE_NAME, LOG_LEVEL_ENV_VAR,
    },
    PanelcoreError, PanelcoreResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The panel configuration.
///
/// Every field is optional in the TOML file; missing ones fall back to the defaults in
/// [`crate::config`]. Environment variables are applied on top of the file.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder, PartialEq, Getters)]
#[getset(get = "pub with_prefix")]
#[serde(default)]
pub struct PanelConfig {
    /// `sqlite` or `postgres`.
    #[builder(default = DEFAULT_DB_TYPE.to_string(), setter(into))]
    db_type: String,

    /// The SQLite database file.
    #[builder(default = PathBuf::from(DEFAULT_DB_PATH), setter(into))]
    db_path: PathBuf,

    /// The PostgreSQL connection string.
    #[builder(default, setter(into))]
    db_dsn: String,

    /// The folder holding the engine binary.
    #[builder(default = PathBuf::from(DEFAULT_BIN_FOLDER), setter(into))]
    bin_folder: PathBuf,

    /// The engine configuration file. Defaults to `config.json` in the bin folder.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(strip_option, into))]
    engine_config: Option<PathBuf>,

    /// The service unit queried for journal logs.
    #[builder(default = DEFAULT_SERVICE_NAME.to_string(), setter(into))]
    service_name: String,

    /// The log level used when `RUST_LOG` is not set.
    #[builder(default = DEFAULT_LOG_LEVEL.to_string(), setter(into))]
    log_level: String,

    /// How many application log lines are kept in memory.
    #[builder(default = DEFAULT_LOG_RING_CAPACITY)]
    log_ring_capacity: usize,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PanelConfig {
    /// Loads the configuration.
    ///
    /// The file is `path` when given, else `$XUI_CONFIG`, else `panel.toml` in the working
    /// directory. An explicitly named file must exist; the implicit one may be absent.
    pub fn load(path: Option<&Path>) -> PanelcoreResult<Self> {
        // A missing .env file is not an error.
        let _ = dotenvy::dotenv();

        let (config_path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match env::var(CONFIG_PATH_ENV_VAR) {
                Ok(path) => (PathBuf::from(path), true),
                Err(_) => (PathBuf::from(DEFAULT_CONFIG_FILENAME), false),
            },
        };

        let mut config = if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)?;
            let config: PanelConfig = toml::from_str(&contents)?;
            tracing::info!("loaded configuration from {}", config_path.display());
            config
        } else if explicit {
            return Err(PanelcoreError::Configuration(format!(
                "configuration file not found: {}",
                config_path.display()
            )));
        } else {
            tracing::debug!("no configuration file found, using defaults");
            PanelConfig::default()
        };

        config.apply_overrides(|key| env::var(key).ok());
        Ok(config)
    }

    /// Applies overrides from `lookup`, normally the process environment.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(db_type) = lookup(DB_TYPE_ENV_VAR) {
            self.db_type = db_type;
        }

        if let Some(db_path) = lookup(DB_PATH_ENV_VAR) {
            self.db_path = PathBuf::from(db_path);
        }

        if let Some(db_dsn) = lookup(DB_DSN_ENV_VAR) {
            self.db_dsn = db_dsn;
        }

        if let Some(bin_folder) = lookup(BIN_FOLDER_ENV_VAR) {
            self.bin_folder = PathBuf::from(bin_folder);
        }

        if let Some(log_level) = lookup(LOG_LEVEL_ENV_VAR) {
            self.log_level = log_level;
        }
    }

    /// Selects the storage backend.
    pub fn backend(&self) -> PanelcoreResult<BackendDescriptor> {
        match self.db_type.parse::<BackendKind>()? {
            BackendKind::Sqlite => Ok(BackendDescriptor::sqlite(&self.db_path)),
            BackendKind::Postgres => Ok(BackendDescriptor::postgres(&self.db_dsn)),
        }
    }

    /// The engine binary for this host, `xray-<os>-<arch>` in the bin folder.
    pub fn engine_binary_path(&self) -> PathBuf {
        self.bin_folder.join(format!(
            "xray-{}-{}",
            std::env::consts::OS,
            std::env::consts::ARCH
        ))
    }

    /// The engine configuration file.
    pub fn engine_config_path(&self) -> PathBuf {
        self.engine_config
            .clone()
            .unwrap_or_else(|| self.bin_folder.join(DEFAULT_ENGINE_CONFIG_FILENAME))
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for PanelConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_panel_config_defaults() {
        let config = PanelConfig::default();

        assert_eq!(config.get_db_type(), "sqlite");
        assert_eq!(config.get_db_path(), Path::new(DEFAULT_DB_PATH));
        assert_eq!(
            config.engine_config_path(),
            Path::new("bin").join("config.json")
        );
        assert_eq!(
            config.backend().unwrap(),
            BackendDescriptor::sqlite(DEFAULT_DB_PATH)
        );
    }

    #[test]
    fn test_panel_config_parse_partial_file() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let path = temp_dir.path().join("panel.toml");
        std::fs::write(
            &path,
            r#"
            db_type = "postgres"
            db_dsn = "host=localhost user=xui dbname=xui port=5432 password=x"
            log_ring_capacity = 50
            "#,
        )?;

        let contents = std::fs::read_to_string(&path)?;
        let config: PanelConfig = toml::from_str(&contents)?;

        assert_eq!(config.get_log_ring_capacity(), &50);
        assert_eq!(config.get_service_name(), "x-ui");
        assert_eq!(config.backend()?.kind(), BackendKind::Postgres);

        Ok(())
    }

    #[test]
    fn test_panel_config_load_missing_explicit_file() {
        let result = PanelConfig::load(Some(Path::new("/nonexistent/panel.toml")));
        assert!(matches!(result, Err(PanelcoreError::Configuration(_))));
    }

    #[test]
    fn test_panel_config_overrides() {
        let overrides: HashMap<&str, &str> = [
            (DB_TYPE_ENV_VAR, "postgres"),
            (DB_DSN_ENV_VAR, "host=db dbname=panel"),
            (BIN_FOLDER_ENV_VAR, "/usr/local/x-ui/bin"),
        ]
        .into_iter()
        .collect();

        let mut config = PanelConfig::default();
        config.apply_overrides(|key| overrides.get(key).map(|v| v.to_string()));

        assert_eq!(
            config.backend().unwrap(),
            BackendDescriptor::postgres("host=db dbname=panel")
        );
        assert_eq!(
            config.engine_config_path(),
            Path::new("/usr/local/x-ui/bin/config.json")
        );
    }

    #[test]
    fn test_panel_config_rejects_unknown_db_type() {
        let config = PanelConfig::builder().db_type("mysql").build();
        assert!(matches!(
            config.backend(),
            Err(PanelcoreError::Configuration(_))
        ));
    }
}
