use std::time::Duration;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The database engine used when none is configured.
pub const DEFAULT_DB_TYPE: &str = "sqlite";

/// Where the embedded database lives by default.
pub const DEFAULT_DB_PATH: &str = "/etc/x-ui/x-ui.db";

/// The folder holding the engine binary and its configuration.
pub const DEFAULT_BIN_FOLDER: &str = "bin";

/// The engine configuration file name inside the bin folder.
pub const DEFAULT_ENGINE_CONFIG_FILENAME: &str = "config.json";

/// The systemd unit the panel runs as.
pub const DEFAULT_SERVICE_NAME: &str = "x-ui";

/// The log level used when neither `RUST_LOG` nor the config sets one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// The configuration file name looked up in the working directory.
pub const DEFAULT_CONFIG_FILENAME: &str = "panel.toml";

/// Environment variable pointing at the configuration file.
pub const CONFIG_PATH_ENV_VAR: &str = "XUI_CONFIG";

/// Environment variable overriding `db_type`.
pub const DB_TYPE_ENV_VAR: &str = "XUI_DB_TYPE";

/// Environment variable overriding `db_path`.
pub const DB_PATH_ENV_VAR: &str = "XUI_DB_PATH";

/// Environment variable overriding `db_dsn`.
pub const DB_DSN_ENV_VAR: &str = "XUI_DB_DSN";

/// Environment variable overriding `bin_folder`.
pub const BIN_FOLDER_ENV_VAR: &str = "XUI_BIN_FOLDER";

/// Environment variable overriding `log_level`.
pub const LOG_LEVEL_ENV_VAR: &str = "XUI_LOG_LEVEL";

/// Upper bound for a single external tool run (dump, restore, bulk load, journal query).
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(600);

/// Upper bound for a single HTTP request to a release or IP service.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound for downloading a release archive.
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);
