use std::collections::HashMap;

use reqwest::Url;
use sqlx::postgres::PgConnectOptions;

use crate::{PanelcoreError, PanelcoreResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The environment variable libpq tools read the password from.
pub const PGPASSWORD_ENV_VAR: &str = "PGPASSWORD";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The parsed form of a space separated `key=value` PostgreSQL connection string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionParams {
    params: HashMap<String, String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ConnectionParams {
    /// Parses `host=... user=... dbname=... port=... password=...`.
    ///
    /// Tokens without an `=` are ignored. Only the first `=` splits, so values may contain `=`.
    pub fn parse(dsn: &str) -> Self {
        let params = dsn
            .split_whitespace()
            .filter_map(|token| token.split_once('='))
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();

        Self { params }
    }

    /// Looks up a single parameter.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// The server host.
    pub fn host(&self) -> Option<&str> {
        self.get("host")
    }

    /// The role to connect as.
    pub fn user(&self) -> Option<&str> {
        self.get("user")
    }

    /// The database name.
    pub fn dbname(&self) -> Option<&str> {
        self.get("dbname")
    }

    /// The server port.
    pub fn port(&self) -> Option<&str> {
        self.get("port")
    }

    /// The password.
    pub fn password(&self) -> Option<&str> {
        self.get("password")
    }

    /// Connection flags shared by `pg_dump` and `psql`. Missing parameters are left to libpq.
    pub fn libpq_args(&self) -> Vec<String> {
        [
            ("-h", self.host()),
            ("-U", self.user()),
            ("-d", self.dbname()),
            ("-p", self.port()),
        ]
        .into_iter()
        .filter_map(|(flag, value)| value.map(|value| [flag.to_string(), value.to_string()]))
        .flatten()
        .collect()
    }

    /// A `postgresql://` URL for tools that only take URLs, such as `pgloader`.
    pub fn to_url(&self) -> PanelcoreResult<String> {
        let host = self.host().unwrap_or("localhost");
        let port = self.port().unwrap_or("5432");
        let dbname = self.dbname().unwrap_or_default();

        let mut url = Url::parse(&format!("postgresql://{}:{}/{}", host, port, dbname))
            .map_err(|e| PanelcoreError::Configuration(format!("invalid connection string: {}", e)))?;

        if let Some(user) = self.user() {
            url.set_username(user).map_err(|_| {
                PanelcoreError::Configuration("connection string user is not valid".to_string())
            })?;
        }

        if let Some(password) = self.password() {
            url.set_password(Some(password)).map_err(|_| {
                PanelcoreError::Configuration("connection string password is not valid".to_string())
            })?;
        }

        Ok(url.to_string())
    }

    /// Connection options for the sqlx PostgreSQL driver.
    pub fn connect_options(&self) -> PanelcoreResult<PgConnectOptions> {
        let mut options = PgConnectOptions::new();

        if let Some(host) = self.host() {
            options = options.host(host);
        }

        if let Some(port) = self.port() {
            let port = port.parse::<u16>().map_err(|_| {
                PanelcoreError::Configuration(format!("invalid port in connection string: {}", port))
            })?;
            options = options.port(port);
        }

        if let Some(user) = self.user() {
            options = options.username(user);
        }

        if let Some(password) = self.password() {
            options = options.password(password);
        }

        if let Some(dbname) = self.dbname() {
            options = options.database(dbname);
        }

        if let Some(sslmode) = self.get("sslmode") {
            let sslmode = sslmode.parse().map_err(|_| {
                PanelcoreError::Configuration(format!("invalid sslmode: {}", sslmode))
            })?;
            options = options.ssl_mode(sslmode);
        }

        Ok(options)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
