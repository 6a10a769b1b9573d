//! Database configuration read from the environment.

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbDriver {
    Mysql,
    Sqlite3,
}

impl DbDriver {
    /// `None` for anything that is not a supported driver name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" => Some(DbDriver::Mysql),
            "sqlite3" | "sqlite" => Some(DbDriver::Sqlite3),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DbDriver::Mysql => "mysql",
            DbDriver::Sqlite3 => "sqlite3",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    /// Raw driver name; see [`DbConfig::driver`].
    #[serde(default)]
    pub driver: String,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_sqlite_path() -> String {
    "./knox.db".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3306
}

fn default_database() -> String {
    "knox".to_string()
}

fn default_max_connections() -> u32 {
    10
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            driver: String::new(),
            sqlite_path: default_sqlite_path(),
            host: default_host(),
            port: default_port(),
            user: String::new(),
            password: String::new(),
            database: default_database(),
            max_connections: default_max_connections(),
        }
    }
}

impl DbConfig {
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            driver: DbDriver::Sqlite3.as_str().to_string(),
            sqlite_path: path.into(),
            ..Self::default()
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("KNOX_DB_DRIVER") {
            cfg.driver = v;
        }
        if let Ok(v) = std::env::var("KNOX_SQLITE_PATH") {
            cfg.sqlite_path = v;
        }
        if let Ok(v) = std::env::var("KNOX_DB_HOST") {
            cfg.host = v;
        }
        if let Ok(v) = std::env::var("KNOX_DB_PORT") {
            cfg.port = v.parse().map_err(|_| ConfigError::Invalid {
                key: "KNOX_DB_PORT",
                value: v.clone(),
            })?;
        }
        if let Ok(v) = std::env::var("KNOX_DB_USER") {
            cfg.user = v;
        }
        if let Ok(v) = std::env::var("KNOX_DB_PASSWORD") {
            cfg.password = v;
        }
        if let Ok(v) = std::env::var("KNOX_DB_NAME") {
            cfg.database = v;
        }
        if let Ok(v) = std::env::var("KNOX_DB_MAX_CONNECTIONS") {
            cfg.max_connections = v.parse().map_err(|_| ConfigError::Invalid {
                key: "KNOX_DB_MAX_CONNECTIONS",
                value: v.clone(),
            })?;
        }
        Ok(cfg)
    }

    /// The configured driver, or `None` when unset or unrecognised.
    pub fn driver(&self) -> Option<DbDriver> {
        DbDriver::parse(&self.driver)
    }

    pub fn mysql_url(&self) -> String {
        format!(
            "mysql://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_names() {
        assert_eq!(DbDriver::parse("mysql"), Some(DbDriver::Mysql));
        assert_eq!(DbDriver::parse("sqlite3"), Some(DbDriver::Sqlite3));
        assert_eq!(DbDriver::parse(" SQLite "), Some(DbDriver::Sqlite3));
        assert_eq!(DbDriver::parse("mongo"), None);
        assert_eq!(DbConfig::default().driver(), None);
    }

    #[test]
    fn mysql_url_from_parts() {
        let cfg = DbConfig {
            driver: "mysql".to_string(),
            user: "root".to_string(),
            password: "pw".to_string(),
            ..DbConfig::default()
        };
        assert_eq!(cfg.mysql_url(), "mysql://root:pw@127.0.0.1:3306/knox");
    }
}
