use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tidemark_common::{Error, Result};

const MAX_TABLE_NAME_LEN: usize = 64;

/// Top-level configuration, read once at startup and passed into the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub migrations: MigrationsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub driver: Driver,
    /// Database file, or `:memory:`.
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: Driver::Sqlite,
            path: PathBuf::from("tidemark.db"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    #[default]
    Sqlite,
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Driver::Sqlite => f.write_str("sqlite"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MigrationsConfig {
    /// Root directory scanned for migration units.
    pub directory: PathBuf,
    /// Name of the ledger table.
    pub table: String,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("db/migrations"),
            table: "schema_migrations".to_string(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        validate_table_name(&self.migrations.table)?;
        if self.database.path.as_os_str().is_empty() {
            return Err(Error::Config("database.path cannot be empty".into()));
        }
        Ok(())
    }
}

/// The ledger table name is interpolated into SQL, so only plain
/// identifiers are accepted.
pub fn validate_table_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Config("ledger table name cannot be empty".into()));
    }
    if name.len() > MAX_TABLE_NAME_LEN {
        return Err(Error::Config(format!(
            "ledger table name too long ({} > {MAX_TABLE_NAME_LEN})",
            name.len()
        )));
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(Error::Config(format!(
            "ledger table name {name:?} cannot start with a digit"
        )));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::Config(format!(
            "ledger table name {name:?} may only contain ASCII letters, digits and '_'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.migrations.table, "schema_migrations");
        assert_eq!(config.database.driver, Driver::Sqlite);
    }

    #[test]
    fn validates_table_name_constraints() {
        assert!(validate_table_name("mpm_migrations").is_ok());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("1migrations").is_err());
        assert!(validate_table_name("migrations; DROP TABLE x").is_err());
        assert!(validate_table_name("my-table").is_err());

        let too_long = "a".repeat(65);
        assert!(validate_table_name(&too_long).is_err());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [migrations]
            table = "ledger"
            "#,
        )
        .unwrap();
        assert_eq!(config.migrations.table, "ledger");
        assert_eq!(config.migrations.directory, PathBuf::from("db/migrations"));
        assert_eq!(config.database.path, PathBuf::from("tidemark.db"));
    }

    #[test]
    fn unknown_driver_is_rejected() {
        let result: std::result::Result<AppConfig, _> = toml::from_str(
            r#"
            [database]
            driver = "oracle"
            "#,
        );
        assert!(result.is_err());
    }
}
