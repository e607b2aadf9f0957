use std::path::{Path, PathBuf};

use tidemark_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

const LOCAL_CANDIDATES: &[&str] = &["tidemark.toml", "tidemark.yml", "tidemark.yaml"];
const GLOBAL_CANDIDATES: &[&str] = &["config.toml", "config.yml", "config.yaml"];

pub const ENV_DATABASE_PATH: &str = "TIDEMARK_DATABASE_PATH";
pub const ENV_MIGRATIONS_DIR: &str = "TIDEMARK_MIGRATIONS_DIR";
pub const ENV_LEDGER_TABLE: &str = "TIDEMARK_LEDGER_TABLE";

/// Locates, parses and validates the configuration file.
pub struct ConfigLoader {
    working_dir: PathBuf,
    global_dir: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            global_dir: dirs::config_dir().map(|d| d.join("tidemark")),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn with_global_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.global_dir = dir;
        self
    }

    /// Load configuration. An explicit path must exist; otherwise the local
    /// directory wins over the global config directory, and built-in
    /// defaults apply when neither has a file. Environment overrides are
    /// applied last.
    pub fn load(&self, explicit: Option<&Path>) -> Result<AppConfig> {
        let mut config = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::Config(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                load_file(path)?
            }
            None => match self.discover() {
                Some(path) => load_file(&path)?,
                None => {
                    debug!("no config file found, using defaults");
                    AppConfig::default()
                }
            },
        };

        apply_env_overrides(&mut config, |key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// First existing candidate file, if any.
    pub fn discover(&self) -> Option<PathBuf> {
        let local = LOCAL_CANDIDATES.iter().map(|name| self.working_dir.join(name));
        let global = self
            .global_dir
            .iter()
            .flat_map(|dir| GLOBAL_CANDIDATES.iter().map(move |name| dir.join(name)));
        local.chain(global).find(|p| p.is_file())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a config file, choosing the format by extension.
pub fn load_file(path: &Path) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let config = match ext {
        "yml" | "yaml" => serde_yaml::from_str(&contents)
            .map_err(|e| Error::Config(format!("YAML parse error in {}: {e}", path.display())))?,
        "toml" => toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("TOML parse error in {}: {e}", path.display())))?,
        other => {
            return Err(Error::Config(format!(
                "unsupported config extension: {other:?}"
            )));
        }
    };

    info!("using config from {}", path.display());
    Ok(config)
}

pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = lookup(ENV_DATABASE_PATH).filter(|v| !v.is_empty()) {
        config.database.path = PathBuf::from(path);
    }
    if let Some(dir) = lookup(ENV_MIGRATIONS_DIR).filter(|v| !v.is_empty()) {
        config.migrations.directory = PathBuf::from(dir);
    }
    if let Some(table) = lookup(ENV_LEDGER_TABLE).filter(|v| !v.is_empty()) {
        config.migrations.table = table;
    }
}
