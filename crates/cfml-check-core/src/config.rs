//! Harness environment: project directory, the CrysFML database location and
//! the diagnostic chart gate.
//!
//! The environment is resolved once and handed to whatever needs it. Child
//! processes receive `CRYSFML_DB` through their own environment instead of the
//! harness mutating its process-wide variables.

use crate::domain::CheckError;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

pub const SCRIPTS_CONFIG_FILE: &str = "scripts.toml";
pub const GITHUB_WORKSPACE_ENV: &str = "GITHUB_WORKSPACE";
pub const CRYSFML_DB_ENV: &str = "CRYSFML_DB";
pub const PLOT_CHARTS_ENV: &str = "PLOT_CHARTS_IN_TESTS";
pub const DATABASES_DIR: &str = "Databases";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScriptsConfig {
    pub cfml: CfmlSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CfmlSection {
    pub dir: CfmlDirectories,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CfmlDirectories {
    pub repo: String,
    #[serde(rename = "repo-src")]
    pub repo_src: String,
}

impl ScriptsConfig {
    pub fn crysfml_db_path(&self, project_dir: &Path) -> PathBuf {
        project_dir
            .join(&self.cfml.dir.repo)
            .join(&self.cfml.dir.repo_src)
            .join(DATABASES_DIR)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("{name} must be an integer flag, found '{value}'")]
    InvalidFlag { name: &'static str, value: String },
    #[error("failed to read current working directory: {0}")]
    CurrentDir(std::io::Error),
}

impl From<ConfigError> for CheckError {
    fn from(error: ConfigError) -> Self {
        let message = error.to_string();
        match error {
            ConfigError::Read { .. } | ConfigError::CurrentDir(_) => {
                CheckError::io_system("IO.CONFIG", message)
            }
            ConfigError::Parse { .. } | ConfigError::InvalidFlag { .. } => {
                CheckError::input_validation("INPUT.CONFIG", message)
            }
        }
    }
}

pub fn load_scripts_config(path: impl AsRef<Path>) -> Result<ScriptsConfig, ConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// `bool(int(value))` semantics; unset means off.
pub fn parse_plot_flag(value: Option<&str>) -> Result<bool, ConfigError> {
    let Some(value) = value else {
        return Ok(false);
    };
    value
        .trim()
        .parse::<i64>()
        .map(|flag| flag != 0)
        .map_err(|_| ConfigError::InvalidFlag {
            name: PLOT_CHARTS_ENV,
            value: value.to_string(),
        })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessEnvironment {
    pub project_dir: PathBuf,
    pub crysfml_db: Option<PathBuf>,
    pub plot_charts: bool,
}

impl HarnessEnvironment {
    pub fn from_process_env() -> Result<Self, ConfigError> {
        let current_dir = std::env::current_dir().map_err(ConfigError::CurrentDir)?;
        Self::resolve(|name| std::env::var(name).ok(), &current_dir)
    }

    /// Resolution order for the database: an explicit `CRYSFML_DB`, then the
    /// `scripts.toml` layout under the project directory. A missing
    /// `scripts.toml` leaves the database unset.
    pub fn resolve(
        lookup: impl Fn(&str) -> Option<String>,
        current_dir: &Path,
    ) -> Result<Self, ConfigError> {
        let project_dir = lookup(GITHUB_WORKSPACE_ENV)
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| current_dir.to_path_buf());
        let plot_charts = parse_plot_flag(lookup(PLOT_CHARTS_ENV).as_deref())?;

        let crysfml_db = match lookup(CRYSFML_DB_ENV).filter(|value| !value.trim().is_empty()) {
            Some(explicit) => Some(PathBuf::from(explicit)),
            None => {
                let config_path = project_dir.join(SCRIPTS_CONFIG_FILE);
                if config_path.is_file() {
                    let config = load_scripts_config(&config_path)?;
                    Some(config.crysfml_db_path(&project_dir))
                } else {
                    debug!(path = %config_path.display(), "no scripts config; CRYSFML_DB left unset");
                    None
                }
            }
        };

        Ok(Self {
            project_dir,
            crysfml_db,
            plot_charts,
        })
    }

    pub fn apply_to(&self, command: &mut Command) {
        if let Some(db) = &self.crysfml_db {
            command.env(CRYSFML_DB_ENV, db);
        }
    }
}
