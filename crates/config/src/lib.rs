//! Layered configuration for tome.
//!
//! Sources, lowest priority first:
//! 1. built-in defaults (platform data/config directories),
//! 2. a configuration file (TOML, YAML or JSON, chosen by extension),
//! 3. environment variables prefixed with `TOME_`, using `__` to separate
//!    nested keys (`TOME_SCHEDULE__INTERVAL_SECS=3600`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "TOME_";
const DATABASE_FILENAME: &str = "library.db";
const CREDENTIALS_FILENAME: &str = "personal.ini";
const CONFIG_FILENAME: &str = "config.toml";
const ONE_WEEK_SECS: u64 = 7 * 24 * 60 * 60;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "tome")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Directory holding masters, current copies, covers and fetch output.
    pub root: PathBuf,
    /// SQLite database; defaults to `library.db` inside the root.
    pub database: Option<PathBuf>,
}
impl LibraryConfig {
    pub fn database_path(&self) -> PathBuf {
        self.database.clone().unwrap_or_else(|| self.root.join(DATABASE_FILENAME))
    }
}
impl Default for LibraryConfig {
    fn default() -> Self {
        let root = project_dirs().map(|dirs| dirs.data_dir().join("library")).unwrap_or_else(|| PathBuf::from("library"));
        Self { root, database: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Download tool; discovered on `PATH` when unset.
    pub program: Option<PathBuf>,
    /// Credentials/settings file handed to the download tool. Must exist.
    pub credentials: PathBuf,
    /// Extra arguments passed before the URL.
    pub args: Vec<String>,
}
impl Default for FetchConfig {
    fn default() -> Self {
        let credentials = project_dirs()
            .map(|dirs| dirs.config_dir().join(CREDENTIALS_FILENAME))
            .unwrap_or_else(|| PathBuf::from(CREDENTIALS_FILENAME));
        Self { program: None, credentials, args: Vec::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}
impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}
impl Default for ScheduleConfig {
    fn default() -> Self {
        Self { enabled: true, interval_secs: ONE_WEEK_SECS }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub library: LibraryConfig,
    pub fetch: FetchConfig,
    pub schedule: ScheduleConfig,
}

impl Config {
    /// Loads the configuration from `file` (or the platform config directory's
    /// `config.toml`, when it exists) and the environment, then validates it.
    #[tracing::instrument]
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let file = file.map(Path::to_path_buf).or_else(|| {
            project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILENAME)).filter(|path| path.is_file())
        });
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(file) = &file {
            // Figment silently skips missing files.
            if !file.is_file() {
                exn::bail!(ErrorKind::Load);
            }
            tracing::debug!(file = %file.display(), "Reading configuration file");
            figment = match file.extension().and_then(|e| e.to_str()) {
                Some("yaml" | "yml") => figment.merge(Yaml::file_exact(file)),
                Some("json") => figment.merge(Json::file_exact(file)),
                _ => figment.merge(Toml::file_exact(file)),
            };
        }
        let config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.library.root.is_absolute() {
            exn::bail!(ErrorKind::Invalid(format!(
                "library root must be an absolute path, got {}",
                self.library.root.display()
            )));
        }
        if self.schedule.interval_secs == 0 {
            exn::bail!(ErrorKind::Invalid("schedule interval must be greater than zero".to_string()));
        }
        Ok(())
    }
}
