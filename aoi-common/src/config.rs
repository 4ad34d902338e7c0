//! Configuration loading and root folder resolution
//!
//! Settings sources, highest priority first:
//! 1. Command-line arguments
//! 2. Environment variables (`AOI_ROOT_FOLDER`, `AOI_CONFIG`)
//! 3. TOML configuration file
//! 4. Compiled defaults
//!
//! A missing TOML file is not an error: the services log a warning and run
//! on defaults.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "AOI_ROOT_FOLDER";

/// Environment variable pointing at the TOML config file
pub const CONFIG_PATH_ENV: &str = "AOI_CONFIG";

const APP_DIR_NAME: &str = "aoi-defect";
const DEFAULT_DATABASE_FILE: &str = "aoi_defects.db";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    /// Root folder holding the database (and exports, unless overridden)
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Database file name, relative to the root folder unless absolute
    #[serde(default)]
    pub database_file: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub review: ReviewConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Ingestion settings
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Directory scanned for exports when no files are given (default: root folder)
    #[serde(default)]
    pub source_dir: Option<PathBuf>,

    /// File name prefix of AOI exports
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    /// Timestamps within this many minutes of a pass start belong to that pass
    #[serde(default = "default_pass_window_minutes")]
    pub pass_window_minutes: u32,

    /// Apply files older than already-ingested overlapping data
    #[serde(default)]
    pub confirm_out_of_order: bool,

    /// Number of rejected rows kept as samples in the batch report
    #[serde(default = "default_sample_limit")]
    pub sample_limit: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            source_dir: None,
            file_prefix: default_file_prefix(),
            pass_window_minutes: default_pass_window_minutes(),
            confirm_out_of_order: false,
            sample_limit: default_sample_limit(),
        }
    }
}

/// Review service settings
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Default N for top-N rollups
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            top_n: default_top_n(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_file_prefix() -> String {
    "Defect RawData".to_string()
}

fn default_pass_window_minutes() -> u32 {
    10
}

fn default_sample_limit() -> usize {
    20
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5740
}

fn default_top_n() -> usize {
    20
}

impl TomlConfig {
    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
    }

    /// Load the config from an explicit path, `AOI_CONFIG`, or the platform default
    ///
    /// An explicitly named file must exist and parse. The platform default is
    /// optional: when absent, defaults are returned with a warning.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Self::from_file(Path::new(&path));
        }

        match default_config_path() {
            Some(path) if path.exists() => {
                info!("Loading configuration from {}", path.display());
                Self::from_file(&path)
            }
            Some(path) => {
                warn!(
                    "No config file at {} - using built-in defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            None => {
                warn!("Could not determine config directory - using built-in defaults");
                Ok(Self::default())
            }
        }
    }
}

/// Platform config file location (`<config dir>/aoi-defect/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join("config.toml"))
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("./aoi_data"))
}

/// Resolves the root folder from CLI, environment, TOML and defaults
#[derive(Debug, Clone, Default)]
pub struct RootFolderResolver {
    cli_arg: Option<PathBuf>,
    toml_value: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    pub fn with_toml(mut self, config: &TomlConfig) -> Self {
        self.toml_value = config.root_folder.clone();
        self
    }

    /// Resolve following CLI > ENV > TOML > default
    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            info!("Root folder from command line: {}", path.display());
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                info!("Root folder from {}: {}", ROOT_FOLDER_ENV, path);
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &self.toml_value {
            info!("Root folder from config file: {}", path.display());
            return path.clone();
        }

        let path = default_root_folder();
        info!("Root folder default: {}", path.display());
        path
    }
}

/// Prepares the resolved root folder and derives paths inside it
#[derive(Debug, Clone)]
pub struct RootFolderInitializer {
    root_folder: PathBuf,
    database_file: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self {
            root_folder,
            database_file: PathBuf::from(DEFAULT_DATABASE_FILE),
        }
    }

    /// Override the database file name (from `database_file` in TOML)
    pub fn with_database_file(mut self, file: Option<PathBuf>) -> Self {
        if let Some(file) = file {
            self.database_file = file;
        }
        self
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    /// Create the root folder if missing
    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root_folder.exists() {
            std::fs::create_dir_all(&self.root_folder)?;
            info!("Created root folder: {}", self.root_folder.display());
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        if self.database_file.is_absolute() {
            self.database_file.clone()
        } else {
            self.root_folder.join(&self.database_file)
        }
    }
}
