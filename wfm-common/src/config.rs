//! Bootstrap configuration and root folder resolution
//!
//! Every bootstrap setting resolves in the same priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing TOML file is never an error; a TOML file that exists but does
//! not parse is.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Application directory name used under the platform config/data dirs
pub const APP_DIR: &str = "wfm-gt";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "wfm-gt.db";

pub const ENV_ROOT_FOLDER: &str = "WFM_GT_ROOT_FOLDER";
pub const ENV_HOST: &str = "WFM_GT_HOST";
pub const ENV_PORT: &str = "WFM_GT_PORT";
pub const ENV_CONFIG: &str = "WFM_GT_CONFIG";

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5780;
pub const DEFAULT_EVENT_CAPACITY: usize = 1000;
pub const DEFAULT_HAR_MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Contents of `config.toml`. All sections are optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub server: ServerSection,
    pub events: EventsSection,
    pub har: HarSection,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EventsSection {
    /// Broadcast channel capacity for the event bus
    pub capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HarSection {
    pub max_upload_bytes: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: Option<String>,
}

/// Values supplied on the command line; `None` means "not given"
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub root_folder: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub config_file: Option<PathBuf>,
}

/// Fully resolved bootstrap configuration
#[derive(Debug, Clone)]
pub struct ToolkitConfig {
    pub root_folder: PathBuf,
    pub host: String,
    pub port: u16,
    pub event_capacity: usize,
    pub har_max_upload_bytes: usize,
    pub log_level: String,
}

impl ToolkitConfig {
    /// Resolve every setting from CLI, environment, TOML and defaults
    pub fn resolve(cli: &CliOverrides, toml: Option<&TomlConfig>) -> Result<Self> {
        let fallback = TomlConfig::default();
        let toml = toml.unwrap_or(&fallback);

        let root_folder = cli
            .root_folder
            .clone()
            .or_else(|| env_value(ENV_ROOT_FOLDER).map(PathBuf::from))
            .or_else(|| toml.root_folder.clone())
            .unwrap_or_else(default_root_folder);

        let host = cli
            .host
            .clone()
            .or_else(|| env_value(ENV_HOST))
            .or_else(|| toml.server.host.clone())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());

        let port = match (cli.port, env_value(ENV_PORT)) {
            (Some(port), _) => port,
            (None, Some(raw)) => raw
                .parse::<u16>()
                .map_err(|e| Error::Config(format!("{} must be a port number: {}", ENV_PORT, e)))?,
            (None, None) => toml.server.port.unwrap_or(DEFAULT_PORT),
        };

        let event_capacity = toml.events.capacity.unwrap_or(DEFAULT_EVENT_CAPACITY);
        if event_capacity == 0 {
            return Err(Error::Config("events.capacity must be greater than 0".to_string()));
        }

        Ok(Self {
            root_folder,
            host,
            port,
            event_capacity,
            har_max_upload_bytes: toml
                .har
                .max_upload_bytes
                .unwrap_or(DEFAULT_HAR_MAX_UPLOAD_BYTES),
            log_level: toml.logging.level.clone().unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Path of the SQLite database inside the root folder
    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE)
    }

    /// Create the root folder if it does not exist yet
    pub fn ensure_root_folder(&self) -> Result<()> {
        if !self.root_folder.exists() {
            std::fs::create_dir_all(&self.root_folder)?;
            info!("Created root folder: {}", self.root_folder.display());
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Load the TOML config
///
/// An explicitly named file (CLI or `WFM_GT_CONFIG`) must exist. Otherwise the
/// platform locations are tried and a missing file yields `Ok(None)`.
pub fn load_toml_config(explicit: Option<&Path>) -> Result<Option<TomlConfig>> {
    let explicit = explicit
        .map(Path::to_path_buf)
        .or_else(|| env_value(ENV_CONFIG).map(PathBuf::from));

    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            path
        }
        None => match default_config_path() {
            Some(path) => path,
            None => {
                warn!("No config file found, using defaults");
                return Ok(None);
            }
        },
    };

    let content = std::fs::read_to_string(&path)?;
    let config = parse_toml_config(&content)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    info!("Loaded configuration from {}", path.display());
    Ok(Some(config))
}

/// Parse TOML text into a [`TomlConfig`]
pub fn parse_toml_config(content: &str) -> std::result::Result<TomlConfig, toml::de::Error> {
    toml::from_str(content)
}

/// First existing platform config file, if any
fn default_config_path() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(unix) {
        let system_config = PathBuf::from("/etc").join(APP_DIR).join("config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/wfm-gt (or /var/lib/wfm-gt for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from("/var/lib").join(APP_DIR))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support").join(APP_DIR))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData").join(APP_DIR))
    } else {
        PathBuf::from("./wfm_gt_data")
    }
}
