//! Configuration loading and root folder resolution
//!
//! Bootstrap settings come from a small TOML file. Every value has a built-in
//! default, so a missing file is not an error.
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`NMPM_ROOT_FOLDER`)
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "NMPM_ROOT_FOLDER";

/// Environment variable overriding the HTTP port
pub const PORT_ENV: &str = "NMPM_PORT";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "nmpm.db";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Folder holding the SQLite database (optional, see resolution order)
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Delay inserted after every processed release, in milliseconds
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,

    /// Base URL of the streaming service Web API
    #[serde(default = "default_spotify_api_base")]
    pub spotify_api_base: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
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

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            port: default_port(),
            logging: LoggingConfig::default(),
            pacing_ms: default_pacing_ms(),
            spotify_api_base: default_spotify_api_base(),
        }
    }
}

fn default_port() -> u16 {
    9000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_pacing_ms() -> u64 {
    1000
}

fn default_spotify_api_base() -> String {
    "https://api.spotify.com/v1".to_string()
}

impl TomlConfig {
    /// Load configuration from the platform config file, falling back to defaults
    ///
    /// A missing file yields defaults; an unreadable or malformed file is logged
    /// and also yields defaults so the tools still start.
    pub fn load_or_default() -> Self {
        match default_config_path() {
            Ok(path) => match Self::load(&path) {
                Ok(config) => {
                    info!("Loaded configuration from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("Ignoring config file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from an explicit TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))
    }

    /// Port from environment, else TOML value
    pub fn resolve_port(&self) -> u16 {
        std::env::var(PORT_ENV)
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(self.port)
    }
}

/// Resolve the root folder following the documented priority order
pub fn resolve_root_folder(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(path) = &config.root_folder {
        return path.clone();
    }

    // Priority 4: OS-dependent compiled default
    default_root_folder()
}

/// Path of the SQLite database inside a root folder
pub fn database_path(root_folder: &Path) -> PathBuf {
    root_folder.join(DATABASE_FILE)
}

/// User-Agent sent by every outbound HTTP client
pub fn user_agent() -> String {
    format!("nmpm/{} (playlist builder)", env!("CARGO_PKG_VERSION"))
}

/// Get default configuration file path for the platform
fn default_config_path() -> Result<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("nmpm").join("config.toml"));

    if let Some(path) = user_config {
        if path.exists() {
            return Ok(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/nmpm/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
    }

    Err(Error::Config("No config file found".to_string()))
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("nmpm"))
        .unwrap_or_else(|| PathBuf::from("./nmpm_data"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults_when_fields_missing() {
        let config: TomlConfig = toml::from_str("").unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.pacing_ms, 1000);
        assert_eq!(config.logging.level, "info");
        assert!(config.root_folder.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "root_folder = \"/srv/nmpm\"\nport = 9100\npacing_ms = 250\n\n[logging]\nlevel = \"debug\"\n",
        )
        .unwrap();

        let config = TomlConfig::load(&path).unwrap();
        assert_eq!(config.root_folder, Some(PathBuf::from("/srv/nmpm")));
        assert_eq!(config.port, 9100);
        assert_eq!(config.pacing_ms, 250);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "port = \"not a number\"").unwrap();

        assert!(matches!(TomlConfig::load(&path), Err(Error::Config(_))));
    }

    #[test]
    #[serial]
    fn test_cli_arg_wins_over_env() {
        std::env::set_var(ROOT_FOLDER_ENV, "/tmp/nmpm-env");
        let config = TomlConfig::default();

        let resolved = resolve_root_folder(Some(Path::new("/tmp/nmpm-cli")), &config);
        assert_eq!(resolved, PathBuf::from("/tmp/nmpm-cli"));

        std::env::remove_var(ROOT_FOLDER_ENV);
    }

    #[test]
    #[serial]
    fn test_env_wins_over_toml() {
        std::env::set_var(ROOT_FOLDER_ENV, "/tmp/nmpm-env");
        let config = TomlConfig {
            root_folder: Some(PathBuf::from("/tmp/nmpm-toml")),
            ..TomlConfig::default()
        };

        assert_eq!(resolve_root_folder(None, &config), PathBuf::from("/tmp/nmpm-env"));

        std::env::remove_var(ROOT_FOLDER_ENV);
        assert_eq!(resolve_root_folder(None, &config), PathBuf::from("/tmp/nmpm-toml"));
    }

    #[test]
    fn test_database_path_inside_root() {
        let path = database_path(Path::new("/srv/nmpm"));
        assert_eq!(path, PathBuf::from("/srv/nmpm/nmpm.db"));
    }
}
