//! Configuration management.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Default port the server listens on.
pub const DEFAULT_PORT: u16 = 9999;

/// Configuration structure that matches the TOML file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    storage: StorageSection,
    #[serde(default)]
    logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct ServerSection {
    #[serde(default = "default_port")]
    port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct StorageSection {
    data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct LoggingSection {
    /// Log level (trace, debug, info, warn, error).
    /// If not set, the RUST_LOG environment variable or "info" is used.
    log_level: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port to listen on.
    pub port: u16,
    /// Directory for the server's working storage. Created at startup if absent.
    pub data_dir: PathBuf,
    /// Log level override (if set, used when RUST_LOG is absent).
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with full priority chain: CLI args > env vars > config files > defaults.
    ///
    /// Config files are searched in this order:
    /// 1. `.rootspace.toml` in the current directory
    /// 2. `config.toml` in the user config directory (~/.config/rootspace/ on Linux)
    pub fn from_figment(port: Option<u16>, data_dir: Option<PathBuf>) -> anyhow::Result<Self> {
        let local_config = env::current_dir().ok().map(|d| d.join(".rootspace.toml"));
        let user_config = directories::ProjectDirs::from("", "", "rootspace")
            .map(|dirs| dirs.config_dir().join("config.toml"));

        // Priority: defaults < user config < local config < env vars < CLI args
        let mut figment = Figment::new().merge(Serialized::defaults(ConfigFile {
            server: ServerSection { port: DEFAULT_PORT },
            storage: StorageSection::default(),
            logging: LoggingSection::default(),
        }));

        if let Some(ref path) = user_config {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        if let Some(ref path) = local_config {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        figment = figment.merge(
            Env::prefixed("ROOTSPACE_")
                .map(|key| key.as_str().replace("__", ".").into())
                .split("_"),
        );

        if let Some(p) = port {
            figment = figment.merge(Serialized::default("server.port", p));
        }
        if let Some(ref dd) = data_dir {
            figment = figment.merge(Serialized::default("storage.data_dir", dd));
        }

        let config_file: ConfigFile = figment.extract()?;

        Ok(Self {
            port: config_file.server.port,
            data_dir: config_file
                .storage
                .data_dir
                .unwrap_or_else(default_data_dir),
            log_level: config_file.logging.log_level,
        })
    }

    /// Load configuration from environment variables only.
    ///
    /// This method is primarily for backward compatibility and tests.
    /// The binary uses `Config::from_figment()` with parsed CLI arguments.
    pub fn from_env() -> Self {
        let port = env::var("ROOTSPACE_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let data_dir = env::var("ROOTSPACE_DATA_DIR")
            .ok()
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        Self {
            port,
            data_dir,
            log_level: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            data_dir: default_data_dir(),
            log_level: None,
        }
    }
}

/// Default data directory: `~/rootspace`, falling back to a relative
/// `rootspace/` when no home directory can be determined.
fn default_data_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join("rootspace"))
        .unwrap_or_else(|| PathBuf::from("rootspace"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    #[serial]
    fn test_from_figment_defaults() {
        std::env::remove_var("ROOTSPACE_SERVER_PORT");
        std::env::remove_var("ROOTSPACE_PORT");
        std::env::remove_var("ROOTSPACE_STORAGE_DATA_DIR");
        std::env::remove_var("ROOTSPACE_DATA_DIR");

        // Run in a temp directory to avoid picking up a project .rootspace.toml
        let temp_dir = TempDir::new().unwrap();
        let original_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let config = Config::from_figment(None, None).unwrap();

        let _ = std::env::set_current_dir(original_dir);

        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.data_dir.ends_with("rootspace"));
    }

    #[test]
    fn test_from_figment_cli_args_override() {
        let temp_dir = TempDir::new().unwrap();
        let data_dir = temp_dir.path().join("data");

        let config = Config::from_figment(Some(9000), Some(data_dir.clone())).unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.data_dir, data_dir);
    }

    #[test]
    #[serial]
    fn test_from_figment_config_file() {
        std::env::remove_var("ROOTSPACE_SERVER_PORT");
        std::env::remove_var("ROOTSPACE_STORAGE_DATA_DIR");

        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join(".rootspace.toml");
        let data_dir = temp_dir.path().join("custom_data");

        let config_content = format!(
            r#"
[server]
port = 7777

[storage]
data_dir = "{}"
"#,
            data_dir.display()
        );
        fs::write(&config_file, config_content).unwrap();

        let original_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let config = Config::from_figment(None, None).unwrap();

        let _ = std::env::set_current_dir(original_dir);

        assert_eq!(config.port, 7777);
        assert_eq!(config.data_dir, data_dir);
    }

    #[test]
    #[serial]
    fn test_from_figment_env_vars_override_config_file() {
        let original_port = std::env::var("ROOTSPACE_SERVER_PORT").ok();

        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join(".rootspace.toml");
        fs::write(&config_file, "[server]\nport = 7777").unwrap();

        std::env::set_var("ROOTSPACE_SERVER_PORT", "8888");

        let original_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let config = Config::from_figment(None, None).unwrap();

        let _ = std::env::set_current_dir(&original_dir);

        if let Some(port) = original_port {
            std::env::set_var("ROOTSPACE_SERVER_PORT", port);
        } else {
            std::env::remove_var("ROOTSPACE_SERVER_PORT");
        }

        assert_eq!(config.port, 8888);
    }

    #[test]
    #[serial]
    fn test_from_figment_cli_overrides_env_and_config() {
        let original_port = std::env::var("ROOTSPACE_SERVER_PORT").ok();

        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join(".rootspace.toml");
        fs::write(&config_file, "[server]\nport = 7777").unwrap();

        std::env::set_var("ROOTSPACE_SERVER_PORT", "8888");

        let original_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let config = Config::from_figment(Some(9999), None).unwrap();

        let _ = std::env::set_current_dir(&original_dir);

        if let Some(port) = original_port {
            std::env::set_var("ROOTSPACE_SERVER_PORT", port);
        } else {
            std::env::remove_var("ROOTSPACE_SERVER_PORT");
        }

        assert_eq!(config.port, 9999);
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        std::env::remove_var("ROOTSPACE_PORT");
        std::env::remove_var("ROOTSPACE_DATA_DIR");

        let config = Config::from_env();
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.data_dir.ends_with("rootspace"));
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        std::env::set_var("ROOTSPACE_PORT", "8080");
        std::env::set_var("ROOTSPACE_DATA_DIR", "/custom/path");

        let config = Config::from_env();

        std::env::remove_var("ROOTSPACE_PORT");
        std::env::remove_var("ROOTSPACE_DATA_DIR");

        assert_eq!(config.port, 8080);
        assert_eq!(config.data_dir, PathBuf::from("/custom/path"));
    }
}
