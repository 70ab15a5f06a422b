//! TOML configuration for the hardware tester.
//!
//! Every field has a default, so an empty or partial file is valid. The file
//! is looked up through `HWTESTER_CONFIG`, then `$HOME/HW_tester/hwtester.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Directory under `$HOME` holding the database and the config file.
pub const HOME_DIR_NAME: &str = "HW_tester";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TesterConfig {
    #[serde(default)]
    pub uut: UutConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TesterConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded tester configuration");
        Ok(config)
    }

    /// Try to load configuration from, in order:
    /// 1. The path specified by the `HWTESTER_CONFIG` environment variable.
    /// 2. `$HOME/HW_tester/hwtester.toml`.
    /// 3. Fall back to compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var("HWTESTER_CONFIG") {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "HWTESTER_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        if let Some(home) = home_dir() {
            let user_path = home.join(HOME_DIR_NAME).join("hwtester.toml");
            if user_path.exists() {
                match Self::load(&user_path) {
                    Ok(cfg) => return cfg,
                    Err(e) => {
                        warn!(
                            path = %user_path.display(),
                            error = %e,
                            "user config file exists but could not be loaded, using defaults"
                        );
                    }
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
}

// ---------------------------------------------------------------------------
// UUT endpoint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UutConfig {
    /// Hostname or IP address of the unit under test.
    pub address: String,
    /// UDP port the UUT listens on.
    pub port: u16,
    /// Per-datagram receive timeout. Unset means wait forever for every
    /// requested peripheral.
    pub receive_timeout_ms: Option<u64>,
}

impl Default for UutConfig {
    fn default() -> Self {
        Self {
            address: "192.168.1.177".to_string(),
            port: 54321,
            receive_timeout_ms: None,
        }
    }
}

impl UutConfig {
    pub fn receive_timeout(&self) -> Option<Duration> {
        self.receive_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path. Defaults to `$HOME/HW_tester/records.db`.
    pub db_path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn resolve_db_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.db_path {
            return Ok(path.clone());
        }
        let home = home_dir().context(
            "HOME environment variable not set; configure storage.db_path or pass --db",
        )?;
        Ok(home.join(HOME_DIR_NAME).join("records.db"))
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// Emit JSON lines instead of human-readable log output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = TesterConfig::default();

        assert_eq!(cfg.uut.address, "192.168.1.177");
        assert_eq!(cfg.uut.port, 54321);
        assert!(cfg.uut.receive_timeout_ms.is_none());
        assert!(cfg.uut.receive_timeout().is_none());

        assert!(cfg.storage.db_path.is_none());

        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.logging.json);
    }

    #[test]
    fn test_parse_example_toml() {
        let toml_str = r#"
[uut]
address = "10.0.0.42"
port = 6000
receive_timeout_ms = 2500

[storage]
db_path = "/var/lib/hwtester/records.db"

[logging]
level = "debug"
json = true
"#;

        let cfg: TesterConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(cfg.uut.address, "10.0.0.42");
        assert_eq!(cfg.uut.port, 6000);
        assert_eq!(cfg.uut.receive_timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(
            cfg.storage.resolve_db_path().unwrap(),
            PathBuf::from("/var/lib/hwtester/records.db")
        );
        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.logging.json);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
[uut]
address = "uut.lab.local"
"#;

        let cfg: TesterConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(cfg.uut.address, "uut.lab.local");
        assert_eq!(cfg.uut.port, 54321);
        assert!(cfg.storage.db_path.is_none());
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_zero_timeout_means_none() {
        let cfg: TesterConfig = toml::from_str("[uut]\nreceive_timeout_ms = 0\n").unwrap();
        assert!(cfg.uut.receive_timeout().is_none());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("hwtester.toml");
        std::fs::write(&path, "[uut]\nport = 9999\n").unwrap();

        let cfg = TesterConfig::load(&path).unwrap();
        assert_eq!(cfg.uut.port, 9999);
    }

    #[test]
    fn test_load_missing_file_errors() {
        let result = TesterConfig::load(Path::new("/nonexistent/path/hwtester.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut cfg = TesterConfig::default();
        cfg.uut.receive_timeout_ms = Some(100);
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let roundtripped: TesterConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(cfg.uut.address, roundtripped.uut.address);
        assert_eq!(cfg.uut.receive_timeout_ms, roundtripped.uut.receive_timeout_ms);
    }
}
