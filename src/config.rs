use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config in {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub kill: KillConfig,
    pub resolver: ResolverConfig,
    pub proc: ProcConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub refresh_rate_ms: u64,
    pub error_log_capacity: usize,
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            refresh_rate_ms: 2000,
            error_log_capacity: 64,
            log_level: "warn".to_string(),
        }
    }
}

impl GeneralConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_rate_ms.max(1))
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct KillConfig {
    pub grace_period_ms: u64,
}

impl Default for KillConfig {
    fn default() -> Self {
        KillConfig {
            grace_period_ms: 200,
        }
    }
}

impl KillConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub services_path: PathBuf,
    pub enabled: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            services_path: PathBuf::from("/etc/services"),
            enabled: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProcConfig {
    pub root: PathBuf,
}

impl Default for ProcConfig {
    fn default() -> Self {
        ProcConfig {
            root: PathBuf::from("/proc"),
        }
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("proctop").join("config.toml"))
}

pub fn load_config() -> Config {
    match config_path() {
        Some(path) if path.exists() => load_config_from_path(&path),
        _ => Config::default(),
    }
}

/// Falls back to defaults when the file is missing or invalid.
pub fn load_config_from_path(path: &Path) -> Config {
    try_load_config_from_path(path).unwrap_or_else(|err| {
        if path.exists() {
            warn!(error = %err, "Using default configuration");
        }
        Config::default()
    })
}

pub fn try_load_config_from_path(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = Config::default();
        assert_eq!(config.general.refresh_rate_ms, 2000);
        assert_eq!(config.general.error_log_capacity, 64);
        assert_eq!(config.general.log_level, "warn");
        assert_eq!(config.kill.grace_period(), Duration::from_millis(200));
        assert_eq!(config.resolver.services_path, PathBuf::from("/etc/services"));
        assert!(config.resolver.enabled);
        assert_eq!(config.proc.root, PathBuf::from("/proc"));
    }

    #[test]
    fn parse_partial_toml() {
        let toml_str = r#"
[general]
refresh_rate_ms = 500
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.refresh_rate_ms, 500);
        // Other fields should be defaults
        assert_eq!(config.general.log_level, "warn");
        assert_eq!(config.kill.grace_period_ms, 200);
    }

    #[test]
    fn parse_full_toml() {
        let toml_str = r#"
[general]
refresh_rate_ms = 1000
error_log_capacity = 8
log_level = "debug"

[kill]
grace_period_ms = 50

[resolver]
services_path = "/tmp/services"
enabled = false

[proc]
root = "/tmp/fakeproc"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.refresh_interval(), Duration::from_secs(1));
        assert_eq!(config.general.error_log_capacity, 8);
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.kill.grace_period_ms, 50);
        assert_eq!(config.resolver.services_path, PathBuf::from("/tmp/services"));
        assert!(!config.resolver.enabled);
        assert_eq!(config.proc.root, PathBuf::from("/tmp/fakeproc"));
    }

    #[test]
    fn zero_refresh_rate_is_clamped() {
        let general = GeneralConfig {
            refresh_rate_ms: 0,
            ..Default::default()
        };
        assert_eq!(general.refresh_interval(), Duration::from_millis(1));
    }

    #[test]
    fn missing_file_returns_default() {
        let config = load_config_from_path(Path::new("/nonexistent/path/config.toml"));
        assert_eq!(config.general.refresh_rate_ms, 2000);
    }

    #[test]
    fn invalid_toml_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is not valid toml {{{{").unwrap();
        let config = load_config_from_path(&path);
        assert_eq!(config.general.refresh_rate_ms, 2000);
        assert!(matches!(
            try_load_config_from_path(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = try_load_config_from_path(Path::new("/nonexistent/path/config.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("/nonexistent/path/config.toml"));
    }
}
