use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not resolve a configuration directory")]
    NoConfigDir,
    #[error("failed reading config file {}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid TOML in {}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed serializing config to TOML")]
    Serialize { source: toml::ser::Error },
    #[error("failed writing config file {}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    30
}
fn default_progress_interval_ms() -> u64 {
    500
}
fn default_refresh_interval_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub status: StatusConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Root for finished files and state slots. Defaults to `./downloads`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Worker executable. Defaults to `dlm-worker` next to the running binary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<PathBuf>,
    /// Extra arguments placed before the positional worker inputs.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_bytes_per_sec: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusConfig {
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: None,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: Vec::new(),
            connect_timeout_secs: default_connect_timeout_secs(),
            progress_interval_ms: default_progress_interval_ms(),
            rate_limit_bytes_per_sec: None,
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: default_refresh_interval_ms(),
        }
    }
}

impl WorkerConfig {
    /// The worker program, falling back to the sibling `dlm-worker` binary.
    pub fn resolve_program(&self) -> PathBuf {
        if let Some(program) = &self.program {
            return program.clone();
        }
        let name = format!("dlm-worker{}", std::env::consts::EXE_SUFFIX);
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(&name)))
            .unwrap_or_else(|| PathBuf::from(name))
    }

    /// Leading arguments: configured extras followed by the tuning flags.
    pub fn leading_args(&self) -> Vec<String> {
        let mut args = self.args.clone();
        args.push("--connect-timeout-secs".to_string());
        args.push(self.connect_timeout_secs.to_string());
        args.push("--progress-interval-ms".to_string());
        args.push(self.progress_interval_ms.to_string());
        if let Some(limit) = self.rate_limit_bytes_per_sec {
            args.push("--rate-limit".to_string());
            args.push(limit.to_string());
        }
        args
    }
}

impl StatusConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms.max(50))
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let proj = ProjectDirs::from("org", "dlm", "dlm").ok_or(ConfigError::NoConfigDir)?;
    Ok(proj.config_dir().join("config.toml"))
}

/// Loads the config at `path`, writing defaults there first if it is missing.
pub fn load_or_create(path: &Path) -> Result<Config> {
    if !path.exists() {
        let cfg = Config::default();
        save(&cfg, path)?;
        return Ok(cfg);
    }
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn save(cfg: &Config, path: &Path) -> Result<()> {
    let text = toml::to_string_pretty(cfg).map_err(|source| ConfigError::Serialize { source })?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(path, text).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Installs the stderr subscriber. `RUST_LOG` takes priority over `level`.
pub fn init_tracing(level: &str) {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| level.to_string());
    let filter = EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .compact()
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");

        let cfg = load_or_create(&path).expect("load");
        assert_eq!(cfg, Config::default());
        assert!(path.exists());
        assert_eq!(load_or_create(&path).expect("reload"), cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[general]\ndata_dir = \"/srv/media\"\n\n[worker]\nrate_limit_bytes_per_sec = 2048\n",
        )
        .unwrap();

        let cfg = load_or_create(&path).expect("load");
        assert_eq!(cfg.general.data_dir, Some(PathBuf::from("/srv/media")));
        assert_eq!(cfg.general.log_level, "info");
        assert_eq!(cfg.worker.connect_timeout_secs, 30);
        assert_eq!(cfg.worker.rate_limit_bytes_per_sec, Some(2048));
        assert_eq!(cfg.status.refresh_interval_ms, 1000);
    }

    #[test]
    fn invalid_toml_is_reported() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[general\n").unwrap();
        assert!(matches!(
            load_or_create(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn leading_args_carry_tuning_flags() {
        let cfg = WorkerConfig {
            args: vec!["--verbose".into()],
            rate_limit_bytes_per_sec: Some(10),
            ..WorkerConfig::default()
        };
        assert_eq!(
            cfg.leading_args(),
            vec![
                "--verbose",
                "--connect-timeout-secs",
                "30",
                "--progress-interval-ms",
                "500",
                "--rate-limit",
                "10"
            ]
        );
    }

    #[test]
    fn explicit_program_wins() {
        let cfg = WorkerConfig {
            program: Some(PathBuf::from("/opt/bin/worker")),
            ..WorkerConfig::default()
        };
        assert_eq!(cfg.resolve_program(), PathBuf::from("/opt/bin/worker"));
    }
}
