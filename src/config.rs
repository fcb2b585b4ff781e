//! Configuration Loader
//! - CLI argument parsing with clap (env-var fallbacks included)
//! - TOML settings file for the deployment surface the process manager owns:
//!   bind address, worker count, worker implementation selector
//!
//! Resolution order: built-in defaults <- settings file <- CLI/env.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// CLI Configuration
// =============================================================================

/// Which worker implementation the process runs.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerKind {
    /// Drains connections gracefully on SIGINT/SIGTERM
    #[default]
    Graceful,
    /// Keeps the host default: abrupt termination on signal
    Plain,
}

/// Softstop CLI - graceful-drain request worker
#[derive(Parser)]
#[command(name = "softstop", version, about = "Graceful-drain request worker")]
pub struct Cli {
    /// Path to a TOML settings file (also: SOFTSTOP_CONFIG env var)
    #[arg(long, env = "SOFTSTOP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Bind address, e.g. 0.0.0.0:8000 (also: SOFTSTOP_BIND env var)
    #[arg(long, env = "SOFTSTOP_BIND")]
    pub bind: Option<String>,

    /// Worker count hint, consumed by the process manager
    #[arg(long)]
    pub workers: Option<usize>,

    /// Worker implementation to run
    #[arg(long, value_enum)]
    pub worker: Option<WorkerKind>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Subcommands
#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Accept and serve requests (default if no subcommand)
    Serve,
    /// Print the resolved settings as TOML and exit
    Config,
}

// =============================================================================
// Settings File Schema
// =============================================================================

#[derive(Deserialize, Default)]
struct FileConfig {
    server: Option<ServerSection>,
    drain: Option<DrainSection>,
    log: Option<LogSection>,
}

#[derive(Deserialize, Default)]
struct ServerSection {
    bind: Option<String>,
    workers: Option<usize>,
    worker: Option<WorkerKind>,
}

#[derive(Deserialize, Default)]
struct DrainSection {
    write_timeout_ms: Option<u64>,
}

#[derive(Deserialize, Default)]
struct LogSection {
    quiet_term_notice: Option<bool>,
}

// =============================================================================
// Resolved Settings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settings {
    pub bind: String,
    pub workers: usize,
    pub worker: WorkerKind,
    /// Bounds each terminal write during drain. 0 disables the bound.
    pub write_timeout_ms: u64,
    /// Suppress the noisy "was sent SIGTERM!" notice during orderly rollouts
    pub quiet_term_notice: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
            workers: num_cpus::get(),
            worker: WorkerKind::Graceful,
            write_timeout_ms: 1000,
            quiet_term_notice: true,
        }
    }
}

impl Settings {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn resolve(cli: &Cli) -> Result<Self> {
        let mut settings = Settings::default();
        if let Some(path) = &cli.config {
            settings.apply_file(path)?;
        }
        settings.apply_cli(cli);
        Ok(settings)
    }

    fn apply_file(&mut self, path: &Path) -> Result<()> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let file: FileConfig = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;

        if let Some(server) = file.server {
            if let Some(bind) = server.bind {
                self.bind = bind;
            }
            if let Some(workers) = server.workers {
                self.workers = workers;
            }
            if let Some(worker) = server.worker {
                self.worker = worker;
            }
        }
        if let Some(drain) = file.drain {
            if let Some(ms) = drain.write_timeout_ms {
                self.write_timeout_ms = ms;
            }
        }
        if let Some(log) = file.log {
            if let Some(quiet) = log.quiet_term_notice {
                self.quiet_term_notice = quiet;
            }
        }
        Ok(())
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(bind) = &cli.bind {
            self.bind = bind.clone();
        }
        if let Some(workers) = cli.workers {
            self.workers = workers;
        }
        if let Some(worker) = cli.worker {
            self.worker = worker;
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn cli_with(config: Option<PathBuf>) -> Cli {
        Cli {
            config,
            bind: None,
            workers: None,
            worker: None,
            command: None,
        }
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::resolve(&cli_with(None)).unwrap();
        assert_eq!(settings.bind, "0.0.0.0:8000");
        assert_eq!(settings.worker, WorkerKind::Graceful);
        assert_eq!(settings.write_timeout_ms, 1000);
        assert!(settings.quiet_term_notice);
        assert!(settings.workers >= 1);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[server]
bind = "127.0.0.1:9100"
workers = 4
worker = "plain"

[drain]
write_timeout_ms = 250

[log]
quiet_term_notice = false
"#
        )
        .unwrap();

        let settings = Settings::resolve(&cli_with(Some(file.path().to_path_buf()))).unwrap();
        assert_eq!(settings.bind, "127.0.0.1:9100");
        assert_eq!(settings.workers, 4);
        assert_eq!(settings.worker, WorkerKind::Plain);
        assert_eq!(settings.write_timeout_ms, 250);
        assert!(!settings.quiet_term_notice);
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[server]
bind = "127.0.0.1:9100"
worker = "plain"
"#
        )
        .unwrap();

        let mut cli = cli_with(Some(file.path().to_path_buf()));
        cli.bind = Some("127.0.0.1:9200".to_string());
        cli.worker = Some(WorkerKind::Graceful);

        let settings = Settings::resolve(&cli).unwrap();
        assert_eq!(settings.bind, "127.0.0.1:9200");
        assert_eq!(settings.worker, WorkerKind::Graceful);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[server]
workers = 2
"#
        )
        .unwrap();

        let settings = Settings::resolve(&cli_with(Some(file.path().to_path_buf()))).unwrap();
        assert_eq!(settings.workers, 2);
        assert_eq!(settings.bind, "0.0.0.0:8000");
        assert_eq!(settings.write_timeout_ms, 1000);
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let err =
            Settings::resolve(&cli_with(Some(PathBuf::from("/nonexistent/softstop.toml"))))
                .unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not [valid toml").unwrap();
        let err = Settings::resolve(&cli_with(Some(file.path().to_path_buf()))).unwrap_err();
        assert!(err.to_string().contains("failed to parse"));
    }

    #[test]
    fn test_write_timeout_conversion() {
        let mut settings = Settings::default();
        settings.write_timeout_ms = 250;
        assert_eq!(settings.write_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_settings_serialize_to_toml() {
        let settings = Settings::default();
        let rendered = toml::to_string_pretty(&settings).unwrap();
        assert!(rendered.contains("bind = \"0.0.0.0:8000\""));
        assert!(rendered.contains("worker = \"graceful\""));
    }
}
