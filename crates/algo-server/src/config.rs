//! Configuration for the algo server.
//!
//! Values come from, in increasing priority:
//!
//! 1. built-in defaults,
//! 2. an optional TOML file,
//! 3. environment variables:
//!    - `ALGO_BIND_ADDR`   (default: "0.0.0.0")
//!    - `ALGO_PORT`        (default: "9100")
//!    - `ALGO_MAX_CLIENTS` (default: "1024")
//!    - `ALGO_THREADS`     (default: "4")
//!    - `ALGO_STORE_PATH`  (default: none, in-memory log)
//!
//! Command-line flags are applied on top by the binary.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use algo_core::ManagerConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// IP address / interface to bind to (e.g. "0.0.0.0" or "127.0.0.1").
    pub bind_addr: String,

    /// TCP port to listen on.
    pub port: u16,

    /// Maximum number of simultaneously connected clients.
    pub max_clients: usize,

    pub manager: ManagerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: "0.0.0.0".to_string(),
            port: 9100,
            max_clients: 1024,
            manager: ManagerConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Read `path` (if any), then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => ServerConfig::default(),
        };
        base.with_env()
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Apply `ALGO_*` environment variables on top of `self`.
    pub fn with_env(mut self) -> Result<Self> {
        if let Ok(addr) = env::var("ALGO_BIND_ADDR") {
            self.bind_addr = addr;
        }
        self.port = read_env_or_default("ALGO_PORT", self.port)?;
        self.max_clients = read_env_or_default("ALGO_MAX_CLIENTS", self.max_clients)?;
        self.manager.threads = read_env_or_default("ALGO_THREADS", self.manager.threads)?;
        if let Ok(path) = env::var("ALGO_STORE_PATH") {
            self.manager.store_path = Some(PathBuf::from(path));
        }
        Ok(self)
    }

    /// Convenience: `addr:port` socket string.
    pub fn socket_addr_string(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

fn read_env_or_default<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: {val:?}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn toml_file_with_partial_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
port = 7001

[manager]
threads = 2
store_path = "/var/lib/algo/events.jsonl"
"#
        )
        .unwrap();

        let cfg = ServerConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(cfg.port, 7001);
        assert_eq!(cfg.bind_addr, "0.0.0.0");
        assert_eq!(cfg.max_clients, 1024);
        assert_eq!(cfg.manager.threads, 2);
        assert!(cfg.manager.sync_writes);
        assert_eq!(
            cfg.manager.store_path.as_deref(),
            Some(Path::new("/var/lib/algo/events.jsonl"))
        );
        assert_eq!(cfg.socket_addr_string(), "0.0.0.0:7001");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = \"not a number\"").unwrap();
        assert!(ServerConfig::from_toml_file(file.path()).is_err());
        assert!(ServerConfig::from_toml_file(Path::new("/nonexistent/algo.toml")).is_err());
    }
}
