use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub const CATALOG_ENV: &str = "DBRPC_CATALOG";
pub const WORKSPACE_ENV: &str = "DBRPC_WORKSPACE";
pub const DATABASE_ENV: &str = "DBRPC_DATABASE";

#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    pub catalog_path: PathBuf,
    /// Passed to every driver as its workspace.
    #[serde(default)]
    pub workspace: Option<PathBuf>,
    /// Database every driver opens before the handshake.
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// No deadline on calls when unset.
    #[serde(default)]
    pub call_timeout_ms: Option<u64>,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_shutdown_grace_ms() -> u64 {
    2_000
}

impl ClientConfig {
    pub fn new(catalog_path: impl Into<PathBuf>) -> Self {
        Self {
            catalog_path: catalog_path.into(),
            workspace: None,
            database: None,
            handshake_timeout_ms: default_handshake_timeout_ms(),
            call_timeout_ms: None,
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }

    pub fn from_path(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// The catalog named by `DBRPC_CATALOG`, if set, else the configured one.
    pub fn catalog_path_with(&self, lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
        lookup(CATALOG_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| self.catalog_path.clone())
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.catalog_path_with(|key| std::env::var(key).ok())
    }

    /// Variables set in the driver's environment.
    pub fn driver_env(&self) -> Vec<(&'static str, String)> {
        let mut env = Vec::new();
        if let Some(workspace) = &self.workspace {
            env.push((WORKSPACE_ENV, workspace.display().to_string()));
        }
        if let Some(database) = &self.database {
            env.push((DATABASE_ENV, database.clone()));
        }
        env
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
