use serde::Deserialize;
use std::path::PathBuf;

pub const WORKSPACE_ENV: &str = "DBRPC_WORKSPACE";
pub const DATABASE_ENV: &str = "DBRPC_DATABASE";

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Memory,
    FlatFile,
}

impl std::str::FromStr for EngineKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(EngineKind::Memory),
            "flatfile" => Ok(EngineKind::FlatFile),
            other => Err(anyhow::anyhow!("unknown engine: {other}")),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DriverConfig {
    pub engine: EngineKind,
    /// Workspace root for engines that keep files.
    pub data_dir: Option<PathBuf>,
    /// Database opened before the handshake.
    pub database: Option<String>,
    #[serde(default = "default_max_cursors")]
    pub max_cursors: usize,
}

fn default_max_cursors() -> usize {
    1024
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::Memory,
            data_dir: None,
            database: None,
            max_cursors: default_max_cursors(),
        }
    }
}

impl DriverConfig {
    pub fn from_path(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Apply the workspace variables the client passes to every driver.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup(WORKSPACE_ENV).filter(|v| !v.is_empty()) {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(db) = lookup(DATABASE_ENV).filter(|v| !v.is_empty()) {
            self.database = Some(db);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.engine == EngineKind::FlatFile && self.data_dir.is_none() {
            return Err(anyhow::anyhow!("flatfile engine needs data_dir"));
        }
        if self.max_cursors == 0 {
            return Err(anyhow::anyhow!("max_cursors must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_toml_with_defaults() {
        let config: DriverConfig = toml::from_str(
            r#"
            engine = "flatfile"
            data_dir = "/srv/gis"
            "#,
        )
        .expect("parse");
        assert_eq!(config.engine, EngineKind::FlatFile);
        assert_eq!(config.max_cursors, 1024);
        assert!(config.database.is_none());
        config.validate().expect("valid");
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config = DriverConfig {
            data_dir: Some("/from/file".into()),
            ..DriverConfig::default()
        };
        config.apply_env(|key| match key {
            WORKSPACE_ENV => Some("/from/env".into()),
            DATABASE_ENV => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.data_dir, Some(PathBuf::from("/from/env")));
        assert!(config.database.is_none());
    }

    #[test]
    fn flatfile_without_workspace_is_invalid() {
        let config = DriverConfig {
            engine: EngineKind::FlatFile,
            ..DriverConfig::default()
        };
        assert!(config.validate().is_err());
        assert!("sqlite".parse::<EngineKind>().is_err());
    }
}
