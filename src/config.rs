use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;

use crate::fetch::FetchConfig;

/// Application configuration. Every field has a default so an empty file is valid.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// Root of the resource cache (covers and pages). Also holds the default database.
    pub data_dir: Option<PathBuf>,
    pub database_url: Option<String>,
    pub fetch: FetchConfig,
    pub update_concurrency: usize,
    pub sources: SourcesConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SourcesConfig {
    pub disabled: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            database_url: None,
            fetch: FetchConfig::default(),
            update_concurrency: 4,
            sources: SourcesConfig::default(),
        }
    }
}

impl Config {
    /// Load from `path`, or from `<config_dir>/config.toml` when it exists, then
    /// apply `TANKOBON_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => project_dirs()
                .map(|d| d.config_dir().join("config.toml"))
                .filter(|p| p.exists()),
        };
        let mut cfg = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(&p)
                    .with_context(|| format!("reading config: {}", p.display()))?;
                Self::from_toml(&raw).with_context(|| format!("parsing config: {}", p.display()))?
            }
            None => Self::default(),
        };
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    fn apply_env(&mut self) {
        if let Some(dir) = std::env::var_os("TANKOBON_DATA_DIR").filter(|v| !v.is_empty()) {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Ok(url) = std::env::var("TANKOBON_DATABASE_URL") {
            if !url.trim().is_empty() { self.database_url = Some(url); }
        }
    }

    /// Resolved data directory; falls back to the platform data dir.
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir { return Ok(dir.clone()); }
        let proj = project_dirs().context("unable to determine data directory")?;
        Ok(proj.data_dir().to_path_buf())
    }

    pub fn source_enabled(&self, id: &str) -> bool {
        !self.sources.disabled.iter().any(|d| d == id)
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "tankobon", "tankobon")
}
