//! Application configuration, loaded from TOML or JSON by file extension.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use armature_core::config::LifecycleManagerConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub lifecycle: LifecycleManagerConfig,
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<AppConfig> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        parse(&parse_extension(path), &raw)
    }
}

fn parse_extension(path: &Path) -> String {
    path.extension()
        .unwrap_or_default()
        .to_string_lossy()
        .to_ascii_lowercase()
}

fn parse(extension: &str, raw: &str) -> Result<AppConfig> {
    match extension {
        "json" => serde_json::from_str(raw).context("invalid JSON config"),
        "toml" => toml::from_str(raw).context("invalid TOML config"),
        other => bail!("unsupported config extension '{other}', expected json or toml"),
    }
}
