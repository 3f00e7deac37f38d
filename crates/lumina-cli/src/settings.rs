//! `lumina.toml` plus `LUMINA_*` environment overrides.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use lumina_shell::ShellConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
  pub store_path:  PathBuf,
  /// Flat JSON dump of the old key/value storage, imported once.
  pub legacy_path: Option<PathBuf>,
  pub shell:       ShellConfig,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      store_path:  PathBuf::from("~/.local/share/lumina/vault.db"),
      legacy_path: None,
      shell:       ShellConfig::default(),
    }
  }
}

impl AppConfig {
  /// Read `path` (optional) layered under the environment, e.g.
  /// `LUMINA_STORE_PATH` or `LUMINA_SHELL__PORT`.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("LUMINA")
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true),
      )
      .build()
      .with_context(|| format!("failed to read config file {}", path.display()))?;

    let mut cfg: AppConfig = settings
      .try_deserialize()
      .context("failed to deserialise AppConfig")?;
    cfg.store_path = expand_tilde(&cfg.store_path);
    cfg.legacy_path = cfg.legacy_path.as_deref().map(expand_tilde);
    cfg.shell.static_dir = cfg.shell.static_dir.as_deref().map(expand_tilde);
    Ok(cfg)
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
