//! `config.toml` loading. CLI flags are applied on top by `main`.

use std::path::{
  Path,
  PathBuf,
};

use etcetera::{
  BaseStrategy,
  choose_base_strategy,
};
use eyre::{
  Result,
  WrapErr,
};
use serde::Deserialize;
use xi_view::ViewConfig;

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
  pub engine: EngineConfig,
  pub view:   ViewConfig,
  pub log:    LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
  pub program:    Option<PathBuf>,
  pub args:       Vec<String>,
  /// How long the engine may stay silent before the view counts as settled.
  pub settle_ms:  u64,
  /// Upper bound on waiting for the first screenful.
  pub timeout_ms: u64,
  /// Time given to the engine to exit after its input is closed.
  pub grace_ms:   u64,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      program:    None,
      args:       Vec::new(),
      settle_ms:  150,
      timeout_ms: 5_000,
      grace_ms:   1_000,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
  pub level: String,
  pub file:  Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "warn".into(),
      file:  None,
    }
  }
}

pub fn default_path() -> Option<PathBuf> {
  let strategy = choose_base_strategy().ok()?;
  Some(strategy.config_dir().join("xi-term").join("config.toml"))
}

pub fn parse(text: &str) -> Result<Config> {
  toml::from_str(text).wrap_err("invalid config")
}

/// Reads `path`, or the default location when `path` is `None`. A missing
/// default file yields the default config; a missing explicit file is an
/// error.
pub fn load(path: Option<&Path>) -> Result<Config> {
  let path = match path {
    Some(path) => path.to_path_buf(),
    None => {
      match default_path() {
        Some(path) if path.exists() => path,
        _ => return Ok(Config::default()),
      }
    },
  };

  let text = std::fs::read_to_string(&path)
    .wrap_err_with(|| format!("failed to read config {}", path.display()))?;
  parse(&text).wrap_err_with(|| format!("in {}", path.display()))
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use super::*;

  #[test]
  fn empty_config_is_default() {
    assert_eq!(parse("").unwrap(), Config::default());
  }

  #[test]
  fn sections_override_defaults() {
    let config = parse(
      r#"
        [engine]
        program = "/opt/xi/xi-core"
        args = ["--verbose"]

        [view]
        line_height = 16.0
        overscan = 4

        [log]
        level = "debug"
      "#,
    )
    .unwrap();
    assert_eq!(config.engine.program, Some(PathBuf::from("/opt/xi/xi-core")));
    assert_eq!(config.engine.args, vec!["--verbose".to_string()]);
    assert_eq!(config.engine.grace_ms, 1_000);
    assert_eq!(config.view.line_height, 16.0);
    assert_eq!(config.view.char_width, ViewConfig::default().char_width);
    assert_eq!(config.view.overscan, 4);
    assert_eq!(config.log.level, "debug");
  }

  #[test]
  fn unknown_keys_are_rejected() {
    assert!(parse("[engine]\nprogramm = \"x\"").is_err());
  }

  #[test]
  fn load_reads_explicit_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[engine]\nprogram = \"xi-core\"").unwrap();
    let config = load(Some(file.path())).unwrap();
    assert_eq!(config.engine.program, Some(PathBuf::from("xi-core")));
  }

  #[test]
  fn missing_explicit_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(load(Some(&dir.path().join("nope.toml"))).is_err());
  }
}
