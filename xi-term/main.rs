//! Opens a file in the engine and prints the first screenful, styled.

mod app;
mod config;
mod logging;
mod render;

use std::{
  io,
  path::PathBuf,
  time::Duration,
};

use clap::Parser;
use eyre::{
  Result,
  WrapErr,
  eyre,
};
use log::LevelFilter;
use tracing::info;
use xi_rpc::{
  EngineCommand,
  Session,
};

use crate::app::App;

const DEFAULT_ENGINE: &str = "xi-core";

#[derive(Debug, Parser)]
#[command(name = "xi-term")]
#[command(about = "Terminal front-end for the xi text engine")]
struct Cli {
  /// Engine executable, overriding `engine.program` from the config
  #[arg(long)]
  engine: Option<PathBuf>,

  /// Config file to read instead of the default location
  #[arg(long)]
  config: Option<PathBuf>,

  /// Number of lines to show
  #[arg(long, default_value_t = 24)]
  lines: usize,

  /// First line to show (0-based)
  #[arg(long, default_value_t = 0)]
  scroll: usize,

  /// Log level, overriding `log.level` from the config
  #[arg(long)]
  log_level: Option<LevelFilter>,

  /// File to open
  file: PathBuf,
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  let config = config::load(cli.config.as_deref())?;

  let level = match cli.log_level {
    Some(level) => level,
    None => {
      config
        .log
        .level
        .parse()
        .wrap_err_with(|| format!("invalid log level {:?}", config.log.level))?
    },
  };
  logging::init(level, config.log.file.as_deref())?;

  let program = cli
    .engine
    .or_else(|| config.engine.program.clone())
    .unwrap_or_else(|| PathBuf::from(DEFAULT_ENGINE));
  let command = config
    .engine
    .args
    .iter()
    .fold(EngineCommand::new(program), |command, arg| command.arg(arg));

  let path = std::path::absolute(&cli.file)
    .wrap_err_with(|| format!("invalid path {}", cli.file.display()))?;
  let path = path
    .to_str()
    .ok_or_else(|| eyre!("path is not valid UTF-8: {}", path.display()))?
    .to_string();

  let mut session = Session::<App>::start(&command).wrap_err("failed to start engine")?;
  let mut app = App::new(config.view);
  let height = cli.lines as f32 * app.viewport.config().line_height;
  let quiet = Duration::from_millis(config.engine.settle_ms);
  let timeout = Duration::from_millis(config.engine.timeout_ms);

  info!(path = path.as_str(), "opening");
  app::open(&mut session, path, height)?;
  app::settle(&mut session, &mut app, quiet, timeout)?;

  if cli.scroll > 0 {
    app
      .viewport
      .scroll_to_line(session.bridge(), cli.scroll)?;
    app::settle(&mut session, &mut app, quiet, timeout)?;
  }

  if let Some(reason) = app.lost() {
    return Err(eyre!("engine went away: {reason}"));
  }

  render::dump(&app.viewport, cli.lines, &mut io::stdout().lock())?;

  let code = session.shutdown(Duration::from_millis(config.engine.grace_ms))?;
  info!(?code, "engine exited");
  Ok(())
}
