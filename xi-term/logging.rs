use std::path::Path;

use eyre::{
  Result,
  WrapErr,
};
use log::LevelFilter;

/// Routes `log` records (and `tracing` events, through its `log` feature) to
/// `file`, or to stderr when no file is given.
pub fn init(level: LevelFilter, file: Option<&Path>) -> Result<()> {
  let dispatch = fern::Dispatch::new()
    .format(|out, message, record| {
      out.finish(format_args!(
        "[{} {}] {}",
        record.level(),
        record.target(),
        message
      ))
    })
    .level(level);

  let dispatch = match file {
    Some(path) => {
      let file = fern::log_file(path)
        .wrap_err_with(|| format!("failed to open log file {}", path.display()))?;
      dispatch.chain(file)
    },
    None => dispatch.chain(std::io::stderr()),
  };

  dispatch.apply().wrap_err("logger already initialized")
}
