//! Consumer-side state driven by the engine session.

use std::time::{
  Duration,
  Instant,
};

use tracing::{
  debug,
  warn,
};
use xi_rpc::{
  Bridge,
  Session,
  SessionError,
  TabId,
  Update,
  UpdateListener,
};
use xi_view::{
  ViewConfig,
  Viewport,
};

pub struct App {
  pub viewport: Viewport,
  lost:         Option<String>,
}

impl App {
  pub fn new(config: ViewConfig) -> Self {
    Self {
      viewport: Viewport::new(config),
      lost:     None,
    }
  }

  pub fn lost(&self) -> Option<&str> {
    self.lost.as_deref()
  }
}

impl AsMut<Viewport> for App {
  fn as_mut(&mut self) -> &mut Viewport {
    &mut self.viewport
  }
}

impl UpdateListener for App {
  fn tracked_tab(&self) -> Option<&TabId> {
    self.viewport.tab()
  }

  fn on_update(&mut self, bridge: &mut Bridge<Self>, _tab: &TabId, update: Update) {
    if let Err(err) = self.viewport.handle_update(bridge, update) {
      warn!(error = %err, "failed to apply update");
    }
  }

  fn on_transport_lost(&mut self, reason: &str) {
    self.lost = Some(reason.to_string());
  }
}

/// Creates a tab, opens `path` in it and binds the viewport to it.
pub fn open(session: &mut Session<App>, path: String, height: f32) -> Result<(), SessionError> {
  session
    .bridge()
    .new_tab(move |app: &mut App, bridge: &mut Bridge<App>, tab: TabId| {
      debug!(%tab, path = path.as_str(), "tab created");
      let opened = bridge
        .open(&tab, &path)
        .and_then(|()| app.viewport.activate(bridge, tab, height));
      if let Err(err) = opened {
        warn!(error = %err, "failed to open file in engine");
      }
    })?;
  Ok(())
}

/// Pumps the session until the viewport is bound, no request is outstanding
/// and the engine has been quiet for `quiet`, or until `timeout` passes.
/// Returns whether the view settled.
pub fn settle(
  session: &mut Session<App>,
  app: &mut App,
  quiet: Duration,
  timeout: Duration,
) -> Result<bool, SessionError> {
  let deadline = Instant::now() + timeout;
  while Instant::now() < deadline {
    let handled = session.pump_timeout(app, quiet)?;
    if handled == 0 && app.viewport.tab().is_some() && session.bridge().pending_len() == 0 {
      return Ok(true);
    }
  }
  warn!(
    pending = session.bridge().pending_len(),
    "engine did not settle in time"
  );
  Ok(false)
}
