use std::time::Duration;

use thiserror::Error;
use tracing::{
  debug,
  warn,
};

use crate::{
  bridge::{
    Bridge,
    UpdateListener,
  },
  transport::{
    EngineCommand,
    LaunchError,
    Transport,
    TransportError,
    TransportEvent,
  },
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionState {
  Running,
  Closed,
  Lost(String),
}

/// One engine process plus the bridge that talks to it.
///
/// The session is meant to be owned by the consumer thread: `pump` drains
/// whatever the reader thread has queued and runs every handler right there.
pub struct Session<C> {
  transport: Transport,
  bridge:    Bridge<C>,
  state:     SessionState,
}

impl<C: 'static> Session<C> {
  pub fn start(command: &EngineCommand) -> Result<Self, LaunchError> {
    let transport = Transport::spawn(command)?;
    let bridge = Bridge::new(transport.writer());
    Ok(Self {
      transport,
      bridge,
      state: SessionState::Running,
    })
  }

  pub fn bridge(&mut self) -> &mut Bridge<C> {
    &mut self.bridge
  }

  pub fn is_running(&self) -> bool {
    self.state == SessionState::Running
  }

  /// Why the engine stream ended, if it ended without `close`.
  pub fn lost_reason(&self) -> Option<&str> {
    match &self.state {
      SessionState::Lost(reason) => Some(reason),
      _ => None,
    }
  }

  /// Handles everything already queued without blocking. Returns the number
  /// of engine lines processed.
  pub fn pump(&mut self, ctx: &mut C) -> Result<usize, SessionError>
  where
    C: UpdateListener,
  {
    self.check_lost()?;
    let mut handled = 0;
    while let Some(event) = self.transport.try_recv_event() {
      handled += self.handle_event(ctx, event)?;
    }
    Ok(handled)
  }

  /// Waits up to `timeout` for the first event, then drains the rest.
  pub fn pump_timeout(&mut self, ctx: &mut C, timeout: Duration) -> Result<usize, SessionError>
  where
    C: UpdateListener,
  {
    self.check_lost()?;
    let Some(event) = self.transport.recv_event_timeout(timeout) else {
      return Ok(0);
    };
    let handled = self.handle_event(ctx, event)?;
    Ok(handled + self.pump(ctx)?)
  }

  fn check_lost(&self) -> Result<(), SessionError> {
    match &self.state {
      SessionState::Lost(reason) => Err(SessionError::TransportLost(reason.clone())),
      _ => Ok(()),
    }
  }

  fn handle_event(&mut self, ctx: &mut C, event: TransportEvent) -> Result<usize, SessionError>
  where
    C: UpdateListener,
  {
    match event {
      TransportEvent::Line(line) => {
        self.bridge.dispatch_line(ctx, &line);
        Ok(1)
      },
      TransportEvent::Stderr(line) => {
        debug!(target: "xi_rpc::engine", "{line}");
        Ok(0)
      },
      TransportEvent::Closed => self.end_of_stream(ctx, "engine closed its output".into()),
      TransportEvent::ReadError(err) => self.end_of_stream(ctx, err),
    }
  }

  fn end_of_stream(&mut self, ctx: &mut C, reason: String) -> Result<usize, SessionError>
  where
    C: UpdateListener,
  {
    let abandoned = self.bridge.abandon_pending();
    if self.transport.is_closed() {
      debug!(abandoned, "engine stream finished after close");
      self.state = SessionState::Closed;
      return Ok(0);
    }

    warn!(%reason, abandoned, "engine transport lost");
    self.state = SessionState::Lost(reason.clone());
    // Later sends through the bridge must fail too.
    self.transport.close();
    ctx.on_transport_lost(&reason);
    Err(SessionError::TransportLost(reason))
  }

  /// Closes the engine's input; the engine exits when it sees end of input.
  /// Responses still in flight are never delivered to their handlers.
  pub fn close(&mut self) {
    self.transport.close();
    let abandoned = self.bridge.abandon_pending();
    if abandoned > 0 {
      debug!(abandoned, "abandoning pending requests");
    }
    if self.state == SessionState::Running {
      self.state = SessionState::Closed;
    }
  }

  /// Closes, gives the engine `grace` to exit, kills it otherwise.
  pub fn shutdown(mut self, grace: Duration) -> Result<Option<i32>, SessionError> {
    self.close();
    Ok(self.transport.shutdown(grace)?)
  }

  pub fn kill(&mut self) -> Result<(), SessionError> {
    Ok(self.transport.kill()?)
  }
}

#[derive(Debug, Error)]
pub enum SessionError {
  #[error(transparent)]
  Launch(#[from] LaunchError),
  #[error(transparent)]
  Transport(#[from] TransportError),
  #[error("engine transport lost: {0}")]
  TransportLost(String),
}
