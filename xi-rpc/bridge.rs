//! Request/response correlation and notification routing.
//!
//! A `Bridge` lives on the consumer thread next to the state it feeds. Lines
//! read by the transport are handed to [`Bridge::handle_line`] one at a time,
//! in arrival order, so no two handlers ever run concurrently.

use std::{
  collections::HashMap,
  fmt,
  sync::Arc,
};

use serde_json::{
  Value,
  json,
};
use thiserror::Error;
use tracing::{
  debug,
  warn,
};

use crate::{
  jsonrpc::{
    FrameError,
    Message,
    Response,
  },
  protocol::{
    DecodeError,
    EditCommand,
    RawLine,
    TabId,
    Update,
  },
  transport::{
    MessageSink,
    TransportError,
  },
};

/// Completion callback for one request. It is removed from the pending table
/// before it runs, so it may issue further requests through the bridge.
pub type ResponseHandler<C> = Box<dyn FnOnce(&mut C, &mut Bridge<C>, Value)>;

/// Receiver of engine pushes, implemented by the consumer context.
pub trait UpdateListener: Sized {
  /// The tab whose updates should be delivered, if any.
  fn tracked_tab(&self) -> Option<&TabId>;

  fn on_update(&mut self, bridge: &mut Bridge<Self>, tab: &TabId, update: Update);

  /// Called once when the engine stream ends unexpectedly.
  fn on_transport_lost(&mut self, _reason: &str) {}
}

/// What a successfully handled line turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
  Resolved { id: u64 },
  Update { tab: TabId },
  Ignored { method: String },
}

pub struct Bridge<C> {
  sink:    Arc<dyn MessageSink>,
  pending: HashMap<u64, ResponseHandler<C>>,
  next_id: u64,
}

impl<C> fmt::Debug for Bridge<C> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut pending: Vec<_> = self.pending.keys().copied().collect();
    pending.sort_unstable();
    f.debug_struct("Bridge")
      .field("pending", &pending)
      .field("next_id", &self.next_id)
      .finish()
  }
}

impl<C: 'static> Bridge<C> {
  pub fn new(sink: Arc<dyn MessageSink>) -> Self {
    Self {
      sink,
      pending: HashMap::new(),
      next_id: 0,
    }
  }

  pub fn pending_len(&self) -> usize {
    self.pending.len()
  }

  pub fn is_pending(&self, id: u64) -> bool {
    self.pending.contains_key(&id)
  }

  /// Id the next request will carry.
  pub fn next_id(&self) -> u64 {
    self.next_id
  }

  /// Drops every unresolved handler without invoking it.
  pub fn abandon_pending(&mut self) -> usize {
    let abandoned = self.pending.len();
    self.pending.clear();
    abandoned
  }

  // Receive

  /// Decode one line and route it. Errors describe a line that was dropped;
  /// none of them affect later lines.
  pub fn handle_line(&mut self, ctx: &mut C, line: &str) -> Result<Dispatched, DispatchError>
  where
    C: UpdateListener,
  {
    match Message::from_line(line)? {
      Message::Response(response) => self.resolve(ctx, response),
      Message::Notification(notification) => {
        self.route_notification(ctx, &notification.method, notification.params)
      },
      Message::Request(request) => {
        Err(DispatchError::UnsupportedRequest {
          id:     request.id,
          method: request.method,
        })
      },
    }
  }

  /// [`Self::handle_line`], logging whatever gets dropped.
  pub fn dispatch_line(&mut self, ctx: &mut C, line: &str) -> Option<Dispatched>
  where
    C: UpdateListener,
  {
    match self.handle_line(ctx, line) {
      Ok(dispatched) => Some(dispatched),
      Err(err) => {
        warn!(error = %err, "dropped engine message");
        None
      },
    }
  }

  fn resolve(&mut self, ctx: &mut C, response: Response) -> Result<Dispatched, DispatchError> {
    let id = response.id;
    let Some(handler) = self.pending.remove(&id) else {
      return Err(DispatchError::UnmatchedResponse(id));
    };

    if let Some(error) = response.error {
      return Err(DispatchError::Engine {
        id,
        code: error.code,
        message: error.message,
      });
    }
    let Some(result) = response.result else {
      return Err(DispatchError::Decode(DecodeError::MissingField("result")));
    };

    debug!(id, "resolving request");
    handler(ctx, self, result);
    Ok(Dispatched::Resolved { id })
  }

  fn route_notification(
    &mut self,
    ctx: &mut C,
    method: &str,
    params: Value,
  ) -> Result<Dispatched, DispatchError>
  where
    C: UpdateListener,
  {
    match method {
      "update" => {
        let Value::Object(mut params) = params else {
          return Err(DecodeError::Shape("update params must be an object").into());
        };
        let tab = params
          .remove("tab")
          .ok_or(DecodeError::MissingField("tab"))
          .and_then(|tab| serde_json::from_value::<TabId>(tab).map_err(DecodeError::Json))?;
        let update = params
          .remove("update")
          .ok_or(DecodeError::MissingField("update"))
          .and_then(Update::from_value)?;

        if ctx.tracked_tab() != Some(&tab) {
          return Err(DispatchError::TabMismatch {
            expected: ctx.tracked_tab().cloned(),
            received: tab,
          });
        }

        ctx.on_update(self, &tab, update);
        Ok(Dispatched::Update { tab })
      },
      other => {
        debug!(method = other, "ignoring engine notification");
        Ok(Dispatched::Ignored {
          method: other.to_string(),
        })
      },
    }
  }

  // Send

  pub fn notify(&mut self, method: &str, params: Value) -> Result<(), TransportError> {
    self
      .sink
      .send_message(&Message::notification(method, params))
  }

  /// Sends a request with the next id and parks `handler` until the matching
  /// response arrives. Ids are consumed even when the write fails.
  pub fn request(
    &mut self,
    method: &str,
    params: Value,
    handler: ResponseHandler<C>,
  ) -> Result<u64, TransportError> {
    let id = self.next_id;
    self.next_id += 1;
    self.pending.insert(id, handler);

    let message = Message::request(id, method, params);
    if let Err(err) = self.sink.send_message(&message) {
      self.pending.remove(&id);
      return Err(err);
    }
    debug!(id, method, "request sent");
    Ok(id)
  }

  /// Per-document command, wrapped in the `edit` envelope.
  pub fn edit(&mut self, tab: &TabId, method: &str, params: Value) -> Result<(), TransportError> {
    self.notify("edit", edit_envelope(tab, method, params))
  }

  pub fn edit_request(
    &mut self,
    tab: &TabId,
    method: &str,
    params: Value,
    handler: ResponseHandler<C>,
  ) -> Result<u64, TransportError> {
    self.request("edit", edit_envelope(tab, method, params), handler)
  }

  pub fn edit_command(
    &mut self,
    tab: &TabId,
    command: EditCommand,
    modify_selection: bool,
  ) -> Result<(), TransportError> {
    self.edit(tab, &command.method(modify_selection), json!({}))
  }

  pub fn new_tab<F>(&mut self, on_tab: F) -> Result<u64, TransportError>
  where
    F: FnOnce(&mut C, &mut Bridge<C>, TabId) + 'static,
  {
    self.request(
      "new_tab",
      json!({}),
      Box::new(move |ctx: &mut C, bridge: &mut Bridge<C>, result: Value| {
        match serde_json::from_value::<TabId>(result) {
          Ok(tab) => on_tab(ctx, bridge, tab),
          Err(err) => warn!(error = %err, "new_tab returned an invalid tab id"),
        }
      }),
    )
  }

  pub fn delete_tab(&mut self, tab: &TabId) -> Result<(), TransportError> {
    self.notify("delete_tab", json!({ "tab": tab }))
  }

  pub fn insert(&mut self, tab: &TabId, chars: &str) -> Result<(), TransportError> {
    self.edit(tab, "insert", json!({ "chars": chars }))
  }

  pub fn open(&mut self, tab: &TabId, filename: &str) -> Result<(), TransportError> {
    self.edit(tab, "open", json!({ "filename": filename }))
  }

  pub fn save(&mut self, tab: &TabId, filename: &str) -> Result<(), TransportError> {
    self.edit(tab, "save", json!({ "filename": filename }))
  }

  pub fn scroll(
    &mut self,
    tab: &TabId,
    first_line: usize,
    last_line: usize,
  ) -> Result<(), TransportError> {
    self.edit(tab, "scroll", json!([first_line, last_line]))
  }

  pub fn click(
    &mut self,
    tab: &TabId,
    line: usize,
    column: usize,
    modifiers: u32,
    click_count: u32,
  ) -> Result<(), TransportError> {
    self.edit(tab, "click", json!([line, column, modifiers, click_count]))
  }

  pub fn drag(
    &mut self,
    tab: &TabId,
    line: usize,
    column: usize,
    modifiers: u32,
  ) -> Result<(), TransportError> {
    self.edit(tab, "drag", json!([line, column, modifiers]))
  }

  /// Asks for lines `[first_line, last_line)`. The reply carries no offset of
  /// its own; `on_lines` must remember `first_line`.
  pub fn render_lines<F>(
    &mut self,
    tab: &TabId,
    first_line: usize,
    last_line: usize,
    on_lines: F,
  ) -> Result<u64, TransportError>
  where
    F: FnOnce(&mut C, &mut Bridge<C>, Vec<RawLine>) + 'static,
  {
    self.edit_request(
      tab,
      "render_lines",
      json!({ "first_line": first_line, "last_line": last_line }),
      Box::new(move |ctx: &mut C, bridge: &mut Bridge<C>, result: Value| {
        match serde_json::from_value::<Vec<RawLine>>(result) {
          Ok(lines) => on_lines(ctx, bridge, lines),
          Err(err) => warn!(error = %err, first_line, "invalid render_lines reply"),
        }
      }),
    )
  }
}

fn edit_envelope(tab: &TabId, method: &str, params: Value) -> Value {
  json!({
    "method": method,
    "tab": tab,
    "params": params,
  })
}

#[derive(Debug, Error)]
pub enum DispatchError {
  #[error(transparent)]
  Frame(#[from] FrameError),
  #[error(transparent)]
  Decode(#[from] DecodeError),
  #[error("response for unknown request id {0}")]
  UnmatchedResponse(u64),
  #[error("engine failed request {id} ({code}): {message}")]
  Engine {
    id:      u64,
    code:    i64,
    message: String,
  },
  #[error("update for tab {received} while tracking {expected:?}")]
  TabMismatch {
    expected: Option<TabId>,
    received: TabId,
  },
  #[error("engine sent unsupported request {method} (id {id})")]
  UnsupportedRequest { id: u64, method: String },
}
