//! Client side of the engine protocol: process transport, message framing,
//! request correlation and update routing.

pub mod bridge;
pub mod jsonrpc;
pub mod protocol;
pub mod session;
pub mod transport;

pub use bridge::{
  Bridge,
  DispatchError,
  Dispatched,
  ResponseHandler,
  UpdateListener,
};
pub use protocol::{
  Annotation,
  Color,
  DecodeError,
  EditCommand,
  FontStyle,
  RawLine,
  TabId,
  Update,
};
pub use session::{
  Session,
  SessionError,
};
pub use transport::{
  EngineCommand,
  LaunchError,
  MemorySink,
  MessageSink,
  Transport,
  TransportError,
  TransportEvent,
};
