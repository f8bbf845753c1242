//! Line-oriented message shapes spoken with the engine.
//!
//! The engine protocol is JSON-RPC shaped but carries no `jsonrpc` version
//! field. Every message is a single JSON value on its own line.

use serde::{
  Deserialize,
  Deserializer,
  Serialize,
};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
  pub id:     u64,
  pub method: String,
  #[serde(default)]
  pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
  pub method: String,
  #[serde(default)]
  pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
  pub code:    i64,
  pub message: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub data:    Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
  pub id:     u64,
  /// `Some(Value::Null)` for an explicit `"result": null`, `None` when the
  /// field is absent.
  #[serde(
    default,
    deserialize_with = "present",
    skip_serializing_if = "Option::is_none"
  )]
  pub result: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error:  Option<ResponseError>,
}

impl Response {
  pub fn is_error(&self) -> bool {
    self.error.is_some()
  }
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
  D: Deserializer<'de>,
{
  Value::deserialize(deserializer).map(Some)
}

/// Variant order matters: a numeric `id` together with a `method` is a
/// request, an `id` alone is a response, anything else with a `method` is a
/// notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
  Request(Request),
  Response(Response),
  Notification(Notification),
}

impl Message {
  pub fn request(id: u64, method: impl Into<String>, params: Value) -> Self {
    Self::Request(Request {
      id,
      method: method.into(),
      params,
    })
  }

  pub fn notification(method: impl Into<String>, params: Value) -> Self {
    Self::Notification(Notification {
      method: method.into(),
      params,
    })
  }

  pub fn response_ok(id: u64, result: Value) -> Self {
    Self::Response(Response {
      id,
      result: Some(result),
      error: None,
    })
  }

  pub fn response_err(id: u64, code: i64, message: impl Into<String>) -> Self {
    Self::Response(Response {
      id,
      result: None,
      error: Some(ResponseError {
        code,
        message: message.into(),
        data: None,
      }),
    })
  }

  pub fn id(&self) -> Option<u64> {
    match self {
      Self::Request(request) => Some(request.id),
      Self::Response(response) => Some(response.id),
      Self::Notification(_) => None,
    }
  }

  pub fn method(&self) -> Option<&str> {
    match self {
      Self::Request(request) => Some(&request.method),
      Self::Notification(notification) => Some(&notification.method),
      Self::Response(_) => None,
    }
  }

  /// Encode as one protocol line, terminator included.
  pub fn to_line(&self) -> Result<String, FrameError> {
    let mut line = serde_json::to_string(self).map_err(FrameError::Serialize)?;
    line.push('\n');
    Ok(line)
  }

  /// Decode one protocol line. A trailing `\n` or `\r\n` is ignored.
  pub fn from_line(line: &str) -> Result<Self, FrameError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
      return Err(FrameError::Empty);
    }
    serde_json::from_str(line).map_err(FrameError::Parse)
  }
}

#[derive(Debug, Error)]
pub enum FrameError {
  #[error("empty protocol line")]
  Empty,
  #[error("failed to parse protocol line: {0}")]
  Parse(serde_json::Error),
  #[error("failed to serialize protocol message: {0}")]
  Serialize(serde_json::Error),
}
