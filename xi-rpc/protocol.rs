//! Payload shapes carried inside engine messages: tabs, rendered lines with
//! their annotations, update pushes and the named editing commands.

use std::fmt;

use bitflags::bitflags;
use serde::{
  Deserialize,
  Deserializer,
  Serialize,
  de::Error as _,
};
use serde_json::Value;
use thiserror::Error;

/// Opaque handle for a document tab, as handed out by `new_tab`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(String);

impl TabId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for TabId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

bitflags! {
  #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
  pub struct FontStyle: u32 {
    const BOLD      = 1 << 0;
    const UNDERLINE = 1 << 1;
    const ITALIC    = 1 << 2;
  }
}

/// Packed `0xAARRGGBB` foreground color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Color(pub u32);

impl Color {
  pub fn alpha(self) -> u8 {
    (self.0 >> 24) as u8
  }

  pub fn rgb(self) -> (u8, u8, u8) {
    ((self.0 >> 16) as u8, (self.0 >> 8) as u8, self.0 as u8)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Annotation {
  Cursor {
    column: usize,
  },
  Foreground {
    start: usize,
    end:   usize,
    color: Color,
    style: FontStyle,
  },
  Selection {
    start: usize,
    end:   usize,
  },
  /// Annotation kinds this client does not render.
  Unknown {
    kind: String,
  },
}

impl Annotation {
  pub fn from_value(value: &Value) -> Result<Self, DecodeError> {
    let fields = value
      .as_array()
      .ok_or(DecodeError::Shape("annotation must be an array"))?;
    let kind = fields
      .first()
      .and_then(Value::as_str)
      .ok_or(DecodeError::Shape("annotation kind must be a string"))?;

    let annotation = match kind {
      "cursor" => {
        Self::Cursor {
          column: offset(fields, 1, kind)?,
        }
      },
      "fg" => {
        Self::Foreground {
          start: offset(fields, 1, kind)?,
          end:   offset(fields, 2, kind)?,
          color: Color(packed(fields, 3, kind)?),
          style: FontStyle::from_bits_retain(match fields.get(4) {
            Some(_) => packed(fields, 4, kind)?,
            None => 0,
          }),
        }
      },
      "sel" => {
        Self::Selection {
          start: offset(fields, 1, kind)?,
          end:   offset(fields, 2, kind)?,
        }
      },
      other => {
        Self::Unknown {
          kind: other.to_string(),
        }
      },
    };
    Ok(annotation)
  }
}

fn offset(fields: &[Value], index: usize, kind: &str) -> Result<usize, DecodeError> {
  fields
    .get(index)
    .and_then(Value::as_u64)
    .map(|value| value as usize)
    .ok_or_else(|| {
      DecodeError::Field {
        kind: kind.to_string(),
        index,
      }
    })
}

/// Colors arrive as signed 32-bit integers from some engine builds.
fn packed(fields: &[Value], index: usize, kind: &str) -> Result<u32, DecodeError> {
  let value = fields.get(index);
  value
    .and_then(Value::as_i64)
    .or_else(|| value.and_then(Value::as_u64).map(|value| value as i64))
    .map(|value| value as u32)
    .ok_or_else(|| {
      DecodeError::Field {
        kind: kind.to_string(),
        index,
      }
    })
}

/// One line as rendered by the engine, before reconstruction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawLine {
  pub text:        String,
  pub annotations: Vec<Annotation>,
}

impl RawLine {
  pub fn new(text: impl Into<String>, annotations: Vec<Annotation>) -> Self {
    Self {
      text: text.into(),
      annotations,
    }
  }

  /// Accepts `[text, [annotation...]]` as well as the flat
  /// `[text, annotation, annotation...]` form.
  pub fn from_value(value: &Value) -> Result<Self, DecodeError> {
    let fields = value
      .as_array()
      .ok_or(DecodeError::Shape("line must be an array"))?;
    let text = fields
      .first()
      .and_then(Value::as_str)
      .ok_or(DecodeError::Shape("line text must be a string"))?;

    let rest = &fields[1..];
    let nested = match rest {
      [Value::Array(inner)] => inner.first().is_none_or(|first| !first.is_string()),
      _ => false,
    };
    let annotations = if nested {
      rest[0].as_array().map(Vec::as_slice).unwrap_or_default()
    } else {
      rest
    };

    let annotations = annotations
      .iter()
      .map(Annotation::from_value)
      .collect::<Result<Vec<_>, _>>()?;

    Ok(Self {
      text: text.to_string(),
      annotations,
    })
  }
}

impl<'de> Deserialize<'de> for RawLine {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: Deserializer<'de>,
  {
    let value = Value::deserialize(deserializer)?;
    Self::from_value(&value).map_err(D::Error::custom)
  }
}

/// Body of an `update` push.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Update {
  pub first_line: usize,
  #[serde(default)]
  pub height:     Option<usize>,
  pub lines:      Vec<RawLine>,
  #[serde(default)]
  pub scrollto:   Option<Vec<usize>>,
}

impl Update {
  pub fn from_value(value: Value) -> Result<Self, DecodeError> {
    serde_json::from_value(value).map_err(DecodeError::Json)
  }

  /// Line the engine wants brought into view. A trailing column is ignored.
  pub fn scroll_target(&self) -> Option<usize> {
    self.scrollto.as_ref().and_then(|target| target.first().copied())
  }
}

/// Parameter-less editing commands, sent through the `edit` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditCommand {
  InsertNewline,
  InsertTab,
  DeleteBackward,
  DeleteForward,
  MoveUp,
  MoveDown,
  MoveLeft,
  MoveRight,
  PageUp,
  PageDown,
  MoveToBeginningOfLine,
  MoveToEndOfLine,
  Undo,
  Redo,
  Cut,
  Copy,
  Paste,
}

impl EditCommand {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::InsertNewline => "insert_newline",
      Self::InsertTab => "insert_tab",
      Self::DeleteBackward => "delete_backward",
      Self::DeleteForward => "delete_forward",
      Self::MoveUp => "move_up",
      Self::MoveDown => "move_down",
      Self::MoveLeft => "move_left",
      Self::MoveRight => "move_right",
      Self::PageUp => "page_up",
      Self::PageDown => "page_down",
      Self::MoveToBeginningOfLine => "move_to_beginning_of_line",
      Self::MoveToEndOfLine => "move_to_end_of_line",
      Self::Undo => "undo",
      Self::Redo => "redo",
      Self::Cut => "cut",
      Self::Copy => "copy",
      Self::Paste => "paste",
    }
  }

  /// Whether the command has an `_and_modify_selection` variant.
  pub fn extends_selection(self) -> bool {
    matches!(
      self,
      Self::MoveUp
        | Self::MoveDown
        | Self::MoveLeft
        | Self::MoveRight
        | Self::PageUp
        | Self::PageDown
        | Self::MoveToBeginningOfLine
        | Self::MoveToEndOfLine
    )
  }

  /// Wire method name, with the selection-extending suffix when asked for
  /// and supported.
  pub fn method(self, modify_selection: bool) -> String {
    if modify_selection && self.extends_selection() {
      format!("{}_and_modify_selection", self.as_str())
    } else {
      self.as_str().to_string()
    }
  }
}

impl fmt::Display for EditCommand {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Error)]
pub enum DecodeError {
  #[error("malformed payload: {0}")]
  Shape(&'static str),
  #[error("`{kind}` annotation has a missing or invalid field at index {index}")]
  Field { kind: String, index: usize },
  #[error("missing field `{0}`")]
  MissingField(&'static str),
  #[error("invalid payload: {0}")]
  Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn decodes_nested_annotations() {
    let line = RawLine::from_value(&json!([
      "let x = 1;",
      [["fg", 0, 3, -16776961, 5], ["cursor", 4], ["sel", 4, 5]]
    ]))
    .unwrap();
    assert_eq!(line.text, "let x = 1;");
    assert_eq!(line.annotations, vec![
      Annotation::Foreground {
        start: 0,
        end:   3,
        color: Color(0xff00_00ff),
        style: FontStyle::BOLD | FontStyle::ITALIC,
      },
      Annotation::Cursor { column: 4 },
      Annotation::Selection { start: 4, end: 5 },
    ]);
  }

  #[test]
  fn decodes_flat_annotations() {
    let line = RawLine::from_value(&json!(["abc", ["cursor", 1], ["sel", 0, 2]])).unwrap();
    assert_eq!(line.annotations, vec![
      Annotation::Cursor { column: 1 },
      Annotation::Selection { start: 0, end: 2 },
    ]);

    let single = RawLine::from_value(&json!(["abc", ["cursor", 2]])).unwrap();
    assert_eq!(single.annotations, vec![Annotation::Cursor { column: 2 }]);
  }

  #[test]
  fn empty_annotation_list_and_bare_text() {
    assert!(
      RawLine::from_value(&json!(["abc", []]))
        .unwrap()
        .annotations
        .is_empty()
    );
    assert!(
      RawLine::from_value(&json!(["abc"]))
        .unwrap()
        .annotations
        .is_empty()
    );
  }

  #[test]
  fn unknown_annotation_kinds_are_kept() {
    let line = RawLine::from_value(&json!(["x", [["squiggle", 0, 1]]])).unwrap();
    assert_eq!(line.annotations, vec![Annotation::Unknown {
      kind: "squiggle".into(),
    }]);
  }

  #[test]
  fn malformed_annotations_fail() {
    assert!(RawLine::from_value(&json!(["x", [["cursor"]]])).is_err());
    assert!(RawLine::from_value(&json!(["x", [["sel", 0, -1]]])).is_err());
    assert!(RawLine::from_value(&json!(["x", [["fg", 0, 1, 255, "bold"]]])).is_err());
    let plain = RawLine::from_value(&json!(["x", [["fg", 0, 1, 255]]])).unwrap();
    assert!(matches!(
      plain.annotations[0],
      Annotation::Foreground { style, .. } if style.is_empty()
    ));
    assert!(RawLine::from_value(&json!([1, []])).is_err());
    assert!(RawLine::from_value(&json!("x")).is_err());
  }

  #[test]
  fn update_decodes_optional_fields() {
    let update = Update::from_value(json!({
      "first_line": 5,
      "lines": [["a", []], ["b", []]],
    }))
    .unwrap();
    assert_eq!(update.first_line, 5);
    assert_eq!(update.height, None);
    assert_eq!(update.lines.len(), 2);
    assert_eq!(update.scroll_target(), None);

    let update = Update::from_value(json!({
      "first_line": 0,
      "height": 120,
      "lines": [],
      "scrollto": [42, 3],
    }))
    .unwrap();
    assert_eq!(update.height, Some(120));
    assert_eq!(update.scroll_target(), Some(42));
  }

  #[test]
  fn update_requires_first_line() {
    assert!(Update::from_value(json!({ "lines": [] })).is_err());
  }

  #[test]
  fn style_bits_are_independent() {
    let style = FontStyle::from_bits_retain(5);
    assert!(style.contains(FontStyle::BOLD));
    assert!(style.contains(FontStyle::ITALIC));
    assert!(!style.contains(FontStyle::UNDERLINE));
  }

  #[test]
  fn edit_command_method_names() {
    assert_eq!(EditCommand::MoveUp.method(true), "move_up_and_modify_selection");
    assert_eq!(EditCommand::PageDown.method(false), "page_down");
    assert_eq!(EditCommand::DeleteBackward.method(true), "delete_backward");
  }
}
