//! Styled lines rebuilt from the engine's annotated line payloads.

use std::ops::Range;

use tracing::{
  debug,
  warn,
};
use xi_rpc::{
  Annotation,
  Color,
  FontStyle,
  RawLine,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleSpan {
  pub range: Range<usize>,
  pub color: Color,
  pub style: FontStyle,
}

impl StyleSpan {
  pub fn is_bold(&self) -> bool {
    self.style.contains(FontStyle::BOLD)
  }

  pub fn is_italic(&self) -> bool {
    self.style.contains(FontStyle::ITALIC)
  }

  pub fn is_underline(&self) -> bool {
    self.style.contains(FontStyle::UNDERLINE)
  }
}

/// An immutable rendered line. Offsets are byte offsets into `text`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Line {
  text:      String,
  spans:     Vec<StyleSpan>,
  cursor:    Option<usize>,
  selection: Option<Range<usize>>,
}

impl Line {
  pub fn plain(text: impl Into<String>) -> Self {
    Self {
      text: text.into(),
      ..Default::default()
    }
  }

  pub fn from_raw(raw: &RawLine) -> Self {
    let len = raw.text.len();
    let clamp = |offset: usize| offset.min(len);
    let range = |start: usize, end: usize| {
      let (start, end) = (clamp(start), clamp(end));
      start.min(end)..start.max(end)
    };

    let mut line = Self::plain(raw.text.clone());
    for annotation in &raw.annotations {
      match *annotation {
        Annotation::Cursor { column } => {
          if let Some(existing) = line.cursor {
            warn!(existing, column, "second cursor on one line ignored");
          } else {
            line.cursor = Some(clamp(column));
          }
        },
        Annotation::Foreground {
          start,
          end,
          color,
          style,
        } => {
          let range = range(start, end);
          if !range.is_empty() {
            line.spans.push(StyleSpan {
              range,
              color,
              style,
            });
          }
        },
        Annotation::Selection { start, end } => {
          if line.selection.is_none() {
            line.selection = Some(range(start, end));
          } else {
            debug!(start, end, "extra selection on one line ignored");
          }
        },
        Annotation::Unknown { ref kind } => {
          debug!(kind = kind.as_str(), "skipping unknown annotation");
        },
      }
    }
    line
  }

  pub fn text(&self) -> &str {
    &self.text
  }

  pub fn spans(&self) -> &[StyleSpan] {
    &self.spans
  }

  pub fn cursor(&self) -> Option<usize> {
    self.cursor
  }

  /// The explicit selection, or a zero-width one at the cursor.
  pub fn selection(&self) -> Option<Range<usize>> {
    self
      .selection
      .clone()
      .or_else(|| self.cursor.map(|cursor| cursor..cursor))
  }

  pub fn char_len(&self) -> usize {
    self.text.chars().count()
  }

  /// Byte offset of the `column`th char, clamped to the end of the line.
  pub fn byte_offset(&self, column: usize) -> usize {
    self
      .text
      .char_indices()
      .nth(column)
      .map_or(self.text.len(), |(offset, _)| offset)
  }

  fn without_cursor(mut self) -> Self {
    self.cursor = None;
    self
  }
}

/// Rebuilds a batch of lines. Only the first cursor of a batch is kept.
pub fn reconstruct(lines: &[RawLine]) -> Vec<Line> {
  reconstruct_within(lines, 0..lines.len())
}

/// Rebuilds `lines[range]`. The batch's first cursor is chosen among all of
/// `lines`, so a cursor outside `range` still hides later ones inside it.
pub fn reconstruct_within(lines: &[RawLine], range: Range<usize>) -> Vec<Line> {
  let first_cursor = lines.iter().position(|raw| {
    raw
      .annotations
      .iter()
      .any(|annotation| matches!(annotation, Annotation::Cursor { .. }))
  });
  let Some(batch) = lines.get(range.clone()) else {
    return Vec::new();
  };

  batch
    .iter()
    .zip(range)
    .map(|(raw, index)| {
      let line = Line::from_raw(raw);
      if line.cursor.is_none() || first_cursor == Some(index) {
        return line;
      }
      warn!(
        first = ?first_cursor,
        index,
        "multiple cursors in one batch, keeping the first"
      );
      line.without_cursor()
    })
    .collect()
}

/// Several lines joined into one rendering unit, separated by `\n`, with
/// every offset moved into the joined text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StyledText {
  pub text:       String,
  pub spans:      Vec<StyleSpan>,
  pub cursor:     Option<usize>,
  pub selections: Vec<Range<usize>>,
}

impl StyledText {
  pub fn concat<'a>(lines: impl IntoIterator<Item = &'a Line>) -> Self {
    let mut joined = Self::default();
    for (index, line) in lines.into_iter().enumerate() {
      if index > 0 {
        joined.text.push('\n');
      }
      let base = joined.text.len();
      let shift = |range: &Range<usize>| range.start + base..range.end + base;

      joined.text.push_str(&line.text);
      joined.spans.extend(line.spans.iter().map(|span| {
        StyleSpan {
          range: shift(&span.range),
          ..span.clone()
        }
      }));
      if joined.cursor.is_none() {
        joined.cursor = line.cursor.map(|cursor| cursor + base);
      }
      if let Some(selection) = line.selection() {
        joined.selections.push(shift(&selection));
      }
    }
    joined
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn fg(start: usize, end: usize, style: u32) -> Annotation {
    Annotation::Foreground {
      start,
      end,
      color: Color(0xff33_6699),
      style: FontStyle::from_bits_retain(style),
    }
  }

  #[test]
  fn style_bits_combine() {
    let line = Line::from_raw(&RawLine::new("bold italic", vec![fg(0, 4, 5)]));
    let span = &line.spans()[0];
    assert!(span.is_bold());
    assert!(span.is_italic());
    assert!(!span.is_underline());
    assert_eq!(span.range, 0..4);
    assert_eq!(span.color.rgb(), (0x33, 0x66, 0x99));
  }

  #[test]
  fn cursor_without_selection_is_a_caret() {
    let line = Line::from_raw(&RawLine::new("abc", vec![Annotation::Cursor { column: 2 }]));
    assert_eq!(line.cursor(), Some(2));
    assert_eq!(line.selection(), Some(2..2));
  }

  #[test]
  fn explicit_selection_wins_over_caret() {
    let line = Line::from_raw(&RawLine::new("abcdef", vec![
      Annotation::Selection { start: 1, end: 4 },
      Annotation::Cursor { column: 4 },
    ]));
    assert_eq!(line.selection(), Some(1..4));
    assert_eq!(line.cursor(), Some(4));

    let no_cursor = Line::from_raw(&RawLine::new("abcdef", vec![Annotation::Selection {
      start: 5,
      end:   2,
    }]));
    assert_eq!(no_cursor.selection(), Some(2..5));
    assert_eq!(no_cursor.cursor(), None);
  }

  #[test]
  fn offsets_are_clamped_to_the_text() {
    let line = Line::from_raw(&RawLine::new("ab", vec![
      fg(1, 40, 0),
      fg(9, 12, 2),
      Annotation::Cursor { column: 8 },
    ]));
    assert_eq!(line.spans().len(), 1);
    assert_eq!(line.spans()[0].range, 1..2);
    assert_eq!(line.cursor(), Some(2));
  }

  #[test]
  fn first_cursor_in_a_line_wins() {
    let line = Line::from_raw(&RawLine::new("abc", vec![
      Annotation::Cursor { column: 1 },
      Annotation::Cursor { column: 3 },
    ]));
    assert_eq!(line.cursor(), Some(1));
  }

  #[test]
  fn batch_keeps_only_the_first_cursor() {
    let lines = reconstruct(&[
      RawLine::new("a", vec![]),
      RawLine::new("b", vec![Annotation::Cursor { column: 0 }]),
      RawLine::new("c", vec![Annotation::Cursor { column: 1 }]),
    ]);
    assert_eq!(lines[1].cursor(), Some(0));
    assert_eq!(lines[2].cursor(), None);
    assert_eq!(lines[2].selection(), None);
  }

  #[test]
  fn cursor_outside_the_rebuilt_range_still_counts_first() {
    let raw = [
      RawLine::new("a", vec![Annotation::Cursor { column: 0 }]),
      RawLine::new("b", vec![]),
      RawLine::new("c", vec![Annotation::Cursor { column: 1 }]),
    ];
    let lines = reconstruct_within(&raw, 1..3);
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[1].text(), "c");
    assert_eq!(lines[1].cursor(), None);
    assert!(reconstruct_within(&raw, 2..9).is_empty());
  }

  #[test]
  fn reconstruction_is_idempotent() {
    let raw = vec![RawLine::new("x = 1", vec![fg(0, 1, 1), fg(4, 5, 2)])];
    assert_eq!(reconstruct(&raw), reconstruct(&raw));
    assert_eq!(reconstruct(&raw)[0].spans().len(), 2);
  }

  #[test]
  fn concat_translates_offsets() {
    let lines = reconstruct(&[
      RawLine::new("let", vec![fg(0, 3, 1)]),
      RawLine::new("x = 10", vec![fg(4, 6, 0), Annotation::Cursor { column: 6 }]),
    ]);
    let text = StyledText::concat(&lines);
    assert_eq!(text.text, "let\nx = 10");
    assert_eq!(text.spans[0].range, 0..3);
    assert_eq!(text.spans[1].range, 8..10);
    assert_eq!(&text.text[text.spans[1].range.clone()], "10");
    assert_eq!(text.cursor, Some(10));
    assert_eq!(text.selections, vec![10..10]);
  }

  #[test]
  fn byte_offset_of_column() {
    let line = Line::plain("héllo");
    assert_eq!(line.char_len(), 5);
    assert_eq!(line.byte_offset(2), 3);
    assert_eq!(line.byte_offset(99), line.text().len());
  }
}
