//! Prints the viewport as styled terminal text.

use std::{
  io::{
    self,
    Write,
  },
  ops::Range,
};

use crossterm::{
  queue,
  style::{
    Attribute,
    Color,
    ContentStyle,
    Print,
    PrintStyledContent,
    StyledContent,
    Stylize,
  },
};
use xi_view::{
  Line,
  Viewport,
};

/// Splits `line` into runs of uniform style. Later spans win where spans
/// overlap; the selection is drawn reversed, as is the caret cell.
pub fn segments(line: &Line) -> Vec<(Range<usize>, ContentStyle)> {
  let text = line.text();
  let caret = line
    .selection()
    .filter(Range::is_empty)
    .map(|caret| {
      let width = text
        .get(caret.start..)
        .and_then(|rest| rest.chars().next())
        .map_or(0, char::len_utf8);
      caret.start..caret.start + width
    });

  let mut cuts = vec![0, text.len()];
  for span in line.spans() {
    cuts.extend([span.range.start, span.range.end]);
  }
  if let Some(selection) = line.selection() {
    cuts.extend([selection.start, selection.end]);
  }
  if let Some(caret) = &caret {
    cuts.extend([caret.start, caret.end]);
  }
  cuts.retain(|&cut| text.is_char_boundary(cut));
  cuts.sort_unstable();
  cuts.dedup();

  cuts
    .windows(2)
    .map(|pair| {
      let range = pair[0]..pair[1];
      let mut style = ContentStyle::new();
      for span in line.spans() {
        if span.range.contains(&range.start) {
          let (r, g, b) = span.color.rgb();
          style.foreground_color = (span.color.alpha() != 0).then_some(Color::Rgb { r, g, b });
          style.attributes = Default::default();
          if span.is_bold() {
            style.attributes.set(Attribute::Bold);
          }
          if span.is_italic() {
            style.attributes.set(Attribute::Italic);
          }
          if span.is_underline() {
            style.attributes.set(Attribute::Underlined);
          }
        }
      }
      let selected = line
        .selection()
        .is_some_and(|selection| selection.contains(&range.start));
      let on_caret = caret
        .as_ref()
        .is_some_and(|caret| caret.contains(&range.start));
      if selected || on_caret {
        style.attributes.set(Attribute::Reverse);
      }
      (range, style)
    })
    .collect()
}

pub fn dump<W: Write>(viewport: &Viewport, rows: usize, out: &mut W) -> io::Result<()> {
  let width = viewport
    .window()
    .end
    .max(viewport.total_lines())
    .to_string()
    .len();

  for (index, line) in viewport.lines().take(rows) {
    if viewport.total_lines() > 0 && index >= viewport.total_lines() {
      break;
    }
    queue!(
      out,
      PrintStyledContent(format!("{:>width$} ", index + 1).dark_grey())
    )?;
    if let Some(line) = line {
      let text = line.text().trim_end_matches(['\r', '\n']);
      for (range, style) in segments(line) {
        if range.start >= text.len() {
          continue;
        }
        let range = range.start..range.end.min(text.len());
        queue!(
          out,
          PrintStyledContent(StyledContent::new(style, &text[range]))
        )?;
      }
      if line.cursor().is_some_and(|cursor| cursor >= text.len()) {
        queue!(out, PrintStyledContent(" ".reverse()))?;
      }
    }
    queue!(out, Print("\n"))?;
  }
  out.flush()
}
