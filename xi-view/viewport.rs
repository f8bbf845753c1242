//! Sliding window of rendered lines kept in sync with the engine.
//!
//! The window holds `visible + overscan` slots starting at `first_line`.
//! Scrolling shifts the retained slots and fetches only what became exposed;
//! replies that arrive after the window moved on are clipped to the current
//! window, so an out-of-date reply can never put a line in the wrong slot.

use std::ops::Range;

use serde::{
  Deserialize,
  Serialize,
};
use tracing::{
  debug,
  warn,
};
use xi_rpc::{
  Bridge,
  RawLine,
  TabId,
  TransportError,
  Update,
  UpdateListener,
};

use crate::line::{
  Line,
  reconstruct_within,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
  /// Height of one line, in pixels.
  pub line_height: f32,
  /// Advance of one column, in pixels. Used for hit testing only.
  pub char_width:  f32,
  /// Lines kept beyond what fits on screen.
  pub overscan:    usize,
}

impl Default for ViewConfig {
  fn default() -> Self {
    Self {
      line_height: 20.0,
      char_width:  10.0,
      overscan:    2,
    }
  }
}

#[derive(Debug, Clone)]
pub struct Viewport {
  config:        ViewConfig,
  tab:           Option<TabId>,
  slots:         Vec<Option<Line>>,
  first_line:    usize,
  total_lines:   usize,
  height:        f32,
  scroll_y:      f64,
  y_offset:      f32,
  needs_layout:  bool,
  needs_repaint: bool,
}

impl Default for Viewport {
  fn default() -> Self {
    Self::new(ViewConfig::default())
  }
}

impl AsMut<Viewport> for Viewport {
  fn as_mut(&mut self) -> &mut Viewport {
    self
  }
}

impl Viewport {
  pub fn new(mut config: ViewConfig) -> Self {
    config.line_height = config.line_height.max(1.0);
    config.char_width = config.char_width.max(1.0);
    Self {
      config,
      tab: None,
      slots: vec![None; config.overscan],
      first_line: 0,
      total_lines: 0,
      height: 0.0,
      scroll_y: 0.0,
      y_offset: 0.0,
      needs_layout: false,
      needs_repaint: false,
    }
  }

  pub fn config(&self) -> &ViewConfig {
    &self.config
  }

  pub fn tab(&self) -> Option<&TabId> {
    self.tab.as_ref()
  }

  pub fn first_line(&self) -> usize {
    self.first_line
  }

  pub fn total_lines(&self) -> usize {
    self.total_lines
  }

  pub fn slot_count(&self) -> usize {
    self.slots.len()
  }

  /// Absolute line range covered by the slots.
  pub fn window(&self) -> Range<usize> {
    self.first_line..self.first_line.saturating_add(self.slots.len())
  }

  pub fn height(&self) -> f32 {
    self.height
  }

  /// Pixel position of the top of the viewport. Approximate for very large
  /// documents; `first_line` and `y_offset` are the exact position.
  pub fn scroll_y(&self) -> f64 {
    self.scroll_y
  }

  /// Offset of slot 0 relative to the top of the viewport, `<= 0`.
  pub fn y_offset(&self) -> f32 {
    self.y_offset
  }

  /// Pixel height of the whole document, for scrollbars and layout.
  pub fn content_height(&self) -> f64 {
    self.total_lines as f64 * f64::from(self.config.line_height)
  }

  pub fn line(&self, index: usize) -> Option<&Line> {
    let slot = index.checked_sub(self.first_line)?;
    self.slots.get(slot)?.as_ref()
  }

  /// Every slot with its absolute line index.
  pub fn lines(&self) -> impl Iterator<Item = (usize, Option<&Line>)> {
    let first = self.first_line;
    self
      .slots
      .iter()
      .enumerate()
      .map(move |(slot, line)| (first + slot, line.as_ref()))
  }

  /// Absolute index of the line holding the caret, if it is in the window.
  pub fn cursor_line(&self) -> Option<usize> {
    self
      .lines()
      .find(|(_, line)| line.is_some_and(|line| line.cursor().is_some()))
      .map(|(index, _)| index)
  }

  pub fn take_repaint(&mut self) -> bool {
    std::mem::take(&mut self.needs_repaint)
  }

  pub fn take_layout(&mut self) -> bool {
    std::mem::take(&mut self.needs_layout)
  }

  fn slot_count_for(&self, height: f32) -> usize {
    let visible = (height.max(0.0) / self.config.line_height).floor() as usize;
    visible + self.config.overscan
  }

  /// Binds the window to `tab` and requests the first screenful.
  pub fn activate<C>(
    &mut self,
    bridge: &mut Bridge<C>,
    tab: TabId,
    height: f32,
  ) -> Result<(), TransportError>
  where
    C: AsMut<Viewport> + 'static,
  {
    debug!(%tab, height, "activating viewport");
    self.tab = Some(tab);
    self.height = height.max(0.0);
    self.slots = vec![None; self.slot_count_for(height)];
    self.first_line = 0;
    self.scroll_y = 0.0;
    self.y_offset = 0.0;
    self.needs_repaint = true;
    let len = self.slots.len();
    self.fetch(bridge, 0, len).map(|_| ())
  }

  /// Moves the top of the viewport to `scroll_y` pixels.
  pub fn scroll_to<C>(&mut self, bridge: &mut Bridge<C>, scroll_y: f64) -> Result<(), TransportError>
  where
    C: AsMut<Viewport> + 'static,
  {
    let scroll_y = if scroll_y.is_finite() { scroll_y.max(0.0) } else { 0.0 };
    let line_height = f64::from(self.config.line_height);
    let line = (scroll_y / line_height).floor() as usize;
    let within = (scroll_y - line as f64 * line_height) as f32;
    self.set_scroll(bridge, line, within)
  }

  pub fn scroll_to_line<C>(&mut self, bridge: &mut Bridge<C>, line: usize) -> Result<(), TransportError>
  where
    C: AsMut<Viewport> + 'static,
  {
    self.set_scroll(bridge, line, 0.0)
  }

  /// Puts `line` at the top of the viewport, scrolled `within` pixels into it.
  fn set_scroll<C>(&mut self, bridge: &mut Bridge<C>, line: usize, within: f32) -> Result<(), TransportError>
  where
    C: AsMut<Viewport> + 'static,
  {
    let first_line = line.min(self.last_first_line());
    let within = if first_line == line {
      within.clamp(0.0, self.config.line_height)
    } else {
      0.0
    };
    self.scroll_y = first_line as f64 * f64::from(self.config.line_height) + f64::from(within);
    self.y_offset = -within;
    self.needs_repaint = true;
    self.shift_window(bridge, first_line)
  }

  /// Highest `first_line` whose window still ends inside `usize`.
  fn last_first_line(&self) -> usize {
    usize::MAX - self.slots.len()
  }

  fn shift_window<C>(&mut self, bridge: &mut Bridge<C>, first_line: usize) -> Result<(), TransportError>
  where
    C: AsMut<Viewport> + 'static,
  {
    let prev = self.first_line;
    if first_line == prev {
      return Ok(());
    }
    let len = self.slots.len();
    self.first_line = first_line;

    if first_line > prev {
      let diff = first_line - prev;
      if diff >= len {
        self.slots.fill(None);
      } else {
        self.slots.rotate_left(diff);
        self.slots[len - diff..].fill(None);
      }
      self.fetch(
        bridge,
        prev.saturating_add(len),
        first_line.saturating_add(len),
      )?;
    } else {
      let diff = prev - first_line;
      if diff >= len {
        self.slots.fill(None);
      } else {
        self.slots.rotate_right(diff);
        self.slots[..diff].fill(None);
      }
      self.fetch(bridge, first_line, prev)?;
    }

    self.notify_scroll(bridge)
  }

  /// Adapts the slot count to a new pixel height. Growing fetches only the
  /// added tail.
  pub fn resize<C>(&mut self, bridge: &mut Bridge<C>, height: f32) -> Result<(), TransportError>
  where
    C: AsMut<Viewport> + 'static,
  {
    self.height = height.max(0.0);
    let len = self.slot_count_for(height);
    let prev_len = self.slots.len();
    if len == prev_len {
      return Ok(());
    }

    self.slots.resize(len, None);
    self.needs_repaint = true;
    self.notify_scroll(bridge)?;
    if len > prev_len {
      self.fetch(
        bridge,
        self.first_line.saturating_add(prev_len),
        self.first_line.saturating_add(len),
      )?;
    }
    Ok(())
  }

  fn notify_scroll<C: 'static>(&self, bridge: &mut Bridge<C>) -> Result<(), TransportError> {
    let Some(tab) = &self.tab else {
      return Ok(());
    };
    let window = self.window();
    bridge.scroll(tab, window.start, window.end)
  }

  /// Requests `[first_line, last_line)` clipped to the current window.
  /// Returns the request id, or `None` when nothing was left to ask for.
  pub fn fetch<C>(
    &self,
    bridge: &mut Bridge<C>,
    first_line: usize,
    last_line: usize,
  ) -> Result<Option<u64>, TransportError>
  where
    C: AsMut<Viewport> + 'static,
  {
    let Some(tab) = self.tab.clone() else {
      return Ok(None);
    };
    let window = self.window();
    let first_line = first_line.max(window.start);
    let last_line = last_line.min(window.end);
    if first_line >= last_line {
      return Ok(None);
    }

    let requested = tab.clone();
    bridge
      .render_lines(
        &tab,
        first_line,
        last_line,
        move |ctx: &mut C, _: &mut Bridge<C>, lines: Vec<RawLine>| {
          let viewport = ctx.as_mut();
          if viewport.tab.as_ref() != Some(&requested) {
            debug!(tab = %requested, "dropping lines for a tab no longer shown");
            return;
          }
          viewport.install(first_line, &lines);
        },
      )
      .map(Some)
  }

  /// Writes lines starting at absolute index `first_line` into whichever
  /// slots they overlap. Returns the number of slots replaced.
  pub fn install(&mut self, first_line: usize, lines: &[RawLine]) -> usize {
    let window = self.window();
    let start = window.start.max(first_line);
    let end = window.end.min(first_line.saturating_add(lines.len()));
    if start >= end {
      debug!(first_line, count = lines.len(), "lines outside the window dropped");
      return 0;
    }

    let rebuilt = reconstruct_within(lines, start - first_line..end - first_line);
    for (offset, line) in rebuilt.into_iter().enumerate() {
      self.slots[start - window.start + offset] = Some(line);
    }
    self.needs_repaint = true;
    end - start
  }

  /// Applies an `update` push: total height, line replacement, scroll hint.
  pub fn handle_update<C>(&mut self, bridge: &mut Bridge<C>, update: Update) -> Result<(), TransportError>
  where
    C: AsMut<Viewport> + 'static,
  {
    if let Some(height) = update.height
      && height != self.total_lines
    {
      self.total_lines = height;
      self.needs_layout = true;
    }

    self.install(update.first_line, &update.lines);

    match update.scroll_target() {
      Some(line) => self.scroll_into_view(bridge, line),
      None => Ok(()),
    }
  }

  /// Scrolls the least amount that makes `line` fully visible.
  pub fn scroll_into_view<C>(&mut self, bridge: &mut Bridge<C>, line: usize) -> Result<(), TransportError>
  where
    C: AsMut<Viewport> + 'static,
  {
    let line = line.min(self.last_first_line());
    let within = -self.y_offset;
    if line < self.first_line || (line == self.first_line && within > 0.0) {
      return self.scroll_to_line(bridge, line);
    }

    let line_height = self.config.line_height;
    let line_bottom = ((line - self.first_line) as f64 + 1.0) * f64::from(line_height);
    if line_bottom <= f64::from(within + self.height) {
      return Ok(());
    }

    // Bottom-align: the top lands `rows` lines above, `rem` pixels into it.
    let rows = ((self.height / line_height).ceil() as usize).max(1);
    let rem = (rows as f32 * line_height - self.height).max(0.0);
    match line.saturating_add(1).checked_sub(rows) {
      Some(top) => self.set_scroll(bridge, top, rem),
      None => self.scroll_to_line(bridge, 0),
    }
  }

  /// Absolute line under the pixel row `y`.
  pub fn line_at(&self, y: f32) -> usize {
    let row = ((y - self.y_offset) / self.config.line_height)
      .floor()
      .max(0.0) as usize;
    self.first_line.saturating_add(row)
  }

  /// Maps a point in viewport pixels to `(line, column)`. The column is a
  /// byte offset when the line is loaded, a cell count otherwise.
  pub fn position_at(&self, x: f32, y: f32) -> (usize, usize) {
    let line = self.line_at(y);
    let cell = (x.max(0.0) / self.config.char_width).round() as usize;
    let column = match self.line(line) {
      Some(text) => text.byte_offset(cell),
      None => cell,
    };
    (line, column)
  }

  pub fn click<C: 'static>(
    &self,
    bridge: &mut Bridge<C>,
    x: f32,
    y: f32,
    modifiers: u32,
    click_count: u32,
  ) -> Result<(), TransportError> {
    let Some(tab) = &self.tab else {
      return Ok(());
    };
    let (line, column) = self.position_at(x, y);
    bridge.click(tab, line, column, modifiers, click_count)
  }

  pub fn drag<C: 'static>(
    &self,
    bridge: &mut Bridge<C>,
    x: f32,
    y: f32,
    modifiers: u32,
  ) -> Result<(), TransportError> {
    let Some(tab) = &self.tab else {
      return Ok(());
    };
    let (line, column) = self.position_at(x, y);
    bridge.drag(tab, line, column, modifiers)
  }
}

impl UpdateListener for Viewport {
  fn tracked_tab(&self) -> Option<&TabId> {
    self.tab.as_ref()
  }

  fn on_update(&mut self, bridge: &mut Bridge<Self>, _tab: &TabId, update: Update) {
    if let Err(err) = self.handle_update(bridge, update) {
      warn!(error = %err, "failed to apply update");
    }
  }

  fn on_transport_lost(&mut self, reason: &str) {
    warn!(reason, "engine gone, viewport frozen");
  }
}
