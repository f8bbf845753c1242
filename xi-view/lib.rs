//! Client-side view of an engine document: styled line reconstruction and
//! the scrolling line cache.

pub mod line;
pub mod viewport;

pub use line::{
  Line,
  StyleSpan,
  StyledText,
  reconstruct,
  reconstruct_within,
};
pub use viewport::{
  ViewConfig,
  Viewport,
};
