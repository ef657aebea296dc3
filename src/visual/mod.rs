//! Visualisation rows derived from the decoded stream.

pub mod cursor;
pub mod feeder;
pub mod tap;

pub use cursor::RowCursor;
pub use feeder::{RowMode, VisualizationFeeder};
pub use tap::{visual_tap, TapReader, TapWriter};

/// Source of texture rows, polled once per video frame.
pub trait RowFeed {
    /// The next row to upload, or `None` if nothing new is ready.
    fn next_row(&mut self) -> Option<&[f32]>;
}
