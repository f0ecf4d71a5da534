//! Frame sources.
//!
//! The pipeline receives ready-to-preprocess RGB8 frames; rotation and format
//! normalization are the source's job. Provided sources:
//! - `SyntheticSource`: patterned frames for demos and tests
//! - `ImageDirSource`: decoded still images from a local directory
//!   (feature: ingest-image)
//!
//! Sources never store or transmit frames.

use anyhow::Result;

use crate::frame::Frame;

#[cfg(feature = "ingest-image")]
pub mod image_dir;
pub mod synthetic;

#[cfg(feature = "ingest-image")]
pub use image_dir::ImageDirSource;
pub use synthetic::{SourceConfig, SyntheticSource};

/// Capture counters for a source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub origin: String,
}

pub trait FrameSource: Send {
    fn connect(&mut self) -> Result<()>;

    /// Next frame, or `None` once a finite source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}
