//! Marker detection collaborators and the detector channel.
//!
//! Detection runs on a dedicated worker thread owned by a `DetectorChannel`.
//! The tracking loop never calls a detector directly; it receives a
//! `DetectorFactory` and the channel builds a fresh detector for every worker
//! it spawns, so no detector state outlives a channel.

pub mod channel;
pub mod messages;
pub mod replay;

use std::sync::Arc;

use anyhow::Result;

pub use channel::{ChannelEvent, DetectorChannel};
pub use messages::{DetectionRequest, DetectionResponse, DetectionResult};
pub use replay::{DetectionLog, ReplayDetector, replay_factory};

/// A point in frame space (origin top-left, x right, y down) or, after
/// conversion, in render space (origin centre, y up).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Corner {
    pub x: f64,
    pub y: f64,
}

impl Corner {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A detected marker: identifier plus its four corners in detector winding order.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub id: i32,
    pub corners: [Corner; 4],
}

/// Borrowed RGBA image handed to a detector.
#[derive(Debug, Clone, Copy)]
pub struct ImageView<'a> {
    pub width: u32,
    pub height: u32,
    pub data: &'a [u8],
}

/// Detects markers in a single frame. Called on the worker thread only.
pub trait MarkerDetector: Send {
    fn detect(&mut self, image: &ImageView<'_>) -> Result<Vec<Marker>>;
}

/// Builds a detector for a new channel.
pub type DetectorFactory = Arc<dyn Fn() -> Result<Box<dyn MarkerDetector>> + Send + Sync>;

/// Wrap an infallible constructor as a `DetectorFactory`.
pub fn detector_factory<D, F>(make: F) -> DetectorFactory
where
    D: MarkerDetector + 'static,
    F: Fn() -> D + Send + Sync + 'static,
{
    Arc::new(move || -> Result<Box<dyn MarkerDetector>> { Ok(Box::new(make())) })
}
