//! Detector channel message types.
//!
//! Exactly one request and one response per exchange. The request owns the
//! captured pixels; the response hands the storage back for reuse.

use crate::detection::Marker;
use crate::tracking::state::RenderSize;

/// Frame sent to the detector worker.
pub struct DetectionRequest {
    /// Monotonic request number, unique per tracking loop.
    pub seq: u64,

    /// Render geometry the frame was captured with.
    pub size: RenderSize,

    /// Pixel dimensions of `pixels`.
    pub width: u32,
    pub height: u32,

    /// RGBA samples, `width * height * 4` bytes.
    pub pixels: Vec<u8>,
}

/// Worker reply to a `DetectionRequest`.
pub struct DetectionResponse {
    pub seq: u64,
    pub size: RenderSize,

    /// Pixel storage of the request, returned for reuse.
    pub pixels: Vec<u8>,

    /// Detected markers, or the detector's error message.
    pub outcome: Result<Vec<Marker>, String>,
}

/// A successful detection, as consumed by the tracking loop.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    pub seq: u64,

    /// Geometry the frame was captured with; a mismatch with the current
    /// geometry marks the result as stale.
    pub size: RenderSize,

    /// Possibly empty.
    pub markers: Vec<Marker>,
}
