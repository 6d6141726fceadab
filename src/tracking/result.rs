//! Per-tick outcomes and tracking diagnostics.
//!
//! Per-frame failures never leave the tick cadence as errors. They are
//! reported through these values instead:
//! - what a single `tick()` did
//! - what happened to a detection result
//! - running counters for the whole session

use std::sync::Arc;

use crate::tracking::pose::Pose;

/// What a single `tick()` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A frame was handed to the detector.
    Sent { seq: u64 },
    /// A request is still outstanding; this frame was dropped.
    SkippedBusy,
    /// The source had no frame to capture.
    NoFrame,
    /// No detector channel could be opened this tick.
    ChannelDown,
    /// The loop has been shut down.
    Stopped,
}

/// What `on_detection_result` did with a result.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultDisposition {
    Published(Arc<Pose>),
    /// No markers; the last pose stays current.
    Empty,
    /// Captured with a geometry that has since changed.
    Stale,
    SolveFailed,
    /// Arrived after shutdown began.
    Stopped,
}

/// Session counters, readable at any time.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TrackingStats {
    pub ticks: u64,
    pub frames_sent: u64,
    pub skipped_busy: u64,
    pub missing_frames: u64,
    pub results_received: u64,
    pub empty_results: u64,
    pub stale_discards: u64,
    pub poses_published: u64,
    pub detector_errors: u64,
    pub solver_failures: u64,
    pub timeouts: u64,
    pub channel_restarts: u64,
}
