//! Tracking: the capture → detect → solve → publish loop and its state.
//!
//! - `state`: render geometry and the current pose
//! - `pose`: solver output assembled into the renderer's convention
//! - `tracker`: the `TrackingLoop` itself
//! - `result`: per-tick outcomes and session counters

pub mod pose;
pub mod result;
pub mod state;
pub mod tracker;

pub use pose::{EulerAngles, Pose};
pub use result::{ResultDisposition, TickOutcome, TrackingStats};
pub use state::{RenderSize, TrackingState};
pub use tracker::TrackingLoop;
