//! Pose delivery and the render-cadence driver.
//!
//! `publisher` fans published poses out to sinks and subscriptions;
//! `session` runs a `TrackingLoop` on a fixed tick until told to stop.

pub mod publisher;
pub mod session;

pub use publisher::{PoseHandle, PosePublisher, PoseSink, PoseSubscription, TracingSink};
pub use session::TrackingSession;
