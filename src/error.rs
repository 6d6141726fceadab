//! Error taxonomy for the tracking pipeline.
//!
//! - `SetupError`: fatal to a session, returned synchronously from setup/resize.
//! - `ChannelError`: detector transport faults; recovered by recreating the channel.
//! - `TrackingError`: raised out of the tick cadence only when recovery gives up.
//! - `SolveError`: pose solver rejected the corners; the frame produces no pose.

use std::time::Duration;

use thiserror::Error;

/// Errors that abort session setup or a resize.
#[derive(Debug, Error)]
pub enum SetupError {
    /// The source reported a zero, negative or non-finite aspect ratio.
    #[error("source reported an invalid aspect ratio ({0})")]
    InvalidAspectRatio(f64),

    /// The render width must be at least one pixel.
    #[error("render width must be positive, got {0}")]
    InvalidRenderWidth(u32),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The video feed could not be acquired.
    #[error("feed acquisition failed: {0}")]
    FeedUnavailable(String),

    /// The pose solver rejected the session geometry.
    #[error("failed to build pose solver: {0}")]
    Solver(#[from] SolveError),

    /// The initial detector channel could not be started.
    #[error("failed to start detector channel: {0}")]
    Channel(#[from] ChannelError),
}

/// Detector transport failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChannelError {
    /// Constructing the detector or its worker thread failed.
    #[error("failed to spawn detector worker: {0}")]
    Spawn(String),

    /// The worker went away (crashed or exited) while the channel was in use.
    #[error("detector worker disconnected")]
    Disconnected,

    /// The outstanding request was abandoned after the timeout elapsed.
    #[error("detection request abandoned after {0:?}")]
    Timeout(Duration),

    /// A request is already outstanding.
    #[error("detector channel is busy")]
    Busy,

    /// No channel is currently open.
    #[error("detector channel is closed")]
    Closed,
}

/// Fatal tracking failures reported out of the tick cadence.
#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("tracking unavailable after {attempts} consecutive detector channel failures: {last}")]
    Unavailable { attempts: u32, last: ChannelError },
}

/// Pose solver failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolveError {
    /// The marker model cannot be built from the given parameters.
    #[error("invalid solver model: {0}")]
    InvalidModel(String),

    /// The corners do not produce a finite pose (coincident or collinear points).
    #[error("pose solution is degenerate")]
    Degenerate,
}
