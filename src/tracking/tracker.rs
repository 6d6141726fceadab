//! Tracking loop: orchestrates capture, detection, pose solving and publication.
//!
//! This implementation follows a single-owner design:
//! - Runs on the thread that drives the render cadence; `tick()` never blocks
//! - Owns the capture buffer and moves its pixels into each detection request
//! - Keeps at most one request outstanding on the detector channel
//! - Recreates the detector channel after crashes and timeouts
//! - Publishes immutable poses through a `PosePublisher`

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::capture::{CaptureBuffer, FrameSource};
use crate::config::TrackerConfig;
use crate::detection::{
    ChannelEvent, DetectionRequest, DetectionResponse, DetectionResult, DetectorChannel,
    DetectorFactory,
};
use crate::error::{ChannelError, SetupError, TrackingError};
use crate::geometry::{PoseSolver, SolverFactory, marker_to_render};
use crate::system::publisher::{PoseHandle, PosePublisher, PoseSink, PoseSubscription};
use crate::tracking::pose::Pose;
use crate::tracking::result::{ResultDisposition, TickOutcome, TrackingStats};
use crate::tracking::state::{RenderSize, TrackingState};

pub struct TrackingLoop {
    state: TrackingState,
    source: Box<dyn FrameSource>,
    buffer: CaptureBuffer,

    detector_factory: DetectorFactory,
    solver_factory: SolverFactory,
    solver: Box<dyn PoseSolver>,

    /// `None` between a channel failure and the next successful restart.
    channel: Option<DetectorChannel>,
    /// Generation of the most recently spawned channel.
    generation: u64,
    next_seq: u64,

    /// Channel failures since the last response; reset by any response.
    consecutive_failures: u32,
    max_channel_restarts: u32,
    request_timeout: Duration,

    publisher: PosePublisher,
    stats: TrackingStats,
    debug: bool,
    stopped: bool,
}

impl TrackingLoop {
    /// Derive the session geometry from `source`, build the solver and open the
    /// first detector channel.
    pub fn setup(
        config: &TrackerConfig,
        source: Box<dyn FrameSource>,
        detector_factory: DetectorFactory,
        solver_factory: SolverFactory,
    ) -> Result<Self, SetupError> {
        config.validate()?;

        let geometry = source.geometry();
        let state = TrackingState::new(geometry, config.render_width, config.marker_size)?;
        let size = state.size();
        let solver = solver_factory(state.solver_params())?;
        let channel = DetectorChannel::spawn(&detector_factory, 0)?;
        let buffer = CaptureBuffer::new(size.pixel_width(), size.pixel_height());

        info!(
            native_width = geometry.native_width,
            native_height = geometry.native_height,
            aspect_ratio = state.aspect_ratio(),
            width = size.width,
            height = size.height,
            marker_size = config.marker_size,
            "Tracking loop set up"
        );

        Ok(Self {
            state,
            source,
            buffer,
            detector_factory,
            solver_factory,
            solver,
            channel: Some(channel),
            generation: 0,
            next_seq: 0,
            consecutive_failures: 0,
            max_channel_restarts: config.max_channel_restarts,
            request_timeout: config.request_timeout(),
            publisher: PosePublisher::new(),
            stats: TrackingStats::default(),
            debug: config.debug,
            stopped: false,
        })
    }

    /// One render-cadence step. Advances the source, applies any finished
    /// detection, then captures the current frame and sends it unless a request
    /// is still outstanding.
    ///
    /// Per-frame problems are absorbed and counted in `stats()`; the only error
    /// is `TrackingError::Unavailable` once channel recovery gives up.
    pub fn tick(&mut self) -> Result<TickOutcome, TrackingError> {
        if self.stopped {
            return Ok(TickOutcome::Stopped);
        }
        self.stats.ticks += 1;
        // Playback follows the tick cadence, not detector latency.
        self.source.advance();

        self.pump()?;
        self.check_timeout()?;

        if self.channel.is_none() && !self.restart_channel()? {
            return Ok(TickOutcome::ChannelDown);
        }
        let Some(channel) = self.channel.as_mut() else {
            return Ok(TickOutcome::ChannelDown);
        };

        if channel.is_busy() {
            self.stats.skipped_busy += 1;
            debug!(seq = channel.in_flight_seq(), "Detector busy, skipping frame");
            return Ok(TickOutcome::SkippedBusy);
        }

        let Some(frame) = self.source.current_frame() else {
            self.stats.missing_frames += 1;
            debug!("No frame available");
            return Ok(TickOutcome::NoFrame);
        };
        self.buffer.draw(frame);

        let (width, height) = self.buffer.dimensions();
        let seq = self.next_seq;
        self.next_seq += 1;
        let request = DetectionRequest {
            seq,
            size: self.state.size(),
            width,
            height,
            pixels: self.buffer.take(),
        };

        match channel.send(request) {
            Ok(()) => {
                self.stats.frames_sent += 1;
                Ok(TickOutcome::Sent { seq })
            }
            Err(err) => {
                self.channel_failed(err)?;
                Ok(TickOutcome::ChannelDown)
            }
        }
    }

    /// Apply a finished detection, if any, without sending anything.
    pub fn pump(&mut self) -> Result<(), TrackingError> {
        if self.stopped {
            return Ok(());
        }
        while let Some(event) = self.channel.as_mut().and_then(DetectorChannel::poll) {
            match event {
                ChannelEvent::Response(response) => self.on_response(response),
                ChannelEvent::Failed(err) => {
                    self.channel_failed(err)?;
                    break;
                }
            }
        }
        Ok(())
    }

    fn on_response(&mut self, response: DetectionResponse) {
        self.consecutive_failures = 0;
        self.stats.results_received += 1;
        self.buffer.recycle(response.pixels);

        match response.outcome {
            Ok(markers) => {
                self.on_detection_result(DetectionResult {
                    seq: response.seq,
                    size: response.size,
                    markers,
                });
            }
            Err(message) => {
                self.stats.detector_errors += 1;
                warn!(seq = response.seq, "Detector failed: {}", message);
            }
        }
    }

    /// Turn a detection into a published pose.
    ///
    /// Empty results leave the current pose in place. Results captured with a
    /// different geometry are discarded. Only the first marker is used.
    pub fn on_detection_result(&mut self, result: DetectionResult) -> ResultDisposition {
        if self.stopped {
            return ResultDisposition::Stopped;
        }

        let size = self.state.size();
        if result.size != size {
            self.stats.stale_discards += 1;
            debug!(
                seq = result.seq,
                captured_width = result.size.width,
                width = size.width,
                "Discarding stale detection result"
            );
            return ResultDisposition::Stale;
        }

        let Some(marker) = result.markers.first() else {
            self.stats.empty_results += 1;
            debug!(seq = result.seq, "No marker detected");
            return ResultDisposition::Empty;
        };
        if result.markers.len() > 1 {
            debug!(
                seq = result.seq,
                ignored = result.markers.len() - 1,
                "Multiple markers detected, using the first"
            );
        }

        let outline = self.debug.then_some(marker.corners);
        if let Some(corners) = &outline {
            debug!(seq = result.seq, marker = marker.id, ?corners, "Marker outline");
        }

        let corners = marker_to_render(marker, &size);
        let estimate = match self.solver.pose(&corners) {
            Ok(estimate) => estimate,
            Err(err) => {
                self.stats.solver_failures += 1;
                warn!(seq = result.seq, marker = marker.id, "Pose solve failed: {}", err);
                return ResultDisposition::SolveFailed;
            }
        };

        let pose = Arc::new(Pose::assemble(&estimate.best, marker.id, result.seq, outline));
        self.state.set_current_pose(pose.clone());
        self.publisher.publish(pose.clone());
        self.stats.poses_published += 1;
        debug!(
            seq = result.seq,
            marker = marker.id,
            error = estimate.best.error,
            "Pose published"
        );

        ResultDisposition::Published(pose)
    }

    /// Change the render width. The height follows from the session aspect
    /// ratio; the solver is rebuilt for the new focal scale. A detection in
    /// flight is discarded when it returns.
    pub fn resize(&mut self, width: u32) -> Result<(), SetupError> {
        let size = self.state.size_for_width(width)?;
        let solver = (self.solver_factory)(self.state.solver_params_for(size))?;

        self.state.resize(width)?;
        self.solver = solver;
        self.buffer.resize(size.pixel_width(), size.pixel_height());

        info!(width = size.width, height = size.height, "Tracking loop resized");
        Ok(())
    }

    /// Stop publishing and release the detector channel. Idempotent.
    pub fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.publisher.close();
        if let Some(channel) = self.channel.take() {
            channel.shutdown();
        }
        info!(stats = ?self.stats, "Tracking loop shut down");
    }

    fn check_timeout(&mut self) -> Result<(), TrackingError> {
        let Some(waited) = self
            .channel
            .as_ref()
            .and_then(|c| c.overdue(self.request_timeout))
        else {
            return Ok(());
        };
        self.stats.timeouts += 1;
        // A late answer from the abandoned worker is never read.
        self.channel_failed(ChannelError::Timeout(waited))
    }

    /// Drop the current channel and count the failure; gives up after
    /// `max_channel_restarts` consecutive failures.
    fn channel_failed(&mut self, err: ChannelError) -> Result<(), TrackingError> {
        if let Some(channel) = self.channel.take() {
            channel.abandon();
        }
        self.consecutive_failures += 1;
        warn!(
            generation = self.generation,
            failures = self.consecutive_failures,
            "Detector channel failed: {}",
            err
        );

        if self.consecutive_failures > self.max_channel_restarts {
            warn!(
                failures = self.consecutive_failures,
                "Giving up on the detector channel"
            );
            let attempts = self.consecutive_failures;
            self.shutdown();
            return Err(TrackingError::Unavailable {
                attempts,
                last: err,
            });
        }
        Ok(())
    }

    /// Open a fresh channel. Returns false if the spawn failed.
    fn restart_channel(&mut self) -> Result<bool, TrackingError> {
        self.generation += 1;
        match DetectorChannel::spawn(&self.detector_factory, self.generation) {
            Ok(channel) => {
                self.stats.channel_restarts += 1;
                info!(generation = self.generation, "Detector channel recreated");
                self.channel = Some(channel);
                Ok(true)
            }
            Err(err) => {
                self.channel_failed(err)?;
                Ok(false)
            }
        }
    }

    pub fn current_pose(&self) -> Option<Arc<Pose>> {
        self.state.current_pose().cloned()
    }

    pub fn size(&self) -> RenderSize {
        self.state.size()
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.state.aspect_ratio()
    }

    pub fn stats(&self) -> &TrackingStats {
        &self.stats
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// True while a detection request is outstanding.
    pub fn is_busy(&self) -> bool {
        self.channel.as_ref().is_some_and(DetectorChannel::is_busy)
    }

    /// Generation of the open channel, if any.
    pub fn channel_generation(&self) -> Option<u64> {
        self.channel.as_ref().map(DetectorChannel::generation)
    }

    pub fn add_sink(&mut self, sink: Box<dyn PoseSink>) {
        self.publisher.add_sink(sink);
    }

    pub fn subscribe(&mut self) -> PoseSubscription {
        self.publisher.subscribe()
    }

    pub fn pose_handle(&self) -> PoseHandle {
        self.publisher.handle()
    }
}

impl Drop for TrackingLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}
