//! Render-cadence driver for a `TrackingLoop`.
//!
//! The session subscribes to a fixed-rate tick signal and calls
//! `TrackingLoop::tick()` once per signal, on the calling thread. It ends when
//! the stop channel fires or disconnects, when the frame budget is spent, when
//! an exhausted source has no more frames, or when tracking becomes unavailable.
//! In every case the cadence subscription is dropped and the loop is shut down
//! before `run` returns.

use std::time::Duration;

use crossbeam_channel::{Receiver, select, tick};
use tracing::info;

use crate::error::TrackingError;
use crate::tracking::{TickOutcome, TrackingLoop, TrackingStats};

pub struct TrackingSession {
    tracker: TrackingLoop,
    interval: Duration,
    /// Stop after this many frames have been sent and answered.
    frame_budget: Option<u64>,
    stop_when_exhausted: bool,
}

impl TrackingSession {
    pub fn new(tracker: TrackingLoop, interval: Duration) -> Self {
        Self {
            tracker,
            interval,
            frame_budget: None,
            stop_when_exhausted: false,
        }
    }

    pub fn with_frame_budget(mut self, frames: u64) -> Self {
        self.frame_budget = Some(frames);
        self
    }

    /// End the session the first time the source has no frame to offer.
    pub fn stop_when_source_exhausted(mut self) -> Self {
        self.stop_when_exhausted = true;
        self
    }

    pub fn tracker(&self) -> &TrackingLoop {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut TrackingLoop {
        &mut self.tracker
    }

    fn budget_spent(&self) -> bool {
        self.frame_budget
            .is_some_and(|budget| self.tracker.stats().frames_sent >= budget)
    }

    /// Drive the loop until a stop condition. Returns the final statistics.
    pub fn run(&mut self, stop: &Receiver<()>) -> Result<TrackingStats, TrackingError> {
        let ticker = tick(self.interval);
        info!(interval = ?self.interval, budget = ?self.frame_budget, "Tracking session started");

        let outcome = loop {
            select! {
                recv(stop) -> _ => {
                    info!("Stop requested");
                    break Ok(());
                }
                recv(ticker) -> _ => {
                    if self.budget_spent() {
                        // Let the last request finish before stopping.
                        if let Err(err) = self.tracker.pump() {
                            break Err(err);
                        }
                        if !self.tracker.is_busy() {
                            info!("Frame budget spent");
                            break Ok(());
                        }
                        continue;
                    }

                    match self.tracker.tick() {
                        Ok(TickOutcome::NoFrame) if self.stop_when_exhausted => {
                            info!("Frame source exhausted");
                            break Ok(());
                        }
                        Ok(TickOutcome::Stopped) => break Ok(()),
                        Ok(_) => {}
                        Err(err) => break Err(err),
                    }
                }
            }
        };

        drop(ticker);
        self.tracker.shutdown();
        outcome.map(|()| self.tracker.stats().clone())
    }
}
