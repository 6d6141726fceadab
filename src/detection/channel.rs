//! Detector channel: a worker thread that owns one detector instance.
//!
//! The main context sends at most one `DetectionRequest` at a time and polls for
//! the matching `DetectionResponse` without blocking. A crashed worker shows up
//! as a disconnected response channel. Channels are cheap; the tracking loop
//! throws a faulty one away and spawns another rather than repairing it.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};
use tracing::{debug, info, warn};

use super::messages::{DetectionRequest, DetectionResponse};
use super::{DetectorFactory, ImageView, MarkerDetector};
use crate::error::ChannelError;

/// Requests are never queued behind one another.
const CHANNEL_CAPACITY: usize = 1;

/// Something the worker delivered, observed by `poll`.
pub enum ChannelEvent {
    /// Reply to the outstanding request.
    Response(DetectionResponse),
    /// The transport failed; the channel is unusable.
    Failed(ChannelError),
}

struct InFlight {
    seq: u64,
    sent_at: Instant,
}

pub struct DetectorChannel {
    /// Incremented by the owner on every recreation; used in logs and thread names.
    generation: u64,
    request_tx: Option<Sender<DetectionRequest>>,
    response_rx: Receiver<DetectionResponse>,
    worker: Option<JoinHandle<()>>,
    in_flight: Option<InFlight>,
}

impl DetectorChannel {
    /// Build a detector and start its worker thread.
    pub fn spawn(factory: &DetectorFactory, generation: u64) -> Result<Self, ChannelError> {
        let detector = factory().map_err(|e| ChannelError::Spawn(format!("{e:#}")))?;

        let (request_tx, request_rx) = bounded::<DetectionRequest>(CHANNEL_CAPACITY);
        let (response_tx, response_rx) = bounded::<DetectionResponse>(CHANNEL_CAPACITY);

        let worker = thread::Builder::new()
            .name(format!("marker-detector-{}", generation))
            .spawn(move || run_worker(detector, request_rx, response_tx, generation))
            .map_err(|e| ChannelError::Spawn(e.to_string()))?;

        info!(generation, "Detector channel opened");

        Ok(Self {
            generation,
            request_tx: Some(request_tx),
            response_rx,
            worker: Some(worker),
            in_flight: None,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True while a request is outstanding.
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn in_flight_seq(&self) -> Option<u64> {
        self.in_flight.as_ref().map(|f| f.seq)
    }

    /// Hand a request to the worker. Fails with `Busy` if one is outstanding.
    pub fn send(&mut self, request: DetectionRequest) -> Result<(), ChannelError> {
        if self.in_flight.is_some() {
            return Err(ChannelError::Busy);
        }
        let Some(tx) = self.request_tx.as_ref() else {
            return Err(ChannelError::Closed);
        };

        let seq = request.seq;
        match tx.try_send(request) {
            Ok(()) => {
                self.in_flight = Some(InFlight {
                    seq,
                    sent_at: Instant::now(),
                });
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(ChannelError::Busy),
            Err(TrySendError::Disconnected(_)) => Err(ChannelError::Disconnected),
        }
    }

    /// Non-blocking check for a response or a transport failure.
    pub fn poll(&mut self) -> Option<ChannelEvent> {
        match self.response_rx.try_recv() {
            Ok(response) => match &self.in_flight {
                Some(in_flight) if in_flight.seq == response.seq => {
                    self.in_flight = None;
                    Some(ChannelEvent::Response(response))
                }
                _ => {
                    debug!(
                        generation = self.generation,
                        seq = response.seq,
                        "Dropping unexpected detector response"
                    );
                    None
                }
            },
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.in_flight = None;
                self.request_tx = None;
                Some(ChannelEvent::Failed(ChannelError::Disconnected))
            }
        }
    }

    /// Time the outstanding request has been waiting, if it is at least `timeout`.
    pub fn overdue(&self, timeout: Duration) -> Option<Duration> {
        self.in_flight
            .as_ref()
            .map(|f| f.sent_at.elapsed())
            .filter(|elapsed| *elapsed >= timeout)
    }

    /// Tear down without waiting for the worker. Any outstanding response is lost.
    pub fn abandon(mut self) {
        self.close(false);
    }

    /// Tear down, joining the worker if it is idle. A worker still busy with a
    /// request is detached; it exits once the detector returns.
    pub fn shutdown(mut self) {
        let idle = self.in_flight.is_none();
        self.close(idle);
    }

    fn close(&mut self, join: bool) {
        // Dropping the sender ends the worker's receive loop.
        self.request_tx = None;
        self.in_flight = None;

        if let Some(handle) = self.worker.take() {
            if join {
                if handle.join().is_err() {
                    warn!(generation = self.generation, "Detector worker panicked");
                }
            } else {
                debug!(generation = self.generation, "Detaching detector worker");
            }
            info!(generation = self.generation, "Detector channel closed");
        }
    }
}

impl Drop for DetectorChannel {
    fn drop(&mut self) {
        self.close(false);
    }
}

/// Worker loop: detect each request and reply, until the request side hangs up.
fn run_worker(
    mut detector: Box<dyn MarkerDetector>,
    requests: Receiver<DetectionRequest>,
    responses: Sender<DetectionResponse>,
    generation: u64,
) {
    debug!(generation, "Detector worker started");

    for request in requests.iter() {
        let outcome = {
            let image = ImageView {
                width: request.width,
                height: request.height,
                data: &request.pixels,
            };
            detector.detect(&image).map_err(|e| format!("{e:#}"))
        };

        let response = DetectionResponse {
            seq: request.seq,
            size: request.size,
            pixels: request.pixels,
            outcome,
        };

        if responses.send(response).is_err() {
            // Owner abandoned the channel.
            break;
        }
    }

    debug!(generation, "Detector worker exiting");
}
