//! Typed pose publication.
//!
//! The tracking loop publishes each new pose once. Consumers attach either a
//! `PoseSink` (called synchronously on the publishing thread) or a
//! `PoseSubscription` (bounded channel, read from any thread). `PoseHandle`
//! reads the current pose at any time; publication replaces it atomically and
//! never mutates a pose that was already handed out.

use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::tracking::pose::Pose;

/// Poses buffered per subscription; when full, the oldest is dropped.
const SUBSCRIPTION_CAPACITY: usize = 8;

/// Receives every published pose.
pub trait PoseSink: Send {
    fn on_pose(&mut self, pose: &Arc<Pose>);
}

/// Shared read access to the current pose.
#[derive(Clone, Default)]
pub struct PoseHandle {
    current: Arc<RwLock<Option<Arc<Pose>>>>,
}

impl PoseHandle {
    pub fn current(&self) -> Option<Arc<Pose>> {
        self.current.read().clone()
    }

    fn replace(&self, pose: Arc<Pose>) {
        *self.current.write() = Some(pose);
    }
}

/// Channel end of a subscription. Disconnects when the publisher closes.
///
/// A subscriber that falls behind loses its oldest poses, so the queue always
/// ends with the newest. Consumers that only redraw should read `latest()`.
pub struct PoseSubscription {
    rx: Receiver<Arc<Pose>>,
    /// Lets the publisher notice the subscription was dropped.
    _alive: Arc<()>,
}

impl PoseSubscription {
    pub fn try_recv(&self) -> Option<Arc<Pose>> {
        self.rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<Arc<Pose>> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Drain the queue and return the newest pose, if any.
    pub fn latest(&self) -> Option<Arc<Pose>> {
        self.rx.try_iter().last()
    }

    /// True once the publisher has closed and the queue is drained.
    pub fn is_disconnected(&self) -> bool {
        self.rx.is_empty() && matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }
}

/// Publisher side of a subscription. Holds a receiver too, to evict the
/// oldest pose from a full queue.
struct Subscriber {
    tx: Sender<Arc<Pose>>,
    rx: Receiver<Arc<Pose>>,
    alive: Weak<()>,
}

impl Subscriber {
    fn deliver(&self, pose: &Arc<Pose>) {
        if let Err(TrySendError::Full(pose)) = self.tx.try_send(pose.clone()) {
            if let Ok(dropped) = self.rx.try_recv() {
                debug!(seq = dropped.seq, "Subscriber queue full, oldest pose dropped");
            }
            if self.tx.try_send(pose).is_err() {
                debug!("Subscriber queue still full, pose dropped");
            }
        }
    }
}

#[derive(Default)]
pub struct PosePublisher {
    handle: PoseHandle,
    sinks: Vec<Box<dyn PoseSink>>,
    subscribers: Vec<Subscriber>,
    closed: bool,
}

impl PosePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> PoseHandle {
        self.handle.clone()
    }

    pub fn add_sink(&mut self, sink: Box<dyn PoseSink>) {
        self.sinks.push(sink);
    }

    pub fn subscribe(&mut self) -> PoseSubscription {
        let (tx, rx) = bounded(SUBSCRIPTION_CAPACITY);
        let alive = Arc::new(());
        if !self.closed {
            self.subscribers.push(Subscriber {
                tx,
                rx: rx.clone(),
                alive: Arc::downgrade(&alive),
            });
        }
        PoseSubscription { rx, _alive: alive }
    }

    /// Make `pose` current and deliver it. Returns false once closed.
    pub fn publish(&mut self, pose: Arc<Pose>) -> bool {
        if self.closed {
            return false;
        }

        self.handle.replace(pose.clone());
        for sink in self.sinks.iter_mut() {
            sink.on_pose(&pose);
        }
        self.subscribers.retain(|sub| sub.alive.strong_count() > 0);
        for sub in &self.subscribers {
            sub.deliver(&pose);
        }
        true
    }

    /// Stop publishing. Sinks are released and subscriptions disconnect; the
    /// handle keeps the last pose.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.sinks.clear();
        self.subscribers.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Logs each pose at info level.
#[derive(Default)]
pub struct TracingSink;

impl PoseSink for TracingSink {
    fn on_pose(&mut self, pose: &Arc<Pose>) {
        info!(
            seq = pose.seq,
            marker = pose.marker_id,
            "Pose x={:.1} y={:.1} z={:.1} rot=({:.3}, {:.3}, {:.3}) err={:.2}°",
            pose.position.x,
            pose.position.y,
            pose.position.z,
            pose.euler.x,
            pose.euler.y,
            pose.euler.z,
            pose.error
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use nalgebra::{Matrix3, Vector3};

    use crate::geometry::Solution;

    struct CountingSink(Arc<AtomicUsize>);

    impl PoseSink for CountingSink {
        fn on_pose(&mut self, _pose: &Arc<Pose>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pose(seq: u64) -> Arc<Pose> {
        let solution = Solution {
            rotation: Matrix3::identity(),
            translation: Vector3::new(0.0, 0.0, 100.0 + seq as f64),
            error: 0.0,
        };
        Arc::new(Pose::assemble(&solution, 1, seq, None))
    }

    #[test]
    fn test_publish_reaches_all_consumers() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut publisher = PosePublisher::new();
        publisher.add_sink(Box::new(CountingSink(count.clone())));
        publisher.add_sink(Box::new(TracingSink));
        let subscription = publisher.subscribe();
        let handle = publisher.handle();
        assert!(handle.current().is_none());

        let first = pose(1);
        assert!(publisher.publish(first.clone()));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&handle.current().unwrap(), &first));
        assert!(Arc::ptr_eq(&subscription.try_recv().unwrap(), &first));
        assert!(subscription.try_recv().is_none());
    }

    #[test]
    fn test_latest_drains_queue() {
        let mut publisher = PosePublisher::new();
        let subscription = publisher.subscribe();
        for seq in 0..3 {
            publisher.publish(pose(seq));
        }
        assert_eq!(subscription.latest().unwrap().seq, 2);
        assert!(subscription.try_recv().is_none());
    }

    #[test]
    fn test_full_subscriber_drops_oldest() {
        let mut publisher = PosePublisher::new();
        let subscription = publisher.subscribe();
        for seq in 0..(SUBSCRIPTION_CAPACITY as u64 + 4) {
            assert!(publisher.publish(pose(seq)));
        }
        // Oldest poses are evicted; the queue ends with the newest.
        let received: Vec<u64> = std::iter::from_fn(|| subscription.try_recv())
            .map(|p| p.seq)
            .collect();
        let expected: Vec<u64> = (4..SUBSCRIPTION_CAPACITY as u64 + 4).collect();
        assert_eq!(received, expected);
        assert_eq!(
            publisher.handle().current().unwrap().seq,
            SUBSCRIPTION_CAPACITY as u64 + 3
        );
    }

    #[test]
    fn test_dropped_subscription_is_pruned() {
        let mut publisher = PosePublisher::new();
        drop(publisher.subscribe());
        publisher.publish(pose(0));
        assert!(publisher.subscribers.is_empty());
    }

    #[test]
    fn test_closed_publisher_refuses() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut publisher = PosePublisher::new();
        publisher.add_sink(Box::new(CountingSink(count.clone())));
        let subscription = publisher.subscribe();
        publisher.publish(pose(0));

        publisher.close();
        assert!(publisher.is_closed());
        assert!(!publisher.publish(pose(1)));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(publisher.handle().current().unwrap().seq, 0);
        assert_eq!(subscription.try_recv().unwrap().seq, 0);
        assert!(subscription.is_disconnected());

        // Subscribing after close yields a disconnected subscription.
        assert!(publisher.subscribe().is_disconnected());
    }
}
