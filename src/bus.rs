use std::{sync::Arc, time::Duration};

use helm_kinematics::Pose;
use tokio::sync::broadcast;

/// One published pose estimate, stamped with the plant time it was taken at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseSample {
    pub pose: Pose,
    pub stamp: Duration,
}

/// Broadcast topic with bounded capacity.
///
/// Slow subscribers lag and skip samples instead of blocking the publisher,
/// which is what the sensor loop needs: it must never stall on the viewer.
#[derive(Debug, Clone)]
pub struct Topic<T> {
    tx: broadcast::Sender<Arc<T>>,
}

impl<T: Send + Sync + 'static> Topic<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish a message; returns how many subscribers will see it.
    pub fn publish(&self, msg: T) -> usize {
        self.tx.send(Arc::new(msg)).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<T>> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
