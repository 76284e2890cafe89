//! Bounded frame queue shared between the TCP server and the transport.
//!
//! The queue is used from both sides of the sync/async boundary: the
//! control loop pushes and pops from a plain thread while the TCP writer
//! awaits [`FrameQueue::notified`].

use crate::frame::Frame;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::warn;

#[derive(Debug)]
struct Shared {
    frames: Mutex<VecDeque<Frame>>,
    capacity: usize,
    dropped: AtomicU64,
    notify: Notify,
}

/// Cloneable handle to a bounded FIFO of frames.
///
/// When full, pushing discards the oldest frame so producers never block.
#[derive(Debug, Clone)]
pub struct FrameQueue {
    shared: Arc<Shared>,
}

impl FrameQueue {
    /// Create a queue holding at most `capacity` frames (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            shared: Arc::new(Shared {
                frames: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                dropped: AtomicU64::new(0),
                notify: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Frame>> {
        // A panic while holding the lock cannot leave the deque inconsistent
        self.shared
            .frames
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Append a frame, discarding the oldest one if the queue is full.
    pub fn push(&self, frame: Frame) {
        {
            let mut frames = self.lock();
            if frames.len() == self.shared.capacity {
                frames.pop_front();
                let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(capacity = self.shared.capacity, dropped, "Frame queue full, dropping oldest frame");
            }
            frames.push_back(frame);
        }
        self.shared.notify.notify_one();
    }

    /// Remove the oldest frame.
    #[must_use]
    pub fn pop(&self) -> Option<Frame> {
        self.lock().pop_front()
    }

    /// Remove and return all queued frames in order.
    #[must_use]
    pub fn drain(&self) -> Vec<Frame> {
        self.lock().drain(..).collect()
    }

    /// Discard all queued frames.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of queued frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if no frames are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Maximum number of frames held.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Frames discarded because the queue was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Wait until a frame is pushed.
    ///
    /// A push that happened since the last wait completes this immediately,
    /// so callers should drain the queue before awaiting.
    pub async fn notified(&self) {
        self.shared.notify.notified().await;
    }
}
