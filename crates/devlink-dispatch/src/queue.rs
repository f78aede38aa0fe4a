use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use devlink_protocol::Message;

/// FIFO hand-off from the receive task to the processing loop.
///
/// Clones share the same queue. The lock is held only for a push or a take,
/// never while decoding or running a handler. A poisoned lock is recovered
/// since the deque itself cannot be left half-updated.
#[derive(Debug, Clone, Default)]
pub struct InboundQueue {
    inner: Arc<Mutex<VecDeque<Message>>>,
}

impl InboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message at the tail.
    pub fn enqueue(&self, message: Message) {
        self.lock().push_back(message);
    }

    /// Takes every queued message in arrival order, leaving the queue empty.
    pub fn drain_all(&self) -> Vec<Message> {
        let taken = std::mem::take(&mut *self.lock());
        taken.into()
    }

    /// Messages waiting for the next drain.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Message>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
