//! The outbound queue: hands messages from application code to the
//! session loop.
//!
//! Application threads enqueue; the session loop drains everything once
//! per tick and transmits it in FIFO order. A single mutex guards the
//! queue. Both critical sections are a push or a swap, so producers never
//! wait on network I/O.
//!
//! ```text
//! app thread ──enqueue──┐
//! app thread ──enqueue──┼──→ [ VecDeque ] ──drain_all──→ session loop ──→ transport
//! handler    ──enqueue──┘
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use netplay_protocol::AnyMessage;
use netplay_transport::{PeerAddress, Target};

/// A message waiting to be sent, and who it is for.
pub struct Outgoing {
    pub message: Box<dyn AnyMessage>,
    pub target: Target,
}

impl fmt::Debug for Outgoing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outgoing")
            .field("message_type", &self.message.message_type())
            .field("target", &self.target)
            .finish()
    }
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Outgoing>,
    closed: bool,
}

/// Thread-safe FIFO of outgoing messages.
///
/// Cheap to clone; every clone feeds the same queue.
#[derive(Clone, Default)]
pub struct OutboundQueue {
    inner: Arc<Mutex<QueueState>>,
}

impl fmt::Debug for OutboundQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("OutboundQueue")
            .field("pending", &state.pending.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    // A producer that panicked mid-push leaves the deque intact, so a
    // poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues `message` for every connected peer.
    ///
    /// Returns `false` if the queue is closed and the message was dropped.
    pub fn enqueue<M: AnyMessage>(&self, message: M) -> bool {
        self.enqueue_boxed(Box::new(message), Target::All)
    }

    /// Queues `message` for one peer.
    pub fn enqueue_for<M: AnyMessage>(&self, message: M, peer: PeerAddress) -> bool {
        self.enqueue_boxed(Box::new(message), Target::Peer(peer))
    }

    /// Queues `message` for an explicit target.
    pub fn enqueue_to<M: AnyMessage>(&self, message: M, target: Target) -> bool {
        self.enqueue_boxed(Box::new(message), target)
    }

    /// Queues an already-boxed message.
    pub fn enqueue_boxed(&self, message: Box<dyn AnyMessage>, target: Target) -> bool {
        let mut state = self.lock();
        if state.closed {
            tracing::trace!(
                message_type = message.message_type(),
                "outbound queue closed, message discarded"
            );
            return false;
        }
        state.pending.push_back(Outgoing { message, target });
        true
    }

    /// Takes every pending message, oldest first.
    ///
    /// Messages enqueued while this runs land in the next drain, never in
    /// both and never in neither.
    pub fn drain_all(&self) -> Vec<Outgoing> {
        let pending = std::mem::take(&mut self.lock().pending);
        pending.into()
    }

    /// Closes the queue, discarding anything pending.
    ///
    /// Later enqueues are dropped. Returns how many messages were discarded.
    pub fn close(&self) -> usize {
        let mut state = self.lock();
        state.closed = true;
        let discarded = state.pending.len();
        state.pending.clear();
        discarded
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }
}
