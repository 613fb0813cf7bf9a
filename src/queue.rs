use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::sync::Mutex as AsyncMutex;

/// A closable FIFO link between two adjacent pipeline tasks.
///
/// Producers push through cloned [senders](Queue::sender); a pool of
/// consumers shares the single receiver, taking turns popping. A queue moves
/// through three states: open (accepting pushes), closing (the queue-held
/// sender is gone but producer clones may still be live, and buffered jobs
/// remain poppable), and closed (every sender dropped and the buffer
/// drained, so pops return [None] immediately). It never reopens.
pub(crate) struct Queue<J> {
    tx: Arc<Mutex<Option<Sender<J>>>>,
    rx: Arc<AsyncMutex<Receiver<J>>>,
}

impl<J> Clone for Queue<J> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<J> Queue<J> {
    /// Creates a queue buffering up to `capacity` jobs.
    ///
    /// tokio channels cannot be zero-capacity, so a capacity of 0 (an
    /// "unbuffered" link) becomes a single-slot handoff.
    pub(crate) fn bounded(capacity: usize) -> Self {
        let (tx, rx) = channel(capacity.max(1));
        Self {
            tx: Arc::new(Mutex::new(Some(tx))),
            rx: Arc::new(AsyncMutex::new(rx)),
        }
    }

    /// Clones a sender for one producer task.
    ///
    /// # Panics
    ///
    /// Panics if the queue has already been closed.
    pub(crate) fn sender(&self) -> Sender<J> {
        self.tx
            .lock()
            .expect("queue lock poisoned")
            .as_ref()
            .expect("queue is closed")
            .clone()
    }

    /// Pops the next job, waiting while the queue is empty but still open.
    ///
    /// Returns [None] once the queue is closed and fully drained.
    pub(crate) async fn pop(&self) -> Option<J> {
        self.rx.lock().await.recv().await
    }

    /// Stops the queue from ever accepting another job.
    ///
    /// Buffered jobs remain poppable. The caller must guarantee that every
    /// producer has already dropped its sender and that no other task will
    /// close this queue.
    pub(crate) fn close(&self) {
        self.tx.lock().expect("queue lock poisoned").take();
    }
}
