use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

/// Told when the worker has emptied both pending queues after doing work.
///
/// Runs on the worker thread; implementations must hand expensive work off.
pub trait DrainListener: Send + Sync {
    fn tiles_drained(&self);
}

impl<F> DrainListener for F
where
    F: Fn() + Send + Sync,
{
    fn tiles_drained(&self) {
        self()
    }
}

/// Single-slot mailbox listener: repeated drains before the consumer looks
/// collapse into one pending signal.
#[derive(Debug, Clone)]
pub struct DrainSignal {
    sender: Sender<()>,
    receiver: Receiver<()>,
}

impl Default for DrainSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl DrainSignal {
    pub fn new() -> Self {
        let (sender, receiver) = bounded(1);
        Self { sender, receiver }
    }

    /// Consumes a pending signal without blocking.
    pub fn try_take(&self) -> bool {
        self.receiver.try_recv().is_ok()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.receiver.recv_timeout(timeout).is_ok()
    }
}

impl DrainListener for DrainSignal {
    fn tiles_drained(&self) {
        match self.sender.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Disconnected(())) => {
                panic!("drain signal channel disconnected")
            }
        }
    }
}
