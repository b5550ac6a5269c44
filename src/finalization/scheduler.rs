//! Where incremental finalization steps are requeued.

use std::time::Duration;

use flume::{Receiver, Sender};
use parking_lot::Mutex;

use crate::error::{BridgeError, BridgeResult};
use crate::finalization::FinalizeTask;

/// The embedding's event loop, seen from the finalization queue.
pub trait Scheduler: Send + Sync {
    /// Run `task` again soon, at low priority. `timeout` is how long the
    /// task may wait for an idle period before it should run anyway.
    fn dispatch_idle(&self, task: FinalizeTask, timeout: Duration) -> BridgeResult<()>;
}

/// A scheduler backed by a channel that the embedding drains from its own
/// loop.
pub struct ChannelScheduler {
    sender: Mutex<Option<Sender<FinalizeTask>>>,
    receiver: Receiver<FinalizeTask>,
}

impl ChannelScheduler {
    pub fn new() -> Self {
        let (sender, receiver) = flume::unbounded();
        Self {
            sender: Mutex::new(Some(sender)),
            receiver,
        }
    }

    /// Number of queued tasks.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// Run one queued task, if any. Returns whether a task ran.
    pub fn run_one(&self) -> bool {
        match self.receiver.try_recv() {
            Ok(task) => {
                task.run();
                true
            }
            Err(_) => false,
        }
    }

    /// Run queued tasks, including ones they requeue, until none are left.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }

    /// Refuse all further dispatches, as an event loop does after shutdown.
    pub fn close(&self) {
        self.sender.lock().take();
    }
}

impl Default for ChannelScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ChannelScheduler {
    fn dispatch_idle(&self, task: FinalizeTask, timeout: Duration) -> BridgeResult<()> {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(BridgeError::DispatchFailed("event loop closed".into()));
        };
        tracing::trace!(target: "ccbridge::finalization", ?timeout, "queued finalization step");
        sender
            .send(task)
            .map_err(|_| BridgeError::DispatchFailed("event loop closed".into()))
    }
}
