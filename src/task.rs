//! Bridging native tasks onto blocking host awaits.
//!
//! The engine starts a task, returns a task id, and later delivers the
//! result through the registry trampoline on its own thread. [`ResultCell`]
//! is the single-assignment meeting point; [`TaskHandle`] is the scoped
//! guard that guarantees every started task is cancelled, drained and
//! deregistered no matter how the await scope exits, timeout and error
//! paths included.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::callback::CallbackRegistration;
use crate::context::ContextState;
use crate::error::{Error, EvalError};
use crate::lock;
use crate::value::JsValue;

enum Slot {
    Pending,
    Ready(Result<JsValue, EvalError>),
    Taken,
}

/// Set-once container resolved by the completion callback.
pub(crate) struct ResultCell {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl ResultCell {
    pub(crate) fn new() -> Self {
        ResultCell {
            slot: Mutex::new(Slot::Pending),
            ready: Condvar::new(),
        }
    }

    /// Store the task outcome and wake waiters.
    ///
    /// # Panics
    /// If the cell was already resolved. The engine invokes each task
    /// callback at most once; a second resolution is a binding bug.
    pub(crate) fn resolve(&self, outcome: Result<JsValue, EvalError>) {
        let mut slot = lock(&self.slot);
        match *slot {
            Slot::Pending => {
                *slot = Slot::Ready(outcome);
                self.ready.notify_all();
            }
            _ => panic!("bridged task resolved twice"),
        }
    }

    /// Block until the cell is resolved, or until `timeout` elapses
    /// (`None` waits indefinitely). Returns `None` on timeout; otherwise
    /// takes the stored outcome.
    pub(crate) fn take(&self, timeout: Option<Duration>) -> Option<Result<JsValue, EvalError>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut slot = lock(&self.slot);
        loop {
            match std::mem::replace(&mut *slot, Slot::Taken) {
                Slot::Ready(outcome) => return Some(outcome),
                Slot::Taken => return None,
                Slot::Pending => *slot = Slot::Pending,
            }
            slot = match deadline {
                None => self.ready.wait(slot).unwrap_or_else(|e| e.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    let (guard, _) = self
                        .ready
                        .wait_timeout(slot, deadline - now)
                        .unwrap_or_else(|e| e.into_inner());
                    guard
                }
            };
        }
    }
}

/// Scoped handle for one started native task.
///
/// Dropping the handle runs the unconditional disposition path:
/// 1. `mr_cancel_task` (idempotent; a no-op if the task completed),
/// 2. drain the eventual callback result if the await never took it,
///    swallowing whatever it carries, since there is no caller left to
///    deliver it to,
/// 3. retire the callback registry entry (only after the drain, so the
///    delivery always finds its entry).
pub(crate) struct TaskHandle {
    ctx: Arc<ContextState>,
    cell: Arc<ResultCell>,
    registration: Option<CallbackRegistration>,
    task_id: u64,
    settled: bool,
}

impl TaskHandle {
    pub(crate) fn new(
        ctx: Arc<ContextState>,
        cell: Arc<ResultCell>,
        registration: CallbackRegistration,
        task_id: u64,
    ) -> Self {
        TaskHandle {
            ctx,
            cell,
            registration: Some(registration),
            task_id,
            settled: false,
        }
    }

    /// Await the task result. A `None` timeout blocks until the engine
    /// delivers; `Some` deadline yields [`Error::Timeout`], leaving
    /// cancellation and drain to the drop path.
    pub(crate) fn wait(&mut self, timeout: Option<Duration>) -> Result<JsValue, Error> {
        match self.cell.take(timeout) {
            Some(outcome) => {
                self.settled = true;
                Ok(outcome?)
            }
            None => Err(Error::Timeout),
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        match self.ctx.id() {
            Ok(ctx_id) => {
                log::trace!("cancelling task {}", self.task_id);
                self.ctx.api().cancel_task(ctx_id, self.task_id);
                if !self.settled {
                    // Await the cancellation (or completion) result so the
                    // native value is converted and freed and the registry
                    // entry can be retired without a window for an
                    // unknown-id delivery.
                    let _ = self.cell.take(None);
                }
            }
            Err(_) => {
                // Closed context: the engine delivers nothing further, so
                // a blocking drain would never return. Scoop a result that
                // already arrived, then retire the entry.
                if !self.settled {
                    let _ = self.cell.take(Some(Duration::ZERO));
                }
            }
        }
        self.registration.take();
    }
}
