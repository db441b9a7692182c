use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Cancels one scheduled task. Cancelling after it ran is a no-op.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub trait Scheduler: Send + Sync {
    fn schedule(&self, after: Duration, task: Task) -> CancelToken;
}

/// Runs tasks on the tokio timer. Must be used inside a runtime.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, after: Duration, task: Task) -> CancelToken {
        let token = CancelToken::default();
        let guard = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if !guard.is_cancelled() {
                task();
            }
        });
        token
    }
}

struct Slot {
    token: CancelToken,
    task: Task,
}

/// Scheduler driven by hand: nothing runs until [`fire_next`](Self::fire_next).
#[derive(Default)]
pub struct ManualScheduler {
    pending: Mutex<Vec<Slot>>,
    log: Mutex<Vec<Duration>>,
    scheduled: Notify,
}

impl ManualScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every delay ever requested, in order.
    pub fn delays(&self) -> Vec<Duration> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .map(|p| p.iter().filter(|s| !s.token.is_cancelled()).count())
            .unwrap_or(0)
    }

    /// Runs the oldest task that was not cancelled. Returns false if none.
    pub fn fire_next(&self) -> bool {
        let slot = {
            let Ok(mut pending) = self.pending.lock() else {
                return false;
            };
            pending.retain(|s| !s.token.is_cancelled());
            if pending.is_empty() {
                return false;
            }
            pending.remove(0)
        };
        (slot.task)();
        true
    }

    /// Waits until at least `n` delays have been requested.
    pub async fn wait_scheduled(&self, n: usize) {
        loop {
            let notified = self.scheduled.notified();
            if self.delays().len() >= n {
                return;
            }
            notified.await;
        }
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, after: Duration, task: Task) -> CancelToken {
        let token = CancelToken::default();
        if let Ok(mut log) = self.log.lock() {
            log.push(after);
        }
        if let Ok(mut pending) = self.pending.lock() {
            pending.push(Slot {
                token: token.clone(),
                task,
            });
        }
        self.scheduled.notify_waiters();
        token
    }
}
