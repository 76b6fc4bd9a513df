use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::transaction::Callback;

struct Completion {
    callbacks: Vec<Callback>,
    status: i32,
}

/// Run `callbacks` in order with `status`.
///
/// A panicking callback is logged and skipped; the rest still run.
pub(crate) fn run_callbacks(callbacks: Vec<Callback>, status: i32, context: &str) {
    for cb in callbacks {
        if panic::catch_unwind(AssertUnwindSafe(move || cb(status))).is_err() {
            warn!(context, status, "completion callback panicked");
        }
    }
}

/// Background thread that runs completion callbacks in FIFO order.
///
/// Callbacks queued before [`Finisher::stop`] are all run before the thread
/// exits.
pub struct Finisher {
    name: String,
    queue: Mutex<Option<mpsc::UnboundedSender<Completion>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Finisher {
    /// Spawn the worker thread.
    pub fn start(name: impl Into<String>) -> StoreResult<Self> {
        let name = name.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<Completion>();
        let worker_name = name.clone();
        let worker = thread::Builder::new().name(name.clone()).spawn(move || {
            while let Some(done) = rx.blocking_recv() {
                run_callbacks(done.callbacks, done.status, &worker_name);
            }
        })?;
        debug!(finisher = %name, "finisher started");
        Ok(Self {
            name,
            queue: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queue `callbacks` to be run with `status`.
    pub fn queue(&self, callbacks: Vec<Callback>, status: i32) -> StoreResult<()> {
        if callbacks.is_empty() {
            return Ok(());
        }
        let queue = self.queue.lock().expect("finisher lock poisoned");
        let tx = queue.as_ref().ok_or(StoreError::ShutDown)?;
        tx.send(Completion { callbacks, status })
            .map_err(|_| StoreError::ShutDown)
    }

    /// Close the queue, wait for pending callbacks, and join the thread.
    /// Later calls are no-ops.
    pub fn stop(&self) {
        drop(self.queue.lock().expect("finisher lock poisoned").take());
        let worker = self.worker.lock().expect("finisher lock poisoned").take();
        if let Some(worker) = worker {
            // A callback that drops the last store handle ends up here on the
            // worker itself; the thread exits on its own once the queue drains.
            if worker.thread().id() == thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                warn!(finisher = %self.name, "finisher thread panicked");
            }
            debug!(finisher = %self.name, "finisher stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.queue.lock().expect("finisher lock poisoned").is_some()
    }
}

impl Drop for Finisher {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Finisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Finisher")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}
