use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::warn;

/// Cooperative cancellation flag shared between a task and whoever launched it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct TaskHandle<T> {
    pub name: String,
    pub cancel: CancelToken,
    result: Receiver<Option<T>>,
}

impl<T> TaskHandle<T> {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Blocks until the task finishes. `None` when it was cancelled before it
    /// started or panicked.
    pub fn join(self) -> Option<T> {
        match self.result.recv() {
            Ok(value) => value,
            Err(_) => {
                warn!(task = %self.name, "background task panicked");
                None
            }
        }
    }
}

#[derive(Default)]
struct Outstanding {
    count: Mutex<usize>,
    cv: Condvar,
}

impl Outstanding {
    fn enter(&self) {
        let mut count = self.count.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *count += 1;
    }

    fn leave(&self) {
        let mut count = self.count.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *count = count.saturating_sub(1);
        self.cv.notify_all();
    }
}

struct OutstandingGuard(Arc<Outstanding>);

impl Drop for OutstandingGuard {
    fn drop(&mut self) {
        self.0.leave();
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

fn worker_loop(name: String, jobs: Arc<Mutex<Receiver<Job>>>) {
    loop {
        let next = jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .recv();
        let Ok(job) = next else {
            break;
        };
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            warn!(worker = %name, "task panicked; worker continues");
        }
    }
}

/// Fixed pool of `limit` worker threads fed in FIFO order. At most `limit`
/// operations run at once, and queued operations hold no thread.
pub struct TaskScheduler {
    jobs: Mutex<Sender<Job>>,
    workers: usize,
    outstanding: Arc<Outstanding>,
}

impl TaskScheduler {
    pub fn new(global_limit: usize) -> Self {
        let workers = global_limit.max(1);
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        for i in 0..workers {
            let rx = Arc::clone(&rx);
            let name = format!("task-worker-{i}");
            std::thread::spawn(move || worker_loop(name, rx));
        }
        Self {
            jobs: Mutex::new(tx),
            workers,
            outstanding: Arc::new(Outstanding::default()),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn spawn<T, F>(&self, name: &str, task: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(CancelToken) -> T + Send + 'static,
    {
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let (result_tx, result_rx) = mpsc::channel();
        self.outstanding.enter();
        let guard = OutstandingGuard(Arc::clone(&self.outstanding));
        let job: Job = Box::new(move || {
            let _guard = guard;
            let value = if token.is_cancelled() {
                None
            } else {
                Some(task(token))
            };
            let _ = result_tx.send(value);
        });
        let sent = self
            .jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .send(job);
        if sent.is_err() {
            // Every worker is gone; the job (and its guard) was dropped unrun.
            warn!(task = %name, "task pool is closed");
        }
        TaskHandle {
            name: name.to_string(),
            cancel,
            result: result_rx,
        }
    }

    pub fn outstanding(&self) -> usize {
        *self
            .outstanding
            .count
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Waits until no spawned task is pending or running. Returns `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self
            .outstanding
            .count
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while *count > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _) = self
                .outstanding
                .cv
                .wait_timeout(count, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            count = next;
        }
        true
    }
}
