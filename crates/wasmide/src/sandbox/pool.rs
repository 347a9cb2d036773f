//! Bounded worker pool for program invocations
//!
//! A fixed set of OS threads drains a bounded admission queue. Admission
//! never blocks: when every worker is busy and the queue is full, the job is
//! refused and the caller decides what to tell the user.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, instrument, warn};

/// Unit of work run on a worker thread
pub type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker pool is saturated")]
    Saturated,

    #[error("worker pool is closed")]
    Closed,

    #[error("worker pool needs at least one worker and one queue slot")]
    InvalidSize,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Fixed worker threads fed by a bounded queue
#[derive(Debug)]
pub struct WorkerPool {
    /// Admission side of the queue; `None` once closed
    sender: Mutex<Option<mpsc::Sender<Job>>>,

    /// Number of worker threads
    workers: usize,

    /// Number of jobs that may wait for a worker
    queue_capacity: usize,

    /// Jobs currently running
    busy: Arc<AtomicUsize>,

    _handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `workers` threads behind a queue of `queue_capacity` slots
    #[instrument]
    pub fn new(workers: usize, queue_capacity: usize) -> Result<Self, PoolError> {
        if workers == 0 || queue_capacity == 0 {
            return Err(PoolError::InvalidSize);
        }

        let (sender, receiver) = mpsc::channel::<Job>(queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let busy = Arc::new(AtomicUsize::new(0));

        let handles = (0..workers)
            .map(|id| {
                let receiver = Arc::clone(&receiver);
                let busy = Arc::clone(&busy);
                std::thread::Builder::new()
                    .name(format!("wasmide-worker-{id}"))
                    .spawn(move || worker_loop(id, &receiver, &busy))
                    .map_err(PoolError::Spawn)
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!("worker pool started");
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers,
            queue_capacity,
            busy,
            _handles: handles,
        })
    }

    /// Queue a job without waiting for room
    pub fn try_submit(&self, job: Job) -> Result<(), PoolError> {
        let sender = self.sender.lock().map_err(|_| PoolError::Closed)?;
        let sender = sender.as_ref().ok_or(PoolError::Closed)?;
        sender.try_send(job).map_err(|err| match err {
            TrySendError::Full(_) => PoolError::Saturated,
            TrySendError::Closed(_) => PoolError::Closed,
        })
    }

    /// Stop admitting jobs. Queued jobs still run; workers exit afterwards.
    pub fn close(&self) {
        if let Ok(mut sender) = self.sender.lock()
            && sender.take().is_some()
        {
            debug!("worker pool closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().map_or(true, |sender| sender.is_none())
    }

    /// Number of jobs waiting for a worker
    pub fn queued(&self) -> usize {
        match self.sender.lock() {
            Ok(sender) => sender
                .as_ref()
                .map_or(0, |sender| self.queue_capacity - sender.capacity()),
            Err(_) => 0,
        }
    }

    /// Number of jobs currently running
    pub fn busy(&self) -> usize {
        self.busy.load(Ordering::SeqCst)
    }

    /// Get the number of worker threads
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Get the number of queue slots
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.close();
    }
}

fn worker_loop(id: usize, receiver: &Mutex<mpsc::Receiver<Job>>, busy: &AtomicUsize) {
    loop {
        let job = match receiver.lock() {
            Ok(mut receiver) => receiver.blocking_recv(),
            Err(_) => None,
        };
        let Some(job) = job else {
            break;
        };

        busy.fetch_add(1, Ordering::SeqCst);
        if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
            warn!(worker = id, reason = panic_message(&*panic), "job panicked");
        }
        busy.fetch_sub(1, Ordering::SeqCst);
    }
    debug!(worker = id, "worker exiting");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
