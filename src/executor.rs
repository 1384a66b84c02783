//! Task submission for asynchronous disk hand-offs.
//!
//! The memory tier never writes to disk on the caller's thread. Evicted and
//! cleaned values are packaged as [`Task`]s and handed to a
//! [`TaskExecutor`]. Submission happens before the mutating call returns;
//! completion is unordered and fire-and-forget.
//!
//! | Executor            | Runs tasks                          | Use               |
//! |---------------------|-------------------------------------|-------------------|
//! | [`BackgroundQueue`] | on dedicated worker threads         | production        |
//! | [`InlineExecutor`]  | immediately, on the submitting thread | simple tests    |
//! | [`ManualExecutor`]  | when [`ManualExecutor::run_pending`] is called | deterministic tests |

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

/// A unit of background work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Accepts tasks for execution on some other context.
pub trait TaskExecutor: Send + Sync {
    fn submit(&self, task: Task);
}

/// Runs every task immediately on the submitting thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl TaskExecutor for InlineExecutor {
    fn submit(&self, task: Task) {
        task();
    }
}

/// Queues tasks until the owner drains them.
///
/// Lets a test observe the window between "hand-off scheduled" and
/// "hand-off completed".
#[derive(Default)]
pub struct ManualExecutor {
    queue: Mutex<VecDeque<Task>>,
}

impl ManualExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Runs queued tasks in submission order, including any submitted while
    /// draining. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            // Pop under the lock, run outside it so tasks may submit more.
            let next = self.queue.lock().pop_front();
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                },
                None => return ran,
            }
        }
    }

    /// Drops queued tasks without running them, as a process exit would.
    pub fn discard_pending(&self) -> usize {
        let mut queue = self.queue.lock();
        let dropped = queue.len();
        queue.clear();
        dropped
    }
}

impl TaskExecutor for ManualExecutor {
    fn submit(&self, task: Task) {
        self.queue.lock().push_back(task);
    }
}

impl fmt::Debug for ManualExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualExecutor")
            .field("pending", &self.pending())
            .finish()
    }
}

#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    fn begin(&self) {
        *self.count.lock() += 1;
    }

    fn end(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }
}

/// Worker threads draining an unbounded channel.
///
/// Dropping the queue closes the channel and joins the workers after they
/// finish what was already submitted. A panicking task is logged and does
/// not take its worker down.
pub struct BackgroundQueue {
    sender: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
    in_flight: Arc<InFlight>,
}

impl BackgroundQueue {
    /// Spawns `workers` threads (at least one).
    pub fn new(workers: usize) -> io::Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded::<Task>();
        let in_flight = Arc::new(InFlight::default());

        let mut handles = Vec::with_capacity(workers.max(1));
        for idx in 0..workers.max(1) {
            let receiver = receiver.clone();
            let in_flight = Arc::clone(&in_flight);
            let handle = thread::Builder::new()
                .name(format!("imgcache-handoff-{idx}"))
                .spawn(move || worker_loop(receiver, in_flight))?;
            handles.push(handle);
        }
        debug!(workers = handles.len(), "background hand-off queue started");

        Ok(Self {
            sender: Some(sender),
            workers: handles,
            in_flight,
        })
    }

    /// Blocks until every submitted task has finished.
    pub fn wait_idle(&self) {
        let mut count = self.in_flight.count.lock();
        while *count > 0 {
            self.in_flight.idle.wait(&mut count);
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Closes the queue and joins the workers once pending tasks are done.
    pub fn shutdown(mut self) {
        self.close();
    }

    fn close(&mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("hand-off worker exited by panic");
            }
        }
    }
}

fn worker_loop(receiver: Receiver<Task>, in_flight: Arc<InFlight>) {
    for task in receiver.iter() {
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            error!("hand-off task panicked");
        }
        in_flight.end();
    }
}

impl TaskExecutor for BackgroundQueue {
    fn submit(&self, task: Task) {
        let Some(sender) = self.sender.as_ref() else {
            warn!("hand-off queue is closed; dropping task");
            return;
        };
        self.in_flight.begin();
        if sender.send(task).is_err() {
            self.in_flight.end();
            warn!("hand-off workers are gone; dropping task");
        }
    }
}

impl Drop for BackgroundQueue {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for BackgroundQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundQueue")
            .field("workers", &self.workers.len())
            .field("in_flight", &*self.in_flight.count.lock())
            .finish()
    }
}
