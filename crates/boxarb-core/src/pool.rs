//! # Worker Pool
//!
//! A fixed-size group of OS threads draining a FIFO task queue, with
//! cooperative resizing and a completion barrier.
//!
//! ## Description
//! Tasks start in submission order; completion order is unspecified. Each
//! submission returns a [`TaskHandle`] whose `wait` yields the task's result,
//! or [`PoolError::TaskPanicked`] if the closure panicked — panics are caught
//! inside the worker, logged, and never take the pool down. Shrinking is
//! cooperative: workers finish their current task, then notice the `to_stop`
//! counter and exit; `resize` waits up to a bounded grace period before
//! proceeding regardless. There is no per-task cancellation; only shutdown
//! interrupts waits.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// How long `resize` waits for shrinking workers to exit on their own.
const SHRINK_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    /// `submit` was called after shutdown, or the pool died before the task ran.
    #[error("worker pool is shut down")]
    Shutdown,
    /// The task closure panicked; the panic was logged inside the worker.
    #[error("task panicked on a worker thread")]
    TaskPanicked,
}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolState {
    queue: VecDeque<Job>,
    handles: Vec<JoinHandle<()>>,
    stop: bool,
    /// Workers that should exit after their current task (cooperative shrink).
    to_stop: usize,
    /// Tasks currently executing.
    active: usize,
    /// Live worker threads.
    workers: usize,
    /// Monotonic id source for thread names.
    next_id: usize,
}

struct PoolInner {
    state: Mutex<PoolState>,
    /// Signalled on new work, stop, or shrink requests.
    task_cv: Condvar,
    /// Signalled when the pool drains (queue empty, nothing running).
    idle_cv: Condvar,
}

/// Future-like receiver for one submitted task.
pub struct TaskHandle<T> {
    rx: mpsc::Receiver<Result<T, PoolError>>,
}

impl<T> TaskHandle<T> {
    /// Blocks until the task finishes. If the pool shut down before the task
    /// ran, returns [`PoolError::Shutdown`].
    pub fn wait(self) -> Result<T, PoolError> {
        match self.rx.recv() {
            Ok(result) => result,
            Err(_) => Err(PoolError::Shutdown),
        }
    }
}

/// FIFO task queue with N worker threads.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    pub fn new(num_threads: usize) -> Self {
        let num_threads = num_threads.max(1);
        info!("initializing worker pool with {} threads", num_threads);
        let inner = Arc::new(PoolInner {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                handles: Vec::new(),
                stop: false,
                to_stop: 0,
                active: 0,
                workers: 0,
                next_id: 0,
            }),
            task_cv: Condvar::new(),
            idle_cv: Condvar::new(),
        });
        let pool = Self { inner };
        {
            let mut state = pool.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            for _ in 0..num_threads {
                Self::spawn_worker(&pool.inner, &mut state);
            }
        }
        pool
    }

    fn spawn_worker(inner: &Arc<PoolInner>, state: &mut PoolState) {
        let id = state.next_id;
        state.next_id += 1;
        state.workers += 1;
        let inner = Arc::clone(inner);
        let handle = std::thread::Builder::new()
            .name(format!("boxarb-worker-{id}"))
            .spawn(move || {
                debug!("worker thread {} started", id);
                Self::worker_loop(&inner);
                debug!("worker thread {} stopped", id);
            })
            .expect("failed to spawn worker thread");
        state.handles.push(handle);
    }

    fn worker_loop(inner: &Arc<PoolInner>) {
        loop {
            let job = {
                let mut state = inner.state.lock().unwrap_or_else(|e| e.into_inner());
                loop {
                    if state.stop && state.queue.is_empty() {
                        state.workers -= 1;
                        inner.idle_cv.notify_all();
                        return;
                    }
                    if state.to_stop > 0 {
                        state.to_stop -= 1;
                        state.workers -= 1;
                        inner.idle_cv.notify_all();
                        return;
                    }
                    if let Some(job) = state.queue.pop_front() {
                        state.active += 1;
                        break job;
                    }
                    state = inner.task_cv.wait(state).unwrap_or_else(|e| e.into_inner());
                }
            };

            job();

            let mut state = inner.state.lock().unwrap_or_else(|e| e.into_inner());
            state.active -= 1;
            if state.active == 0 && state.queue.is_empty() {
                inner.idle_cv.notify_all();
            }
        }
    }

    /// Enqueues a task and returns a handle for its result.
    pub fn submit<T, F>(&self, task: F) -> Result<TaskHandle<T>, PoolError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let job: Job = Box::new(move || {
            match panic::catch_unwind(AssertUnwindSafe(task)) {
                Ok(value) => {
                    let _ = tx.send(Ok(value));
                }
                Err(payload) => {
                    error!("task panicked on worker thread: {}", describe_panic(&payload));
                    let _ = tx.send(Err(PoolError::TaskPanicked));
                }
            }
        });

        {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.stop {
                return Err(PoolError::Shutdown);
            }
            state.queue.push_back(job);
        }
        self.inner.task_cv.notify_one();
        Ok(TaskHandle { rx })
    }

    /// Grows the pool by spawning workers, or shrinks it by signalling
    /// workers to exit after their current task. Shrinking waits up to the
    /// grace period, then proceeds regardless.
    pub fn resize(&self, num_threads: usize) {
        let num_threads = num_threads.max(1);
        let current = {
            let state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            state.workers
        };
        if num_threads == current {
            return;
        }
        info!("resizing worker pool from {} to {} threads", current, num_threads);

        if num_threads > current {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            for _ in 0..(num_threads - state.workers) {
                Self::spawn_worker(&self.inner, &mut state);
            }
            return;
        }

        {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            state.to_stop = current - num_threads;
        }
        self.inner.task_cv.notify_all();

        let deadline = Instant::now() + SHRINK_GRACE;
        loop {
            std::thread::sleep(Duration::from_millis(100));
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.to_stop == 0 {
                break;
            }
            if Instant::now() > deadline {
                warn!("timeout waiting for {} workers to stop; continuing", state.to_stop);
                state.to_stop = 0;
                break;
            }
        }

        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        state.handles.retain(|h| !h.is_finished());
        info!("worker pool resized to {} threads", state.workers);
    }

    /// Blocks until the queue is empty and no task is running.
    pub fn wait_idle(&self) {
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        while !(state.queue.is_empty() && state.active == 0) {
            state = self.inner.idle_cv.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Number of tasks currently executing.
    pub fn active_count(&self) -> usize {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner()).active
    }

    /// Number of tasks waiting in the queue.
    pub fn queue_len(&self) -> usize {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner()).queue.len()
    }

    /// Number of live worker threads.
    pub fn thread_count(&self) -> usize {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner()).workers
    }

    /// Stops the pool: queued tasks still run, new submissions fail with
    /// [`PoolError::Shutdown`], and all workers are joined.
    pub fn shutdown(&self) {
        let handles = {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.stop && state.handles.is_empty() {
                return;
            }
            state.stop = true;
            std::mem::take(&mut state.handles)
        };
        self.inner.task_cv.notify_all();
        for handle in handles {
            let _ = handle.join();
        }
        info!("worker pool shutdown complete");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn describe_panic(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
