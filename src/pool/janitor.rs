//! Background cleaning executor
//!
//! Clearing a multi-megabyte counter is too slow to sit on the request
//! path, so released counters are handed to a small shared pool of janitor
//! threads. One executor serves every field pool under the same index
//! generation, capping the total number of clearing threads server-wide.
//!
//! With zero threads the executor degrades to running each job inline in
//! `submit`, which keeps single-threaded setups and tests deterministic.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::warn;
use parking_lot::{Condvar, Mutex};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct ExecutorState {
    queue: Mutex<VecDeque<Job>>,
    /// Signalled on new work and on shutdown.
    work_available: Condvar,
    /// Signalled whenever a job finishes or the queue drains.
    idle: Condvar,
    running: AtomicUsize,
    shutdown: AtomicBool,
}

/// Shared executor for counter-clearing jobs.
pub struct JanitorExecutor {
    state: Arc<ExecutorState>,
    workers: Vec<JoinHandle<()>>,
    threads: usize,
}

impl JanitorExecutor {
    /// Spawn `threads` worker threads. Zero threads means jobs run inline
    /// in [`submit`](Self::submit).
    pub fn new(threads: usize) -> Self {
        let state = Arc::new(ExecutorState {
            queue: Mutex::new(VecDeque::new()),
            work_available: Condvar::new(),
            idle: Condvar::new(),
            running: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
        });
        let workers = (0..threads)
            .map(|i| {
                let state = Arc::clone(&state);
                std::thread::Builder::new()
                    .name(format!("facet-janitor-{}", i))
                    .spawn(move || worker_loop(state))
                    .expect("failed to spawn janitor thread")
            })
            .collect();
        Self {
            state,
            workers,
            threads,
        }
    }

    /// Number of worker threads (0 = inline execution).
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Enqueue a job. Never blocks on the job itself when workers exist;
    /// runs it on the calling thread otherwise.
    pub fn submit(&self, job: Job) {
        if self.threads == 0 {
            job();
            return;
        }
        let mut queue = self.state.queue.lock();
        queue.push_back(job);
        drop(queue);
        self.state.work_available.notify_one();
    }

    /// Block until the queue is empty and no job is running. Used by tests
    /// and by generation teardown.
    pub fn wait_idle(&self) {
        if self.threads == 0 {
            return;
        }
        let mut queue = self.state.queue.lock();
        while !queue.is_empty() || self.state.running.load(Ordering::SeqCst) > 0 {
            self.state.idle.wait(&mut queue);
        }
    }
}

impl Drop for JanitorExecutor {
    fn drop(&mut self) {
        self.state.shutdown.store(true, Ordering::SeqCst);
        self.state.work_available.notify_all();
        // A job can hold the last reference to the executor (through its
        // pool), putting this drop on a worker thread; that worker must be
        // detached, not joined.
        let current = std::thread::current().id();
        for worker in self.workers.drain(..) {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                warn!("janitor worker panicked during shutdown");
            }
        }
    }
}

fn worker_loop(state: Arc<ExecutorState>) {
    loop {
        let job = {
            let mut queue = state.queue.lock();
            loop {
                if let Some(job) = queue.pop_front() {
                    state.running.fetch_add(1, Ordering::SeqCst);
                    break job;
                }
                if state.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                state.work_available.wait(&mut queue);
            }
        };
        job();
        state.running.fetch_sub(1, Ordering::SeqCst);
        let queue = state.queue.lock();
        if queue.is_empty() && state.running.load(Ordering::SeqCst) == 0 {
            state.idle.notify_all();
        }
    }
}
