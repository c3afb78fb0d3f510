//! Job Pool
//!
//! Worker thread pool for background work such as collision cooking.
//! Features:
//! - Global injector queue shared by all workers
//! - Completion handles that can be polled or waited on
//! - Callers may help drain the queue while waiting

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::deque::{Injector, Steal};
use parking_lot::{Condvar, Mutex};

/// Handle to a submitted job
#[derive(Debug, Clone)]
pub struct JobHandle {
    completed: Arc<AtomicBool>,
    id: u64,
}

impl JobHandle {
    /// Check if the job has completed
    pub fn is_complete(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Get the job ID
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// A job that can be executed by the pool
pub trait Job: Send + 'static {
    /// Execute the job
    fn execute(&mut self);

    /// Get the job name for debugging
    fn name(&self) -> &str {
        "unnamed_job"
    }
}

/// Wrapper for closure-based jobs
struct ClosureJob<F: FnOnce() + Send + 'static> {
    func: Option<F>,
    name: &'static str,
}

impl<F: FnOnce() + Send + 'static> Job for ClosureJob<F> {
    fn execute(&mut self) {
        if let Some(func) = self.func.take() {
            func();
        }
    }

    fn name(&self) -> &str {
        self.name
    }
}

/// Internal job wrapper with metadata
struct JobWrapper {
    job: Box<dyn Job>,
    completed: Arc<AtomicBool>,
}

/// Job pool configuration
#[derive(Debug, Clone)]
pub struct JobPoolConfig {
    /// Number of worker threads, zero to run jobs only from `process_jobs`
    pub num_workers: usize,
    /// Prefix of worker thread names
    pub thread_name: String,
}

impl Default for JobPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: rayon::current_num_threads().clamp(1, 4),
            thread_name: String::from("cook-worker"),
        }
    }
}

/// State shared between the pool and its workers
struct Shared {
    queue: Injector<JobWrapper>,
    pending: AtomicUsize,
    shutdown: AtomicBool,
    job_available: (Mutex<bool>, Condvar),
}

impl Shared {
    fn pop(&self) -> Option<JobWrapper> {
        loop {
            match self.queue.steal() {
                Steal::Success(wrapper) => return Some(wrapper),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    fn run(&self, mut wrapper: JobWrapper) {
        log::trace!("Running job '{}'", wrapper.job.name());
        wrapper.job.execute();
        wrapper.completed.store(true, Ordering::Release);
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }

    fn worker_loop(&self) {
        loop {
            if let Some(wrapper) = self.pop() {
                self.run(wrapper);
                continue;
            }
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            let (lock, cvar) = &self.job_available;
            let mut available = lock.lock();
            if !*available {
                cvar.wait_for(&mut available, Duration::from_millis(50));
            }
            *available = false;
        }
    }
}

/// Pool of worker threads fed from a shared queue
pub struct JobPool {
    shared: Arc<Shared>,
    job_counter: AtomicU64,
    workers: Vec<JoinHandle<()>>,
}

impl JobPool {
    /// Create a pool and spawn its workers
    pub fn new(config: JobPoolConfig) -> Self {
        let shared = Arc::new(Shared {
            queue: Injector::new(),
            pending: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            job_available: (Mutex::new(false), Condvar::new()),
        });

        let mut workers = Vec::with_capacity(config.num_workers);
        for index in 0..config.num_workers {
            let worker_shared = shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", config.thread_name, index))
                .spawn(move || worker_shared.worker_loop());
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => log::error!("Failed to spawn job worker {}: {}", index, err),
            }
        }

        log::debug!("Job pool started with {} workers", workers.len());

        Self {
            shared,
            job_counter: AtomicU64::new(0),
            workers,
        }
    }

    /// Get the number of worker threads
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Submit a job to the pool
    pub fn submit<J: Job>(&self, job: J) -> JobHandle {
        let id = self.job_counter.fetch_add(1, Ordering::Relaxed);
        let completed = Arc::new(AtomicBool::new(false));

        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        self.shared.queue.push(JobWrapper {
            job: Box::new(job),
            completed: completed.clone(),
        });

        // Notify workers
        let (lock, cvar) = &self.shared.job_available;
        let mut available = lock.lock();
        *available = true;
        cvar.notify_one();

        JobHandle { completed, id }
    }

    /// Submit a closure as a job
    pub fn submit_fn<F>(&self, name: &'static str, func: F) -> JobHandle
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(ClosureJob { func: Some(func), name })
    }

    /// Run queued jobs on the calling thread, returning how many ran
    pub fn process_jobs(&self, max_jobs: usize) -> usize {
        let mut processed = 0;
        while processed < max_jobs {
            match self.shared.pop() {
                Some(wrapper) => {
                    self.shared.run(wrapper);
                    processed += 1;
                }
                None => break,
            }
        }
        processed
    }

    /// Wait for a job to complete, helping with queued work meanwhile
    pub fn wait_for(&self, handle: &JobHandle) {
        while !handle.is_complete() {
            if self.process_jobs(1) == 0 {
                thread::yield_now();
            }
        }
    }

    /// Wait until no job is queued or running
    pub fn wait_all(&self) {
        while self.pending_jobs() > 0 {
            if self.process_jobs(16) == 0 {
                thread::yield_now();
            }
        }
    }

    /// Number of jobs submitted but not yet finished
    pub fn pending_jobs(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }
}

impl Default for JobPool {
    fn default() -> Self {
        Self::new(JobPoolConfig::default())
    }
}

impl Drop for JobPool {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);

        // Wake up all workers
        {
            let (lock, cvar) = &self.shared.job_available;
            let mut available = lock.lock();
            *available = true;
            cvar.notify_all();
        }

        // Join worker threads
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
