use crossbeam::queue::SegQueue;
use std::fmt::Debug;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};
use threadpool::ThreadPool;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Completion of one dispatched batch of jobs.
#[derive(Debug, Clone)]
pub struct Signal {
    remaining: Arc<AtomicUsize>,
}

impl Signal {
    fn new(jobs: usize) -> Self {
        Self {
            remaining: Arc::new(AtomicUsize::new(jobs)),
        }
    }

    pub fn finished(&self) -> bool {
        self.remaining.load(Ordering::Acquire) == 0
    }

    pub fn wait(&self) {
        while !self.finished() {
            std::thread::yield_now();
        }
    }
}

/// Held by a running job, counts the batch down when dropped.
/// Dropping also happens while unwinding, so a panicking job does not leave
/// the batch waiting forever.
#[derive(Debug)]
struct Finish {
    remaining: Arc<AtomicUsize>,
}

impl Drop for Finish {
    fn drop(&mut self) {
        self.remaining.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Shared worker threads.
/// Jobs are queued with [`WorkerPool::schedule`] and do not start until
/// [`WorkerPool::wake_all`] releases them to the threads.
pub struct WorkerPool {
    executor: Mutex<ThreadPool>,
    pending: SegQueue<Job>,
    threads: usize,
}

impl Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(num_cpus::get())
    }
}

impl WorkerPool {
    pub fn new(nr_threads: usize) -> Self {
        let threads = nr_threads.max(1);
        Self {
            executor: Mutex::new(ThreadPool::new(threads)),
            pending: SegQueue::new(),
            threads,
        }
    }

    pub fn thread_count(&self) -> usize {
        self.threads
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Queues a job. Never blocks and never runs the job on the calling thread.
    pub fn schedule<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.pending.push(Box::new(job));
    }

    /// Hands every queued job to the worker threads.
    /// The returned signal finishes once this batch has run.
    pub fn wake_all(&self) -> Signal {
        let mut jobs = Vec::with_capacity(self.pending.len());
        while let Some(job) = self.pending.pop() {
            jobs.push(job);
        }

        let signal = Signal::new(jobs.len());
        if jobs.is_empty() {
            return signal;
        }

        let executor = match self.executor.lock() {
            Ok(executor) => executor,
            Err(poisoned) => poisoned.into_inner(),
        };

        for job in jobs {
            let finish = Finish {
                remaining: signal.remaining.clone(),
            };
            executor.execute(move || {
                let _finish = finish;
                job();
            });
        }

        signal
    }

    /// Blocks until every job handed to the threads has completed.
    /// Jobs still waiting for [`WorkerPool::wake_all`] are not waited on.
    pub fn wait_idle(&self) {
        let executor = match self.executor.lock() {
            Ok(executor) => executor.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        executor.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduled_jobs_wait_for_wake() {
        let pool = WorkerPool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let counter = counter.clone();
            pool.schedule(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(pool.pending_count(), 8);

        let signal = pool.wake_all();
        signal.wait();
        assert!(signal.finished());
        assert_eq!(counter.load(Ordering::SeqCst), 8);
        assert_eq!(pool.pending_count(), 0);
    }

    #[test]
    fn empty_wake_is_finished() {
        let pool = WorkerPool::new(1);
        assert!(pool.wake_all().finished());
    }

    #[test]
    fn wait_idle_drains_running_jobs() {
        let pool = WorkerPool::default();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let counter = counter.clone();
            pool.schedule(move || {
                std::thread::sleep(std::time::Duration::from_millis(5));
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.wake_all();
        pool.wait_idle();

        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }
}
