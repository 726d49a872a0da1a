//! Fixed, lazily-created worker pool executing a data-parallel `parallel_for`
//! over an integer range.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, Once};
use std::thread::JoinHandle;

const MAX_WORKERS: usize = 8;

struct RawJob {
    ptr: *const (dyn Fn(usize) + Sync),
}

// SAFETY: `RawJob` is only ever dereferenced by a worker thread while the
// `parallel_for` call that installed it is still blocked waiting for
// completion, so the pointee always outlives every use.
unsafe impl Send for RawJob {}
unsafe impl Sync for RawJob {}

struct SharedState {
    job: Option<RawJob>,
    n: usize,
    next: usize,
    completed: usize,
    generation: u64,
}

struct Shared {
    state: Mutex<SharedState>,
    work_cv: Condvar,
    done_cv: Condvar,
    shutdown: AtomicBool,
}

/// A fixed-size pool of worker threads created on first use and joined on
/// [`WorkerPool::shutdown`].
pub struct WorkerPool {
    shared: std::sync::Arc<Shared>,
    call_guard: Mutex<()>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    spawn_once: Once,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self {
            shared: std::sync::Arc::new(Shared {
                state: Mutex::new(SharedState {
                    job: None,
                    n: 0,
                    next: 0,
                    completed: 0,
                    generation: 0,
                }),
                work_cv: Condvar::new(),
                done_cv: Condvar::new(),
                shutdown: AtomicBool::new(false),
            }),
            call_guard: Mutex::new(()),
            workers: Mutex::new(Vec::new()),
            spawn_once: Once::new(),
        }
    }

    fn worker_count() -> usize {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        (cores / 2).clamp(1, MAX_WORKERS)
    }

    fn ensure_workers(&self) {
        self.spawn_once.call_once(|| {
            let count = Self::worker_count();
            tracing::debug!(target: "pool", workers = count, "worker_pool_started");
            let mut workers = self.workers.lock().unwrap();
            for _ in 0..count {
                let shared = self.shared.clone();
                workers.push(std::thread::spawn(move || worker_loop(shared)));
            }
        });
    }

    /// Invoke `f(i)` for each `i` in `[0, n)`, blocking until all complete.
    /// At-most-once invocation per index; no ordering guarantee across
    /// indices; `f` may run concurrently. Only one `parallel_for` call is
    /// in flight at a time -- concurrent callers serialise on the pool lock.
    pub fn parallel_for<F>(&self, n: usize, f: F)
    where
        F: Fn(usize) + Sync,
    {
        if n == 0 {
            return;
        }
        self.ensure_workers();
        let _call_guard = self.call_guard.lock().unwrap();

        let f_ref: &(dyn Fn(usize) + Sync) = &f;
        // SAFETY: the pointer is cleared from shared state, and this
        // function does not return, until `completed == n`, so no worker
        // observes it after `f` (and this stack frame) is gone.
        let f_static: &'static (dyn Fn(usize) + Sync) =
            unsafe { std::mem::transmute(f_ref) };

        {
            let mut state = self.shared.state.lock().unwrap();
            state.job = Some(RawJob {
                ptr: f_static as *const _,
            });
            state.n = n;
            state.next = 0;
            state.completed = 0;
            state.generation = state.generation.wrapping_add(1);
        }
        self.shared.work_cv.notify_all();

        let mut state = self.shared.state.lock().unwrap();
        while state.completed < n {
            state = self.shared.done_cv.wait(state).unwrap();
        }
        state.job = None;
    }

    /// Signal shutdown and join every worker thread.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.work_cv.notify_all();
        let mut workers = self.workers.lock().unwrap();
        let count = workers.len();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
        if count > 0 {
            tracing::debug!(target: "pool", workers = count, "worker_pool_joined");
        }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: std::sync::Arc<Shared>) {
    loop {
        let (job, idx) = {
            let mut state = shared.state.lock().unwrap();
            loop {
                if shared.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                if let Some(job) = &state.job {
                    if state.next < state.n {
                        let idx = state.next;
                        state.next += 1;
                        break (job.ptr, idx);
                    }
                }
                state = shared.work_cv.wait(state).unwrap();
            }
        };

        // SAFETY: see `RawJob`.
        let f: &(dyn Fn(usize) + Sync) = unsafe { &*job };
        f(idx);

        let mut state = shared.state.lock().unwrap();
        state.completed += 1;
        if state.completed == state.n {
            shared.done_cv.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn zero_iterations_never_invokes_fn() {
        let pool = WorkerPool::new();
        let called = AtomicUsize::new(0);
        pool.parallel_for(0, |_| {
            called.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn single_iteration_invokes_once_with_index_zero() {
        let pool = WorkerPool::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        pool.parallel_for(1, move |i| {
            seen2.lock().unwrap().push(i);
        });
        assert_eq!(*seen.lock().unwrap(), vec![0]);
    }

    #[test]
    fn every_index_invoked_exactly_once() {
        let pool = WorkerPool::new();
        let hits = Arc::new((0..256).map(|_| AtomicUsize::new(0)).collect::<Vec<_>>());
        let hits2 = hits.clone();
        pool.parallel_for(256, move |i| {
            hits2[i].fetch_add(1, Ordering::SeqCst);
        });
        assert!(hits.iter().all(|c| c.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn sequential_calls_reuse_the_same_pool() {
        let pool = WorkerPool::new();
        let total = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let total2 = total.clone();
            pool.parallel_for(32, move |_| {
                total2.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(total.load(Ordering::SeqCst), 160);
    }
}
