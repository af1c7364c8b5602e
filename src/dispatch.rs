//! Parallel work dispatch.
//!
//! A counter-based manager for running a pipeline stage across symmetric
//! worker threads; there is no designated main thread. Each stage runs as:
//!
//! ```text
//! // single-threaded
//! manager.reset();
//!
//! // every worker thread
//! manager.init(|| task_count);            // first arrival runs the closure
//! loop {
//!     let (base, count) = manager.get_task_assignment(granule);
//!     if count == 0 { break; }
//!     // ... process tasks base..base+count ...
//!     manager.complete_task_assignment(count);
//! }
//! manager.wait();                          // barrier
//! manager.term(|| { /* first arrival */ });
//! ```
//!
//! Ticket handout is a single relaxed fetch-add and never blocks; the
//! mutex-protected completion count plus the condition variable give
//! `wait()` its happens-before edge, so stage N+1 observes all writes of
//! stage N.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Condvar, Mutex};

struct State {
    init_done: bool,
    term_done: bool,
    done_count: u32,
}

/// A barrier-style coordinator for one pipeline stage at a time.
pub(crate) struct ParallelManager {
    lock: Mutex<State>,
    complete: Condvar,
    start_count: AtomicU32,
    /// Written once by `init` under the lock, then only loaded; keeping it
    /// atomic lets the ticket handout stay lock-free.
    task_count: AtomicU32,
}

impl ParallelManager {
    pub fn new() -> Self {
        ParallelManager {
            lock: Mutex::new(State {
                init_done: false,
                term_done: false,
                done_count: 0,
            }),
            complete: Condvar::new(),
            start_count: AtomicU32::new(0),
            task_count: AtomicU32::new(0),
        }
    }

    /// Resets for a new batch. Must be called from single-threaded code.
    pub fn reset(&mut self) {
        let state = self.lock.get_mut().unwrap();
        state.init_done = false;
        state.term_done = false;
        state.done_count = 0;
        *self.start_count.get_mut() = 0;
        *self.task_count.get_mut() = 0;
    }

    /// Runs the stage initialization exactly once. The first thread to
    /// arrive executes `init_func`, which returns the stage's task count;
    /// later arrivals block until it has finished and see its effects.
    pub fn init(&self, init_func: impl FnOnce() -> u32) {
        let mut state = self.lock.lock().unwrap();
        if !state.init_done {
            self.task_count.store(init_func(), Ordering::Release);
            state.init_done = true;
        }
    }

    /// Requests up to `granule` tasks. Returns `(base, count)`; a zero
    /// count means the stage has no tasks left for this thread.
    ///
    /// This never blocks: one fetch-add on the ticket counter plus a load
    /// of the task count `init` published.
    pub fn get_task_assignment(&self, granule: u32) -> (u32, u32) {
        let base = self.start_count.fetch_add(granule, Ordering::Relaxed);
        let task_count = self.task_count.load(Ordering::Acquire);
        if base >= task_count {
            return (0, 0);
        }
        (base, (task_count - base).min(granule))
    }

    /// Marks `count` tasks as complete, waking all waiters if this was the
    /// last outstanding work.
    pub fn complete_task_assignment(&self, count: u32) {
        let mut state = self.lock.lock().unwrap();
        state.done_count += count;
        if state.done_count == self.task_count.load(Ordering::Relaxed) {
            drop(state);
            self.complete.notify_all();
        }
    }

    /// Blocks until every task of the stage has completed.
    pub fn wait(&self) {
        let state = self.lock.lock().unwrap();
        let _unused = self
            .complete
            .wait_while(state, |s| {
                s.done_count != self.task_count.load(Ordering::Relaxed)
            })
            .unwrap();
    }

    /// Runs the stage termination exactly once, on the first thread to
    /// arrive. Callers must have called [`Self::wait`] first.
    pub fn term(&self, term_func: impl FnOnce()) {
        let mut state = self.lock.lock().unwrap();
        if !state.term_done {
            term_func();
            state.term_done = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn single_threaded_drain() {
        let mut manager = ParallelManager::new();
        manager.reset();
        manager.init(|| 10);

        let mut seen = Vec::new();
        loop {
            let (base, count) = manager.get_task_assignment(3);
            if count == 0 {
                break;
            }
            for t in base..base + count {
                seen.push(t);
            }
            manager.complete_task_assignment(count);
        }
        manager.wait();

        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn every_task_runs_exactly_once_across_threads() {
        const TASKS: u32 = 1000;
        let manager = ParallelManager::new();
        let counters: Vec<AtomicU32> = (0..TASKS).map(|_| AtomicU32::new(0)).collect();
        let init_runs = AtomicU32::new(0);
        let term_runs = AtomicU32::new(0);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    manager.init(|| {
                        init_runs.fetch_add(1, Ordering::Relaxed);
                        TASKS
                    });
                    loop {
                        let (base, count) = manager.get_task_assignment(7);
                        if count == 0 {
                            break;
                        }
                        for t in base..base + count {
                            counters[t as usize].fetch_add(1, Ordering::Relaxed);
                        }
                        manager.complete_task_assignment(count);
                    }
                    manager.wait();
                    manager.term(|| {
                        term_runs.fetch_add(1, Ordering::Relaxed);
                    });
                });
            }
        });

        assert_eq!(init_runs.load(Ordering::Relaxed), 1);
        assert_eq!(term_runs.load(Ordering::Relaxed), 1);
        for (t, counter) in counters.iter().enumerate() {
            assert_eq!(counter.load(Ordering::Relaxed), 1, "task {t}");
        }
    }

    #[test]
    fn wait_is_a_barrier() {
        let manager = ParallelManager::new();
        manager.init(|| 16);
        let done = AtomicU32::new(0);

        std::thread::scope(|scope| {
            for worker in 0..4 {
                let done = &done;
                let manager = &manager;
                scope.spawn(move || {
                    loop {
                        let (base, count) = manager.get_task_assignment(1);
                        if count == 0 {
                            break;
                        }
                        // Uneven task timing exercises the barrier.
                        if (base + worker) % 3 == 0 {
                            std::thread::sleep(std::time::Duration::from_millis(2));
                        }
                        done.fetch_add(count, Ordering::Relaxed);
                        manager.complete_task_assignment(count);
                    }
                    manager.wait();
                    // No thread may leave the barrier with work in flight.
                    assert_eq!(done.load(Ordering::Relaxed), 16);
                });
            }
        });
    }

    #[test]
    fn reset_allows_reuse() {
        let mut manager = ParallelManager::new();
        for round in 0..3 {
            manager.reset();
            manager.init(|| round + 1);
            let mut total = 0;
            loop {
                let (_, count) = manager.get_task_assignment(2);
                if count == 0 {
                    break;
                }
                total += count;
                manager.complete_task_assignment(count);
            }
            manager.wait();
            assert_eq!(total, round + 1);
        }
    }
}
