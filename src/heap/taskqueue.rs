//! Work-stealing task queues used by parallel marking.
//!
//! Every worker owns a bounded LIFO deque. Pushes beyond the bound go to a
//! shared overflow queue. Idle workers steal from the overflow queue first
//! and then from randomly chosen siblings.

use std::time::Duration;

use crossbeam_deque::{Injector, Steal, Stealer, Worker};
use parking_lot::{Condvar, Mutex};
use rand::distributions::{Distribution, Uniform};
use rand::thread_rng;

use super::object::Oop;

/// A unit of marking work.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MarkTask {
    /// A marked object whose fields still have to be scanned.
    Oop(Oop),
    /// Elements `[from, to)` of a marked object array.
    PartialArray { array: Oop, from: usize, to: usize },
}

pub struct TaskQueue<T> {
    id: usize,
    local: Worker<T>,
    capacity: usize,
}

impl<T> TaskQueue<T> {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn push(&self, set: &TaskQueueSet<T>, task: T) {
        if self.local.len() >= self.capacity {
            set.overflow.push(task);
        } else {
            self.local.push(task);
        }
    }

    pub fn pop(&self) -> Option<T> {
        self.local.pop()
    }

    pub fn len(&self) -> usize {
        self.local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_empty()
    }
}

pub struct TaskQueueSet<T> {
    stealers: Vec<Stealer<T>>,
    overflow: Injector<T>,
}

impl<T> TaskQueueSet<T> {
    /// Creates the shared half of `n` queues together with their owned halves.
    pub fn new(n: usize, capacity: usize) -> (Self, Vec<TaskQueue<T>>) {
        let queues = (0..n)
            .map(|id| TaskQueue {
                id,
                local: Worker::new_lifo(),
                capacity,
            })
            .collect::<Vec<_>>();
        let stealers = queues.iter().map(|q| q.local.stealer()).collect();
        (
            Self {
                stealers,
                overflow: Injector::new(),
            },
            queues,
        )
    }

    pub fn size(&self) -> usize {
        self.stealers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overflow.is_empty() && self.stealers.iter().all(|s| s.is_empty())
    }

    /// Moves a batch of overflow tasks into `queue` and returns one of them.
    pub fn pop_overflow(&self, queue: &TaskQueue<T>) -> Option<T> {
        loop {
            match self.overflow.steal_batch_and_pop(&queue.local) {
                Steal::Success(task) => return Some(task),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    /// Tries the overflow queue, then random victims.
    pub fn steal(&self, queue: &TaskQueue<T>) -> Option<T> {
        if let Some(task) = self.pop_overflow(queue) {
            return Some(task);
        }
        let n = self.stealers.len();
        if n == 1 {
            return None;
        }

        let mut rng = thread_rng();
        let range = Uniform::new(0, n);

        for _ in 0..2 * n {
            let mut victim = queue.id;
            while victim == queue.id {
                victim = range.sample(&mut rng);
            }

            loop {
                match self.stealers[victim].steal_batch_and_pop(&queue.local) {
                    Steal::Success(task) => return Some(task),
                    Steal::Empty => break,
                    Steal::Retry => continue,
                }
            }
        }

        // random probing can miss the only non-empty queue
        for (victim, stealer) in self.stealers.iter().enumerate() {
            if victim == queue.id {
                continue;
            }
            loop {
                match stealer.steal_batch_and_pop(&queue.local) {
                    Steal::Success(task) => return Some(task),
                    Steal::Empty => break,
                    Steal::Retry => continue,
                }
            }
        }
        None
    }
}

/// Offer/ack termination: a worker with no work offers to terminate and
/// waits. It withdraws its offer as soon as work shows up anywhere. The
/// protocol completes only when all workers are offering at the same time,
/// at which point no worker can produce new tasks.
pub struct TaskTerminator {
    n_threads: usize,
    offered: Mutex<usize>,
    blocker: Condvar,
}

impl TaskTerminator {
    const SPIN_ROUNDS: usize = 64;
    const WAIT: Duration = Duration::from_millis(1);

    pub fn new(n_threads: usize) -> Self {
        assert!(n_threads > 0, "terminator needs at least one thread");
        Self {
            n_threads,
            offered: Mutex::new(0),
            blocker: Condvar::new(),
        }
    }

    pub fn n_threads(&self) -> usize {
        self.n_threads
    }

    /// Returns true when every worker agreed to terminate, false when the
    /// caller should go back looking for work. `has_work` peeks at all queues.
    pub fn offer_termination(&self, has_work: impl Fn() -> bool) -> bool {
        if self.n_threads == 1 {
            return !has_work();
        }

        for _ in 0..Self::SPIN_ROUNDS {
            if has_work() {
                return false;
            }
            std::hint::spin_loop();
        }

        let mut offered = self.offered.lock();
        *offered += 1;
        debug_assert!(*offered <= self.n_threads, "more offers than threads");
        if *offered == self.n_threads {
            self.blocker.notify_all();
            return true;
        }

        loop {
            if *offered == self.n_threads {
                return true;
            }
            if has_work() {
                *offered -= 1;
                return false;
            }
            self.blocker.wait_for(&mut offered, Self::WAIT);
        }
    }
}
