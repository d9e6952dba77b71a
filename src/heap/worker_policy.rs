use once_cell::sync::Lazy;

const GC_WORKERS_PER_MUTATOR: usize = 2;
const MIN_DYNAMIC_WORKERS: usize = 2;

static ERGONOMIC_WORKER_THREADS: Lazy<usize> =
    Lazy::new(|| WorkerPolicy::nof_parallel_worker_threads(5, 8, 8, num_cpus::get()));

pub struct WorkerPolicy;

impl WorkerPolicy {
    fn nof_parallel_worker_threads(num: usize, den: usize, switch_pt: usize, ncpus: usize) -> usize {
        // For very large machines, there are diminishing returns
        // for large numbers of worker threads. Instead of
        // hogging the whole system, use a fraction of the workers for every
        // processor after the first 8. For example, on a 72 cpu machine
        // and a chosen fraction of 5/8
        // use 8 + (72 - 8) * (5/8) == 48 worker threads.
        #[allow(unused_mut)]
        let mut threads = if ncpus <= switch_pt {
            ncpus
        } else {
            switch_pt + ((ncpus - switch_pt) * num) / den
        };

        #[cfg(target_pointer_width = "32")]
        {
            // Do not use up address space with too many threads on 32-bit targets.
            threads = threads.min(2 * switch_pt);
        }

        threads.max(1)
    }

    /// Size of the worker pool. `parallel_gc_threads == 0` derives it from
    /// the number of CPUs.
    pub fn parallel_worker_threads(parallel_gc_threads: usize) -> usize {
        if parallel_gc_threads != 0 {
            parallel_gc_threads
        } else {
            *ERGONOMIC_WORKER_THREADS
        }
    }

    /// Number of workers for the next collection when the count is chosen
    /// dynamically: the larger of what the mutator count and the heap size
    /// ask for, never fewer than were active last time.
    pub fn calc_default_active_workers(
        total_workers: usize,
        prev_active_workers: usize,
        application_workers: usize,
        capacity: usize,
        heap_size_per_gc_thread: usize,
    ) -> usize {
        let active_workers_by_mt = (GC_WORKERS_PER_MUTATOR * application_workers).max(MIN_DYNAMIC_WORKERS);
        let active_workers_by_heap_size = MIN_DYNAMIC_WORKERS.max(capacity / heap_size_per_gc_thread.max(1));

        let max_active_workers = active_workers_by_mt.max(active_workers_by_heap_size);
        let mut new_active_workers = max_active_workers.min(total_workers);

        // Increase GC workers instead of decreasing.
        if new_active_workers < prev_active_workers {
            new_active_workers = MIN_DYNAMIC_WORKERS.max(prev_active_workers);
        }
        new_active_workers = new_active_workers.min(total_workers).max(1);

        log::trace!(
            target: "gc-task",
            "WorkerPolicy::calc_default_active_workers() : active_workers(): {} new_active_workers: {} prev_active_workers: {} active_workers_by_mt: {} active_workers_by_heap_size: {}",
            new_active_workers,
            new_active_workers,
            prev_active_workers,
            active_workers_by_mt,
            active_workers_by_heap_size
        );
        new_active_workers
    }

    /// Workers worth starting for a heap where `regions` regions are at most
    /// `heap_waste_percent` wasted.
    pub fn calc_heap_waste_worker_limit(regions: usize, heap_waste_percent: usize) -> usize {
        // Each worker leaves half a region of waste behind on average.
        (regions * heap_waste_percent / 100 * 2).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ergonomic_thread_count() {
        assert_eq!(WorkerPolicy::nof_parallel_worker_threads(5, 8, 8, 4), 4);
        assert_eq!(WorkerPolicy::nof_parallel_worker_threads(5, 8, 8, 8), 8);
        assert_eq!(WorkerPolicy::nof_parallel_worker_threads(5, 8, 8, 72), 48);
        assert_eq!(WorkerPolicy::parallel_worker_threads(3), 3);
        assert!(WorkerPolicy::parallel_worker_threads(0) >= 1);
    }

    #[test]
    fn dynamic_workers_grow_monotonically() {
        let mb = 1024 * 1024;
        // Tiny heap and a single mutator still gets two workers.
        assert_eq!(WorkerPolicy::calc_default_active_workers(8, 1, 1, 16 * mb, 41 * mb), 2);
        // Heap size drives the count.
        assert_eq!(WorkerPolicy::calc_default_active_workers(8, 1, 1, 200 * mb, 40 * mb), 5);
        // Never more than the pool holds, never less than last time.
        assert_eq!(WorkerPolicy::calc_default_active_workers(4, 1, 16, 16 * mb, 40 * mb), 4);
        assert_eq!(WorkerPolicy::calc_default_active_workers(8, 6, 1, 16 * mb, 40 * mb), 6);
    }

    #[test]
    fn heap_waste_limit() {
        assert_eq!(WorkerPolicy::calc_heap_waste_worker_limit(16, 5), 1);
        assert_eq!(WorkerPolicy::calc_heap_waste_worker_limit(100, 5), 10);
        // 1.5 regions of waste round down before doubling
        assert_eq!(WorkerPolicy::calc_heap_waste_worker_limit(30, 5), 2);
    }
}
