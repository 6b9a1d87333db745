use genpool::{JobPool, PoolConfig};
use std::sync::atomic::{AtomicUsize, Ordering};

fn test_pool(threads: usize) -> JobPool {
    JobPool::new(PoolConfig {
        threads,
        queue_capacity: 256,
        max_jobs: 256,
        disable_io_thread: true,
        ..PoolConfig::default()
    })
    .expect("pool creation failed")
}

#[test]
fn test_every_index_visited_exactly_once() {
    let pool = test_pool(4);
    let count = 10_000;
    let hits: Vec<AtomicUsize> = (0..count).map(|_| AtomicUsize::new(0)).collect();

    pool.dispatch_parallel(count, 64, |index| {
        hits[index].fetch_add(1, Ordering::SeqCst);
    });

    for (index, hit) in hits.iter().enumerate() {
        assert_eq!(hit.load(Ordering::SeqCst), 1, "index {index}");
    }
    pool.shutdown().expect("shutdown failed");
}

#[test]
fn test_parallel_sum() {
    let pool = test_pool(4);
    let count = 10_000;
    let total = AtomicUsize::new(0);

    pool.dispatch_parallel(count, 100, |index| {
        total.fetch_add(index, Ordering::Relaxed);
    });

    assert_eq!(total.load(Ordering::SeqCst), count * (count - 1) / 2);
    pool.shutdown().expect("shutdown failed");
}

#[test]
fn test_nested_dispatch_from_workers() {
    // The outer closures run on workers; each calls back into the pool.
    // Workers help-execute chunks instead of blocking, so this must not
    // deadlock even on a small pool.
    let pool = test_pool(2);
    let total = AtomicUsize::new(0);

    pool.dispatch_parallel(8, 1, |_outer| {
        pool.dispatch_parallel(100, 10, |inner| {
            total.fetch_add(inner, Ordering::Relaxed);
        });
    });

    assert_eq!(total.load(Ordering::SeqCst), 8 * (100 * 99 / 2));
    pool.shutdown().expect("shutdown failed");
}

#[test]
fn test_repeated_dispatch_reuses_stack_barrier() {
    // Each call puts a fresh latch and chunk descriptors on this thread's
    // stack; churning through many short dispatches (including nested ones
    // exercising the help-execute wait path) shakes out any signaler still
    // touching a torn-down barrier.
    let pool = test_pool(4);
    let total = AtomicUsize::new(0);

    for _ in 0..500 {
        pool.dispatch_parallel(16, 1, |index| {
            total.fetch_add(index, Ordering::Relaxed);
        });
    }
    pool.dispatch_parallel(8, 1, |_| {
        for _ in 0..50 {
            pool.dispatch_parallel(16, 1, |index| {
                total.fetch_add(index, Ordering::Relaxed);
            });
        }
    });

    let per_call = 16 * 15 / 2;
    assert_eq!(total.load(Ordering::SeqCst), (500 + 8 * 50) * per_call);
    pool.shutdown().expect("shutdown failed");
}

#[test]
fn test_single_thread_pool_dispatch() {
    let pool = test_pool(1);
    let count = 1_000;
    let total = AtomicUsize::new(0);

    pool.dispatch_parallel(count, 10, |index| {
        total.fetch_add(index, Ordering::Relaxed);
    });

    assert_eq!(total.load(Ordering::SeqCst), count * (count - 1) / 2);
    pool.shutdown().expect("shutdown failed");
}
