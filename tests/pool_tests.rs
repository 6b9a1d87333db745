use genpool::{JobPool, PoolConfig, SubmitFlags};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

fn test_pool(threads: usize, max_jobs: usize) -> JobPool {
    JobPool::new(PoolConfig {
        threads,
        queue_capacity: 256,
        max_jobs,
        disable_io_thread: true,
        ..PoolConfig::default()
    })
    .expect("pool creation failed")
}

fn bump(_payload: *const u8, ctx: *mut ()) {
    let counter = unsafe { &*(ctx as *const AtomicUsize) };
    counter.fetch_add(1, Ordering::SeqCst);
}

fn sum_payload(payload: *const u8, ctx: *mut ()) {
    let bytes = unsafe { std::slice::from_raw_parts(payload, 5) };
    let out = unsafe { &*(ctx as *const AtomicUsize) };
    out.store(bytes.iter().map(|b| *b as usize).sum(), Ordering::SeqCst);
}

#[test]
fn test_pool_creation() {
    let pool = test_pool(4, 64);
    assert_eq!(pool.num_workers(), 4);
    assert_eq!(pool.active_jobs(), 0);
    pool.shutdown().expect("shutdown failed");
}

#[test]
fn test_many_jobs_all_complete() {
    let pool = test_pool(4, 256);
    let counter = AtomicUsize::new(0);
    let ctx = &counter as *const AtomicUsize as *mut ();

    let num_jobs = 200;
    let mut ids = Vec::new();
    for _ in 0..num_jobs {
        let id = pool.submit(bump, &[], ctx, SubmitFlags::NONE);
        assert!(id.is_valid());
        ids.push(id);
    }
    for id in ids {
        assert!(pool.wait_for_job(id));
    }
    assert_eq!(counter.load(Ordering::SeqCst), num_jobs);
    pool.shutdown().expect("shutdown failed");
}

#[test]
fn test_inline_payload_reaches_job() {
    let pool = test_pool(2, 64);
    let out = AtomicUsize::new(0);
    let id = pool.submit(
        sum_payload,
        &[1, 2, 3, 4, 5],
        &out as *const AtomicUsize as *mut (),
        SubmitFlags::NONE,
    );
    assert!(pool.wait_for_job(id));
    assert_eq!(out.load(Ordering::SeqCst), 15);
    pool.shutdown().expect("shutdown failed");
}

#[test]
fn test_large_payload_copied_to_heap() {
    let pool = test_pool(2, 64);
    // 200 bytes exceeds the 64-byte inline buffer.
    let payload: Vec<u8> = (0..200u8).map(|b| b % 7).collect();
    let out = AtomicUsize::new(0);

    fn sum200(payload: *const u8, ctx: *mut ()) {
        let bytes = unsafe { std::slice::from_raw_parts(payload, 200) };
        let out = unsafe { &*(ctx as *const AtomicUsize) };
        out.store(bytes.iter().map(|b| *b as usize).sum(), Ordering::SeqCst);
    }

    let expected: usize = payload.iter().map(|b| *b as usize).sum();
    let id = pool.submit(
        sum200,
        &payload,
        &out as *const AtomicUsize as *mut (),
        SubmitFlags::NONE,
    );
    drop(payload); // the pool owns its copy
    assert!(pool.wait_for_job(id));
    assert_eq!(out.load(Ordering::SeqCst), expected);
    pool.shutdown().expect("shutdown failed");
}

#[test]
fn test_wait_for_all_jobs_idle_barrier() {
    let pool = test_pool(4, 256);
    let counter = AtomicUsize::new(0);
    let ctx = &counter as *const AtomicUsize as *mut ();
    for _ in 0..100 {
        pool.submit(bump, &[], ctx, SubmitFlags::NONE);
    }
    pool.wait_for_all_jobs().expect("wait_for_all failed");
    assert_eq!(pool.active_jobs(), 0);
    assert_eq!(counter.load(Ordering::SeqCst), 100);

    // No further completions happen until new work arrives.
    let completed = pool.metrics().jobs_completed;
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(pool.metrics().jobs_completed, completed);
    pool.shutdown().expect("shutdown failed");
}

#[test]
fn test_stale_handle_resolves_instantly() {
    // One slot forces every submission to recycle the same record.
    let pool = test_pool(1, 1);
    let counter = AtomicUsize::new(0);
    let ctx = &counter as *const AtomicUsize as *mut ();

    let first = pool.submit(bump, &[], ctx, SubmitFlags::NONE);
    assert!(first.is_valid());
    assert!(pool.wait_for_job(first));

    // Reuse the slot under a new generation.
    let mut second = genpool::JobId::INVALID;
    for _ in 0..100 {
        second = pool.submit(bump, &[], ctx, SubmitFlags::NONE);
        if second.is_valid() {
            break;
        }
        // The slot frees asynchronously after completion.
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(second.is_valid());
    assert_eq!(second.slot(), first.slot());
    assert_ne!(second.generation(), first.generation());

    // The stale handle must not block on the unrelated second job.
    let start = Instant::now();
    assert!(pool.wait_for_job(first));
    assert!(start.elapsed() < Duration::from_millis(100));
    assert!(pool.wait_for_job(second));
    pool.shutdown().expect("shutdown failed");
}

#[test]
fn test_metrics_and_latency() {
    let pool = test_pool(2, 64);
    let counter = AtomicUsize::new(0);
    let ctx = &counter as *const AtomicUsize as *mut ();
    for _ in 0..20 {
        pool.submit(bump, &[], ctx, SubmitFlags::NONE);
    }
    pool.wait_for_all_jobs().unwrap();
    let snap = pool.metrics();
    assert_eq!(snap.jobs_submitted, 20);
    assert_eq!(snap.jobs_completed, 20);
    assert!(snap.max_latency > Duration::ZERO);
    assert!(snap.max_latency >= snap.avg_latency);
    pool.shutdown().expect("shutdown failed");
}

#[test]
fn test_priority_queue_depths() {
    let pool = test_pool(1, 64);
    // With no work the rings are empty.
    assert_eq!(pool.queue_depths(), (0, 0));
    pool.shutdown().expect("shutdown failed");
}

#[test]
fn test_wait_for_all_from_worker_is_violation() {
    struct Ctx {
        pool: *const JobPool,
        violation: AtomicUsize,
    }

    fn call_wait(_payload: *const u8, ctx: *mut ()) {
        let ctx = unsafe { &*(ctx as *const Ctx) };
        let pool = unsafe { &*ctx.pool };
        if matches!(
            pool.wait_for_all_jobs(),
            Err(genpool::PoolError::ThreadViolation)
        ) {
            ctx.violation.store(1, Ordering::SeqCst);
        }
    }

    let pool = test_pool(1, 16);
    let ctx = Ctx {
        pool: &pool,
        violation: AtomicUsize::new(0),
    };
    let id = pool.submit(
        call_wait,
        &[],
        &ctx as *const Ctx as *mut (),
        SubmitFlags::NONE,
    );
    assert!(pool.wait_for_job(id));
    assert_eq!(ctx.violation.load(Ordering::SeqCst), 1);
    pool.shutdown().expect("shutdown failed");
}

#[test]
fn test_dump_task_graph_json_while_busy() {
    let pool = test_pool(1, 16);
    let gate = AtomicUsize::new(0);

    fn wait_gate(_payload: *const u8, ctx: *mut ()) {
        let gate = unsafe { &*(ctx as *const AtomicUsize) };
        while gate.load(Ordering::SeqCst) == 0 {
            std::thread::yield_now();
        }
    }

    let id = pool.submit(
        wait_gate,
        &[],
        &gate as *const AtomicUsize as *mut (),
        SubmitFlags::HIGH_PRIORITY,
    );
    assert!(id.is_valid());

    let mut buf = Vec::new();
    pool.dump_task_graph(&mut buf, true).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();
    assert!(value["active_jobs"].as_u64().unwrap() >= 1);

    gate.store(1, Ordering::SeqCst);
    assert!(pool.wait_for_job(id));
    pool.shutdown().expect("shutdown failed");
}
