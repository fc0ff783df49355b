//! Stress Tests - Concurrent Activation at Scale
//!
//! These tests exercise race conditions in the adapter core by:
//! - Resolving and deactivating the same objects from many threads
//! - Admitting invocations while the adapter is being destroyed
//! - Flipping manager states under sustained load
//! - Checking that every counter balances once the load stops

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::future::join_all;
use tokio::sync::Barrier;

use common::*;
use poa::{ObjectId, PoaError, ServantManager};

/// Test: requests and deactivations racing on a small set of ids
/// Every incarnation must be matched by exactly one etherealization
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_resolve_deactivate_storm() {
    init_logging();

    const NUM_WORKERS: usize = 16;
    const REQUESTS_PER_WORKER: usize = 200;
    const NUM_IDS: usize = 4;

    let factory = test_factory();
    let poa = active_child(&factory, "storm", &activator_policies());
    let manager = poa.the_manager().unwrap();
    let activator = RecordingActivator::new();
    poa.set_servant_manager(ServantManager::Activator(activator.clone()))
        .unwrap();

    let stats = Arc::new(ConcurrentStats::new());
    let barrier = Arc::new(Barrier::new(NUM_WORKERS + 1));
    let done = Arc::new(AtomicBool::new(false));

    let mut handles = Vec::new();
    for worker in 0..NUM_WORKERS {
        let poa = poa.clone();
        let stats = stats.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            tokio::task::spawn_blocking(move || {
                for n in 0..REQUESTS_PER_WORKER {
                    let id = ObjectId::from(format!("id{}", (worker + n) % NUM_IDS));
                    let payload = Bytes::from(format!("worker_{}_request_{}", worker, n));
                    let start = Instant::now();
                    match call(&poa, &id, "op", payload.clone()) {
                        Ok(reply) if reply == payload => stats.record_success(start.elapsed()),
                        Ok(_) => {
                            eprintln!("Data mismatch for worker {} request {}", worker, n);
                            stats.record_failure();
                        }
                        Err(e) => {
                            eprintln!("Worker {} request {} failed: {}", worker, n, e);
                            stats.record_failure();
                        }
                    }
                }
            })
            .await
            .unwrap()
        }));
    }

    let deactivator = {
        let poa = poa.clone();
        let barrier = barrier.clone();
        let done = done.clone();
        tokio::spawn(async move {
            barrier.wait().await;
            tokio::task::spawn_blocking(move || {
                let mut deactivations = 0usize;
                let mut n = 0usize;
                while !done.load(Ordering::SeqCst) {
                    let id = ObjectId::from(format!("id{}", n % NUM_IDS));
                    match poa.deactivate_object(&id) {
                        Ok(()) => deactivations += 1,
                        Err(PoaError::ObjectNotActive(_)) => {}
                        Err(e) => panic!("unexpected deactivation failure: {}", e),
                    }
                    n += 1;
                    std::thread::sleep(Duration::from_millis(1));
                }
                deactivations
            })
            .await
            .unwrap()
        })
    };

    let start = Instant::now();
    join_all(handles).await;
    done.store(true, Ordering::SeqCst);
    let deactivations = deactivator.await.unwrap();
    let elapsed = start.elapsed();

    println!("\n=== Resolve/Deactivate Storm Results ===");
    println!("Workers: {}", NUM_WORKERS);
    println!("Successful requests: {}", stats.success_count());
    println!("Failed requests: {}", stats.failure_count());
    println!("Deactivations: {}", deactivations);
    println!("Incarnations: {}", activator.incarnation_count());
    println!("Avg latency: {:?}", stats.avg_latency());
    println!("Max latency: {:?}", stats.max_latency());
    println!("Throughput: {:.2} req/s", stats.success_count() as f64 / elapsed.as_secs_f64());

    assert_eq!(stats.failure_count(), 0);
    assert_eq!(stats.success_count(), (NUM_WORKERS * REQUESTS_PER_WORKER) as u64);
    assert_eq!(poa.invocation_count(), 0);
    assert_eq!(manager.in_flight(), 0);

    // Whatever is still active accounts for the difference
    let active = poa.active_object_count().unwrap();
    assert_eq!(
        activator.incarnation_count(),
        activator.etherealization_count() + active
    );

    {
        let manager = manager.clone();
        tokio::task::spawn_blocking(move || manager.deactivate(true, true))
            .await
            .unwrap()
            .unwrap();
    }
    assert_eq!(activator.incarnation_count(), activator.etherealization_count());
    assert_eq!(poa.active_object_count().unwrap(), 0);
}

/// Test: enter/exit pairs racing with destroy
/// Destruction completes only after every admitted invocation has exited
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_enter_exit_storm_then_destroy() {
    init_logging();

    const NUM_WORKERS: usize = 12;

    let factory = test_factory();
    let poa = active_child(&factory, "churn", &[]);
    let admitted = Arc::new(AtomicUsize::new(0));
    let refused = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..NUM_WORKERS {
        let poa = poa.clone();
        let admitted = admitted.clone();
        let refused = refused.clone();
        handles.push(tokio::task::spawn_blocking(move || loop {
            match poa.enter() {
                Ok(()) => {
                    admitted.fetch_add(1, Ordering::SeqCst);
                    std::thread::yield_now();
                    poa.exit().unwrap();
                }
                Err(PoaError::AdapterDestroyed(_)) => {
                    refused.fetch_add(1, Ordering::SeqCst);
                    break;
                }
                Err(e) => panic!("unexpected admission failure: {}", e),
            }
        }));
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    {
        let poa = poa.clone();
        tokio::task::spawn_blocking(move || poa.destroy(true, true))
            .await
            .unwrap()
            .unwrap();
    }
    for result in join_all(handles).await {
        result.unwrap();
    }

    println!("\n=== Enter/Exit Storm Results ===");
    println!("Admitted: {}", admitted.load(Ordering::SeqCst));
    println!("Refused: {}", refused.load(Ordering::SeqCst));

    assert!(admitted.load(Ordering::SeqCst) > 0);
    assert_eq!(refused.load(Ordering::SeqCst), NUM_WORKERS);
    assert_eq!(poa.invocation_count(), 0);
    assert_eq!(poa.state(), poa::PoaState::Destroyed);
}

/// Test: manager state flapping under load
/// Requests either complete or fail transiently; none is lost or left admitted
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_manager_flapping() {
    init_logging();

    const NUM_WORKERS: usize = 8;
    const REQUESTS_PER_WORKER: usize = 150;

    let factory = test_factory();
    let poa = active_child(&factory, "flapping", &[]);
    let manager = poa.the_manager().unwrap();
    let servant = TrackingServant::new();
    let id = poa.activate_object(common::servant(&servant)).unwrap();

    let stats = Arc::new(ConcurrentStats::new());
    let done = Arc::new(AtomicBool::new(false));

    let mut handles = Vec::new();
    for worker in 0..NUM_WORKERS {
        let poa = poa.clone();
        let id = id.clone();
        let stats = stats.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            for n in 0..REQUESTS_PER_WORKER {
                let start = Instant::now();
                match call(&poa, &id, "op", Bytes::new()) {
                    Ok(_) => stats.record_success(start.elapsed()),
                    Err(e) if e.is_retryable() => stats.record_failure(),
                    Err(e) => panic!("worker {} request {}: {}", worker, n, e),
                }
            }
        }));
    }

    let flapper = {
        let manager = manager.clone();
        let done = done.clone();
        tokio::task::spawn_blocking(move || {
            let mut cycles = 0usize;
            while !done.load(Ordering::SeqCst) {
                manager.hold_requests(false).unwrap();
                std::thread::sleep(Duration::from_millis(2));
                manager.discard_requests(false).unwrap();
                std::thread::sleep(Duration::from_millis(1));
                manager.activate().unwrap();
                std::thread::sleep(Duration::from_millis(3));
                cycles += 1;
            }
            manager.activate().unwrap();
            cycles
        })
    };

    for result in join_all(handles).await {
        result.unwrap();
    }
    done.store(true, Ordering::SeqCst);
    let cycles = flapper.await.unwrap();

    println!("\n=== Manager Flapping Results ===");
    println!("Cycles: {}", cycles);
    println!("Completed: {}", stats.success_count());
    println!("Discarded: {}", stats.failure_count());

    assert_eq!(
        stats.success_count() + stats.failure_count(),
        (NUM_WORKERS * REQUESTS_PER_WORKER) as u64
    );
    assert_eq!(servant.call_count(), stats.success_count());
    assert_eq!(manager.in_flight(), 0);
    assert_eq!(manager.waiting(), 0);
    assert_eq!(poa.invocation_count(), 0);
}
