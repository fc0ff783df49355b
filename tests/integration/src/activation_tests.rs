//! Object and adapter activation integration tests

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use common::*;
use futures::future::join_all;
use poa::types::ThreadPolicy;
use poa::{
    AdapterActivator, ObjectId, Poa, PoaConfig, PoaError, Policy, ServantManager, ServantRef,
    same_servant,
};
use tokio::sync::Barrier;

fn activator_adapter(name: &str) -> (Arc<poa::PoaFactory>, Arc<Poa>, Arc<RecordingActivator>) {
    let factory = test_factory();
    let poa = active_child(&factory, name, &activator_policies());
    let activator = RecordingActivator::slow(Duration::from_millis(30));
    poa.set_servant_manager(ServantManager::Activator(activator.clone()))
        .unwrap();
    (factory, poa, activator)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_requests_incarnate_once() {
    const WORKERS: usize = 16;

    init_logging();
    let (_factory, poa, activator) = activator_adapter("contended");
    let barrier = Arc::new(Barrier::new(WORKERS));
    let stats = Arc::new(ConcurrentStats::new());

    let mut handles = Vec::new();
    for _ in 0..WORKERS {
        let poa = poa.clone();
        let barrier = barrier.clone();
        let stats = stats.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            tokio::task::spawn_blocking(move || {
                let start = Instant::now();
                let invocation = poa.resolve(&ObjectId::from("hot"), "op")?;
                stats.record_success(start.elapsed());
                Ok::<ServantRef, PoaError>(invocation.servant().clone())
            })
            .await
            .unwrap()
        }));
    }

    let servants: Vec<ServantRef> = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    println!("\n=== Concurrent Incarnation Results ===");
    println!("Requests: {}", stats.success_count());
    println!("Avg latency: {:?}", stats.avg_latency());
    println!("Max latency: {:?}", stats.max_latency());

    assert_eq!(activator.incarnation_count(), 1);
    assert!(servants.iter().all(|s| same_servant(s, &servants[0])));
    assert_eq!(poa.active_object_count().unwrap(), 1);
    assert_eq!(poa.invocation_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_explicit_activation_rules() {
    let factory = test_factory();
    let poa = active_child(&factory, "explicit", &activator_policies());
    let first = TrackingServant::new();
    let second = TrackingServant::new();

    let id = ObjectId::from("one");
    poa.activate_object_with_id(id.clone(), common::servant(&first))
        .unwrap();

    let again = poa.activate_object_with_id(id.clone(), common::servant(&second));
    assert!(matches!(again, Err(PoaError::ObjectAlreadyActive(_))));

    // UNIQUE_ID: the same servant cannot take a second id
    let twice = poa.activate_object_with_id(ObjectId::from("two"), common::servant(&first));
    assert!(matches!(twice, Err(PoaError::ServantAlreadyActive)));

    assert!(same_servant(
        &poa.id_to_servant(&id).unwrap(),
        &common::servant(&first)
    ));
    assert_eq!(poa.servant_to_id(&common::servant(&first)).unwrap(), id);
    assert_eq!(poa.active_object_count().unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reference_round_trip_through_factory() {
    let factory = test_factory();
    let poa = active_child(&factory, "refs", &[]);
    let servant = TrackingServant::new();
    let id = poa.activate_object(common::servant(&servant)).unwrap();

    let reference = factory
        .id_to_reference(poa.path(), &id, ECHO_TYPE)
        .unwrap();
    assert_eq!(reference.type_id(), ECHO_TYPE);
    assert!(reference.is_transient());

    let bytes = factory.encode_reference(&reference);
    let decoded = factory.decode_reference(&bytes).unwrap();
    let (path, decoded_id) = factory.reference_to_id(&decoded).unwrap();
    assert_eq!(&path, poa.path());
    assert_eq!(decoded_id, id);

    let reply = {
        let factory = factory.clone();
        tokio::task::spawn_blocking(move || {
            let invocation = factory.resolve_reference(&decoded, "op")?;
            futures::executor::block_on(invocation.invoke(Bytes::from_static(b"via ref")))
        })
        .await
        .unwrap()
    };
    assert_eq!(&reply.unwrap()[..], b"via ref");
    assert_eq!(servant.call_count(), 1);

    let other = test_factory_with(PoaConfig::new("elsewhere").with_wait_poll_interval(POLL));
    assert!(matches!(
        other.reference_to_id(&reference),
        Err(PoaError::InvalidReference(_))
    ));
}

struct CountingAdapterActivator {
    runs: AtomicUsize,
}

impl AdapterActivator for CountingAdapterActivator {
    fn unknown_adapter(&self, parent: &Arc<Poa>, name: &str) -> bool {
        self.runs.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(40));
        match parent.create_poa(name, parent.the_manager().ok(), &[]) {
            Ok(child) => child.activate_object(TrackingServant::new()).is_ok(),
            Err(_) => false,
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_lookup_runs_adapter_activator_once() {
    const WORKERS: usize = 8;

    let factory = test_factory();
    let root = active_root(&factory);
    let activator = Arc::new(CountingAdapterActivator {
        runs: AtomicUsize::new(0),
    });
    root.set_adapter_activator(Some(activator.clone()));

    let path = root.path().child("lazy");
    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let factory = factory.clone();
            let path = path.clone();
            tokio::task::spawn_blocking(move || factory.find_poa(&path))
        })
        .collect();

    let found: Vec<Arc<Poa>> = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    assert_eq!(activator.runs.load(Ordering::SeqCst), 1);
    assert!(found.iter().all(|p| Arc::ptr_eq(p, &found[0])));
    assert_eq!(found[0].active_object_count().unwrap(), 1);
    assert!(found[0].state().is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_incarnate_forward_passes_through() {
    let (factory, poa, activator) = activator_adapter("forwarding");
    let target = factory.root_poa().unwrap().create_reference(ECHO_TYPE).unwrap();
    *activator.forward_to.lock() = Some(target.clone());

    let result = {
        let poa = poa.clone();
        tokio::task::spawn_blocking(move || call(&poa, &ObjectId::from("moved"), "op", Bytes::new()))
            .await
            .unwrap()
    };

    match result {
        Err(PoaError::ForwardRequest(reference)) => assert_eq!(*reference, target),
        other => panic!("expected a forward, got {:?}", other),
    }
    // Nothing was left behind for the forwarded id
    assert_eq!(poa.active_object_count().unwrap(), 0);
    assert_eq!(poa.invocation_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_single_thread_adapter_serializes() {
    const WORKERS: usize = 6;

    let factory = test_factory();
    let poa = active_child(
        &factory,
        "serial",
        &[Policy::Thread(ThreadPolicy::SingleThread)],
    );
    let servant = TrackingServant::slow(Duration::from_millis(20));
    let id = poa.activate_object(common::servant(&servant)).unwrap();

    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let poa = poa.clone();
            let id = id.clone();
            tokio::task::spawn_blocking(move || call(&poa, &id, "slow", Bytes::new()))
        })
        .collect();
    for result in join_all(handles).await {
        result.unwrap().unwrap();
    }

    assert_eq!(servant.call_count(), WORKERS as u64);
    assert_eq!(servant.max_concurrent(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_background_etherealization() {
    let factory = test_factory_with(
        PoaConfig::new("background")
            .with_wait_poll_interval(POLL)
            .with_background_etherealization(true),
    );
    let poa = active_child(&factory, "bg", &activator_policies());
    let activator = RecordingActivator::new();
    poa.set_servant_manager(ServantManager::Activator(activator.clone()))
        .unwrap();

    let id = ObjectId::from("short-lived");
    {
        let poa = poa.clone();
        let id = id.clone();
        tokio::task::spawn_blocking(move || {
            call(&poa, &id, "op", Bytes::new())?;
            poa.deactivate_object(&id)
        })
        .await
        .unwrap()
        .unwrap();
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while activator.etherealization_count() == 0 || poa.active_object_count().unwrap() > 0 {
        assert!(Instant::now() < deadline, "object never etherealized");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let etherealized = activator.etherealized.lock().clone();
    assert_eq!(etherealized, vec![(poa.path().to_string(), id.clone())]);

    // A fresh request incarnates again
    {
        let poa = poa.clone();
        tokio::task::spawn_blocking(move || call(&poa, &id, "op", Bytes::new()))
            .await
            .unwrap()
            .unwrap();
    }
    assert_eq!(activator.incarnation_count(), 2);
}
