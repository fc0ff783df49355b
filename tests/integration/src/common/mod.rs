//! Shared fixtures for the integration tests
//!
//! Servants, servant managers and adapter builders used by several test
//! targets, plus latency statistics for the stress tests.

#![allow(dead_code)]

use std::any::Any;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use poa::types::{IdAssignmentPolicy, RequestProcessingPolicy};
use poa::{
    AdapterPath, CallFuture, ObjectId, Poa, PoaConfig, PoaError, PoaFactory, Policy, Result,
    Servant, ServantActivator, ServantLocator, ServantRef,
};

pub const ECHO_TYPE: &str = "IDL:Test/Echo:1.0";
pub const POLL: Duration = Duration::from_millis(5);

static INIT: Once = Once::new();

/// Install a test subscriber once per test binary; `RUST_LOG` overrides the
/// default `warn` level
pub fn init_logging() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Factory with a short wait interval and a fixed server id
pub fn test_factory() -> Arc<PoaFactory> {
    test_factory_with(PoaConfig::new("integration").with_wait_poll_interval(POLL))
}

pub fn test_factory_with(config: PoaConfig) -> Arc<PoaFactory> {
    init_logging();
    PoaFactory::new(config)
}

/// Root adapter with its manager active
pub fn active_root(factory: &Arc<PoaFactory>) -> Arc<Poa> {
    let root = factory.root_poa().unwrap();
    root.the_manager().unwrap().activate().unwrap();
    root
}

/// Child of the root adapter with its own, active manager
pub fn active_child(factory: &Arc<PoaFactory>, name: &str, policies: &[Policy]) -> Arc<Poa> {
    let root = active_root(factory);
    let poa = root.create_poa(name, None, policies).unwrap();
    poa.the_manager().unwrap().activate().unwrap();
    poa
}

/// RETAIN + USE_SERVANT_MANAGER + USER_ID
pub fn activator_policies() -> Vec<Policy> {
    vec![
        Policy::RequestProcessing(RequestProcessingPolicy::ServantManager),
        Policy::IdAssignment(IdAssignmentPolicy::User),
    ]
}

/// Resolve and run one request on the calling thread
pub fn call(poa: &Arc<Poa>, id: &ObjectId, operation: &str, args: Bytes) -> Result<Bytes> {
    let invocation = poa.resolve(id, operation)?;
    futures::executor::block_on(invocation.invoke(args))
}

/// Servant echoing its arguments, tracking concurrent calls
#[derive(Default)]
pub struct TrackingServant {
    pub calls: AtomicU64,
    pub in_call: AtomicUsize,
    pub max_concurrent: AtomicUsize,
    /// Time spent inside each "slow" call
    pub delay: Duration,
}

impl TrackingServant {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }
}

impl Servant for TrackingServant {
    fn primary_interface(&self, _id: &ObjectId, _path: &AdapterPath) -> String {
        ECHO_TYPE.to_string()
    }

    fn invoke(&self, operation: &str, args: Bytes) -> CallFuture {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_call.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(current, Ordering::SeqCst);
        // The work happens here, while the invocation is admitted
        if operation == "slow" {
            std::thread::sleep(self.delay);
        }
        self.in_call.fetch_sub(1, Ordering::SeqCst);
        Box::pin(async move { Ok(args) })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Coerce a tracking servant to a servant handle
pub fn servant(tracking: &Arc<TrackingServant>) -> ServantRef {
    tracking.clone()
}

/// Servant activator recording every upcall
#[derive(Default)]
pub struct RecordingActivator {
    pub incarnations: AtomicUsize,
    /// `(adapter path, id)` in etherealization order
    pub etherealized: Mutex<Vec<(String, ObjectId)>>,
    /// Delay inside `incarnate`
    pub delay: Duration,
    /// When set, `incarnate` forwards every request here
    pub forward_to: Mutex<Option<poa::ObjectReference>>,
}

impl RecordingActivator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    pub fn incarnation_count(&self) -> usize {
        self.incarnations.load(Ordering::SeqCst)
    }

    pub fn etherealization_count(&self) -> usize {
        self.etherealized.lock().len()
    }
}

impl ServantActivator for RecordingActivator {
    fn incarnate(&self, _id: &ObjectId, _poa: &Arc<Poa>) -> Result<ServantRef> {
        if let Some(reference) = self.forward_to.lock().clone() {
            return Err(PoaError::forward(reference));
        }
        self.incarnations.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        Ok(TrackingServant::new())
    }

    fn etherealize(
        &self,
        id: &ObjectId,
        poa: &Arc<Poa>,
        _servant: ServantRef,
        _cleanup_in_progress: bool,
        _remaining_activations: bool,
    ) {
        self.etherealized
            .lock()
            .push((poa.path().to_string(), id.clone()));
    }
}

/// Servant locator counting `preinvoke`/`postinvoke` pairs
#[derive(Default)]
pub struct PairingLocator {
    pub preinvokes: AtomicUsize,
    pub postinvokes: AtomicUsize,
}

impl ServantLocator for PairingLocator {
    fn preinvoke(
        &self,
        _id: &ObjectId,
        _poa: &Arc<Poa>,
        operation: &str,
    ) -> Result<(ServantRef, poa::Cookie)> {
        self.preinvokes.fetch_add(1, Ordering::SeqCst);
        Ok((TrackingServant::new(), Box::new(operation.to_string())))
    }

    fn postinvoke(
        &self,
        _id: &ObjectId,
        _poa: &Arc<Poa>,
        operation: &str,
        cookie: poa::Cookie,
        _servant: ServantRef,
    ) {
        // The cookie must be the one handed out for this request
        if cookie.downcast_ref::<String>().map(String::as_str) == Some(operation) {
            self.postinvokes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Latency statistics shared by concurrent workers
pub struct ConcurrentStats {
    success: AtomicU64,
    failure: AtomicU64,
    latencies: Mutex<Vec<Duration>>,
}

impl ConcurrentStats {
    pub fn new() -> Self {
        Self {
            success: AtomicU64::new(0),
            failure: AtomicU64::new(0),
            latencies: Mutex::new(Vec::new()),
        }
    }

    pub fn record_success(&self, latency: Duration) {
        self.success.fetch_add(1, Ordering::Relaxed);
        self.latencies.lock().push(latency);
    }

    pub fn record_failure(&self) {
        self.failure.fetch_add(1, Ordering::Relaxed);
    }

    pub fn success_count(&self) -> u64 {
        self.success.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> u64 {
        self.failure.load(Ordering::Relaxed)
    }

    pub fn avg_latency(&self) -> Duration {
        let latencies = self.latencies.lock();
        if latencies.is_empty() {
            return Duration::ZERO;
        }
        latencies.iter().sum::<Duration>() / latencies.len() as u32
    }

    pub fn max_latency(&self) -> Duration {
        self.latencies.lock().iter().max().copied().unwrap_or_default()
    }
}

/// Outcome of one test category run by the harness
#[derive(Debug, Clone)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub duration: Duration,
    pub details: String,
}

/// Collected results of a harness run
#[derive(Debug, Default)]
pub struct TestSuiteResults {
    pub results: Vec<TestResult>,
}

impl TestSuiteResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, result: TestResult) {
        self.results.push(result);
    }

    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.passed()
    }

    pub fn total_duration(&self) -> Duration {
        self.results.iter().map(|r| r.duration).sum()
    }
}
