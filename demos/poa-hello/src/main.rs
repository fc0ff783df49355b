//! POA Hello Server
//!
//! Builds a small adapter tree, registers a servant activator and a default
//! servant, pushes concurrent requests through the adapters, then shuts the
//! tree down with etherealization.
//!
//! Run with: cargo run --bin poa-hello -- --requests 16 --objects 4

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use poa::types::{
    IdAssignmentPolicy, IdUniquenessPolicy, RequestProcessingPolicy, ServantRetentionPolicy,
};
use poa::{
    AdapterPath, CallFuture, ObjectId, Poa, PoaConfig, PoaCurrent, PoaError, PoaFactory, Policy,
    Servant, ServantActivator, ServantManager, ServantRef,
};

const GREETER_TYPE: &str = "IDL:Demo/Greeter:1.0";
const ECHO_TYPE: &str = "IDL:Demo/Echo:1.0";

/// Greets on behalf of whichever object it was incarnated for
struct Greeter {
    calls: AtomicUsize,
}

impl Servant for Greeter {
    fn primary_interface(&self, _id: &ObjectId, _path: &AdapterPath) -> String {
        GREETER_TYPE.to_string()
    }

    fn invoke(&self, operation: &str, args: Bytes) -> CallFuture {
        let current = PoaCurrent::new();
        let reply = match operation {
            "greet" => current.get_object_id().map(|id| {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let name = String::from_utf8_lossy(&args);
                Bytes::from(format!("Hello, {}! ({} speaking)", name, id))
            }),
            other => Err(PoaError::ObjAdapter(format!("unknown operation {}", other))),
        };
        Box::pin(async move { reply })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct GreeterActivator;

impl ServantActivator for GreeterActivator {
    fn incarnate(&self, id: &ObjectId, poa: &Arc<Poa>) -> poa::Result<ServantRef> {
        info!("Incarnating greeter {} in {}", id, poa.path());
        // Simulate loading state
        std::thread::sleep(Duration::from_millis(20));
        Ok(Arc::new(Greeter {
            calls: AtomicUsize::new(0),
        }))
    }

    fn etherealize(
        &self,
        id: &ObjectId,
        poa: &Arc<Poa>,
        servant: ServantRef,
        cleanup_in_progress: bool,
        _remaining_activations: bool,
    ) {
        let calls = servant
            .as_any()
            .downcast_ref::<Greeter>()
            .map_or(0, |g| g.calls.load(Ordering::SeqCst));
        info!(
            "Etherealizing greeter {} in {} after {} calls (cleanup: {})",
            id,
            poa.path(),
            calls,
            cleanup_in_progress
        );
    }
}

/// Default servant answering for every id of the echo adapter
struct Echo;

impl Servant for Echo {
    fn primary_interface(&self, _id: &ObjectId, _path: &AdapterPath) -> String {
        ECHO_TYPE.to_string()
    }

    fn invoke(&self, _operation: &str, args: Bytes) -> CallFuture {
        Box::pin(async move { Ok(args) })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Parser)]
#[command(name = "poa-hello")]
#[command(about = "POA Hello Server")]
struct Args {
    /// Number of requests to dispatch
    #[arg(short, long, default_value = "16")]
    requests: usize,

    /// Number of distinct greeter objects
    #[arg(short, long, default_value = "4")]
    objects: usize,

    /// Server id embedded in references
    #[arg(long)]
    server_id: Option<String>,

    /// Re-check interval for blocked waits, in milliseconds
    #[arg(long, default_value = "100")]
    poll_ms: u64,

    /// Etherealize deactivated objects on a background worker
    #[arg(long)]
    background_etherealization: bool,
}

fn build_tree(factory: &Arc<PoaFactory>) -> poa::Result<(Arc<Poa>, Arc<Poa>)> {
    let root = factory.root_poa()?;
    root.the_manager()?.activate()?;

    let greeters = root.create_poa(
        "greeters",
        None,
        &[
            Policy::RequestProcessing(RequestProcessingPolicy::ServantManager),
            Policy::IdAssignment(IdAssignmentPolicy::User),
        ],
    )?;
    greeters.set_servant_manager(ServantManager::Activator(Arc::new(GreeterActivator)))?;

    let echo = root.create_poa(
        "echo",
        Some(greeters.the_manager()?),
        &[
            Policy::ServantRetention(ServantRetentionPolicy::NonRetain),
            Policy::RequestProcessing(RequestProcessingPolicy::DefaultServant),
            Policy::IdUniqueness(IdUniquenessPolicy::Multiple),
        ],
    )?;
    echo.set_servant(Arc::new(Echo))?;

    greeters.the_manager()?.activate()?;
    Ok((greeters, echo))
}

fn dispatch(
    factory: &Arc<PoaFactory>,
    path: &AdapterPath,
    id: &ObjectId,
    operation: &str,
    args: Bytes,
) -> poa::Result<Bytes> {
    let invocation = factory.resolve(path, id, operation)?;
    let reply = invocation.invoke(args);
    tokio::runtime::Handle::current().block_on(reply)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let mut config = PoaConfig::default()
        .with_wait_poll_interval(Duration::from_millis(args.poll_ms))
        .with_background_etherealization(args.background_etherealization);
    if let Some(server_id) = args.server_id {
        config.server_id = server_id;
    }

    info!("Starting POA Hello Server");
    info!("Server id: {}", config.server_id);
    let factory = PoaFactory::new(config);

    let (greeters, echo) = {
        let factory = factory.clone();
        tokio::task::spawn_blocking(move || build_tree(&factory)).await??
    };
    for adapter in factory.adapters() {
        info!("Adapter {} (manager {})", adapter.path(), adapter.the_manager()?.name());
    }

    let reference = greeters.create_reference_with_id(ObjectId::from("greeter-0"), GREETER_TYPE)?;
    info!("Greeter reference: {}", reference);

    let mut handles = Vec::with_capacity(args.requests);
    for n in 0..args.requests {
        let factory = factory.clone();
        let id = ObjectId::from(format!("greeter-{}", n % args.objects.max(1)));
        let path = greeters.path().clone();
        handles.push(tokio::task::spawn_blocking(move || {
            dispatch(&factory, &path, &id, "greet", Bytes::from(format!("caller {}", n)))
        }));
    }
    for handle in handles {
        match handle.await? {
            Ok(reply) => info!("{}", String::from_utf8_lossy(&reply)),
            Err(e) => warn!("Request failed: {}", e),
        }
    }

    let echoed = {
        let factory = factory.clone();
        let path = echo.path().clone();
        tokio::task::spawn_blocking(move || {
            let id = ObjectId::from("anything");
            dispatch(&factory, &path, &id, "echo", Bytes::from_static(b"ping"))
        })
        .await??
    };
    info!("Echo replied: {}", String::from_utf8_lossy(&echoed));

    let factory_for_shutdown = factory.clone();
    tokio::task::spawn_blocking(move || -> poa::Result<()> {
        let manager = greeters.the_manager()?;
        info!("Deactivating {} with etherealization", manager.name());
        manager.deactivate(true, true)?;
        factory_for_shutdown.shutdown(true)
    })
    .await??;

    info!("Server stopped");
    Ok(())
}
