//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `crosstab_core` linkage and wire a small in-memory demo.
//! - Keep output deterministic for quick local sanity checks.
//!
//! Usage: `crosstab_cli [config.json]`

use crosstab_core::clock::now_epoch_ms;
use crosstab_core::election::{LeaderElection, MemoryStorage};
use crosstab_core::lifecycle::{InitHandle, LifecycleKernel};
use crosstab_core::registry::{Module, ModuleDescriptor, ModuleRegistry, Provider};
use crosstab_core::transport::{ChannelEndpoint, EndpointId, Reply, Transport};
use crosstab_core::{init_logging, RuntimeConfig};
use log::info;
use serde_json::{json, Value};
use std::error::Error;
use std::sync::Arc;

struct Service {
    label: String,
}

impl Module for Service {
    fn initialize(&self, handle: InitHandle) {
        info!("event=demo_init module=cli status=ok name={}", self.label);
        handle.succeed();
    }
}

fn service(name: &str) -> ModuleDescriptor {
    ModuleDescriptor::new(name, |ctx| {
        let prefix = ctx.provider::<String>("label_prefix")?;
        Ok(Service {
            label: format!("{prefix}{}", ctx.module_name()),
        })
    })
}

fn main() -> Result<(), Box<dyn Error>> {
    println!("crosstab_core ping={}", crosstab_core::ping());
    println!("crosstab_core version={}", crosstab_core::core_version());

    let config = match std::env::args().nth(1) {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::default(),
    };
    if let Some(log_dir) = &config.log_dir {
        init_logging(&config.log_level, log_dir)?;
    }

    run_modules(&config)?;
    run_transport(&config)?;
    run_election(&config)?;
    Ok(())
}

fn run_modules(config: &RuntimeConfig) -> Result<(), Box<dyn Error>> {
    let mut registry = ModuleRegistry::new();
    registry.register(
        service("storage"),
        vec![Provider::value("label_prefix", "demo.".to_string())],
    )?;
    registry.register(service("auth").requires("storage"), vec![])?;
    registry.register(
        service("calls").requires("auth").optionally("analytics"),
        vec![],
    )?;
    registry.register(service("analytics").non_blocking(), vec![])?;

    let graph = registry.build()?;
    let mut kernel = LifecycleKernel::with_event_capacity(graph, config.events.kernel_capacity);
    kernel.start();
    println!(
        "modules order={} ready={} blocking={}",
        kernel.graph().construction_order().join(","),
        kernel.is_ready(),
        kernel.blocking_modules().len()
    );
    kernel.teardown();
    Ok(())
}

fn run_transport(config: &RuntimeConfig) -> Result<(), Box<dyn Error>> {
    let mut host =
        Transport::with_context_id("host").with_push_capacity(config.events.push_capacity);
    host.set_handler(|_from: EndpointId, _id: &str, payload: Value| {
        Reply::Ok(json!({ "echo": payload }))
    });

    let mut leaves = Vec::new();
    for name in ["left", "right"] {
        let mut leaf = Transport::with_context_id(name);
        let (leaf_out, to_host) = ChannelEndpoint::pair();
        let (host_out, to_leaf) = ChannelEndpoint::pair();
        let host_side = host.connect(host_out);
        let leaf_side = leaf.connect_upstream(leaf_out);
        leaves.push((leaf, host_side, leaf_side, to_host, to_leaf));
    }

    let (leaf, host_side, leaf_side, to_host, to_leaf) = &mut leaves[0];
    let mut call = leaf.call(json!("hello"))?;
    while let Ok(frame) = to_host.try_recv() {
        host.receive(*host_side, frame);
    }
    while let Ok(frame) = to_leaf.try_recv() {
        leaf.receive(*leaf_side, frame);
    }
    let result = call.try_result().transpose()?.unwrap_or(Value::Null);
    let delivered = host.push(json!({ "event": "demo" }));
    println!("transport call={result} push_delivered={delivered}");
    Ok(())
}

fn run_election(config: &RuntimeConfig) -> Result<(), Box<dyn Error>> {
    let storage = MemoryStorage::new(config.events.storage_capacity);
    let contexts = (0..3)
        .map(|_| LeaderElection::new(Arc::new(storage.clone()), config.election.clone()))
        .collect::<Result<Vec<_>, _>>()?;

    let now = now_epoch_ms();
    for context in &contexts {
        context.tick(now)?;
    }
    for context in &contexts {
        context.pump()?;
    }
    let leaders = contexts.iter().filter(|context| context.check_is_main()).count();
    println!("election contexts={} leaders={leaders}", contexts.len());

    for context in &contexts {
        context.relinquish()?;
    }
    Ok(())
}
