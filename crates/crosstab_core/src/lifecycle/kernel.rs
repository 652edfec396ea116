//! Module lifecycle kernel.
//!
//! # Responsibility
//! - Drive every module through `pending -> initializing -> ready | error`.
//! - Re-evaluate readiness after every status change and cascade
//!   invalidation to modules that require a module leaving `ready`.
//! - Expose aggregate readiness and status change notifications to the host.
//!
//! # Invariants
//! - Only the kernel writes statuses into the shared state container.
//! - Each initialization attempt accepts exactly one completion signal;
//!   signals from superseded attempts are discarded.
//! - The kernel never times out an attempt; callers layer their own watchdog.

use crate::lifecycle::state::SharedState;
use crate::lifecycle::status::LifecycleStatus;
use crate::registry::ModuleGraph;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Error reported by a module through [`InitHandle::fail`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("module `{module}` failed to initialize: {message}")]
pub struct ModuleInitError {
    pub module: String,
    pub message: String,
}

/// Host-facing kernel errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    #[error("unknown module: {0}")]
    UnknownModule(String),
}

/// One observed status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub module: String,
    pub from: LifecycleStatus,
    pub to: LifecycleStatus,
}

/// Consistent view of what is ready and what is blocking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadinessSnapshot {
    pub ready: bool,
    pub blocking: Vec<String>,
    pub statuses: BTreeMap<String, LifecycleStatus>,
    pub errors: BTreeMap<String, String>,
}

#[derive(Debug)]
struct InitSignal {
    module: String,
    attempt: u64,
    outcome: Result<(), String>,
}

/// Single-use completion token for one initialization attempt.
#[must_use = "initialization must be completed with succeed() or fail()"]
#[derive(Debug)]
pub struct InitHandle {
    module: String,
    attempt: u64,
    sender: mpsc::UnboundedSender<InitSignal>,
}

impl InitHandle {
    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Signals `initSuccess`.
    pub fn succeed(self) {
        self.send(Ok(()));
    }

    /// Signals `initError` with a human-readable payload.
    pub fn fail(self, message: impl Into<String>) {
        self.send(Err(message.into()));
    }

    fn send(self, outcome: Result<(), String>) {
        // The kernel may already be gone; there is nobody left to notify.
        let _ = self.sender.send(InitSignal {
            module: self.module,
            attempt: self.attempt,
            outcome,
        });
    }
}

/// Owns the built graph and drives each module's status.
pub struct LifecycleKernel {
    graph: ModuleGraph,
    attempts: BTreeMap<String, u64>,
    non_blocking: BTreeSet<String>,
    errors: BTreeMap<String, ModuleInitError>,
    signal_tx: mpsc::UnboundedSender<InitSignal>,
    signal_rx: mpsc::UnboundedReceiver<InitSignal>,
    events: broadcast::Sender<StatusChange>,
}

impl LifecycleKernel {
    pub fn new(graph: ModuleGraph) -> Self {
        Self::with_event_capacity(graph, DEFAULT_EVENT_CAPACITY)
    }

    /// Creates a kernel whose status subscription buffers `capacity` events.
    pub fn with_event_capacity(graph: ModuleGraph, capacity: usize) -> Self {
        let non_blocking = graph
            .construction_order()
            .iter()
            .filter(|name| graph.is_non_blocking(name))
            .cloned()
            .collect();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            graph,
            attempts: BTreeMap::new(),
            non_blocking,
            errors: BTreeMap::new(),
            signal_tx,
            signal_rx,
            events,
        }
    }

    pub fn graph(&self) -> &ModuleGraph {
        &self.graph
    }

    pub fn state(&self) -> &SharedState {
        self.graph.state()
    }

    /// Starts every module whose dependencies allow it and applies any
    /// completion signals emitted inline.
    pub fn start(&mut self) {
        info!(
            "event=kernel_start module=lifecycle status=start modules={}",
            self.graph.len()
        );
        self.evaluate();
        self.process_signals();
    }

    /// Subscribes to status transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.events.subscribe()
    }

    pub fn status(&self, name: &str) -> Option<LifecycleStatus> {
        self.state().status(name)
    }

    /// Last error reported by `name`, kept until the module is reset.
    pub fn last_error(&self, name: &str) -> Option<&ModuleInitError> {
        self.errors.get(name)
    }

    /// Logical AND of every module's `ready` status.
    pub fn is_ready(&self) -> bool {
        self.state()
            .snapshot()
            .values()
            .all(|status| *status == LifecycleStatus::Ready)
    }

    /// Modules that are not `ready`, in construction order.
    pub fn blocking_modules(&self) -> Vec<String> {
        let state = self.state();
        self.graph
            .construction_order()
            .iter()
            .filter(|name| !state.is_ready(name))
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> ReadinessSnapshot {
        let statuses = self.state().snapshot();
        let blocking = self.blocking_modules();
        ReadinessSnapshot {
            ready: blocking.is_empty(),
            blocking,
            statuses,
            errors: self
                .errors
                .iter()
                .map(|(name, err)| (name.clone(), err.message.clone()))
                .collect(),
        }
    }

    /// Changes whether `name` gates modules that list it as optional.
    pub fn set_non_blocking(&mut self, name: &str, non_blocking: bool) -> Result<(), KernelError> {
        self.require_known(name)?;
        if non_blocking {
            self.non_blocking.insert(name.to_string());
        } else {
            self.non_blocking.remove(name);
        }
        self.evaluate();
        self.process_signals();
        Ok(())
    }

    /// Returns `name` to `pending`, invalidates its dependents and retries
    /// initialization as soon as its dependencies allow.
    pub fn reset(&mut self, name: &str) -> Result<(), KernelError> {
        self.require_known(name)?;
        if self.status(name) == Some(LifecycleStatus::Pending) {
            return Ok(());
        }

        info!("event=module_reset module=lifecycle status=start name={name}");
        self.bump_attempt(name);
        self.errors.remove(name);
        self.transition(name, LifecycleStatus::Pending);
        if let Some(module) = self.graph.module(name) {
            module.reset();
        }
        self.evaluate();
        self.process_signals();
        Ok(())
    }

    /// Applies every queued completion signal without waiting.
    ///
    /// Returns how many signals were consumed.
    pub fn process_signals(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(signal) = self.signal_rx.try_recv() {
            self.apply_signal(signal);
            processed += 1;
        }
        processed
    }

    /// Waits for completion signals until no module is `initializing`.
    ///
    /// A module that never signals keeps this pending forever; wrap it in
    /// `tokio::time::timeout` when a deadline is needed.
    pub async fn settle(&mut self) {
        self.process_signals();
        while self.any_initializing() {
            let Some(signal) = self.signal_rx.recv().await else {
                return;
            };
            self.apply_signal(signal);
            self.process_signals();
        }
    }

    /// Tears the graph down in reverse construction order.
    pub fn teardown(self) {
        info!("event=kernel_teardown module=lifecycle status=ok");
        self.graph.teardown();
    }

    fn any_initializing(&self) -> bool {
        self.state()
            .snapshot()
            .values()
            .any(|status| *status == LifecycleStatus::Initializing)
    }

    fn require_known(&self, name: &str) -> Result<(), KernelError> {
        if self.graph.contains(name) {
            Ok(())
        } else {
            Err(KernelError::UnknownModule(name.to_string()))
        }
    }

    fn bump_attempt(&mut self, name: &str) -> u64 {
        let attempt = self.attempts.entry(name.to_string()).or_insert(0);
        *attempt += 1;
        *attempt
    }

    fn apply_signal(&mut self, signal: InitSignal) {
        let current_attempt = self.attempts.get(&signal.module).copied();
        if current_attempt != Some(signal.attempt)
            || self.status(&signal.module) != Some(LifecycleStatus::Initializing)
        {
            debug!(
                "event=init_signal module=lifecycle status=discarded name={} attempt={}",
                signal.module, signal.attempt
            );
            return;
        }

        match signal.outcome {
            Ok(()) => {
                info!(
                    "event=module_init module=lifecycle status=ok name={} attempt={}",
                    signal.module, signal.attempt
                );
                self.transition(&signal.module, LifecycleStatus::Ready);
            }
            Err(message) => {
                warn!(
                    "event=module_init module=lifecycle status=error name={} attempt={} error={}",
                    signal.module, signal.attempt, message
                );
                self.errors.insert(
                    signal.module.clone(),
                    ModuleInitError {
                        module: signal.module.clone(),
                        message,
                    },
                );
                self.transition(&signal.module, LifecycleStatus::Error);
            }
        }
        self.evaluate();
    }

    /// Moves `name` to `next`, emits the change and cascades invalidation
    /// when the module leaves `ready`.
    fn transition(&mut self, name: &str, next: LifecycleStatus) {
        let Some(previous) = self.status(name) else {
            return;
        };
        if previous == next {
            return;
        }
        if !previous.can_transition_to(next) {
            warn!(
                "event=status_transition module=lifecycle status=rejected name={name} from={previous} to={next}"
            );
            return;
        }

        self.state().set(name, next);
        debug!("event=status_transition module=lifecycle status=ok name={name} from={previous} to={next}");
        // No subscribers is fine.
        let _ = self.events.send(StatusChange {
            module: name.to_string(),
            from: previous,
            to: next,
        });

        if previous == LifecycleStatus::Ready {
            self.invalidate_dependents(name);
        }
    }

    fn invalidate_dependents(&mut self, name: &str) {
        for dependent in self.graph.required_dependents(name) {
            match self.status(&dependent) {
                Some(LifecycleStatus::Initializing) | Some(LifecycleStatus::Ready) => {
                    info!(
                        "event=module_invalidate module=lifecycle status=ok name={dependent} cause={name}"
                    );
                    self.bump_attempt(&dependent);
                    self.transition(&dependent, LifecycleStatus::Pending);
                }
                _ => {}
            }
        }
    }

    fn can_start(&self, name: &str) -> bool {
        let state = self.state();
        let required_ready = self
            .graph
            .required_dependencies(name)
            .iter()
            .all(|dependency| state.is_ready(dependency));
        let optional_clear = self
            .graph
            .optional_dependencies(name)
            .iter()
            .all(|dependency| state.is_ready(dependency) || self.non_blocking.contains(dependency));
        required_ready && optional_clear
    }

    /// Starts pending modules until a fixed point is reached.
    fn evaluate(&mut self) {
        loop {
            let startable: Vec<String> = self
                .graph
                .construction_order()
                .iter()
                .filter(|name| self.status(name) == Some(LifecycleStatus::Pending))
                .filter(|name| self.can_start(name))
                .cloned()
                .collect();
            if startable.is_empty() {
                return;
            }

            for name in startable {
                let attempt = self.bump_attempt(&name);
                self.transition(&name, LifecycleStatus::Initializing);
                let Some(module) = self.graph.module(&name) else {
                    continue;
                };
                debug!("event=module_init module=lifecycle status=start name={name} attempt={attempt}");
                module.initialize(InitHandle {
                    module: name.clone(),
                    attempt,
                    sender: self.signal_tx.clone(),
                });
            }
        }
    }
}
