//! Integration runtime kernel for applications split across several
//! execution contexts.
//!
//! - [`registry`] declares modules and builds the singleton module graph.
//! - [`lifecycle`] drives per-module readiness and aggregate host status.
//! - [`transport`] correlates RPC calls and fans out pushes between contexts.
//! - [`election`] elects one active context over shared storage.

pub mod clock;
pub mod config;
pub mod db;
pub mod election;
pub mod lifecycle;
pub mod logging;
pub mod registry;
pub mod transport;

pub use config::{ConfigError, EventConfig, RuntimeConfig};
pub use election::{
    ElectionConfig, ElectionError, LeaderElection, LeadershipChanged, LeaseRecord, MemoryStorage,
    SharedStorage, SqliteStorage, StorageError,
};
pub use lifecycle::{
    InitHandle, LifecycleKernel, LifecycleStatus, ModuleInitError, ReadinessSnapshot, StatusChange,
};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use registry::{
    BuildContext, BuildError, Module, ModuleDescriptor, ModuleGraph, ModuleRegistry, Provider,
    Visibility,
};
pub use transport::{
    ChannelEndpoint, Endpoint, EndpointId, Frame, PendingCall, Reply, Transport, TransportError,
};

/// Minimal health-check API for embedding hosts.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
