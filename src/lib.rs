//! Hosts long-running service endpoints inside one process and keeps them
//! alive.
//!
//! A [`SupervisorHandle`] opens a batch of endpoints in order, provisioning
//! any durable queues they bind to first. When an instance reports a fault,
//! it is replaced after a cooldown without disturbing its siblings. Stopping
//! detaches every observer before closing, then waits for each instance to
//! confirm, aborting stragglers once the shutdown timeout passes.

mod config;
mod endpoint;
mod provision;
mod resolver;
mod signal;
mod supervisor;
mod types;

pub mod logging;

// Re-export public API
pub use config::{ConfigError, HostConfig, RECOVERY_COOLDOWN, SHUTDOWN_TIMEOUT};
pub use endpoint::{Binding, Endpoint, EndpointError, EndpointSpec, TransportKind};
pub use provision::{
    queue_path, DirQueueStore, MemoryQueueStore, ProvisionError, Provisioner, QueuePath,
    QueueStore,
};
pub use resolver::{EndpointRegistry, Resolve, ResolveError};
pub use signal::{ErrorReport, InstanceSignal, InstanceSignals, UnknownMessage};
pub use supervisor::{
    CloseOutcome, ShutdownReport, StoppedInstance, SupervisorError, SupervisorHandle,
    SupervisorSpec,
};
pub use types::{InstanceId, InstanceInfo, InstanceState};
