//! Supervisor specification and builder

use crate::config::{HostConfig, RECOVERY_COOLDOWN, SHUTDOWN_TIMEOUT};
use crate::provision::{DirQueueStore, MemoryQueueStore, QueueStore};
use crate::resolver::Resolve;
use std::sync::Arc;
use std::time::Duration;

pub(crate) type Hook = Arc<dyn Fn() + Send + Sync>;

/// Lifecycle callbacks, each invoked once per batch
#[derive(Clone, Default)]
pub(crate) struct Hooks {
    pub pre_start: Option<Hook>,
    pub post_start: Option<Hook>,
    pub pre_stop: Option<Hook>,
    pub post_stop: Option<Hook>,
}

pub(crate) fn run_hook(hook: &Option<Hook>) {
    if let Some(hook) = hook {
        hook();
    }
}

/// Describes a supervisor: how it builds endpoints, where their queues live
/// and how long it waits on faults and shutdowns.
#[derive(Clone)]
pub struct SupervisorSpec {
    pub(crate) name: String,
    pub(crate) resolver: Arc<dyn Resolve>,
    pub(crate) queue_store: Arc<dyn QueueStore>,
    pub(crate) recovery_cooldown: Duration,
    pub(crate) shutdown_timeout: Option<Duration>,
    pub(crate) log: Option<slog::Logger>,
    pub(crate) hooks: Hooks,
}

impl SupervisorSpec {
    /// Creates a specification that resolves endpoints through `resolver`.
    ///
    /// Queues are kept in memory, the recovery cooldown is
    /// [`RECOVERY_COOLDOWN`] and shutdown waits at most [`SHUTDOWN_TIMEOUT`].
    pub fn new(name: impl Into<String>, resolver: impl Resolve) -> Self {
        Self {
            name: name.into(),
            resolver: Arc::new(resolver),
            queue_store: Arc::new(MemoryQueueStore::new()),
            recovery_cooldown: RECOVERY_COOLDOWN,
            shutdown_timeout: Some(SHUTDOWN_TIMEOUT),
            log: None,
            hooks: Hooks::default(),
        }
    }

    /// Creates a specification from a loaded configuration.
    ///
    /// Endpoints listed in the configuration are not started; pass
    /// `config.endpoints` to [`SupervisorHandle::start`](crate::SupervisorHandle::start).
    pub fn from_config(config: &HostConfig, resolver: impl Resolve) -> Self {
        let spec = Self::new(config.name.clone(), resolver)
            .with_recovery_cooldown(config.recovery_cooldown())
            .with_shutdown_timeout(config.shutdown_timeout());
        match &config.queue_root {
            Some(root) => spec.with_queue_store(Arc::new(DirQueueStore::new(root))),
            None => spec,
        }
    }

    /// Sets the store durable queues are provisioned in.
    pub fn with_queue_store(mut self, store: Arc<dyn QueueStore>) -> Self {
        self.queue_store = store;
        self
    }

    /// Sets the delay between a fault and the rebuild.
    pub fn with_recovery_cooldown(mut self, cooldown: Duration) -> Self {
        self.recovery_cooldown = cooldown;
        self
    }

    /// Bounds the shutdown wait. `None` waits for every instance indefinitely.
    pub fn with_shutdown_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets the logger lifecycle events are reported to.
    pub fn with_logger(mut self, log: slog::Logger) -> Self {
        self.log = Some(log);
        self
    }

    /// Runs `hook` once before a batch of endpoints is started.
    pub fn on_pre_start(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.hooks.pre_start = Some(Arc::new(hook));
        self
    }

    /// Runs `hook` once after a whole batch started successfully.
    pub fn on_post_start(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.hooks.post_start = Some(Arc::new(hook));
        self
    }

    /// Runs `hook` once before running endpoints are closed.
    pub fn on_pre_stop(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.hooks.pre_stop = Some(Arc::new(hook));
        self
    }

    /// Runs `hook` once after every endpoint has stopped.
    pub fn on_post_stop(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.hooks.post_stop = Some(Arc::new(hook));
        self
    }

    /// Name of the supervisor.
    pub fn name(&self) -> &str {
        &self.name
    }
}
