//! Opened endpoint instances and the launcher that builds them

use super::error::SupervisorError;
use super::shutdown::Closing;
use crate::endpoint::{Endpoint, EndpointSpec};
use crate::provision::Provisioner;
use crate::resolver::Resolve;
use crate::signal::InstanceSignals;
use crate::types::{InstanceId, InstanceInfo, InstanceState};
use std::sync::Arc;

/// Provisions, resolves and opens endpoint instances.
///
/// Shared by `start` and by every recovery task.
#[derive(Clone)]
pub(crate) struct Launcher {
    resolver: Arc<dyn Resolve>,
    provisioner: Provisioner,
    log: slog::Logger,
}

impl Launcher {
    pub(crate) fn new(resolver: Arc<dyn Resolve>, provisioner: Provisioner, log: slog::Logger) -> Self {
        Self {
            resolver,
            provisioner,
            log,
        }
    }

    /// Opens a new instance of `spec`. The instance is not observed until
    /// the runtime adopts it; signals raised before that are buffered.
    pub(crate) async fn open(&self, spec: Arc<EndpointSpec>) -> Result<EndpointInstance, SupervisorError> {
        let created = self
            .provisioner
            .ensure(&spec)
            .await
            .map_err(|source| SupervisorError::Provisioning {
                endpoint: spec.name().to_string(),
                source,
            })?;
        if !created.is_empty() {
            slog::info!(self.log, "provisioned durable queues";
                "endpoint" => spec.name(),
                "created" => created.len()
            );
        }

        let endpoint = self
            .resolver
            .resolve(&spec)
            .map_err(|source| SupervisorError::Unresolved {
                endpoint: spec.name().to_string(),
                source,
            })?;

        let signals = InstanceSignals::new(InstanceId::next());
        if let Err(source) = endpoint.open(signals.clone()).await {
            signals.detach();
            endpoint.abort().await;
            return Err(SupervisorError::Open {
                endpoint: spec.name().to_string(),
                source,
            });
        }

        let addresses = endpoint.addresses();
        slog::debug!(self.log, "endpoint instance opened";
            "endpoint" => spec.name(),
            "instance" => %signals.instance(),
            "addresses" => ?addresses
        );

        Ok(EndpointInstance {
            spec,
            endpoint,
            signals,
            state: InstanceState::Active,
            addresses,
        })
    }
}

/// One opened instance, owned by the supervisor runtime.
///
/// Dropping an instance detaches its observers.
pub(crate) struct EndpointInstance {
    spec: Arc<EndpointSpec>,
    endpoint: Arc<dyn Endpoint>,
    signals: InstanceSignals,
    state: InstanceState,
    addresses: Vec<String>,
}

impl EndpointInstance {
    pub(crate) fn id(&self) -> InstanceId {
        self.signals.instance()
    }

    pub(crate) fn name(&self) -> &str {
        self.spec.name()
    }

    pub(crate) fn spec(&self) -> &Arc<EndpointSpec> {
        &self.spec
    }

    pub(crate) fn endpoint(&self) -> &Arc<dyn Endpoint> {
        &self.endpoint
    }

    pub(crate) fn signals(&self) -> &InstanceSignals {
        &self.signals
    }

    pub(crate) fn state(&self) -> InstanceState {
        self.state
    }

    /// Moves to `next`. Returns false, leaving the state unchanged, if the
    /// transition is not allowed.
    pub(crate) fn transition(&mut self, next: InstanceState) -> bool {
        if self.state.can_transition_to(next) {
            self.state = next;
            true
        } else {
            false
        }
    }

    pub(crate) fn info(&self) -> InstanceInfo {
        InstanceInfo {
            id: self.id(),
            endpoint: self.spec.name().to_string(),
            state: self.state,
            addresses: self.addresses.clone(),
            observers: self.signals.observer_count(),
        }
    }

    /// Detaches observers and hands out what the shutdown coordinator needs.
    pub(crate) fn closing(&self) -> Closing {
        self.signals.detach();
        Closing {
            id: self.id(),
            endpoint_name: self.spec.name().to_string(),
            endpoint: Arc::clone(&self.endpoint),
        }
    }
}

impl Drop for EndpointInstance {
    fn drop(&mut self) {
        self.signals.detach();
    }
}
