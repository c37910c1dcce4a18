//! Endpoint trait and endpoint specifications

use crate::signal::InstanceSignals;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A hosted service instance bound to zero or more transport endpoints.
///
/// The supervisor owns every instance it opens. An instance reports faults and
/// unroutable messages through the [`InstanceSignals`] handle it receives in
/// [`Endpoint::open`]; signals may be raised from any task at any time.
#[async_trait]
pub trait Endpoint: Send + Sync + 'static {
    /// Opens the instance and starts serving.
    ///
    /// Keep `signals` for the lifetime of the instance. Signals raised before
    /// the supervisor has adopted the instance are buffered and delivered once
    /// it is adopted.
    async fn open(&self, signals: InstanceSignals) -> Result<(), EndpointError>;

    /// Gracefully closes the instance. Returning marks the close as confirmed.
    async fn close(&self) -> Result<(), EndpointError>;

    /// Forcefully tears the instance down. Must not wait on in-flight work.
    async fn abort(&self);

    /// Transport addresses the instance is listening on.
    fn addresses(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Transport family of a binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Plain TCP
    Tcp,
    /// HTTP(S)
    Http,
    /// Local named pipe / unix socket
    NamedPipe,
    /// Durable store-and-forward queue; must exist before the endpoint opens
    DurableQueue,
}

impl TransportKind {
    /// Returns true for transports that need provisioning before open.
    pub fn is_durable(self) -> bool {
        matches!(self, TransportKind::DurableQueue)
    }
}

/// One configured transport binding of an endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    /// Transport family
    pub transport: TransportKind,
    /// Binding address, e.g. `net.msmq://localhost/private/orders`
    pub address: String,
}

impl Binding {
    /// Creates a binding for the given transport and address.
    pub fn new(transport: TransportKind, address: impl Into<String>) -> Self {
        Self {
            transport,
            address: address.into(),
        }
    }

    /// Shorthand for a TCP binding.
    pub fn tcp(address: impl Into<String>) -> Self {
        Self::new(TransportKind::Tcp, address)
    }

    /// Shorthand for a durable-queue binding.
    pub fn durable_queue(address: impl Into<String>) -> Self {
        Self::new(TransportKind::DurableQueue, address)
    }
}

/// Describes one hosted service: its identity, the contract the resolver
/// builds it from, and its transport bindings.
///
/// The name is the identity the supervisor keys instances on; at most one
/// instance per name is active at any time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSpec {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    contract: Option<String>,
    #[serde(default)]
    bindings: Vec<Binding>,
}

impl EndpointSpec {
    /// Creates a specification whose contract is the same as its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contract: None,
            bindings: Vec::new(),
        }
    }

    /// Sets the contract the resolver builds this endpoint from.
    pub fn with_contract(mut self, contract: impl Into<String>) -> Self {
        self.contract = Some(contract.into());
        self
    }

    /// Adds a transport binding.
    pub fn with_binding(mut self, binding: Binding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Identity of this specification.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Contract used for resolution (defaults to the name).
    pub fn contract(&self) -> &str {
        self.contract.as_deref().unwrap_or(&self.name)
    }

    /// All configured bindings.
    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Bindings that target a durable-queue transport.
    pub fn durable_bindings(&self) -> impl Iterator<Item = &Binding> {
        self.bindings.iter().filter(|b| b.transport.is_durable())
    }

    /// Returns true if any binding needs provisioning before open.
    pub fn requires_provisioning(&self) -> bool {
        self.durable_bindings().next().is_some()
    }
}

impl fmt::Display for EndpointSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.contract() == self.name {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} ({})", self.name, self.contract())
        }
    }
}

/// Errors returned by endpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    /// The endpoint could not start serving (bad configuration, port in use, ...)
    #[error("open failed: {0}")]
    Open(String),
    /// The endpoint failed while closing
    #[error("close failed: {0}")]
    Close(String),
    /// Underlying I/O failure
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
