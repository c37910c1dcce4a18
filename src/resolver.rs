//! Resolution of endpoint specifications into runnable instances

use crate::endpoint::{Endpoint, EndpointSpec};
use dashmap::DashMap;
use std::sync::Arc;

/// Builds the endpoint instance for a specification.
///
/// The supervisor calls this once per open, including every recovery
/// rebuild. Implementations must fail loudly instead of returning a
/// half-built instance.
pub trait Resolve: Send + Sync + 'static {
    /// Produces a fresh instance for `spec`.
    fn resolve(&self, spec: &EndpointSpec) -> Result<Arc<dyn Endpoint>, ResolveError>;
}

impl<F> Resolve for F
where
    F: Fn(&EndpointSpec) -> Result<Arc<dyn Endpoint>, ResolveError> + Send + Sync + 'static,
{
    fn resolve(&self, spec: &EndpointSpec) -> Result<Arc<dyn Endpoint>, ResolveError> {
        self(spec)
    }
}

type Factory = Arc<dyn Fn(&EndpointSpec) -> Result<Arc<dyn Endpoint>, ResolveError> + Send + Sync>;

/// Resolver keyed by contract name.
///
/// ```
/// use endpoint_host::{EndpointRegistry, EndpointSpec, Resolve};
/// # use endpoint_host::{Endpoint, EndpointError, InstanceSignals};
/// # struct Echo;
/// # #[async_trait::async_trait]
/// # impl Endpoint for Echo {
/// #     async fn open(&self, _: InstanceSignals) -> Result<(), EndpointError> { Ok(()) }
/// #     async fn close(&self) -> Result<(), EndpointError> { Ok(()) }
/// #     async fn abort(&self) {}
/// # }
///
/// let registry = EndpointRegistry::new();
/// registry.register("echo", |_spec: &EndpointSpec| Echo);
///
/// assert!(registry.resolve(&EndpointSpec::new("echo")).is_ok());
/// assert!(registry.resolve(&EndpointSpec::new("missing")).is_err());
/// ```
#[derive(Default, Clone)]
pub struct EndpointRegistry {
    factories: Arc<DashMap<String, Factory>>,
}

impl EndpointRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory that builds a new endpoint for every open.
    ///
    /// Replaces any factory previously registered for `contract`.
    pub fn register<E, F>(&self, contract: impl Into<String>, build: F)
    where
        E: Endpoint,
        F: Fn(&EndpointSpec) -> E + Send + Sync + 'static,
    {
        let factory: Factory =
            Arc::new(move |spec: &EndpointSpec| Ok(Arc::new(build(spec)) as Arc<dyn Endpoint>));
        self.factories.insert(contract.into(), factory);
    }

    /// Registers a fallible factory.
    pub fn try_register<F>(&self, contract: impl Into<String>, factory: F)
    where
        F: Fn(&EndpointSpec) -> Result<Arc<dyn Endpoint>, ResolveError> + Send + Sync + 'static,
    {
        self.factories.insert(contract.into(), Arc::new(factory));
    }

    /// Registers a contract served by one shared service object.
    ///
    /// `build` wraps the shared object in a new endpoint for every open, so
    /// recovery gets a fresh transport host around the same service state.
    pub fn register_shared<S, E, F>(&self, contract: impl Into<String>, service: Arc<S>, build: F)
    where
        S: Send + Sync + 'static,
        E: Endpoint,
        F: Fn(&EndpointSpec, Arc<S>) -> E + Send + Sync + 'static,
    {
        let factory: Factory = Arc::new(move |spec: &EndpointSpec| {
            Ok(Arc::new(build(spec, Arc::clone(&service))) as Arc<dyn Endpoint>)
        });
        self.factories.insert(contract.into(), factory);
    }

    /// Removes the factory for `contract`. Returns true if one was registered.
    pub fn unregister(&self, contract: &str) -> bool {
        self.factories.remove(contract).is_some()
    }

    /// Returns true if `contract` can be resolved.
    pub fn contains(&self, contract: &str) -> bool {
        self.factories.contains_key(contract)
    }

    /// Registered contract names, sorted.
    pub fn contracts(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl Resolve for EndpointRegistry {
    fn resolve(&self, spec: &EndpointSpec) -> Result<Arc<dyn Endpoint>, ResolveError> {
        // Clone the factory out so the shard lock is not held while building.
        let factory = self
            .factories
            .get(spec.contract())
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ResolveError::Unregistered {
                contract: spec.contract().to_string(),
            })?;
        factory(spec)
    }
}

/// Errors raised while resolving an endpoint.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolveError {
    /// Nothing is registered for the contract
    #[error("no endpoint registered for contract '{contract}'")]
    Unregistered { contract: String },
    /// The factory ran but could not build the endpoint
    #[error("failed to build endpoint for contract '{contract}': {reason}")]
    Failed { contract: String, reason: String },
}
