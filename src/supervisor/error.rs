//! Supervisor errors

use crate::endpoint::EndpointError;
use crate::provision::ProvisionError;
use crate::resolver::ResolveError;
use crate::types::InstanceId;

/// Errors returned by supervisor operations.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// A durable queue the endpoint binds to could not be created
    #[error("provisioning failed for endpoint '{endpoint}': {source}")]
    Provisioning {
        endpoint: String,
        #[source]
        source: ProvisionError,
    },
    /// The endpoint instance failed to open
    #[error("endpoint '{endpoint}' failed to open: {source}")]
    Open {
        endpoint: String,
        #[source]
        source: EndpointError,
    },
    /// The resolver could not build the endpoint
    #[error("endpoint '{endpoint}' could not be resolved: {source}")]
    Unresolved {
        endpoint: String,
        #[source]
        source: ResolveError,
    },
    /// Rebuilding a faulted endpoint failed; the endpoint stays down
    #[error("recovery of endpoint '{endpoint}' failed: {source}")]
    RecoveryFailed {
        endpoint: String,
        #[source]
        source: Box<SupervisorError>,
    },
    /// A fault arrived from an instance the supervisor does not track
    #[error("fault signalled by unrecognized instance {instance}")]
    UnrecognizedSender { instance: InstanceId },
    /// An instance for this endpoint is already running
    #[error("endpoint '{0}' is already active")]
    AlreadyActive(String),
    /// Supervisor is shutting down
    #[error("supervisor {0} is shutting down")]
    ShuttingDown(String),
}

impl SupervisorError {
    /// Stable snake_case label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            SupervisorError::Provisioning { .. } => "provisioning_error",
            SupervisorError::Open { .. } => "open_error",
            SupervisorError::Unresolved { .. } => "unresolved",
            SupervisorError::RecoveryFailed { .. } => "recovery_failure",
            SupervisorError::UnrecognizedSender { .. } => "unrecognized_sender",
            SupervisorError::AlreadyActive(_) => "already_active",
            SupervisorError::ShuttingDown(_) => "shutting_down",
        }
    }

    /// Name of the endpoint the error concerns, if any.
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            SupervisorError::Provisioning { endpoint, .. }
            | SupervisorError::Open { endpoint, .. }
            | SupervisorError::Unresolved { endpoint, .. }
            | SupervisorError::RecoveryFailed { endpoint, .. } => Some(endpoint),
            SupervisorError::AlreadyActive(endpoint) => Some(endpoint),
            SupervisorError::UnrecognizedSender { .. } | SupervisorError::ShuttingDown(_) => None,
        }
    }
}
