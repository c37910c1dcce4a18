//! Common types used throughout the host runtime

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide source of instance identities.
static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one opened endpoint instance.
///
/// Ids are unique within the process and increase monotonically, so an
/// instance built by recovery never shares an id with the one it replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(u64);

impl InstanceId {
    pub(crate) fn next() -> Self {
        Self(NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw numeric id.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of an endpoint instance.
///
/// ```text
/// Active ──► Faulted ──► Recovering        (instance replaced by a new one)
///   │           │
///   └───────────┴──► Closing ──► Closed    (coordinated stop)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// Opened and serving requests
    Active,
    /// Reported itself unusable; a recovery is scheduled
    Faulted,
    /// Being torn down so a replacement can be opened
    Recovering,
    /// Close requested by the shutdown coordinator
    Closing,
    /// Close confirmed (or forced)
    Closed,
}

impl InstanceState {
    /// Returns true if `next` is a legal successor of this state.
    pub fn can_transition_to(self, next: InstanceState) -> bool {
        use InstanceState::*;
        matches!(
            (self, next),
            (Active, Faulted)
                | (Faulted, Recovering)
                | (Active, Closing)
                | (Faulted, Closing)
                | (Closing, Closed)
        )
    }

    /// Returns true once the instance can no longer change state.
    pub fn is_terminal(self) -> bool {
        matches!(self, InstanceState::Recovering | InstanceState::Closed)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            InstanceState::Active => "active",
            InstanceState::Faulted => "faulted",
            InstanceState::Recovering => "recovering",
            InstanceState::Closing => "closing",
            InstanceState::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// Snapshot of one active instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    /// Identity of the instance
    pub id: InstanceId,
    /// Name of the endpoint specification the instance was built from
    pub endpoint: String,
    /// Current lifecycle state
    pub state: InstanceState,
    /// Transport addresses the instance listens on
    pub addresses: Vec<String>,
    /// Number of fault/message observers currently attached (0 or 1)
    pub observers: usize,
}
