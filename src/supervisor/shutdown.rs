//! Coordinated shutdown of endpoint instances
//!
//! Every instance being stopped gets a [`ShutdownToken`]: its close runs on
//! its own task and signals the token when it returns. The coordinator issues
//! every close request first and only then waits on the tokens, all against
//! one shared deadline. An instance whose token is not signalled in time is
//! force-aborted.

use crate::endpoint::{Endpoint, EndpointError};
use crate::types::InstanceId;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// An instance whose observers are detached and which is about to be closed.
pub(crate) struct Closing {
    pub id: InstanceId,
    pub endpoint_name: String,
    pub endpoint: Arc<dyn Endpoint>,
}

/// How an instance left the running set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "reason")]
pub enum CloseOutcome {
    /// The instance confirmed its close
    Closed,
    /// The close returned an error; the instance was aborted afterwards
    CloseFailed(String),
    /// The close did not complete before the deadline; the instance was aborted
    ForcedAbort,
}

/// Result of stopping one instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoppedInstance {
    /// Identity of the stopped instance
    pub id: InstanceId,
    /// Endpoint the instance was built from
    pub endpoint: String,
    /// How the instance stopped
    pub outcome: CloseOutcome,
}

/// Summary returned by [`SupervisorHandle::stop`](crate::SupervisorHandle::stop)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Stopped instances, in start order
    pub instances: Vec<StoppedInstance>,
}

impl ShutdownReport {
    /// True if nothing was running.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// True if every instance confirmed its close.
    pub fn is_clean(&self) -> bool {
        self.instances
            .iter()
            .all(|stopped| stopped.outcome == CloseOutcome::Closed)
    }

    /// Instances that had to be aborted after missing the deadline.
    pub fn forced(&self) -> impl Iterator<Item = &StoppedInstance> {
        self.instances
            .iter()
            .filter(|stopped| stopped.outcome == CloseOutcome::ForcedAbort)
    }

    pub(crate) fn ids(&self) -> Vec<InstanceId> {
        self.instances.iter().map(|stopped| stopped.id).collect()
    }
}

/// Binary "closed" signal for one instance.
pub(crate) struct ShutdownToken {
    closing: Closing,
    closed: oneshot::Receiver<Result<(), EndpointError>>,
    closer: JoinHandle<()>,
}

impl ShutdownToken {
    /// Requests the close and returns the token it will signal.
    pub(crate) fn issue(closing: Closing) -> Self {
        let (signal, closed) = oneshot::channel();
        let endpoint = Arc::clone(&closing.endpoint);
        let closer = tokio::spawn(async move {
            let result = endpoint.close().await;
            let _ = signal.send(result);
        });
        Self {
            closing,
            closed,
            closer,
        }
    }

    /// Waits for the token, aborting the instance if `deadline` passes first.
    pub(crate) async fn wait(mut self, deadline: Option<Instant>, log: &slog::Logger) -> StoppedInstance {
        let confirmed = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, &mut self.closed).await {
                Ok(confirmed) => confirmed,
                Err(_) => {
                    self.closer.abort();
                    self.closing.endpoint.abort().await;
                    slog::warn!(log, "endpoint did not close in time, aborted";
                        "endpoint" => &self.closing.endpoint_name,
                        "instance" => %self.closing.id
                    );
                    return self.finish(CloseOutcome::ForcedAbort);
                }
            },
            None => (&mut self.closed).await,
        };

        let outcome = match confirmed {
            Ok(Ok(())) => {
                slog::debug!(log, "endpoint closed";
                    "endpoint" => &self.closing.endpoint_name,
                    "instance" => %self.closing.id
                );
                CloseOutcome::Closed
            }
            Ok(Err(err)) => {
                self.closing.endpoint.abort().await;
                slog::error!(log, "endpoint failed to close, aborted";
                    "endpoint" => &self.closing.endpoint_name,
                    "instance" => %self.closing.id,
                    "error" => %err
                );
                CloseOutcome::CloseFailed(err.to_string())
            }
            Err(_) => {
                self.closing.endpoint.abort().await;
                slog::error!(log, "endpoint close task panicked, aborted";
                    "endpoint" => &self.closing.endpoint_name,
                    "instance" => %self.closing.id
                );
                CloseOutcome::CloseFailed("close task panicked".to_string())
            }
        };
        self.finish(outcome)
    }

    fn finish(self, outcome: CloseOutcome) -> StoppedInstance {
        StoppedInstance {
            id: self.closing.id,
            endpoint: self.closing.endpoint_name,
            outcome,
        }
    }
}

/// Closes every instance and waits for all of them.
pub(crate) async fn close_all(
    closing: Vec<Closing>,
    timeout: Option<Duration>,
    log: &slog::Logger,
) -> ShutdownReport {
    let deadline = timeout.map(|timeout| Instant::now() + timeout);
    let tokens: Vec<ShutdownToken> = closing.into_iter().map(ShutdownToken::issue).collect();

    let mut report = ShutdownReport::default();
    for token in tokens {
        report.instances.push(token.wait(deadline, log).await);
    }
    report
}
