//! Delayed replacement of a faulted instance
//!
//! One [`Recovery`] task is spawned per fault. It waits out the cooldown,
//! takes the faulted instance out of the collection through the runtime,
//! aborts it, opens a replacement and hands that back for adoption. A failed
//! rebuild is terminal for the endpoint: it is escalated on the failure
//! channel and never retried.

use super::error::SupervisorError;
use super::instance::Launcher;
use super::runtime::Command;
use super::shutdown;
use crate::endpoint::EndpointSpec;
use crate::types::InstanceId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

pub(crate) struct Recovery {
    pub faulted: InstanceId,
    pub spec: Arc<EndpointSpec>,
    pub epoch: u64,
    pub launcher: Launcher,
    pub cooldown: Duration,
    pub shutdown_timeout: Option<Duration>,
    pub control_tx: mpsc::UnboundedSender<Command>,
    pub failures: mpsc::UnboundedSender<SupervisorError>,
    pub log: slog::Logger,
}

impl Recovery {
    pub(crate) async fn run(self) {
        tokio::time::sleep(self.cooldown).await;

        let (respond_to, rx) = oneshot::channel();
        if self
            .control_tx
            .send(Command::BeginRecovery {
                id: self.faulted,
                respond_to,
            })
            .is_err()
        {
            return;
        }
        let faulted = match rx.await {
            Ok(Some(instance)) => instance,
            // Stopped or already replaced while we were cooling down.
            _ => {
                slog::debug!(self.log, "recovery cancelled, instance no longer faulted";
                    "endpoint" => self.spec.name(),
                    "instance" => %self.faulted
                );
                return;
            }
        };

        slog::warn!(self.log, "recovering faulted endpoint";
            "endpoint" => self.spec.name(),
            "instance" => %self.faulted
        );
        faulted.endpoint().abort().await;
        drop(faulted);

        let replacement = match self.launcher.open(Arc::clone(&self.spec)).await {
            Ok(instance) => instance,
            Err(source) => {
                let error = SupervisorError::RecoveryFailed {
                    endpoint: self.spec.name().to_string(),
                    source: Box::new(source),
                };
                slog::error!(self.log, "endpoint recovery failed, endpoint stays down";
                    "endpoint" => self.spec.name(),
                    "instance" => %self.faulted,
                    "kind" => error.as_label(),
                    "error" => %error
                );
                let _ = self.failures.send(error);
                return;
            }
        };

        let replacement_id = replacement.id();
        let (respond_to, rx) = oneshot::channel();
        let sent = self.control_tx.send(Command::Adopt {
            instance: replacement,
            epoch: self.epoch,
            respond_to,
        });
        if let Err(mpsc::error::SendError(Command::Adopt { instance, .. })) = sent {
            // The runtime is gone and owns nothing; tear the replacement down here.
            slog::debug!(self.log, "supervisor exited during recovery, aborting replacement";
                "endpoint" => self.spec.name(),
                "instance" => %replacement_id
            );
            instance.signals().detach();
            instance.endpoint().abort().await;
            return;
        }

        match rx.await {
            Ok(Ok(id)) => {
                slog::warn!(self.log, "endpoint recovered";
                    "endpoint" => self.spec.name(),
                    "faulted" => %self.faulted,
                    "instance" => %id
                );
            }
            Ok(Err(rejected)) => {
                slog::info!(self.log, "recovered instance not adopted, closing it";
                    "endpoint" => self.spec.name(),
                    "instance" => %replacement_id,
                    "reason" => %rejected.error
                );
                let closing = vec![rejected.instance.closing()];
                shutdown::close_all(closing, self.shutdown_timeout, &self.log).await;
            }
            // The runtime aborted the queued replacement on its way out.
            Err(_) => {}
        }
    }
}
