//! Supervisor handle - public API for interacting with supervisors

use super::error::SupervisorError;
use super::instance::Launcher;
use super::runtime::{Command, Drained, RuntimeConfig, SupervisorRuntime};
use super::shutdown::{self, ShutdownReport};
use super::spec::{run_hook, Hooks, SupervisorSpec};
use crate::endpoint::EndpointSpec;
use crate::provision::Provisioner;
use crate::types::{InstanceId, InstanceInfo};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};

struct Shared {
    name: Arc<String>,
    control_tx: mpsc::UnboundedSender<Command>,
    failures: Mutex<mpsc::UnboundedReceiver<SupervisorError>>,
    launcher: Launcher,
    hooks: Hooks,
    shutdown_timeout: Option<Duration>,
    log: slog::Logger,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let _ = self.control_tx.send(Command::Terminate);
    }
}

/// Handle used to start, observe and stop a set of hosted endpoints.
///
/// Cloning is cheap. When the last clone is dropped the runtime exits and
/// aborts whatever is still running; call [`SupervisorHandle::stop`] first
/// for an orderly shutdown.
#[derive(Clone)]
pub struct SupervisorHandle {
    shared: Arc<Shared>,
}

impl SupervisorHandle {
    /// Spawns a supervisor runtime for the provided specification.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(spec: SupervisorSpec) -> Self {
        let SupervisorSpec {
            name,
            resolver,
            queue_store,
            recovery_cooldown,
            shutdown_timeout,
            log,
            hooks,
        } = spec;

        let name = Arc::new(name);
        let log = log
            .unwrap_or_else(slog_scope::logger)
            .new(slog::o!("supervisor" => name.to_string()));
        let provisioner = Provisioner::new(queue_store).with_logger(log.clone());
        let launcher = Launcher::new(resolver, provisioner, log.clone());

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        let runtime = SupervisorRuntime::new(
            RuntimeConfig {
                name: Arc::clone(&name),
                launcher: launcher.clone(),
                recovery_cooldown,
                shutdown_timeout,
                failures: failures_tx,
                log: log.clone(),
            },
            control_rx,
            control_tx.clone(),
        );

        let runtime_log = log.clone();
        tokio::spawn(async move {
            runtime.run().await;
            slog::debug!(runtime_log, "supervisor stopped");
        });

        Self {
            shared: Arc::new(Shared {
                name,
                control_tx,
                failures: Mutex::new(failures_rx),
                launcher,
                hooks,
                shutdown_timeout,
                log,
            }),
        }
    }

    /// Opens every endpoint in order and starts observing it.
    ///
    /// Stops at the first endpoint that fails to provision, resolve or open
    /// and returns that error. Endpoints opened before it keep running. The
    /// pre-start hook runs before the batch; the post-start hook only runs
    /// if the whole batch started.
    pub async fn start(
        &self,
        specs: impl IntoIterator<Item = EndpointSpec>,
    ) -> Result<Vec<InstanceId>, SupervisorError> {
        let epoch = self.request(|respond_to| Command::Epoch { respond_to }).await?;
        run_hook(&self.shared.hooks.pre_start);

        let mut started = Vec::new();
        for spec in specs {
            let spec = Arc::new(spec);
            match self.start_one(Arc::clone(&spec), epoch).await {
                Ok(id) => started.push(id),
                Err(err) => {
                    slog::error!(self.shared.log, "failed to start endpoint";
                        "endpoint" => spec.name(),
                        "contract" => spec.contract(),
                        "kind" => err.as_label(),
                        "error" => %err
                    );
                    return Err(err);
                }
            }
        }

        run_hook(&self.shared.hooks.post_start);
        Ok(started)
    }

    async fn start_one(&self, spec: Arc<EndpointSpec>, epoch: u64) -> Result<InstanceId, SupervisorError> {
        let endpoint = spec.name().to_string();
        if self
            .request(|respond_to| Command::Contains {
                endpoint: endpoint.clone(),
                respond_to,
            })
            .await?
        {
            return Err(SupervisorError::AlreadyActive(endpoint));
        }

        let instance = self.shared.launcher.open(spec).await?;
        let adopted = self
            .request(|respond_to| Command::Adopt {
                instance,
                epoch,
                respond_to,
            })
            .await?;

        match adopted {
            Ok(id) => Ok(id),
            Err(rejected) => {
                let closing = vec![rejected.instance.closing()];
                shutdown::close_all(closing, self.shared.shutdown_timeout, &self.shared.log).await;
                Err(rejected.error)
            }
        }
    }

    /// Closes every running endpoint and waits for each to confirm.
    ///
    /// Observers are detached before any close is requested, so faults
    /// raised while closing never trigger a recovery. Instances that do not
    /// confirm within the shutdown timeout are aborted. Calling `stop` when
    /// nothing runs is a no-op and skips the hooks.
    ///
    /// A `stop` that overlaps another one waits until the first has released
    /// every instance, then returns an empty report. The instances are
    /// reported to the call that closed them.
    pub async fn stop(&self) -> Result<ShutdownReport, SupervisorError> {
        let closing = match self.request(|respond_to| Command::Drain { respond_to }).await? {
            Drained::Started(closing) => closing,
            Drained::Idle => {
                slog::debug!(self.shared.log, "stop requested, nothing running");
                return Ok(ShutdownReport::default());
            }
            Drained::InFlight(done) => {
                slog::debug!(self.shared.log, "stop already in progress, waiting for it");
                // A dropped sender means the runtime exited and aborted everything.
                let _ = done.await;
                return Ok(ShutdownReport::default());
            }
        };

        run_hook(&self.shared.hooks.pre_stop);
        slog::info!(self.shared.log, "stopping endpoints";
            "count" => closing.len(),
            "timeout" => ?self.shared.shutdown_timeout
        );

        let report = shutdown::close_all(closing, self.shared.shutdown_timeout, &self.shared.log).await;
        let ids = report.ids();
        self.request(|respond_to| Command::Release { ids, respond_to })
            .await?;

        run_hook(&self.shared.hooks.post_stop);
        slog::info!(self.shared.log, "all endpoints stopped";
            "stopped" => report.instances.len(),
            "forced" => report.forced().count()
        );
        Ok(report)
    }

    /// Returns a snapshot of every instance in the collection, in start order.
    pub async fn instances(&self) -> Result<Vec<InstanceInfo>, SupervisorError> {
        self.request(|respond_to| Command::Instances { respond_to })
            .await
    }

    /// Waits for the next failure that escaped a recovery task.
    ///
    /// Yields [`SupervisorError::RecoveryFailed`] and
    /// [`SupervisorError::UnrecognizedSender`].
    ///
    /// The failure channel is unbounded. Failures queue up until they are
    /// read, so a long-running host should keep a task draining it.
    pub async fn next_failure(&self) -> Option<SupervisorError> {
        self.shared.failures.lock().await.recv().await
    }

    /// Returns a pending failure without waiting.
    ///
    /// Returns `None` while another task is parked in
    /// [`SupervisorHandle::next_failure`], even when failures are pending,
    /// because that task holds the receiver.
    pub fn try_next_failure(&self) -> Option<SupervisorError> {
        self.shared.failures.try_lock().ok()?.try_recv().ok()
    }

    /// Returns the supervisor's name.
    pub fn name(&self) -> &str {
        self.shared.name.as_str()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SupervisorError> {
        let (respond_to, response) = oneshot::channel();
        self.shared
            .control_tx
            .send(command(respond_to))
            .map_err(|_| SupervisorError::ShuttingDown(self.name().to_string()))?;
        response
            .await
            .map_err(|_| SupervisorError::ShuttingDown(self.name().to_string()))
    }
}
