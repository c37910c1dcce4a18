//! Supervisor runtime - single owner of the active-instance collection

use super::error::SupervisorError;
use super::instance::{EndpointInstance, Launcher};
use super::recovery::Recovery;
use super::shutdown::Closing;
use crate::signal::{InstanceSignal, SignalEnvelope};
use crate::types::{InstanceId, InstanceInfo, InstanceState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// An instance the runtime refused to adopt, returned so the caller can close it
pub(crate) struct Rejected {
    pub instance: EndpointInstance,
    pub error: SupervisorError,
}

/// Outcome of a drain request
pub(crate) enum Drained {
    /// Nothing is running or closing
    Idle,
    /// Instances this caller must close and then release
    Started(Vec<Closing>),
    /// Another stop is closing every instance; resolves once it releases them
    InFlight(oneshot::Receiver<()>),
}

/// Internal commands sent to the supervisor runtime
pub(crate) enum Command {
    Adopt {
        instance: EndpointInstance,
        epoch: u64,
        respond_to: oneshot::Sender<Result<InstanceId, Rejected>>,
    },
    Signal(SignalEnvelope),
    BeginRecovery {
        id: InstanceId,
        respond_to: oneshot::Sender<Option<EndpointInstance>>,
    },
    Drain {
        respond_to: oneshot::Sender<Drained>,
    },
    Release {
        ids: Vec<InstanceId>,
        respond_to: oneshot::Sender<()>,
    },
    Epoch {
        respond_to: oneshot::Sender<u64>,
    },
    Contains {
        endpoint: String,
        respond_to: oneshot::Sender<bool>,
    },
    Instances {
        respond_to: oneshot::Sender<Vec<InstanceInfo>>,
    },
    Terminate,
}

/// Settings the runtime hands to every recovery task
pub(crate) struct RuntimeConfig {
    pub name: Arc<String>,
    pub launcher: Launcher,
    pub recovery_cooldown: Duration,
    pub shutdown_timeout: Option<Duration>,
    pub failures: mpsc::UnboundedSender<SupervisorError>,
    pub log: slog::Logger,
}

/// Internal state machine that owns every active endpoint instance.
///
/// Every mutation of the collection arrives as a [`Command`], so adoption on
/// start, fault handling, recovery and shutdown never race each other.
pub(crate) struct SupervisorRuntime {
    config: RuntimeConfig,
    instances: Vec<EndpointInstance>,
    control_rx: mpsc::UnboundedReceiver<Command>,
    control_tx: mpsc::UnboundedSender<Command>,
    epoch: u64,
    drain_waiters: Vec<oneshot::Sender<()>>,
}

impl SupervisorRuntime {
    pub(crate) fn new(
        config: RuntimeConfig,
        control_rx: mpsc::UnboundedReceiver<Command>,
        control_tx: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            config,
            instances: Vec::new(),
            control_rx,
            control_tx,
            epoch: 0,
            drain_waiters: Vec::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        while let Some(command) = self.control_rx.recv().await {
            match command {
                Command::Adopt {
                    instance,
                    epoch,
                    respond_to,
                } => {
                    if let Err(Err(rejected)) = respond_to.send(self.handle_adopt(instance, epoch)) {
                        // Nobody is left to close it.
                        let endpoint = Arc::clone(rejected.instance.endpoint());
                        tokio::spawn(async move { endpoint.abort().await });
                    }
                }
                Command::Signal(envelope) => self.handle_signal(envelope),
                Command::BeginRecovery { id, respond_to } => {
                    let _ = respond_to.send(self.handle_begin_recovery(id));
                }
                Command::Drain { respond_to } => {
                    let _ = respond_to.send(self.handle_drain());
                }
                Command::Release { ids, respond_to } => {
                    self.handle_release(&ids);
                    let _ = respond_to.send(());
                }
                Command::Epoch { respond_to } => {
                    let _ = respond_to.send(self.epoch);
                }
                Command::Contains {
                    endpoint,
                    respond_to,
                } => {
                    let _ = respond_to.send(self.position_of(&endpoint).is_some());
                }
                Command::Instances { respond_to } => {
                    let _ = respond_to.send(self.instances.iter().map(EndpointInstance::info).collect());
                }
                Command::Terminate => break,
            }
        }

        // Replacements still queued for adoption belong to nobody else.
        self.control_rx.close();
        while let Ok(command) = self.control_rx.try_recv() {
            if let Command::Adopt { instance, .. } = command {
                self.abort_instance(instance).await;
            }
        }
        self.abort_all().await;
    }

    fn handle_adopt(&mut self, instance: EndpointInstance, epoch: u64) -> Result<InstanceId, Rejected> {
        if epoch != self.epoch {
            return Err(Rejected {
                instance,
                error: SupervisorError::ShuttingDown(self.config.name.to_string()),
            });
        }
        if self.position_of(instance.name()).is_some() {
            let error = SupervisorError::AlreadyActive(instance.name().to_string());
            return Err(Rejected { instance, error });
        }

        let id = instance.id();
        let flushed = instance.signals().attach(self.control_tx.clone());
        slog::info!(self.config.log, "endpoint started";
            "endpoint" => instance.name(),
            "instance" => %id,
            "buffered_signals" => flushed
        );
        self.instances.push(instance);
        Ok(id)
    }

    fn handle_signal(&mut self, envelope: SignalEnvelope) {
        let SignalEnvelope { source, signal } = envelope;
        let id = source.instance();

        let Some(position) = self.position_by_id(id) else {
            if source.is_detached() {
                slog::trace!(self.config.log, "dropping signal from detached instance";
                    "instance" => %id
                );
            } else if let InstanceSignal::Faulted { .. } = signal {
                let error = SupervisorError::UnrecognizedSender { instance: id };
                slog::error!(self.config.log, "fault from unrecognized instance";
                    "instance" => %id,
                    "error" => %error
                );
                let _ = self.config.failures.send(error);
            } else {
                slog::warn!(self.config.log, "signal from unrecognized instance ignored";
                    "instance" => %id
                );
            }
            return;
        };

        let instance = &mut self.instances[position];
        match signal {
            InstanceSignal::Faulted { reason } => {
                if !instance.transition(InstanceState::Faulted) {
                    slog::debug!(self.config.log, "ignoring fault, instance not active";
                        "endpoint" => instance.name(),
                        "instance" => %id,
                        "state" => %instance.state()
                    );
                    return;
                }

                slog::warn!(self.config.log, "endpoint faulted, restarting after cooldown";
                    "endpoint" => instance.name(),
                    "instance" => %id,
                    "reason" => reason.as_deref().unwrap_or("unspecified"),
                    "cooldown" => ?self.config.recovery_cooldown
                );

                let recovery = Recovery {
                    faulted: id,
                    spec: Arc::clone(instance.spec()),
                    epoch: self.epoch,
                    launcher: self.config.launcher.clone(),
                    cooldown: self.config.recovery_cooldown,
                    shutdown_timeout: self.config.shutdown_timeout,
                    control_tx: self.control_tx.clone(),
                    failures: self.config.failures.clone(),
                    log: self.config.log.clone(),
                };
                tokio::spawn(recovery.run());
            }
            InstanceSignal::UnknownMessage(message) => {
                slog::error!(self.config.log, "unknown message received";
                    "endpoint" => instance.name(),
                    "instance" => %id,
                    "action" => message.action.as_deref().unwrap_or("<none>"),
                    "body" => &message.body
                );
            }
            InstanceSignal::DispatchError(report) => match report.poison_lookup_id {
                Some(lookup_id) => {
                    slog::error!(self.config.log, "poison message";
                        "endpoint" => instance.name(),
                        "instance" => %id,
                        "lookup_id" => lookup_id,
                        "error" => report.chain()
                    );
                }
                None => {
                    slog::error!(self.config.log, "message dispatch failed";
                        "endpoint" => instance.name(),
                        "instance" => %id,
                        "error" => report.chain()
                    );
                }
            },
        }
    }

    fn handle_begin_recovery(&mut self, id: InstanceId) -> Option<EndpointInstance> {
        let position = self.position_by_id(id)?;
        if self.instances[position].state() != InstanceState::Faulted {
            return None;
        }

        let mut instance = self.instances.remove(position);
        instance.signals().detach();
        instance.transition(InstanceState::Recovering);
        Some(instance)
    }

    fn handle_drain(&mut self) -> Drained {
        self.epoch += 1;

        let mut closing = Vec::new();
        for instance in &mut self.instances {
            if instance.transition(InstanceState::Closing) {
                closing.push(instance.closing());
            }
        }

        if !closing.is_empty() {
            slog::debug!(self.config.log, "draining endpoints";
                "count" => closing.len(),
                "epoch" => self.epoch
            );
            return Drained::Started(closing);
        }
        if self.has_closing() {
            let (tx, rx) = oneshot::channel();
            self.drain_waiters.push(tx);
            return Drained::InFlight(rx);
        }
        Drained::Idle
    }

    fn handle_release(&mut self, ids: &[InstanceId]) {
        self.instances.retain_mut(|instance| {
            if !ids.contains(&instance.id()) {
                return true;
            }
            instance.transition(InstanceState::Closed);
            false
        });

        if !self.has_closing() {
            for waiter in self.drain_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }

    async fn abort_all(&mut self) {
        for instance in std::mem::take(&mut self.instances) {
            self.abort_instance(instance).await;
        }
    }

    async fn abort_instance(&self, instance: EndpointInstance) {
        instance.signals().detach();
        instance.endpoint().abort().await;
        slog::debug!(self.config.log, "aborted endpoint on supervisor exit";
            "endpoint" => instance.name(),
            "instance" => %instance.id()
        );
    }

    fn has_closing(&self) -> bool {
        self.instances
            .iter()
            .any(|i| i.state() == InstanceState::Closing)
    }

    fn position_of(&self, endpoint: &str) -> Option<usize> {
        self.instances.iter().position(|i| i.name() == endpoint)
    }

    fn position_by_id(&self, id: InstanceId) -> Option<usize> {
        self.instances.iter().position(|i| i.id() == id)
    }
}
