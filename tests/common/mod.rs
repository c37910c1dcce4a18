// Shared fixtures for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use endpoint_host::{
    Endpoint, EndpointError, EndpointRegistry, EndpointSpec, InstanceSignals, SupervisorSpec,
};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration, Instant};

/// Records what the supervisor did to every instance built for one contract.
#[derive(Default)]
pub struct Probe {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub aborts: AtomicUsize,
    pub fail_open: AtomicBool,
    pub fault_on_open: AtomicBool,
    pub fault_on_close: AtomicBool,
    pub hang_close: AtomicBool,
    pub open_delay_ms: AtomicU64,
    attached_at_close: Mutex<Vec<bool>>,
    signals: Mutex<Vec<InstanceSignals>>,
}

impl Probe {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn aborts(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    /// Whether observers were still attached each time close was entered.
    pub fn attached_at_close(&self) -> Vec<bool> {
        self.attached_at_close.lock().unwrap().clone()
    }

    /// Signal handle of the most recently opened instance.
    pub fn latest(&self) -> InstanceSignals {
        self.signals
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no instance opened yet")
    }
}

pub struct MockEndpoint {
    name: String,
    probe: Arc<Probe>,
    signals: Mutex<Option<InstanceSignals>>,
}

impl MockEndpoint {
    pub fn new(spec: &EndpointSpec, probe: Arc<Probe>) -> Self {
        Self {
            name: spec.name().to_string(),
            probe,
            signals: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Endpoint for MockEndpoint {
    async fn open(&self, signals: InstanceSignals) -> Result<(), EndpointError> {
        self.probe.opens.fetch_add(1, Ordering::SeqCst);

        let delay = self.probe.open_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            sleep(Duration::from_millis(delay)).await;
        }
        if self.probe.fail_open.load(Ordering::SeqCst) {
            return Err(EndpointError::Open("address already in use".into()));
        }

        self.probe.signals.lock().unwrap().push(signals.clone());
        if self.probe.fault_on_open.load(Ordering::SeqCst) {
            signals.fault("listener died during open");
        }
        *self.signals.lock().unwrap() = Some(signals);
        Ok(())
    }

    async fn close(&self) -> Result<(), EndpointError> {
        let signals = self.signals.lock().unwrap().clone();
        if let Some(signals) = signals {
            self.probe
                .attached_at_close
                .lock()
                .unwrap()
                .push(signals.is_attached());
            if self.probe.fault_on_close.load(Ordering::SeqCst) {
                signals.fault("channel faulted while closing");
            }
        }

        if self.probe.hang_close.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn abort(&self) {
        self.probe.aborts.fetch_add(1, Ordering::SeqCst);
    }

    fn addresses(&self) -> Vec<String> {
        vec![format!("net.tcp://localhost/{}", self.name)]
    }
}

/// Registers a mock for `contract` and returns its probe.
pub fn mock(registry: &EndpointRegistry, contract: &str) -> Arc<Probe> {
    let probe = Arc::new(Probe::default());
    let p = Arc::clone(&probe);
    registry.register(contract, move |spec: &EndpointSpec| {
        MockEndpoint::new(spec, Arc::clone(&p))
    });
    probe
}

/// Supervisor spec with short timings and a silent logger.
pub fn spec(registry: &EndpointRegistry) -> SupervisorSpec {
    SupervisorSpec::new("test-host", registry.clone())
        .with_recovery_cooldown(Duration::from_millis(50))
        .with_shutdown_timeout(Some(Duration::from_secs(2)))
        .with_logger(endpoint_host::logging::discard())
}

/// Polls `check` until it returns true or five seconds pass.
pub async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check().await {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    false
}
