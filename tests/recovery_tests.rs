mod common;

use async_trait::async_trait;
use common::{mock, spec, wait_until};
use endpoint_host::{
    Binding, EndpointRegistry, EndpointSpec, MemoryQueueStore, ProvisionError, QueuePath,
    QueueStore, SupervisorError, SupervisorHandle,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

#[tokio::test]
async fn test_faulted_instance_is_replaced_after_cooldown() {
    let registry = EndpointRegistry::new();
    let orders = mock(&registry, "orders");
    let handle = SupervisorHandle::spawn(spec(&registry));

    let ids = handle.start([EndpointSpec::new("orders")]).await.unwrap();
    let original = orders.latest();
    assert!(original.fault("socket reset"));

    let replaced = wait_until(|| async {
        let running = handle.instances().await.unwrap();
        running.len() == 1 && running[0].id != ids[0]
    })
    .await;
    assert!(replaced);

    let running = handle.instances().await.unwrap();
    assert_eq!(running[0].endpoint, "orders");
    assert_eq!(running[0].observers, 1);
    assert_eq!(orders.opens(), 2);
    assert_eq!(orders.aborts(), 1);
    assert_eq!(orders.closes(), 0);
    assert!(original.is_detached());
    assert!(orders.latest().is_attached());

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_replacement_recovers_again() {
    let registry = EndpointRegistry::new();
    let orders = mock(&registry, "orders");
    let handle = SupervisorHandle::spawn(spec(&registry));

    handle.start([EndpointSpec::new("orders")]).await.unwrap();
    for round in 1..=2 {
        orders.latest().fault("socket reset");
        assert!(wait_until(|| async { orders.opens() == round + 1 }).await);
        assert!(
            wait_until(|| async { handle.instances().await.unwrap().len() == 1 }).await
        );
    }

    assert_eq!(handle.instances().await.unwrap()[0].observers, 1);
    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_repeated_faults_trigger_single_recovery() {
    let registry = EndpointRegistry::new();
    let orders = mock(&registry, "orders");
    let handle = SupervisorHandle::spawn(spec(&registry));

    handle.start([EndpointSpec::new("orders")]).await.unwrap();
    let signals = orders.latest();
    signals.fault("first");
    signals.fault("second");
    signals.fault("third");

    assert!(wait_until(|| async { orders.opens() == 2 }).await);
    sleep(Duration::from_millis(200)).await;

    assert_eq!(orders.opens(), 2);
    assert_eq!(handle.instances().await.unwrap().len(), 1);

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_recovery_does_not_disturb_siblings() {
    let registry = EndpointRegistry::new();
    let orders = mock(&registry, "orders");
    let billing = mock(&registry, "billing");
    let handle = SupervisorHandle::spawn(spec(&registry));

    let ids = handle
        .start([EndpointSpec::new("orders"), EndpointSpec::new("billing")])
        .await
        .unwrap();
    orders.latest().fault("socket reset");

    assert!(wait_until(|| async { orders.opens() == 2 }).await);
    assert!(
        wait_until(|| async { handle.instances().await.unwrap().len() == 2 }).await
    );

    let running = handle.instances().await.unwrap();
    let billing_info = running.iter().find(|i| i.endpoint == "billing").unwrap();
    assert_eq!(billing_info.id, ids[1]);
    assert_eq!(billing.opens(), 1);
    assert_eq!(billing.aborts(), 0);

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_fault_during_open_is_delivered_after_adoption() {
    let registry = EndpointRegistry::new();
    let orders = mock(&registry, "orders");
    orders.fault_on_open.store(true, Ordering::SeqCst);
    let handle = SupervisorHandle::spawn(spec(&registry));

    handle.start([EndpointSpec::new("orders")]).await.unwrap();
    orders.fault_on_open.store(false, Ordering::SeqCst);

    assert!(wait_until(|| async { orders.opens() == 2 }).await);
    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_recovery_is_terminal() {
    let registry = EndpointRegistry::new();
    let orders = mock(&registry, "orders");
    let handle = SupervisorHandle::spawn(spec(&registry));

    handle.start([EndpointSpec::new("orders")]).await.unwrap();
    orders.fail_open.store(true, Ordering::SeqCst);
    orders.latest().fault("socket reset");

    let failure = tokio::time::timeout(Duration::from_secs(5), handle.next_failure())
        .await
        .unwrap()
        .unwrap();
    match &failure {
        SupervisorError::RecoveryFailed { endpoint, source } => {
            assert_eq!(endpoint, "orders");
            assert!(matches!(**source, SupervisorError::Open { .. }));
        }
        other => panic!("expected recovery failure, got {other:?}"),
    }

    sleep(Duration::from_millis(200)).await;
    assert_eq!(orders.opens(), 2);
    assert!(handle.instances().await.unwrap().is_empty());

    // A new start brings the endpoint back.
    orders.fail_open.store(false, Ordering::SeqCst);
    handle.start([EndpointSpec::new("orders")]).await.unwrap();
    assert_eq!(handle.instances().await.unwrap().len(), 1);
    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_parked_failure_reader_takes_precedence_over_try() {
    let registry = EndpointRegistry::new();
    let orders = mock(&registry, "orders");
    let handle = SupervisorHandle::spawn(spec(&registry));

    handle.start([EndpointSpec::new("orders")]).await.unwrap();
    let reader = tokio::spawn({
        let handle = handle.clone();
        async move { handle.next_failure().await }
    });
    sleep(Duration::from_millis(20)).await;

    orders.fail_open.store(true, Ordering::SeqCst);
    orders.latest().fault("socket reset");

    // The parked reader holds the receiver, so polling sees nothing.
    assert!(handle.try_next_failure().is_none());
    let failure = tokio::time::timeout(Duration::from_secs(5), reader)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(failure, Some(SupervisorError::RecoveryFailed { .. })));
    assert!(handle.try_next_failure().is_none());
}

/// Queue store that starts failing on demand.
#[derive(Default)]
struct BreakableStore {
    inner: MemoryQueueStore,
    broken: AtomicBool,
}

impl BreakableStore {
    fn check(&self, path: &QueuePath) -> Result<(), ProvisionError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(ProvisionError::Store {
                path: path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl QueueStore for BreakableStore {
    async fn exists(&self, path: &QueuePath) -> Result<bool, ProvisionError> {
        self.check(path)?;
        self.inner.exists(path).await
    }

    async fn create(&self, path: &QueuePath, transactional: bool) -> Result<(), ProvisionError> {
        self.check(path)?;
        self.inner.create(path, transactional).await
    }
}

#[tokio::test]
async fn test_provisioning_failure_during_recovery() {
    let registry = EndpointRegistry::new();
    let orders = mock(&registry, "orders");
    let store = Arc::new(BreakableStore::default());
    let handle = SupervisorHandle::spawn(spec(&registry).with_queue_store(store.clone()));

    let endpoint = EndpointSpec::new("orders")
        .with_binding(Binding::durable_queue("net.msmq://localhost/private/orders"));
    handle.start([endpoint]).await.unwrap();
    assert_eq!(store.inner.create_calls(), 1);

    store.broken.store(true, Ordering::SeqCst);
    orders.latest().fault("queue listener lost");

    let failure = tokio::time::timeout(Duration::from_secs(5), handle.next_failure())
        .await
        .unwrap()
        .unwrap();
    match &failure {
        SupervisorError::RecoveryFailed { source, .. } => {
            assert_eq!(source.as_label(), "provisioning_error")
        }
        other => panic!("expected recovery failure, got {other:?}"),
    }

    sleep(Duration::from_millis(200)).await;
    assert_eq!(orders.opens(), 1);
    assert!(handle.instances().await.unwrap().is_empty());
    assert!(handle.try_next_failure().is_none());
}

#[tokio::test]
async fn test_stop_during_cooldown_cancels_recovery() {
    let registry = EndpointRegistry::new();
    let orders = mock(&registry, "orders");
    let handle = SupervisorHandle::spawn(
        spec(&registry).with_recovery_cooldown(Duration::from_millis(150)),
    );

    handle.start([EndpointSpec::new("orders")]).await.unwrap();
    orders.latest().fault("socket reset");
    sleep(Duration::from_millis(20)).await;

    let report = handle.stop().await.unwrap();
    assert_eq!(report.instances.len(), 1);

    sleep(Duration::from_millis(300)).await;
    assert_eq!(orders.opens(), 1);
    assert!(handle.instances().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_recovery_finishing_after_stop_is_closed() {
    let registry = EndpointRegistry::new();
    let orders = mock(&registry, "orders");
    let handle = SupervisorHandle::spawn(spec(&registry));

    handle.start([EndpointSpec::new("orders")]).await.unwrap();
    orders.open_delay_ms.store(300, Ordering::SeqCst);
    orders.latest().fault("socket reset");

    // The faulted instance leaves the collection once the cooldown ends;
    // its replacement is still opening when stop runs.
    assert!(wait_until(|| async { orders.opens() == 2 }).await);
    assert!(handle.stop().await.unwrap().is_empty());

    assert!(wait_until(|| async { orders.closes() == 1 }).await);
    assert!(handle.instances().await.unwrap().is_empty());
    assert!(orders.latest().is_detached());
    assert!(handle.try_next_failure().is_none());
}
