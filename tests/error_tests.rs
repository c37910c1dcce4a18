use endpoint_host::{
    EndpointError, ErrorReport, ProvisionError, ResolveError, SupervisorError,
};
use std::error::Error;

#[test]
fn test_labels() {
    let open = SupervisorError::Open {
        endpoint: "orders".into(),
        source: EndpointError::Open("address already in use".into()),
    };
    assert_eq!(open.as_label(), "open_error");
    assert_eq!(open.endpoint(), Some("orders"));

    let recovery = SupervisorError::RecoveryFailed {
        endpoint: "orders".into(),
        source: Box::new(open),
    };
    assert_eq!(recovery.as_label(), "recovery_failure");

    assert_eq!(
        SupervisorError::ShuttingDown("host".into()).as_label(),
        "shutting_down"
    );
    assert_eq!(SupervisorError::ShuttingDown("host".into()).endpoint(), None);
}

#[test]
fn test_display_includes_endpoint_and_cause() {
    let err = SupervisorError::Unresolved {
        endpoint: "ghost".into(),
        source: ResolveError::Unregistered {
            contract: "IGhost".into(),
        },
    };
    assert_eq!(
        err.to_string(),
        "endpoint 'ghost' could not be resolved: no endpoint registered for contract 'IGhost'"
    );
}

#[test]
fn test_recovery_failure_keeps_source_chain() {
    let provisioning = SupervisorError::Provisioning {
        endpoint: "orders".into(),
        source: ProvisionError::InvalidAddress {
            address: "net.msmq://localhost".into(),
            reason: "missing queue name".into(),
        },
    };
    let err = SupervisorError::RecoveryFailed {
        endpoint: "orders".into(),
        source: Box::new(provisioning),
    };

    let report = ErrorReport::from_error(&err);
    assert_eq!(report.causes.len(), 2);
    assert!(report.causes[1].starts_with("invalid queue address"));
    assert!(!report.is_poison());
    assert_eq!(report.chain().matches(" <- ").count(), 2);

    let source = err.source().unwrap();
    assert!(source.to_string().starts_with("provisioning failed for endpoint 'orders'"));
}

#[test]
fn test_poison_report() {
    let io = std::io::Error::new(std::io::ErrorKind::InvalidData, "bad envelope");
    let report = ErrorReport::poison(7, &io);

    assert!(report.is_poison());
    assert_eq!(report.poison_lookup_id, Some(7));
    assert_eq!(report.to_string(), "bad envelope");
}
