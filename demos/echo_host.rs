//! Echo host - two TCP echo endpoints under one supervisor
//!
//! `flaky-echo` reports a fault a few seconds after every open, so the
//! supervisor keeps replacing it. Press Ctrl-C for a coordinated shutdown.
//!
//! ```text
//! cargo run --example echo_host [config.json]
//! nc 127.0.0.1 7001
//! ```

use async_trait::async_trait;
use endpoint_host::{
    Endpoint, EndpointError, EndpointRegistry, EndpointSpec, HostConfig, InstanceSignals,
    SupervisorHandle, SupervisorSpec, TransportKind,
};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

const DEFAULT_CONFIG: &str = r#"{
    "name": "echo-host",
    "recovery_cooldown_ms": 2000,
    "shutdown_timeout_ms": 5000,
    "endpoints": [
        { "name": "echo", "bindings": [{ "transport": "tcp", "address": "127.0.0.1:7001" }] },
        { "name": "flaky-echo", "bindings": [{ "transport": "tcp", "address": "127.0.0.1:7002" }] }
    ]
}"#;

struct EchoEndpoint {
    address: String,
    fault_after: Option<Duration>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl EchoEndpoint {
    fn new(spec: &EndpointSpec, fault_after: Option<Duration>) -> Self {
        let address = spec
            .bindings()
            .iter()
            .find(|b| b.transport == TransportKind::Tcp)
            .map(|b| b.address.clone())
            .unwrap_or_else(|| "127.0.0.1:0".to_string());
        Self {
            address,
            fault_after,
            tasks: Mutex::new(Vec::new()),
        }
    }

    fn stop_tasks(&self) {
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }
}

async fn echo(mut stream: TcpStream) {
    let mut buf = [0u8; 1024];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                if stream.write_all(&buf[..n]).await.is_err() {
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl Endpoint for EchoEndpoint {
    async fn open(&self, signals: InstanceSignals) -> Result<(), EndpointError> {
        let listener = TcpListener::bind(&self.address).await?;
        println!("[{}] listening on {}", signals.instance(), self.address);

        let accept_signals = signals.clone();
        let accept = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        tokio::spawn(echo(stream));
                    }
                    Err(err) => {
                        accept_signals.fault(format!("accept failed: {err}"));
                        return;
                    }
                }
            }
        });

        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(accept);
        if let Some(delay) = self.fault_after {
            tasks.push(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                signals.fault("simulated listener crash");
            }));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), EndpointError> {
        self.stop_tasks();
        println!("[{}] closed", self.address);
        Ok(())
    }

    async fn abort(&self) {
        self.stop_tasks();
        println!("[{}] aborted", self.address);
    }

    fn addresses(&self) -> Vec<String> {
        vec![self.address.clone()]
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => HostConfig::from_path(path)?,
        None => HostConfig::from_json_str(DEFAULT_CONFIG)?,
    };
    let _guard = endpoint_host::logging::install(config.log_level()?);

    let registry = EndpointRegistry::new();
    registry.register("echo", |spec: &EndpointSpec| EchoEndpoint::new(spec, None));
    registry.register("flaky-echo", |spec: &EndpointSpec| {
        EchoEndpoint::new(spec, Some(Duration::from_secs(5)))
    });

    let spec = SupervisorSpec::from_config(&config, registry)
        .on_post_start(|| println!("🚀 all endpoints started, Ctrl-C to stop"))
        .on_post_stop(|| println!("👋 all endpoints stopped"));
    let handle = SupervisorHandle::spawn(spec);

    handle.start(config.endpoints.clone()).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        Some(err) = handle.next_failure() => eprintln!("endpoint failure: {err}"),
    }

    let report = handle.stop().await?;
    for stopped in &report.instances {
        println!("  {} {} -> {:?}", stopped.id, stopped.endpoint, stopped.outcome);
    }
    Ok(())
}
