//! Durable-queue provisioning.
//!
//! Before an endpoint with durable-queue bindings opens, every queue it binds
//! to must exist. [`Provisioner::ensure`] derives each queue's physical path
//! from the binding address and creates the queue only when it is absent. It
//! never deletes or truncates an existing queue, so calling it repeatedly is
//! safe.

use crate::endpoint::EndpointSpec;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Segment that marks a queue as machine-private.
const PRIVATE_SEGMENT: &str = "private";
/// Physical name of the private-queue namespace.
const PRIVATE_QUEUE_PREFIX: &str = "Private$";
/// Marker for the local machine at the head of a queue path.
const LOCAL_MACHINE: &str = ".";
/// Separator between queue path segments.
const SEPARATOR: char = '\\';

/// Physical path of a durable queue, e.g. `.\Private$\orders`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueuePath(String);

impl QueuePath {
    /// Path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Segments after the machine marker.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEPARATOR).skip(1)
    }

    /// Returns true for queues in the private namespace.
    pub fn is_private(&self) -> bool {
        self.segments().next() == Some(PRIVATE_QUEUE_PREFIX)
    }
}

impl fmt::Display for QueuePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives the physical queue path from a durable-queue binding address.
///
/// The address path segments become the queue path, a `private` segment
/// (any case) maps to `Private$`, and the local machine marker is prepended:
///
/// ```
/// use endpoint_host::queue_path;
///
/// let path = queue_path("net.msmq://localhost/private/orders/").unwrap();
/// assert_eq!(path.as_str(), r".\Private$\orders");
/// ```
pub fn queue_path(address: &str) -> Result<QueuePath, ProvisionError> {
    let invalid = |reason: &str| ProvisionError::InvalidAddress {
        address: address.to_string(),
        reason: reason.to_string(),
    };

    let (_, rest) = address
        .split_once("://")
        .ok_or_else(|| invalid("missing scheme"))?;
    let (_host, path) = rest
        .split_once('/')
        .ok_or_else(|| invalid("missing queue name"))?;
    let path = path.split(['?', '#']).next().unwrap_or_default();

    let segments: Vec<&str> = path
        .split('/')
        .filter(|seg| !seg.is_empty())
        .map(|seg| {
            if seg.eq_ignore_ascii_case(PRIVATE_SEGMENT) {
                PRIVATE_QUEUE_PREFIX
            } else {
                seg
            }
        })
        .collect();

    if segments.is_empty() {
        return Err(invalid("missing queue name"));
    }
    if segments.iter().any(|seg| seg.contains(SEPARATOR)) {
        return Err(invalid("queue segment contains a path separator"));
    }

    let mut physical = String::from(LOCAL_MACHINE);
    for seg in segments {
        physical.push(SEPARATOR);
        physical.push_str(seg);
    }
    Ok(QueuePath(physical))
}

/// Backend that owns durable queues.
#[async_trait]
pub trait QueueStore: Send + Sync + 'static {
    /// Returns true if the queue exists.
    async fn exists(&self, path: &QueuePath) -> Result<bool, ProvisionError>;

    /// Creates the queue. Must not disturb a queue that already exists.
    async fn create(&self, path: &QueuePath, transactional: bool) -> Result<(), ProvisionError>;
}

/// Ensures the durable queues of an endpoint exist.
#[derive(Clone)]
pub struct Provisioner {
    store: Arc<dyn QueueStore>,
    log: slog::Logger,
}

impl Provisioner {
    /// Creates a provisioner over the given store, logging to the global logger.
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self {
            store,
            log: slog_scope::logger(),
        }
    }

    /// Replaces the logger.
    pub fn with_logger(mut self, log: slog::Logger) -> Self {
        self.log = log;
        self
    }

    /// Creates every missing durable queue `spec` binds to.
    ///
    /// Returns the queues that were actually created. Endpoints without
    /// durable bindings never touch the store.
    pub async fn ensure(&self, spec: &EndpointSpec) -> Result<Vec<QueuePath>, ProvisionError> {
        let mut created = Vec::new();

        for binding in spec.durable_bindings() {
            let path = queue_path(&binding.address)?;
            if self.store.exists(&path).await? {
                slog::trace!(self.log, "queue already present";
                    "endpoint" => spec.name(),
                    "queue" => %path
                );
                continue;
            }

            self.store.create(&path, true).await?;
            slog::debug!(self.log, "queue added";
                "endpoint" => spec.name(),
                "queue" => %path
            );
            created.push(path);
        }

        Ok(created)
    }
}

/// In-process queue store.
///
/// Useful for embedding and tests; queues live as long as the store.
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    queues: DashMap<QueuePath, bool>,
    creates: AtomicUsize,
}

impl MemoryQueueStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds the given queues.
    pub fn with_queues(paths: impl IntoIterator<Item = QueuePath>) -> Self {
        let store = Self::new();
        for path in paths {
            store.queues.insert(path, true);
        }
        store
    }

    /// Returns true if the queue exists.
    pub fn contains(&self, path: &QueuePath) -> bool {
        self.queues.contains_key(path)
    }

    /// Returns whether the queue was created transactional.
    pub fn is_transactional(&self, path: &QueuePath) -> Option<bool> {
        self.queues.get(path).map(|entry| *entry.value())
    }

    /// Number of queues held.
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    /// True if the store holds no queues.
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Number of times [`QueueStore::create`] was invoked.
    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn exists(&self, path: &QueuePath) -> Result<bool, ProvisionError> {
        Ok(self.queues.contains_key(path))
    }

    async fn create(&self, path: &QueuePath, transactional: bool) -> Result<(), ProvisionError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.queues.entry(path.clone()).or_insert(transactional);
        Ok(())
    }
}

/// Queue store backed by a directory tree.
///
/// Each queue is a directory under the root (one level per path segment)
/// holding a `queue.json` descriptor; the descriptor's presence is what makes
/// the queue exist.
#[derive(Debug, Clone)]
pub struct DirQueueStore {
    root: PathBuf,
}

#[derive(Serialize, Deserialize)]
struct QueueDescriptor {
    path: QueuePath,
    transactional: bool,
}

const DESCRIPTOR_FILE: &str = "queue.json";

impl DirQueueStore {
    /// Creates a store rooted at `root`. The directory is created on demand.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory that holds the given queue.
    pub fn queue_dir(&self, path: &QueuePath) -> Result<PathBuf, ProvisionError> {
        let mut dir = self.root.clone();
        for seg in path.segments() {
            if seg == "." || seg == ".." || seg.contains(['/', '\0']) {
                return Err(ProvisionError::Rejected {
                    path: path.clone(),
                    reason: format!("segment {seg:?} is not a valid directory name"),
                });
            }
            dir.push(seg);
        }
        Ok(dir)
    }
}

#[async_trait]
impl QueueStore for DirQueueStore {
    async fn exists(&self, path: &QueuePath) -> Result<bool, ProvisionError> {
        let descriptor = self.queue_dir(path)?.join(DESCRIPTOR_FILE);
        tokio::fs::try_exists(&descriptor)
            .await
            .map_err(|source| ProvisionError::Store {
                path: path.clone(),
                source,
            })
    }

    async fn create(&self, path: &QueuePath, transactional: bool) -> Result<(), ProvisionError> {
        let store_err = |source| ProvisionError::Store {
            path: path.clone(),
            source,
        };

        let dir = self.queue_dir(path)?;
        tokio::fs::create_dir_all(&dir).await.map_err(store_err)?;

        let descriptor = dir.join(DESCRIPTOR_FILE);
        if tokio::fs::try_exists(&descriptor).await.map_err(store_err)? {
            return Ok(());
        }

        let body = serde_json::to_vec_pretty(&QueueDescriptor {
            path: path.clone(),
            transactional,
        })
        .map_err(|err| store_err(std::io::Error::new(ErrorKind::InvalidData, err)))?;

        // Only a fully written descriptor may ever appear under its final name.
        let partial = dir.join(format!(
            ".{DESCRIPTOR_FILE}.{}.{}",
            std::process::id(),
            PARTIAL_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        let published = match write_synced(&partial, &body).await {
            // A hard link never replaces an existing descriptor.
            Ok(()) => match tokio::fs::hard_link(&partial, &descriptor).await {
                Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(()),
                other => other,
            },
            Err(err) => Err(err),
        };
        let _ = tokio::fs::remove_file(&partial).await;
        published.map_err(store_err)
    }
}

static PARTIAL_SEQ: AtomicUsize = AtomicUsize::new(0);

async fn write_synced(path: &Path, body: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(body).await?;
    file.sync_all().await
}

/// Errors raised while provisioning durable queues.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// The binding address does not name a queue
    #[error("invalid queue address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },
    /// The store refused the queue path
    #[error("queue {path} rejected: {reason}")]
    Rejected { path: QueuePath, reason: String },
    /// The store failed while checking or creating the queue
    #[error("queue store failed for {path}: {source}")]
    Store {
        path: QueuePath,
        #[source]
        source: std::io::Error,
    },
}
