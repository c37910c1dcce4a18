//! Supervisor types and implementation

mod error;
mod handle;
mod instance;
mod recovery;
pub(crate) mod runtime;
mod shutdown;
mod spec;

pub use error::SupervisorError;
pub use handle::SupervisorHandle;
pub use shutdown::{CloseOutcome, ShutdownReport, StoppedInstance};
pub use spec::SupervisorSpec;
