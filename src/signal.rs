//! Per-instance signal channel.
//!
//! Each opened instance receives an [`InstanceSignals`] handle. The handle is
//! a gate in front of the supervisor's command channel:
//!
//! ```text
//! Pending ──attach──► Attached ──detach──► Detached
//!  (buffer)            (forward)            (drop)
//! ```
//!
//! Signals raised before the supervisor adopts the instance are buffered and
//! flushed on attach. Detaching is a single state swap under the gate's lock,
//! so once [`InstanceSignals::detach`] returns no further signal from that
//! instance can reach the supervisor.

use crate::supervisor::runtime::Command;
use crate::types::InstanceId;
use std::error::Error as StdError;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Signals an instance can raise
#[derive(Debug, Clone)]
pub enum InstanceSignal {
    /// The instance can no longer process requests and must be replaced
    Faulted {
        /// Optional description of what went wrong
        reason: Option<String>,
    },
    /// A message arrived that the hosted contract cannot route
    UnknownMessage(UnknownMessage),
    /// Dispatching a message failed (including poison messages)
    DispatchError(ErrorReport),
}

/// A message no operation of the hosted contract matched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMessage {
    /// Action/route header, if the transport carries one
    pub action: Option<String>,
    /// Message body rendered as text
    pub body: String,
}

impl UnknownMessage {
    /// Creates a report for an unroutable message body.
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            action: None,
            body: body.into(),
        }
    }

    /// Attaches the action the sender addressed.
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }
}

/// Flattened description of a dispatch error and its causes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    /// Top-level error message
    pub message: String,
    /// Messages of the `source()` chain, outermost first
    pub causes: Vec<String>,
    /// Lookup id of the offending message when it was classified as poison
    pub poison_lookup_id: Option<u64>,
}

impl ErrorReport {
    /// Captures an error and walks its source chain.
    pub fn from_error(err: &(dyn StdError + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut next = err.source();
        while let Some(cause) = next {
            causes.push(cause.to_string());
            next = cause.source();
        }
        Self {
            message: err.to_string(),
            causes,
            poison_lookup_id: None,
        }
    }

    /// Captures an error raised for a poison message.
    pub fn poison(lookup_id: u64, err: &(dyn StdError + 'static)) -> Self {
        Self {
            poison_lookup_id: Some(lookup_id),
            ..Self::from_error(err)
        }
    }

    /// Returns true if the report concerns a poison message.
    pub fn is_poison(&self) -> bool {
        self.poison_lookup_id.is_some()
    }

    /// Message and causes joined into a single line.
    pub fn chain(&self) -> String {
        std::iter::once(self.message.as_str())
            .chain(self.causes.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" <- ")
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.chain())
    }
}

/// A signal together with the handle that raised it.
pub(crate) struct SignalEnvelope {
    pub source: InstanceSignals,
    pub signal: InstanceSignal,
}

/// Most signals a gate holds before the supervisor adopts its instance.
pub(crate) const PENDING_SIGNAL_LIMIT: usize = 32;

enum GateState {
    Pending(Vec<InstanceSignal>),
    Attached(mpsc::UnboundedSender<Command>),
    Detached,
}

struct Gate {
    id: InstanceId,
    state: Mutex<GateState>,
}

/// Handle an endpoint instance uses to report faults and unroutable messages.
///
/// Cheap to clone; every clone feeds the same gate.
#[derive(Clone)]
pub struct InstanceSignals {
    gate: Arc<Gate>,
}

impl InstanceSignals {
    pub(crate) fn new(id: InstanceId) -> Self {
        Self {
            gate: Arc::new(Gate {
                id,
                state: Mutex::new(GateState::Pending(Vec::new())),
            }),
        }
    }

    /// Identity of the instance this handle belongs to.
    pub fn instance(&self) -> InstanceId {
        self.gate.id
    }

    /// Reports that the instance has faulted.
    ///
    /// Returns false if the signal was dropped because the instance is no
    /// longer observed (it is being stopped or replaced).
    pub fn fault(&self, reason: impl Into<String>) -> bool {
        self.emit(InstanceSignal::Faulted {
            reason: Some(reason.into()),
        })
    }

    /// Reports a message the hosted contract could not route.
    pub fn unknown_message(&self, message: UnknownMessage) -> bool {
        self.emit(InstanceSignal::UnknownMessage(message))
    }

    /// Reports a failure while dispatching a message.
    pub fn dispatch_error(&self, report: ErrorReport) -> bool {
        self.emit(InstanceSignal::DispatchError(report))
    }

    /// Raises a signal. See [`InstanceSignals::fault`] for the return value.
    ///
    /// Before adoption at most 32 signals are held.
    /// Once the buffer is full further signals are dropped and this returns
    /// false, except for the first fault, which displaces the newest entry.
    pub fn emit(&self, signal: InstanceSignal) -> bool {
        let mut state = self.lock();
        match &mut *state {
            GateState::Pending(buffer) => {
                if buffer.len() < PENDING_SIGNAL_LIMIT {
                    buffer.push(signal);
                    return true;
                }
                let is_fault = |s: &InstanceSignal| matches!(s, InstanceSignal::Faulted { .. });
                if !is_fault(&signal) || buffer.iter().any(is_fault) {
                    return false;
                }
                buffer.pop();
                buffer.push(signal);
                true
            }
            GateState::Attached(tx) => tx
                .send(Command::Signal(SignalEnvelope {
                    source: self.clone(),
                    signal,
                }))
                .is_ok(),
            GateState::Detached => false,
        }
    }

    /// Returns true while the supervisor observes this instance.
    pub fn is_attached(&self) -> bool {
        matches!(*self.lock(), GateState::Attached(_))
    }

    /// Returns true once observation has ended for good.
    pub fn is_detached(&self) -> bool {
        matches!(*self.lock(), GateState::Detached)
    }

    /// Number of observers attached to the instance (0 or 1).
    pub fn observer_count(&self) -> usize {
        usize::from(self.is_attached())
    }

    /// Starts forwarding to the supervisor, flushing buffered signals first.
    /// Returns the number of flushed signals.
    pub(crate) fn attach(&self, tx: mpsc::UnboundedSender<Command>) -> usize {
        let mut state = self.lock();
        let buffered = match std::mem::replace(&mut *state, GateState::Detached) {
            GateState::Pending(buffer) => buffer,
            GateState::Attached(previous) => {
                *state = GateState::Attached(previous);
                return 0;
            }
            GateState::Detached => return 0,
        };

        let flushed = buffered.len();
        for signal in buffered {
            let _ = tx.send(Command::Signal(SignalEnvelope {
                source: self.clone(),
                signal,
            }));
        }
        *state = GateState::Attached(tx);
        flushed
    }

    /// Stops observation permanently. Returns true if the gate was attached.
    pub(crate) fn detach(&self) -> bool {
        let mut state = self.lock();
        let previous = std::mem::replace(&mut *state, GateState::Detached);
        matches!(previous, GateState::Attached(_))
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.gate.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for InstanceSignals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceSignals")
            .field("instance", &self.gate.id)
            .field("attached", &self.is_attached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal_of(command: Command) -> InstanceSignal {
        match command {
            Command::Signal(envelope) => envelope.signal,
            _ => panic!("expected a signal command"),
        }
    }

    #[test]
    fn test_signals_before_attach_are_flushed_in_order() {
        let signals = InstanceSignals::new(InstanceId::next());
        assert!(signals.fault("first"));
        assert!(signals.unknown_message(UnknownMessage::new("<x/>")));
        assert!(!signals.is_attached());

        let (tx, mut rx) = mpsc::unbounded_channel();
        assert_eq!(signals.attach(tx), 2);
        assert_eq!(signals.observer_count(), 1);

        assert!(matches!(
            signal_of(rx.try_recv().unwrap()),
            InstanceSignal::Faulted { reason: Some(r) } if r == "first"
        ));
        assert!(matches!(
            signal_of(rx.try_recv().unwrap()),
            InstanceSignal::UnknownMessage(_)
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_pending_buffer_is_bounded_but_keeps_first_fault() {
        let signals = InstanceSignals::new(InstanceId::next());
        for i in 0..PENDING_SIGNAL_LIMIT {
            assert!(signals.unknown_message(UnknownMessage::new(format!("<m{i}/>"))));
        }
        assert!(!signals.unknown_message(UnknownMessage::new("<overflow/>")));
        assert!(signals.fault("listener died"));
        assert!(!signals.fault("second fault"));

        let (tx, mut rx) = mpsc::unbounded_channel();
        assert_eq!(signals.attach(tx), PENDING_SIGNAL_LIMIT);

        let mut flushed = Vec::new();
        while let Ok(command) = rx.try_recv() {
            flushed.push(signal_of(command));
        }
        assert_eq!(flushed.len(), PENDING_SIGNAL_LIMIT);
        assert!(matches!(
            flushed.last(),
            Some(InstanceSignal::Faulted { reason: Some(r) }) if r == "listener died"
        ));
    }

    #[test]
    fn test_detach_drops_later_signals() {
        let signals = InstanceSignals::new(InstanceId::next());
        let (tx, mut rx) = mpsc::unbounded_channel();
        signals.attach(tx);

        let clone = signals.clone();
        assert!(signals.detach());
        assert!(!signals.detach());
        assert!(clone.is_detached());
        assert!(!clone.fault("too late"));
        assert_eq!(clone.observer_count(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_detached_gate_cannot_be_reattached() {
        let signals = InstanceSignals::new(InstanceId::next());
        signals.detach();

        let (tx, _rx) = mpsc::unbounded_channel();
        assert_eq!(signals.attach(tx), 0);
        assert!(signals.is_detached());
    }

    #[test]
    fn test_error_report_walks_sources() {
        #[derive(Debug, thiserror::Error)]
        #[error("dispatch failed")]
        struct Outer(#[source] std::io::Error);

        let err = Outer(std::io::Error::new(std::io::ErrorKind::Other, "pipe closed"));
        let report = ErrorReport::from_error(&err);

        assert_eq!(report.message, "dispatch failed");
        assert_eq!(report.causes, vec!["pipe closed".to_string()]);
        assert_eq!(report.chain(), "dispatch failed <- pipe closed");
    }
}
