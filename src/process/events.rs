//! Lifecycle event bus.
//!
//! Every process publishes onto one [`tokio::sync::broadcast`] channel owned
//! by the [`crate::runtime::Runtime`]. Supervisor watchers, monitor
//! notifications, and user-level observers all consume the same stream,
//! filtering by process id. Subscribers run in their own task, so a panic or
//! a slow consumer can never block (or unwind into) the process that
//! produced the event.

use crate::ids::{DownReason, ProcessId, TerminateReason};

/// A lifecycle event produced by the runtime.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Started {
        id: ProcessId,
        name: Option<String>,
    },
    Crashed {
        id: ProcessId,
        reason: TerminateReason,
    },
    Terminated {
        id: ProcessId,
        reason: TerminateReason,
    },
    StateRestored {
        id: ProcessId,
    },
    StatePersisted {
        id: ProcessId,
    },
    PersistenceError {
        id: ProcessId,
        message: String,
    },
    /// Delivered to whoever owns `monitor` when `target` terminates (or
    /// never existed, reason [`DownReason::NoProc`]).
    ProcessDown {
        monitor: super::super::ids::MonitorRef,
        owner: ProcessId,
        target: ProcessId,
        reason: DownReason,
    },
}

impl LifecycleEvent {
    /// The id of the process this event is primarily about, where
    /// applicable (`ProcessDown` is about its `owner`, since that's who
    /// filters for it).
    pub fn subject(&self) -> &str {
        match self {
            LifecycleEvent::Started { id, .. }
            | LifecycleEvent::Crashed { id, .. }
            | LifecycleEvent::Terminated { id, .. }
            | LifecycleEvent::StateRestored { id }
            | LifecycleEvent::StatePersisted { id }
            | LifecycleEvent::PersistenceError { id, .. } => id,
            LifecycleEvent::ProcessDown { owner, .. } => owner,
        }
    }
}

/// Default capacity of the runtime's broadcast channel. Chosen generously;
/// a slow subscriber only loses the oldest events (`RecvError::Lagged`), it
/// never blocks a publisher.
pub const EVENT_BUS_CAPACITY: usize = 4096;
