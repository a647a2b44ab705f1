//! Process ids, termination reasons, and the other small value types shared
//! across the registry, link, monitor and process modules.

use std::fmt;

/// Stable string identity of a process. Comparable by value; holding one
/// does not imply the process is still alive.
pub type ProcessId = String;

/// A link, monitor or timer identity. Monotonically generated by a
/// [`crate::runtime::Runtime`], never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(pub(crate) u64);

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to a link created by [`crate::runtime::Runtime::link`].
pub type LinkRef = Tag;
/// Handle to a monitor created by [`crate::runtime::Runtime::monitor`].
pub type MonitorRef = Tag;

/// Reason a process gave for terminating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminateReason {
    Normal,
    Shutdown,
    Error(String),
}

impl TerminateReason {
    /// `transient` children are restarted only when the reason is not this.
    pub fn is_normal_or_shutdown(&self) -> bool {
        matches!(self, TerminateReason::Normal | TerminateReason::Shutdown)
    }
}

impl fmt::Display for TerminateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminateReason::Normal => write!(f, "normal"),
            TerminateReason::Shutdown => write!(f, "shutdown"),
            TerminateReason::Error(msg) => write!(f, "error({msg})"),
        }
    }
}

/// Reason observed by a monitor when its target terminates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownReason {
    Normal,
    Shutdown,
    Error(String),
    /// The monitored [`crate::process::Ref`] never corresponded to a live
    /// process at monitor-creation time.
    NoProc,
}

impl From<&TerminateReason> for DownReason {
    fn from(reason: &TerminateReason) -> Self {
        match reason {
            TerminateReason::Normal => DownReason::Normal,
            TerminateReason::Shutdown => DownReason::Shutdown,
            TerminateReason::Error(msg) => DownReason::Error(msg.clone()),
        }
    }
}

impl fmt::Display for DownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownReason::Normal => write!(f, "normal"),
            DownReason::Shutdown => write!(f, "shutdown"),
            DownReason::Error(msg) => write!(f, "error({msg})"),
            DownReason::NoProc => write!(f, "noproc"),
        }
    }
}

/// An exit signal delivered to a trap-exit process's `handle_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitSignal {
    pub from: ProcessId,
    pub reason: TerminateReason,
}
