//! An embeddable Erlang/OTP-style actor runtime: `GenServer` processes with
//! serialized mailboxes, a `Supervisor` layer with configurable restart
//! strategies, a link/monitor fabric, a `GenStateMachine` built on top of
//! the `GenServer` dispatcher, and a persistence coupler for snapshotting
//! process state to pluggable storage.
//!
//! Start here:
//! - [`process`] — `Behavior`, `Ref`, `start`. The mailbox and dispatcher.
//! - [`supervisor`] — `Supervisor`, restart strategies, child specs.
//! - [`fsm`] — `StateMachine`, `Process`, deferred replies.
//! - [`application`] — binds a supervisor tree to the OS signal boundary.
//! - [`persistence`] — `StorageAdapter`, `PersistenceConfig`, the built-in
//!   `MemoryAdapter`/`FileAdapter`.
//! - [`runtime`] — the `Runtime` handle everything above is threaded
//!   through; `Runtime::global()` for process-wide ambient use, `Runtime::
//!   new()` for isolated (e.g. test) instances.

pub mod application;
pub mod distribution;
pub mod error;
pub mod fsm;
pub mod ids;
pub mod link;
pub mod monitor;
pub mod persistence;
pub mod process;
pub mod registry;
pub mod runtime;
pub mod supervisor;

pub use error::{
    ApplicationError, CallError, CastError, LinkError, PersistenceError, RegistryError, StartError, SupervisorError,
};
pub use ids::{DownReason, ExitSignal, LinkRef, MonitorRef, ProcessId, TerminateReason};
pub use process::{Behavior, Context, Ref, StartOptions};
pub use process::events::LifecycleEvent;
pub use registry::Registry;
pub use runtime::Runtime;
