//! Crate-wide error taxonomy.
//!
//! Errors are grouped by the kind of fault they represent (caller input,
//! timeout, handler fault, supervisor fault, persistence fault) rather than
//! by the module that raises them, mirroring how callers are expected to
//! react: recover locally, escalate to a supervisor, or surface to the host.

use thiserror::Error;

/// Failure starting a process with [`crate::process::start`].
#[derive(Debug, Error)]
pub enum StartError {
    #[error("init failed: {0}")]
    Init(String),
    #[error("init timed out")]
    InitTimeout,
    #[error("name {0:?} is already registered")]
    AlreadyRegistered(String),
}

/// Failure of [`crate::process::Ref::call`].
#[derive(Debug, Error, Clone)]
pub enum CallError {
    #[error("call timed out")]
    Timeout,
    #[error("process is not running")]
    NotRunning,
    #[error("handler returned an error: {0}")]
    Handler(String),
}

/// Failure of [`crate::process::Ref::cast`].
#[derive(Debug, Error, Clone, Copy)]
pub enum CastError {
    #[error("process is not running")]
    NotRunning,
}

/// Failure of link operations.
#[derive(Debug, Error, Clone, Copy)]
pub enum LinkError {
    #[error("process is not running")]
    NotRunning,
}

/// Failure of [`crate::registry::Registry`] operations.
#[derive(Debug, Error, Clone)]
pub enum RegistryError {
    #[error("no process registered under {0:?}")]
    NotFound(String),
    #[error("name {0:?} is already registered")]
    AlreadyRegistered(String),
    #[error("this reference is already registered under {0:?}")]
    DuplicateRef(String),
}

/// Failure of [`crate::supervisor::Supervisor`] operations.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("child {0:?} is already present")]
    DuplicateChild(String),
    #[error("no child {0:?}")]
    ChildNotFound(String),
    #[error("restart intensity exceeded ({max_restarts} restarts within {within_ms}ms)")]
    MaxRestartsExceeded { max_restarts: u32, within_ms: u64 },
    #[error("invalid supervisor configuration: {0}")]
    InvalidConfig(String),
    #[error("child failed to start: {0}")]
    StartFailed(String),
}

/// Failure of the persistence coupler. Never fatal to the owning process;
/// always routed to `on_error` and a `PersistenceError` lifecycle event.
#[derive(Debug, Error, Clone)]
pub enum PersistenceError {
    #[error("persistence is not configured for this process")]
    NotConfigured,
    #[error("process is not running")]
    NotRunning,
    #[error("load failed: {0}")]
    Load(String),
    #[error("save failed: {0}")]
    Save(String),
    #[error("serialization failed: {0}")]
    Serialize(String),
    #[error("loaded state is stale")]
    Stale,
    #[error("migration failed: {0}")]
    Migration(String),
}

/// Failure of [`crate::application::Application`] lifecycle operations.
#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("application start timed out")]
    StartTimeout,
    #[error("application stop timed out")]
    StopTimeout,
}
