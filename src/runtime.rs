//! The ambient-stack `Runtime` handle.
//!
//! The distilled design exposes a process-wide default registry, event bus,
//! and id counters as module-level mutable statics. This port encapsulates
//! all of that in one `Runtime` value. [`Runtime::global`] lazily builds a
//! process-wide singleton for ergonomic top-level use; tests are expected to
//! build their own [`Runtime::new`] instead, for isolation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::distribution::DistributionHooks;
use crate::ids::{DownReason, ExitSignal, LinkRef, MonitorRef, ProcessId, Tag, TerminateReason};
use crate::link::LinkRegistry;
use crate::monitor::MonitorRegistry;
use crate::process::events::{LifecycleEvent, EVENT_BUS_CAPACITY};
use crate::registry::Registry;

/// Type-erased control surface every running process registers with the
/// runtime, so link/monitor propagation can reach a peer without knowing
/// its concrete `Behavior` type.
pub(crate) struct ProcessControl {
    pub(crate) trap_exit: Arc<std::sync::atomic::AtomicBool>,
    /// Enqueues an `Info` exit signal into the process's own mailbox.
    /// Returns `false` if the process is already gone.
    pub(crate) deliver_exit: Arc<dyn Fn(ExitSignal) -> bool + Send + Sync>,
    /// Bypasses the mailbox and forces the process through the
    /// termination sequence immediately.
    pub(crate) force_terminate: Arc<dyn Fn(TerminateReason) + Send + Sync>,
}

/// Owns id generation, the default name registry, the link/monitor fabric,
/// the lifecycle event bus, and (optionally) distribution hooks.
pub struct Runtime {
    ids: AtomicU64,
    pub(crate) processes: dashmap::DashMap<ProcessId, ProcessControl>,
    pub registry: Registry,
    pub(crate) links: LinkRegistry,
    pub(crate) monitors: MonitorRegistry,
    events: broadcast::Sender<LifecycleEvent>,
    distribution: RwLock<Option<Arc<dyn DistributionHooks>>>,
}

static GLOBAL: OnceCell<Arc<Runtime>> = OnceCell::new();

impl Runtime {
    pub fn new() -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(EVENT_BUS_CAPACITY);
        Arc::new(Self {
            ids: AtomicU64::new(1),
            processes: dashmap::DashMap::new(),
            registry: Registry::new(),
            links: LinkRegistry::new(),
            monitors: MonitorRegistry::new(),
            events: tx,
            distribution: RwLock::new(None),
        })
    }

    /// Process-wide default runtime, built lazily on first use.
    pub fn global() -> Arc<Self> {
        GLOBAL.get_or_init(Runtime::new).clone()
    }

    pub fn set_distribution_hooks(&self, hooks: Arc<dyn DistributionHooks>) {
        *self.distribution.write() = Some(hooks);
    }

    pub fn distribution_hooks(&self) -> Option<Arc<dyn DistributionHooks>> {
        self.distribution.read().clone()
    }

    /// Monotonic id, formatted with `prefix`, e.g. `"proc-7"`.
    pub fn next_id(&self, prefix: &str) -> String {
        let n = self.ids.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}-{n}")
    }

    pub fn next_tag(&self) -> Tag {
        Tag(self.ids.fetch_add(1, Ordering::Relaxed))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    pub(crate) fn publish(&self, event: LifecycleEvent) {
        // A broadcast send only fails when there are no subscribers left;
        // that's a normal, expected state, not an error.
        let _ = self.events.send(event);
    }

    pub fn is_alive(&self, id: &str) -> bool {
        self.processes.contains_key(id)
    }

    pub(crate) fn register_process(&self, id: ProcessId, control: ProcessControl) {
        self.processes.insert(id, control);
    }

    /// Links `a` and `b`. Both must currently be registered as running.
    pub fn link(&self, a: &str, b: &str) -> Result<LinkRef, crate::error::LinkError> {
        if !self.is_alive(a) || !self.is_alive(b) {
            return Err(crate::error::LinkError::NotRunning);
        }
        Ok(self.links.create(a, b))
    }

    pub fn unlink(&self, link_ref: LinkRef) {
        self.links.remove(link_ref);
    }

    /// Monitors `target` on behalf of `by`. Always succeeds; if `target`
    /// isn't currently alive, a `NoProc` `ProcessDown` is published on the
    /// next scheduler tick.
    pub fn monitor(&self, by: &str, target: &str) -> MonitorRef {
        let monitor_ref = self.monitors.create(by, target);
        if !self.is_alive(target) {
            let events = self.events.clone();
            let owner = by.to_string();
            let target = target.to_string();
            // Drop the just-created record immediately: nothing further
            // should ever notify for a monitor that was noproc from birth.
            self.monitors.remove(monitor_ref);
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                let _ = events.send(LifecycleEvent::ProcessDown {
                    monitor: monitor_ref,
                    owner,
                    target,
                    reason: DownReason::NoProc,
                });
            });
        }
        monitor_ref
    }

    pub fn demonitor(&self, monitor_ref: MonitorRef) {
        self.monitors.remove(monitor_ref);
    }

    /// Bypasses the mailbox and forces `id` through its termination
    /// sequence immediately. A no-op if `id` is already gone. Exposed
    /// publicly (unlike the rest of `ProcessControl`'s plumbing) since
    /// tests and host code occasionally need to simulate an abnormal
    /// crash without holding a typed `Ref<B>`.
    pub fn force_terminate(&self, id: &str, reason: TerminateReason) {
        if let Some(control) = self.processes.get(id) {
            (control.force_terminate)(reason);
        }
    }

    /// Steps 5-9 of the termination sequence (§4.2): exit propagation,
    /// monitor notification/cleanup, registry unbinding, and the final
    /// `Terminated` event. The process itself has already run steps 1-4
    /// (status flip, pending-call rejection, `terminate`, persistence
    /// cleanup) before calling this.
    pub(crate) fn finish_termination(&self, id: &str, reason: TerminateReason) {
        // 5. Exit propagation.
        for peer in self.links.drain_peers_of(id) {
            if matches!(reason, TerminateReason::Normal) {
                continue;
            }
            let Some(control) = self.processes.get(&peer) else {
                continue;
            };
            if control.trap_exit.load(Ordering::SeqCst) {
                let delivered = (control.deliver_exit)(ExitSignal {
                    from: id.to_string(),
                    reason: reason.clone(),
                });
                if !delivered {
                    debug!(peer, "trap-exit peer vanished before exit signal delivery");
                }
            } else {
                (control.force_terminate)(TerminateReason::Error(
                    "linked process exited".to_string(),
                ));
            }
        }

        // 6. Monitor notification.
        let down_reason = DownReason::from(&reason);
        for (monitor_ref, owner) in self.monitors.drain_for_target(id) {
            self.publish(LifecycleEvent::ProcessDown {
                monitor: monitor_ref,
                owner,
                target: id.to_string(),
                reason: down_reason.clone(),
            });
        }

        // 7. Monitors this process itself created: no notification owed.
        self.monitors.remove_by_owner(id);

        // 8. Registry bindings.
        self.registry.remove_process(id);

        // 9. Terminated event, then drop this process's control record.
        self.publish(LifecycleEvent::Terminated {
            id: id.to_string(),
            reason,
        });
        self.processes.remove(id);
    }

    /// Logs and discards an error from a non-call handler invocation
    /// (`handle_cast`/`handle_info`) — there's no caller to surface it to.
    pub(crate) fn log_discarded_handler_error(id: &str, kind: &str, err: impl std::fmt::Display) {
        warn!(process = id, kind, %err, "handler error discarded, state unchanged");
    }
}
