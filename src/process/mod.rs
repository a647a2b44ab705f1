//! The GenServer runtime: per-process mailbox, serialized dispatcher,
//! timer facility, and the behavior contract every process implements.
//!
//! Every process is one `tokio::task` running [`run_dispatcher`], which
//! owns the behavior's state exclusively and serialises handler execution
//! by `.await`ing each handler to completion before pulling the next
//! mailbox entry. A [`Ref<B>`] is the only thing callers hold; it can be
//! cloned freely and is comparable by process id alone.

pub mod events;
pub mod timer;

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{CallError, CastError, PersistenceError, StartError};
use crate::ids::{ExitSignal, LinkRef, MonitorRef, ProcessId, TerminateReason};
use crate::persistence::{EnvelopeMetadata, PersistenceConfig, PersistenceCoupler};
use crate::process::events::LifecycleEvent;
use crate::process::timer::TimerRef;
use crate::runtime::{ProcessControl, Runtime};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(5);

/// The record of callbacks defining one kind of process, plus the message
/// shapes it speaks. `State` is required to be `Clone + Serialize +
/// DeserializeOwned` uniformly (rather than only for behaviors that opt
/// into persistence) so that `start` can accept an optional
/// `PersistenceConfig<B::State>` without splitting the API in two — see
/// DESIGN.md for the trade-off.
#[async_trait]
pub trait Behavior: Sized + Send + 'static {
    type State: Send + Sync + Clone + Serialize + DeserializeOwned + 'static;
    type InitArg: Send + 'static;
    type Call: Send + 'static;
    type Cast: Send + 'static;
    type Reply: Send + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    async fn init(&mut self, arg: Self::InitArg, ctx: &Context<Self>) -> Result<Self::State, Self::Error>;

    async fn handle_call(
        &mut self,
        msg: Self::Call,
        state: &mut Self::State,
        ctx: &Context<Self>,
    ) -> Result<Self::Reply, Self::Error>;

    async fn handle_cast(
        &mut self,
        msg: Self::Cast,
        state: &mut Self::State,
        ctx: &Context<Self>,
    ) -> Result<(), Self::Error>;

    /// Invoked only while trap-exit is enabled; the default is a silent
    /// no-op, matching "absence + trap-exit is legal".
    async fn handle_info(
        &mut self,
        _exit: ExitSignal,
        _state: &mut Self::State,
        _ctx: &Context<Self>,
    ) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Best-effort; a panic or returned error here is logged, never
    /// propagated, and never prevents the transition to `stopped`.
    async fn terminate(&mut self, _reason: &TerminateReason, _state: &mut Self::State) {}

    /// Called before every periodic snapshot. Returning `None` skips that
    /// tick's save. The default snapshots the state unchanged.
    async fn before_persist(&mut self, state: &Self::State) -> Option<Self::State> {
        Some(state.clone())
    }

    /// Called once, after a snapshot is loaded and migrated, before it is
    /// installed as the running state.
    async fn on_state_restore(&mut self, state: Self::State, _meta: &EnvelopeMetadata) -> Self::State {
        state
    }
}

/// Passed to every handler invocation. Carries the process's own `Ref` (for
/// self-sends) and its trap-exit flag.
pub struct Context<B: Behavior> {
    self_ref: Ref<B>,
    trap_exit: Arc<AtomicBool>,
}

impl<B: Behavior> Context<B> {
    pub fn self_ref(&self) -> &Ref<B> {
        &self.self_ref
    }

    pub fn trap_exit(&self) -> bool {
        self.trap_exit.load(Ordering::SeqCst)
    }

    pub fn set_trap_exit(&self, enabled: bool) {
        self.trap_exit.store(enabled, Ordering::SeqCst);
    }
}

/// Opaque, comparable handle to a running (or formerly running) process.
/// Holding a `Ref` does not imply liveness.
pub struct Ref<B: Behavior> {
    id: ProcessId,
    node: Option<String>,
    sender: mpsc::UnboundedSender<MailboxEntry<B>>,
    runtime: Arc<Runtime>,
}

impl<B: Behavior> Clone for Ref<B> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            node: self.node.clone(),
            sender: self.sender.clone(),
            runtime: self.runtime.clone(),
        }
    }
}

impl<B: Behavior> std::fmt::Debug for Ref<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ref").field("id", &self.id).field("node", &self.node).finish()
    }
}

impl<B: Behavior> PartialEq for Ref<B> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl<B: Behavior> Eq for Ref<B> {}

impl<B: Behavior> std::hash::Hash for Ref<B> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<B: Behavior> Ref<B> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    pub fn is_alive(&self) -> bool {
        self.runtime.is_alive(&self.id)
    }

    /// The runtime this process is registered with. Used by layers built on
    /// top of `Ref` (the FSM adapter's deferred-reply ids) that need a tag
    /// generator but aren't part of the core dispatcher.
    pub(crate) fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Enqueues a *Call* and awaits the reply. `timeout` defaults to 5s.
    /// A timed-out call's mailbox entry is dropped if not yet dispatched
    /// (the dispatcher notices the reply sink closed); if already
    /// dispatched, the handler runs to completion but its result is
    /// discarded.
    pub async fn call(&self, msg: B::Call, timeout: Option<Duration>) -> Result<B::Reply, CallError> {
        let timeout = timeout.unwrap_or(DEFAULT_CALL_TIMEOUT);
        let (reply_tx, reply_rx) = oneshot::channel();
        let deadline = Instant::now() + timeout;
        self.sender
            .send(MailboxEntry::Call {
                msg,
                reply: reply_tx,
                deadline,
            })
            .map_err(|_| CallError::NotRunning)?;
        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CallError::NotRunning),
            Err(_) => Err(CallError::Timeout),
        }
    }

    /// Enqueues a *Cast*; fire-and-forget.
    pub fn cast(&self, msg: B::Cast) -> Result<(), CastError> {
        self.sender
            .send(MailboxEntry::Cast { msg })
            .map_err(|_| CastError::NotRunning)
    }

    /// Enqueues a *Stop* and awaits completion. Idempotent: calling this
    /// on an already-stopped (or concurrently stopping) process resolves
    /// immediately once termination completes.
    pub async fn stop(&self, reason: TerminateReason) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.sender.send(MailboxEntry::Stop { reason, done: done_tx }).is_err() {
            return;
        }
        let _ = done_rx.await;
    }

    /// Schedules `msg` to be cast after `delay`. If the process is gone by
    /// the time the timer fires, the message is dropped silently.
    pub fn send_after(&self, msg: B::Cast, delay: Duration) -> TimerRef {
        let sender = self.sender.clone();
        timer::spawn_timer(delay, move || {
            let _ = sender.send(MailboxEntry::Cast { msg });
        })
    }

    /// Bidirectional link with `other`. Requires both processes running.
    pub fn link<C: Behavior>(&self, other: &Ref<C>) -> Result<LinkRef, crate::error::LinkError> {
        self.runtime.link(&self.id, &other.id)
    }

    pub fn unlink(&self, link_ref: LinkRef) {
        self.runtime.unlink(link_ref);
    }

    /// One-way monitor of `target`, owned by `self`. Always succeeds; if
    /// `target` doesn't currently exist, a `noproc` `ProcessDown` is
    /// delivered asynchronously.
    pub fn monitor<C: Behavior>(&self, target: &Ref<C>) -> MonitorRef {
        self.runtime.monitor(&self.id, &target.id)
    }

    pub fn demonitor(&self, monitor_ref: MonitorRef) {
        self.runtime.demonitor(monitor_ref);
    }

    /// Bypasses the mailbox and forces this process through its
    /// termination sequence immediately. Used by supervisors to enforce a
    /// `shutdown_timeout`.
    pub fn force_terminate(&self, reason: TerminateReason) {
        self.runtime.force_terminate(&self.id, reason);
    }

    /// Performs one save synchronously, in the dispatcher's serialization
    /// order. Rejects if persistence isn't configured or the process isn't
    /// running.
    pub async fn checkpoint(&self) -> Result<(), PersistenceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(MailboxEntry::Checkpoint { reply: reply_tx })
            .map_err(|_| PersistenceError::NotRunning)?;
        reply_rx.await.map_err(|_| PersistenceError::NotRunning)?
    }

    pub async fn last_checkpoint_meta(&self) -> Result<Option<EnvelopeMetadata>, PersistenceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(MailboxEntry::CheckpointMeta { reply: reply_tx })
            .map_err(|_| PersistenceError::NotRunning)?;
        reply_rx.await.map_err(|_| PersistenceError::NotRunning)?
    }

    pub async fn clear_persisted_state(&self) -> Result<(), PersistenceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(MailboxEntry::ClearPersisted { reply: reply_tx })
            .map_err(|_| PersistenceError::NotRunning)?;
        reply_rx.await.map_err(|_| PersistenceError::NotRunning)?
    }
}

/// Options accepted by [`start`].
pub struct StartOptions<B: Behavior> {
    pub name: Option<String>,
    pub init_timeout: Duration,
    pub trap_exit: bool,
    pub persistence: Option<PersistenceConfig<B::State>>,
}

impl<B: Behavior> Default for StartOptions<B> {
    fn default() -> Self {
        Self {
            name: None,
            init_timeout: DEFAULT_INIT_TIMEOUT,
            trap_exit: false,
            persistence: None,
        }
    }
}

enum MailboxEntry<B: Behavior> {
    Call {
        msg: B::Call,
        reply: oneshot::Sender<Result<B::Reply, CallError>>,
        deadline: Instant,
    },
    Cast {
        msg: B::Cast,
    },
    Info {
        exit: ExitSignal,
    },
    Stop {
        reason: TerminateReason,
        done: oneshot::Sender<()>,
    },
    Checkpoint {
        reply: oneshot::Sender<Result<(), PersistenceError>>,
    },
    CheckpointMeta {
        reply: oneshot::Sender<Result<Option<EnvelopeMetadata>, PersistenceError>>,
    },
    ClearPersisted {
        reply: oneshot::Sender<Result<(), PersistenceError>>,
    },
    PersistTick,
    CleanupTick,
}

/// Runs `init()` under `options.init_timeout`, performs optional name
/// registration and state restore, then spawns the dispatch loop. See
/// §4.1.
pub async fn start<B: Behavior>(
    mut behavior: B,
    arg: B::InitArg,
    options: StartOptions<B>,
    runtime: &Arc<Runtime>,
) -> Result<Ref<B>, StartError> {
    let id = runtime.next_id("proc");
    let (tx, rx) = mpsc::unbounded_channel();
    let (kill_tx, kill_rx) = mpsc::unbounded_channel();
    let trap_exit = Arc::new(AtomicBool::new(options.trap_exit));

    let self_ref = Ref {
        id: id.clone(),
        node: None,
        sender: tx.clone(),
        runtime: runtime.clone(),
    };
    let ctx = Context {
        self_ref: self_ref.clone(),
        trap_exit: trap_exit.clone(),
    };

    let mut state = tokio::time::timeout(options.init_timeout, behavior.init(arg, &ctx))
        .await
        .map_err(|_| StartError::InitTimeout)?
        .map_err(|e| StartError::Init(e.to_string()))?;

    if let Some(name) = &options.name {
        runtime
            .registry
            .register(name, id.clone())
            .map_err(|_| StartError::AlreadyRegistered(name.clone()))?;
    }

    let persistence = options
        .persistence
        .as_ref()
        .map(|cfg| PersistenceCoupler::new(cfg.clone(), id.clone(), options.name.clone()));

    let mut last_meta = None;
    if let Some(coupler) = &persistence {
        if coupler.config.restore_on_start {
            match coupler.restore().await {
                Ok(Some((restored, meta))) => {
                    state = behavior.on_state_restore(restored, &meta).await;
                    last_meta = Some(meta);
                    runtime.publish(LifecycleEvent::StateRestored { id: id.clone() });
                }
                Ok(None) => {}
                Err(e) => {
                    (coupler.config.on_error)(e.clone());
                    runtime.publish(LifecycleEvent::PersistenceError {
                        id: id.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    let control = ProcessControl {
        trap_exit: trap_exit.clone(),
        deliver_exit: {
            let tx = tx.clone();
            Arc::new(move |exit| tx.send(MailboxEntry::Info { exit }).is_ok())
        },
        force_terminate: {
            let kill_tx = kill_tx.clone();
            Arc::new(move |reason| {
                let _ = kill_tx.send(reason);
            })
        },
    };
    runtime.register_process(id.clone(), control);

    let persist_timer = persistence.as_ref().and_then(|coupler| {
        coupler.config.snapshot_interval.map(|period| {
            let tx = tx.clone();
            timer::spawn_interval(period, move || {
                let _ = tx.send(MailboxEntry::PersistTick);
            })
        })
    });
    let cleanup_timer = persistence.as_ref().and_then(|coupler| {
        coupler.config.cleanup_interval.map(|period| {
            let tx = tx.clone();
            timer::spawn_interval(period, move || {
                let _ = tx.send(MailboxEntry::CleanupTick);
            })
        })
    });

    runtime.publish(LifecycleEvent::Started {
        id: id.clone(),
        name: options.name.clone(),
    });
    info!(process = %id, name = ?options.name, "process started");

    tokio::spawn(run_dispatcher(
        behavior,
        state,
        last_meta,
        self_ref.clone(),
        rx,
        kill_rx,
        trap_exit,
        persistence,
        persist_timer,
        cleanup_timer,
        runtime.clone(),
    ));

    Ok(self_ref)
}

async fn run_dispatcher<B: Behavior>(
    mut behavior: B,
    mut state: B::State,
    mut last_meta: Option<EnvelopeMetadata>,
    self_ref: Ref<B>,
    mut rx: mpsc::UnboundedReceiver<MailboxEntry<B>>,
    mut kill_rx: mpsc::UnboundedReceiver<TerminateReason>,
    trap_exit: Arc<AtomicBool>,
    persistence: Option<PersistenceCoupler<B::State>>,
    persist_timer: Option<TimerRef>,
    cleanup_timer: Option<TimerRef>,
    runtime: Arc<Runtime>,
) {
    let id = self_ref.id.clone();
    let ctx = Context {
        self_ref: self_ref.clone(),
        trap_exit: trap_exit.clone(),
    };

    loop {
        tokio::select! {
            biased;
            Some(reason) = kill_rx.recv() => {
                let drained = drain_pending(&mut rx);
                terminate(&mut behavior, &mut state, reason, &id, &runtime, &persistence, &persist_timer, &cleanup_timer, drained).await;
                break;
            }
            entry = rx.recv() => {
                let Some(entry) = entry else { break };
                match entry {
                    MailboxEntry::Call { msg, reply, deadline } => {
                        if reply.is_closed() {
                            continue;
                        }
                        if Instant::now() > deadline {
                            continue;
                        }
                        match catch_async(behavior.handle_call(msg, &mut state, &ctx)).await {
                            Ok(Ok(value)) => {
                                let _ = reply.send(Ok(value));
                            }
                            Ok(Err(e)) => {
                                let _ = reply.send(Err(CallError::Handler(e.to_string())));
                            }
                            Err(panic_msg) => {
                                let _ = reply.send(Err(CallError::Handler(panic_msg)));
                            }
                        }
                    }
                    MailboxEntry::Cast { msg } => {
                        if let Err(e) = catch_async(behavior.handle_cast(msg, &mut state, &ctx)).await.and_then(|r| r.map_err(|e| e.to_string())) {
                            Runtime::log_discarded_handler_error(&id, "cast", e);
                        }
                    }
                    MailboxEntry::Info { exit } => {
                        if trap_exit.load(Ordering::SeqCst) {
                            if let Err(e) = catch_async(behavior.handle_info(exit, &mut state, &ctx)).await.and_then(|r| r.map_err(|e| e.to_string())) {
                                Runtime::log_discarded_handler_error(&id, "info", e);
                            }
                        }
                    }
                    MailboxEntry::Checkpoint { reply } => {
                        let result = save_now(&persistence, &state, &runtime, &id).await;
                        if let Ok(meta) = &result {
                            last_meta = Some(meta.clone());
                        }
                        let _ = reply.send(result.map(|_| ()));
                    }
                    MailboxEntry::CheckpointMeta { reply } => {
                        let _ = reply.send(Ok(last_meta.clone()));
                    }
                    MailboxEntry::ClearPersisted { reply } => {
                        let result = match &persistence {
                            Some(coupler) => coupler.delete().await,
                            None => Err(PersistenceError::NotConfigured),
                        };
                        let _ = reply.send(result);
                    }
                    MailboxEntry::PersistTick => {
                        if persistence.is_some() {
                            if let Some(snapshot) = behavior.before_persist(&state).await {
                                if let Ok(meta) = save_now(&persistence, &snapshot, &runtime, &id).await {
                                    last_meta = Some(meta);
                                }
                            }
                        }
                    }
                    MailboxEntry::CleanupTick => {
                        if let Some(coupler) = &persistence {
                            if let Some(max_age) = coupler.config.max_state_age {
                                if let Err(e) = coupler.config.adapter.cleanup_older_than(max_age).await {
                                    (coupler.config.on_error)(e.clone());
                                    runtime.publish(LifecycleEvent::PersistenceError { id: id.clone(), message: e.to_string() });
                                }
                            }
                        }
                    }
                    MailboxEntry::Stop { reason, done } => {
                        let drained = drain_pending(&mut rx);
                        terminate(&mut behavior, &mut state, reason, &id, &runtime, &persistence, &persist_timer, &cleanup_timer, drained).await;
                        let _ = done.send(());
                        break;
                    }
                }
            }
        }
    }
}

fn drain_pending<B: Behavior>(rx: &mut mpsc::UnboundedReceiver<MailboxEntry<B>>) -> Vec<MailboxEntry<B>> {
    let mut drained = Vec::new();
    while let Ok(entry) = rx.try_recv() {
        drained.push(entry);
    }
    drained
}

async fn save_now<S: Serialize + DeserializeOwned + Clone + Send + Sync + 'static>(
    persistence: &Option<PersistenceCoupler<S>>,
    state: &S,
    runtime: &Arc<Runtime>,
    id: &str,
) -> Result<EnvelopeMetadata, PersistenceError> {
    let Some(coupler) = persistence else {
        return Err(PersistenceError::NotConfigured);
    };
    match coupler.save(state).await {
        Ok(meta) => {
            runtime.publish(LifecycleEvent::StatePersisted { id: id.to_string() });
            Ok(meta)
        }
        Err(e) => {
            (coupler.config.on_error)(e.clone());
            runtime.publish(LifecycleEvent::PersistenceError {
                id: id.to_string(),
                message: e.to_string(),
            });
            Err(e)
        }
    }
}

/// Steps 1-9 of the termination sequence (§4.2). Identical for graceful
/// (`Stop` dequeued) and forced (kill channel fired) stop paths.
#[allow(clippy::too_many_arguments)]
async fn terminate<B: Behavior>(
    behavior: &mut B,
    state: &mut B::State,
    reason: TerminateReason,
    id: &str,
    runtime: &Arc<Runtime>,
    persistence: &Option<PersistenceCoupler<B::State>>,
    persist_timer: &Option<TimerRef>,
    cleanup_timer: &Option<TimerRef>,
    drained: Vec<MailboxEntry<B>>,
) {
    // 1. Cancel periodic timers.
    if let Some(t) = persist_timer {
        t.cancel();
    }
    if let Some(t) = cleanup_timer {
        t.cancel();
    }

    // 2. Reject pending calls, resolve pending stops.
    for entry in drained {
        match entry {
            MailboxEntry::Call { reply, .. } => {
                let _ = reply.send(Err(CallError::NotRunning));
            }
            MailboxEntry::Stop { done, .. } => {
                let _ = done.send(());
            }
            MailboxEntry::Checkpoint { reply } => {
                let _ = reply.send(Err(PersistenceError::NotRunning));
            }
            MailboxEntry::CheckpointMeta { reply } => {
                let _ = reply.send(Err(PersistenceError::NotRunning));
            }
            MailboxEntry::ClearPersisted { reply } => {
                let _ = reply.send(Err(PersistenceError::NotRunning));
            }
            MailboxEntry::Cast { .. } | MailboxEntry::Info { .. } | MailboxEntry::PersistTick | MailboxEntry::CleanupTick => {}
        }
    }

    // 3. Shutdown save, before `terminate()` runs (§4.4: "after status <-
    // stopping and before terminate, perform one save unless
    // persist_on_shutdown=false").
    if let Some(coupler) = persistence {
        if coupler.config.persist_on_shutdown {
            let _ = save_now(persistence, state, runtime, id).await;
        }
    }

    // 4. terminate() hook, best-effort.
    match catch_async(behavior.terminate(&reason, state)).await {
        Ok(()) => {}
        Err(panic_msg) => warn!(process = id, %panic_msg, "terminate() panicked, ignoring"),
    }

    // Persistence cleanup: delete (if configured), then close. Save-then-
    // delete is intentional and preserved even though it looks wasteful
    // when both are enabled — see DESIGN.md Open Questions.
    if let Some(coupler) = persistence {
        if coupler.config.cleanup_on_terminate {
            if let Err(e) = coupler.delete().await {
                (coupler.config.on_error)(e.clone());
            }
        }
        if let Err(e) = coupler.config.adapter.close().await {
            debug!(process = id, %e, "storage adapter close failed");
        }
    }

    if let TerminateReason::Error(_) = &reason {
        runtime.publish(LifecycleEvent::Crashed {
            id: id.to_string(),
            reason: reason.clone(),
        });
    }

    // 5-9: exit propagation, monitor notify/cleanup, registry removal,
    // `Terminated` event.
    runtime.finish_termination(id, reason);
}

/// Catches a panic inside `fut`, converting it into the same `Err` path a
/// returned error would take. See DESIGN.md's "exception handling as
/// control flow" note.
async fn catch_async<F, T>(fut: F) -> Result<T, String>
where
    F: std::future::Future<Output = T>,
{
    AssertUnwindSafe(fut).catch_unwind().await.map_err(panic_message)
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "process panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{MemoryAdapter, PersistenceConfig};

    struct Counter;

    #[derive(Debug, thiserror::Error)]
    #[error("counter error")]
    struct CounterError;

    enum Call {
        Get,
    }
    enum Cast {
        Inc,
    }

    #[async_trait]
    impl Behavior for Counter {
        type State = i64;
        type InitArg = i64;
        type Call = Call;
        type Cast = Cast;
        type Reply = i64;
        type Error = CounterError;

        async fn init(&mut self, arg: i64, _ctx: &Context<Self>) -> Result<i64, CounterError> {
            Ok(arg)
        }

        async fn handle_call(&mut self, msg: Call, state: &mut i64, _ctx: &Context<Self>) -> Result<i64, CounterError> {
            match msg {
                Call::Get => Ok(*state),
            }
        }

        async fn handle_cast(&mut self, msg: Cast, state: &mut i64, _ctx: &Context<Self>) -> Result<(), CounterError> {
            match msg {
                Cast::Inc => *state += 1,
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn call_and_cast_serialize_through_one_process() {
        let runtime = Runtime::new();
        let r = start(Counter, 0, StartOptions::default(), &runtime).await.unwrap();
        for _ in 0..1000 {
            r.cast(Cast::Inc).unwrap();
        }
        assert_eq!(r.call(Call::Get, None).await.unwrap(), 1000);
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_deregisters() {
        let runtime = Runtime::new();
        let r = start(Counter, 0, StartOptions::default(), &runtime).await.unwrap();
        r.stop(TerminateReason::Normal).await;
        r.stop(TerminateReason::Normal).await;
        assert!(!r.is_alive());
        assert!(matches!(r.call(Call::Get, None).await, Err(CallError::NotRunning)));
    }

    #[tokio::test]
    async fn call_timeout_does_not_crash_target() {
        struct Slow;
        #[async_trait]
        impl Behavior for Slow {
            type State = ();
            type InitArg = ();
            type Call = ();
            type Cast = ();
            type Reply = ();
            type Error = CounterError;
            async fn init(&mut self, _arg: (), _ctx: &Context<Self>) -> Result<(), CounterError> {
                Ok(())
            }
            async fn handle_call(&mut self, _msg: (), _state: &mut (), _ctx: &Context<Self>) -> Result<(), CounterError> {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            }
            async fn handle_cast(&mut self, _msg: (), _state: &mut (), _ctx: &Context<Self>) -> Result<(), CounterError> {
                Ok(())
            }
        }
        let runtime = Runtime::new();
        let r = start(Slow, (), StartOptions::default(), &runtime).await.unwrap();
        let result = r.call((), Some(Duration::from_millis(10))).await;
        assert!(matches!(result, Err(CallError::Timeout)));
        assert!(r.is_alive());
    }

    #[tokio::test]
    async fn handler_error_rejects_call_without_advancing_state() {
        struct Flaky;
        #[async_trait]
        impl Behavior for Flaky {
            type State = i64;
            type InitArg = ();
            type Call = bool; // true => fail
            type Cast = ();
            type Reply = i64;
            type Error = CounterError;
            async fn init(&mut self, _arg: (), _ctx: &Context<Self>) -> Result<i64, CounterError> {
                Ok(0)
            }
            async fn handle_call(&mut self, fail: bool, state: &mut i64, _ctx: &Context<Self>) -> Result<i64, CounterError> {
                if fail {
                    return Err(CounterError);
                }
                *state += 1;
                Ok(*state)
            }
            async fn handle_cast(&mut self, _msg: (), _state: &mut i64, _ctx: &Context<Self>) -> Result<(), CounterError> {
                Ok(())
            }
        }
        let runtime = Runtime::new();
        let r = start(Flaky, (), StartOptions::default(), &runtime).await.unwrap();
        assert!(matches!(r.call(true, None).await, Err(CallError::Handler(_))));
        assert_eq!(r.call(false, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn persistence_restores_across_restart() {
        let adapter = Arc::new(MemoryAdapter::new());
        let runtime = Runtime::new();
        let mut config = PersistenceConfig::<i64>::new(adapter);
        config.key = Some("counter".to_string());
        let options = StartOptions {
            persistence: Some(config.clone()),
            ..Default::default()
        };
        let r = start(Counter, 0, options, &runtime).await.unwrap();
        for _ in 0..1000 {
            r.cast(Cast::Inc).unwrap();
        }
        r.checkpoint().await.unwrap();
        r.stop(TerminateReason::Normal).await;

        let options2 = StartOptions {
            persistence: Some(config),
            ..Default::default()
        };
        let r2 = start(Counter, 0, options2, &runtime).await.unwrap();
        assert_eq!(r2.call(Call::Get, None).await.unwrap(), 1000);
    }
}
