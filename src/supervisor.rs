//! Supervisor runtime: manages a set of child processes under a restart
//! strategy and an intensity budget.
//!
//! A [`Supervisor`] registers itself with the [`Runtime`] under its own id
//! exactly like a GenServer process does, so it can be linked, monitored,
//! and supervised by a parent [`Supervisor`] without the core needing a
//! separate "supervisor-as-process" adapter. What it does not have is a
//! mailbox: all operations are plain async methods on `Arc<Supervisor>`,
//! and child liveness is tracked by subscribing to the runtime's lifecycle
//! event bus rather than polling (the watcher design chosen in DESIGN.md).

use std::any::Any;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashSet;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::SupervisorError;
use crate::ids::{ProcessId, TerminateReason};
use crate::process::events::LifecycleEvent;
use crate::runtime::{ProcessControl, Runtime};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A type-erased handle to a supervised child. Every `Ref<B>` implements
/// this so a `Supervisor` can manage children of unrelated `Behavior`
/// types in the same child list.
#[async_trait::async_trait]
pub trait SupervisedChild: Send + Sync {
    fn id(&self) -> &str;
    fn is_alive(&self) -> bool;
    async fn graceful_stop(&self, reason: TerminateReason);
    fn force_terminate(&self, reason: TerminateReason);
}

#[async_trait::async_trait]
impl<B: crate::process::Behavior> SupervisedChild for crate::process::Ref<B> {
    fn id(&self) -> &str {
        crate::process::Ref::id(self)
    }

    fn is_alive(&self) -> bool {
        crate::process::Ref::is_alive(self)
    }

    async fn graceful_stop(&self, reason: TerminateReason) {
        self.stop(reason).await
    }

    fn force_terminate(&self, reason: TerminateReason) {
        crate::process::Ref::force_terminate(self, reason)
    }
}

pub type ChildFactory = Arc<dyn Fn() -> BoxFuture<'static, Result<Box<dyn SupervisedChild>, String>> + Send + Sync>;
pub type DynamicChildFactory =
    Arc<dyn Fn(Box<dyn Any + Send>) -> BoxFuture<'static, Result<Box<dyn SupervisedChild>, String>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    OneForOne,
    OneForAll,
    RestForOne,
    SimpleOneForOne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    Permanent,
    Transient,
    Temporary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoShutdown {
    Never,
    AnySignificant,
    AllSignificant,
}

#[derive(Debug, Clone, Copy)]
pub struct RestartIntensity {
    pub max_restarts: u32,
    pub within: Duration,
}

impl Default for RestartIntensity {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            within: Duration::from_secs(5),
        }
    }
}

/// A static child declaration. `id` must be unique within the supervisor.
#[derive(Clone)]
pub struct ChildSpec {
    pub id: String,
    pub start: ChildFactory,
    pub restart: RestartPolicy,
    pub shutdown_timeout: Duration,
    pub significant: bool,
}

impl ChildSpec {
    pub fn new(id: impl Into<String>, start: ChildFactory) -> Self {
        Self {
            id: id.into(),
            start,
            restart: RestartPolicy::Permanent,
            shutdown_timeout: Duration::from_secs(5),
            significant: false,
        }
    }
}

/// The template `simple_one_for_one` spawns every dynamic child from.
#[derive(Clone)]
pub struct ChildTemplate {
    pub start: DynamicChildFactory,
    pub restart: RestartPolicy,
    pub shutdown_timeout: Duration,
    pub significant: bool,
}

pub struct SupervisorOptions {
    pub strategy: Strategy,
    pub intensity: RestartIntensity,
    pub auto_shutdown: AutoShutdown,
    pub template: Option<ChildTemplate>,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            strategy: Strategy::OneForOne,
            intensity: RestartIntensity::default(),
            auto_shutdown: AutoShutdown::Never,
            template: None,
        }
    }
}

struct RunningChild {
    spec: ChildSpec,
    child: Box<dyn SupervisedChild>,
    restart_count: u32,
    last_exit_reason: Option<TerminateReason>,
}

/// Read-only introspection snapshot for one child.
#[derive(Debug, Clone)]
pub struct ChildInfo {
    pub id: String,
    pub process_id: ProcessId,
    pub restart_count: u32,
    pub significant: bool,
    pub alive: bool,
}

struct Inner {
    id: String,
    runtime: Arc<Runtime>,
    strategy: Strategy,
    intensity: RestartIntensity,
    auto_shutdown: AutoShutdown,
    template: Option<ChildTemplate>,
    /// Declaration/start order. The suffix semantics of `rest_for_one`
    /// depend on this staying accurate across restarts.
    order: Mutex<VecDeque<String>>,
    children: dashmap::DashMap<String, RunningChild>,
    /// Ids the supervisor is itself in the middle of stopping — the
    /// watcher ignores `Terminated` events for these so a managed restart
    /// isn't double-handled as an organic crash.
    expected_exits: DashSet<String>,
    restart_timestamps: Mutex<Vec<Instant>>,
    total_restarts: AtomicU64,
    watchdog: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// A running supervisor. Cheaply clonable as `Arc<Supervisor>`.
pub struct Supervisor(Inner);

impl Supervisor {
    /// Starts every `spec` in declaration order. On any start failure,
    /// already-started siblings are shut down in reverse order and the
    /// whole call fails.
    pub async fn start(
        id: impl Into<String>,
        specs: Vec<ChildSpec>,
        options: SupervisorOptions,
        runtime: &Arc<Runtime>,
    ) -> Result<Arc<Supervisor>, SupervisorError> {
        if options.strategy == Strategy::SimpleOneForOne && options.template.is_none() {
            return Err(SupervisorError::InvalidConfig(
                "simple_one_for_one requires a child template".to_string(),
            ));
        }
        if options.strategy != Strategy::SimpleOneForOne && !specs.is_empty() {
            let mut seen = std::collections::HashSet::new();
            for spec in &specs {
                if !seen.insert(spec.id.clone()) {
                    return Err(SupervisorError::DuplicateChild(spec.id.clone()));
                }
            }
        }

        let id = id.into();
        let sup = Arc::new(Supervisor(Inner {
            id: id.clone(),
            runtime: runtime.clone(),
            strategy: options.strategy,
            intensity: options.intensity,
            auto_shutdown: options.auto_shutdown,
            template: options.template,
            order: Mutex::new(VecDeque::new()),
            children: dashmap::DashMap::new(),
            expected_exits: DashSet::new(),
            restart_timestamps: Mutex::new(Vec::new()),
            total_restarts: AtomicU64::new(0),
            watchdog: Mutex::new(None),
        }));

        let mut started_ids = Vec::new();
        for spec in specs {
            match (spec.start)().await {
                Ok(child) => {
                    let child_id = spec.id.clone();
                    sup.0.children.insert(
                        child_id.clone(),
                        RunningChild {
                            spec,
                            child,
                            restart_count: 0,
                            last_exit_reason: None,
                        },
                    );
                    sup.0.order.lock().await.push_back(child_id.clone());
                    started_ids.push(child_id);
                }
                Err(e) => {
                    for started in started_ids.into_iter().rev() {
                        sup.stop_child_unmanaged(&started, TerminateReason::Shutdown).await;
                    }
                    return Err(SupervisorError::StartFailed(e));
                }
            }
        }

        sup.register_self();
        sup.spawn_watchdog();
        info!(supervisor = %id, "supervisor started");
        Ok(sup)
    }

    fn register_self(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let control = ProcessControl {
            trap_exit: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            deliver_exit: Arc::new(|_| false),
            force_terminate: Arc::new(move |reason| {
                if let Some(sup) = weak.upgrade() {
                    let sup2 = sup.clone();
                    tokio::spawn(async move { sup2.shutdown(reason).await });
                }
            }),
        };
        self.0.runtime.register_process(self.0.id.clone(), control);
    }

    fn spawn_watchdog(self: &Arc<Self>) {
        let sup = self.clone();
        let mut events = self.0.runtime.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(LifecycleEvent::Terminated { id, reason }) => {
                        if sup.0.expected_exits.remove(&id).is_some() {
                            continue;
                        }
                        if sup.0.children.contains_key(&id) {
                            sup.on_child_terminated(id, reason).await;
                        }
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        // `try_lock` is safe here: nothing else touches `watchdog` before
        // `start` returns.
        if let Ok(mut slot) = self.0.watchdog.try_lock() {
            *slot = Some(handle);
        }
    }

    pub fn id(&self) -> &str {
        &self.0.id
    }

    pub async fn children(&self) -> Vec<ChildInfo> {
        let order = self.0.order.lock().await;
        order
            .iter()
            .filter_map(|id| {
                self.0.children.get(id).map(|c| ChildInfo {
                    id: id.clone(),
                    process_id: c.child.id().to_string(),
                    restart_count: c.restart_count,
                    significant: c.spec.significant,
                    alive: c.child.is_alive(),
                })
            })
            .collect()
    }

    /// Adds a new child. For `simple_one_for_one`, use
    /// [`Supervisor::start_dynamic_child`] instead.
    pub async fn start_child(&self, spec: ChildSpec) -> Result<(), SupervisorError> {
        if self.0.strategy == Strategy::SimpleOneForOne {
            return Err(SupervisorError::InvalidConfig(
                "simple_one_for_one only accepts dynamic children".to_string(),
            ));
        }
        if self.0.children.contains_key(&spec.id) {
            return Err(SupervisorError::DuplicateChild(spec.id));
        }
        let child = (spec.start)().await.map_err(SupervisorError::StartFailed)?;
        let id = spec.id.clone();
        self.0.children.insert(
            id.clone(),
            RunningChild {
                spec,
                child,
                restart_count: 0,
                last_exit_reason: None,
            },
        );
        self.0.order.lock().await.push_back(id);
        Ok(())
    }

    /// Spawns a new child from the `simple_one_for_one` template.
    pub async fn start_dynamic_child(&self, args: Box<dyn Any + Send>) -> Result<ProcessId, SupervisorError> {
        let template = self
            .0
            .template
            .clone()
            .ok_or_else(|| SupervisorError::InvalidConfig("no child template configured".to_string()))?;
        let child = (template.start)(args).await.map_err(SupervisorError::StartFailed)?;
        let id = child.id().to_string();
        let spec = ChildSpec {
            id: id.clone(),
            start: Arc::new(|| Box::pin(async { Err("simple_one_for_one children cannot restart via this factory".to_string()) })),
            restart: template.restart,
            shutdown_timeout: template.shutdown_timeout,
            significant: template.significant,
        };
        let process_id = child.id().to_string();
        self.0.children.insert(
            id.clone(),
            RunningChild {
                spec,
                child,
                restart_count: 0,
                last_exit_reason: None,
            },
        );
        self.0.order.lock().await.push_back(id);
        Ok(process_id)
    }

    /// Graceful stop, then permanent removal. Triggers the auto-shutdown
    /// check.
    pub async fn terminate_child(&self, id: &str) -> Result<(), SupervisorError> {
        let removed = self.stop_child_unmanaged(id, TerminateReason::Shutdown).await;
        let Some(running) = removed else {
            return Err(SupervisorError::ChildNotFound(id.to_string()));
        };
        self.0.order.lock().await.retain(|x| x != id);
        self.check_auto_shutdown(running.spec.significant).await;
        Ok(())
    }

    /// Graceful stop, then a fresh start via the spec's factory. Not
    /// subject to the intensity window.
    pub async fn restart_child(&self, id: &str) -> Result<(), SupervisorError> {
        let running = self.stop_child_unmanaged(id, TerminateReason::Shutdown).await;
        let Some(mut running) = running else {
            return Err(SupervisorError::ChildNotFound(id.to_string()));
        };
        let child = (running.spec.start)().await.map_err(SupervisorError::StartFailed)?;
        running.child = child;
        running.restart_count += 1;
        self.0.children.insert(id.to_string(), running);
        Ok(())
    }

    /// Stops `id` gracefully (marking the exit as expected so the watchdog
    /// doesn't also try to restart it), enforcing `shutdown_timeout`.
    /// Returns the removed record, if any.
    async fn stop_child_unmanaged(&self, id: &str, reason: TerminateReason) -> Option<RunningChild> {
        let (_, running) = self.0.children.remove(id)?;
        self.0.expected_exits.insert(id.to_string());
        self.stop_with_deadline(&running.child, &running.spec, reason).await;
        Some(running)
    }

    async fn stop_with_deadline(&self, child: &dyn SupervisedChild, spec: &ChildSpec, reason: TerminateReason) {
        let result = tokio::time::timeout(spec.shutdown_timeout, child.graceful_stop(reason.clone())).await;
        if result.is_err() {
            warn!(child = spec.id, "shutdown_timeout exceeded, forcing termination");
            child.force_terminate(TerminateReason::Error("shutdown_timeout exceeded".to_string()));
        }
    }

    async fn check_auto_shutdown(self: &Arc<Self>, removed_was_significant: bool) {
        let should_stop = match self.0.auto_shutdown {
            AutoShutdown::Never => false,
            AutoShutdown::AnySignificant => removed_was_significant,
            AutoShutdown::AllSignificant => {
                removed_was_significant && !self.0.children.iter().any(|c| c.spec.significant)
            }
        };
        if should_stop {
            let sup = self.clone();
            tokio::spawn(async move { sup.shutdown(TerminateReason::Shutdown).await });
        }
    }

    /// Prunes the sliding window and, if the pruned count already meets the
    /// budget, fails *before* recording this restart — so exactly
    /// `max_restarts` restarts are allowed to happen and the next crash
    /// after that is the one that shuts the supervisor down (§4.3, §8
    /// scenario 4).
    async fn record_restart(&self) -> Result<(), SupervisorError> {
        let mut timestamps = self.0.restart_timestamps.lock().await;
        let now = Instant::now();
        timestamps.retain(|t| now.duration_since(*t) <= self.0.intensity.within);
        if timestamps.len() as u32 >= self.0.intensity.max_restarts {
            return Err(SupervisorError::MaxRestartsExceeded {
                max_restarts: self.0.intensity.max_restarts,
                within_ms: self.0.intensity.within.as_millis() as u64,
            });
        }
        timestamps.push(now);
        self.0.total_restarts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn on_child_terminated(self: &Arc<Self>, id: String, reason: TerminateReason) {
        let Some((_, running)) = self.0.children.remove(&id) else {
            return;
        };

        let should_restart = match running.spec.restart {
            RestartPolicy::Permanent => true,
            RestartPolicy::Transient => !reason.is_normal_or_shutdown(),
            RestartPolicy::Temporary => false,
        };

        if !should_restart {
            self.0.order.lock().await.retain(|x| x != &id);
            self.check_auto_shutdown(running.spec.significant).await;
            return;
        }

        if let Err(SupervisorError::MaxRestartsExceeded { max_restarts, within_ms }) = self.record_restart().await {
            error!(supervisor = %self.0.id, max_restarts, within_ms, "restart intensity exceeded, shutting down");
            // Put the failed child back so shutdown() can account for it
            // when stopping the remaining tree.
            self.0.children.insert(id, running);
            self.shutdown(TerminateReason::Error("restart intensity exceeded".to_string())).await;
            return;
        }

        match self.0.strategy {
            Strategy::OneForOne | Strategy::SimpleOneForOne => {
                self.restart_single(id, running).await;
            }
            Strategy::OneForAll => {
                self.restart_one_for_all(id, running, reason).await;
            }
            Strategy::RestForOne => {
                self.restart_rest_for_one(id, running, reason).await;
            }
        }
    }

    async fn restart_single(self: &Arc<Self>, id: String, mut running: RunningChild) {
        match (running.spec.start)().await {
            Ok(child) => {
                running.child = child;
                running.restart_count += 1;
                running.last_exit_reason = None;
                self.0.children.insert(id, running);
            }
            Err(e) => {
                error!(supervisor = %self.0.id, child = %id, error = %e, "child restart failed");
                self.0.order.lock().await.retain(|x| x != &id);
                self.shutdown(TerminateReason::Error(format!("child {id} failed to restart: {e}")))
                    .await;
            }
        }
    }

    /// Stop every other running child (reverse start order), then restart
    /// everyone (start order), including the one that just crashed.
    async fn restart_one_for_all(self: &Arc<Self>, crashed_id: String, crashed: RunningChild, reason: TerminateReason) {
        let order: Vec<String> = self.0.order.lock().await.iter().cloned().collect();
        let mut removed = vec![(crashed_id.clone(), crashed, reason)];
        for other_id in order.iter().rev() {
            if let Some((_, running)) = self.0.children.remove(other_id) {
                self.0.expected_exits.insert(other_id.clone());
                self.stop_with_deadline(&running.child, &running.spec, TerminateReason::Shutdown).await;
                removed.push((other_id.clone(), running, TerminateReason::Shutdown));
            }
        }
        removed.reverse();
        self.restart_batch(order, removed).await;
    }

    /// Stop the crashed child and every child started after it (reverse
    /// order), then restart that suffix (start order).
    async fn restart_rest_for_one(self: &Arc<Self>, crashed_id: String, crashed: RunningChild, reason: TerminateReason) {
        let order: Vec<String> = self.0.order.lock().await.iter().cloned().collect();
        let crash_pos = order.iter().position(|x| x == &crashed_id).unwrap_or(order.len());
        let suffix: Vec<String> = order[crash_pos + 1..].to_vec();

        let mut removed = vec![(crashed_id.clone(), crashed, reason)];
        for other_id in suffix.iter().rev() {
            if let Some((_, running)) = self.0.children.remove(other_id) {
                self.0.expected_exits.insert(other_id.clone());
                self.stop_with_deadline(&running.child, &running.spec, TerminateReason::Shutdown).await;
                removed.push((other_id.clone(), running, TerminateReason::Shutdown));
            }
        }
        removed.reverse();
        let restart_order: Vec<String> = std::iter::once(crashed_id).chain(suffix).collect();
        self.restart_batch(restart_order, removed).await;
    }

    async fn restart_batch(self: &Arc<Self>, restart_order: Vec<String>, mut removed: Vec<(String, RunningChild, TerminateReason)>) {
        let mut by_id: std::collections::HashMap<String, RunningChild> =
            removed.drain(..).map(|(id, running, _)| (id, running)).collect();

        for id in &restart_order {
            let Some(mut running) = by_id.remove(id) else { continue };
            match (running.spec.start)().await {
                Ok(child) => {
                    running.child = child;
                    running.restart_count += 1;
                    running.last_exit_reason = None;
                    self.0.children.insert(id.clone(), running);
                }
                Err(e) => {
                    error!(supervisor = %self.0.id, child = %id, error = %e, "child restart failed");
                    self.0.order.lock().await.retain(|x| x != id);
                    self.shutdown(TerminateReason::Error(format!("child {id} failed to restart: {e}")))
                        .await;
                    return;
                }
            }
        }
    }

    /// Stops every child in reverse declaration order, clears the
    /// watchdog, and emits `Terminated` for the supervisor itself.
    pub async fn shutdown(self: &Arc<Self>, reason: TerminateReason) {
        let order: Vec<String> = self.0.order.lock().await.drain(..).collect();
        for id in order.into_iter().rev() {
            if let Some((_, running)) = self.0.children.remove(&id) {
                self.0.expected_exits.insert(id);
                self.stop_with_deadline(&running.child, &running.spec, reason.clone()).await;
            }
        }
        if let Some(handle) = self.0.watchdog.lock().await.take() {
            handle.abort();
        }
        self.0.runtime.finish_termination(&self.0.id, reason);
        info!(supervisor = %self.0.id, "supervisor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CallError;
    use crate::process::{self, Behavior, Context, Ref, StartOptions};
    use async_trait::async_trait;

    struct Noop;
    #[derive(Debug, thiserror::Error)]
    #[error("noop error")]
    struct NoopError;

    #[async_trait]
    impl Behavior for Noop {
        type State = ();
        type InitArg = ();
        type Call = ();
        type Cast = ();
        type Reply = ();
        type Error = NoopError;
        async fn init(&mut self, _arg: (), _ctx: &Context<Self>) -> Result<(), NoopError> {
            Ok(())
        }
        async fn handle_call(&mut self, _msg: (), _state: &mut (), _ctx: &Context<Self>) -> Result<(), NoopError> {
            Ok(())
        }
        async fn handle_cast(&mut self, _msg: (), _state: &mut (), _ctx: &Context<Self>) -> Result<(), NoopError> {
            Ok(())
        }
    }

    fn spec(runtime: Arc<Runtime>, id: &str) -> ChildSpec {
        let runtime = runtime.clone();
        ChildSpec::new(
            id,
            Arc::new(move || {
                let runtime = runtime.clone();
                Box::pin(async move {
                    process::start(Noop, (), StartOptions::default(), &runtime)
                        .await
                        .map(|r| Box::new(r) as Box<dyn SupervisedChild>)
                        .map_err(|e| e.to_string())
                })
            }),
        )
    }

    #[tokio::test]
    async fn one_for_one_restarts_only_the_crashed_child() {
        let runtime = Runtime::new();
        let sup = Supervisor::start(
            "sup",
            vec![spec(runtime.clone(), "a"), spec(runtime.clone(), "b"), spec(runtime.clone(), "c")],
            SupervisorOptions::default(),
            &runtime,
        )
        .await
        .unwrap();

        let before = sup.children().await;
        let b_id = before.iter().find(|c| c.id == "b").unwrap().process_id.clone();
        runtime.force_terminate(&b_id, TerminateReason::Error("boom".to_string()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let after = sup.children().await;
        let a_after = after.iter().find(|c| c.id == "a").unwrap();
        let b_after = after.iter().find(|c| c.id == "b").unwrap();
        assert_eq!(a_after.process_id, before.iter().find(|c| c.id == "a").unwrap().process_id);
        assert_ne!(b_after.process_id, b_id);
        assert!(b_after.alive);
    }

    #[tokio::test]
    async fn intensity_window_allows_exactly_max_restarts_then_shuts_down() {
        let runtime = Runtime::new();
        let mut opts = SupervisorOptions::default();
        opts.intensity = RestartIntensity {
            max_restarts: 2,
            within: Duration::from_secs(5),
        };
        let sup = Supervisor::start("sup", vec![spec(runtime.clone(), "a")], opts, &runtime)
            .await
            .unwrap();

        // Two crashes within the window are each restarted...
        for _ in 0..2 {
            let id = sup.children().await[0].process_id.clone();
            runtime.force_terminate(&id, TerminateReason::Error("boom".to_string()));
            tokio::time::sleep(Duration::from_millis(30)).await;
            assert!(runtime.is_alive(sup.id()), "supervisor should survive within its restart budget");
        }
        assert_eq!(sup.children().await[0].restart_count, 2);

        // ...the third crash exceeds the budget and shuts the supervisor down.
        let id = sup.children().await[0].process_id.clone();
        runtime.force_terminate(&id, TerminateReason::Error("boom".to_string()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!runtime.is_alive(sup.id()));
    }

    #[tokio::test]
    async fn terminate_child_triggers_any_significant_auto_shutdown() {
        let runtime = Runtime::new();
        let mut s = spec(runtime.clone(), "a");
        s.significant = true;
        s.restart = RestartPolicy::Temporary;
        let mut opts = SupervisorOptions::default();
        opts.auto_shutdown = AutoShutdown::AnySignificant;
        let sup = Supervisor::start("sup", vec![s], opts, &runtime).await.unwrap();
        sup.terminate_child("a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!runtime.is_alive(sup.id()));
    }

    #[allow(dead_code)]
    fn _unused(_e: CallError) {}
}
