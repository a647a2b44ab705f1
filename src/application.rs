//! Top-level lifecycle controller binding a [`Supervisor`] tree to the OS
//! signal boundary (§6).
//!
//! `Application` is the only piece of this crate that ever looks at
//! `SIGINT`/`SIGTERM`. Everything below it only ever sees `stop`/`shutdown`
//! calls triggered either by a signal or by the host calling
//! [`Application::stop`] directly; the distinction is invisible past this
//! layer.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::ApplicationError;
use crate::ids::TerminateReason;
use crate::supervisor::Supervisor;

const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);

type PrepStopHook = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Options accepted by [`Application::start`].
pub struct ApplicationOptions {
    pub handle_signals: bool,
    pub stop_timeout: Duration,
    /// Run before the supervisor tree is torn down, e.g. to drain an
    /// external listener. Best-effort; not subject to `stop_timeout`
    /// itself but counted within the overall sequence.
    pub prep_stop: Option<PrepStopHook>,
}

impl Default for ApplicationOptions {
    fn default() -> Self {
        Self {
            handle_signals: true,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            prep_stop: None,
        }
    }
}

/// Binds a [`Supervisor`] to the process's signal boundary. Cheaply
/// clonable as `Arc<Application>`.
pub struct Application {
    supervisor: Arc<Supervisor>,
    options: ApplicationOptions,
    shutting_down: Arc<AtomicBool>,
    signal_task: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Application {
    /// Wraps an already-started supervisor tree and, if
    /// `options.handle_signals`, spawns the signal listener.
    pub fn start(supervisor: Arc<Supervisor>, options: ApplicationOptions) -> Arc<Application> {
        let app = Arc::new(Application {
            supervisor,
            options,
            shutting_down: Arc::new(AtomicBool::new(false)),
            signal_task: tokio::sync::Mutex::new(None),
        });
        if app.options.handle_signals {
            app.spawn_signal_listener();
        }
        app
    }

    fn spawn_signal_listener(self: &Arc<Self>) {
        let app = self.clone();
        let handle = tokio::spawn(async move {
            #[cfg(unix)]
            {
                let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(%e, "failed to install SIGTERM handler");
                        return;
                    }
                };
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = tokio::signal::ctrl_c().await;
            }
            info!("shutdown signal received");
            if let Err(e) = app.stop().await {
                warn!(%e, "application stop did not complete within stop_timeout");
            }
        });
        // No concurrent access yet; this is the only writer before `start`
        // returns the Arc to the caller.
        if let Ok(mut slot) = self.signal_task.try_lock() {
            *slot = Some(handle);
        }
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// Runs `prep_stop`, stops the supervisor tree, then marks the
    /// application stopped. Idempotent: a second call while shutdown is
    /// already in progress returns immediately without re-running the
    /// sequence. Bounded by `stop_timeout`.
    pub async fn stop(&self) -> Result<(), ApplicationError> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let sequence = async {
            if let Some(hook) = &self.options.prep_stop {
                (hook)().await;
            }
            self.supervisor.shutdown(TerminateReason::Shutdown).await;
        };

        match tokio::time::timeout(self.options.stop_timeout, sequence).await {
            Ok(()) => {
                info!("application stopped");
                Ok(())
            }
            Err(_) => {
                warn!("application stop_timeout exceeded");
                Err(ApplicationError::StopTimeout)
            }
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}
