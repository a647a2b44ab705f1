//! Non-durable wall-clock timers used by `send_after`, FSM state/event/
//! generic timeouts, and the persistence coupler's periodic save/cleanup.
//!
//! A [`TimerRef`] owns an [`tokio::task::AbortHandle`] plus a `claimed` flag
//! shared with the timer task. Firing and cancelling both try to flip the
//! same flag from `false` to `true`; whoever wins decides whether the
//! message is actually delivered. This gives the required law without a
//! central timer table: `cancel()` called twice returns `true` then `false`,
//! and a timer can never fire after it has been cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::AbortHandle;

/// A handle to a scheduled timer. Cancellable until it fires.
#[derive(Clone)]
pub struct TimerRef {
    abort: AbortHandle,
    claimed: Arc<AtomicBool>,
}

impl TimerRef {
    /// Cancel the timer. Returns `true` iff this call is the one that
    /// prevented the timer from firing.
    pub fn cancel(&self) -> bool {
        let won = self
            .claimed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if won {
            self.abort.abort();
        }
        won
    }
}

/// Spawns a one-shot timer that invokes `on_fire` after `delay`, unless
/// cancelled first. `on_fire` only runs if it wins the race against
/// [`TimerRef::cancel`].
pub fn spawn_timer<F>(delay: Duration, on_fire: F) -> TimerRef
where
    F: FnOnce() + Send + 'static,
{
    let claimed = Arc::new(AtomicBool::new(false));
    let claimed_task = claimed.clone();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if claimed_task
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            on_fire();
        }
    });
    TimerRef {
        abort: handle.abort_handle(),
        claimed,
    }
}

/// Spawns a recurring timer that invokes `on_tick` every `period` until
/// cancelled. Unlike [`spawn_timer`], repeated firing is expected, so the
/// `claimed` flag only gates final cancellation, not each tick.
pub fn spawn_interval<F>(period: Duration, mut on_tick: F) -> TimerRef
where
    F: FnMut() + Send + 'static,
{
    let claimed = Arc::new(AtomicBool::new(false));
    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            on_tick();
        }
    });
    TimerRef {
        abort: handle.abort_handle(),
        claimed,
    }
}
