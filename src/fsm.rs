//! `GenStateMachine`: a finite-state-machine `Behavior` built on top of the
//! GenServer dispatcher (§4.5).
//!
//! A [`StateMachine`] implementation owns no mailbox or scheduling logic of
//! its own — [`Process<M>`] is the `Behavior` that actually runs, translating
//! `cast`s into `handle_event` dispatch, state/event/generic timeouts into
//! self-casts, and `Action::Reply` into resolution of a deferred-call slot.
//! This keeps the FSM layer a pure consumer of `process::start`'s mailbox,
//! termination sequencing, and persistence coupling; it adds no new
//! synchronization primitive of its own beyond the bookkeeping kept on the
//! `Process<M>` value, which (like every `Behavior`) is owned exclusively by
//! its own dispatcher task.

use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::{CallError, StartError};
use crate::ids::TerminateReason;
use crate::process::timer::{self, TimerRef};
use crate::process::{self, Behavior, Context, Ref, StartOptions};
use crate::runtime::Runtime;

/// Identity of a deferred-reply slot. Reuses the runtime's tag generator,
/// the same source links and monitors draw their refs from.
pub type ReplyId = crate::ids::Tag;

#[derive(Debug, Clone)]
pub enum TimeoutType {
    State,
    Event,
    Generic(String),
}

/// An event delivered to [`StateMachine::handle_event`]: either user-raised
/// or the firing of a previously-set timeout.
#[derive(Debug, Clone)]
pub enum FsmEvent<E> {
    User(E),
    Timeout { timeout_type: TimeoutType, payload: Option<E> },
}

/// An ordered side effect returned alongside a [`Transition`].
pub enum Action<E, R> {
    /// Cancelled on every transition; refires only if set again.
    StateTimeout(Duration, Option<E>),
    /// Cancelled on arrival of any event (timeout or user).
    EventTimeout(Duration, Option<E>),
    /// Named; setting the same name cancels the previous instance.
    GenericTimeout(String, Duration, Option<E>),
    /// Processed immediately after the current handler returns, ahead of
    /// anything still in the mailbox.
    NextEvent(E),
    /// Resolves a slot previously obtained via `call_with_reply`.
    Reply(ReplyId, R),
}

/// The result of one `handle_event` dispatch.
pub enum Transition<E, D, R> {
    Next(String, D, Vec<Action<E, R>>),
    KeepState(D, Vec<Action<E, R>>),
    KeepStateAndData(Vec<Action<E, R>>),
    /// Retain the current event; it's replayed after the next transition
    /// that actually changes state.
    Postpone,
    Stop(TerminateReason, D),
}

/// User-supplied state machine definition. `Process<Self>` is the `Behavior`
/// that runs it.
#[async_trait]
pub trait StateMachine: Sized + Send + 'static {
    type Data: Send + Sync + Clone + Serialize + DeserializeOwned + 'static;
    type Event: Send + Clone + 'static;
    type Reply: Send + 'static;
    type InitArg: Send + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    async fn init(
        &mut self,
        arg: Self::InitArg,
    ) -> Result<(String, Self::Data, Vec<Action<Self::Event, Self::Reply>>), Self::Error>;

    async fn handle_event(
        &mut self,
        state: &str,
        event: FsmEvent<Self::Event>,
        data: &mut Self::Data,
        from: Option<ReplyId>,
    ) -> Result<Transition<Self::Event, Self::Data, Self::Reply>, Self::Error>;

    /// Run when entering `state` from `prev` (only on an actual transition).
    async fn on_enter(&mut self, _state: &str, _prev: &str, _data: &mut Self::Data) {}

    /// Run when leaving `state` for `next`, before `on_enter`.
    async fn on_exit(&mut self, _state: &str, _next: &str, _data: &mut Self::Data) {}
}

/// Persisted FSM snapshot: current state label plus user data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsmState<D> {
    pub label: String,
    pub data: D,
}

/// A cast accepted by [`Process`]. Not constructed directly by callers —
/// use [`Ref::send_event`] or [`Ref::call_with_reply`].
pub enum Msg<E, R> {
    Event(FsmEvent<E>),
    Deferred(ReplyId, E, oneshot::Sender<Result<R, CallError>>),
}

/// The `Behavior` that runs a [`StateMachine`]. Dispatch bookkeeping
/// (postponed events, outstanding timers, pending deferred replies) lives
/// here rather than in `State`, since none of it should be persisted.
pub struct Process<M: StateMachine> {
    machine: M,
    postponed: VecDeque<(FsmEvent<M::Event>, Option<ReplyId>)>,
    state_timeout: Option<TimerRef>,
    event_timeout: Option<TimerRef>,
    generic_timeouts: HashMap<String, TimerRef>,
    pending_replies: HashMap<ReplyId, oneshot::Sender<Result<M::Reply, CallError>>>,
}

impl<M: StateMachine> Process<M> {
    pub fn new(machine: M) -> Self {
        Self {
            machine,
            postponed: VecDeque::new(),
            state_timeout: None,
            event_timeout: None,
            generic_timeouts: HashMap::new(),
            pending_replies: HashMap::new(),
        }
    }

    fn reject_pending_replies(&mut self) {
        for (_, tx) in self.pending_replies.drain() {
            let _ = tx.send(Err(CallError::NotRunning));
        }
    }

    fn on_event_arrival(&mut self, event: &FsmEvent<M::Event>) {
        match event {
            FsmEvent::Timeout { timeout_type: TimeoutType::State, .. } => {
                self.state_timeout = None;
            }
            FsmEvent::Timeout { timeout_type: TimeoutType::Event, .. } => {
                self.event_timeout = None;
            }
            FsmEvent::Timeout { timeout_type: TimeoutType::Generic(name), .. } => {
                self.generic_timeouts.remove(name);
            }
            FsmEvent::User(_) => {}
        }
        if !matches!(event, FsmEvent::Timeout { timeout_type: TimeoutType::Event, .. }) {
            if let Some(t) = self.event_timeout.take() {
                t.cancel();
            }
        }
    }

    fn apply_actions(
        &mut self,
        ctx: &Context<Process<M>>,
        actions: Vec<Action<M::Event, M::Reply>>,
        queue: &mut VecDeque<(FsmEvent<M::Event>, Option<ReplyId>)>,
    ) {
        for action in actions {
            match action {
                Action::StateTimeout(delay, payload) => {
                    if let Some(t) = self.state_timeout.take() {
                        t.cancel();
                    }
                    let target = ctx.self_ref().clone();
                    self.state_timeout = Some(timer::spawn_timer(delay, move || {
                        let _ = target.cast(Msg::Event(FsmEvent::Timeout {
                            timeout_type: TimeoutType::State,
                            payload,
                        }));
                    }));
                }
                Action::EventTimeout(delay, payload) => {
                    if let Some(t) = self.event_timeout.take() {
                        t.cancel();
                    }
                    let target = ctx.self_ref().clone();
                    self.event_timeout = Some(timer::spawn_timer(delay, move || {
                        let _ = target.cast(Msg::Event(FsmEvent::Timeout {
                            timeout_type: TimeoutType::Event,
                            payload,
                        }));
                    }));
                }
                Action::GenericTimeout(name, delay, payload) => {
                    if let Some(t) = self.generic_timeouts.remove(&name) {
                        t.cancel();
                    }
                    let target = ctx.self_ref().clone();
                    let fired_name = name.clone();
                    let handle = timer::spawn_timer(delay, move || {
                        let _ = target.cast(Msg::Event(FsmEvent::Timeout {
                            timeout_type: TimeoutType::Generic(fired_name),
                            payload,
                        }));
                    });
                    self.generic_timeouts.insert(name, handle);
                }
                Action::NextEvent(event) => {
                    queue.push_back((FsmEvent::User(event), None));
                }
                Action::Reply(reply_id, value) => {
                    if let Some(tx) = self.pending_replies.remove(&reply_id) {
                        let _ = tx.send(Ok(value));
                    }
                }
            }
        }
    }

    async fn process_event(
        &mut self,
        state: &mut FsmState<M::Data>,
        event: FsmEvent<M::Event>,
        from: Option<ReplyId>,
        ctx: &Context<Process<M>>,
    ) -> Result<(), M::Error> {
        let mut queue = VecDeque::new();
        queue.push_back((event, from));

        while let Some((event, from)) = queue.pop_front() {
            self.on_event_arrival(&event);

            let prev_label = state.label.clone();
            let transition = self
                .machine
                .handle_event(&prev_label, event.clone(), &mut state.data, from)
                .await?;

            match transition {
                Transition::Postpone => {
                    self.postponed.push_back((event, from));
                }
                Transition::KeepStateAndData(actions) => {
                    self.apply_actions(ctx, actions, &mut queue);
                }
                Transition::KeepState(data, actions) => {
                    state.data = data;
                    self.apply_actions(ctx, actions, &mut queue);
                }
                Transition::Next(next_label, data, actions) => {
                    if let Some(t) = self.state_timeout.take() {
                        t.cancel();
                    }
                    state.data = data;
                    state.label = next_label.clone();
                    self.machine.on_exit(&prev_label, &next_label, &mut state.data).await;
                    self.machine.on_enter(&next_label, &prev_label, &mut state.data).await;
                    self.apply_actions(ctx, actions, &mut queue);
                    for postponed in self.postponed.drain(..) {
                        queue.push_back(postponed);
                    }
                }
                Transition::Stop(reason, data) => {
                    state.data = data;
                    self.reject_pending_replies();
                    ctx.self_ref().force_terminate(reason);
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<M: StateMachine> Behavior for Process<M> {
    type State = FsmState<M::Data>;
    type InitArg = M::InitArg;
    type Call = Infallible;
    type Cast = Msg<M::Event, M::Reply>;
    type Reply = Infallible;
    type Error = M::Error;

    async fn init(&mut self, arg: M::InitArg, ctx: &Context<Self>) -> Result<Self::State, Self::Error> {
        let (label, data, actions) = self.machine.init(arg).await?;
        let mut state = FsmState { label, data };
        self.machine.on_enter(&state.label, &state.label, &mut state.data).await;
        let mut queue = VecDeque::new();
        self.apply_actions(ctx, actions, &mut queue);
        // Actions requesting `NextEvent` at init time are processed like
        // any other immediate event, ahead of the mailbox.
        while let Some((event, from)) = queue.pop_front() {
            self.process_event(&mut state, event, from, ctx).await?;
        }
        Ok(state)
    }

    async fn handle_call(
        &mut self,
        msg: Infallible,
        _state: &mut Self::State,
        _ctx: &Context<Self>,
    ) -> Result<Infallible, Self::Error> {
        match msg {}
    }

    async fn handle_cast(
        &mut self,
        msg: Msg<M::Event, M::Reply>,
        state: &mut Self::State,
        ctx: &Context<Self>,
    ) -> Result<(), Self::Error> {
        let (event, from) = match msg {
            Msg::Event(e) => (e, None),
            Msg::Deferred(reply_id, e, tx) => {
                self.pending_replies.insert(reply_id, tx);
                (FsmEvent::User(e), Some(reply_id))
            }
        };
        self.process_event(state, event, from, ctx).await
    }

    async fn terminate(&mut self, _reason: &TerminateReason, _state: &mut Self::State) {
        if let Some(t) = self.state_timeout.take() {
            t.cancel();
        }
        if let Some(t) = self.event_timeout.take() {
            t.cancel();
        }
        for (_, t) in self.generic_timeouts.drain() {
            t.cancel();
        }
        self.reject_pending_replies();
    }
}

/// Starts a state machine process. Thin wrapper over [`process::start`].
pub async fn start<M: StateMachine>(
    machine: M,
    arg: M::InitArg,
    options: StartOptions<Process<M>>,
    runtime: &Arc<Runtime>,
) -> Result<Ref<Process<M>>, StartError> {
    process::start(Process::new(machine), arg, options, runtime).await
}

impl<M: StateMachine> Ref<Process<M>> {
    /// Fire-and-forget event delivery.
    pub fn send_event(&self, event: M::Event) -> Result<(), crate::error::CastError> {
        self.cast(Msg::Event(FsmEvent::User(event)))
    }

    /// Delivers `event` and awaits a reply resolved by some later
    /// `Action::Reply`, possibly from a handler invocation several
    /// transitions after this one. Rejected with `CallError::NotRunning`
    /// if the process stops while the reply is still outstanding.
    pub async fn call_with_reply(&self, event: M::Event, timeout: Option<Duration>) -> Result<M::Reply, CallError> {
        let reply_id = self.runtime().next_tag();
        let (tx, rx) = oneshot::channel();
        self.cast(Msg::Deferred(reply_id, event, tx)).map_err(|_| CallError::NotRunning)?;
        match timeout {
            Some(d) => tokio::time::timeout(d, rx).await.map_err(|_| CallError::Timeout)?.map_err(|_| CallError::NotRunning),
            None => rx.await.map_err(|_| CallError::NotRunning),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;

    #[derive(Clone)]
    enum Event {
        Go,
        Stop,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("fsm error")]
    struct FsmError;

    struct Toggle;

    #[async_trait]
    impl StateMachine for Toggle {
        type Data = u32;
        type Event = Event;
        type Reply = u32;
        type InitArg = ();
        type Error = FsmError;

        async fn init(&mut self, _arg: ()) -> Result<(String, u32, Vec<Action<Event, u32>>), FsmError> {
            Ok(("idle".to_string(), 0, vec![]))
        }

        async fn handle_event(
            &mut self,
            state: &str,
            event: FsmEvent<Event>,
            data: &mut u32,
            from: Option<ReplyId>,
        ) -> Result<Transition<Event, u32, u32>, FsmError> {
            match (state, event) {
                ("idle", FsmEvent::User(Event::Go)) => {
                    *data += 1;
                    let mut actions = vec![];
                    if let Some(id) = from {
                        actions.push(Action::Reply(id, *data));
                    }
                    Ok(Transition::Next("running".to_string(), *data, actions))
                }
                ("running", FsmEvent::User(Event::Stop)) => Ok(Transition::Stop(TerminateReason::Normal, *data)),
                ("running", FsmEvent::User(Event::Go)) => Ok(Transition::Postpone),
                _ => Ok(Transition::KeepStateAndData(vec![])),
            }
        }
    }

    #[tokio::test]
    async fn transition_and_deferred_reply() {
        let runtime = Runtime::new();
        let r = start(Toggle, (), StartOptions::default(), &runtime).await.unwrap();
        let reply = r.call_with_reply(Event::Go, Some(Duration::from_millis(200))).await.unwrap();
        assert_eq!(reply, 1);
    }

    #[tokio::test]
    async fn postponed_event_replays_after_next_transition() {
        let runtime = Runtime::new();
        let r = start(Toggle, (), StartOptions::default(), &runtime).await.unwrap();
        r.send_event(Event::Go).unwrap();
        // Postponed while "running"; nothing to observe directly here
        // beyond the process staying alive and accepting the stop.
        r.send_event(Event::Go).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(r.is_alive());
        r.send_event(Event::Stop).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!r.is_alive());
    }
}
