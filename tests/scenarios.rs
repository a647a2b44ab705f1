//! Integration tests for the concrete scenarios in the crate's design
//! notes: restart strategies, link/monitor propagation, FSM postponement,
//! and the Application signal-stop sequence.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use beam_rt::application::{Application, ApplicationOptions};
use beam_rt::fsm::{self, Action, FsmEvent, StateMachine, Transition};
use beam_rt::ids::{ExitSignal, TerminateReason};
use beam_rt::persistence::{MemoryAdapter, PersistenceConfig};
use beam_rt::process::{self, Behavior, Context, StartOptions};
use beam_rt::runtime::Runtime;
use beam_rt::supervisor::{ChildSpec, RestartIntensity, RestartPolicy, Strategy, Supervisor, SupervisedChild, SupervisorOptions};

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
async fn counter_survives_restart() {
    let adapter = Arc::new(MemoryAdapter::new());
    let runtime = Runtime::new();
    let mut config = PersistenceConfig::<i64>::new(adapter);
    config.key = Some("counter".to_string());
    config.snapshot_interval = Some(Duration::from_millis(50));
    config.restore_on_start = true;

    let r = process::start(
        Counter,
        0,
        StartOptions {
            persistence: Some(config.clone()),
            ..Default::default()
        },
        &runtime,
    )
    .await
    .unwrap();
    for _ in 0..1000 {
        r.cast(Cast::Inc).unwrap();
    }
    r.checkpoint().await.unwrap();
    r.stop(TerminateReason::Normal).await;

    let r2 = process::start(
        Counter,
        0,
        StartOptions {
            persistence: Some(config),
            ..Default::default()
        },
        &runtime,
    )
    .await
    .unwrap();
    assert_eq!(r2.call(Call::Get, None).await.unwrap(), 1000);
}

fn counter_spec(runtime: Arc<Runtime>, id: &str) -> ChildSpec {
    ChildSpec::new(
        id,
        Arc::new(move || {
            let runtime = runtime.clone();
            Box::pin(async move {
                process::start(Counter, 0, StartOptions::default(), &runtime)
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
        vec![
            counter_spec(runtime.clone(), "a"),
            counter_spec(runtime.clone(), "b"),
            counter_spec(runtime.clone(), "c"),
        ],
        SupervisorOptions {
            strategy: Strategy::OneForOne,
            ..SupervisorOptions::default()
        },
        &runtime,
    )
    .await
    .unwrap();

    let before = sup.children().await;
    let b_id = before.iter().find(|c| c.id == "b").unwrap().process_id.clone();
    runtime.force_terminate(&b_id, TerminateReason::Error("boom".to_string()));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let after = sup.children().await;
    for id in ["a", "c"] {
        assert_eq!(
            after.iter().find(|c| c.id == id).unwrap().process_id,
            before.iter().find(|c| c.id == id).unwrap().process_id,
            "{id} should keep its identity"
        );
    }
    assert_ne!(after.iter().find(|c| c.id == "b").unwrap().process_id, b_id);
}

#[tokio::test]
async fn one_for_all_restarts_every_child() {
    let runtime = Runtime::new();
    let sup = Supervisor::start(
        "sup",
        vec![
            counter_spec(runtime.clone(), "a"),
            counter_spec(runtime.clone(), "b"),
            counter_spec(runtime.clone(), "c"),
        ],
        SupervisorOptions {
            strategy: Strategy::OneForAll,
            ..SupervisorOptions::default()
        },
        &runtime,
    )
    .await
    .unwrap();

    let before = sup.children().await;
    let b_id = before.iter().find(|c| c.id == "b").unwrap().process_id.clone();
    runtime.force_terminate(&b_id, TerminateReason::Error("boom".to_string()));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let after = sup.children().await;
    for id in ["a", "b", "c"] {
        assert_ne!(
            after.iter().find(|c| c.id == id).unwrap().process_id,
            before.iter().find(|c| c.id == id).unwrap().process_id,
            "{id} should have been restarted"
        );
    }
}

#[tokio::test]
async fn rest_for_one_restarts_the_crashed_child_and_its_successors() {
    let runtime = Runtime::new();
    let sup = Supervisor::start(
        "sup",
        vec![
            counter_spec(runtime.clone(), "a"),
            counter_spec(runtime.clone(), "b"),
            counter_spec(runtime.clone(), "c"),
            counter_spec(runtime.clone(), "d"),
        ],
        SupervisorOptions {
            strategy: Strategy::RestForOne,
            ..SupervisorOptions::default()
        },
        &runtime,
    )
    .await
    .unwrap();

    let before = sup.children().await;
    let b_id = before.iter().find(|c| c.id == "b").unwrap().process_id.clone();
    runtime.force_terminate(&b_id, TerminateReason::Error("boom".to_string()));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let after = sup.children().await;
    assert_eq!(
        after.iter().find(|c| c.id == "a").unwrap().process_id,
        before.iter().find(|c| c.id == "a").unwrap().process_id,
        "a precedes the crash and must keep its identity"
    );
    for id in ["b", "c", "d"] {
        assert_ne!(
            after.iter().find(|c| c.id == id).unwrap().process_id,
            before.iter().find(|c| c.id == id).unwrap().process_id,
            "{id} follows (or is) the crashed child and must be restarted"
        );
    }
}

#[tokio::test]
async fn intensity_exceeded_shuts_the_supervisor_down() {
    let runtime = Runtime::new();
    let sup = Supervisor::start(
        "sup",
        vec![counter_spec(runtime.clone(), "a")],
        SupervisorOptions {
            intensity: RestartIntensity {
                max_restarts: 3,
                within: Duration::from_secs(1),
            },
            ..SupervisorOptions::default()
        },
        &runtime,
    )
    .await
    .unwrap();

    // The first three crashes within the window are each restarted...
    for _ in 0..3 {
        let id = sup.children().await[0].process_id.clone();
        runtime.force_terminate(&id, TerminateReason::Error("boom".to_string()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(runtime.is_alive(sup.id()), "supervisor should survive within its restart budget");
    }
    assert_eq!(sup.children().await[0].restart_count, 3);

    // ...the fourth crash within the window exceeds the budget.
    let id = sup.children().await[0].process_id.clone();
    runtime.force_terminate(&id, TerminateReason::Error("boom".to_string()));
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(!runtime.is_alive(sup.id()), "supervisor should have stopped after exceeding its restart intensity");
}

struct TrapExitPeer {
    received: Arc<Mutex<Vec<ExitSignal>>>,
}
#[derive(Debug, thiserror::Error)]
#[error("peer error")]
struct PeerError;

#[async_trait]
impl Behavior for TrapExitPeer {
    type State = ();
    type InitArg = ();
    type Call = ();
    type Cast = ();
    type Reply = ();
    type Error = PeerError;

    async fn init(&mut self, _arg: (), ctx: &Context<Self>) -> Result<(), PeerError> {
        ctx.set_trap_exit(true);
        Ok(())
    }
    async fn handle_call(&mut self, _msg: (), _state: &mut (), _ctx: &Context<Self>) -> Result<(), PeerError> {
        Ok(())
    }
    async fn handle_cast(&mut self, _msg: (), _state: &mut (), _ctx: &Context<Self>) -> Result<(), PeerError> {
        Ok(())
    }
    async fn handle_info(&mut self, exit: ExitSignal, _state: &mut (), _ctx: &Context<Self>) -> Result<(), PeerError> {
        self.received.lock().unwrap().push(exit);
        Ok(())
    }
}

#[tokio::test]
async fn trap_exit_peer_receives_a_single_info_exit_and_stays_running() {
    let runtime = Runtime::new();
    let received = Arc::new(Mutex::new(Vec::new()));
    let q = process::start(
        TrapExitPeer { received: received.clone() },
        (),
        StartOptions::default(),
        &runtime,
    )
    .await
    .unwrap();
    let p = process::start(Counter, 0, StartOptions::default(), &runtime).await.unwrap();
    p.link(&q).unwrap();

    p.force_terminate(TerminateReason::Error("boom".to_string()));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(q.is_alive());
    let signals = received.lock().unwrap();
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].from, p.id());
    assert_eq!(signals[0].reason, TerminateReason::Error("boom".to_string()));
}

#[tokio::test]
async fn monitoring_an_unknown_process_delivers_one_noproc_down() {
    use beam_rt::ids::DownReason;
    use beam_rt::process::events::LifecycleEvent;

    let runtime = Runtime::new();
    let mut events = runtime.subscribe();
    let monitor_ref = runtime.monitor("owner-1", "no-such-process");

    let event = tokio::time::timeout(Duration::from_millis(200), events.recv())
        .await
        .expect("a ProcessDown should arrive")
        .unwrap();
    match event {
        LifecycleEvent::ProcessDown { monitor, owner, target, reason } => {
            assert_eq!(monitor, monitor_ref);
            assert_eq!(owner, "owner-1");
            assert_eq!(target, "no-such-process");
            assert_eq!(reason, DownReason::NoProc);
        }
        other => panic!("expected ProcessDown, got {other:?}"),
    }
}

#[derive(Clone)]
enum DoorEvent {
    Start,
    Stop,
}
#[derive(Debug, thiserror::Error)]
#[error("door error")]
struct DoorError;

struct Door;

#[async_trait]
impl StateMachine for Door {
    type Data = ();
    type Event = DoorEvent;
    type Reply = ();
    type InitArg = ();
    type Error = DoorError;

    async fn init(&mut self, _arg: ()) -> Result<(String, (), Vec<Action<DoorEvent, ()>>), DoorError> {
        Ok(("idle".to_string(), (), vec![]))
    }

    async fn handle_event(
        &mut self,
        state: &str,
        event: FsmEvent<DoorEvent>,
        data: &mut (),
        _from: Option<fsm::ReplyId>,
    ) -> Result<Transition<DoorEvent, (), ()>, DoorError> {
        match (state, event) {
            ("idle", FsmEvent::User(DoorEvent::Start)) => Ok(Transition::Next("running".to_string(), *data, vec![])),
            ("idle", FsmEvent::User(DoorEvent::Stop)) => Ok(Transition::Postpone),
            ("running", FsmEvent::User(DoorEvent::Stop)) => Ok(Transition::Next("idle".to_string(), *data, vec![])),
            _ => Ok(Transition::KeepStateAndData(vec![])),
        }
    }
}

#[tokio::test]
async fn postponed_event_replays_after_the_next_transition() {
    let runtime = Runtime::new();
    let r = fsm::start(Door, (), StartOptions::default(), &runtime).await.unwrap();

    r.send_event(DoorEvent::Stop).unwrap(); // postponed while idle
    r.send_event(DoorEvent::Start).unwrap(); // idle -> running, then Stop replays
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The machine has no externally-observable state accessor beyond
    // staying alive and accepting a further Start, which only idle
    // accepts; confirm the replayed Stop actually landed it back in idle.
    r.send_event(DoorEvent::Start).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(r.is_alive());
}

#[tokio::test]
async fn application_stop_runs_prep_stop_before_tearing_down_the_tree() {
    let runtime = Runtime::new();
    let order = Arc::new(Mutex::new(Vec::new()));
    let prep_order = order.clone();

    let spec = counter_spec(runtime.clone(), "a");
    let sup = Supervisor::start(
        "sup",
        vec![ChildSpec {
            restart: RestartPolicy::Temporary,
            ..spec
        }],
        SupervisorOptions::default(),
        &runtime,
    )
    .await
    .unwrap();

    let hook_calls = Arc::new(AtomicUsize::new(0));
    let hook_calls2 = hook_calls.clone();
    let options = ApplicationOptions {
        handle_signals: false,
        stop_timeout: Duration::from_secs(5),
        prep_stop: Some(Arc::new(move || {
            let order = prep_order.clone();
            let hook_calls = hook_calls2.clone();
            Box::pin(async move {
                order.lock().unwrap().push("prep_stop");
                hook_calls.fetch_add(1, Ordering::SeqCst);
            })
        })),
    };

    let app = Application::start(sup.clone(), options);
    app.stop().await.unwrap();

    assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
    assert_eq!(*order.lock().unwrap(), vec!["prep_stop"]);
    assert!(!runtime.is_alive(sup.id()));

    // A second stop (as a repeated signal would trigger) is a no-op.
    app.stop().await.unwrap();
    assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
}
