// tests/engine_fake_adapter.rs

//! Engine cycle semantics against a scripted fake adapter.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use taskfarm::backend::{BackendAdapter, BackendError, RemoteOutcome, RemoteStatus};
use taskfarm::dispatch::{DispatchLimits, Dispatcher};
use taskfarm::engine::{Engine, EngineOptions};
use taskfarm::session::{Session, SessionStore};
use taskfarm::task::{TaskOutcome, TaskState};
use taskfarm_test_utils::builders::session_with_tasks;
use taskfarm_test_utils::fake_adapter::{Call, FakeAdapter, SubmitBehaviour};
use taskfarm_test_utils::{init_tracing, with_timeout};

fn adapters(list: &[&Arc<FakeAdapter>]) -> Vec<Arc<dyn BackendAdapter>> {
    list.iter()
        .map(|a| Arc::clone(a) as Arc<dyn BackendAdapter>)
        .collect()
}

fn engine_in(
    tmp: &TempDir,
    session: Session,
    adapters: Vec<Arc<dyn BackendAdapter>>,
    limits: DispatchLimits,
    max_unknown_polls: u32,
) -> Engine {
    let store = SessionStore::open(tmp.path().join("session"));
    store.create(&session).unwrap();
    let lock = store.lock().unwrap();
    let session = store.load().unwrap();
    let options = EngineOptions {
        op_timeout: Duration::from_secs(5),
        max_unknown_polls,
        poll_interval: Duration::from_millis(1),
    };
    Engine::new(session, store, lock, Dispatcher::new(adapters, limits), options)
}

async fn run_until_terminal(engine: &mut Engine) {
    for _ in 0..50 {
        engine.progress().await.unwrap();
        if engine.session().all_terminal() {
            return;
        }
    }
    panic!("campaign did not terminate within 50 cycles");
}

#[tokio::test]
async fn campaign_respects_capacity_and_retry_budget() {
    init_tracing();
    with_timeout(async {
        // Three tasks on an adapter with two slots; "c" always fails, with
        // one resubmission allowed.
        let adapter = FakeAdapter::with_limits("exec", 2, None, &[]);
        adapter.script_poll(
            "c",
            vec![Ok(RemoteStatus::Done(RemoteOutcome::Failure(
                "exit code 1".to_string(),
            )))],
        );
        let (session, ids) = session_with_tasks(1, &["a", "b", "c"]);

        let tmp = TempDir::new().unwrap();
        let mut engine = engine_in(
            &tmp,
            session,
            adapters(&[&adapter]),
            DispatchLimits::default(),
            10,
        );

        // First cycle: both slots fill, "c" has to wait.
        let report = engine.progress().await.unwrap();
        assert_eq!(report.submitted, 2);
        assert_eq!(engine.session().task(ids[2]).unwrap().state(), TaskState::New);

        run_until_terminal(&mut engine).await;

        let report = engine.report();
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);

        // "c" was submitted twice: the original attempt plus one retry.
        assert_eq!(adapter.submit_count("c"), 2);
        let c = engine.session().task(ids[2]).unwrap();
        assert_eq!(c.retries(), 1);
        assert!(matches!(c.outcome(), Some(TaskOutcome::Failure(_))));
    })
    .await;
}

#[tokio::test]
async fn failure_is_isolated_to_the_failing_task() {
    init_tracing();
    with_timeout(async {
        let adapter = FakeAdapter::new("exec");
        adapter.on_submit("bad", SubmitBehaviour::Permanent("no such queue".to_string()));
        let (session, ids) = session_with_tasks(0, &["good", "bad"]);

        let tmp = TempDir::new().unwrap();
        let mut engine = engine_in(&tmp, session, adapters(&[&adapter]), DispatchLimits::default(), 10);
        run_until_terminal(&mut engine).await;

        let good = engine.session().task(ids[0]).unwrap();
        assert_eq!(good.outcome(), Some(&TaskOutcome::Success));
        assert!(good.output_retrieved());

        let bad = engine.session().task(ids[1]).unwrap();
        assert!(matches!(bad.outcome(), Some(TaskOutcome::Failure(_))));
    })
    .await;
}

#[tokio::test]
async fn ambiguous_submission_is_never_resubmitted() {
    init_tracing();
    with_timeout(async {
        let adapter = FakeAdapter::new("exec");
        adapter.on_submit("x", SubmitBehaviour::Ambiguous("timeout mid-submit".to_string()));
        let (session, ids) = session_with_tasks(5, &["x"]);

        let tmp = TempDir::new().unwrap();
        let mut engine = engine_in(&tmp, session, adapters(&[&adapter]), DispatchLimits::default(), 2);
        run_until_terminal(&mut engine).await;

        let x = engine.session().task(ids[0]).unwrap();
        assert_eq!(x.state(), TaskState::Terminated);
        assert!(matches!(x.outcome(), Some(TaskOutcome::Failure(_))));
        // Not retried despite a generous retry budget: the remote job may
        // exist, so resubmission risks running it twice.
        assert_eq!(x.retries(), 0);
        assert_eq!(adapter.submit_count("x"), 1);
    })
    .await;
}

#[tokio::test]
async fn unknown_poll_bound_forces_nonretryable_failure() {
    init_tracing();
    with_timeout(async {
        let adapter = FakeAdapter::new("exec");
        adapter.script_poll(
            "x",
            vec![Err(BackendError::Transient("connection refused".to_string()))],
        );
        let (session, ids) = session_with_tasks(5, &["x"]);

        let tmp = TempDir::new().unwrap();
        let mut engine = engine_in(&tmp, session, adapters(&[&adapter]), DispatchLimits::default(), 3);
        run_until_terminal(&mut engine).await;

        let x = engine.session().task(ids[0]).unwrap();
        assert_eq!(x.state(), TaskState::Terminated);
        assert!(!x.retryable());
        assert_eq!(adapter.submit_count("x"), 1);
        // The stashed handle kept being polled while the task was UNKNOWN.
        assert!(adapter.calls().iter().filter(|c| matches!(c, Call::Poll(_))).count() >= 3);
    })
    .await;
}

#[tokio::test]
async fn unknown_task_recovers_on_conclusive_status() {
    init_tracing();
    with_timeout(async {
        let adapter = FakeAdapter::new("exec");
        adapter.script_poll(
            "x",
            vec![
                Err(BackendError::Transient("connection refused".to_string())),
                Ok(RemoteStatus::Running),
                Ok(RemoteStatus::Done(RemoteOutcome::Success)),
            ],
        );
        let (session, ids) = session_with_tasks(0, &["x"]);

        let tmp = TempDir::new().unwrap();
        let mut engine = engine_in(&tmp, session, adapters(&[&adapter]), DispatchLimits::default(), 10);

        engine.progress().await.unwrap(); // submit
        engine.progress().await.unwrap(); // poll -> UNKNOWN
        assert_eq!(engine.session().task(ids[0]).unwrap().state(), TaskState::Unknown);

        engine.progress().await.unwrap(); // poll -> RUNNING, handle restored
        let x = engine.session().task(ids[0]).unwrap();
        assert_eq!(x.state(), TaskState::Running);
        assert!(x.handle_invariant_ok());

        run_until_terminal(&mut engine).await;
        assert_eq!(engine.report().succeeded, 1);
    })
    .await;
}

#[tokio::test]
async fn transient_fetch_failure_retries_next_cycle() {
    init_tracing();
    with_timeout(async {
        let adapter = FakeAdapter::new("exec");
        adapter.fail_fetch("x", BackendError::Transient("copy interrupted".to_string()));
        let (session, ids) = session_with_tasks(0, &["x"]);

        let tmp = TempDir::new().unwrap();
        let mut engine = engine_in(&tmp, session, adapters(&[&adapter]), DispatchLimits::default(), 10);

        engine.progress().await.unwrap(); // submit
        engine.progress().await.unwrap(); // poll done, fetch fails transiently
        assert_eq!(
            engine.session().task(ids[0]).unwrap().state(),
            TaskState::Terminating
        );

        run_until_terminal(&mut engine).await;
        let x = engine.session().task(ids[0]).unwrap();
        assert_eq!(x.outcome(), Some(&TaskOutcome::Success));
        assert!(x.output_retrieved());
        let fetches = adapter
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::Fetch(_)))
            .count();
        assert_eq!(fetches, 2);
    })
    .await;
}

#[tokio::test]
async fn permanent_fetch_failure_downgrades_success() {
    init_tracing();
    with_timeout(async {
        let adapter = FakeAdapter::new("exec");
        adapter.fail_fetch("x", BackendError::Permanent("artifacts deleted".to_string()));
        let (session, ids) = session_with_tasks(0, &["x"]);

        let tmp = TempDir::new().unwrap();
        let mut engine = engine_in(&tmp, session, adapters(&[&adapter]), DispatchLimits::default(), 10);
        run_until_terminal(&mut engine).await;

        // The job itself succeeded, but its results are gone.
        let x = engine.session().task(ids[0]).unwrap();
        assert!(matches!(x.outcome(), Some(TaskOutcome::Failure(_))));
        assert!(!x.output_retrieved());
    })
    .await;
}

#[tokio::test]
async fn abort_cancels_in_flight_tasks_and_closes_session() {
    init_tracing();
    with_timeout(async {
        let adapter = FakeAdapter::new("exec");
        adapter.script_poll("a", vec![Ok(RemoteStatus::Running)]);
        let (session, ids) = session_with_tasks(0, &["a", "b"]);

        let tmp = TempDir::new().unwrap();
        let mut engine = engine_in(&tmp, session, adapters(&[&adapter]), DispatchLimits::default(), 10);

        engine.progress().await.unwrap(); // submit both
        engine.progress().await.unwrap(); // a running, b completes
        assert_eq!(engine.session().task(ids[0]).unwrap().state(), TaskState::Running);

        let report = engine.abort().await.unwrap();
        assert!(engine.session().is_closed());
        assert!(engine.session().all_terminal());
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);

        // The running task got a best-effort cancel; the finished one did not.
        let cancels: Vec<_> = adapter
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Cancel(_)))
            .collect();
        assert_eq!(cancels, vec![Call::Cancel("a".to_string())]);

        // A closed session accepts no further cycles.
        assert!(engine.progress().await.is_err());
    })
    .await;
}

#[tokio::test]
async fn dispatch_prefers_higher_priority_adapter() {
    init_tracing();
    with_timeout(async {
        // "fast" has one slot and comes first in priority order; "slow"
        // takes the overflow.
        let fast = FakeAdapter::with_limits("fast", 1, None, &[]);
        let slow = FakeAdapter::with_limits("slow", 4, None, &[]);
        let (session, _) = session_with_tasks(0, &["a", "b", "c"]);

        let tmp = TempDir::new().unwrap();
        let mut engine = engine_in(
            &tmp,
            session,
            adapters(&[&fast, &slow]),
            DispatchLimits::default(),
            10,
        );
        run_until_terminal(&mut engine).await;

        assert_eq!(engine.report().succeeded, 3);
        assert_eq!(fast.submit_count("a"), 1);
        assert_eq!(slow.submit_count("b"), 1);
        assert_eq!(slow.submit_count("c"), 1);
    })
    .await;
}

#[tokio::test]
async fn requirements_route_tasks_to_capable_adapters() {
    init_tracing();
    with_timeout(async {
        let small = FakeAdapter::with_limits("small", 8, Some(1), &[]);
        let big = FakeAdapter::with_limits("big", 8, Some(16), &["gpu"]);

        let mut session = Session::new("caps", 0);
        session
            .add_task(
                taskfarm_test_utils::builders::TaskSpecBuilder::new("wide")
                    .cores(8)
                    .build(),
            )
            .unwrap();
        session
            .add_task(
                taskfarm_test_utils::builders::TaskSpecBuilder::new("tagged")
                    .runtime_tag("gpu")
                    .build(),
            )
            .unwrap();

        let tmp = TempDir::new().unwrap();
        let mut engine = engine_in(
            &tmp,
            session,
            adapters(&[&small, &big]),
            DispatchLimits::default(),
            10,
        );
        run_until_terminal(&mut engine).await;

        assert_eq!(engine.report().succeeded, 2);
        assert_eq!(small.submit_count("wide"), 0);
        assert_eq!(big.submit_count("wide"), 1);
        assert_eq!(big.submit_count("tagged"), 1);
    })
    .await;
}

#[tokio::test]
async fn max_in_flight_caps_concurrency_across_adapters() {
    init_tracing();
    with_timeout(async {
        let adapter = FakeAdapter::new("exec");
        for name in ["a", "b", "c", "d"] {
            adapter.script_poll(
                name,
                vec![
                    Ok(RemoteStatus::Running),
                    Ok(RemoteStatus::Done(RemoteOutcome::Success)),
                ],
            );
        }
        let (session, _) = session_with_tasks(0, &["a", "b", "c", "d"]);

        let tmp = TempDir::new().unwrap();
        let limits = DispatchLimits {
            max_in_flight: 2,
            max_submitted: 0,
        };
        let mut engine = engine_in(&tmp, session, adapters(&[&adapter]), limits, 10);

        let report = engine.progress().await.unwrap();
        assert_eq!(report.submitted, 2);

        // Both submitted tasks are still in flight, so nothing new starts.
        let report = engine.progress().await.unwrap();
        assert_eq!(report.submitted, 0);

        run_until_terminal(&mut engine).await;
        assert_eq!(engine.report().succeeded, 4);
    })
    .await;
}
