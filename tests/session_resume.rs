// tests/session_resume.rs

//! Durability: a campaign interrupted mid-flight resumes from persisted
//! state and converges, with task identity and retry accounting intact.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use taskfarm::backend::{BackendAdapter, RemoteOutcome, RemoteStatus};
use taskfarm::dispatch::{DispatchLimits, Dispatcher};
use taskfarm::engine::{Engine, EngineOptions};
use taskfarm::session::SessionStore;
use taskfarm::task::{TaskId, TaskOutcome, TaskState};
use taskfarm_test_utils::builders::{session_with_tasks, task_spec};
use taskfarm_test_utils::fake_adapter::FakeAdapter;
use taskfarm_test_utils::{init_tracing, with_timeout};

fn options() -> EngineOptions {
    EngineOptions {
        op_timeout: Duration::from_secs(5),
        max_unknown_polls: 10,
        poll_interval: Duration::from_millis(1),
    }
}

fn reopen(dir: &Path, adapter: &Arc<FakeAdapter>) -> Engine {
    let store = SessionStore::open(dir);
    let lock = store.lock().unwrap();
    let session = store.load().unwrap();
    let dispatcher = Dispatcher::new(
        vec![Arc::clone(adapter) as Arc<dyn BackendAdapter>],
        DispatchLimits::default(),
    );
    Engine::new(session, store, lock, dispatcher, options())
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
async fn interrupted_campaign_resumes_and_converges() {
    init_tracing();
    with_timeout(async {
        let adapter = FakeAdapter::new("exec");
        adapter.script_poll(
            "b",
            vec![
                Ok(RemoteStatus::Running),
                Ok(RemoteStatus::Done(RemoteOutcome::Success)),
            ],
        );
        let (session, ids) = session_with_tasks(0, &["a", "b"]);

        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("session");
        let store = SessionStore::open(&dir);
        store.create(&session).unwrap();

        // First engine: submit both, then drop mid-campaign. The drop
        // releases the lock; the store keeps the submitted state.
        {
            let mut engine = reopen(&dir, &adapter);
            engine.progress().await.unwrap();
            assert_eq!(
                engine.session().task(ids[1]).unwrap().state(),
                TaskState::Submitted
            );
        }

        // The persisted record carries handles and states.
        let loaded = SessionStore::open(&dir).load().unwrap();
        assert_eq!(loaded.task(ids[0]).unwrap().state(), TaskState::Submitted);
        assert!(loaded.task(ids[0]).unwrap().handle_invariant_ok());

        // Second engine picks up where the first stopped.
        let mut engine = reopen(&dir, &adapter);
        run_until_terminal(&mut engine).await;
        assert_eq!(engine.report().succeeded, 2);

        // No resubmission happened across the restart.
        assert_eq!(adapter.submit_count("a"), 1);
        assert_eq!(adapter.submit_count("b"), 1);
    })
    .await;
}

#[tokio::test]
async fn retry_accounting_survives_restart() {
    init_tracing();
    with_timeout(async {
        let adapter = FakeAdapter::new("exec");
        adapter.script_poll(
            "x",
            vec![Ok(RemoteStatus::Done(RemoteOutcome::Failure(
                "exit code 1".to_string(),
            )))],
        );
        let (session, ids) = session_with_tasks(2, &["x"]);

        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("session");
        SessionStore::open(&dir).create(&session).unwrap();

        // Run until the first retry has been consumed, then stop.
        {
            let mut engine = reopen(&dir, &adapter);
            while engine.session().task(ids[0]).unwrap().retries() < 1 {
                engine.progress().await.unwrap();
            }
        }

        let loaded = SessionStore::open(&dir).load().unwrap();
        assert_eq!(loaded.task(ids[0]).unwrap().retries(), 1);

        let mut engine = reopen(&dir, &adapter);
        run_until_terminal(&mut engine).await;

        // Initial attempt plus exactly max_retries resubmissions, counted
        // across both engine instances.
        assert_eq!(adapter.submit_count("x"), 3);
        let x = engine.session().task(ids[0]).unwrap();
        assert_eq!(x.retries(), 2);
        assert!(matches!(x.outcome(), Some(TaskOutcome::Failure(_))));
    })
    .await;
}

#[tokio::test]
async fn task_ids_stay_monotonic_across_reload() {
    init_tracing();
    with_timeout(async {
        let (session, ids) = session_with_tasks(0, &["a", "b"]);

        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("session");
        let store = SessionStore::open(&dir);
        store.create(&session).unwrap();

        let mut loaded = store.load().unwrap();
        let c = loaded.add_task(task_spec("c")).unwrap();
        assert_eq!(c, TaskId(2));
        assert!(ids.iter().all(|id| *id != c));

        // History of prior tasks is untouched by the reload.
        assert!(loaded.task(ids[0]).unwrap().history().is_empty());
    })
    .await;
}

#[tokio::test]
async fn second_engine_cannot_open_locked_session() {
    init_tracing();
    with_timeout(async {
        let (session, _) = session_with_tasks(0, &["a"]);
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("session");
        let store = SessionStore::open(&dir);
        store.create(&session).unwrap();

        let lock = store.lock().unwrap();
        assert!(SessionStore::open(&dir).lock().is_err());
        drop(lock);
        assert!(SessionStore::open(&dir).lock().is_ok());
    })
    .await;
}

#[tokio::test]
async fn aborted_session_stays_closed_after_reload() {
    init_tracing();
    with_timeout(async {
        let adapter = FakeAdapter::new("exec");
        let (session, _) = session_with_tasks(0, &["a"]);
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("session");
        SessionStore::open(&dir).create(&session).unwrap();

        {
            let mut engine = reopen(&dir, &adapter);
            engine.abort().await.unwrap();
        }

        let loaded = SessionStore::open(&dir).load().unwrap();
        assert!(loaded.is_closed());
        assert!(loaded.all_terminal());

        let mut engine = reopen(&dir, &adapter);
        assert!(engine.progress().await.is_err());
    })
    .await;
}
