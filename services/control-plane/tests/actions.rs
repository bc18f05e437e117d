//! Single-flight, retry, cancellation and resume behavior of actions.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use herd_control_plane::actions::{Action, ActionContext, ActionError, ActionRegistry, ActionResult, Procedure};
use herd_control_plane::store::Store;
use herd_model::{ActionStatus, Node};
use tokio::sync::Notify;

async fn stored_node(store: &Store) -> Node {
    let node = Node::new("kube-1", "2gb");
    store.create(&node).await.unwrap();
    node
}

/// An action whose work signals `started` and then waits for `release`.
fn gated(
    registry: &ActionRegistry,
    store: &Store,
    node: &Node,
    started: Arc<Notify>,
    release: Arc<Notify>,
) -> Action<Node> {
    Action::new(
        registry.clone(),
        store.clone(),
        node.clone(),
        ActionStatus::new("provisioning", 3),
        move |ctx| {
            let started = started.clone();
            let release = release.clone();
            async move {
                started.notify_one();
                tokio::select! {
                    _ = release.notified() => Ok(()),
                    _ = async {
                        while !ctx.is_cancelled().await {
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    } => Err(ActionError::Cancelled { waiting_for: "release".to_string() }),
                }
            }
        },
    )
}

fn counting(
    registry: &ActionRegistry,
    store: &Store,
    node: &Node,
    max_retries: u32,
    runs: Arc<AtomicU32>,
) -> Action<Node> {
    Action::new(
        registry.clone(),
        store.clone(),
        node.clone(),
        ActionStatus::new("provisioning", max_retries),
        move |_ctx| {
            runs.fetch_add(1, Ordering::SeqCst);
            async { Err(ActionError::provider("always fails")) }
        },
    )
}

#[tokio::test]
async fn concurrent_now_calls_conflict() {
    let store = Store::memory();
    let registry = ActionRegistry::new();
    let node = stored_node(&store).await;
    let (started, release) = (Arc::new(Notify::new()), Arc::new(Notify::new()));

    let first = tokio::spawn(gated(&registry, &store, &node, started.clone(), release.clone()).now());
    started.notified().await;

    let err = gated(&registry, &store, &node, Arc::new(Notify::new()), Arc::new(Notify::new()))
        .now()
        .await
        .unwrap_err();
    assert!(err.is_repeated());
    assert_eq!(err.to_string(), format!("already performing an action for {}", node.id));

    release.notify_one();
    first.await.unwrap().unwrap();
    assert!(registry.fetch(&node.id).await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_spawns_admit_one() {
    let store = Store::memory();
    let registry = ActionRegistry::new();
    let node = stored_node(&store).await;
    let release = Arc::new(Notify::new());

    let mut attempts = Vec::new();
    for _ in 0..16 {
        let action = gated(&registry, &store, &node, Arc::new(Notify::new()), release.clone());
        attempts.push(tokio::spawn(action.spawn()));
    }

    let mut admitted = Vec::new();
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(background) => admitted.push(background),
            Err(e) => assert!(e.is_repeated()),
        }
    }
    assert_eq!(admitted.len(), 1);

    release.notify_one();
    let status = admitted.pop().unwrap().join().await.unwrap();
    assert_eq!(status.retries, 0);
    assert!(registry.fetch(&node.id).await.unwrap().is_none());
}

#[tokio::test]
async fn spawn_with_cancel_existing_preempts() {
    let store = Store::memory();
    let registry = ActionRegistry::new();
    let node = stored_node(&store).await;
    let (started, release) = (Arc::new(Notify::new()), Arc::new(Notify::new()));

    let old = gated(&registry, &store, &node, started.clone(), Arc::new(Notify::new()))
        .spawn()
        .await
        .unwrap();
    started.notified().await;

    let new = gated(&registry, &store, &node, Arc::new(Notify::new()), release.clone())
        .cancel_existing(true)
        .spawn()
        .await
        .unwrap();

    assert!(old.status().await.cancelled);
    let registered = registry.fetch(&node.id).await.unwrap().unwrap();
    assert_eq!(registered.action_id(), new.action_id());

    // The preempted action winds down without touching the new registration.
    let old_status = old.join().await.unwrap();
    assert!(old_status.cancelled);
    let registered = registry.fetch(&node.id).await.unwrap().unwrap();
    assert_eq!(registered.action_id(), new.action_id());

    release.notify_one();
    new.join().await.unwrap();
    assert!(registry.fetch(&node.id).await.unwrap().is_none());
}

#[tokio::test]
async fn exhausted_action_stays_registered_as_failed() {
    let store = Store::memory();
    let registry = ActionRegistry::new();
    let node = stored_node(&store).await;
    let runs = Arc::new(AtomicU32::new(0));

    let status = counting(&registry, &store, &node, 3, runs.clone())
        .spawn()
        .await
        .unwrap()
        .join()
        .await
        .unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert_eq!(status.retries, 3);
    assert!(status.failed);
    assert_eq!(status.error.as_deref(), Some("provider error: always fails"));

    let registered = registry.fetch(&node.id).await.unwrap().unwrap();
    assert!(registered.status().await.failed);

    // A synchronous caller is still blocked by the failed action.
    let err = counting(&registry, &store, &node, 1, Arc::new(AtomicU32::new(0)))
        .now()
        .await
        .unwrap_err();
    assert!(err.is_repeated());

    assert!(registry.clear_failed(&node.id).await.unwrap());
    assert!(registry.fetch(&node.id).await.unwrap().is_none());
}

#[tokio::test]
async fn exhausted_action_is_superseded_by_spawn() {
    let store = Store::memory();
    let registry = ActionRegistry::new();
    let node = stored_node(&store).await;

    let failed = counting(&registry, &store, &node, 1, Arc::new(AtomicU32::new(0)))
        .spawn()
        .await
        .unwrap();
    let failed_id = failed.action_id().to_string();
    failed.join().await.unwrap();

    let runs = Arc::new(AtomicU32::new(0));
    let retry = counting(&registry, &store, &node, 2, runs.clone())
        .spawn()
        .await
        .unwrap();
    assert_ne!(retry.action_id(), failed_id);

    let status = retry.join().await.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert!(status.failed);
}

#[tokio::test]
async fn zero_max_retries_never_runs() {
    let store = Store::memory();
    let registry = ActionRegistry::new();
    let node = stored_node(&store).await;
    let runs = Arc::new(AtomicU32::new(0));

    let status = counting(&registry, &store, &node, 0, runs.clone())
        .spawn()
        .await
        .unwrap()
        .join()
        .await
        .unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert!(status.failed);
    assert!(registry.fetch(&node.id).await.unwrap().is_some());
}

#[tokio::test]
async fn now_ignores_max_retries() {
    let store = Store::memory();
    let registry = ActionRegistry::new();
    let node = stored_node(&store).await;
    let runs = Arc::new(AtomicU32::new(0));

    let err = counting(&registry, &store, &node, 0, runs.clone())
        .now()
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "provider error: always fails");
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn interrupted_procedure_resumes_from_persisted_progress() {
    let store = Store::memory();
    let registry = ActionRegistry::new();
    let mut node = Node::new("kube-1", "2gb");
    node.status = Some(ActionStatus {
        steps_completed: 2,
        retries: 1,
        ..ActionStatus::new("provisioning", 3)
    });
    store.create(&node).await.unwrap();

    let runs: Arc<[AtomicU32; 3]> = Arc::new(Default::default());
    let counters = runs.clone();
    let status = Action::new(
        registry.clone(),
        store.clone(),
        node.clone(),
        ActionStatus::new("provisioning", 3),
        move |ctx| {
            let c = counters.clone();
            async move {
                let (c0, c1, c2) = (c.clone(), c.clone(), c);
                Procedure::new("create node", &ctx)
                    .step("create instance", move |_| async move {
                        c0[0].fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .step("attach volumes", move |_| async move {
                        c1[1].fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .step("register", move |_| async move {
                        c2[2].fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .run()
                    .await
            }
        },
    )
    .spawn()
    .await
    .unwrap()
    .join()
    .await
    .unwrap();

    let counts: Vec<u32> = runs.iter().map(|c| c.load(Ordering::SeqCst)).collect();
    assert_eq!(counts, [0, 0, 1]);
    assert_eq!(status.steps_completed, 3);

    let saved: Node = store.get(&node.id).await.unwrap();
    assert!(saved.status.is_none());
}

#[tokio::test]
async fn persisted_progress_of_other_operation_is_ignored() {
    let store = Store::memory();
    let mut node = Node::new("kube-1", "2gb");
    node.status = Some(ActionStatus {
        steps_completed: 2,
        ..ActionStatus::new("provisioning", 1)
    });
    store.create(&node).await.unwrap();

    let runs = Arc::new(AtomicU32::new(0));
    let counter = runs.clone();
    Action::new(
        ActionRegistry::new(),
        store.clone(),
        node,
        ActionStatus::new("deleting", 5),
        move |ctx| {
            let counter = counter.clone();
            async move {
                Procedure::new("delete node", &ctx)
                    .step("drain", move |_| async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .run()
                    .await
            }
        },
    )
    .now()
    .await
    .unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

async fn explode(_ctx: ActionContext<Node>) -> ActionResult<()> {
    panic!("boom")
}

#[tokio::test]
async fn panicking_now_releases_resource() {
    let store = Store::memory();
    let registry = ActionRegistry::new();
    let node = stored_node(&store).await;

    let err = Action::new(
        registry.clone(),
        store.clone(),
        node.clone(),
        ActionStatus::new("deleting", 5),
        explode,
    )
    .now()
    .await
    .unwrap_err();

    assert!(matches!(err, ActionError::Task(ref msg) if msg == "work panicked: boom"));
    assert!(registry.fetch(&node.id).await.unwrap().is_none());

    let runs = Arc::new(AtomicU32::new(0));
    let status = counting(&registry, &store, &node, 1, runs.clone())
        .spawn()
        .await
        .unwrap()
        .join()
        .await
        .unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(status.failed);
}

#[tokio::test]
async fn panicking_spawn_counts_as_failed_attempt() {
    let store = Store::memory();
    let registry = ActionRegistry::new();
    let node = stored_node(&store).await;

    let status = Action::new(
        registry.clone(),
        store.clone(),
        node.clone(),
        ActionStatus::new("provisioning", 2),
        explode,
    )
    .spawn()
    .await
    .unwrap()
    .join()
    .await
    .unwrap();

    assert_eq!(status.retries, 2);
    assert!(status.failed);
    assert_eq!(status.error.as_deref(), Some("action task failed: work panicked: boom"));

    let registered = registry.fetch(&node.id).await.unwrap().unwrap();
    assert!(registered.status().await.failed);
    assert!(registry.clear_failed(&node.id).await.unwrap());
}
