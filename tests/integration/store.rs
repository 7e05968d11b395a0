//! Task store integration tests.
//!
//! Lifecycle and readiness across a file-backed log, including restarts.

use overseer::{NewTask, Priority, StoreError, TaskPatch, TaskStatus, TaskStore};
use tempfile::TempDir;

/// Test: a dependency chain becomes ready step by step and survives a restart.
#[tokio::test]
async fn test_task_lifecycle_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tasks.jsonl");

    let (design, build, ship) = {
        let store = TaskStore::open_file(&path).await.unwrap();
        let design = store
            .create(NewTask::new("design").with_priority(Priority::High))
            .await
            .unwrap();
        let build = store
            .create(NewTask::new("build").depends_on(design.id.clone()))
            .await
            .unwrap();
        let ship = store
            .create(NewTask::new("ship").depends_on(build.id.clone()))
            .await
            .unwrap();

        assert_eq!(design.status, TaskStatus::Ready);
        assert_eq!(build.status, TaskStatus::Pending);
        assert_eq!(ship.status, TaskStatus::Pending);

        store.complete(&design.id).await.unwrap();
        assert_eq!(
            store.get(&build.id).await.unwrap().status,
            TaskStatus::Ready
        );
        (design.id, build.id, ship.id)
    };

    let store = TaskStore::open_file(&path).await.unwrap();
    assert_eq!(
        store.get(&design).await.unwrap().status,
        TaskStatus::Completed
    );
    assert_eq!(store.get(&build).await.unwrap().status, TaskStatus::Ready);
    assert_eq!(store.get(&ship).await.unwrap().status, TaskStatus::Pending);

    let ready: Vec<_> = store.get_ready().await.into_iter().map(|t| t.id).collect();
    assert_eq!(ready, vec![build.clone()]);

    store.complete(&build).await.unwrap();
    assert_eq!(store.get(&ship).await.unwrap().status, TaskStatus::Ready);
}

/// Test: cancelling a task blocks everything downstream of it.
#[tokio::test]
async fn test_cancellation_blocks_transitively() {
    let store = TaskStore::in_memory();
    let root = store.create(NewTask::new("root")).await.unwrap();
    let mid = store
        .create(NewTask::new("mid").depends_on(root.id.clone()))
        .await
        .unwrap();
    let leaf = store
        .create(NewTask::new("leaf").depends_on(mid.id.clone()))
        .await
        .unwrap();

    store
        .update(&root.id, TaskPatch::status(TaskStatus::Cancelled))
        .await
        .unwrap();

    assert_eq!(store.get(&mid.id).await.unwrap().status, TaskStatus::Blocked);
    assert_eq!(store.get(&leaf.id).await.unwrap().status, TaskStatus::Blocked);

    let stats = store.get_stats().await;
    assert_eq!(stats.total, 3);
    assert_eq!(stats.cancelled, 1);
    assert_eq!(stats.blocked, 2);
}

/// Test: updates keep identity and creation time and refresh updatedAt.
#[tokio::test]
async fn test_update_preserves_identity() {
    let store = TaskStore::in_memory();
    let created = store.create(NewTask::new("draft")).await.unwrap();

    let updated = store
        .update(
            &created.id,
            TaskPatch {
                title: Some("final".into()),
                priority: Some(Priority::Critical),
                ..TaskPatch::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.id, created.id);
    assert_eq!(updated.created_at, created.created_at);
    assert!(updated.updated_at >= created.updated_at);
    assert_eq!(updated.title, "final");
    assert_eq!(updated.priority, Priority::Critical);
}

/// Test: dependency cycles are rejected and leave the graph untouched.
#[tokio::test]
async fn test_cycle_rejected() {
    let store = TaskStore::in_memory();
    let a = store.create(NewTask::new("a")).await.unwrap();
    let b = store
        .create(NewTask::new("b").depends_on(a.id.clone()))
        .await
        .unwrap();

    let result = store
        .update(
            &a.id,
            TaskPatch {
                dependencies: Some([b.id.clone()].into_iter().collect()),
                ..TaskPatch::default()
            },
        )
        .await;

    assert!(matches!(result, Err(StoreError::DependencyCycle(_))));
    assert!(store.get(&a.id).await.unwrap().dependencies.is_empty());
    assert_eq!(store.get(&a.id).await.unwrap().status, TaskStatus::Ready);
}

/// Test: compaction keeps state and shrinks the log.
#[tokio::test]
async fn test_compact_then_reload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tasks.jsonl");

    let store = TaskStore::open_file(&path).await.unwrap();
    let keep = store.create(NewTask::new("keep")).await.unwrap();
    let gone = store.create(NewTask::new("gone")).await.unwrap();
    for i in 0..5 {
        store
            .update(
                &keep.id,
                TaskPatch {
                    description: Some(format!("revision {}", i)),
                    ..TaskPatch::default()
                },
            )
            .await
            .unwrap();
    }
    store.delete(&gone.id).await.unwrap();

    let before = std::fs::read_to_string(&path).unwrap().lines().count();
    let kept = store.compact().await.unwrap();
    let after = std::fs::read_to_string(&path).unwrap().lines().count();
    assert_eq!(kept, 1);
    assert_eq!(after, 1);
    assert!(after < before);

    let reopened = TaskStore::open_file(&path).await.unwrap();
    let task = reopened.get(&keep.id).await.unwrap();
    assert_eq!(task.description, "revision 4");
    assert!(reopened.get(&gone.id).await.is_none());
}
