//! Poller manager lifecycle tests.
//!
//! Time is paused, so poll intervals elapse as soon as every task is idle.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{at, id, Harness, SCOPE};
use moldap_sync::{
    ManagerSettings, ManagerState, PollErrorPolicy, PollerManager, SyncError, WatermarkStore,
};

fn manager(h: &Harness, scopes: &[&str], error_policy: PollErrorPolicy) -> PollerManager {
    PollerManager::new(
        h.store.clone(),
        Arc::clone(&h.poller),
        Arc::clone(&h.emitter),
        ManagerSettings {
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            poll_interval: Duration::from_secs(5),
            error_policy,
        },
    )
}

/// Let the scope tasks run for `secs` of virtual time.
async fn run_for(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

#[tokio::test(start_paused = true)]
async fn test_start_poll_and_stop() {
    let mut h = Harness::new();
    h.directory.touch(SCOPE, id(1), at(10, 0, 0));
    let manager = manager(&h, &[SCOPE], PollErrorPolicy::Terminate);

    assert_eq!(manager.state().await, ManagerState::Stopped);
    assert!(!manager.is_healthy().await);

    manager.start().await.unwrap();
    assert_eq!(manager.state().await, ManagerState::Running);

    run_for(1).await;
    assert!(manager.is_healthy().await);
    assert!(manager.dead_scopes().await.is_empty());
    assert_eq!(h.drain_events(), vec![id(1)]);
    assert_eq!(
        h.store.fetch(SCOPE).await.unwrap().unwrap().last_seen_at,
        at(10, 0, 0)
    );

    manager.stop().await;
    assert_eq!(manager.state().await, ManagerState::Stopped);
    assert!(!manager.is_healthy().await);

    // Nothing polls after stop.
    let searches = h.directory.search_count();
    run_for(60).await;
    assert_eq!(h.directory.search_count(), searches);
}

#[tokio::test(start_paused = true)]
async fn test_polls_repeat_every_interval() {
    let h = Harness::new();
    let manager = manager(&h, &[SCOPE], PollErrorPolicy::Terminate);

    manager.start().await.unwrap();
    run_for(1).await;
    assert_eq!(h.directory.search_count(), 1);

    run_for(10).await;
    assert_eq!(h.directory.search_count(), 3);

    manager.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_one_task_per_scope() {
    let other = "ou=groups,dc=example,dc=com";
    let mut h = Harness::new();
    h.directory.touch(SCOPE, id(1), at(10, 0, 0));
    h.directory.touch(other, id(2), at(11, 0, 0));
    let manager = manager(&h, &[SCOPE, other], PollErrorPolicy::Terminate);

    manager.start().await.unwrap();
    run_for(1).await;

    let mut emitted = h.drain_events();
    emitted.sort();
    assert_eq!(emitted, vec![id(1), id(2)]);
    assert_eq!(h.store.len().await, 2);

    manager.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_terminate_policy_ends_failing_scope() {
    let h = Harness::new();
    h.directory.fail_searches(true);
    let manager = manager(&h, &[SCOPE], PollErrorPolicy::Terminate);

    manager.start().await.unwrap();
    run_for(1).await;

    assert_eq!(manager.state().await, ManagerState::Running);
    assert!(!manager.is_healthy().await);
    assert_eq!(manager.dead_scopes().await, vec![SCOPE.to_string()]);

    // The task stays down even once the directory recovers.
    h.directory.fail_searches(false);
    run_for(30).await;
    assert_eq!(h.directory.search_count(), 1);

    manager.stop().await;
    assert_eq!(manager.state().await, ManagerState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_retry_policy_keeps_polling() {
    let mut h = Harness::new();
    h.directory.fail_searches(true);
    let manager = manager(&h, &[SCOPE], PollErrorPolicy::Retry);

    manager.start().await.unwrap();
    run_for(11).await;

    assert!(manager.is_healthy().await);
    assert_eq!(h.directory.search_count(), 3);

    h.directory.touch(SCOPE, id(7), at(9, 0, 0));
    h.directory.fail_searches(false);
    run_for(5).await;
    assert_eq!(h.drain_events(), vec![id(7)]);

    manager.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_start_and_stop_are_idempotent() {
    let h = Harness::new();
    let manager = manager(&h, &[SCOPE], PollErrorPolicy::Terminate);

    manager.stop().await;
    assert_eq!(manager.state().await, ManagerState::Stopped);

    manager.start().await.unwrap();
    manager.start().await.unwrap();
    run_for(1).await;
    // A second start must not spawn a second task.
    assert_eq!(h.directory.search_count(), 1);

    manager.stop().await;
    manager.stop().await;
    assert_eq!(manager.state().await, ManagerState::Stopped);

    // A stopped manager can be started again.
    manager.start().await.unwrap();
    assert!(manager.is_healthy().await);
    manager.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_start_and_stop_leave_no_orphan_tasks() {
    let h = Harness::new();
    let manager = manager(&h, &[SCOPE], PollErrorPolicy::Terminate);

    for _ in 0..3 {
        let (started, ()) = tokio::join!(manager.start(), manager.stop());
        started.unwrap();

        if manager.state().await == ManagerState::Running {
            assert!(manager.is_healthy().await);
        } else {
            assert_eq!(manager.state().await, ManagerState::Stopped);
            let searches = h.directory.search_count();
            run_for(30).await;
            assert_eq!(h.directory.search_count(), searches);
        }

        manager.stop().await;
        assert_eq!(manager.state().await, ManagerState::Stopped);
        let searches = h.directory.search_count();
        run_for(30).await;
        assert_eq!(h.directory.search_count(), searches);
    }
}

#[tokio::test]
async fn test_start_without_scopes_fails() {
    let h = Harness::new();
    let manager = manager(&h, &[], PollErrorPolicy::Terminate);

    let result = manager.start().await;

    assert!(matches!(result, Err(SyncError::Configuration { .. })));
    assert_eq!(manager.state().await, ManagerState::Stopped);
}

#[tokio::test]
async fn test_poll_now() {
    let mut h = Harness::new();
    h.directory.touch(SCOPE, id(4), at(8, 0, 0));
    let manager = manager(&h, &[SCOPE], PollErrorPolicy::Terminate);

    let report = manager.poll_now(SCOPE).await.unwrap();
    assert_eq!(report.found, 1);
    assert!(report.written);
    assert_eq!(h.drain_events(), vec![id(4)]);

    let result = manager.poll_now("ou=unknown,dc=example,dc=com").await;
    assert!(matches!(result, Err(SyncError::UnknownScope { .. })));
}
