use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use tiering::{Application, ShutdownManager};
use tiering_domain::entities::GenerationTaskStatus;
use tiering_domain::value_objects::DeploymentMode;
use tiering_testing_utils::{
    memory_database, wait_until, ConfigBuilder, ExecutorBehavior, ScriptedExecutor,
};

#[tokio::test]
async fn daemon_runs_tasks_and_stops_on_signal() {
    let config = ConfigBuilder::new().build();
    let app = Arc::new(Application::with_database(config, memory_database().await));
    let executor = Arc::new(ScriptedExecutor::new("image", ExecutorBehavior::Succeed));
    app.executor_registry().register(executor.clone()).await;
    let id = app
        .task_queue()
        .enqueue(Some("user-1"), "image", json!({ "prompt": "tide pools" }))
        .await
        .unwrap();

    let shutdown = ShutdownManager::new();
    let handle = {
        let app = app.clone();
        let shutdown_rx = shutdown.subscribe().await;
        tokio::spawn(async move { app.run(shutdown_rx).await })
    };

    let queue = app.task_queue().clone();
    assert!(
        wait_until(Duration::from_secs(5), || {
            let queue = queue.clone();
            async move {
                queue.get_status(id).await.unwrap() == Some(GenerationTaskStatus::Succeeded)
            }
        })
        .await
    );
    assert_eq!(app.mode_manager().current_mode(), DeploymentMode::LocalOnly);
    assert_eq!(executor.runs_for(id), 1);

    shutdown.shutdown().await;
    let stopped = tokio::time::timeout(Duration::from_secs(5), handle).await;
    assert!(stopped.expect("daemon stops in time").unwrap().is_ok());
}

#[tokio::test]
async fn pinned_mode_is_active_before_any_probe() {
    let mut config = ConfigBuilder::new()
        .with_external_store()
        .with_pinned_mode("local_external")
        .build();
    config.modes.auto_reconcile = false;
    let app = Arc::new(Application::with_database(config, memory_database().await));

    let shutdown = ShutdownManager::new();
    let handle = {
        let app = app.clone();
        let shutdown_rx = shutdown.subscribe().await;
        tokio::spawn(async move { app.run(shutdown_rx).await })
    };

    let manager = app.mode_manager().clone();
    assert!(
        wait_until(Duration::from_secs(2), || {
            let manager = manager.clone();
            async move { manager.current_mode() == DeploymentMode::LocalExternal }
        })
        .await
    );
    assert_eq!(app.policy().mode(), DeploymentMode::LocalExternal);
    assert!(app.policy().is_enabled("projects"));

    shutdown.shutdown().await;
    let stopped = tokio::time::timeout(Duration::from_secs(5), handle).await;
    assert!(stopped.expect("daemon stops in time").unwrap().is_ok());
}
