mod common;

use std::sync::Arc;
use std::time::Duration;

use tiering_domain::ports::ObjectStoreError;
use tiering_domain::switching::{PostSwitchAction, RejectionReason, SwitchOutcome};
use tiering_domain::value_objects::{DeploymentMode, TransitionKey};
use tiering_modes::{CompatibilityGraph, PINNED_MODE_KEY};
use tiering_testing_utils::{
    ConfigBuilder, CountingIdentityBootstrap, InMemorySettingsStore, MockMigration,
    MockObjectStoreFactory, RecordingHook, RecordingListener, ScriptedConnector,
};

use common::{harness, harness_with, Harness};

fn full_harness() -> Harness {
    let config = ConfigBuilder::new()
        .with_external_store()
        .with_object_store()
        .with_cache_ttl_seconds(0)
        .build();
    harness(
        &config,
        ScriptedConnector::reachable(),
        MockObjectStoreFactory::healthy(),
    )
}

#[tokio::test]
async fn reachable_switch_commits_and_persists() {
    let h = full_harness();
    let mut modes = h.manager.subscribe();

    let outcome = h
        .manager
        .switch_mode(DeploymentMode::LocalExternal, "operator request")
        .await;

    let SwitchOutcome::Switched(record) = outcome else {
        panic!("expected a committed switch, got {outcome:?}");
    };
    assert!(record.success);
    assert_eq!(h.manager.current_mode(), DeploymentMode::LocalExternal);
    assert_eq!(
        h.settings.value(PINNED_MODE_KEY).as_deref(),
        Some("local_external")
    );
    assert_eq!(h.policy.mode(), DeploymentMode::LocalExternal);
    assert!(h.policy.is_enabled("projects"));
    assert!(modes.has_changed().unwrap());
    assert_eq!(*modes.borrow_and_update(), DeploymentMode::LocalExternal);
    assert_eq!(h.manager.history().len(), 1);
    assert!(!h.manager.is_switch_in_progress());
    assert!(h.manager.current_context().is_none());
}

#[tokio::test]
async fn switching_to_the_current_mode_is_a_noop() {
    let h = full_harness();

    let outcome = h
        .manager
        .switch_mode(DeploymentMode::LocalOnly, "no change")
        .await;

    assert_eq!(outcome, SwitchOutcome::NoOp(DeploymentMode::LocalOnly));
    assert!(outcome.is_success());
    assert!(h.manager.history().is_empty());
    assert!(h.settings.value(PINNED_MODE_KEY).is_none());
    assert_eq!(h.policy.mode(), DeploymentMode::LocalOnly);
}

#[tokio::test]
async fn unreachable_target_is_rejected_without_a_context() {
    let config = ConfigBuilder::new()
        .with_external_store()
        .with_object_store()
        .build();
    let h = harness_with(
        &config,
        ScriptedConnector::reachable(),
        MockObjectStoreFactory::healthy(),
        InMemorySettingsStore::new(),
        |manager| {
            manager.with_graph(CompatibilityGraph::from_edges([(
                DeploymentMode::LocalOnly,
                DeploymentMode::LocalExternal,
            )]))
        },
    );

    let outcome = h
        .manager
        .switch_mode(DeploymentMode::LocalObject, "not allowed")
        .await;

    assert_eq!(
        outcome,
        SwitchOutcome::Rejected(RejectionReason::Unreachable {
            from: DeploymentMode::LocalOnly,
            to: DeploymentMode::LocalObject,
        })
    );
    assert_eq!(h.manager.current_mode(), DeploymentMode::LocalOnly);
    assert!(!h.manager.is_switch_in_progress());
    assert!(h.manager.history().is_empty());
    assert!(h.connector.calls().is_empty());
}

#[tokio::test]
async fn every_reachable_pair_is_accepted_while_idle() {
    for from in DeploymentMode::ALL {
        for to in DeploymentMode::ALL {
            let h = full_harness();
            if from != DeploymentMode::LocalOnly {
                let setup = h.manager.switch_mode(from, "setup").await;
                assert!(setup.is_success(), "setup {from}: {setup:?}");
            }
            let outcome = h.manager.switch_mode(to, "pairwise").await;
            assert!(
                outcome.rejection().is_none(),
                "{from} -> {to} rejected: {outcome:?}"
            );
            assert_eq!(h.manager.current_mode(), to);
        }
    }
}

#[tokio::test]
async fn concurrent_switches_are_single_flight() {
    let h = full_harness();
    let migration = Arc::new(MockMigration::gated());
    h.manager.register_migration(
        DeploymentMode::LocalOnly,
        DeploymentMode::LocalExternal,
        migration.clone(),
    );

    let manager = Arc::clone(&h.manager);
    let first = tokio::spawn(async move {
        manager
            .switch_mode(DeploymentMode::LocalExternal, "first")
            .await
    });
    migration.wait_entered().await;

    assert!(h.manager.is_switch_in_progress());
    let ctx = h.manager.current_context().expect("context while switching");
    assert_eq!(
        ctx.key(),
        TransitionKey::new(DeploymentMode::LocalOnly, DeploymentMode::LocalExternal)
    );

    let second = h
        .manager
        .switch_mode(DeploymentMode::LocalObject, "second")
        .await;
    assert_eq!(second, SwitchOutcome::Rejected(RejectionReason::Busy));

    migration.release();
    let first = first.await.unwrap();
    assert!(matches!(first, SwitchOutcome::Switched(ref r) if r.data_migrated));
    assert_eq!(h.manager.current_mode(), DeploymentMode::LocalExternal);
    assert!(!h.manager.is_switch_in_progress());
    assert_eq!(h.manager.history().len(), 1);
}

#[tokio::test]
async fn failed_pre_check_names_the_check_and_keeps_mode() {
    let config = ConfigBuilder::new().build();
    let h = harness(
        &config,
        ScriptedConnector::reachable(),
        MockObjectStoreFactory::healthy(),
    );

    let outcome = h
        .manager
        .switch_mode(DeploymentMode::LocalExternal, "no url")
        .await;

    match outcome {
        SwitchOutcome::Rejected(RejectionReason::PreCheckFailed { check, .. }) => {
            assert_eq!(check, "external_store_configured")
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(h.manager.current_mode(), DeploymentMode::LocalOnly);
    assert!(!h.manager.is_switch_in_progress());
    let history = h.manager.history();
    assert_eq!(history.len(), 1);
    assert!(!history[0].success);
}

#[tokio::test]
async fn unhealthy_local_store_blocks_downgrades_too() {
    let h = full_harness();
    h.manager
        .switch_mode(DeploymentMode::LocalExternal, "setup")
        .await;
    h.settings.set_healthy(false);

    let outcome = h
        .manager
        .switch_mode(DeploymentMode::LocalOnly, "downgrade")
        .await;

    assert!(matches!(
        outcome.rejection(),
        Some(RejectionReason::PreCheckFailed { check, .. }) if check == "local_store_healthy"
    ));
    assert_eq!(h.manager.current_mode(), DeploymentMode::LocalExternal);
}

#[tokio::test]
async fn migration_failure_rolls_back_and_keeps_mode() {
    let h = full_harness();
    let migration = Arc::new(MockMigration::failing());
    h.manager.register_migration(
        DeploymentMode::LocalOnly,
        DeploymentMode::LocalObject,
        migration.clone(),
    );

    let outcome = h
        .manager
        .switch_mode(DeploymentMode::LocalObject, "move blobs")
        .await;

    let SwitchOutcome::Failed(record) = outcome.clone() else {
        panic!("expected failure, got {outcome:?}");
    };
    assert!(record.rolled_back);
    assert!(record.error.unwrap().contains("copy step failed"));
    assert_eq!(
        migration.rollbacks(),
        vec![TransitionKey::new(
            DeploymentMode::LocalOnly,
            DeploymentMode::LocalObject
        )]
    );
    assert_eq!(h.manager.current_mode(), DeploymentMode::LocalOnly);
    assert!(h.settings.value(PINNED_MODE_KEY).is_none());
    assert!(!h.manager.is_switch_in_progress());
    assert!(outcome.into_result().is_err());
}

#[tokio::test]
async fn missing_migration_routine_proceeds_without_moving_data() {
    let h = full_harness();

    let outcome = h
        .manager
        .switch_mode(DeploymentMode::LocalObject, "no routine")
        .await;

    let SwitchOutcome::Switched(record) = outcome else {
        panic!("expected switch, got {outcome:?}");
    };
    assert!(!record.data_migrated);
}

#[tokio::test]
async fn persist_failure_aborts_before_commit() {
    let h = full_harness();
    h.settings.set_fail_writes(true);

    let outcome = h
        .manager
        .switch_mode(DeploymentMode::LocalExternal, "read-only settings")
        .await;

    assert!(matches!(outcome, SwitchOutcome::Failed(_)));
    assert_eq!(h.manager.current_mode(), DeploymentMode::LocalOnly);
}

#[tokio::test]
async fn post_action_failures_do_not_undo_the_switch() {
    let h = full_harness();
    let hook = Arc::new(RecordingHook::failing());
    h.manager.add_post_switch_hook(hook.clone());

    let outcome = h
        .manager
        .switch_mode(DeploymentMode::LocalExternal, "with hooks")
        .await;

    let SwitchOutcome::Switched(record) = outcome else {
        panic!("expected switch, got {outcome:?}");
    };
    assert_eq!(
        hook.actions(),
        vec![PostSwitchAction::RunStartupSync, PostSwitchAction::FlushOutbox]
    );
    assert_eq!(record.post_action_failures.len(), 2);
    assert_eq!(h.manager.current_mode(), DeploymentMode::LocalExternal);
}

#[tokio::test]
async fn availability_cache_is_cleared_after_switch() {
    let config = ConfigBuilder::new().with_external_store().build();
    let h = harness(
        &config,
        ScriptedConnector::reachable(),
        MockObjectStoreFactory::healthy(),
    );

    h.manager
        .switch_mode(DeploymentMode::LocalExternal, "cache")
        .await;

    assert!(h
        .detector
        .cached(tiering_domain::value_objects::Backend::ExternalStore)
        .is_none());
}

#[tokio::test]
async fn listener_failures_are_isolated() {
    let h = full_harness();
    let panicking = Arc::new(RecordingListener::panicking());
    let failing = Arc::new(RecordingListener::failing());
    let recording = Arc::new(RecordingListener::new());
    h.manager.add_listener(panicking.clone());
    h.manager.add_listener(failing.clone());
    h.manager.add_listener(recording.clone());

    let outcome = h
        .manager
        .switch_mode(DeploymentMode::LocalExternal, "notify")
        .await;

    assert!(outcome.is_success());
    assert_eq!(panicking.events().len(), 1);
    assert_eq!(failing.events().len(), 1);
    let events = recording.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].previous, DeploymentMode::LocalOnly);
    assert_eq!(events[0].current, DeploymentMode::LocalExternal);
    assert_eq!(events[0].reason, "notify");
}

#[tokio::test]
async fn default_admin_is_ensured_for_the_new_mode() {
    let identity = Arc::new(CountingIdentityBootstrap::new());
    let config = ConfigBuilder::new().with_external_store().build();
    let h = harness_with(
        &config,
        ScriptedConnector::reachable(),
        MockObjectStoreFactory::healthy(),
        InMemorySettingsStore::new(),
        |manager| manager.with_identity_bootstrap(identity.clone()),
    );

    h.manager
        .switch_mode(DeploymentMode::LocalExternal, "admin")
        .await;

    assert_eq!(identity.calls(), vec![DeploymentMode::LocalExternal]);
}

#[tokio::test]
async fn bootstrap_failure_is_recorded_but_not_fatal() {
    let identity = Arc::new(CountingIdentityBootstrap::failing());
    let config = ConfigBuilder::new().with_external_store().build();
    let h = harness_with(
        &config,
        ScriptedConnector::reachable(),
        MockObjectStoreFactory::healthy(),
        InMemorySettingsStore::new(),
        |manager| manager.with_identity_bootstrap(identity.clone()),
    );

    let outcome = h
        .manager
        .switch_mode(DeploymentMode::LocalExternal, "admin")
        .await;

    let SwitchOutcome::Switched(record) = outcome else {
        panic!("expected switch, got {outcome:?}");
    };
    assert!(record.post_action_failures[0].starts_with("ensure_default_admin"));
}

#[tokio::test]
async fn malformed_target_is_rejected() {
    let h = full_harness();

    let outcome = h.manager.switch_mode_str("cloud_only", "typo").await;

    assert_eq!(
        outcome,
        SwitchOutcome::Rejected(RejectionReason::Malformed {
            input: "cloud_only".into()
        })
    );

    let parsed = h.manager.switch_mode_str("LOCAL_EXTERNAL", "caps").await;
    assert!(matches!(parsed, SwitchOutcome::Switched(_)));
}

#[tokio::test]
async fn history_is_bounded() {
    let config = ConfigBuilder::new()
        .with_external_store()
        .with_history_capacity(2)
        .build();
    let h = harness(
        &config,
        ScriptedConnector::reachable(),
        MockObjectStoreFactory::healthy(),
    );

    for (target, reason) in [
        (DeploymentMode::LocalExternal, "one"),
        (DeploymentMode::LocalOnly, "two"),
        (DeploymentMode::LocalExternal, "three"),
    ] {
        assert!(h.manager.switch_mode(target, reason).await.is_success());
    }

    let reasons: Vec<String> = h.manager.history().into_iter().map(|r| r.reason).collect();
    assert_eq!(reasons, vec!["two", "three"]);
}

#[tokio::test]
async fn committed_mode_is_exported_to_the_environment() {
    let config = ConfigBuilder::new()
        .with_external_store()
        .with_export_env_var("TIERING_MODE_EXPORT_TEST")
        .build();
    let h = harness(
        &config,
        ScriptedConnector::reachable(),
        MockObjectStoreFactory::healthy(),
    );

    h.manager
        .switch_mode(DeploymentMode::LocalExternal, "export")
        .await;

    assert_eq!(
        std::env::var("TIERING_MODE_EXPORT_TEST").as_deref(),
        Ok("local_external")
    );
}

#[tokio::test]
async fn committed_mode_is_published_without_env_export() {
    let config = ConfigBuilder::new().with_external_store().build();
    assert!(config.modes.export_env_var.is_none());
    let h = harness(
        &config,
        ScriptedConnector::reachable(),
        MockObjectStoreFactory::healthy(),
    );
    let mut modes = h.manager.subscribe();

    h.manager
        .switch_mode(DeploymentMode::LocalExternal, "no export")
        .await;

    assert!(modes.has_changed().unwrap());
    assert_eq!(*modes.borrow_and_update(), DeploymentMode::LocalExternal);
    assert_eq!(h.manager.current_mode(), DeploymentMode::LocalExternal);
}

#[tokio::test]
async fn valid_pinned_mode_is_used_without_probing() {
    let config = ConfigBuilder::new()
        .with_external_store()
        .with_pinned_mode("local_external")
        .build();
    let h = harness(
        &config,
        ScriptedConnector::unreachable(),
        MockObjectStoreFactory::healthy(),
    );

    let mode = h.manager.initialize().await;
    h.manager.wait_for_convergence().await;

    assert_eq!(mode, DeploymentMode::LocalExternal);
    assert_eq!(h.manager.current_mode(), DeploymentMode::LocalExternal);
    assert!(h.connector.calls().is_empty());
    assert_eq!(h.policy.mode(), DeploymentMode::LocalExternal);
}

#[tokio::test]
async fn persisted_mode_wins_over_configured_pin() {
    let config = ConfigBuilder::new()
        .with_external_store()
        .with_object_store()
        .with_pinned_mode("local_external")
        .build();
    let h = harness_with(
        &config,
        ScriptedConnector::reachable(),
        MockObjectStoreFactory::healthy(),
        InMemorySettingsStore::new().with_value(PINNED_MODE_KEY, "local_object"),
        |manager| manager,
    );

    assert_eq!(h.manager.initialize().await, DeploymentMode::LocalObject);
}

#[tokio::test]
async fn invalid_pin_starts_local_only_and_converges_in_background() {
    let config = ConfigBuilder::new()
        .with_external_store()
        .with_pinned_mode("local_object")
        .build();
    let h = harness(
        &config,
        ScriptedConnector::reachable().with_delay(Duration::from_millis(100)),
        MockObjectStoreFactory::healthy(),
    );
    let listener = Arc::new(RecordingListener::new());
    h.manager.add_listener(listener.clone());

    let started = h.manager.initialize().await;
    assert_eq!(started, DeploymentMode::LocalOnly);
    assert_eq!(h.manager.current_mode(), DeploymentMode::LocalOnly);

    h.manager.wait_for_convergence().await;

    assert_eq!(h.manager.current_mode(), DeploymentMode::LocalExternal);
    assert_eq!(h.policy.mode(), DeploymentMode::LocalExternal);
    assert!(h.settings.value(PINNED_MODE_KEY).is_none());
    let events = listener.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].current, DeploymentMode::LocalExternal);
}

#[tokio::test]
async fn reconcile_downgrades_when_object_store_disappears() {
    let h = full_harness();
    let outcome = h
        .manager
        .switch_mode(DeploymentMode::LocalExternalObject, "setup")
        .await;
    assert!(outcome.is_success(), "{outcome:?}");

    h.objects
        .set_result(Err(ObjectStoreError::Other("endpoint unreachable".into())));
    let outcome = h.manager.reconcile().await;

    let Some(SwitchOutcome::Switched(record)) = outcome else {
        panic!("expected downgrade, got {outcome:?}");
    };
    assert_eq!(record.to, DeploymentMode::LocalExternal);
    assert_eq!(record.reason, "object store unavailable");
    assert_eq!(h.manager.current_mode(), DeploymentMode::LocalExternal);
}

#[tokio::test]
async fn reconcile_follows_detected_mode() {
    let h = full_harness();

    let outcome = h.manager.reconcile().await;

    let Some(SwitchOutcome::Switched(record)) = outcome else {
        panic!("expected upgrade, got {outcome:?}");
    };
    assert_eq!(record.to, DeploymentMode::LocalExternalObject);
    assert_eq!(record.reason, "auto-detected change");
    assert!(h.manager.reconcile().await.is_none());
}

#[tokio::test]
async fn check_and_switch_respects_the_interval() {
    let config = ConfigBuilder::new()
        .with_external_store()
        .with_cache_ttl_seconds(0)
        .with_reconcile_interval_seconds(3600)
        .build();
    let h = harness(
        &config,
        ScriptedConnector::unreachable(),
        MockObjectStoreFactory::healthy(),
    );

    assert!(h.manager.check_and_switch().await.is_none());
    assert_eq!(h.connector.calls().len(), 1);

    h.connector.set_results(Ok(()), Ok(()));
    assert!(h.manager.check_and_switch().await.is_none());
    assert_eq!(h.connector.calls().len(), 1);
    assert_eq!(h.manager.current_mode(), DeploymentMode::LocalOnly);
}
