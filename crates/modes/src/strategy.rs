//! Transition strategy table keyed by `(from, to)`.

use std::time::Duration;

use tiering_domain::switching::{PostSwitchAction, PreSwitchCheck};
use tiering_domain::value_objects::{Backend, DeploymentMode, TransitionKind};

#[derive(Debug, Clone, PartialEq)]
pub struct TransitionStrategy {
    pub kind: TransitionKind,
    pub estimated_duration: Duration,
    pub migration_required: bool,
    pub pre_checks: Vec<PreSwitchCheck>,
    pub post_actions: Vec<PostSwitchAction>,
    pub rollback_supported: bool,
}

fn checks_for(added: &[Backend]) -> Vec<PreSwitchCheck> {
    let mut checks = vec![PreSwitchCheck::LocalStoreHealthy];
    for backend in added {
        match backend {
            Backend::ExternalStore => checks.extend([
                PreSwitchCheck::ExternalStoreConfigured,
                PreSwitchCheck::ExternalStoreReachable,
            ]),
            Backend::ObjectStore => checks.extend([
                PreSwitchCheck::ObjectStoreCredentialsPresent,
                PreSwitchCheck::ObjectStoreReachable,
            ]),
        }
    }
    checks
}

fn actions_for(added: &[Backend], removed: &[Backend]) -> Vec<PostSwitchAction> {
    let mut actions = vec![
        PostSwitchAction::ClearAvailabilityCache,
        PostSwitchAction::RefreshSyncPolicy,
    ];
    if !added.is_empty() {
        actions.push(PostSwitchAction::RunStartupSync);
    }
    if added.contains(&Backend::ExternalStore) {
        actions.push(PostSwitchAction::FlushOutbox);
    }
    if removed.contains(&Backend::ObjectStore) {
        actions.push(PostSwitchAction::ReleaseObjectStore);
    }
    actions
}

fn upgrade(added: &[Backend], secs: u64) -> TransitionStrategy {
    TransitionStrategy {
        kind: TransitionKind::Upgrade,
        estimated_duration: Duration::from_secs(secs),
        migration_required: true,
        pre_checks: checks_for(added),
        post_actions: actions_for(added, &[]),
        rollback_supported: true,
    }
}

// The local store always holds the full data set, so leaving a backend
// needs no data movement and there is nothing to roll back to.
fn downgrade(removed: &[Backend], secs: u64) -> TransitionStrategy {
    TransitionStrategy {
        kind: TransitionKind::Downgrade,
        estimated_duration: Duration::from_secs(secs),
        migration_required: false,
        pre_checks: checks_for(&[]),
        post_actions: actions_for(&[], removed),
        rollback_supported: false,
    }
}

fn migration(added: Backend, removed: Backend, secs: u64) -> TransitionStrategy {
    TransitionStrategy {
        kind: TransitionKind::Migration,
        estimated_duration: Duration::from_secs(secs),
        migration_required: true,
        pre_checks: checks_for(&[added]),
        post_actions: actions_for(&[added], &[removed]),
        rollback_supported: true,
    }
}

fn maintenance() -> TransitionStrategy {
    TransitionStrategy {
        kind: TransitionKind::Maintenance,
        estimated_duration: Duration::from_secs(5),
        migration_required: false,
        pre_checks: checks_for(&[]),
        post_actions: vec![PostSwitchAction::RefreshSyncPolicy],
        rollback_supported: false,
    }
}

/// Exhaustive over every ordered pair of modes.
pub fn strategy_for(from: DeploymentMode, to: DeploymentMode) -> TransitionStrategy {
    use Backend::{ExternalStore, ObjectStore};
    use DeploymentMode::*;

    match (from, to) {
        (LocalOnly, LocalOnly)
        | (LocalExternal, LocalExternal)
        | (LocalObject, LocalObject)
        | (LocalExternalObject, LocalExternalObject) => maintenance(),

        (LocalOnly, LocalExternal) => upgrade(&[ExternalStore], 30),
        (LocalOnly, LocalObject) => upgrade(&[ObjectStore], 60),
        (LocalOnly, LocalExternalObject) => upgrade(&[ExternalStore, ObjectStore], 90),
        (LocalExternal, LocalExternalObject) => upgrade(&[ObjectStore], 60),
        (LocalObject, LocalExternalObject) => upgrade(&[ExternalStore], 30),

        (LocalExternal, LocalOnly) => downgrade(&[ExternalStore], 10),
        (LocalObject, LocalOnly) => downgrade(&[ObjectStore], 10),
        (LocalExternalObject, LocalOnly) => downgrade(&[ExternalStore, ObjectStore], 15),
        (LocalExternalObject, LocalExternal) => downgrade(&[ObjectStore], 10),
        (LocalExternalObject, LocalObject) => downgrade(&[ExternalStore], 10),

        (LocalExternal, LocalObject) => migration(ObjectStore, ExternalStore, 120),
        (LocalObject, LocalExternal) => migration(ExternalStore, ObjectStore, 120),
    }
}
