#![allow(dead_code)]

use std::sync::Arc;

use tiering_core::config::AppConfig;
use tiering_modes::{
    AvailabilityDetector, DetectorSettings, ModeManager, ModeManagerSettings, PolicyTable,
};
use tiering_testing_utils::{InMemorySettingsStore, MockObjectStoreFactory, ScriptedConnector};

pub struct Harness {
    pub manager: Arc<ModeManager>,
    pub detector: Arc<AvailabilityDetector>,
    pub connector: Arc<ScriptedConnector>,
    pub objects: Arc<MockObjectStoreFactory>,
    pub settings: Arc<InMemorySettingsStore>,
    pub policy: Arc<PolicyTable>,
}

pub fn detector(
    config: &AppConfig,
    connector: ScriptedConnector,
    objects: MockObjectStoreFactory,
) -> (
    Arc<AvailabilityDetector>,
    Arc<ScriptedConnector>,
    Arc<MockObjectStoreFactory>,
) {
    let connector = Arc::new(connector);
    let objects = Arc::new(objects);
    let detector = Arc::new(AvailabilityDetector::new(
        DetectorSettings::from_config(config),
        connector.clone(),
        objects.clone(),
    ));
    (detector, connector, objects)
}

pub fn harness_with(
    config: &AppConfig,
    connector: ScriptedConnector,
    objects: MockObjectStoreFactory,
    settings: InMemorySettingsStore,
    customize: impl FnOnce(ModeManager) -> ModeManager,
) -> Harness {
    let (detector, connector, objects) = detector(config, connector, objects);
    let settings = Arc::new(settings);
    let policy = Arc::new(PolicyTable::default());
    let manager = ModeManager::new(
        ModeManagerSettings::from_config(&config.modes),
        detector.clone(),
        policy.clone(),
        settings.clone(),
    );
    Harness {
        manager: Arc::new(customize(manager)),
        detector,
        connector,
        objects,
        settings,
        policy,
    }
}

pub fn harness(
    config: &AppConfig,
    connector: ScriptedConnector,
    objects: MockObjectStoreFactory,
) -> Harness {
    harness_with(
        config,
        connector,
        objects,
        InMemorySettingsStore::new(),
        |manager| manager,
    )
}
