mod common;

use std::time::{Duration, Instant};

use tiering_domain::entities::{AvailabilityStatus, FailureClassification};
use tiering_domain::ports::{ConnectMode, ObjectStoreError, ProbeError};
use tiering_domain::value_objects::{Backend, DeploymentMode};
use tiering_testing_utils::{ConfigBuilder, MockObjectStoreFactory, ScriptedConnector};

use common::detector;

#[tokio::test]
async fn nothing_configured_means_local_only_without_io() {
    let config = ConfigBuilder::new().build();
    let (detector, connector, objects) = detector(
        &config,
        ScriptedConnector::reachable(),
        MockObjectStoreFactory::healthy(),
    );

    let report = detector.detect().await;

    assert_eq!(report.mode, DeploymentMode::LocalOnly);
    assert_eq!(report.external.status, AvailabilityStatus::ConfigMissing);
    assert_eq!(report.object.status, AvailabilityStatus::ConfigMissing);
    assert!(connector.calls().is_empty());
    assert_eq!(objects.clients_created(), 0);
}

#[tokio::test]
async fn embedded_external_url_counts_as_missing() {
    let config = ConfigBuilder::new()
        .with_external_url("sqlite://data/tiering.db")
        .build();
    let (detector, connector, _) = detector(
        &config,
        ScriptedConnector::reachable(),
        MockObjectStoreFactory::healthy(),
    );

    let result = detector.check_external_store().await;

    assert_eq!(result.status, AvailabilityStatus::ConfigMissing);
    assert!(connector.calls().is_empty());
}

#[tokio::test]
async fn disabled_external_store_short_circuits() {
    let config = ConfigBuilder::new()
        .with_external_store()
        .with_external_disabled()
        .build();
    let (detector, connector, _) = detector(
        &config,
        ScriptedConnector::reachable(),
        MockObjectStoreFactory::healthy(),
    );

    let result = detector.check_external_store().await;

    assert_eq!(result.status, AvailabilityStatus::Unavailable);
    assert!(connector.calls().is_empty());
    assert!(detector.cached(Backend::ExternalStore).is_none());
}

#[tokio::test]
async fn pooler_incompatibility_falls_back_to_plain_connection() {
    let config = ConfigBuilder::new().with_external_store().build();
    let (detector, connector, _) = detector(
        &config,
        ScriptedConnector::behind_pooler(Ok(())),
        MockObjectStoreFactory::healthy(),
    );

    let result = detector.check_external_store().await;

    assert!(result.is_available());
    assert_eq!(connector.modes(), vec![ConnectMode::Pooled, ConnectMode::Plain]);
}

#[tokio::test]
async fn failed_fallback_reports_plain_error() {
    let config = ConfigBuilder::new().with_external_store().build();
    let (detector, connector, _) = detector(
        &config,
        ScriptedConnector::behind_pooler(Err(ProbeError::Authentication(
            "password authentication failed".into(),
        ))),
        MockObjectStoreFactory::healthy(),
    );

    let result = detector.check_external_store().await;

    assert_eq!(result.status, AvailabilityStatus::ConnectionFailed);
    assert_eq!(
        result.classification,
        Some(FailureClassification::Authentication)
    );
    assert_eq!(connector.calls().len(), 2);
}

#[tokio::test]
async fn ordinary_connection_errors_do_not_retry() {
    let config = ConfigBuilder::new().with_external_store().build();
    let (detector, connector, _) = detector(
        &config,
        ScriptedConnector::unreachable(),
        MockObjectStoreFactory::healthy(),
    );

    let result = detector.check_external_store().await;

    assert_eq!(result.status, AvailabilityStatus::ConnectionFailed);
    assert_eq!(result.classification, Some(FailureClassification::Connection));
    assert_eq!(connector.modes(), vec![ConnectMode::Pooled]);
}

#[tokio::test]
async fn probe_timeout_is_connection_failed_not_unavailable() {
    let config = ConfigBuilder::new().with_external_store().build();
    let (detector, _, _) = detector(
        &config,
        ScriptedConnector::reachable().with_delay(Duration::from_secs(3)),
        MockObjectStoreFactory::healthy(),
    );

    let result = detector.check_external_store().await;

    assert_eq!(result.status, AvailabilityStatus::ConnectionFailed);
    assert_eq!(result.classification, Some(FailureClassification::Timeout));
}

#[tokio::test]
async fn missing_bucket_is_a_connection_failure_not_config_missing() {
    let config = ConfigBuilder::new().with_object_store().build();
    let (detector, _, objects) = detector(
        &config,
        ScriptedConnector::reachable(),
        MockObjectStoreFactory::failing(ObjectStoreError::BucketNotFound(
            "tiering-test".into(),
        )),
    );

    let result = detector.check_object_store().await;

    assert_eq!(result.status, AvailabilityStatus::ConnectionFailed);
    assert_eq!(
        result.classification,
        Some(FailureClassification::BucketNotFound)
    );
    assert_eq!(objects.list_calls(), vec![("tiering-test".to_string(), 1)]);
}

#[tokio::test]
async fn incomplete_credentials_name_the_missing_field() {
    let config = ConfigBuilder::new().with_object_store().without_bucket().build();
    let (detector, _, objects) = detector(
        &config,
        ScriptedConnector::reachable(),
        MockObjectStoreFactory::healthy(),
    );

    let result = detector.check_object_store().await;

    assert_eq!(result.status, AvailabilityStatus::ConfigMissing);
    assert!(result.message.contains("bucket"));
    assert_eq!(objects.clients_created(), 0);
}

#[tokio::test]
async fn results_are_cached_until_cleared() {
    let config = ConfigBuilder::new().with_external_store().build();
    let (detector, connector, _) = detector(
        &config,
        ScriptedConnector::reachable(),
        MockObjectStoreFactory::healthy(),
    );

    assert!(detector.check_external_store().await.is_available());
    assert!(detector.check_external_store().await.is_available());
    assert_eq!(connector.calls().len(), 1);

    detector.clear_cache();
    assert!(detector.cached(Backend::ExternalStore).is_none());
    detector.check_external_store().await;
    assert_eq!(connector.calls().len(), 2);
}

#[tokio::test]
async fn zero_ttl_always_reprobes() {
    let config = ConfigBuilder::new()
        .with_object_store()
        .with_cache_ttl_seconds(0)
        .build();
    let (detector, _, objects) = detector(
        &config,
        ScriptedConnector::reachable(),
        MockObjectStoreFactory::healthy(),
    );

    detector.check_object_store().await;
    detector.check_object_store().await;

    assert_eq!(objects.clients_created(), 2);
}

#[tokio::test]
async fn truth_table_prefers_most_capable_mode() {
    let config = ConfigBuilder::new()
        .with_external_store()
        .with_object_store()
        .build();

    let (both, _, _) = detector(
        &config,
        ScriptedConnector::reachable(),
        MockObjectStoreFactory::healthy(),
    );
    assert_eq!(both.detect_mode().await, DeploymentMode::LocalExternalObject);

    let (external_only, _, _) = detector(
        &config,
        ScriptedConnector::reachable(),
        MockObjectStoreFactory::failing(ObjectStoreError::AccessDenied("denied".into())),
    );
    assert_eq!(
        external_only.detect_mode().await,
        DeploymentMode::LocalExternal
    );

    let (object_only, _, _) = detector(
        &config,
        ScriptedConnector::unreachable(),
        MockObjectStoreFactory::healthy(),
    );
    assert_eq!(object_only.detect_mode().await, DeploymentMode::LocalObject);
}

#[tokio::test]
async fn probes_run_concurrently() {
    let config = ConfigBuilder::new()
        .with_external_store()
        .with_object_store()
        .build();
    let (detector, _, _) = detector(
        &config,
        ScriptedConnector::reachable().with_delay(Duration::from_millis(400)),
        MockObjectStoreFactory::healthy().with_delay(Duration::from_millis(400)),
    );

    let started = Instant::now();
    let mode = detector.detect_mode().await;

    assert_eq!(mode, DeploymentMode::LocalExternalObject);
    assert!(
        started.elapsed() < Duration::from_millis(750),
        "probes ran sequentially: {:?}",
        started.elapsed()
    );
}
