//! Backend availability probes with a per-backend TTL cache.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use tiering_core::config::{AppConfig, ExternalStoreConfig, ObjectStoreConfig};
use tiering_domain::entities::{AvailabilityResult, FailureClassification, ObjectStoreCredentials};
use tiering_domain::ports::{
    ConnectMode, ExternalStoreConnector, ObjectStoreClientFactory, ProbeError,
};
use tiering_domain::value_objects::{Backend, DeploymentMode};

/// Both probe results plus the mode they imply.
#[derive(Debug, Clone)]
pub struct DetectionReport {
    pub external: AvailabilityResult,
    pub object: AvailabilityResult,
    pub mode: DeploymentMode,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub external_store: ExternalStoreConfig,
    pub object_store: ObjectStoreConfig,
    /// URL of the embedded store; an external URL equal to it counts as missing.
    pub local_store_url: String,
    pub cache_ttl: Duration,
}

impl DetectorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            external_store: config.external_store.clone(),
            object_store: config.object_store.clone(),
            local_store_url: config.local_store.url.clone(),
            cache_ttl: Duration::from_secs(config.modes.availability_cache_ttl_seconds),
        }
    }
}

pub struct AvailabilityDetector {
    settings: DetectorSettings,
    connector: Arc<dyn ExternalStoreConnector>,
    object_factory: Arc<dyn ObjectStoreClientFactory>,
    cache: RwLock<HashMap<Backend, AvailabilityResult>>,
}

impl AvailabilityDetector {
    pub fn new(
        settings: DetectorSettings,
        connector: Arc<dyn ExternalStoreConnector>,
        object_factory: Arc<dyn ObjectStoreClientFactory>,
    ) -> Self {
        Self {
            settings,
            connector,
            object_factory,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &DetectorSettings {
        &self.settings
    }

    /// Last known result for a backend, fresh or not. Never probes.
    pub fn cached(&self, backend: Backend) -> Option<AvailabilityResult> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&backend)
            .cloned()
    }

    fn fresh(&self, backend: Backend) -> Option<AvailabilityResult> {
        let ttl = self.settings.cache_ttl;
        self.cached(backend)
            .filter(|result| result.age(Utc::now()) < ttl)
    }

    fn store(&self, result: AvailabilityResult) -> AvailabilityResult {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(result.backend, result.clone());
        result
    }

    pub fn clear_cache(&self) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        debug!("Availability cache cleared");
    }

    /// URL to probe, or the reason the external store counts as unconfigured.
    /// Configuration only; never probes.
    pub fn external_target(&self) -> Result<&str, &'static str> {
        if self.settings.external_store.disabled {
            return Err("external store disabled by configuration");
        }
        let url = self
            .settings
            .external_store
            .configured_url()
            .ok_or("no external store URL configured")?;
        if ExternalStoreConfig::points_to_embedded(url) || url == self.settings.local_store_url {
            return Err("external store URL resolves to the embedded store");
        }
        Ok(url)
    }

    pub fn object_credentials_present(&self) -> bool {
        self.settings.object_store.has_all_credentials()
    }

    #[instrument(skip(self))]
    pub async fn check_external_store(&self) -> AvailabilityResult {
        if self.settings.external_store.disabled {
            return AvailabilityResult::unavailable(
                Backend::ExternalStore,
                "external store disabled by configuration",
            );
        }

        if let Some(result) = self.fresh(Backend::ExternalStore) {
            return result;
        }

        let url = match self.external_target() {
            Ok(url) => url.to_string(),
            Err(reason) => {
                return self.store(AvailabilityResult::config_missing(
                    Backend::ExternalStore,
                    reason,
                ))
            }
        };

        let probe_timeout = Duration::from_secs(self.settings.external_store.probe_timeout_seconds);
        let started = Instant::now();

        let mut outcome = self.ping(&url, ConnectMode::Pooled, probe_timeout).await;
        if let Err(ProbeError::PoolerIncompatible(reason)) = &outcome {
            warn!(
                "Pooled probe rejected by connection pooler ({}), retrying with plain connection",
                reason
            );
            outcome = self.ping(&url, ConnectMode::Plain, probe_timeout).await;
        }

        let latency = started.elapsed();
        let result = match outcome {
            Ok(()) => AvailabilityResult::available(Backend::ExternalStore, latency),
            Err(err) => {
                AvailabilityResult::connection_failed(
                    Backend::ExternalStore,
                    err.classification(),
                    err.to_string(),
                    latency,
                )
            }
        };
        info!(
            "External store probe: {:?} in {:?}",
            result.status, latency
        );
        self.store(result)
    }

    async fn ping(
        &self,
        url: &str,
        mode: ConnectMode,
        probe_timeout: Duration,
    ) -> Result<(), ProbeError> {
        match timeout(probe_timeout, self.connector.ping(url, mode)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout),
        }
    }

    #[instrument(skip(self))]
    pub async fn check_object_store(&self) -> AvailabilityResult {
        let Some(credentials) = ObjectStoreCredentials::from_config(&self.settings.object_store)
        else {
            let missing = self.settings.object_store.missing_credentials().join(", ");
            return self.store(AvailabilityResult::config_missing(
                Backend::ObjectStore,
                format!("object store credentials missing: {missing}"),
            ));
        };

        if let Some(result) = self.fresh(Backend::ObjectStore) {
            return result;
        }

        let probe_timeout = Duration::from_secs(self.settings.object_store.probe_timeout_seconds);
        let started = Instant::now();

        let outcome = match self.object_factory.create(&credentials) {
            Ok(client) => {
                match timeout(probe_timeout, client.list_objects(&credentials.bucket, 1)).await {
                    Ok(listed) => listed.map(|_| ()).map_err(|e| (e.classification(), e.to_string())),
                    Err(_) => Err((
                        FailureClassification::Timeout,
                        format!("list timed out after {probe_timeout:?}"),
                    )),
                }
            }
            Err(e) => Err((e.classification(), e.to_string())),
        };

        let latency = started.elapsed();
        let result = match outcome {
            Ok(()) => AvailabilityResult::available(Backend::ObjectStore, latency),
            Err((classification, error)) => AvailabilityResult::connection_failed(
                Backend::ObjectStore,
                classification,
                error,
                latency,
            ),
        };
        info!("Object store probe: {:?} in {:?}", result.status, latency);
        self.store(result)
    }

    /// Runs both probes concurrently and combines them once both finish.
    pub async fn detect(&self) -> DetectionReport {
        let (external, object) = tokio::join!(self.check_external_store(), self.check_object_store());
        let mode = DeploymentMode::from_capabilities(external.is_available(), object.is_available());
        debug!("Detected deployment mode {}", mode);
        DetectionReport {
            external,
            object,
            mode,
        }
    }

    pub async fn detect_mode(&self) -> DeploymentMode {
        self.detect().await.mode
    }
}
