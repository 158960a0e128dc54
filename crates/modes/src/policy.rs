//! Per entity-type sync directives, rebuilt wholesale on every mode change.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::info;

use tiering_domain::entities::SyncDirective;
use tiering_domain::value_objects::{
    DeploymentMode, EntityCategory, SyncDirection, SyncStrategyKind, SyncTarget,
};

/// Entity types known to the policy table and their category.
pub const ENTITY_CATALOGUE: &[(&str, EntityCategory)] = &[
    ("system_settings", EntityCategory::Critical),
    ("users", EntityCategory::Critical),
    ("api_credentials", EntityCategory::Critical),
    ("projects", EntityCategory::CoreBusiness),
    ("documents", EntityCategory::CoreBusiness),
    ("generation_tasks", EntityCategory::CoreBusiness),
    ("generated_images", EntityCategory::BulkContent),
    ("attachments", EntityCategory::BulkContent),
    ("content_versions", EntityCategory::BulkContent),
];

const HOUR: u64 = 3600;

/// Mode-independent defaults for one category.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaseDirective {
    pub interval: Duration,
    pub batch_size: u32,
    pub startup_sync: bool,
}

impl BaseDirective {
    pub fn for_category(category: EntityCategory) -> Self {
        match category {
            EntityCategory::Critical => Self {
                interval: Duration::from_secs(60),
                batch_size: 50,
                startup_sync: true,
            },
            EntityCategory::CoreBusiness => Self {
                interval: Duration::from_secs(300),
                batch_size: 100,
                startup_sync: true,
            },
            EntityCategory::BulkContent => Self {
                interval: Duration::from_secs(900),
                batch_size: 20,
                startup_sync: false,
            },
        }
    }
}

pub fn category_of(entity_type: &str) -> EntityCategory {
    ENTITY_CATALOGUE
        .iter()
        .find(|(name, _)| *name == entity_type)
        .map(|(_, category)| *category)
        .unwrap_or(EntityCategory::CoreBusiness)
}

/// Pure mapping from `(entity, category, mode)` to a directive.
pub fn derive_directive(
    entity_type: &str,
    category: EntityCategory,
    mode: DeploymentMode,
) -> SyncDirective {
    let base = BaseDirective::for_category(category);
    let both = vec![SyncDirection::ToExternal, SyncDirection::FromExternal];
    let bulk = category == EntityCategory::BulkContent;

    let directive = |directions: Vec<SyncDirection>,
                     interval: Duration,
                     strategy: SyncStrategyKind,
                     target: SyncTarget| SyncDirective {
        entity_type: entity_type.to_string(),
        enabled: true,
        directions,
        interval,
        batch_size: base.batch_size,
        strategy,
        startup_sync: base.startup_sync,
        cost_optimized: false,
        sync_on_change: false,
        target,
        backup_interval: None,
    };

    match mode {
        DeploymentMode::LocalOnly => SyncDirective::disabled(entity_type),

        DeploymentMode::LocalExternal => {
            let interval = if bulk { base.interval * 4 } else { base.interval };
            directive(
                both,
                interval,
                SyncStrategyKind::FullDuplex,
                SyncTarget::ExternalStore,
            )
        }

        DeploymentMode::LocalObject if bulk => SyncDirective {
            startup_sync: false,
            cost_optimized: true,
            ..directive(
                vec![SyncDirection::ToExternal],
                Duration::from_secs(24 * HOUR),
                SyncStrategyKind::BackupOnly,
                SyncTarget::ObjectStore,
            )
        },
        // Every object-store request is billed: sync rarely, and on change.
        DeploymentMode::LocalObject => SyncDirective {
            cost_optimized: true,
            sync_on_change: true,
            ..directive(
                both,
                (base.interval * 12).max(Duration::from_secs(HOUR)),
                SyncStrategyKind::FullDuplex,
                SyncTarget::ObjectStore,
            )
        },

        DeploymentMode::LocalExternalObject if bulk => SyncDirective {
            backup_interval: Some(Duration::from_secs(12 * HOUR)),
            ..directive(
                both,
                base.interval * 2,
                SyncStrategyKind::MasterSlave,
                SyncTarget::ObjectStore,
            )
        },
        DeploymentMode::LocalExternalObject => SyncDirective {
            backup_interval: Some(Duration::from_secs(6 * HOUR)),
            ..directive(
                both,
                base.interval * 2,
                SyncStrategyKind::FullDuplex,
                SyncTarget::ExternalStore,
            )
        },
    }
}

#[derive(Debug)]
struct PolicySnapshot {
    mode: DeploymentMode,
    directives: HashMap<String, SyncDirective>,
}

/// Readers take a cheap `Arc` clone of the current snapshot; `adjust_for_mode`
/// swaps in a fully built replacement.
#[derive(Debug)]
pub struct PolicyTable {
    snapshot: RwLock<Arc<PolicySnapshot>>,
}

impl PolicyTable {
    pub fn new(mode: DeploymentMode) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Self::build(mode))),
        }
    }

    fn build(mode: DeploymentMode) -> PolicySnapshot {
        let directives = ENTITY_CATALOGUE
            .iter()
            .map(|(name, category)| (name.to_string(), derive_directive(name, *category, mode)))
            .collect();
        PolicySnapshot { mode, directives }
    }

    fn current(&self) -> Arc<PolicySnapshot> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn adjust_for_mode(&self, mode: DeploymentMode) {
        let rebuilt = Arc::new(Self::build(mode));
        *self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = rebuilt;
        info!("Sync policy recomputed for mode {}", mode);
    }

    pub fn mode(&self) -> DeploymentMode {
        self.current().mode
    }

    pub fn strategy_for(&self, entity_type: &str) -> SyncDirective {
        let snapshot = self.current();
        snapshot
            .directives
            .get(entity_type)
            .cloned()
            .unwrap_or_else(|| {
                derive_directive(entity_type, category_of(entity_type), snapshot.mode)
            })
    }

    pub fn all(&self) -> Vec<SyncDirective> {
        let mut directives: Vec<SyncDirective> =
            self.current().directives.values().cloned().collect();
        directives.sort_by(|a, b| a.entity_type.cmp(&b.entity_type));
        directives
    }

    pub fn is_enabled(&self, entity_type: &str) -> bool {
        self.strategy_for(entity_type).enabled
    }

    pub fn directions(&self, entity_type: &str) -> Vec<SyncDirection> {
        self.strategy_for(entity_type).directions
    }

    pub fn interval(&self, entity_type: &str) -> Duration {
        self.strategy_for(entity_type).interval
    }

    pub fn batch_size(&self, entity_type: &str) -> u32 {
        self.strategy_for(entity_type).batch_size
    }

    pub fn startup_sync(&self, entity_type: &str) -> bool {
        self.strategy_for(entity_type).startup_sync
    }

    pub fn cost_optimized(&self, entity_type: &str) -> bool {
        self.strategy_for(entity_type).cost_optimized
    }

    pub fn sync_on_change(&self, entity_type: &str) -> bool {
        self.strategy_for(entity_type).sync_on_change
    }

    /// Entities whose directive asks for a sync pass right after a switch.
    pub fn startup_sync_entities(&self) -> Vec<String> {
        self.all()
            .into_iter()
            .filter(|d| d.enabled && d.startup_sync)
            .map(|d| d.entity_type)
            .collect()
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::new(DeploymentMode::LocalOnly)
    }
}
