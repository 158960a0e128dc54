//! Deployment-mode state machine: availability probes, transition rules,
//! the mode manager itself and the sync policy it drives.

pub mod availability;
pub mod graph;
pub mod history;
pub mod manager;
pub mod policy;
pub mod reconciler;
pub mod strategy;

pub use availability::{AvailabilityDetector, DetectionReport, DetectorSettings};
pub use graph::CompatibilityGraph;
pub use history::SwitchHistory;
pub use manager::{ModeManager, ModeManagerSettings, PINNED_MODE_KEY};
pub use policy::PolicyTable;
pub use reconciler::Reconciler;
pub use strategy::{strategy_for, TransitionStrategy};
