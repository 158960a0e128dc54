//! 配置管理
//!
//! `AppConfig` is assembled from struct defaults, an optional TOML file and
//! `TIERING_*` environment overrides, then validated structurally.

pub mod models;

pub use models::*;
