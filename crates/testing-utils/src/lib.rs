//! # Tiering Testing Utils
//!
//! Hand-written doubles shared by the workspace's test suites:
//!
//! - **mocks**: in-memory repositories, scripted probe doubles, recording
//!   sinks, listeners and hooks, gated migrations and scripted executors
//! - **builders**: configuration and entity builders with test defaults
//! - **helpers**: SQLite in-memory store setup and small polling helpers
//!
//! ```toml
//! [dev-dependencies]
//! tiering-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
