//! Collaborator ports: things the core calls but does not implement.

pub mod hooks;
pub mod stores;

pub use hooks::*;
pub use stores::*;
