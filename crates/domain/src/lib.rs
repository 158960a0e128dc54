pub mod entities;
pub mod events;
pub mod ports;
pub mod repositories;
pub mod sqlx_impls;
pub mod switching;
pub mod value_objects;

pub use entities::*;
pub use events::*;
pub use ports::*;
pub use repositories::*;
pub use switching::*;
pub use value_objects::*;
pub use tiering_core::{TieringError, TieringResult};
