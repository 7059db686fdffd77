pub mod config;
mod coordinator;
pub mod verify;

pub use config::Config;
pub use coordinator::{BlockRef, OdrCoordinator};
pub use verify::HeaderProof;
