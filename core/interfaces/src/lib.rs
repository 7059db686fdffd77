mod anchor;
mod config;
mod connection;
mod dialer;

pub use anchor::*;
pub use config::*;
pub use connection::*;
pub use dialer::*;

// Re-export types.
#[rustfmt::skip]
pub use lxs_types as types;
