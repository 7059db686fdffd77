pub mod config;
mod dial;
mod persist;
mod pool;
mod record;

pub use config::Config;
pub use dial::DialState;
pub use pool::ServerPool;
pub use record::{ServerRecord, Weight};
