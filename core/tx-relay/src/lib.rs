pub mod config;
mod relay;

pub use config::Config;
pub use relay::{RelayReport, TxRelay};
