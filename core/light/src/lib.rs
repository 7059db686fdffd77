pub mod config;
pub mod logging;
mod node;

pub use config::TomlConfigProvider;
pub use node::{Config, LightOdrNode};
