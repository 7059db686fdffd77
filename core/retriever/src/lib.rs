pub mod config;
mod job;
mod manager;
#[cfg(test)]
mod tests;

pub use config::Config;
pub use job::{JobState, RetrievalJob, VerifyFn};
pub use manager::{RetrievalHandle, RetrieveManager};
