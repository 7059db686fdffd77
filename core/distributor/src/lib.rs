pub mod config;
mod distributor;
mod request;
mod tracker;
#[cfg(test)]
mod tests;

pub use config::Config;
pub use distributor::{Delivery, RequestDistributor};
pub use request::{CostFn, DistRequest, EligibleFn};
pub use tracker::{Attempt, AttemptState, AttemptTracker, ExhaustionPolicy};
